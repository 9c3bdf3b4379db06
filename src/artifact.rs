//! Artifact writing - markdown body behind YAML front matter
//!
//! Writes go to a hidden temp sibling and are renamed into place, so an
//! interrupted item never leaves a partial artifact that planning would
//! mistake for a finished one.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::group::{write_atomic, AnalysisGroup, OperationKind};
use crate::provider::TokenUsage;

/// Suffix of reasoning side files
pub const REASONING_SUFFIX: &str = ".reasoning.md";

const FRONT_MATTER_FENCE: &str = "---";

/// Structured facts recorded with every artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub generator: String,
    pub generator_version: String,
    pub group_id: Uuid,
    pub group_name: String,
    pub group_slug: String,
    pub operation: OperationKind,
    pub provider: String,
    pub model: String,
    /// Source labels, in processing order
    pub sources: Vec<String>,
    pub system_prompt: String,
    pub user_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
    pub usage: TokenUsage,
    pub generated_at: DateTime<Utc>,
}

impl Provenance {
    pub fn for_group(group: &AnalysisGroup, provider: &str) -> Self {
        Self {
            generator: env!("CARGO_PKG_NAME").to_string(),
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
            group_id: group.group_id,
            group_name: group.name.clone(),
            group_slug: group.label().to_string(),
            operation: group.operation.kind(),
            provider: provider.to_string(),
            model: group.model.clone(),
            sources: Vec::new(),
            system_prompt: String::new(),
            user_prompt: String::new(),
            chunk_count: None,
            usage: TokenUsage::default(),
            generated_at: Utc::now(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_prompts(mut self, system: impl Into<String>, user: impl Into<String>) -> Self {
        self.system_prompt = system.into();
        self.user_prompt = user.into();
        self
    }
}

/// Persists artifacts for the runner
pub trait ArtifactWriter: Send + Sync {
    fn write(&self, path: &Path, body: &str, provenance: &Provenance) -> Result<()>;

    /// Write reasoning beside `artifact`, returning the side file's path
    fn write_reasoning(
        &self,
        artifact: &Path,
        reasoning: &str,
        provenance: &Provenance,
    ) -> Result<PathBuf> {
        let path = reasoning_path(artifact);
        self.write(&path, reasoning, provenance)?;
        Ok(path)
    }
}

/// Default writer: YAML front matter, then the body
#[derive(Debug, Clone, Default)]
pub struct FrontMatterWriter;

impl FrontMatterWriter {
    pub fn new() -> Self {
        Self
    }

    pub fn render(body: &str, provenance: &Provenance) -> Result<String> {
        let yaml = serde_yaml::to_string(provenance)?;
        let mut out = String::with_capacity(yaml.len() + body.len() + 16);
        out.push_str(FRONT_MATTER_FENCE);
        out.push('\n');
        out.push_str(&yaml);
        if !yaml.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(FRONT_MATTER_FENCE);
        out.push_str("\n\n");
        out.push_str(body.trim_end());
        out.push('\n');
        Ok(out)
    }
}

impl ArtifactWriter for FrontMatterWriter {
    fn write(&self, path: &Path, body: &str, provenance: &Provenance) -> Result<()> {
        let content = Self::render(body, provenance)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(path, content.as_bytes())?;
        tracing::debug!(path = %path.display(), bytes = content.len(), "Artifact written");
        Ok(())
    }
}

/// `dir/x_analysis.md` -> `dir/x_analysis.reasoning.md`
pub fn reasoning_path(artifact: &Path) -> PathBuf {
    let stem = artifact
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    artifact.with_file_name(format!("{}{}", stem, REASONING_SUFFIX))
}

pub fn is_reasoning_artifact(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(REASONING_SUFFIX)
}

/// Body of a document with any leading front matter removed
pub fn strip_front_matter(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("---\n").or_else(|| text.strip_prefix("---\r\n")) else {
        return text;
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end() == FRONT_MATTER_FENCE {
            return rest[offset..].trim_start_matches(|c: char| c == '\r' || c == '\n');
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{MapInputs, OperationMode};
    use tempfile::TempDir;

    fn provenance() -> Provenance {
        let mut group = AnalysisGroup::new(
            "Records",
            "mock",
            "mock-model",
            OperationMode::Map(MapInputs::default()),
        );
        group.slug = Some("records".into());
        Provenance::for_group(&group, "mock")
            .with_sources(vec!["a.md".into()])
            .with_prompts("default", "prompts/user.md")
    }

    #[test]
    fn test_write_creates_dirs_and_front_matter() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("outputs/sub/a_analysis.md");

        FrontMatterWriter::new()
            .write(&path, "## Findings\nNone.\n\n", &provenance())
            .unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("---\n"));
        assert!(text.ends_with("## Findings\nNone.\n"));
        assert_eq!(strip_front_matter(&text), "## Findings\nNone.\n");

        let yaml = text.trim_start_matches("---\n").split("\n---\n").next().unwrap();
        let parsed: Provenance = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.group_slug, "records");
        assert_eq!(parsed.sources, vec!["a.md"]);
        assert_eq!(parsed.generator, "bulk-analysis");
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("x.md");
        FrontMatterWriter::new().write(&path, "body", &provenance()).unwrap();

        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["x.md"]);
    }

    #[test]
    fn test_reasoning_side_file() {
        let tmp = TempDir::new().unwrap();
        let artifact = tmp.path().join("a_analysis.md");
        let written = FrontMatterWriter::new()
            .write_reasoning(&artifact, "thinking", &provenance())
            .unwrap();

        assert_eq!(written, tmp.path().join("a_analysis.reasoning.md"));
        assert!(is_reasoning_artifact("a_analysis.reasoning.md"));
        assert!(!is_reasoning_artifact("a_analysis.md"));
    }

    #[test]
    fn test_strip_front_matter_without_header() {
        assert_eq!(strip_front_matter("plain\ntext"), "plain\ntext");
        assert_eq!(strip_front_matter("---\nunterminated"), "---\nunterminated");
    }
}

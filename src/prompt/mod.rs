//! # Prompt rendering and placeholder validation
//!
//! - [`render`]: fail-open `{placeholder}` substitution
//! - [`PromptSpecRegistry`]: required/optional placeholders per prompt role
//! - [`analyse`]: pre-run report of used/missing/unused placeholders
//! - [`PromptPair`]: a group's system + user templates, loaded from disk or
//!   the built-in defaults

mod registry;
mod render;

pub use registry::{
    PromptSpec, PromptSpecRegistry, BULK_REDUCE_SYSTEM, BULK_REDUCE_USER, DOCUMENT_ANALYSIS_SYSTEM,
    DOCUMENT_ANALYSIS_USER, REFINEMENT, REPORT_GENERATION_USER,
};
pub use render::{placeholders, render};

use std::collections::{BTreeSet, HashMap};
use std::fs;

use crate::error::{AnalysisError, Result};
use crate::group::{AnalysisGroup, OperationMode};
use crate::project::Project;

/// Placeholders the runner fills per work item
pub const DYNAMIC_PLACEHOLDERS: &[&str] = &[
    "document_content",
    "document_name",
    "source_pdf_filename",
    "source_pdf_relative_path",
    "chunk_index",
    "chunk_total",
    "reduce_source_count",
    "reduce_source_list",
];

pub const DEFAULT_MAP_SYSTEM_PROMPT: &str = "You are assisting a forensic evaluator. \
Read the document carefully and report only what it states. \
Cite page or section markers when they are present.";

pub const DEFAULT_MAP_USER_PROMPT: &str = "Analyse the following document ({document_name}).\n\
Summarise the key facts, dates, people, and any statements relevant to the evaluation.\n\n\
<document>\n{document_content}\n</document>";

pub const DEFAULT_REDUCE_SYSTEM_PROMPT: &str = "You are assisting a forensic evaluator. \
Integrate findings across several source documents without inventing facts. \
Attribute each finding to its source.";

pub const DEFAULT_REDUCE_USER_PROMPT: &str = "The following {reduce_source_count} sources are \
included:\n{reduce_source_list}\n\n\
Produce an integrated analysis across all of them.\n\n\
{document_content}";

/// Pre-run placeholder report (informational, never blocks)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderAnalysis {
    /// Placeholders referenced by either template
    pub used: BTreeSet<String>,
    /// Required placeholders with no available value
    pub missing_required: BTreeSet<String>,
    /// Optional or unrecognised placeholders with no available value
    pub missing_optional: BTreeSet<String>,
    /// Available values no template references
    pub unused: BTreeSet<String>,
}

impl PlaceholderAnalysis {
    pub fn has_warnings(&self) -> bool {
        !self.missing_required.is_empty() || !self.missing_optional.is_empty()
    }
}

/// Report which placeholders a prompt pair uses and which lack values
///
/// Dynamic placeholders are exempt from "missing": their values only exist
/// once a run begins.
pub fn analyse(
    system_template: &str,
    user_template: &str,
    available: &BTreeSet<String>,
    required: &BTreeSet<String>,
    optional: &BTreeSet<String>,
) -> PlaceholderAnalysis {
    let mut used = placeholders(system_template);
    used.extend(placeholders(user_template));

    let is_dynamic = |name: &String| DYNAMIC_PLACEHOLDERS.contains(&name.as_str());
    let lacks_value = |name: &&String| !available.contains(*name) && !is_dynamic(*name);

    let missing_required = required.iter().filter(lacks_value).cloned().collect();
    let missing_optional = optional
        .iter()
        .chain(used.iter())
        .filter(|name| !required.contains(*name))
        .filter(lacks_value)
        .cloned()
        .collect();
    let unused = available
        .iter()
        .filter(|name| !used.contains(*name))
        .cloned()
        .collect();

    PlaceholderAnalysis {
        used,
        missing_required,
        missing_optional,
        unused,
    }
}

/// A group's resolved system and user templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
    /// Where each template came from (path or `default`)
    pub system_source: String,
    pub user_source: String,
}

impl PromptPair {
    /// Load a group's prompts, falling back to the built-in defaults
    pub fn load(project: &Project, group: &AnalysisGroup) -> Result<Self> {
        let (default_system, default_user) = match group.operation {
            OperationMode::Map(_) => (DEFAULT_MAP_SYSTEM_PROMPT, DEFAULT_MAP_USER_PROMPT),
            OperationMode::Reduce(_) => (DEFAULT_REDUCE_SYSTEM_PROMPT, DEFAULT_REDUCE_USER_PROMPT),
        };

        let (system, system_source) =
            load_template(project, group.system_prompt_path.as_deref(), default_system)?;
        let (user, user_source) =
            load_template(project, group.user_prompt_path.as_deref(), default_user)?;

        Ok(Self {
            system,
            user,
            system_source,
            user_source,
        })
    }

    /// Prompt roles these templates play for the group's mode
    pub fn roles(group: &AnalysisGroup) -> (&'static str, &'static str) {
        match group.operation {
            OperationMode::Map(_) => (DOCUMENT_ANALYSIS_SYSTEM, DOCUMENT_ANALYSIS_USER),
            OperationMode::Reduce(_) => (BULK_REDUCE_SYSTEM, BULK_REDUCE_USER),
        }
    }

    /// Validate both templates against their roles before any LLM call
    pub fn validate(&self, registry: &PromptSpecRegistry, group: &AnalysisGroup) -> Result<()> {
        let (system_role, user_role) = Self::roles(group);
        registry.validate(system_role, &self.system)?;
        registry.validate(user_role, &self.user)
    }

    /// Placeholder report for these templates given the caller's values
    pub fn analyse(
        &self,
        registry: &PromptSpecRegistry,
        group: &AnalysisGroup,
        values: &HashMap<String, String>,
    ) -> PlaceholderAnalysis {
        let (system_role, user_role) = Self::roles(group);
        let mut required = BTreeSet::new();
        let mut optional = BTreeSet::new();
        for role in [system_role, user_role] {
            if let Some(spec) = registry.get(role) {
                required.extend(spec.required.iter().cloned());
                optional.extend(spec.optional.iter().cloned());
            }
        }
        let available = values.keys().cloned().collect();
        analyse(&self.system, &self.user, &available, &required, &optional)
    }
}

fn load_template(
    project: &Project,
    reference: Option<&str>,
    default: &str,
) -> Result<(String, String)> {
    match reference {
        None => Ok((default.to_string(), "default".to_string())),
        Some(reference) => {
            let path = project.resolve_reference(reference);
            match fs::read_to_string(&path) {
                Ok(text) => Ok((text, reference.to_string())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(AnalysisError::PromptNotFound {
                        path: path.display().to_string(),
                    })
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{MapInputs, ReduceInputs};
    use tempfile::TempDir;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_analyse_reports_categories() {
        let report = analyse(
            "You help {client_name}.",
            "{document_content}\n{case_name} {extra}",
            &set(&["client_name", "evaluator"]),
            &set(&["document_content", "case_number"]),
            &set(&["case_name"]),
        );

        assert_eq!(
            report.used,
            set(&["case_name", "client_name", "document_content", "extra"])
        );
        assert_eq!(report.missing_required, set(&["case_number"]));
        assert_eq!(report.missing_optional, set(&["case_name", "extra"]));
        assert_eq!(report.unused, set(&["evaluator"]));
        assert!(report.has_warnings());
    }

    #[test]
    fn test_analyse_exempts_dynamic_placeholders() {
        let report = analyse(
            "",
            "{document_content} {chunk_index}/{chunk_total} {reduce_source_list}",
            &BTreeSet::new(),
            &set(&["document_content"]),
            &set(&["chunk_index"]),
        );
        assert!(!report.has_warnings());
    }

    #[test]
    fn test_defaults_pass_validation() {
        let registry = PromptSpecRegistry::with_defaults();
        registry
            .validate(DOCUMENT_ANALYSIS_USER, DEFAULT_MAP_USER_PROMPT)
            .unwrap();
        registry
            .validate(BULK_REDUCE_USER, DEFAULT_REDUCE_USER_PROMPT)
            .unwrap();
    }

    #[test]
    fn test_load_falls_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let project = Project::new(tmp.path());
        let group = AnalysisGroup::new(
            "Summary",
            "mock",
            "m",
            OperationMode::Reduce(ReduceInputs::default()),
        );
        let pair = PromptPair::load(&project, &group).unwrap();
        assert_eq!(pair.user, DEFAULT_REDUCE_USER_PROMPT);
        assert_eq!(pair.user_source, "default");
    }

    #[test]
    fn test_load_custom_prompt_and_validate() {
        let tmp = TempDir::new().unwrap();
        let project = Project::new(tmp.path());
        fs::create_dir_all(tmp.path().join("prompts")).unwrap();
        fs::write(tmp.path().join("prompts/user.md"), "Summarise {document_name}").unwrap();

        let group = AnalysisGroup::new(
            "Records",
            "mock",
            "m",
            OperationMode::Map(MapInputs::default()),
        )
        .with_prompts(None, Some("prompts/user.md".into()));
        let pair = PromptPair::load(&project, &group).unwrap();
        let err = pair
            .validate(&PromptSpecRegistry::with_defaults(), &group)
            .unwrap_err();
        assert!(err.to_string().contains("{document_content}"));
    }

    #[test]
    fn test_load_missing_prompt_file() {
        let tmp = TempDir::new().unwrap();
        let project = Project::new(tmp.path());
        let group = AnalysisGroup::new(
            "Records",
            "mock",
            "m",
            OperationMode::Map(MapInputs::default()),
        )
        .with_prompts(Some("nope.md".into()), None);
        let err = PromptPair::load(&project, &group).unwrap_err();
        assert_eq!(err.code(), "BULK-021");
    }
}

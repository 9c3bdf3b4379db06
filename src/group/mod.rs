//! Analysis groups - the unit of configuration
//!
//! - [`AnalysisGroup`]: domain type, operation mode as a tagged union
//! - [`GroupRecord`]: flat persisted JSON shape, versioned by `version`
//! - [`GroupStore`]: list/save/delete scoped to a project

mod store;

pub use store::{GroupStore, LoadReport, SkippedRecord};
pub(crate) use store::write_atomic;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AnalysisError, Result};

/// Current persisted record version
pub const GROUP_SCHEMA_VERSION: u32 = 2;

/// Default reduce artifact name
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "{slug}_combined_{timestamp}.md";

// ═══════════════════════════════════════════════════════════════
// OPERATION MODE
// ═══════════════════════════════════════════════════════════════

/// Ordering rule for reduce inputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombineOrder {
    #[default]
    #[serde(rename = "path", alias = "by-path")]
    ByPath,
    #[serde(rename = "mtime", alias = "by-mtime")]
    ByMtime,
}

/// Inputs of a per-document (map) group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapInputs {
    /// Corpus-relative files
    pub files: Vec<String>,
    /// Corpus-relative directories, selected recursively
    pub directories: Vec<String>,
}

/// Inputs of a combined (reduce) group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceInputs {
    pub converted_files: Vec<String>,
    pub converted_directories: Vec<String>,
    /// Slugs whose whole output set is included
    pub map_groups: Vec<String>,
    /// `<slug>/<dir>` inside another group's outputs
    pub map_directories: Vec<String>,
    /// `<slug>/<file>` inside another group's outputs
    pub map_files: Vec<String>,
    pub order: CombineOrder,
    pub output_template: String,
    pub use_reasoning: bool,
}

impl Default for ReduceInputs {
    fn default() -> Self {
        Self {
            converted_files: Vec::new(),
            converted_directories: Vec::new(),
            map_groups: Vec::new(),
            map_directories: Vec::new(),
            map_files: Vec::new(),
            order: CombineOrder::ByPath,
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            use_reasoning: false,
        }
    }
}

impl ReduceInputs {
    pub fn is_empty(&self) -> bool {
        self.converted_files.is_empty()
            && self.converted_directories.is_empty()
            && self.map_groups.is_empty()
            && self.map_directories.is_empty()
            && self.map_files.is_empty()
    }
}

/// Operation mode with the input set that belongs to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationMode {
    Map(MapInputs),
    Reduce(ReduceInputs),
}

/// Discriminant of [`OperationMode`], as persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    PerDocument,
    Combined,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerDocument => write!(f, "per_document"),
            Self::Combined => write!(f, "combined"),
        }
    }
}

impl OperationMode {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Map(_) => OperationKind::PerDocument,
            Self::Reduce(_) => OperationKind::Combined,
        }
    }

    fn normalize(&mut self) {
        match self {
            Self::Map(inputs) => {
                normalize_selection(&mut inputs.files);
                normalize_selection(&mut inputs.directories);
            }
            Self::Reduce(inputs) => {
                normalize_selection(&mut inputs.converted_files);
                normalize_selection(&mut inputs.converted_directories);
                normalize_selection(&mut inputs.map_groups);
                normalize_selection(&mut inputs.map_directories);
                normalize_selection(&mut inputs.map_files);
                if inputs.output_template.trim().is_empty() {
                    inputs.output_template = DEFAULT_OUTPUT_TEMPLATE.to_string();
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// ANALYSIS GROUP
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisGroup {
    pub group_id: Uuid,
    pub name: String,
    pub description: String,
    /// Assigned on first save, immutable afterwards
    pub slug: Option<String>,
    pub provider_id: String,
    pub model: String,
    pub custom_context_window: Option<u32>,
    pub system_prompt_path: Option<String>,
    pub user_prompt_path: Option<String>,
    pub operation: OperationMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisGroup {
    /// Create a new group with a fresh identifier and timestamps
    pub fn new(
        name: impl Into<String>,
        provider_id: impl Into<String>,
        model: impl Into<String>,
        operation: OperationMode,
    ) -> Self {
        let now = Utc::now();
        Self {
            group_id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            slug: None,
            provider_id: provider_id.into(),
            model: model.into(),
            custom_context_window: None,
            system_prompt_path: None,
            user_prompt_path: None,
            operation,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_prompts(
        mut self,
        system_prompt_path: Option<String>,
        user_prompt_path: Option<String>,
    ) -> Self {
        self.system_prompt_path = system_prompt_path;
        self.user_prompt_path = user_prompt_path;
        self
    }

    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.custom_context_window = Some(tokens);
        self
    }

    /// Slug or an error naming the group (unsaved groups have no namespace)
    pub fn require_slug(&self) -> Result<&str> {
        self.slug
            .as_deref()
            .ok_or_else(|| AnalysisError::InconsistentOperation {
                group: self.name.clone(),
                details: "group has not been saved and has no slug".to_string(),
            })
    }

    /// Label used in events and logs
    pub fn label(&self) -> &str {
        self.slug.as_deref().unwrap_or(&self.name)
    }

    pub fn normalize_selections(&mut self) {
        self.operation.normalize();
    }
}

// ═══════════════════════════════════════════════════════════════
// PERSISTED RECORD
// ═══════════════════════════════════════════════════════════════

/// Flat JSON shape of a group on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    pub version: u32,
    pub group_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub operation: OperationKind,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub directories: Vec<String>,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub custom_context_window: Option<u32>,
    #[serde(default)]
    pub system_prompt_path: Option<String>,
    #[serde(default)]
    pub user_prompt_path: Option<String>,
    #[serde(default)]
    pub combine_converted_files: Vec<String>,
    #[serde(default)]
    pub combine_converted_directories: Vec<String>,
    #[serde(default)]
    pub combine_map_groups: Vec<String>,
    #[serde(default)]
    pub combine_map_directories: Vec<String>,
    #[serde(default)]
    pub combine_map_files: Vec<String>,
    #[serde(default)]
    pub combine_order: CombineOrder,
    #[serde(default)]
    pub combine_output_template: Option<String>,
    #[serde(default)]
    pub use_reasoning: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&AnalysisGroup> for GroupRecord {
    fn from(group: &AnalysisGroup) -> Self {
        let mut record = GroupRecord {
            version: GROUP_SCHEMA_VERSION,
            group_id: group.group_id,
            name: group.name.clone(),
            description: group.description.clone(),
            slug: group.slug.clone(),
            operation: group.operation.kind(),
            files: Vec::new(),
            directories: Vec::new(),
            provider_id: group.provider_id.clone(),
            model: group.model.clone(),
            custom_context_window: group.custom_context_window,
            system_prompt_path: group.system_prompt_path.clone(),
            user_prompt_path: group.user_prompt_path.clone(),
            combine_converted_files: Vec::new(),
            combine_converted_directories: Vec::new(),
            combine_map_groups: Vec::new(),
            combine_map_directories: Vec::new(),
            combine_map_files: Vec::new(),
            combine_order: CombineOrder::ByPath,
            combine_output_template: None,
            use_reasoning: false,
            created_at: group.created_at,
            updated_at: group.updated_at,
        };

        match &group.operation {
            OperationMode::Map(inputs) => {
                record.files = inputs.files.clone();
                record.directories = inputs.directories.clone();
            }
            OperationMode::Reduce(inputs) => {
                record.combine_converted_files = inputs.converted_files.clone();
                record.combine_converted_directories = inputs.converted_directories.clone();
                record.combine_map_groups = inputs.map_groups.clone();
                record.combine_map_directories = inputs.map_directories.clone();
                record.combine_map_files = inputs.map_files.clone();
                record.combine_order = inputs.order;
                record.combine_output_template = Some(inputs.output_template.clone());
                record.use_reasoning = inputs.use_reasoning;
            }
        }

        record
    }
}

impl TryFrom<GroupRecord> for AnalysisGroup {
    type Error = AnalysisError;

    fn try_from(record: GroupRecord) -> Result<Self> {
        let inconsistent = |details: &str| AnalysisError::InconsistentOperation {
            group: record.name.clone(),
            details: details.to_string(),
        };

        let operation = match record.operation {
            OperationKind::PerDocument => {
                let has_combined = !record.combine_converted_files.is_empty()
                    || !record.combine_converted_directories.is_empty()
                    || !record.combine_map_groups.is_empty()
                    || !record.combine_map_directories.is_empty()
                    || !record.combine_map_files.is_empty()
                    || record.use_reasoning;
                if has_combined {
                    return Err(inconsistent("per_document group carries combined inputs"));
                }
                OperationMode::Map(MapInputs {
                    files: record.files,
                    directories: record.directories,
                })
            }
            OperationKind::Combined => {
                if !record.files.is_empty() || !record.directories.is_empty() {
                    return Err(inconsistent("combined group carries per-document inputs"));
                }
                OperationMode::Reduce(ReduceInputs {
                    converted_files: record.combine_converted_files,
                    converted_directories: record.combine_converted_directories,
                    map_groups: record.combine_map_groups,
                    map_directories: record.combine_map_directories,
                    map_files: record.combine_map_files,
                    order: record.combine_order,
                    output_template: record
                        .combine_output_template
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or_else(|| DEFAULT_OUTPUT_TEMPLATE.to_string()),
                    use_reasoning: record.use_reasoning,
                })
            }
        };

        Ok(AnalysisGroup {
            group_id: record.group_id,
            name: record.name,
            description: record.description,
            slug: record.slug.filter(|s| !s.is_empty()),
            provider_id: record.provider_id,
            model: record.model,
            custom_context_window: record.custom_context_window,
            system_prompt_path: record.system_prompt_path.filter(|p| !p.trim().is_empty()),
            user_prompt_path: record.user_prompt_path.filter(|p| !p.trim().is_empty()),
            operation,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

// ═══════════════════════════════════════════════════════════════
// SLUGS AND SELECTIONS
// ═══════════════════════════════════════════════════════════════

/// Derive a filesystem-safe slug from a display name
///
/// Lower-cased; runs of non-alphanumeric characters collapse to one hyphen;
/// leading/trailing hyphens trimmed. Empty names fall back to `group`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    if slug.is_empty() {
        "group".to_string()
    } else {
        slug
    }
}

/// Pick `base`, `base-2`, `base-3`, ... whichever is not taken
pub fn disambiguate_slug<'a>(base: &str, taken: impl IntoIterator<Item = &'a str>) -> String {
    let taken: std::collections::HashSet<&str> = taken.into_iter().collect();
    if !taken.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !taken.contains(candidate.as_str()))
        .unwrap_or_else(|| base.to_string())
}

/// Normalize a relative path selection in place: trimmed, `/` separators,
/// leading/trailing separators stripped, empties dropped, sorted, unique.
pub fn normalize_selection(items: &mut Vec<String>) {
    let mut normalized: Vec<String> = items
        .iter()
        .map(|item| normalize_relative(item))
        .filter(|item| !item.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    *items = normalized;
}

/// Normalize one corpus-relative path
pub fn normalize_relative(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    unified
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

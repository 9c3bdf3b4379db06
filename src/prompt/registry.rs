//! Prompt spec registry - required/optional placeholders per prompt role
//!
//! Constructed once and injected where prompts are validated.

use std::collections::{BTreeSet, HashMap};

use crate::error::{AnalysisError, Result};

use super::render::placeholders;

pub const DOCUMENT_ANALYSIS_SYSTEM: &str = "document_analysis_system_prompt";
pub const DOCUMENT_ANALYSIS_USER: &str = "document_analysis_user_prompt";
pub const BULK_REDUCE_SYSTEM: &str = "bulk_reduce_system_prompt";
pub const BULK_REDUCE_USER: &str = "bulk_reduce_user_prompt";
pub const REFINEMENT: &str = "refinement_prompt";
pub const REPORT_GENERATION_USER: &str = "report_generation_user_prompt";

/// Placeholder contract of one prompt role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptSpec {
    pub required: BTreeSet<String>,
    pub optional: BTreeSet<String>,
}

impl PromptSpec {
    pub fn new<R, O>(required: R, optional: O) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            optional: optional.into_iter().map(Into::into).collect(),
        }
    }
}

/// Registry of prompt specs keyed by role
#[derive(Debug, Clone, Default)]
pub struct PromptSpecRegistry {
    specs: HashMap<String, PromptSpec>,
}

impl PromptSpecRegistry {
    /// Empty registry (fixtures register their own specs)
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the engine's built-in prompt roles
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            DOCUMENT_ANALYSIS_SYSTEM,
            PromptSpec::new(Vec::<String>::new(), ["client_name", "case_name"]),
        );
        registry.register(
            DOCUMENT_ANALYSIS_USER,
            PromptSpec::new(
                ["document_content"],
                [
                    "document_name",
                    "source_pdf_filename",
                    "source_pdf_relative_path",
                    "chunk_index",
                    "chunk_total",
                ],
            ),
        );
        registry.register(
            BULK_REDUCE_SYSTEM,
            PromptSpec::new(Vec::<String>::new(), ["client_name", "case_name"]),
        );
        registry.register(
            BULK_REDUCE_USER,
            PromptSpec::new(
                ["document_content"],
                ["reduce_source_count", "reduce_source_list"],
            ),
        );
        registry.register(
            REFINEMENT,
            PromptSpec::new(["draft_report", "template"], ["transcript"]),
        );
        registry.register(
            REPORT_GENERATION_USER,
            PromptSpec::new(["template_section", "transcript"], ["section_title"]),
        );
        registry
    }

    pub fn register(&mut self, key: impl Into<String>, spec: PromptSpec) {
        self.specs.insert(key.into(), spec);
    }

    pub fn get(&self, key: &str) -> Option<&PromptSpec> {
        self.specs.get(key)
    }

    /// Reject a template that lacks placeholders its role requires
    ///
    /// Unknown roles have no requirements.
    pub fn validate(&self, prompt_key: &str, template: &str) -> Result<()> {
        let missing = self.missing_required(prompt_key, template);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AnalysisError::MissingRequiredPlaceholders {
                prompt_key: prompt_key.to_string(),
                missing,
            })
        }
    }

    /// Required placeholders absent from `template`, sorted
    pub fn missing_required(&self, prompt_key: &str, template: &str) -> Vec<String> {
        let Some(spec) = self.specs.get(prompt_key) else {
            return Vec::new();
        };
        let used = placeholders(template);
        spec.required
            .iter()
            .filter(|name| !used.contains(*name))
            .cloned()
            .collect()
    }
}

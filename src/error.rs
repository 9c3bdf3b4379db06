//! Error types with error codes and fix suggestions
//!
//! Error code ranges:
//! - BULK-000-009: Group records and the configuration store
//! - BULK-010-019: Planning (input resolution)
//! - BULK-020-029: Prompts and placeholders
//! - BULK-030-039: Providers
//! - BULK-040-049: Runs and coordination
//! - BULK-090-099: IO and serialization

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    // ═══════════════════════════════════════════
    // GROUP RECORDS (000-009)
    // ═══════════════════════════════════════════
    #[error("[BULK-001] Unsupported group record version in '{path}': expected {expected}, found {found}")]
    UnsupportedFormat {
        path: String,
        expected: u32,
        found: u32,
    },

    #[error("[BULK-002] Malformed group record '{path}': {details}")]
    MalformedRecord { path: String, details: String },

    #[error("[BULK-003] Group '{group}' has inconsistent operation fields: {details}")]
    InconsistentOperation { group: String, details: String },

    #[error("[BULK-004] Group '{group}' not found")]
    GroupNotFound { group: String },

    #[error("[BULK-005] Configuration error: {reason}")]
    ConfigError { reason: String },

    // ═══════════════════════════════════════════
    // PLANNING (010-019)
    // ═══════════════════════════════════════════
    #[error("[BULK-010] No inputs resolved for group '{group}'")]
    NoInputsResolved { group: String },

    #[error("[BULK-011] Group '{group}' is configured for {configured} but a {requested} run was requested")]
    ModeMismatch {
        group: String,
        configured: String,
        requested: String,
    },

    // ═══════════════════════════════════════════
    // PROMPTS (020-029)
    // ═══════════════════════════════════════════
    #[error("[BULK-020] Prompt '{prompt_key}' is missing required placeholders: {}", format_placeholders(.missing))]
    MissingRequiredPlaceholders {
        prompt_key: String,
        missing: Vec<String>,
    },

    #[error("[BULK-021] Prompt file not found: {path}")]
    PromptNotFound { path: String },

    // ═══════════════════════════════════════════
    // PROVIDERS (030-039)
    // ═══════════════════════════════════════════
    #[error("[BULK-030] Provider '{provider}' not configured")]
    ProviderNotConfigured { provider: String },

    #[error("[BULK-031] Provider API error: {message}")]
    ProviderApiError { message: String },

    #[error("[BULK-032] Missing API key for provider '{provider}'")]
    MissingApiKey { provider: String },

    #[error("[BULK-033] Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // ═══════════════════════════════════════════
    // RUNS (040-049)
    // ═══════════════════════════════════════════
    #[error("[BULK-040] Group '{group}' is already running")]
    AlreadyRunning { group: String },

    #[error("[BULK-041] Item '{path}' failed: {reason}")]
    ItemFailed { path: String, reason: String },

    #[error("[BULK-042] Run for group '{group}' failed: {reason}")]
    RunFailed { group: String, reason: String },

    #[error("[BULK-043] Run worker for group '{group}' stopped unexpectedly")]
    WorkerLost { group: String },

    // ═══════════════════════════════════════════
    // IO / SERIALIZATION (090-099)
    // ═══════════════════════════════════════════
    #[error("[BULK-090] IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("[BULK-091] JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("[BULK-092] YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

fn format_placeholders(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("{{{}}}", n))
        .collect::<Vec<_>>()
        .join(", ")
}

impl AnalysisError {
    /// Get the error code (e.g., "BULK-001")
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat { .. } => "BULK-001",
            Self::MalformedRecord { .. } => "BULK-002",
            Self::InconsistentOperation { .. } => "BULK-003",
            Self::GroupNotFound { .. } => "BULK-004",
            Self::ConfigError { .. } => "BULK-005",
            Self::NoInputsResolved { .. } => "BULK-010",
            Self::ModeMismatch { .. } => "BULK-011",
            Self::MissingRequiredPlaceholders { .. } => "BULK-020",
            Self::PromptNotFound { .. } => "BULK-021",
            Self::ProviderNotConfigured { .. } => "BULK-030",
            Self::ProviderApiError { .. } => "BULK-031",
            Self::MissingApiKey { .. } => "BULK-032",
            Self::InvalidConfig { .. } => "BULK-033",
            Self::AlreadyRunning { .. } => "BULK-040",
            Self::ItemFailed { .. } => "BULK-041",
            Self::RunFailed { .. } => "BULK-042",
            Self::WorkerLost { .. } => "BULK-043",
            Self::IoError(_) => "BULK-090",
            Self::JsonError(_) => "BULK-091",
            Self::YamlError(_) => "BULK-092",
        }
    }

    /// Check if error is recoverable (retrying the item may succeed)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ProviderApiError { .. } | Self::ItemFailed { .. } | Self::IoError(_)
        )
    }

    /// Errors that reject a run before it starts
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NoInputsResolved { .. }
                | Self::ModeMismatch { .. }
                | Self::MissingRequiredPlaceholders { .. }
                | Self::PromptNotFound { .. }
                | Self::AlreadyRunning { .. }
        )
    }
}

impl FixSuggestion for AnalysisError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            Self::UnsupportedFormat { .. } => {
                Some("Recreate the group or migrate its config.json to the current version")
            }
            Self::MalformedRecord { .. } => Some("Check config.json is valid JSON"),
            Self::InconsistentOperation { .. } => {
                Some("Clear the input fields that belong to the other operation mode")
            }
            Self::GroupNotFound { .. } => Some("List groups with `bulk-analysis groups list`"),
            Self::ConfigError { .. } => Some("Check config.toml syntax"),
            Self::NoInputsResolved { .. } => {
                Some("Select at least one converted document or directory for the group")
            }
            Self::ModeMismatch { .. } => {
                Some("Run per-document groups as map and combined groups as reduce")
            }
            Self::MissingRequiredPlaceholders { .. } => {
                Some("Add the missing {placeholder} tokens to the prompt template")
            }
            Self::PromptNotFound { .. } => Some("Check the prompt path is relative to the project"),
            Self::ProviderNotConfigured { .. } => {
                Some("Use one of the supported providers: anthropic, openai, mock")
            }
            Self::ProviderApiError { .. } => Some("Retry the pending items; check provider status"),
            Self::MissingApiKey { .. } => {
                Some("Set ANTHROPIC_API_KEY or OPENAI_API_KEY, or add it to config.toml")
            }
            Self::InvalidConfig { .. } => Some("Fix the value in config.toml"),
            Self::AlreadyRunning { .. } => Some("Wait for the active run to finish or cancel it"),
            Self::ItemFailed { .. } => Some("Re-run with pending scope to retry failed items"),
            Self::RunFailed { .. } => Some("Check the group's output directory is writable"),
            Self::WorkerLost { .. } => Some("Check the logs for a panic in the run worker"),
            Self::IoError(_) => Some("Check file path and permissions"),
            Self::JsonError(_) => Some("Check the JSON document structure"),
            Self::YamlError(_) => Some("Check the front matter structure"),
        }
    }
}

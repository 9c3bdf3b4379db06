//! Engine configuration
//!
//! API keys, endpoint overrides, run tuning and corpus filters.
//! Stored in `<config_dir>/bulk-analysis/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`ANTHROPIC_API_KEY`, `OPENAI_API_KEY`)
//! 2. Config file
//! 3. Defaults

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::corpus::{FsCorpusIndex, DEFAULT_EXTENSIONS};
use crate::error::{AnalysisError, Result};
use crate::provider::{AnthropicProvider, MockProvider, OpenAIProvider, Provider, ProviderResolver};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub api_keys: ApiKeys,

    #[serde(default)]
    pub endpoints: Endpoints,

    #[serde(default)]
    pub run: RunSettings,

    #[serde(default)]
    pub corpus: CorpusSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApiKeys {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
}

/// Base URL overrides (proxies, gateways)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Endpoints {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
}

/// Per-call tuning shared by every run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunSettings {
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens per call
    pub max_output_tokens: u32,
    /// Tokens kept free in the context window for the response
    pub output_reserve_tokens: u32,
    /// Tokens repeated between consecutive chunks
    pub chunk_overlap_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            temperature: Some(0.1),
            max_output_tokens: 8_000,
            output_reserve_tokens: 8_000,
            chunk_overlap_tokens: 500,
            request_timeout_secs: 300,
        }
    }
}

impl RunSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorpusSettings {
    pub allowed_extensions: Vec<String>,
    /// Glob patterns over corpus-relative paths
    pub exclude: Vec<String>,
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self {
            allowed_extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            exclude: Vec::new(),
        }
    }
}

impl CorpusSettings {
    /// Corpus index rooted at `root` with these filters
    pub fn index(&self, root: impl Into<PathBuf>) -> Result<FsCorpusIndex> {
        FsCorpusIndex::new(root)
            .with_extensions(&self.allowed_extensions)
            .with_excludes(&self.exclude)
    }
}

impl EngineConfig {
    /// `~/.config/bulk-analysis/` on Linux, `%APPDATA%/bulk-analysis/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bulk-analysis")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Defaults when the file is absent; error when it is malformed
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| AnalysisError::ConfigError {
            reason: format!("Failed to read config file: {}", e),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| AnalysisError::ConfigError {
            reason: format!("Failed to parse config file: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| AnalysisError::ConfigError {
                reason: format!("Failed to create config directory: {}", e),
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| AnalysisError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| AnalysisError::ConfigError {
            reason: format!("Failed to write config file: {}", e),
        })
    }

    /// Merge environment variables; non-empty values win over the file
    pub fn with_env(mut self) -> Self {
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                self.api_keys.anthropic = Some(key);
            }
        }

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.api_keys.openai = Some(key);
            }
        }

        self
    }

    /// Reject endpoint overrides that are not http(s) URLs
    pub fn validate(&self) -> Result<()> {
        for (name, endpoint) in [
            ("anthropic", &self.endpoints.anthropic),
            ("openai", &self.endpoints.openai),
        ] {
            let Some(raw) = endpoint else { continue };
            let parsed = Url::parse(raw).map_err(|e| AnalysisError::InvalidConfig {
                message: format!("endpoints.{} '{}' is not a URL: {}", name, raw, e),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AnalysisError::InvalidConfig {
                    message: format!("endpoints.{} must use http or https", name),
                });
            }
        }
        if self.corpus.allowed_extensions.is_empty() {
            return Err(AnalysisError::InvalidConfig {
                message: "corpus.allowed_extensions must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn anthropic_key(&self) -> Option<&str> {
        self.api_keys.anthropic.as_deref().filter(|k| !k.is_empty())
    }

    pub fn openai_key(&self) -> Option<&str> {
        self.api_keys.openai.as_deref().filter(|k| !k.is_empty())
    }
}

impl ProviderResolver for EngineConfig {
    fn resolve(&self, provider_id: &str) -> Result<Arc<dyn Provider>> {
        let timeout = self.run.request_timeout();
        match provider_id.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => {
                let key = self
                    .anthropic_key()
                    .ok_or_else(|| AnalysisError::MissingApiKey {
                        provider: "anthropic".to_string(),
                    })?;
                let mut provider = AnthropicProvider::with_api_key(key).with_timeout(timeout)?;
                if let Some(ref base) = self.endpoints.anthropic {
                    provider = provider.with_base_url(base);
                }
                Ok(Arc::new(provider))
            }
            "openai" => {
                let key = self
                    .openai_key()
                    .ok_or_else(|| AnalysisError::MissingApiKey {
                        provider: "openai".to_string(),
                    })?;
                let mut provider = OpenAIProvider::with_api_key(key).with_timeout(timeout)?;
                if let Some(ref base) = self.endpoints.openai {
                    provider = provider.with_base_url(base);
                }
                Ok(Arc::new(provider))
            }
            "mock" => Ok(Arc::new(MockProvider::new())),
            other => Err(AnalysisError::ProviderNotConfigured {
                provider: other.to_string(),
            }),
        }
    }
}

/// Mask an API key for display, e.g. "sk-ant-api03-***"
///
/// Keys no longer than the visible prefix are hidden entirely.
pub fn mask_api_key(key: &str, visible_chars: usize) -> String {
    if key.is_empty() {
        return String::new();
    }
    if key.chars().count() <= visible_chars {
        return "***".to_string();
    }

    let visible: String = key.chars().take(visible_chars).collect();
    format!("{}***", visible)
}

//! Configuration loading, validation, and management for Kiln.
//!
//! Loads configuration from `~/.kiln/config.toml` with environment variable
//! overrides. The loaded value is handed to each orchestration call; nothing
//! in the engine keeps a global "current model" or "current endpoint".

use kiln_core::{ProviderKind, RetryPolicy, SamplingOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.kiln/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Which backend to talk to
    #[serde(default)]
    pub backend: BackendConfig,

    /// Sampling defaults
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Retry policies per call class
    #[serde(default)]
    pub retry: RetryConfig,

    /// Context assembly caps
    #[serde(default)]
    pub context: ContextConfig,
}

/// The class of work a call performs. Each class has its own retry policy
/// and project-file budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallClass {
    Chat,
    Generation,
    Analysis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,

    /// Base URL; the provider's paths are appended to it
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Selected model. Unset until the user picks one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_provider() -> ProviderKind {
    ProviderKind::Ndjson
}
fn default_endpoint() -> String {
    ProviderKind::Ndjson.default_endpoint().into()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            endpoint: default_endpoint(),
            model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.2
}
fn default_top_p() -> f32 {
    0.9
}
fn default_max_tokens() -> u32 {
    2048
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl SamplingConfig {
    pub fn options(&self) -> SamplingOptions {
        SamplingOptions {
            temperature: Some(self.temperature),
            top_p: Some(self.top_p),
            max_tokens: Some(self.max_tokens),
        }
    }
}

/// One retry policy as written in TOML (durations in milliseconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    pub timeout_ms: u64,
}

impl From<RetryPolicy> for RetryPolicyConfig {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            factor: policy.factor,
            timeout_ms: policy.timeout.as_millis() as u64,
        }
    }
}

impl RetryPolicyConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            self.factor,
            Duration::from_millis(self.timeout_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_chat_retry")]
    pub chat: RetryPolicyConfig,

    #[serde(default = "default_generation_retry")]
    pub generation: RetryPolicyConfig,

    #[serde(default = "default_analysis_retry")]
    pub analysis: RetryPolicyConfig,
}

fn default_chat_retry() -> RetryPolicyConfig {
    RetryPolicy::chat().into()
}
fn default_generation_retry() -> RetryPolicyConfig {
    RetryPolicy::generation().into()
}
fn default_analysis_retry() -> RetryPolicyConfig {
    RetryPolicy::analysis().into()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            chat: default_chat_retry(),
            generation: default_generation_retry(),
            analysis: default_analysis_retry(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Project files included in an interactive chat preamble
    #[serde(default = "default_chat_max_files")]
    pub chat_max_files: usize,

    /// Project files included for one-shot generation and analysis
    #[serde(default = "default_generation_max_files")]
    pub generation_max_files: usize,

    /// Characters kept per project file before the ellipsis marker
    #[serde(default = "default_file_char_cap")]
    pub file_char_cap: usize,

    /// Characters kept per retrieved snippet
    #[serde(default = "default_snippet_char_cap")]
    pub snippet_char_cap: usize,

    /// Retrieved snippets included at most
    #[serde(default = "default_max_snippets")]
    pub max_snippets: usize,

    /// Symbol names listed per symbol kind in the summary fallback
    #[serde(default = "default_symbol_names_per_kind")]
    pub symbol_names_per_kind: usize,
}

fn default_chat_max_files() -> usize {
    5
}
fn default_generation_max_files() -> usize {
    10
}
fn default_file_char_cap() -> usize {
    2000
}
fn default_snippet_char_cap() -> usize {
    800
}
fn default_max_snippets() -> usize {
    8
}
fn default_symbol_names_per_kind() -> usize {
    10
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            chat_max_files: default_chat_max_files(),
            generation_max_files: default_generation_max_files(),
            file_char_cap: default_file_char_cap(),
            snippet_char_cap: default_snippet_char_cap(),
            max_snippets: default_max_snippets(),
            symbol_names_per_kind: default_symbol_names_per_kind(),
        }
    }
}

impl ContextConfig {
    /// How many project files a call class may include.
    pub fn max_files(&self, class: CallClass) -> usize {
        match class {
            CallClass::Chat => self.chat_max_files,
            CallClass::Generation | CallClass::Analysis => self.generation_max_files,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default path (~/.kiln/config.toml).
    ///
    /// Environment variables override the file:
    /// - `KILN_PROVIDER` (`ndjson` / `ollama` / `openai`)
    /// - `KILN_ENDPOINT`
    /// - `KILN_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(
            std::env::var("KILN_PROVIDER").ok(),
            std::env::var("KILN_ENDPOINT").ok(),
            std::env::var("KILN_MODEL").ok(),
        )
    }

    fn apply_overrides(
        &mut self,
        provider: Option<String>,
        endpoint: Option<String>,
        model: Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(provider) = provider {
            self.backend.provider = provider.parse().map_err(ConfigError::ValidationError)?;
        }
        if let Some(endpoint) = endpoint {
            self.backend.endpoint = endpoint;
        }
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            self.backend.model = Some(model);
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".kiln")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backend.endpoint must not be empty".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.sampling.temperature) {
            return Err(ConfigError::ValidationError(
                "sampling.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.sampling.top_p) {
            return Err(ConfigError::ValidationError(
                "sampling.top_p must be between 0.0 and 1.0".into(),
            ));
        }

        for (name, retry) in [
            ("chat", &self.retry.chat),
            ("generation", &self.retry.generation),
            ("analysis", &self.retry.analysis),
        ] {
            if !retry.factor.is_finite() || retry.factor < 1.0 {
                return Err(ConfigError::ValidationError(format!(
                    "retry.{name}.factor must be a finite number >= 1.0"
                )));
            }
            if retry.timeout_ms == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "retry.{name}.timeout_ms must be > 0"
                )));
            }
        }

        Ok(())
    }

    /// The retry policy for a call class.
    pub fn retry_policy(&self, class: CallClass) -> RetryPolicy {
        match class {
            CallClass::Chat => self.retry.chat.policy(),
            CallClass::Generation => self.retry.generation.policy(),
            CallClass::Analysis => self.retry.analysis.policy(),
        }
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            sampling: SamplingConfig::default(),
            retry: RetryConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

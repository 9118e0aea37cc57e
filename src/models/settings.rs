//! Settings Models
//!
//! Application configuration stored in config.json.

use serde::{Deserialize, Serialize};

use marginalia_llm::{ProviderConfig, ProviderType, DEFAULT_TEMPERATURE};

/// Environment variable that overrides the configured API key
pub const API_KEY_ENV: &str = "MARGINALIA_API_KEY";

const REASONING_EFFORTS: &[&str] = &["low", "medium", "high"];

/// Application configuration stored in config.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model backend
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Analysis loop tuning
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    /// What is written to the local database
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Tuning for the tool-calling loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Maximum model calls per `analyze()`
    pub max_iterations: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Patches with fewer content lines than this are skipped
    pub min_patch_lines: usize,
    /// Reasoning effort hint for models that support one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            temperature: DEFAULT_TEMPERATURE,
            min_patch_lines: 1,
            reasoning_effort: None,
        }
    }
}

/// Persistence feature flags. Both default off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Save each document's conversation after every successful turn
    pub conversations: bool,
    /// Save checkpoints
    pub checkpoints: bool,
}

impl PersistenceConfig {
    /// Whether anything needs the database
    pub fn any(&self) -> bool {
        self.conversations || self.checkpoints
    }
}

impl AppConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.provider.model.trim().is_empty() {
            return Err("provider.model must not be empty".to_string());
        }

        if self.provider.max_tokens == 0 {
            return Err("provider.max_tokens must be greater than 0".to_string());
        }

        if self.analyzer.max_iterations == 0 || self.analyzer.max_iterations > 50 {
            return Err(format!(
                "analyzer.max_iterations must be between 1 and 50, got {}",
                self.analyzer.max_iterations
            ));
        }

        if !(0.0..=2.0).contains(&self.analyzer.temperature) {
            return Err(format!(
                "analyzer.temperature must be between 0 and 2, got {}",
                self.analyzer.temperature
            ));
        }

        if let Some(effort) = &self.analyzer.reasoning_effort {
            if !REASONING_EFFORTS.contains(&effort.as_str()) {
                return Err(format!(
                    "Invalid reasoning_effort: {}. Must be 'low', 'medium', or 'high'",
                    effort
                ));
            }
        }

        Ok(())
    }

    /// Apply environment overrides (currently only the API key)
    pub fn apply_env(&mut self) {
        self.apply_api_key_override(std::env::var(API_KEY_ENV).ok());
    }

    fn apply_api_key_override(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.provider.api_key = Some(key);
        }
    }

    /// Whether the configured provider can be called as-is
    pub fn has_credentials(&self) -> bool {
        self.provider.provider == ProviderType::Ollama
            || self
                .provider
                .api_key
                .as_deref()
                .map(|k| !k.is_empty())
                .unwrap_or(false)
    }
}

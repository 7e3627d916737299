use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecsmithError};

/// Top-level specsmith configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub editor: EditorConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "anthropic".to_string() }
fn default_max_tokens() -> u32 { 8192 }
fn default_temperature() -> f32 { 0.0 }

/// Transport-level retry configuration for oracle requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Edit cycle policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Oracle attempts per edit cycle, counting the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Per-call oracle timeout. A timeout consumes one attempt.
    #[serde(default = "default_oracle_timeout")]
    pub oracle_timeout_secs: u64,
    /// Request rewrite used when re-prompting after a rejected patch.
    /// Placeholders: `{request}`, `{attempt}`, `{violation}`.
    #[serde(default = "default_feedback_template")]
    pub feedback_template: String,
    /// Let the oracle answer with clarifying questions instead of a patch.
    #[serde(default = "default_allow_clarification")]
    pub allow_clarification: bool,
    /// Upper bound on block schemas embedded in one prompt.
    #[serde(default = "default_max_prompt_blocks")]
    pub max_prompt_blocks: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            oracle_timeout_secs: default_oracle_timeout(),
            feedback_template: default_feedback_template(),
            allow_clarification: default_allow_clarification(),
            max_prompt_blocks: default_max_prompt_blocks(),
        }
    }
}

fn default_max_attempts() -> u32 { 3 }
fn default_oracle_timeout() -> u64 { 120 }
fn default_allow_clarification() -> bool { true }
fn default_max_prompt_blocks() -> usize { 40 }

pub fn default_feedback_template() -> String {
    "{request}\n\n**Rejected by validation on attempt {attempt}:**\n{violation}\n\n\
     Generate a new patch that avoids this error."
        .to_string()
}

/// Block catalog source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Local catalog file. When set, the remote API is not used.
    #[serde(default)]
    pub path: Option<String>,
    /// Remote blocks endpoint.
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    /// Cache entries older than this are stale.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
    /// Interval for background refresh of a shared catalog handle.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Last-resort catalog file used when both the API and the cache fail.
    #[serde(default)]
    pub fallback_path: Option<String>,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: None,
            api_url: None,
            api_key: None,
            cache_dir: default_cache_dir(),
            max_age_hours: default_max_age_hours(),
            refresh_interval_secs: default_refresh_interval(),
            fallback_path: None,
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

fn default_cache_dir() -> String { "~/.specsmith/cache".to_string() }
fn default_max_age_hours() -> u64 { 24 }
fn default_refresh_interval() -> u64 { 3600 }
fn default_fetch_timeout() -> u64 { 120 }

impl CatalogConfig {
    /// Resolve the cache directory (expand ~).
    pub fn cache_dir(&self) -> PathBuf {
        expand_home(&self.cache_dir)
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| SpecsmithError::ConfigNotFound(path.display().to_string()))?;

        Self::from_toml_str(&content)
    }

    /// Parse config text, expanding `${ENV_VAR}` references first.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| SpecsmithError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.editor.max_attempts == 0 {
            return Err(SpecsmithError::Config(
                "editor.max_attempts must be at least 1".into(),
            ));
        }
        if self.editor.oracle_timeout_secs == 0 {
            return Err(SpecsmithError::Config(
                "editor.oracle_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

//! Engine configuration: a layered, serde-deserializable config with a
//! local-file / user-config-dir / defaults fallback chain, the same
//! pattern the rest of this codebase uses for its component configs.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Root engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ordered provider cascade; position 0 is tried first unless a call
    /// names a `preferred_provider` (spec §4.2).
    pub providers: Vec<ProviderConfig>,

    /// Per-queue concurrency overrides, keyed by queue name.
    #[serde(rename = "queue-overrides")]
    pub queue_overrides: HashMap<String, usize>,

    /// Per-tier timeout overrides in milliseconds, keyed by `micro`/`meso`/`meta`.
    #[serde(rename = "tier-timeout-overrides-ms")]
    pub tier_timeout_overrides_ms: HashMap<String, u64>,

    /// When all configured providers fail, fall back to the deterministic
    /// sandbox provider instead of returning `ERR_NO_PROVIDER` (spec §4.2).
    #[serde(rename = "sandbox-fallback")]
    pub sandbox_fallback: bool,

    pub convergence: ConvergenceConfig,

    /// SQLite file path backing the Persistence Store.
    #[serde(rename = "store-path")]
    pub store_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            providers: vec![ProviderConfig::default()],
            queue_overrides: HashMap::new(),
            tier_timeout_overrides_ms: HashMap::new(),
            sandbox_fallback: true,
            convergence: ConvergenceConfig::default(),
            store_path: PathBuf::from(".rmri/store"),
        }
    }
}

impl EngineConfig {
    /// Load with fallback chain: explicit path, then `./rmri.yml`, then
    /// `$XDG_CONFIG_HOME/rmri/rmri.yml`, then hardcoded defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from("rmri.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!(error = %e, path = %local_config.display(), "failed to load local config"),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("rmri").join("rmri.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => tracing::warn!(error = %e, path = %user_config.display(), "failed to load user config"),
                }
            }
        }

        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("failed to parse config file")?;
        tracing::info!(path = %path.as_ref().display(), "loaded config");
        Ok(config)
    }

    pub fn tier_timeout_ms(&self, tier: &str, default_ms: u64) -> u64 {
        self.tier_timeout_overrides_ms.get(tier).copied().unwrap_or(default_ms)
    }

    pub fn queue_concurrency(&self, queue: &str, default_concurrency: usize) -> usize {
        self.queue_overrides.get(queue).copied().unwrap_or(default_concurrency)
    }
}

/// One entry in the provider cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// `"anthropic"`, `"openai"`, or `"sandbox"`.
    pub provider: String,

    pub model: String,

    /// Environment variable holding the API key. Ignored for `sandbox`.
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    #[serde(rename = "base-url")]
    pub base_url: String,

    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Advertised context window, used for the pre-dispatch budget check.
    #[serde(rename = "context-window")]
    pub context_window: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            timeout_ms: 60_000,
            max_tokens: 8192,
            context_window: 200_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Default `convergence_threshold` applied when a run omits it.
    #[serde(rename = "default-threshold")]
    pub default_threshold: f64,

    /// Number of top-ranked gaps compared across iterations (spec §4.5).
    #[serde(rename = "top-n")]
    pub top_n: usize,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            default_threshold: 0.6,
            top_n: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_one_provider_and_sandbox_fallback() {
        let config = EngineConfig::default();
        assert_eq!(config.providers.len(), 1);
        assert!(config.sandbox_fallback);
        assert_eq!(config.convergence.top_n, 10);
    }

    #[test]
    fn deserializes_partial_yaml_with_defaults() {
        let yaml = r#"
providers:
  - provider: anthropic
    model: claude-opus-4
    api-key-env: MY_KEY
    base-url: https://api.example.com
    timeout-ms: 30000
    max-tokens: 4096
    context-window: 100000
sandbox-fallback: false
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.providers[0].model, "claude-opus-4");
        assert!(!config.sandbox_fallback);
        assert_eq!(config.convergence.default_threshold, 0.6);
    }

    #[test]
    fn tier_timeout_falls_back_to_default() {
        let config = EngineConfig::default();
        assert_eq!(config.tier_timeout_ms("micro", 30_000), 30_000);
    }
}

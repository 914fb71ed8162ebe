use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::DeepSearchError;
use crate::executor::ProviderFailurePolicy;
use crate::facets::FacetOptions;
use crate::heuristics::HeuristicOverrides;
use crate::state::Budget;

const DEFAULT_CONFIG_PATH: &str = "deepsearch.toml";
const CONFIG_PATH_ENV: &str = "DEEPSEARCH_CONFIG";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default, rename = "loop")]
    pub loop_settings: LoopConfig,
    #[serde(default)]
    pub facets: FacetOptions,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub heuristics: HeuristicOverrides,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `DEEPSEARCH_CONFIG` environment variable.
    /// 3. `deepsearch.toml` in the current working directory.
    pub fn load(path: Option<PathBuf>) -> Result<Config, DeepSearchError> {
        let candidate = resolve_path(path);
        let raw = fs::read_to_string(&candidate)
            .map_err(|err| DeepSearchError::config_io(candidate.clone(), err))?;
        Self::from_toml(&raw)
    }

    /// Like [`ConfigLoader::load`], but a missing file yields defaults.
    pub fn load_or_default(path: Option<PathBuf>) -> Result<Config, DeepSearchError> {
        let candidate = resolve_path(path);
        if !candidate.exists() {
            tracing::debug!(path = %candidate.display(), "no config file found; using defaults");
            return Ok(Config::default());
        }
        Self::load(Some(candidate))
    }

    pub fn from_toml(raw: &str) -> Result<Config, DeepSearchError> {
        let config: Config = toml::from_str(raw)
            .map_err(|err| DeepSearchError::InvalidConfiguration(err.to_string()))?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), DeepSearchError> {
        if config.budget.time_ms == 0 {
            return Err(DeepSearchError::InvalidConfiguration(
                "budget.time_ms must be greater than zero".into(),
            ));
        }
        if config.loop_settings.max_iterations == 0 {
            return Err(DeepSearchError::InvalidConfiguration(
                "loop.max_iterations must be greater than zero".into(),
            ));
        }
        if config.facets.model.trim().is_empty() {
            return Err(DeepSearchError::InvalidConfiguration(
                "facets.model must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = path {
        return path;
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return PathBuf::from(from_env);
        }
    }

    Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "BudgetConfig::default_searches")]
    pub searches: u32,
    #[serde(default = "BudgetConfig::default_fetches")]
    pub fetches: u32,
    #[serde(default = "BudgetConfig::default_time_ms")]
    pub time_ms: u64,
}

impl BudgetConfig {
    const fn default_searches() -> u32 {
        4
    }

    const fn default_fetches() -> u32 {
        6
    }

    const fn default_time_ms() -> u64 {
        45_000
    }

    pub fn to_budget(&self) -> Budget {
        Budget {
            searches: self.searches,
            fetches: self.fetches,
            time_ms: self.time_ms,
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            searches: Self::default_searches(),
            fetches: Self::default_fetches(),
            time_ms: Self::default_time_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "LoopConfig::default_max_iterations")]
    pub max_iterations: u16,
    #[serde(default)]
    pub provider_failures: ProviderFailurePolicy,
    #[serde(default = "LoopConfig::default_freshness_boost")]
    pub freshness_boost: bool,
}

impl LoopConfig {
    const fn default_max_iterations() -> u16 {
        24
    }

    const fn default_freshness_boost() -> bool {
        true
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: Self::default_max_iterations(),
            provider_failures: ProviderFailurePolicy::default(),
            freshness_boost: Self::default_freshness_boost(),
        }
    }
}

/// Labels recorded with tracked RERANK calls; the reranker itself is injected.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RerankConfig {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_full_config() {
        let config = ConfigLoader::from_toml(
            r#"
            [budget]
            searches = 3
            fetches = 2
            time_ms = 10000

            [loop]
            max_iterations = 8
            provider_failures = "propagate"

            [facets]
            provider = "anthropic"
            model = "claude-haiku"

            [rerank]
            provider = "cohere"
            model = "rerank-v3"

            [heuristics]
            stop_words = ["please"]
            url_denylist = ["/amp/"]

            [heuristics.synonyms]
            share = ["slice"]

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.budget.to_budget(),
            Budget {
                searches: 3,
                fetches: 2,
                time_ms: 10_000
            }
        );
        assert_eq!(config.loop_settings.max_iterations, 8);
        assert_eq!(
            config.loop_settings.provider_failures,
            ProviderFailurePolicy::Propagate
        );
        assert!(config.loop_settings.freshness_boost);
        assert_eq!(config.facets.provider, "anthropic");
        assert_eq!(config.facets.max_tokens, 300);
        assert_eq!(config.heuristics.synonyms["share"], vec!["slice".to_string()]);
        assert_eq!(config.rerank.model.as_deref(), Some("rerank-v3"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = ConfigLoader::from_toml("").unwrap();
        assert_eq!(config.budget.to_budget(), Budget::default());
        assert_eq!(config.loop_settings.max_iterations, 24);
        assert!(config.rerank.model.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn rejects_zero_time_budget() {
        let err = ConfigLoader::from_toml("[budget]\ntime_ms = 0\n").unwrap_err();
        assert!(matches!(err, DeepSearchError::InvalidConfiguration(_)));
    }

    #[test]
    fn loads_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deepsearch.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[budget]\nsearches = 1").unwrap();

        let config = ConfigLoader::load(Some(path)).unwrap();
        assert_eq!(config.budget.searches, 1);
        assert_eq!(config.budget.fetches, 6);
    }

    #[test]
    fn missing_file_errors_or_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let err = ConfigLoader::load(Some(path.clone())).unwrap_err();
        assert!(matches!(err, DeepSearchError::ConfigIo { .. }));

        let config = ConfigLoader::load_or_default(Some(path)).unwrap();
        assert_eq!(config.budget.searches, 4);
    }
}

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use crate::core::batch::BatchSettings;
use crate::core::matcher::MatcherSettings;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub scoring: ScoringSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub matching: MatchingSettings,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub workers: Option<usize>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
        }
    }
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }

/// External scoring service
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_calls_per_user")]
    pub calls_per_user: u32,
    #[serde(default = "default_quota_window_secs")]
    pub quota_window_secs: u64,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            path: default_path(),
            api_key: String::new(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_ms: default_timeout_ms(),
            calls_per_user: default_calls_per_user(),
            quota_window_secs: default_quota_window_secs(),
        }
    }
}

fn default_endpoint() -> String { "https://api.openai.com".to_string() }
fn default_path() -> String { "/v1/chat/completions".to_string() }
fn default_model() -> String { "gpt-4o-mini".to_string() }
fn default_temperature() -> f32 { 0.2 }
fn default_timeout_ms() -> u64 { 12_000 }
fn default_calls_per_user() -> u32 { 20 }
fn default_quota_window_secs() -> u64 { 86_400 }

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Without a Redis URL the in-memory store is used
    pub redis_url: Option<String>,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_l1_cache_size")]
    pub l1_cache_size: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            ttl_secs: default_cache_ttl(),
            l1_cache_size: default_l1_cache_size(),
        }
    }
}

fn default_cache_ttl() -> u64 { 3_600 }
fn default_l1_cache_size() -> u64 { 10_000 }

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingSettings {
    #[serde(default = "default_substitution_penalty")]
    pub substitution_penalty: u8,
    #[serde(default = "default_failure_cooldown")]
    pub failure_cooldown_secs: u64,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            substitution_penalty: default_substitution_penalty(),
            failure_cooldown_secs: default_failure_cooldown(),
        }
    }
}

fn default_substitution_penalty() -> u8 { 5 }
fn default_failure_cooldown() -> u64 { 300 }

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_batch_concurrency(),
            delay_ms: default_batch_delay_ms(),
        }
    }
}

fn default_batch_concurrency() -> usize { 4 }
fn default_batch_delay_ms() -> u64 { 500 }

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingSettings {
    pub fn is_pretty(&self) -> bool {
        self.format.eq_ignore_ascii_case("pretty")
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the struct
    /// 2. Configuration file (config/default.toml)
    /// 3. Local overrides (config/local.toml)
    /// 4. Environment variables (prefixed with JOBMATCH_)
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // e.g., JOBMATCH__SERVER__PORT -> server.port
            .add_source(
                Environment::with_prefix("JOBMATCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings = substitute_env_vars(settings)?;

        settings.try_deserialize()
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("JOBMATCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    pub fn matcher_settings(&self) -> MatcherSettings {
        MatcherSettings {
            ai_timeout: Duration::from_millis(self.scoring.timeout_ms),
            cache_ttl_secs: self.cache.ttl_secs,
            substitution_penalty: self.matching.substitution_penalty,
        }
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            concurrency: self.batch.concurrency.max(1),
            delay: Duration::from_millis(self.batch.delay_ms),
        }
    }
}

/// Apply well-known environment variables that do not follow the
/// JOBMATCH__ naming scheme (API key, Redis URL, LOG_LEVEL, LOG_FORMAT)
fn substitute_env_vars(settings: Config) -> Result<Config, ConfigError> {
    use std::env;

    let api_key = env::var("SCORING_API_KEY")
        .or_else(|_| env::var("OPENAI_API_KEY"))
        .ok();
    let redis_url = env::var("REDIS_URL").ok();
    let log_level = env::var("LOG_LEVEL").ok();
    let log_format = env::var("LOG_FORMAT").ok();

    let mut builder = Config::builder().add_source(settings);

    if let Some(api_key) = api_key {
        builder = builder.set_override("scoring.api_key", api_key)?;
    }
    if let Some(redis_url) = redis_url {
        builder = builder.set_override("cache.redis_url", redis_url)?;
    }
    if let Some(log_level) = log_level {
        builder = builder.set_override("logging.level", log_level)?;
    }
    if let Some(log_format) = log_format {
        builder = builder.set_override("logging.format", log_format)?;
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scoring() {
        let scoring = ScoringSettings::default();
        assert_eq!(scoring.timeout_ms, 12_000);
        assert_eq!(scoring.path, "/v1/chat/completions");
        assert!(scoring.api_key.is_empty());
    }

    #[test]
    fn test_default_logging() {
        let level = default_log_level();
        let format = default_log_format();
        assert_eq!(level, "info");
        assert_eq!(format, "json");
    }

    #[test]
    fn test_logging_section_overrides() {
        let settings: Settings = Config::builder()
            .set_override("logging.level", "jobmatch_engine=debug")
            .unwrap()
            .set_override("logging.format", "Pretty")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(settings.logging.level, "jobmatch_engine=debug");
        assert!(settings.logging.is_pretty());
        assert!(!settings.logging.is_json());
        assert!(LoggingSettings::default().is_json());
    }

    #[test]
    fn test_empty_source_uses_defaults() {
        let settings: Settings = Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(settings.server.port, 8080);
        assert!(settings.cache.redis_url.is_none());
        assert_eq!(settings.matcher_settings().ai_timeout, Duration::from_secs(12));
        assert_eq!(settings.batch_settings().concurrency, 4);
    }
}

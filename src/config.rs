//! Layered configuration: built-in defaults, an optional TOML file, then
//! `IP_SEARCH__*` environment variables, then command-line overrides.

use crate::client::HttpClientConfig;
use crate::resilience::{RetryConfig, RetryPolicy};
use crate::{Error, Result};
use ::config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Environment variable prefix, e.g. `IP_SEARCH__EPO__CONSUMER_KEY`
pub const ENV_PREFIX: &str = "IP_SEARCH";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub epo: EpoConfig,
    pub patents_view: PatentsViewConfig,
    pub trademark: TrademarkConfig,
    pub search: SearchConfig,
    pub cache: CacheConfig,
    pub retry: RetrySettings,
    pub logging: LoggingConfig,
}

/// European Patent Office OPS credentials and endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EpoConfig {
    pub enabled: bool,
    pub base_url: String,
    pub auth_url: String,
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    /// Upper bound of the `X-OPS-Range` header
    pub page_size: u32,
}

impl Default for EpoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://ops.epo.org/3.2".to_string(),
            auth_url: "https://ops.epo.org/3.2/auth/accesstoken".to_string(),
            consumer_key: None,
            consumer_secret: None,
            page_size: 25,
        }
    }
}

impl EpoConfig {
    /// Whether both halves of the OPS credential pair are present
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.consumer_key.as_deref().is_some_and(|k| !k.trim().is_empty())
            && self.consumer_secret.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// US PatentsView search API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatentsViewConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: Option<String>,
    pub page_size: u32,
}

impl Default for PatentsViewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://search.patentsview.org/api/v1/patent/".to_string(),
            api_key: None,
            page_size: 1000,
        }
    }
}

/// Trademark registry service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrademarkConfig {
    pub enabled: bool,
    pub base_url: String,
    pub page_size: u32,
}

impl Default for TrademarkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:8081/api/trademarks".to_string(),
            page_size: 50,
        }
    }
}

/// Fan-out limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Per-provider deadline, permit wait included
    pub provider_timeout_secs: u64,
    /// Size of the shared outbound worker pool
    pub max_concurrent_calls: usize,
    /// Deadline for a single HTTP request
    pub request_timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider_timeout_secs: 30,
            max_concurrent_calls: 8,
            request_timeout_secs: 30,
            user_agent: None,
        }
    }
}

impl SearchConfig {
    #[must_use]
    pub const fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// HTTP client settings for the registry adapters
    #[must_use]
    pub fn http_client(&self) -> HttpClientConfig {
        let defaults = HttpClientConfig::default();
        HttpClientConfig {
            timeout: Duration::from_secs(self.request_timeout_secs),
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            ..defaults
        }
    }
}

/// Capacity and time-to-live of one cache tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTierConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl CacheTierConfig {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Token tier: lifetime comes from each issued token, minus the margin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenCacheConfig {
    pub capacity: usize,
    pub safety_margin_secs: u64,
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            safety_margin_secs: 60,
        }
    }
}

impl TokenCacheConfig {
    #[must_use]
    pub const fn safety_margin(&self) -> Duration {
        Duration::from_secs(self.safety_margin_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub search: CacheTierConfig,
    pub detail: CacheTierConfig,
    pub token: TokenCacheConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search: CacheTierConfig {
                ttl_secs: 15 * 60,
                capacity: 5_000,
            },
            detail: CacheTierConfig {
                ttl_secs: 6 * 60 * 60,
                capacity: 10_000,
            },
            token: TokenCacheConfig::default(),
        }
    }
}

/// Retry settings for transient provider failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl RetrySettings {
    /// Retry policy for provider calls
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            ..RetryConfig::default()
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default directive when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Command-line overrides applied on top of every other layer
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub json_logs: bool,
    pub provider_timeout_secs: Option<u64>,
    pub max_concurrent_calls: Option<usize>,
}

impl Config {
    /// Default location: `<config dir>/ip-search/config.toml`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ip-search").join("config.toml"))
    }

    /// Load defaults, the default file if present, then the environment
    pub fn load() -> Result<Self> {
        let path = Self::default_path().filter(|p| p.exists());
        Self::load_layers(path.as_deref())
    }

    /// Load defaults, the given file (which must exist), then the environment
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::InvalidConfig {
                field: "config_file".to_string(),
                reason: format!("{} does not exist", path.display()),
            });
        }
        Self::load_layers(Some(path))
    }

    fn load_layers(path: Option<&Path>) -> Result<Self> {
        let defaults = ::config::Config::try_from(&Self::default())?;
        let mut builder = ::config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        let config: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides and re-validate
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<()> {
        if let Some(level) = &overrides.log_level {
            self.logging.level.clone_from(level);
        }
        if overrides.json_logs {
            self.logging.format = LogFormat::Json;
        }
        if let Some(secs) = overrides.provider_timeout_secs {
            self.search.provider_timeout_secs = secs;
        }
        if let Some(max) = overrides.max_concurrent_calls {
            self.search.max_concurrent_calls = max;
        }
        self.validate()
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        validate_url("epo.base_url", &self.epo.base_url)?;
        validate_url("epo.auth_url", &self.epo.auth_url)?;
        validate_url("patents_view.base_url", &self.patents_view.base_url)?;
        validate_url("trademark.base_url", &self.trademark.base_url)?;

        if self.search.provider_timeout_secs == 0 {
            return Err(invalid("search.provider_timeout_secs", "must be greater than zero"));
        }
        if self.search.max_concurrent_calls == 0 {
            return Err(invalid("search.max_concurrent_calls", "must be greater than zero"));
        }
        if self.search.request_timeout_secs == 0 {
            return Err(invalid("search.request_timeout_secs", "must be greater than zero"));
        }

        for (name, tier) in [("search", &self.cache.search), ("detail", &self.cache.detail)] {
            if tier.capacity == 0 {
                return Err(invalid(&format!("cache.{name}.capacity"), "must be greater than zero"));
            }
            if tier.ttl_secs == 0 {
                return Err(invalid(&format!("cache.{name}.ttl_secs"), "must be greater than zero"));
            }
        }
        if self.cache.token.capacity == 0 {
            return Err(invalid("cache.token.capacity", "must be greater than zero"));
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(invalid(
                "retry.initial_delay_ms",
                "cannot be greater than retry.max_delay_ms",
            ));
        }

        for (field, page_size) in [
            ("epo.page_size", self.epo.page_size),
            ("patents_view.page_size", self.patents_view.page_size),
            ("trademark.page_size", self.trademark.page_size),
        ] {
            if page_size == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }

        // Keys are optional, but half a credential pair is always a mistake
        if self.epo.consumer_key.is_some() != self.epo.consumer_secret.is_some() {
            return Err(invalid(
                "epo.consumer_secret",
                "consumer_key and consumer_secret must be set together",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> Error {
    Error::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_url(field: &str, raw: &str) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| invalid(field, &format!("invalid URL {raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(field, &format!("unsupported scheme {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.search.ttl(), Duration::from_secs(900));
        assert_eq!(config.cache.search.capacity, 5_000);
        assert_eq!(config.cache.detail.ttl(), Duration::from_secs(21_600));
        assert_eq!(config.cache.detail.capacity, 10_000);
        assert_eq!(config.cache.token.safety_margin(), Duration::from_secs(60));
        assert_eq!(config.search.max_concurrent_calls, 8);
        assert!(!config.epo.has_credentials());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[epo]
consumer_key = "key"
consumer_secret = "secret"

[search]
max_concurrent_calls = 2

[cache.search]
ttl_secs = 60
capacity = 10
"#
        )
        .unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert!(config.epo.has_credentials());
        assert_eq!(config.search.max_concurrent_calls, 2);
        assert_eq!(config.cache.search.capacity, 10);
        // untouched sections keep their defaults
        assert_eq!(config.cache.detail.capacity, 10_000);
        assert_eq!(config.search.provider_timeout_secs, 30);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = Config::load_from_file(Path::new("/nonexistent/ip-search.toml"));
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.search.max_concurrent_calls = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.detail.ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.trademark.base_url = "ftp://registry".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.epo.consumer_key = Some("key".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = Config::default();
        let overrides = ConfigOverrides {
            log_level: Some("debug".to_string()),
            json_logs: true,
            provider_timeout_secs: Some(5),
            max_concurrent_calls: None,
        };

        config.apply_overrides(&overrides).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.search.provider_timeout(), Duration::from_secs(5));

        let zero = ConfigOverrides {
            provider_timeout_secs: Some(0),
            ..ConfigOverrides::default()
        };
        assert!(config.apply_overrides(&zero).is_err());
    }
}

//! Closed configuration struct loaded once from the environment.
//!
//! `spec.md` §9: "Configuration is a closed, enumerated struct ... not an
//! open property bag; unknown keys are a boot-time error." `RouterSettings`
//! only reads the specific `ROUTER_*` variables named in `spec.md` §6;
//! anything else is simply not consulted (there is no generic config
//! object to pollute).

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub strategy: String,
    pub cache_bytes: u64,
    pub cache_ttl: Duration,
    pub max_concurrency: u32,
    pub log_level: LogLevel,
    pub allowed_keys: Vec<String>,
    pub config_dir: Option<String>,
    pub log_dir: Option<String>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            strategy: "balanced".to_string(),
            cache_bytes: 256 * 1024 * 1024,
            cache_ttl: Duration::from_secs(3600),
            max_concurrency: 64,
            log_level: LogLevel::Info,
            allowed_keys: Vec::new(),
            config_dir: None,
            log_dir: None,
        }
    }
}

impl RouterSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Ok(v) = std::env::var("ROUTER_STRATEGY") {
            settings.strategy = v;
        }

        if let Ok(v) = std::env::var("ROUTER_CACHE_BYTES") {
            settings.cache_bytes = v.parse().map_err(|_| ConfigError::InvalidValue {
                var: "ROUTER_CACHE_BYTES".to_string(),
                reason: "expected a non-negative integer".to_string(),
            })?;
        }

        if let Ok(v) = std::env::var("ROUTER_CACHE_TTL_SECONDS") {
            let secs: u64 = v.parse().map_err(|_| ConfigError::InvalidValue {
                var: "ROUTER_CACHE_TTL_SECONDS".to_string(),
                reason: "expected a non-negative integer".to_string(),
            })?;
            settings.cache_ttl = Duration::from_secs(secs);
        }

        if let Ok(v) = std::env::var("ROUTER_MAX_CONCURRENCY") {
            settings.max_concurrency = v.parse().map_err(|_| ConfigError::InvalidValue {
                var: "ROUTER_MAX_CONCURRENCY".to_string(),
                reason: "expected a positive integer".to_string(),
            })?;
        }

        if let Ok(v) = std::env::var("ROUTER_LOG_LEVEL") {
            settings.log_level = match v.to_lowercase().as_str() {
                "error" => LogLevel::Error,
                "warn" => LogLevel::Warn,
                "info" => LogLevel::Info,
                "debug" => LogLevel::Debug,
                other => {
                    return Err(ConfigError::InvalidValue {
                        var: "ROUTER_LOG_LEVEL".to_string(),
                        reason: format!("unknown level '{other}'"),
                    })
                }
            };
        }

        if let Ok(v) = std::env::var("ROUTER_ALLOWED_KEYS") {
            settings.allowed_keys = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }

        settings.config_dir = std::env::var("CONFIG").ok();
        settings.log_dir = std::env::var("LOG").ok();

        Ok(settings)
    }
}

pub const KNOWN_PROVIDER_TAGS: &[&str] =
    &["openai", "anthropic", "openrouter", "groq", "ollama", "generic"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let s = RouterSettings::default();
        assert_eq!(s.strategy, "balanced");
        assert_eq!(s.cache_bytes, 256 * 1024 * 1024);
        assert_eq!(s.cache_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn bad_log_level_is_a_config_error() {
        std::env::set_var("ROUTER_LOG_LEVEL", "very-loud");
        let result = RouterSettings::from_env();
        std::env::remove_var("ROUTER_LOG_LEVEL");
        assert!(result.is_err());
    }
}

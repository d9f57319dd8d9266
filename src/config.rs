//! Layered application configuration.
//!
//! Values resolve in order: built-in defaults, then an optional TOML file
//! named by `RELAYWIRE_CONFIG_FILE`, then `RELAYWIRE_`-prefixed environment
//! variables. Later layers win.

use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::handler::HttpExecuteConfig;
use crate::protocol::DEFAULT_MAX_MESSAGE_SIZE;
use crate::server::{ServerConfig, DEFAULT_MAX_CONCURRENT_REQUESTS};

/// Environment variable naming an optional TOML config file.
pub const CONFIG_FILE_ENV: &str = "RELAYWIRE_CONFIG_FILE";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "RELAYWIRE_";

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Resolved application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bind host for the proxy server.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Listen backlog.
    pub backlog: u32,
    /// Maximum inbound message size in bytes.
    pub max_message_size: u32,
    /// Per-connection concurrent request limit.
    pub max_concurrent_requests: usize,
    /// User-Agent for outbound HTTP fetches.
    pub user_agent: String,
    /// Outbound fetch timeout in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Maximum outbound fetch response body in bytes.
    pub max_body_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let http = HttpExecuteConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 9412,
            backlog: 128,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            user_agent: http.user_agent,
            fetch_timeout_ms: http.timeout.as_millis() as u64,
            max_body_bytes: http.max_body_bytes,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the optional config file, and the
    /// environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            figment = figment.merge(Toml::file(path));
        }
        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid("max_message_size must be > 0".into()));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_requests must be > 0".into(),
            ));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    /// Server-side view of the configuration.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            backlog: self.backlog,
            max_message_size: self.max_message_size,
            max_concurrent_requests: self.max_concurrent_requests,
        }
    }

    /// HTTP execute handler view of the configuration.
    pub fn http_config(&self) -> HttpExecuteConfig {
        HttpExecuteConfig {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_millis(self.fetch_timeout_ms),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9412);
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        Jail::expect_with(|jail| {
            jail.set_env("RELAYWIRE_PORT", "7001");
            jail.set_env("RELAYWIRE_HOST", "127.0.0.1");
            let config = AppConfig::load().expect("load");
            assert_eq!(config.port, 7001);
            assert_eq!(config.host, "127.0.0.1");
            Ok(())
        });
    }

    #[test]
    fn test_config_file_layer() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "relaywire.toml",
                r#"
                port = 7002
                user_agent = "custom/1.0"
                "#,
            )?;
            jail.set_env("RELAYWIRE_CONFIG_FILE", "relaywire.toml");
            // Env still beats the file.
            jail.set_env("RELAYWIRE_PORT", "7003");
            let config = AppConfig::load().expect("load");
            assert_eq!(config.port, 7003);
            assert_eq!(config.user_agent, "custom/1.0");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = AppConfig {
            max_message_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_view_conversions() {
        let config = AppConfig::default();
        let server = config.server_config();
        assert_eq!(server.port, config.port);
        let http = config.http_config();
        assert_eq!(http.timeout, Duration::from_millis(config.fetch_timeout_ms));
    }
}

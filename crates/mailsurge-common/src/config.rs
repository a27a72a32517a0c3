//! Configuration for Mailsurge

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Campaign engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Campaign engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum campaigns running at the same time
    #[serde(default = "default_max_concurrent_campaigns")]
    pub max_concurrent_campaigns: usize,

    /// Default pause between sends within a campaign (seconds)
    #[serde(default = "default_delay_secs")]
    pub default_delay_secs: u64,

    /// How long a deactivated relay stays out of rotation (seconds)
    #[serde(default = "default_relay_cooldown_secs")]
    pub relay_cooldown_secs: u64,

    /// How long finished campaign records are kept (seconds)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Interval between garbage collection passes (seconds)
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,

    /// Grace period for draining executors on shutdown (seconds)
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Base URL for unsubscribe links
    #[serde(default = "default_unsubscribe_base_url")]
    pub unsubscribe_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_campaigns: default_max_concurrent_campaigns(),
            default_delay_secs: default_delay_secs(),
            relay_cooldown_secs: default_relay_cooldown_secs(),
            retention_secs: default_retention_secs(),
            gc_interval_secs: default_gc_interval_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            unsubscribe_base_url: default_unsubscribe_base_url(),
        }
    }
}

fn default_max_concurrent_campaigns() -> usize {
    3
}

fn default_delay_secs() -> u64 {
    5
}

fn default_relay_cooldown_secs() -> u64 {
    30 * 60
}

fn default_retention_secs() -> u64 {
    2 * 60 * 60
}

fn default_gc_interval_secs() -> u64 {
    60 * 60
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_unsubscribe_base_url() -> String {
    "https://mailsurge.example.com/unsubscribe".to_string()
}

/// Deployment environment, controls error-body verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,

    /// CORS allowed origins; empty means the built-in allow-list
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            cors_origins: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from the default locations, falling back to
    /// defaults, then apply environment overrides.
    pub fn load() -> crate::Result<Self> {
        let paths = [
            std::path::PathBuf::from("./config.toml"),
            std::path::PathBuf::from("/etc/mailsurge/config.toml"),
        ];

        let mut config = Config::default();
        for path in paths {
            if path.exists() {
                config = Self::from_file(&path)?;
                break;
            }
        }

        config.apply_env();
        Ok(config)
    }

    /// Apply `PORT`, `LOG_LEVEL`, and `APP_ENV` overrides
    pub fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(env) = std::env::var("APP_ENV") {
            self.api.environment = match env.as_str() {
                "development" | "dev" => Environment::Development,
                _ => Environment::Production,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.engine.max_concurrent_campaigns, 3);
        assert_eq!(config.engine.default_delay_secs, 5);
        assert_eq!(config.engine.relay_cooldown_secs, 1800);
        assert_eq!(config.engine.retention_secs, 7200);
        assert_eq!(config.api.environment, Environment::Production);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 8080

[engine]
max_concurrent_campaigns = 5
default_delay_secs = 2

[api]
environment = "development"
cors_origins = ["https://ops.example.com"]
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.engine.max_concurrent_campaigns, 5);
        assert_eq!(config.engine.default_delay_secs, 2);
        assert!(config.api.environment.is_development());
        assert_eq!(config.api.cors_origins.len(), 1);
    }
}

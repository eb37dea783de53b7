use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest WebSocket message accepted from a client
    pub max_frame_bytes: usize,
    /// How long shutdown waits for live sessions to go away
    pub shutdown_drain_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_frame_bytes: 64 * 1024,
            shutdown_drain_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL URL. Empty selects the in-memory store.
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 shared secret used by the identity service
    pub jwt_secret: String,
    /// Clock skew tolerated when checking `exp`
    pub leeway_seconds: u64,
    /// Lifetime of tokens minted by `issue-token`
    pub token_ttl_hours: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            leeway_seconds: 60,
            token_ttl_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Room a client lands in when `auth` carries no `roomId`
    pub default_room_id: i64,
    /// Frames queued per connection before it is treated as stalled
    pub outbound_buffer: usize,
    /// Maximum chat message length in characters
    pub max_message_len: usize,
    /// Default page size for chat history
    pub history_limit: i64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_room_id: 1,
            outbound_buffer: 256,
            max_message_len: 2000,
            history_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // PARLEY_SERVER__PORT, PARLEY_AUTH__JWT_SECRET, ...
        builder = builder.add_source(
            Environment::with_prefix("PARLEY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Collect every configuration problem instead of stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }
        if self.server.max_frame_bytes < 1024 {
            errors.push("server.max_frame_bytes must be at least 1024".to_string());
        }
        if self.auth.jwt_secret.trim().is_empty() {
            errors.push("auth.jwt_secret must be set (PARLEY_AUTH__JWT_SECRET)".to_string());
        }
        if self.auth.token_ttl_hours == 0 {
            errors.push("auth.token_ttl_hours must be non-zero".to_string());
        }
        if self.relay.outbound_buffer == 0 {
            errors.push("relay.outbound_buffer must be non-zero".to_string());
        }
        if self.relay.max_message_len == 0 {
            errors.push("relay.max_message_len must be non-zero".to_string());
        }
        if self.relay.history_limit <= 0 {
            errors.push("relay.history_limit must be positive".to_string());
        }
        if !self.database.url.is_empty()
            && self.database.min_connections > self.database.max_connections
        {
            errors.push(
                "database.min_connections must not exceed database.max_connections".to_string(),
            );
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    #[must_use]
    pub fn uses_database(&self) -> bool {
        !self.database.url.is_empty()
    }
}

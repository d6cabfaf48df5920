//! Application configuration
//!
//! Loaded from a TOML file. Every section falls back to its defaults, so a
//! partial file (or no file at all) is valid.
//!
//! ```toml
//! [server]
//! ws_port = 9000
//!
//! [commands.timeouts]
//! GetConfiguration = 5
//! Reset = 20
//!
//! [[accounts]]
//! id_tag = "04A2B3C4"
//! chargers = ["CP001"]
//! ```

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::{CommandTimeouts, EngineSettings, OutboundAction, TransactionPolicy};
use crate::domain::{Account, AccountStatus};

const APP_DIR: &str = "ocpp-csms";
const CONFIG_FILE: &str = "config.toml";
pub const CONFIG_ENV: &str = "OCPP_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// `OCPP_CONFIG` if set, else `<config_dir>/ocpp-csms/config.toml`.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(CONFIG_FILE)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub rate_limit: RateLimitConfig,
    pub commands: CommandsConfig,
    pub transactions: TransactionsConfig,
    pub triggers: TriggersConfig,
    pub session_log: SessionLogConfig,
    pub database: DatabaseConfig,
    pub metrics: MetricsConfig,
    pub accounts: Vec<AccountSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub ws_host: String,
    pub ws_port: u16,
    /// Seconds to wait for connections to drain on shutdown
    pub shutdown_timeout: u64,
    /// Seconds, returned to stations in BootNotification
    pub heartbeat_interval: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_host: "0.0.0.0".to_string(),
            ws_port: 9000,
            shutdown_timeout: 30,
            heartbeat_interval: 300,
        }
    }
}

impl ServerConfig {
    pub fn ws_address(&self) -> String {
        format!("{}:{}", self.ws_host, self.ws_port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "text" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_connections_per_ip: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_connections_per_ip: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub default_timeout_secs: u64,
    /// Action name → seconds
    pub timeouts: HashMap<String, u64>,
    /// How long terminal pending calls stay in memory
    pub retention_secs: u64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            timeouts: HashMap::from([(OutboundAction::GetConfiguration.as_str().to_string(), 5)]),
            retention_secs: 300,
        }
    }
}

impl CommandsConfig {
    pub fn command_timeouts(&self) -> CommandTimeouts {
        self.timeouts.iter().fold(
            CommandTimeouts::new(Duration::from_secs(self.default_timeout_secs)),
            |timeouts, (action, secs)| timeouts.with(action.clone(), Duration::from_secs(*secs)),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionsConfig {
    pub enforce_authorization: bool,
    /// Station serials exempt from credential checks
    pub free_charging: Vec<String>,
    pub broadcast_interval_secs: u64,
}

impl Default for TransactionsConfig {
    fn default() -> Self {
        Self {
            enforce_authorization: true,
            free_charging: Vec::new(),
            broadcast_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggersConfig {
    pub follow_up_ttl_secs: u64,
}

impl Default for TriggersConfig {
    fn default() -> Self {
        Self {
            follow_up_ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLogConfig {
    pub max_entries_per_stream: usize,
}

impl Default for SessionLogConfig {
    fn default() -> Self {
        Self {
            max_entries_per_stream: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// e.g. `sqlite://./ocpp.db?mode=rwc`
    pub url: String,
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./ocpp.db?mode=rwc".to_string(),
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    pub fn sqlite(path: &str) -> Self {
        Self {
            url: format!("sqlite://{}?mode=rwc", path),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:9100".to_string(),
        }
    }
}

/// Seed entry for the built-in account resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSeed {
    pub id_tag: String,
    #[serde(default = "default_account_status")]
    pub status: String,
    #[serde(default)]
    pub parent_id_tag: Option<String>,
    /// Allowed station serials; absent means any
    #[serde(default)]
    pub chargers: Option<Vec<String>>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_account_status() -> String {
    "Accepted".to_string()
}

impl From<&AccountSeed> for Account {
    fn from(seed: &AccountSeed) -> Self {
        Account {
            id_tag: seed.id_tag.clone(),
            parent_id_tag: seed.parent_id_tag.clone(),
            status: AccountStatus::from(seed.status.as_str()),
            expiry_date: seed.expiry,
            allowed_chargers: seed.chargers.clone(),
        }
    }
}

impl AppConfig {
    /// Read a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config = Self::from_toml(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.max_connections_per_ip == 0 {
            return Err(ConfigError::Invalid {
                field: "rate_limit.max_connections_per_ip",
                reason: "must be at least 1".into(),
            });
        }
        if self.commands.default_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "commands.default_timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        if let Some(unknown) = self
            .commands
            .timeouts
            .keys()
            .find(|action| action.parse::<OutboundAction>().is_err())
        {
            return Err(ConfigError::Invalid {
                field: "commands.timeouts",
                reason: format!("unknown action {}", unknown),
            });
        }
        if self.transactions.broadcast_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "transactions.broadcast_interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        if self.metrics.enabled {
            self.metrics_address()?;
        }
        Ok(())
    }

    pub fn metrics_address(&self) -> Result<SocketAddr, ConfigError> {
        self.metrics.listen.parse().map_err(|e| ConfigError::Invalid {
            field: "metrics.listen",
            reason: format!("{}", e),
        })
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.commands.retention_secs)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_connections_per_ip: self.rate_limit.max_connections_per_ip,
            heartbeat_interval: self.server.heartbeat_interval,
            command_timeouts: self.commands.command_timeouts(),
            follow_up_ttl: Duration::from_secs(self.triggers.follow_up_ttl_secs),
            broadcast_interval: Duration::from_secs(self.transactions.broadcast_interval_secs),
            transaction_policy: TransactionPolicy {
                enforce_authorization: self.transactions.enforce_authorization,
                free_charging: self
                    .transactions
                    .free_charging
                    .iter()
                    .cloned()
                    .collect::<HashSet<_>>(),
            },
            log_max_entries: self.session_log.max_entries_per_stream,
        }
    }

    pub fn seed_accounts(&self) -> Vec<Account> {
        self.accounts.iter().map(Account::from).collect()
    }
}

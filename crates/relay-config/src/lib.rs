use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

pub const MIN_TOKEN_LEN: usize = 8;
pub const MAX_TOKEN_LEN: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub registry: Registry,
    #[serde(default)]
    pub scheduler: Scheduler,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Auth {
    /// Bearer token required on every route but health. Open when unset.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default = "default_pending_timeout_ms")]
    pub pending_timeout_ms: u64,
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            pending_timeout_ms: default_pending_timeout_ms(),
            retention_ms: default_retention_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scheduler {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: default_log_format(),
        }
    }
}

fn default_pending_timeout_ms() -> u64 {
    120 * 1000
}

fn default_retention_ms() -> u64 {
    5 * 60 * 1000
}

fn default_tick_interval_ms() -> u64 {
    50
}

fn default_cleanup_interval_ms() -> u64 {
    60 * 1000
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Config with every optional section at its default.
    pub fn with_listen_addr(listen_addr: &str) -> Self {
        Self {
            server: Server {
                listen_addr: listen_addr.to_string(),
            },
            auth: Auth::default(),
            registry: Registry::default(),
            scheduler: Scheduler::default(),
            logging: Logging::default(),
        }
    }
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

pub fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.server.listen_addr.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "server.listen_addr is required".to_string(),
        ));
    }
    if let Some(token) = &cfg.auth.token {
        if token.len() < MIN_TOKEN_LEN || token.len() > MAX_TOKEN_LEN {
            return Err(ConfigError::UnsupportedConfig(format!(
                "auth.token must be {MIN_TOKEN_LEN}-{MAX_TOKEN_LEN} characters"
            )));
        }
    }
    if cfg.registry.pending_timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "registry.pending_timeout_ms must be >= 1".to_string(),
        ));
    }
    if cfg.registry.retention_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "registry.retention_ms must be >= 1".to_string(),
        ));
    }
    if cfg.scheduler.tick_interval_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "scheduler.tick_interval_ms must be >= 1".to_string(),
        ));
    }
    if cfg.scheduler.cleanup_interval_ms < cfg.scheduler.tick_interval_ms {
        return Err(ConfigError::UnsupportedConfig(
            "scheduler.cleanup_interval_ms must be >= scheduler.tick_interval_ms".to_string(),
        ));
    }
    // Expiry is only enforced once per tick.
    if cfg.scheduler.tick_interval_ms > cfg.registry.pending_timeout_ms {
        return Err(ConfigError::UnsupportedConfig(
            "scheduler.tick_interval_ms must not exceed registry.pending_timeout_ms".to_string(),
        ));
    }
    if cfg.logging.format != "text" && cfg.logging.format != "json" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "logging.format={} is not implemented; supported: text, json",
            cfg.logging.format
        )));
    }
    Ok(())
}

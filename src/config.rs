use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rkh: RkhConfig,
    #[serde(default)]
    pub pathways: PathwayConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Root key holder committee
#[derive(Debug, Clone, Deserialize)]
pub struct RkhConfig {
    /// Well-known address of the RKH multisig
    #[serde(default = "default_rkh_address")]
    pub address: String,
    /// Signatures required before an RKH approval completes
    #[serde(default = "default_approval_threshold")]
    pub approval_threshold: usize,
}

fn default_rkh_address() -> String {
    "f080".to_string()
}

fn default_approval_threshold() -> usize {
    2
}

impl Default for RkhConfig {
    fn default() -> Self {
        Self {
            address: default_rkh_address(),
            approval_threshold: default_approval_threshold(),
        }
    }
}

/// Meta-allocator contract addresses per pathway
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathwayConfig {
    #[serde(default)]
    pub mdma_address: String,
    #[serde(default)]
    pub orma_address: String,
    #[serde(default)]
    pub ama_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    #[serde(default)]
    pub enabled: bool,
    /// EVM JSON-RPC endpoint
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Endpoint used for foreign to native address translation
    #[serde(default)]
    pub address_rpc_url: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    /// Maximum history the RPC node serves, in blocks
    #[serde(default = "default_lookback_window")]
    pub lookback_window_blocks: u64,
    /// Safety margin kept inside the lookback window
    #[serde(default = "default_lookback_headroom")]
    pub lookback_headroom_blocks: u64,
    /// Contracts whose AllowanceChanged events are trusted
    #[serde(default)]
    pub valid_contract_addresses: Vec<String>,
}

fn default_rpc_url() -> String {
    "http://localhost:1234/rpc/v1".to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_lookback_window() -> u64 {
    2880
}

fn default_lookback_headroom() -> u64 {
    20
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rpc_url: default_rpc_url(),
            address_rpc_url: None,
            interval_secs: default_poll_interval_secs(),
            lookback_window_blocks: default_lookback_window(),
            lookback_headroom_blocks: default_lookback_headroom(),
            valid_contract_addresses: Vec::new(),
        }
    }
}

impl PollerConfig {
    /// Endpoint for address translation, falling back to the chain RPC
    pub fn address_rpc_url(&self) -> &str {
        self.address_rpc_url.as_deref().unwrap_or(&self.rpc_url)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_port() -> u16 {
    3001
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rotated log files; console only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            .set_default("rkh.address", default_rkh_address())?
            .set_default("rkh.approval_threshold", 2)?
            .set_default("poller.interval_secs", 60)?
            .set_default("api.port", 3001)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g. config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("GOVERNANCE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // GOVERNANCE_DATABASE__URL, GOVERNANCE_POLLER__RPC_URL, ...
            .add_source(
                Environment::with_prefix("GOVERNANCE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("poller.valid_contract_addresses")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.rkh.approval_threshold == 0 {
            errors.push("rkh.approval_threshold must be at least 1".to_string());
        }

        if self.poller.lookback_headroom_blocks >= self.poller.lookback_window_blocks {
            errors.push(
                "poller.lookback_headroom_blocks must be less than lookback_window_blocks"
                    .to_string(),
            );
        }

        if self.poller.enabled {
            if self.poller.valid_contract_addresses.is_empty() {
                errors.push(
                    "poller.valid_contract_addresses must not be empty when the poller is enabled"
                        .to_string(),
                );
            }
            if self.poller.interval_secs == 0 {
                errors.push("poller.interval_secs must be positive".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig {
            database: DatabaseConfig {
                url: "postgres://localhost/governance".to_string(),
                max_connections: 5,
            },
            rkh: RkhConfig::default(),
            pathways: PathwayConfig::default(),
            poller: PollerConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = config();
        assert_eq!(cfg.rkh.address, "f080");
        assert_eq!(cfg.rkh.approval_threshold, 2);
        assert_eq!(cfg.poller.lookback_window_blocks, 2880);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_enabled_poller_needs_allow_list() {
        let mut cfg = config();
        cfg.poller.enabled = true;
        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("valid_contract_addresses"));
    }

    #[test]
    fn test_headroom_must_fit_window() {
        let mut cfg = config();
        cfg.poller.lookback_headroom_blocks = cfg.poller.lookback_window_blocks;
        cfg.rkh.approval_threshold = 0;
        assert_eq!(cfg.validate().unwrap_err().len(), 2);
    }

    #[test]
    fn test_address_rpc_falls_back_to_chain_rpc() {
        let mut cfg = config();
        assert_eq!(cfg.poller.address_rpc_url(), cfg.poller.rpc_url);
        cfg.poller.address_rpc_url = Some("http://translator".into());
        assert_eq!(cfg.poller.address_rpc_url(), "http://translator");
    }
}

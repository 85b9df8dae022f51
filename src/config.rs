//! Configuration management for the wager engine
//!
//! Defaults, an optional TOML file, then `WAGER_*` environment overrides, then
//! validation. The binary layers its CLI flags on top of the loaded value.

use crate::errors::{ConfigError, WagerResult};
use serde::{Deserialize, Serialize};
use std::{env, path::Path, str::FromStr};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WagerConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub pool: PoolDefaults,
    pub entries: EntryConfig,
    pub rate_limit: RateLimitConfig,
    pub refunds: RefundConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Upper bound on waiting for a row lock
    pub lock_timeout_ms: u64,
    pub clear_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./wager_data".to_string(),
            lock_timeout_ms: 2_000,
            clear_on_start: false,
        }
    }
}

/// Parameters applied to pools created without explicit parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolDefaults {
    pub house_edge_bps: u16,
    pub min_reserve_bps: u16,
    pub max_win_pct_bps: u16,
    /// Balance a pool must hold before it accepts entries
    pub activation_threshold: u64,
}

impl Default for PoolDefaults {
    fn default() -> Self {
        Self {
            house_edge_bps: 500,
            min_reserve_bps: 2_000,
            max_win_pct_bps: 1_000,
            activation_threshold: 1_000_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryConfig {
    pub min_invoice_age_secs: u64,
    pub require_payable_at_entry: bool,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            min_invoice_age_secs: 300,
            require_payable_at_entry: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_entries: usize,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_entries: 5,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefundConfig {
    /// Bound on one send; must stay below `server.request_timeout_secs`
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub retry_interval_secs: u64,
    /// How long a claimed intent stays invisible to other workers
    pub lease_secs: u64,
    /// Opening treasury balances per currency, smallest unit
    pub treasury_balances: Vec<TreasuryBalance>,
    /// Hex ed25519 seed of the treasury signer. A fresh key is generated when unset.
    pub treasury_key_hex: Option<String>,
}

impl Default for RefundConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_attempts: 8,
            base_backoff_secs: 5,
            max_backoff_secs: 600,
            retry_interval_secs: 10,
            lease_secs: 60,
            treasury_balances: Vec::new(),
            treasury_key_hex: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreasuryBalance {
    pub currency: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Admin endpoints reject every request while this is unset
    pub secret: Option<String>,
}

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> WagerResult<WagerConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            WagerConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> WagerResult<WagerConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(&self, config: &mut WagerConfig) -> WagerResult<()> {
        if let Ok(host) = env::var("WAGER_HOST") {
            config.server.host = host;
        }
        if let Some(port) = parse_env("WAGER_PORT", "Invalid port number")? {
            config.server.port = port;
        }
        if let Ok(data_dir) = env::var("WAGER_DATA_DIR") {
            config.storage.data_dir = data_dir;
        }
        if let Some(timeout) = parse_env("WAGER_LOCK_TIMEOUT_MS", "Invalid timeout value")? {
            config.storage.lock_timeout_ms = timeout;
        }
        if let Some(threshold) = parse_env("WAGER_ACTIVATION_THRESHOLD", "Invalid amount")? {
            config.pool.activation_threshold = threshold;
        }
        if let Some(max) = parse_env("WAGER_RATE_LIMIT_MAX", "Invalid limit")? {
            config.rate_limit.max_entries = max;
        }
        if let Some(age) = parse_env("WAGER_MIN_INVOICE_AGE_SECS", "Invalid duration")? {
            config.entries.min_invoice_age_secs = age;
        }
        if let Ok(secret) = env::var("WAGER_ADMIN_SECRET") {
            if !secret.is_empty() {
                config.admin.secret = Some(secret);
            }
        }
        if let Ok(key) = env::var("WAGER_TREASURY_KEY") {
            if !key.is_empty() {
                config.refunds.treasury_key_hex = Some(key);
            }
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self, config: &WagerConfig) -> WagerResult<()> {
        if config.server.port == 0 {
            return Err(invalid("server.port", 0, "Port cannot be zero"));
        }

        if config.storage.data_dir.is_empty() {
            return Err(ConfigError::MissingRequired("storage.data_dir".to_string()).into());
        }

        if config.storage.lock_timeout_ms == 0 {
            return Err(invalid("storage.lock_timeout_ms", 0, "Lock timeout cannot be zero"));
        }

        let pool = &config.pool;
        if pool.house_edge_bps > crate::wager::types::MAX_HOUSE_EDGE_BPS {
            return Err(invalid("pool.house_edge_bps", pool.house_edge_bps, "House edge too high"));
        }
        if pool.min_reserve_bps > crate::wager::types::MAX_RESERVE_BPS {
            return Err(invalid("pool.min_reserve_bps", pool.min_reserve_bps, "Reserve percentage too high"));
        }
        if pool.max_win_pct_bps > crate::wager::types::MAX_WIN_PCT_BPS {
            return Err(invalid("pool.max_win_pct_bps", pool.max_win_pct_bps, "Max win percentage too high"));
        }

        if config.rate_limit.max_entries == 0 {
            return Err(invalid("rate_limit.max_entries", 0, "Limit cannot be zero"));
        }
        if config.rate_limit.window_secs == 0 {
            return Err(invalid("rate_limit.window_secs", 0, "Window cannot be zero"));
        }

        let refunds = &config.refunds;
        if refunds.timeout_secs == 0 {
            return Err(invalid("refunds.timeout_secs", 0, "Refund timeout cannot be zero"));
        }
        // the inline send must resolve before the request deadline drops the handler
        if refunds.timeout_secs >= config.server.request_timeout_secs {
            return Err(invalid(
                "refunds.timeout_secs",
                refunds.timeout_secs,
                "Refund timeout must be shorter than server.request_timeout_secs",
            ));
        }
        if refunds.max_attempts == 0 {
            return Err(invalid("refunds.max_attempts", 0, "At least one attempt is required"));
        }
        if refunds.base_backoff_secs > refunds.max_backoff_secs {
            return Err(invalid(
                "refunds.base_backoff_secs",
                refunds.base_backoff_secs,
                "Base backoff exceeds max backoff",
            ));
        }
        if refunds.retry_interval_secs == 0 {
            return Err(invalid("refunds.retry_interval_secs", 0, "Interval cannot be zero"));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &WagerConfig, path: &str) -> WagerResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env<T: FromStr>(name: &str, reason: &str) -> WagerResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw.parse().map(Some).map_err(|_| {
            ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw,
                reason: reason.to_string(),
            }
            .into()
        }),
        Err(_) => Ok(None),
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> crate::errors::WagerError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

//! Configuration types shared across crates.
//!
//! Configuration is layered with figment: built-in defaults, then an optional
//! TOML file, then `DEPOT_`-prefixed environment variables (`__` separates
//! nesting levels), then the flat transfer variables `CHUNK_SIZE`,
//! `MIN_OBJECT_SIZE`, `MAX_OBJECT_SIZE`, `MAX_RETRIES` and
//! `TRANSFER_TIMEOUT_MS`.

use crate::{Error, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Flat environment variables mapped onto `[transfer]`.
pub const TRANSFER_ENV_VARS: &[&str] = &[
    "CHUNK_SIZE",
    "MIN_OBJECT_SIZE",
    "MAX_OBJECT_SIZE",
    "MAX_RETRIES",
    "TRANSFER_TIMEOUT_MS",
];

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// In-memory cache for hot objects.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Provider name recorded for objects uploaded through the server.
    #[serde(default = "default_provider_name")]
    pub provider_name: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_provider_name() -> String {
    "local".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            cache: CacheConfig::default(),
            provider_name: default_provider_name(),
        }
    }
}

/// Object cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Total bytes held across all cached objects.
    #[serde(default = "default_cache_max_bytes")]
    pub max_bytes: u64,
    /// Objects larger than this are always streamed from storage.
    #[serde(default = "default_cache_max_object_bytes")]
    pub max_object_bytes: u64,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_max_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_cache_max_object_bytes() -> u64 {
    32 * 1024 * 1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_bytes: default_cache_max_bytes(),
            max_object_bytes: default_cache_max_object_bytes(),
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// Process-local memory storage (tests and ephemeral servers).
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                Err("filesystem storage requires a non-empty path".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Transfer and upload tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Pipeline chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Smallest accepted object in bytes.
    #[serde(default = "default_min_object_size")]
    pub min_object_size: u64,
    /// Largest accepted object in bytes.
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,
    /// Retries after the first transfer attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_transfer_timeout_ms")]
    pub transfer_timeout_ms: u64,
    #[serde(default = "default_negotiation_timeout_ms")]
    pub negotiation_timeout_ms: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Chunks buffered between the pipeline and a provider writer.
    #[serde(default = "default_channel_depth")]
    pub channel_depth: usize,
}

fn default_chunk_size() -> usize {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_min_object_size() -> u64 {
    crate::MIN_OBJECT_SIZE
}

fn default_max_object_size() -> u64 {
    crate::MAX_OBJECT_SIZE
}

fn default_max_retries() -> u32 {
    3
}

fn default_transfer_timeout_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_negotiation_timeout_ms() -> u64 {
    30_000
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_backoff_max_ms() -> u64 {
    8_000
}

fn default_channel_depth() -> usize {
    1
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            min_object_size: default_min_object_size(),
            max_object_size: default_max_object_size(),
            max_retries: default_max_retries(),
            transfer_timeout_ms: default_transfer_timeout_ms(),
            negotiation_timeout_ms: default_negotiation_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            channel_depth: default_channel_depth(),
        }
    }
}

impl TransferConfig {
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    /// Check an object size against the configured bounds.
    pub fn check_size(&self, size: u64) -> Result<()> {
        if size < self.min_object_size || size > self.max_object_size {
            return Err(Error::InvalidSize {
                size,
                min: self.min_object_size,
                max: self.max_object_size,
            });
        }
        Ok(())
    }

    /// Validate transfer configuration invariants.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.chunk_size == 0 {
            return Err("transfer.chunk_size must be greater than zero".to_string());
        }
        if self.min_object_size == 0 {
            return Err("transfer.min_object_size must be at least 1".to_string());
        }
        if self.min_object_size > self.max_object_size {
            return Err(format!(
                "transfer.min_object_size {} exceeds transfer.max_object_size {}",
                self.min_object_size, self.max_object_size
            ));
        }
        if self.channel_depth == 0 {
            return Err("transfer.channel_depth must be at least 1".to_string());
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(format!(
                "transfer.backoff_base_ms {} exceeds transfer.backoff_max_ms {}",
                self.backoff_base_ms, self.backoff_max_ms
            ));
        }
        Ok(())
    }
}

/// Payment readiness requirements and the static ledger view used when no
/// external ledger is wired in.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Token the storage fees are paid in.
    #[serde(default = "default_token")]
    pub token: String,
    /// Operator that must be approved to draw from the account.
    #[serde(default = "default_operator")]
    pub operator: String,
    #[serde(default = "default_min_amount")]
    pub min_balance: u128,
    #[serde(default = "default_min_amount")]
    pub min_rate_allowance: u128,
    #[serde(default = "default_min_amount")]
    pub min_lockup_allowance: u128,
    /// Static ledger: account balance.
    #[serde(default)]
    pub balance: u128,
    /// Static ledger: whether the operator is approved.
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub rate_allowance: u128,
    #[serde(default)]
    pub lockup_allowance: u128,
}

fn default_token() -> String {
    "USDFC".to_string()
}

fn default_operator() -> String {
    "warm-storage".to_string()
}

fn default_min_amount() -> u128 {
    1
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            token: default_token(),
            operator: default_operator(),
            min_balance: default_min_amount(),
            min_rate_allowance: default_min_amount(),
            min_lockup_allowance: default_min_amount(),
            balance: 0,
            approved: false,
            rate_allowance: 0,
            lockup_allowance: 0,
        }
    }
}

impl PaymentConfig {
    /// A funded, approved account. **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            balance: 1_000_000,
            approved: true,
            rate_allowance: 1_000_000,
            lockup_allowance: 1_000_000,
            ..Self::default()
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses in-memory storage and a funded payment
    /// account.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::Memory,
            transfer: TransferConfig::default(),
            payment: PaymentConfig::for_testing(),
        }
    }

    /// Build the layered figment for an optional config file.
    pub fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed("DEPOT_").ignore(&["CONFIG"]).split("__"))
            .merge(
                Env::raw()
                    .only(TRANSFER_ENV_VARS)
                    .map(|key| format!("transfer.{}", key.as_str().to_ascii_lowercase()).into()),
            )
    }

    /// Load and validate configuration.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config: AppConfig = Self::figment(config_path)
            .extract()
            .map_err(|e| Error::Serialization(e.to_string()))?;
        config.validate().map_err(Error::Serialization)?;
        Ok(config)
    }

    /// Validate all sections.
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.storage.validate()?;
        self.transfer.validate()?;
        if self.server.cache.max_object_bytes > self.server.cache.max_bytes {
            return Err(format!(
                "server.cache.max_object_bytes {} exceeds server.cache.max_bytes {}",
                self.server.cache.max_object_bytes, self.server.cache.max_bytes
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn transfer_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.min_object_size, 127);
        assert_eq!(config.max_object_size, 200 * 1024 * 1024);
        assert_eq!(config.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn transfer_deserialize_with_partial_fields() {
        let json = r#"{"chunk_size": 1024}"#;
        let config: TransferConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn check_size_bounds() {
        let config = TransferConfig::default();
        assert!(config.check_size(127).is_ok());
        assert!(config.check_size(200 * 1024 * 1024).is_ok());
        assert!(matches!(
            config.check_size(126),
            Err(Error::InvalidSize { size: 126, .. })
        ));
        assert!(config.check_size(200 * 1024 * 1024 + 1).is_err());
    }

    #[test]
    fn validate_rejects_inverted_bounds() {
        let config = TransferConfig {
            min_object_size: 10,
            max_object_size: 5,
            ..TransferConfig::default()
        };
        assert!(config.validate().is_err());

        let config = TransferConfig {
            chunk_size: 0,
            ..TransferConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn storage_config_memory_roundtrip() {
        let json = serde_json::to_string(&StorageConfig::Memory).unwrap();
        assert_eq!(json, r#"{"type":"memory"}"#);
        let decoded: StorageConfig = serde_json::from_str(&json).unwrap();
        assert!(matches!(decoded, StorageConfig::Memory));
    }

    #[test]
    fn figment_layers_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "depot.toml",
                r#"
                [server]
                bind = "0.0.0.0:9000"

                [transfer]
                chunk_size = 4096
                max_retries = 7
                "#,
            )?;
            jail.set_env("DEPOT_TRANSFER__MAX_RETRIES", "5");
            jail.set_env("CHUNK_SIZE", "8192");
            jail.set_env("MAX_OBJECT_SIZE", "1048576");

            let config = AppConfig::load(Some(Path::new("depot.toml")))
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config.server.bind, "0.0.0.0:9000");
            assert_eq!(config.transfer.chunk_size, 8192);
            assert_eq!(config.transfer.max_retries, 5);
            assert_eq!(config.transfer.max_object_size, 1_048_576);
            assert_eq!(config.transfer.min_object_size, 127);
            Ok(())
        });
    }

    #[test]
    fn figment_without_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = AppConfig::load(None).map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config.server.bind, "127.0.0.1:8080");
            assert!(matches!(config.storage, StorageConfig::Filesystem { .. }));
            Ok(())
        });
    }

    #[test]
    fn load_rejects_invalid_env_override() {
        Jail::expect_with(|jail| {
            jail.set_env("MIN_OBJECT_SIZE", "500");
            jail.set_env("MAX_OBJECT_SIZE", "100");
            assert!(AppConfig::load(None).is_err());
            Ok(())
        });
    }
}

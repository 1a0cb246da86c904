//! Distributor configuration
//!
//! Persisted as JSON through [`Settings`]. Validate once at startup with
//! [`DistributorConfig::validate`]; the resulting [`DecimalBridge`] is handed
//! to the aggregator so no unit mismatch can surface at call time.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use claimcraft_core::{DecimalBridge, DecimalError, LEDGER_DECIMALS, SETTLEMENT_DECIMALS};
use claimcraft_settlement::{SettlementConfig, SettlementMode, DEFAULT_PROGRAM_ID};

/// Lock key shared by every builder of one deployment (2^53 - 1).
pub const DEFAULT_BUILD_LOCK_KEY: i64 = 9_007_199_254_740_991;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings: {0}")]
    ReadError(String),
    #[error("Failed to write settings: {0}")]
    WriteError(String),
    #[error("Failed to parse settings: {0}")]
    ParseError(String),
    #[error("Failed to create directory: {0}")]
    CreateDirError(String),
    #[error("Invalid decimals: {0}")]
    InvalidDecimals(#[from] DecimalError),
    #[error("Invalid program id: {0}")]
    InvalidProgramId(String),
    #[error("Unknown commitment level: {0}")]
    UnknownCommitment(String),
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Settlement section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementSettings {
    pub mode: SettlementMode,
    pub rpc_url: String,
    /// Base58 program id of the claim program
    pub program_id: String,
    pub commitment: String,
    /// Base58 program id every claim transaction must reference
    pub claim_program_id: Option<String>,
    /// Admin keypair used by `commit-root` in live mode
    pub keypair_path: Option<PathBuf>,
}

impl Default for SettlementSettings {
    fn default() -> Self {
        let defaults = SettlementConfig::mock();
        Self {
            mode: defaults.mode,
            rpc_url: defaults.rpc_url,
            program_id: DEFAULT_PROGRAM_ID.to_string(),
            commitment: defaults.commitment,
            claim_program_id: None,
            keypair_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    pub ledger_decimals: u8,
    pub settlement_decimals: u8,
    /// Epoch store database. `None` keeps state in memory.
    pub database_path: Option<PathBuf>,
    /// Reward ledger database read by the aggregator
    pub ledger_path: Option<PathBuf>,
    pub build_lock_key: i64,
    /// A build lock older than this is treated as abandoned. 0 disables takeover.
    pub build_lock_ttl_secs: u64,
    /// Reward categories included in epoch builds. `None` includes all.
    pub default_categories: Option<Vec<String>>,
    pub reconcile_max_scan: u64,
    pub reconcile_max_gaps: u32,
    /// Check claim transactions against the chain before marking them claimed
    pub verify_claim_transactions: bool,
    pub settlement: SettlementSettings,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            ledger_decimals: LEDGER_DECIMALS,
            settlement_decimals: SETTLEMENT_DECIMALS,
            database_path: None,
            ledger_path: None,
            build_lock_key: DEFAULT_BUILD_LOCK_KEY,
            build_lock_ttl_secs: 900,
            default_categories: None,
            reconcile_max_scan: 1024,
            reconcile_max_gaps: 10,
            verify_claim_transactions: true,
            settlement: SettlementSettings::default(),
        }
    }
}

impl DistributorConfig {
    /// Check every value that could otherwise fail later, and build the decimal bridge.
    pub fn validate(&self) -> Result<DecimalBridge> {
        let bridge = DecimalBridge::new(self.ledger_decimals, self.settlement_decimals)?;

        if self.reconcile_max_gaps == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconcile_max_gaps",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(categories) = &self.default_categories {
            if categories.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "default_categories",
                    reason: "use null to include every category".to_string(),
                });
            }
        }

        self.to_settlement_config()?;
        Ok(bridge)
    }

    pub fn to_settlement_config(&self) -> Result<SettlementConfig> {
        let s = &self.settlement;
        let program_id = SettlementConfig::parse_program_id(&s.program_id)
            .map_err(|e| ConfigError::InvalidProgramId(e.to_string()))?;
        if !SettlementConfig::is_known_commitment(&s.commitment) {
            return Err(ConfigError::UnknownCommitment(s.commitment.clone()));
        }
        let claim_program_id = s
            .claim_program_id
            .as_deref()
            .map(SettlementConfig::parse_program_id)
            .transpose()
            .map_err(|e| ConfigError::InvalidProgramId(e.to_string()))?;
        Ok(SettlementConfig {
            mode: s.mode,
            rpc_url: s.rpc_url.clone(),
            program_id,
            commitment: s.commitment.clone(),
            claim_program_id,
        })
    }

    pub fn categories(&self) -> Option<&[String]> {
        self.default_categories.as_deref()
    }
}

/// Settings wrapper for any serializable config type.
pub struct Settings<T> {
    pub config: T,
    path: PathBuf,
}

impl<T: Serialize + DeserializeOwned + Default> Settings<T> {
    /// Load settings from `path`, or write and return defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let path = expand_path(path);

        if path.exists() {
            debug!("Loading settings from {}", path.display());
            let content =
                fs::read_to_string(&path).map_err(|e| ConfigError::ReadError(e.to_string()))?;
            let config: T =
                serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(Self { config, path })
        } else {
            debug!("Creating default settings at {}", path.display());
            let settings = Self {
                config: T::default(),
                path,
            };
            settings.save()?;
            Ok(settings)
        }
    }

    /// Save current settings to disk.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ConfigError::CreateDirError(e.to_string()))?;
            }
        }
        let content = serde_json::to_string_pretty(&self.config)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        fs::write(&self.path, content).map_err(|e| ConfigError::WriteError(e.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_path(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

/// Default config file location
///
/// - Linux: `~/.config/claimcraft/settings.json`
/// - elsewhere: `~/.claimcraft/settings.json`
pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    let dir = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            home_dir()
                .map(|h| h.join(".config"))
                .unwrap_or_else(|| PathBuf::from("."))
        })
        .join("claimcraft");
    #[cfg(not(target_os = "linux"))]
    let dir = home_dir()
        .map(|h| h.join(".claimcraft"))
        .unwrap_or_else(|| PathBuf::from(".claimcraft"));

    dir.join("settings.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DistributorConfig::default();
        assert_eq!(config.ledger_decimals, 6);
        assert_eq!(config.settlement_decimals, 9);
        assert_eq!(config.build_lock_key, 9007199254740991);
        assert_eq!(config.reconcile_max_scan, 1024);
        assert_eq!(config.reconcile_max_gaps, 10);
        assert!(config.verify_claim_transactions);
        assert_eq!(config.settlement.mode, SettlementMode::Mock);

        let bridge = config.validate().unwrap();
        assert_eq!(bridge.multiplier(), 1000);
    }

    #[test]
    fn test_bad_decimals_fail_validation() {
        let config = DistributorConfig {
            ledger_decimals: 9,
            settlement_decimals: 6,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDecimals(_))));
    }

    #[test]
    fn test_bad_settlement_section_fails_validation() {
        let mut config = DistributorConfig::default();
        config.settlement.program_id = "xyz".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidProgramId(_))));

        let mut config = DistributorConfig::default();
        config.settlement.commitment = "recent".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::UnknownCommitment(_))));
    }

    #[test]
    fn test_claim_program_id_parsed() {
        assert_eq!(
            DistributorConfig::default().to_settlement_config().unwrap().claim_program_id,
            None
        );

        let mut config = DistributorConfig::default();
        config.settlement.claim_program_id = Some(DEFAULT_PROGRAM_ID.to_string());
        let settlement = config.to_settlement_config().unwrap();
        assert_eq!(
            settlement.claim_program_id,
            Some(SettlementConfig::parse_program_id(DEFAULT_PROGRAM_ID).unwrap())
        );

        config.settlement.claim_program_id = Some("0OIl".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::InvalidProgramId(_))));
    }

    #[test]
    fn test_empty_category_list_rejected() {
        let config = DistributorConfig {
            default_categories: Some(vec![]),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "default_categories", .. })
        ));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: DistributorConfig = serde_json::from_str(
            r#"{ "settlement_decimals": 12, "settlement": { "mode": "live" } }"#,
        )
        .unwrap();
        assert_eq!(config.settlement_decimals, 12);
        assert_eq!(config.ledger_decimals, 6);
        assert_eq!(config.settlement.mode, SettlementMode::Live);
        assert_eq!(config.settlement.program_id, DEFAULT_PROGRAM_ID);
    }

    #[test]
    fn test_settings_load_or_default_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings: Settings<DistributorConfig> = Settings::load_or_default(&path).unwrap();
        assert_eq!(settings.config, DistributorConfig::default());
        assert!(path.exists());

        settings.config.default_categories = Some(vec!["watch".to_string()]);
        settings.save().unwrap();

        let loaded: Settings<DistributorConfig> = Settings::load_or_default(&path).unwrap();
        assert_eq!(loaded.config.categories(), Some(&["watch".to_string()][..]));
    }

    #[test]
    fn test_parse_error_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let result: Result<Settings<DistributorConfig>> = Settings::load_or_default(&path);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_expand_path_leaves_plain_paths() {
        let plain = PathBuf::from("/var/lib/claimcraft.db");
        assert_eq!(expand_path(&plain), plain);
    }
}

//! Claimcraft Core
//!
//! Shared data model for the reward claim epoch system: claimable rows,
//! frozen epochs and their leaves, claim attempts, and the payload handed
//! to a wallet so it can submit a claim. Also hosts the decimal bridge that
//! converts ledger-unit amounts into settlement atomic units.

pub mod decimal;
pub mod types;
pub mod wallet;

pub use decimal::{DecimalBridge, DecimalError, LEDGER_DECIMALS, SETTLEMENT_DECIMALS};
pub use types::*;
pub use wallet::WalletAddress;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid wallet address: {0}")]
    InvalidWallet(String),

    #[error("Invalid 32-byte hex value: {0}")]
    InvalidHash(String),

    #[error("Unknown claim status: {0}")]
    UnknownStatus(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Encode a 32-byte hash as lowercase hex (no prefix).
pub fn hash_to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Parse a 32-byte hash from hex. A leading `0x` is accepted.
pub fn hash_from_hex(s: &str) -> Result<Hash> {
    let trimmed = s.trim();
    let h = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if h.len() != 64 {
        return Err(CoreError::InvalidHash(s.to_string()));
    }
    let bytes = hex::decode(h).map_err(|_| CoreError::InvalidHash(s.to_string()))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_hex_roundtrip() {
        let hash = [0xABu8; 32];
        let hex = hash_to_hex(&hash);
        assert_eq!(hex.len(), 64);
        assert_eq!(hash_from_hex(&hex).unwrap(), hash);
    }

    #[test]
    fn test_hash_from_hex_accepts_prefix() {
        let hex = format!("0x{}", "11".repeat(32));
        assert_eq!(hash_from_hex(&hex).unwrap(), [0x11u8; 32]);
    }

    #[test]
    fn test_hash_from_hex_rejects_bad_input() {
        assert!(hash_from_hex("abcd").is_err());
        assert!(hash_from_hex(&"zz".repeat(32)).is_err());
    }
}

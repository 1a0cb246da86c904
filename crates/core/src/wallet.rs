//! Settlement wallet addresses (Solana base58 pubkeys).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

/// A 32-byte settlement address.
///
/// Ordering is byte-wise over the raw address, which is what leaf ordering
/// inside an epoch relies on.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WalletAddress([u8; 32]);

impl WalletAddress {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl FromStr for WalletAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidWallet(s.to_string()));
        }
        let bytes = bs58::decode(trimmed)
            .into_vec()
            .map_err(|_| CoreError::InvalidWallet(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidWallet(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl From<[u8; 32]> for WalletAddress {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletAddress({})", self.to_base58())
    }
}

impl Serialize for WalletAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for WalletAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base58_roundtrip() {
        let wallet = WalletAddress::new([7u8; 32]);
        let text = wallet.to_string();
        let parsed: WalletAddress = text.parse().unwrap();
        assert_eq!(parsed, wallet);
    }

    #[test]
    fn test_system_program_address() {
        // All-zero pubkey encodes as 32 '1' characters
        let parsed: WalletAddress = "11111111111111111111111111111111".parse().unwrap();
        assert_eq!(parsed.as_bytes(), &[0u8; 32]);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!("".parse::<WalletAddress>().is_err());
        assert!("   ".parse::<WalletAddress>().is_err());
        assert!("not-base58-0OIl".parse::<WalletAddress>().is_err());
        // Valid base58 but wrong length
        assert!("3mJr7AoUXx2Wqd".parse::<WalletAddress>().is_err());
    }

    #[test]
    fn test_trims_whitespace() {
        let wallet = WalletAddress::new([9u8; 32]);
        let padded = format!("  {}\n", wallet);
        assert_eq!(padded.parse::<WalletAddress>().unwrap(), wallet);
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let mut low = [0u8; 32];
        low[0] = 1;
        let mut high = [0u8; 32];
        high[0] = 2;
        assert!(WalletAddress::new(low) < WalletAddress::new(high));
    }

    #[test]
    fn test_serde_as_string() {
        let wallet = WalletAddress::new([3u8; 32]);
        let json = serde_json::to_string(&wallet).unwrap();
        assert_eq!(json, format!("\"{}\"", wallet));
        let back: WalletAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wallet);
    }
}

//! On-chain layout of the claim program.
//!
//! The program keeps one `EpochRoot` account per epoch at
//! `PDA(["epoch_root", epoch_le])`, created by the admin-only
//! `set_epoch_root(epoch, root)` instruction. Account creation fails if the
//! PDA already exists, so a root can be published once per epoch.

use sha2::{Digest, Sha256};

use claimcraft_core::Hash;

/// Claim program deployed for the reward token.
pub const DEFAULT_PROGRAM_ID: &str = "AKRLZssgxwQwC2gGgUtYtcU7JrhDyEfk1FHqQkZnFUax";

pub const CONFIG_SEED: &[u8] = b"config";
pub const EPOCH_ROOT_SEED: &[u8] = b"epoch_root";

/// Anchor discriminator: first 8 bytes of `SHA256(namespace ":" name)`.
pub fn anchor_discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b":");
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Instruction data for `set_epoch_root`: `disc(8) || epoch u64 LE || root(32)`.
pub fn set_epoch_root_data(epoch_number: u64, root: &Hash) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + 8 + 32);
    data.extend_from_slice(&anchor_discriminator("global", "set_epoch_root"));
    data.extend_from_slice(&epoch_number.to_le_bytes());
    data.extend_from_slice(root);
    data
}

/// Decoded `EpochRoot` account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochRootAccount {
    pub epoch: u64,
    pub root: Hash,
    pub bump: u8,
}

impl EpochRootAccount {
    /// Discriminator + epoch + root + bump
    pub const LEN: usize = 8 + 8 + 32 + 1;

    /// Parse raw account data. Returns `None` for short data or a foreign discriminator.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        if data[..8] != anchor_discriminator("account", "EpochRoot") {
            return None;
        }
        let epoch = u64::from_le_bytes(data[8..16].try_into().ok()?);
        let mut root = [0u8; 32];
        root.copy_from_slice(&data[16..48]);
        Some(Self {
            epoch,
            root,
            bump: data[48],
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(Self::LEN);
        data.extend_from_slice(&anchor_discriminator("account", "EpochRoot"));
        data.extend_from_slice(&self.epoch.to_le_bytes());
        data.extend_from_slice(&self.root);
        data.push(self.bump);
        data
    }
}

/// Outcome of checking a claim transaction against the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxVerdict {
    /// Landed without error at confirmed or finalized commitment
    Confirmed,
    /// Not acceptable as proof of a claim; carries a short reason code
    Rejected(String),
}

impl TxVerdict {
    pub const INVALID_SIGNATURE: &'static str = "INVALID_TX_SIGNATURE";
    pub const NOT_FOUND: &'static str = "TX_NOT_FOUND";
    pub const FAILED: &'static str = "TX_FAILED";
    pub const NOT_CONFIRMED: &'static str = "TX_NOT_CONFIRMED";
    pub const WRONG_PROGRAM: &'static str = "TX_WRONG_PROGRAM";

    pub fn rejected(reason: &str) -> Self {
        TxVerdict::Rejected(reason.to_string())
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, TxVerdict::Confirmed)
    }
}

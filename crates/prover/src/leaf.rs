//! Leaf encoding.
//!
//! Layout v1 (53 bytes):
//!
//! | offset | size | field                          |
//! |--------|------|--------------------------------|
//! | 0      | 1    | encoding version (`0x01`)      |
//! | 1      | 32   | wallet address, raw bytes      |
//! | 33     | 8    | epoch number, u64 big-endian   |
//! | 41     | 8    | amount atomic, u64 big-endian  |
//! | 49     | 4    | leaf index, u32 big-endian     |
//!
//! Leaf hash: `SHA256(encoding)`. Any implementation that reproduces these
//! bytes reproduces every root and proof.

use claimcraft_core::{Hash, WalletAddress};
use sha2::{Digest, Sha256};

pub const LEAF_ENCODING_VERSION: u8 = 1;

pub const LEAF_ENCODING_LEN: usize = 1 + 32 + 8 + 8 + 4;

/// Serialize a claim leaf in the fixed v1 layout.
pub fn encode_leaf(
    wallet: &WalletAddress,
    epoch_number: u64,
    amount_atomic: u64,
    leaf_index: u32,
) -> [u8; LEAF_ENCODING_LEN] {
    let mut out = [0u8; LEAF_ENCODING_LEN];
    out[0] = LEAF_ENCODING_VERSION;
    out[1..33].copy_from_slice(wallet.as_bytes());
    out[33..41].copy_from_slice(&epoch_number.to_be_bytes());
    out[41..49].copy_from_slice(&amount_atomic.to_be_bytes());
    out[49..53].copy_from_slice(&leaf_index.to_be_bytes());
    out
}

/// Compute the leaf hash for one user's entitlement.
pub fn claim_leaf_hash(
    wallet: &WalletAddress,
    epoch_number: u64,
    amount_atomic: u64,
    leaf_index: u32,
) -> Hash {
    let encoded = encode_leaf(wallet, epoch_number, amount_atomic, leaf_index);
    let result = Sha256::digest(encoded);
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

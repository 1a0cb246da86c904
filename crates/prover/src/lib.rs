//! Claimcraft Prover
//!
//! Binary Merkle tree and leaf encoding for claim epochs.
//!
//! The `MerkleTree` is used by the epoch builder (to compute the root
//! committed on-chain and one proof per leaf) and by audit tooling (to
//! re-verify stored proofs). Verification mirrors what the settlement
//! program does when a user claims.

pub mod leaf;
pub mod merkle;

pub use leaf::{claim_leaf_hash, encode_leaf, LEAF_ENCODING_LEN, LEAF_ENCODING_VERSION};
pub use merkle::{hash_pair, MerkleError, MerkleProof, MerkleTree};

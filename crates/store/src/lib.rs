//! Claimcraft Store
//!
//! Durable state for claim epochs, their leaves, and claim attempts.
//!
//! ## Write model
//!
//! - An epoch header and all of its leaves are written by exactly one
//!   `insert_epoch` call, atomically, while the builder holds the build lock.
//!   After that the rows are read-only (apart from the one-way commitment flag).
//! - Claim attempts are keyed by `(user_id, epoch_number)`; the uniqueness
//!   constraint is the serialization point for concurrent `start` calls.
//! - `on_chain_tx_ref` is globally unique across claim attempts when present.
//! - Attempt updates are compare-and-set on the prior status, so a writer
//!   holding a stale copy cannot undo a transition it did not see.
//!
//! Two backends: [`MemoryStore`] (tests, single-process tooling) and
//! [`SqliteStore`] (durable).

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use claimcraft_core::{
    ClaimAttempt, ClaimLeaf, ClaimStatus, Epoch, Hash, NewClaimAttempt, WalletAddress,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Epoch already exists for period {0}")]
    PeriodExists(String),

    #[error("Epoch number conflict: expected {expected}, next free number is {next}")]
    EpochNumberConflict { expected: u64, next: u64 },

    #[error("Invalid epoch: {0}")]
    InvalidEpoch(String),

    #[error("Epoch not found: {0}")]
    EpochNotFound(u64),

    #[error("Claim attempt already exists for user {user_id} in epoch {epoch_number}")]
    DuplicateClaimAttempt { user_id: String, epoch_number: u64 },

    #[error("Claim attempt not found: {0}")]
    ClaimAttemptNotFound(u64),

    #[error("Claim attempt {id} is {actual}, expected {expected}")]
    ClaimAttemptConflict {
        id: u64,
        expected: ClaimStatus,
        actual: ClaimStatus,
    },

    #[error("Transaction reference already used: {0}")]
    TxRefInUse(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl StoreError {
    /// Transient failures a caller may simply retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::LockPoisoned)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Header fields for an epoch that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEpoch {
    pub epoch_number: u64,
    pub period_key: String,
    pub root: Hash,
    pub total_atomic: u128,
    pub leaf_count: u32,
    pub created_at: u64,
}

/// Epoch headers and leaves.
#[async_trait]
pub trait EpochStore: Send + Sync {
    async fn epoch_by_number(&self, epoch_number: u64) -> Result<Option<Epoch>>;

    async fn epoch_by_period(&self, period_key: &str) -> Result<Option<Epoch>>;

    /// Highest-numbered epoch.
    async fn latest_epoch(&self) -> Result<Option<Epoch>>;

    /// One greater than the current maximum epoch number (1 for an empty store).
    async fn next_epoch_number(&self) -> Result<u64>;

    /// Epochs whose root is not yet recorded as committed, oldest first.
    async fn uncommitted_epochs(&self) -> Result<Vec<Epoch>>;

    /// Write an epoch header and all its leaves atomically.
    ///
    /// Fails with `EpochNumberConflict` unless `epoch.epoch_number` is still
    /// the next free number, and with `PeriodExists` if the period already has
    /// an epoch. Nothing is written on failure.
    async fn insert_epoch(&self, epoch: NewEpoch, leaves: Vec<ClaimLeaf>) -> Result<Epoch>;

    /// Record the on-chain commitment. A second call returns the stored epoch unchanged.
    async fn mark_committed(
        &self,
        epoch_number: u64,
        tx_ref: Option<String>,
        committed_at: u64,
    ) -> Result<Epoch>;

    async fn leaf_for_user(&self, epoch_number: u64, user_id: &str) -> Result<Option<ClaimLeaf>>;

    /// Lowest-index leaf paid to `wallet` in an epoch.
    async fn leaf_for_wallet(
        &self,
        epoch_number: u64,
        wallet: &WalletAddress,
    ) -> Result<Option<ClaimLeaf>>;

    /// All leaves of an epoch ordered by leaf index.
    async fn leaves(&self, epoch_number: u64) -> Result<Vec<ClaimLeaf>>;
}

/// Claim attempt records.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    async fn claim_attempt(&self, user_id: &str, epoch_number: u64) -> Result<Option<ClaimAttempt>>;

    async fn claim_attempt_by_tx_ref(&self, tx_ref: &str) -> Result<Option<ClaimAttempt>>;

    /// Create an attempt in `PROCESSING`. Fails with `DuplicateClaimAttempt`
    /// if one already exists for the user and epoch.
    async fn insert_claim_attempt(&self, attempt: NewClaimAttempt) -> Result<ClaimAttempt>;

    /// Overwrite the mutable fields of an attempt, matched by id, if its
    /// stored status is still `expected`.
    ///
    /// Fails with `ClaimAttemptConflict` if the stored status moved on, and
    /// with `TxRefInUse` if another attempt already holds the same tx ref.
    async fn update_claim_attempt(&self, attempt: &ClaimAttempt, expected: ClaimStatus)
        -> Result<()>;

    /// A user's attempts, newest first.
    async fn claim_attempts_for_user(&self, user_id: &str) -> Result<Vec<ClaimAttempt>>;
}

/// Non-blocking mutual exclusion for epoch builds.
#[async_trait]
pub trait BuildLock: Send + Sync {
    /// Try to take the lock; `false` means another builder holds it.
    async fn try_acquire(&self, key: i64) -> Result<bool>;

    async fn release(&self, key: i64) -> Result<()>;
}

/// Check that a header and its leaves form a complete, dense snapshot.
pub(crate) fn validate_new_epoch(epoch: &NewEpoch, leaves: &[ClaimLeaf]) -> Result<()> {
    if leaves.is_empty() {
        return Err(StoreError::InvalidEpoch("epoch has no leaves".to_string()));
    }
    if leaves.len() != epoch.leaf_count as usize {
        return Err(StoreError::InvalidEpoch(format!(
            "leaf_count {} does not match {} leaves",
            epoch.leaf_count,
            leaves.len()
        )));
    }

    let mut users = HashSet::with_capacity(leaves.len());
    let mut total: u128 = 0;
    for (i, leaf) in leaves.iter().enumerate() {
        if leaf.leaf_index as usize != i {
            return Err(StoreError::InvalidEpoch(format!(
                "leaf at position {} has index {}",
                i, leaf.leaf_index
            )));
        }
        if leaf.epoch_number != epoch.epoch_number || leaf.period_key != epoch.period_key {
            return Err(StoreError::InvalidEpoch(format!(
                "leaf {} belongs to a different epoch",
                i
            )));
        }
        if !users.insert(leaf.user_id.as_str()) {
            return Err(StoreError::InvalidEpoch(format!(
                "user {} has more than one leaf",
                leaf.user_id
            )));
        }
        total += leaf.amount_atomic as u128;
    }

    if total != epoch.total_atomic {
        return Err(StoreError::InvalidEpoch(format!(
            "total_atomic {} does not match leaf sum {}",
            epoch.total_atomic, total
        )));
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_validate_accepts_dense_snapshot() {
        let (header, leaves) = epoch_with_leaves(1, "2026-W03", &[10, 20, 30]);
        assert!(validate_new_epoch(&header, &leaves).is_ok());
    }

    #[test]
    fn test_validate_rejects_gap_in_indices() {
        let (header, mut leaves) = epoch_with_leaves(1, "2026-W03", &[10, 20, 30]);
        leaves[2].leaf_index = 5;
        assert!(matches!(validate_new_epoch(&header, &leaves), Err(StoreError::InvalidEpoch(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_user() {
        let (header, mut leaves) = epoch_with_leaves(1, "2026-W03", &[10, 20]);
        leaves[1].user_id = leaves[0].user_id.clone();
        assert!(matches!(validate_new_epoch(&header, &leaves), Err(StoreError::InvalidEpoch(_))));
    }

    #[test]
    fn test_validate_rejects_total_mismatch() {
        let (mut header, leaves) = epoch_with_leaves(1, "2026-W03", &[10, 20]);
        header.total_atomic = 31;
        assert!(matches!(validate_new_epoch(&header, &leaves), Err(StoreError::InvalidEpoch(_))));
    }

    #[test]
    fn test_validate_rejects_empty() {
        let (mut header, _) = epoch_with_leaves(1, "2026-W03", &[10]);
        header.leaf_count = 0;
        header.total_atomic = 0;
        assert!(matches!(validate_new_epoch(&header, &[]), Err(StoreError::InvalidEpoch(_))));
    }

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::LockPoisoned.is_transient());
        assert!(!StoreError::TxRefInUse("x".into()).is_transient());
        assert!(!StoreError::PeriodExists("p".into()).is_transient());
    }
}

//! In-memory store backend.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::{debug, info};

use claimcraft_core::{
    hash_to_hex, ClaimAttempt, ClaimLeaf, ClaimStatus, Epoch, NewClaimAttempt, OnChainStatus,
    WalletAddress,
};

use crate::{
    validate_new_epoch, BuildLock, ClaimStore, EpochStore, NewEpoch, Result, StoreError,
};

#[derive(Debug, Default)]
struct MemoryState {
    epochs: BTreeMap<u64, Epoch>,
    leaves: BTreeMap<u64, Vec<ClaimLeaf>>,
    attempts: BTreeMap<u64, ClaimAttempt>,
    next_attempt_id: u64,
    locks: HashSet<i64>,
}

/// Store that keeps everything in process memory.
///
/// Clones share state, so one instance can be handed to several components.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.state.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.state.write().map_err(|_| StoreError::LockPoisoned)
    }
}

#[async_trait]
impl EpochStore for MemoryStore {
    async fn epoch_by_number(&self, epoch_number: u64) -> Result<Option<Epoch>> {
        Ok(self.read()?.epochs.get(&epoch_number).cloned())
    }

    async fn epoch_by_period(&self, period_key: &str) -> Result<Option<Epoch>> {
        Ok(self
            .read()?
            .epochs
            .values()
            .find(|e| e.period_key == period_key)
            .cloned())
    }

    async fn latest_epoch(&self) -> Result<Option<Epoch>> {
        Ok(self.read()?.epochs.values().next_back().cloned())
    }

    async fn next_epoch_number(&self) -> Result<u64> {
        let state = self.read()?;
        Ok(state.epochs.keys().next_back().map_or(1, |n| n + 1))
    }

    async fn uncommitted_epochs(&self) -> Result<Vec<Epoch>> {
        Ok(self
            .read()?
            .epochs
            .values()
            .filter(|e| !e.is_committed())
            .cloned()
            .collect())
    }

    async fn insert_epoch(&self, epoch: NewEpoch, leaves: Vec<ClaimLeaf>) -> Result<Epoch> {
        validate_new_epoch(&epoch, &leaves)?;

        let mut state = self.write()?;

        let next = state.epochs.keys().next_back().map_or(1, |n| n + 1);
        if epoch.epoch_number != next {
            return Err(StoreError::EpochNumberConflict {
                expected: epoch.epoch_number,
                next,
            });
        }
        if state.epochs.values().any(|e| e.period_key == epoch.period_key) {
            return Err(StoreError::PeriodExists(epoch.period_key));
        }

        let stored = Epoch {
            epoch_number: epoch.epoch_number,
            period_key: epoch.period_key,
            root: epoch.root,
            total_atomic: epoch.total_atomic,
            leaf_count: epoch.leaf_count,
            on_chain: OnChainStatus::Pending,
            created_at: epoch.created_at,
        };

        info!(
            "Stored epoch {} ({}) root={} leaves={}",
            stored.epoch_number,
            stored.period_key,
            &hash_to_hex(&stored.root)[..16],
            stored.leaf_count
        );

        state.leaves.insert(stored.epoch_number, leaves);
        state.epochs.insert(stored.epoch_number, stored.clone());
        Ok(stored)
    }

    async fn mark_committed(
        &self,
        epoch_number: u64,
        tx_ref: Option<String>,
        committed_at: u64,
    ) -> Result<Epoch> {
        let mut state = self.write()?;
        let epoch = state
            .epochs
            .get_mut(&epoch_number)
            .ok_or(StoreError::EpochNotFound(epoch_number))?;

        if !epoch.is_committed() {
            epoch.on_chain = OnChainStatus::Committed {
                tx_ref,
                committed_at,
            };
            debug!("Epoch {} marked committed", epoch_number);
        }
        Ok(epoch.clone())
    }

    async fn leaf_for_user(&self, epoch_number: u64, user_id: &str) -> Result<Option<ClaimLeaf>> {
        Ok(self
            .read()?
            .leaves
            .get(&epoch_number)
            .and_then(|leaves| leaves.iter().find(|l| l.user_id == user_id))
            .cloned())
    }

    async fn leaf_for_wallet(
        &self,
        epoch_number: u64,
        wallet: &WalletAddress,
    ) -> Result<Option<ClaimLeaf>> {
        Ok(self
            .read()?
            .leaves
            .get(&epoch_number)
            .and_then(|leaves| leaves.iter().find(|l| &l.wallet == wallet))
            .cloned())
    }

    async fn leaves(&self, epoch_number: u64) -> Result<Vec<ClaimLeaf>> {
        Ok(self
            .read()?
            .leaves
            .get(&epoch_number)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ClaimStore for MemoryStore {
    async fn claim_attempt(&self, user_id: &str, epoch_number: u64) -> Result<Option<ClaimAttempt>> {
        Ok(self
            .read()?
            .attempts
            .values()
            .find(|a| a.user_id == user_id && a.epoch_number == epoch_number)
            .cloned())
    }

    async fn claim_attempt_by_tx_ref(&self, tx_ref: &str) -> Result<Option<ClaimAttempt>> {
        Ok(self
            .read()?
            .attempts
            .values()
            .find(|a| a.on_chain_tx_ref.as_deref() == Some(tx_ref))
            .cloned())
    }

    async fn insert_claim_attempt(&self, attempt: NewClaimAttempt) -> Result<ClaimAttempt> {
        let mut state = self.write()?;

        if state
            .attempts
            .values()
            .any(|a| a.user_id == attempt.user_id && a.epoch_number == attempt.epoch_number)
        {
            return Err(StoreError::DuplicateClaimAttempt {
                user_id: attempt.user_id,
                epoch_number: attempt.epoch_number,
            });
        }

        state.next_attempt_id += 1;
        let stored = ClaimAttempt {
            id: state.next_attempt_id,
            user_id: attempt.user_id,
            epoch_number: attempt.epoch_number,
            amount_atomic: attempt.amount_atomic,
            leaf_index: attempt.leaf_index,
            status: ClaimStatus::Processing,
            on_chain_tx_ref: None,
            started_at: attempt.started_at,
            claimed_at: None,
            last_error: None,
        };
        state.attempts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_claim_attempt(
        &self,
        attempt: &ClaimAttempt,
        expected: ClaimStatus,
    ) -> Result<()> {
        let mut state = self.write()?;

        let actual = state
            .attempts
            .get(&attempt.id)
            .ok_or(StoreError::ClaimAttemptNotFound(attempt.id))?
            .status;
        if actual != expected {
            return Err(StoreError::ClaimAttemptConflict {
                id: attempt.id,
                expected,
                actual,
            });
        }

        if let Some(tx_ref) = attempt.on_chain_tx_ref.as_deref() {
            let taken = state
                .attempts
                .values()
                .any(|a| a.id != attempt.id && a.on_chain_tx_ref.as_deref() == Some(tx_ref));
            if taken {
                return Err(StoreError::TxRefInUse(tx_ref.to_string()));
            }
        }

        state.attempts.insert(attempt.id, attempt.clone());
        debug!("Claim attempt {}: {} -> {}", attempt.id, expected, attempt.status);
        Ok(())
    }

    async fn claim_attempts_for_user(&self, user_id: &str) -> Result<Vec<ClaimAttempt>> {
        let mut attempts: Vec<ClaimAttempt> = self
            .read()?
            .attempts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        Ok(attempts)
    }
}

#[async_trait]
impl BuildLock for MemoryStore {
    async fn try_acquire(&self, key: i64) -> Result<bool> {
        Ok(self.write()?.locks.insert(key))
    }

    async fn release(&self, key: i64) -> Result<()> {
        self.write()?.locks.remove(&key);
        Ok(())
    }
}

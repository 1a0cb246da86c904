//! Epoch builder
//!
//! Freezes one period's claimables into a numbered epoch: deterministic leaf
//! order, Merkle tree, and a single atomic write of header plus leaves. Builds
//! are serialized by the store's build lock; a second concurrent build is
//! skipped, not queued.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use claimcraft_aggregator::ClaimablesAggregator;
use claimcraft_core::{unix_now, ClaimLeaf, ClaimableRow, EpochSummary};
use claimcraft_prover::{claim_leaf_hash, MerkleError, MerkleTree};
use claimcraft_store::{BuildLock, EpochStore, NewEpoch, StoreError};

use crate::{DistributorError, Result};

/// Why a build did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another build holds the lock
    LockBusy,
    /// The ledger has no payable period to build
    NoPayablePeriod,
}

/// Result of a build request. None of these are failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BuildOutcome {
    Built(EpochSummary),
    AlreadyExists(EpochSummary),
    Skipped { reason: SkipReason },
}

impl BuildOutcome {
    pub fn summary(&self) -> Option<&EpochSummary> {
        match self {
            BuildOutcome::Built(s) | BuildOutcome::AlreadyExists(s) => Some(s),
            BuildOutcome::Skipped { .. } => None,
        }
    }
}

pub struct EpochBuilder {
    aggregator: ClaimablesAggregator,
    epochs: Arc<dyn EpochStore>,
    lock: Arc<dyn BuildLock>,
    lock_key: i64,
    categories: Option<Vec<String>>,
}

impl EpochBuilder {
    pub fn new(
        aggregator: ClaimablesAggregator,
        epochs: Arc<dyn EpochStore>,
        lock: Arc<dyn BuildLock>,
        lock_key: i64,
    ) -> Self {
        Self {
            aggregator,
            epochs,
            lock,
            lock_key,
            categories: None,
        }
    }

    /// Restrict builds to these reward categories.
    pub fn with_categories(mut self, categories: Option<Vec<String>>) -> Self {
        self.categories = categories;
        self
    }

    /// Build the epoch for `period_key`, or return the one that already exists.
    pub async fn build_epoch(&self, period_key: &str) -> Result<BuildOutcome> {
        if let Some(existing) = self.epochs.epoch_by_period(period_key).await? {
            debug!(
                "Epoch {} already exists for period {}",
                existing.epoch_number, period_key
            );
            return Ok(BuildOutcome::AlreadyExists(existing.summary()));
        }

        if !self.lock.try_acquire(self.lock_key).await? {
            info!("Build for period {} skipped: lock busy", period_key);
            return Ok(BuildOutcome::Skipped {
                reason: SkipReason::LockBusy,
            });
        }

        let result = self.build_locked(period_key).await;

        if let Err(e) = self.lock.release(self.lock_key).await {
            warn!("Failed to release build lock: {}", e);
        }

        result
    }

    /// Build the most recent period that still has payable ledger entries.
    pub async fn build_latest(&self) -> Result<BuildOutcome> {
        match self.aggregator.latest_payable_period().await? {
            Some(period_key) => self.build_epoch(&period_key).await,
            None => {
                info!("No payable period to build");
                Ok(BuildOutcome::Skipped {
                    reason: SkipReason::NoPayablePeriod,
                })
            }
        }
    }

    async fn build_locked(&self, period_key: &str) -> Result<BuildOutcome> {
        // A build that finished between the pre-check and the lock wins
        if let Some(existing) = self.epochs.epoch_by_period(period_key).await? {
            return Ok(BuildOutcome::AlreadyExists(existing.summary()));
        }

        let rows = self
            .aggregator
            .claimables(period_key, self.categories.as_deref())
            .await?;
        if rows.is_empty() {
            info!("No claimables for period {}", period_key);
            return Err(DistributorError::NoClaimables(period_key.to_string()));
        }

        let epoch_number = self.epochs.next_epoch_number().await?;
        info!(
            "Building epoch {} for period {} ({} users)",
            epoch_number,
            period_key,
            rows.len()
        );

        let (header, leaves) = assemble_epoch(epoch_number, period_key, rows, unix_now())?;
        let root = header.root;

        match self.epochs.insert_epoch(header, leaves).await {
            Ok(epoch) => {
                info!(
                    "Built epoch {}: {} leaves, total {}, root {}",
                    epoch.epoch_number,
                    epoch.leaf_count,
                    epoch.total_atomic,
                    hex::encode(&root[..8])
                );
                Ok(BuildOutcome::Built(epoch.summary()))
            }
            Err(StoreError::PeriodExists(_)) => {
                // Another process built it without our lock (e.g. lock takeover)
                let existing = self
                    .epochs
                    .epoch_by_period(period_key)
                    .await?
                    .ok_or_else(|| DistributorError::EpochNotFound(period_key.into()))?;
                Ok(BuildOutcome::AlreadyExists(existing.summary()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Sort rows into leaf order, hash them, and attach proofs.
///
/// Leaf order is by raw wallet bytes, then user id. Leaf index is part of the
/// leaf hash, so this order is part of the on-chain commitment.
pub fn assemble_epoch(
    epoch_number: u64,
    period_key: &str,
    mut rows: Vec<ClaimableRow>,
    created_at: u64,
) -> Result<(NewEpoch, Vec<ClaimLeaf>)> {
    rows.sort_by(|a, b| {
        a.wallet
            .as_bytes()
            .cmp(b.wallet.as_bytes())
            .then_with(|| a.user_id.as_bytes().cmp(b.user_id.as_bytes()))
    });

    let leaf_count = u32::try_from(rows.len())
        .map_err(|_| DistributorError::TooManyLeaves(rows.len()))?;

    let hashes: Vec<_> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| claim_leaf_hash(&row.wallet, epoch_number, row.amount_atomic, i as u32))
        .collect();
    let tree = MerkleTree::from_leaves(hashes)?;

    let mut total_atomic: u128 = 0;
    let mut leaves = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        let proof = tree.proof(i).ok_or(MerkleError::LeafOutOfRange(i))?;
        total_atomic += row.amount_atomic as u128;
        leaves.push(ClaimLeaf {
            epoch_number,
            period_key: period_key.to_string(),
            user_id: row.user_id,
            wallet: row.wallet,
            leaf_index: i as u32,
            amount_atomic: row.amount_atomic,
            proof: proof.siblings,
        });
    }

    let header = NewEpoch {
        epoch_number,
        period_key: period_key.to_string(),
        root: tree.root(),
        total_atomic,
        leaf_count,
        created_at,
    };
    Ok((header, leaves))
}

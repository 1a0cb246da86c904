//! Claimcraft Distributor
//!
//! Ties the claim system together:
//!
//! - [`EpochBuilder`]: freezes a period's claimables into an epoch
//! - [`CommitmentRecorder`]: records roots once they are live on-chain
//! - [`ClaimPreparer`]: hands out leaves and proofs for committed epochs
//! - [`ClaimLifecycle`]: tracks each user's claim attempt to completion
//!
//! [`Distributor`] wires them over one store for callers that want a single
//! entry point (the CLI, an admin API).

pub mod audit;
pub mod builder;
pub mod commitment;
pub mod config;
pub mod lifecycle;
pub mod prepare;

pub use audit::{audit_epoch, AuditIssue, EpochAudit};
pub use builder::{assemble_epoch, BuildOutcome, EpochBuilder, SkipReason};
pub use commitment::CommitmentRecorder;
pub use config::{
    default_settings_path, ConfigError, DistributorConfig, Settings, SettlementSettings,
};
pub use lifecycle::{history_csv, ClaimLifecycle, ClaimStart};
pub use prepare::ClaimPreparer;

use std::sync::Arc;

use thiserror::Error;

use claimcraft_aggregator::{AggregatorError, ClaimablesAggregator, LedgerSource, WalletDirectory};
use claimcraft_core::{
    ClaimAttempt, ClaimLeaf, ClaimStatus, Epoch, EpochRef, EpochSummary, LeafProofPayload,
    WalletAddress,
};
use claimcraft_prover::MerkleError;
use claimcraft_settlement::{ClaimTxVerifier, CommitmentBridge, SettlementError};
use claimcraft_store::{BuildLock, ClaimStore, EpochStore, StoreError};

#[derive(Error, Debug)]
pub enum DistributorError {
    #[error("Epoch not found: {0}")]
    EpochNotFound(EpochRef),

    #[error("Epoch {0} is not yet committed on-chain")]
    EpochNotYetCommitted(u64),

    #[error("User {user_id} has no entitlement in epoch {epoch_number}")]
    NoEntitlement { user_id: String, epoch_number: u64 },

    #[error("No claimables for period {0}")]
    NoClaimables(String),

    #[error("Too many leaves for one epoch: {0}")]
    TooManyLeaves(usize),

    #[error("Transaction already used by another claim: {0}")]
    TxAlreadyUsed(String),

    #[error("Missing transaction reference")]
    MissingTxRef,

    #[error("No claim attempt for user {user_id} in epoch {epoch_number}")]
    ClaimNotFound { user_id: String, epoch_number: u64 },

    #[error("Invalid claim transition {from} -> {to}")]
    InvalidTransition { from: ClaimStatus, to: ClaimStatus },

    #[error("Root for epoch {0} is not on-chain")]
    RootNotCommitted(u64),

    #[error("Root mismatch for epoch {epoch_number}: stored {stored}, on-chain {on_chain}")]
    RootMismatch {
        epoch_number: u64,
        stored: String,
        on_chain: String,
    },

    #[error("Claim transaction {tx_ref} rejected: {reason}")]
    ClaimTxRejected { tx_ref: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Aggregator error: {0}")]
    Aggregator(#[from] AggregatorError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Merkle error: {0}")]
    Merkle(#[from] MerkleError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl DistributorError {
    /// Whether the same call may succeed later without any other change.
    pub fn is_retryable(&self) -> bool {
        match self {
            DistributorError::EpochNotYetCommitted(_) | DistributorError::RootNotCommitted(_) => true,
            DistributorError::Store(e) => e.is_transient(),
            DistributorError::Aggregator(e) => e.is_transient(),
            DistributorError::Settlement(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DistributorError>;

/// All distributor operations over one store.
pub struct Distributor {
    builder: EpochBuilder,
    commitments: CommitmentRecorder,
    preparer: ClaimPreparer,
    lifecycle: ClaimLifecycle,
    epochs: Arc<dyn EpochStore>,
    reconcile_max_scan: u64,
    reconcile_max_gaps: u32,
}

impl Distributor {
    /// Validates `config` before wiring anything.
    pub fn new<S>(
        config: &DistributorConfig,
        store: Arc<S>,
        ledger: Arc<dyn LedgerSource>,
        wallets: Arc<dyn WalletDirectory>,
        bridge: Arc<dyn CommitmentBridge>,
    ) -> Result<Self>
    where
        S: EpochStore + ClaimStore + BuildLock + 'static,
    {
        let decimals = config.validate()?;

        let epochs: Arc<dyn EpochStore> = store.clone();
        let claims: Arc<dyn ClaimStore> = store.clone();
        let lock: Arc<dyn BuildLock> = store;

        let aggregator = ClaimablesAggregator::new(ledger, wallets, decimals);
        let builder = EpochBuilder::new(aggregator, epochs.clone(), lock, config.build_lock_key)
            .with_categories(config.default_categories.clone());
        let commitments = CommitmentRecorder::new(epochs.clone(), bridge);
        let preparer = ClaimPreparer::new(epochs.clone());
        let lifecycle = ClaimLifecycle::new(preparer.clone(), claims);

        Ok(Self {
            builder,
            commitments,
            preparer,
            lifecycle,
            epochs,
            reconcile_max_scan: config.reconcile_max_scan,
            reconcile_max_gaps: config.reconcile_max_gaps,
        })
    }

    /// Check claim transactions with `verifier` before marking claims done.
    pub fn with_verifier(mut self, verifier: Arc<dyn ClaimTxVerifier>) -> Self {
        self.lifecycle = self.lifecycle.with_verifier(verifier);
        self
    }

    // ==================== Epochs ====================

    pub async fn build_epoch(&self, period_key: &str) -> Result<BuildOutcome> {
        self.builder.build_epoch(period_key).await
    }

    pub async fn build_latest(&self) -> Result<BuildOutcome> {
        self.builder.build_latest().await
    }

    pub async fn epoch(&self, epoch: impl Into<EpochRef>) -> Result<EpochSummary> {
        Ok(self.preparer.resolve_epoch(&epoch.into()).await?.summary())
    }

    pub async fn latest_epoch(&self) -> Result<Option<EpochSummary>> {
        Ok(self.epochs.latest_epoch().await?.map(|e| e.summary()))
    }

    pub async fn audit_epoch(&self, epoch: impl Into<EpochRef>) -> Result<EpochAudit> {
        let epoch = self.preparer.resolve_epoch(&epoch.into()).await?;
        let leaves = self.epochs.leaves(epoch.epoch_number).await?;
        Ok(audit_epoch(&epoch, &leaves))
    }

    // ==================== Commitments ====================

    pub async fn mark_committed(&self, epoch_number: u64, tx_ref: Option<String>) -> Result<Epoch> {
        self.commitments.mark_committed(epoch_number, tx_ref).await
    }

    pub async fn commit_root(&self, epoch_number: u64) -> Result<Epoch> {
        self.commitments.commit_and_record(epoch_number).await
    }

    pub async fn reconcile_commitments(&self) -> Result<Vec<u64>> {
        self.commitments.reconcile_commitments().await
    }

    pub async fn find_latest_committed_epoch(&self) -> Result<u64> {
        self.commitments
            .find_latest_committed_epoch(self.reconcile_max_scan, self.reconcile_max_gaps)
            .await
    }

    // ==================== Claims ====================

    pub async fn prepare_claim(
        &self,
        user_id: &str,
        epoch: impl Into<EpochRef>,
    ) -> Result<LeafProofPayload> {
        self.preparer.prepare_claim(user_id, &epoch.into()).await
    }

    pub async fn leaf_for_wallet(
        &self,
        epoch: impl Into<EpochRef>,
        wallet: &WalletAddress,
    ) -> Result<Option<ClaimLeaf>> {
        self.preparer.leaf_for_wallet(&epoch.into(), wallet).await
    }

    pub async fn start_claim(&self, user_id: &str, epoch: impl Into<EpochRef>) -> Result<ClaimStart> {
        self.lifecycle.start(user_id, &epoch.into()).await
    }

    pub async fn complete_claim(
        &self,
        user_id: &str,
        epoch: impl Into<EpochRef>,
        tx_ref: &str,
    ) -> Result<ClaimAttempt> {
        self.lifecycle.complete(user_id, &epoch.into(), tx_ref).await
    }

    pub async fn fail_claim(
        &self,
        user_id: &str,
        epoch: impl Into<EpochRef>,
        reason: &str,
    ) -> Result<ClaimAttempt> {
        self.lifecycle.fail(user_id, &epoch.into(), reason).await
    }

    pub async fn claims_for_user(&self, user_id: &str) -> Result<Vec<ClaimAttempt>> {
        self.lifecycle.claims_for_user(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DistributorError::EpochNotYetCommitted(1).is_retryable());
        assert!(DistributorError::RootNotCommitted(1).is_retryable());
        assert!(DistributorError::Store(StoreError::LockPoisoned).is_retryable());
        assert!(DistributorError::Settlement(SettlementError::RpcError("timeout".into())).is_retryable());

        assert!(!DistributorError::TxAlreadyUsed("sig".into()).is_retryable());
        assert!(!DistributorError::NoClaimables("p".into()).is_retryable());
        assert!(!DistributorError::NoEntitlement {
            user_id: "u".into(),
            epoch_number: 1
        }
        .is_retryable());
        assert!(!DistributorError::Settlement(SettlementError::NotAuthorized).is_retryable());
    }
}

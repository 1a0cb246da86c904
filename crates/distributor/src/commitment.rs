//! Recording on-chain root commitments.
//!
//! Publishing a root is an operator action. This module only records a
//! commitment after reading the root back from the chain and checking it
//! against the stored one. The stored flag is then the source of truth for
//! claim preparation; probing the chain is left to repair tooling.

use std::sync::Arc;

use tracing::{error, info, warn};

use claimcraft_core::{hash_to_hex, unix_now, Epoch};
use claimcraft_settlement::CommitmentBridge;
use claimcraft_store::EpochStore;

use crate::{DistributorError, Result};

pub struct CommitmentRecorder {
    epochs: Arc<dyn EpochStore>,
    bridge: Arc<dyn CommitmentBridge>,
}

impl CommitmentRecorder {
    pub fn new(epochs: Arc<dyn EpochStore>, bridge: Arc<dyn CommitmentBridge>) -> Self {
        Self { epochs, bridge }
    }

    async fn stored_epoch(&self, epoch_number: u64) -> Result<Epoch> {
        self.epochs
            .epoch_by_number(epoch_number)
            .await?
            .ok_or_else(|| DistributorError::EpochNotFound(epoch_number.into()))
    }

    /// Record that `epoch_number`'s root is live on-chain.
    ///
    /// Idempotent: an epoch already marked is returned unchanged, keeping its
    /// first tx ref.
    pub async fn mark_committed(&self, epoch_number: u64, tx_ref: Option<String>) -> Result<Epoch> {
        let epoch = self.stored_epoch(epoch_number).await?;
        if epoch.is_committed() {
            return Ok(epoch);
        }

        let on_chain = self
            .bridge
            .committed_root(epoch_number)
            .await?
            .ok_or(DistributorError::RootNotCommitted(epoch_number))?;

        if on_chain != epoch.root {
            error!(
                "Root mismatch for epoch {}: stored {}, on-chain {}",
                epoch_number,
                hex::encode(&epoch.root[..8]),
                hex::encode(&on_chain[..8])
            );
            return Err(DistributorError::RootMismatch {
                epoch_number,
                stored: epoch.root_hex(),
                on_chain: hash_to_hex(&on_chain),
            });
        }

        let epoch = self
            .epochs
            .mark_committed(epoch_number, tx_ref, unix_now())
            .await?;
        info!(
            "Epoch {} marked committed (tx: {})",
            epoch_number,
            epoch.on_chain_tx_ref().unwrap_or("-")
        );
        Ok(epoch)
    }

    /// Publish the stored root through the bridge, then record it.
    ///
    /// If the root is already on-chain (a previous publish whose recording
    /// was lost), only the recording step runs.
    pub async fn commit_and_record(&self, epoch_number: u64) -> Result<Epoch> {
        let epoch = self.stored_epoch(epoch_number).await?;
        if epoch.is_committed() {
            return Ok(epoch);
        }

        let tx_ref = if self.bridge.is_committed(epoch_number).await? {
            warn!("Epoch {} root already on-chain, recording only", epoch_number);
            None
        } else {
            Some(self.bridge.commit_root(epoch_number, &epoch.root).await?)
        };

        self.mark_committed(epoch_number, tx_ref).await
    }

    /// Mark every uncommitted epoch whose on-chain root matches the stored one.
    ///
    /// Returns the epoch numbers newly marked. Mismatches are logged and skipped.
    pub async fn reconcile_commitments(&self) -> Result<Vec<u64>> {
        let mut marked = Vec::new();
        for epoch in self.epochs.uncommitted_epochs().await? {
            match self.mark_committed(epoch.epoch_number, None).await {
                Ok(_) => marked.push(epoch.epoch_number),
                Err(DistributorError::RootNotCommitted(_)) => {}
                Err(DistributorError::RootMismatch { epoch_number, .. }) => {
                    warn!("Reconcile skipped epoch {}: root mismatch", epoch_number);
                }
                Err(e) => return Err(e),
            }
        }
        if !marked.is_empty() {
            info!("Reconciled {} epoch commitments: {:?}", marked.len(), marked);
        }
        Ok(marked)
    }

    /// Highest epoch with a root on-chain, found by probing the chain.
    pub async fn find_latest_committed_epoch(&self, max_scan: u64, max_gaps: u32) -> Result<u64> {
        Ok(self
            .bridge
            .find_latest_committed_epoch(max_scan, max_gaps)
            .await?)
    }
}

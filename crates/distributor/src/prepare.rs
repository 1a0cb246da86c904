//! Claim preparation: hands a user their leaf and proof once the epoch root
//! is committed on-chain. Read-only.

use std::sync::Arc;

use tracing::debug;

use claimcraft_core::{ClaimLeaf, Epoch, EpochRef, LeafProofPayload, WalletAddress};
use claimcraft_store::EpochStore;

use crate::{DistributorError, Result};

#[derive(Clone)]
pub struct ClaimPreparer {
    epochs: Arc<dyn EpochStore>,
}

impl ClaimPreparer {
    pub fn new(epochs: Arc<dyn EpochStore>) -> Self {
        Self { epochs }
    }

    /// Look up an epoch by number or period key.
    pub async fn resolve_epoch(&self, epoch: &EpochRef) -> Result<Epoch> {
        let found = match epoch {
            EpochRef::Number(n) => self.epochs.epoch_by_number(*n).await?,
            EpochRef::Period(p) => self.epochs.epoch_by_period(p).await?,
        };
        found.ok_or_else(|| DistributorError::EpochNotFound(epoch.clone()))
    }

    /// Epoch and leaf for a user, checked in order: epoch exists, root
    /// committed, user has a leaf.
    pub async fn claimable_leaf(&self, user_id: &str, epoch: &EpochRef) -> Result<(Epoch, ClaimLeaf)> {
        let epoch = self.resolve_epoch(epoch).await?;
        if !epoch.is_committed() {
            debug!(
                "Claim for user {} refused: epoch {} not committed",
                user_id, epoch.epoch_number
            );
            return Err(DistributorError::EpochNotYetCommitted(epoch.epoch_number));
        }

        let leaf = self
            .epochs
            .leaf_for_user(epoch.epoch_number, user_id)
            .await?
            .ok_or_else(|| DistributorError::NoEntitlement {
                user_id: user_id.to_string(),
                epoch_number: epoch.epoch_number,
            })?;

        Ok((epoch, leaf))
    }

    pub async fn prepare_claim(&self, user_id: &str, epoch: &EpochRef) -> Result<LeafProofPayload> {
        let (epoch, leaf) = self.claimable_leaf(user_id, epoch).await?;
        Ok(LeafProofPayload::from_leaf(&epoch, &leaf))
    }

    /// Support lookup by payout wallet. Not gated on commitment.
    pub async fn leaf_for_wallet(
        &self,
        epoch: &EpochRef,
        wallet: &WalletAddress,
    ) -> Result<Option<ClaimLeaf>> {
        let epoch = self.resolve_epoch(epoch).await?;
        Ok(self.epochs.leaf_for_wallet(epoch.epoch_number, wallet).await?)
    }
}

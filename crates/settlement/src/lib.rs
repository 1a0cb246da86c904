//! Claimcraft Settlement
//!
//! Solana client for the claim program.
//!
//! ## Flow
//!
//! 1. **Commit**: an operator publishes the Merkle root of a built epoch with
//!    `set_epoch_root(epoch, root)`, creating the `EpochRoot` PDA.
//! 2. **Check**: claim preparation only hands out proofs once the root is
//!    recorded as committed; commitment recording reads the PDA back and
//!    compares it with the stored root.
//! 3. **Claim**: the user's wallet submits the claim instruction with the
//!    leaf and proof. The resulting transaction signature is checked here
//!    before the claim is marked as done.

mod client;
mod types;

pub use client::{SettlementClient, SettlementConfig, SettlementMode};
pub use types::*;

use async_trait::async_trait;
use thiserror::Error;

use claimcraft_core::Hash;

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Invalid program id: {0}")]
    InvalidProgramId(String),

    #[error("Invalid account data: {0}")]
    InvalidAccountData(String),

    #[error("Settlement lock poisoned")]
    LockPoisoned,
}

impl SettlementError {
    /// Network-level failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, SettlementError::RpcError(_) | SettlementError::LockPoisoned)
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;

/// Access to epoch roots published on-chain.
#[async_trait]
pub trait CommitmentBridge: Send + Sync {
    /// Publish `root` for `epoch_number`. Returns the transaction reference.
    async fn commit_root(&self, epoch_number: u64, root: &Hash) -> Result<String>;

    /// Root published for an epoch, if any.
    async fn committed_root(&self, epoch_number: u64) -> Result<Option<Hash>>;

    async fn is_committed(&self, epoch_number: u64) -> Result<bool> {
        Ok(self.committed_root(epoch_number).await?.is_some())
    }

    /// Highest committed epoch found by probing upward from epoch 1, or 0.
    ///
    /// Tolerates holes in the numbering: scanning stops after `max_gaps`
    /// consecutive missing epochs or at `max_scan`. Used by repair tooling.
    async fn find_latest_committed_epoch(&self, max_scan: u64, max_gaps: u32) -> Result<u64> {
        if max_scan == 0 || !self.is_committed(1).await? {
            return Ok(0);
        }

        let mut max_found = 1;
        let mut gaps = 0u32;
        for epoch_number in 2..=max_scan {
            if self.is_committed(epoch_number).await? {
                max_found = epoch_number;
                gaps = 0;
            } else {
                gaps += 1;
                if gaps >= max_gaps {
                    break;
                }
            }
        }
        Ok(max_found)
    }
}

/// Checks a client-reported claim transaction before it is accepted.
#[async_trait]
pub trait ClaimTxVerifier: Send + Sync {
    async fn verify_claim_tx(&self, tx_ref: &str) -> Result<TxVerdict>;
}

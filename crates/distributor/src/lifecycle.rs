//! Claim lifecycle
//!
//! One attempt per user and epoch, moving
//!
//! ```text
//! (none) -> PROCESSING -> CLAIMED
//!               |  ^
//!               v  |
//!              FAILED
//! ```
//!
//! `CLAIMED` is terminal and re-entering it is a success, not an error. A
//! settlement transaction may satisfy at most one attempt.
//!
//! Every write names the status it read, so of two racing transitions only
//! the first lands; the loser re-reads and reports the current state.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use claimcraft_core::{
    unix_now, ClaimAttempt, ClaimLeaf, ClaimStatus, EpochRef, LeafProofPayload, NewClaimAttempt,
};
use claimcraft_settlement::{ClaimTxVerifier, TxVerdict};
use claimcraft_store::{ClaimStore, StoreError};

use crate::prepare::ClaimPreparer;
use crate::{DistributorError, Result};

/// Result of `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ClaimStart {
    /// The claim already completed; nothing to submit
    AlreadyClaimed { attempt: ClaimAttempt },
    /// Attempt is `PROCESSING`; submit the claim with this payload
    Ready {
        attempt: ClaimAttempt,
        payload: LeafProofPayload,
    },
}

impl ClaimStart {
    pub fn attempt(&self) -> &ClaimAttempt {
        match self {
            ClaimStart::AlreadyClaimed { attempt } | ClaimStart::Ready { attempt, .. } => attempt,
        }
    }
}

pub struct ClaimLifecycle {
    preparer: ClaimPreparer,
    claims: Arc<dyn ClaimStore>,
    verifier: Option<Arc<dyn ClaimTxVerifier>>,
}

impl ClaimLifecycle {
    pub fn new(preparer: ClaimPreparer, claims: Arc<dyn ClaimStore>) -> Self {
        Self {
            preparer,
            claims,
            verifier: None,
        }
    }

    /// Check claim transactions with `verifier` before accepting them.
    pub fn with_verifier(mut self, verifier: Arc<dyn ClaimTxVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Open or resume a claim and return what the wallet needs to submit it.
    pub async fn start(&self, user_id: &str, epoch: &EpochRef) -> Result<ClaimStart> {
        let (epoch, leaf) = self.preparer.claimable_leaf(user_id, epoch).await?;
        let payload = LeafProofPayload::from_leaf(&epoch, &leaf);

        let existing = self.claims.claim_attempt(user_id, epoch.epoch_number).await?;
        let attempt = match existing {
            Some(attempt) => attempt,
            None => match self.claims.insert_claim_attempt(new_attempt(&leaf)).await {
                Ok(attempt) => {
                    info!(
                        "Claim started: user {} epoch {} (attempt {})",
                        user_id, epoch.epoch_number, attempt.id
                    );
                    return Ok(ClaimStart::Ready { attempt, payload });
                }
                // Lost the creation race; the winner's row is the attempt
                Err(StoreError::DuplicateClaimAttempt { .. }) => {
                    self.reload(user_id, epoch.epoch_number).await?
                }
                Err(e) => return Err(e.into()),
            },
        };

        match attempt.status {
            ClaimStatus::Claimed => {
                debug!("Claim already done: user {} epoch {}", user_id, epoch.epoch_number);
                Ok(ClaimStart::AlreadyClaimed { attempt })
            }
            ClaimStatus::Processing => Ok(ClaimStart::Ready { attempt, payload }),
            ClaimStatus::Failed | ClaimStatus::Pending => match self.restart(attempt, &leaf).await {
                Ok(attempt) => Ok(ClaimStart::Ready { attempt, payload }),
                // Someone else moved the attempt first; report where it is now
                Err(DistributorError::Store(StoreError::ClaimAttemptConflict { .. })) => {
                    let current = self.reload(user_id, epoch.epoch_number).await?;
                    match current.status {
                        ClaimStatus::Claimed => Ok(ClaimStart::AlreadyClaimed { attempt: current }),
                        ClaimStatus::Processing => Ok(ClaimStart::Ready {
                            attempt: current,
                            payload,
                        }),
                        from => Err(DistributorError::InvalidTransition {
                            from,
                            to: ClaimStatus::Processing,
                        }),
                    }
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Back to `PROCESSING`, re-synced with the current leaf.
    async fn restart(&self, mut attempt: ClaimAttempt, leaf: &ClaimLeaf) -> Result<ClaimAttempt> {
        let from = attempt.status;
        let previous = attempt.last_error.take();
        attempt.status = ClaimStatus::Processing;
        attempt.amount_atomic = leaf.amount_atomic;
        attempt.leaf_index = leaf.leaf_index;
        attempt.on_chain_tx_ref = None;
        attempt.claimed_at = None;
        attempt.started_at = unix_now();
        self.claims.update_claim_attempt(&attempt, from).await?;

        info!(
            "Claim retried: user {} epoch {} (previous error: {})",
            attempt.user_id,
            attempt.epoch_number,
            previous.as_deref().unwrap_or("-")
        );
        Ok(attempt)
    }

    async fn reload(&self, user_id: &str, epoch_number: u64) -> Result<ClaimAttempt> {
        self.claims
            .claim_attempt(user_id, epoch_number)
            .await?
            .ok_or_else(|| DistributorError::ClaimNotFound {
                user_id: user_id.to_string(),
                epoch_number,
            })
    }

    async fn existing_attempt(&self, user_id: &str, epoch: &EpochRef) -> Result<ClaimAttempt> {
        let epoch_number = match epoch {
            EpochRef::Number(n) => *n,
            EpochRef::Period(_) => self.preparer.resolve_epoch(epoch).await?.epoch_number,
        };
        self.reload(user_id, epoch_number).await
    }

    /// Accept `tx_ref` as the settlement of a `PROCESSING` attempt.
    ///
    /// Completing an already claimed attempt with the same `tx_ref` is a no-op.
    /// A `tx_ref` held by any other attempt is rejected with `TxAlreadyUsed`.
    pub async fn complete(&self, user_id: &str, epoch: &EpochRef, tx_ref: &str) -> Result<ClaimAttempt> {
        let tx_ref = tx_ref.trim();
        if tx_ref.is_empty() {
            return Err(DistributorError::MissingTxRef);
        }

        let mut attempt = self.existing_attempt(user_id, epoch).await?;

        match attempt.status {
            ClaimStatus::Claimed if attempt.on_chain_tx_ref.as_deref() == Some(tx_ref) => {
                return Ok(attempt);
            }
            ClaimStatus::Processing => {}
            from => {
                return Err(DistributorError::InvalidTransition {
                    from,
                    to: ClaimStatus::Claimed,
                });
            }
        }

        if let Some(holder) = self.claims.claim_attempt_by_tx_ref(tx_ref).await? {
            if holder.id != attempt.id {
                warn!(
                    "Replay rejected: tx {} already settles attempt {} (user {} epoch {})",
                    tx_ref, holder.id, holder.user_id, holder.epoch_number
                );
                return Err(DistributorError::TxAlreadyUsed(tx_ref.to_string()));
            }
        }

        if let Some(verifier) = &self.verifier {
            if let TxVerdict::Rejected(reason) = verifier.verify_claim_tx(tx_ref).await? {
                let mut failed = attempt.clone();
                failed.status = ClaimStatus::Failed;
                failed.last_error = Some(reason.clone());
                match self.claims.update_claim_attempt(&failed, ClaimStatus::Processing).await {
                    Ok(()) => warn!(
                        "Claim failed: user {} epoch {} tx {}: {}",
                        user_id, attempt.epoch_number, tx_ref, reason
                    ),
                    Err(StoreError::ClaimAttemptConflict { actual, .. }) => warn!(
                        "Rejected tx {} for user {} epoch {}; attempt already {}",
                        tx_ref, user_id, attempt.epoch_number, actual
                    ),
                    Err(e) => return Err(e.into()),
                }
                return Err(DistributorError::ClaimTxRejected {
                    tx_ref: tx_ref.to_string(),
                    reason,
                });
            }
        }

        attempt.status = ClaimStatus::Claimed;
        attempt.on_chain_tx_ref = Some(tx_ref.to_string());
        attempt.claimed_at = Some(unix_now());
        attempt.last_error = None;

        match self.claims.update_claim_attempt(&attempt, ClaimStatus::Processing).await {
            Ok(()) => {}
            Err(StoreError::TxRefInUse(tx)) => {
                warn!("Replay rejected: tx {} claimed concurrently", tx);
                return Err(DistributorError::TxAlreadyUsed(tx));
            }
            Err(StoreError::ClaimAttemptConflict { .. }) => {
                let current = self.reload(user_id, attempt.epoch_number).await?;
                if current.status == ClaimStatus::Claimed
                    && current.on_chain_tx_ref.as_deref() == Some(tx_ref)
                {
                    return Ok(current);
                }
                warn!(
                    "Claim completion lost: user {} epoch {} is now {}",
                    user_id, current.epoch_number, current.status
                );
                return Err(DistributorError::InvalidTransition {
                    from: current.status,
                    to: ClaimStatus::Claimed,
                });
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "Claim completed: user {} epoch {} tx {}",
            user_id, attempt.epoch_number, tx_ref
        );
        Ok(attempt)
    }

    /// Record a failed submission for a `PROCESSING` attempt.
    ///
    /// A `FAILED` attempt is returned unchanged.
    pub async fn fail(&self, user_id: &str, epoch: &EpochRef, reason: &str) -> Result<ClaimAttempt> {
        let mut attempt = self.existing_attempt(user_id, epoch).await?;

        if attempt.status == ClaimStatus::Failed {
            return Ok(attempt);
        }
        if !attempt.status.can_advance_to(ClaimStatus::Failed) {
            return Err(DistributorError::InvalidTransition {
                from: attempt.status,
                to: ClaimStatus::Failed,
            });
        }

        let from = attempt.status;
        attempt.status = ClaimStatus::Failed;
        attempt.last_error = Some(reason.to_string());
        match self.claims.update_claim_attempt(&attempt, from).await {
            Ok(()) => {}
            Err(StoreError::ClaimAttemptConflict { .. }) => {
                let current = self.reload(user_id, attempt.epoch_number).await?;
                if current.status == ClaimStatus::Failed {
                    return Ok(current);
                }
                return Err(DistributorError::InvalidTransition {
                    from: current.status,
                    to: ClaimStatus::Failed,
                });
            }
            Err(e) => return Err(e.into()),
        }

        warn!(
            "Claim failed: user {} epoch {}: {}",
            user_id, attempt.epoch_number, reason
        );
        Ok(attempt)
    }

    pub async fn claims_for_user(&self, user_id: &str) -> Result<Vec<ClaimAttempt>> {
        Ok(self.claims.claim_attempts_for_user(user_id).await?)
    }
}

fn new_attempt(leaf: &ClaimLeaf) -> NewClaimAttempt {
    NewClaimAttempt {
        user_id: leaf.user_id.clone(),
        epoch_number: leaf.epoch_number,
        amount_atomic: leaf.amount_atomic,
        leaf_index: leaf.leaf_index,
        started_at: unix_now(),
    }
}

/// Render claim history as CSV: `startedAt,epoch,amount,status,txRef`.
pub fn history_csv(attempts: &[ClaimAttempt]) -> String {
    let mut out = String::from("startedAt,epoch,amount,status,txRef\n");
    for a in attempts {
        let _ = writeln!(
            out,
            "{},{},{},{},{}",
            a.started_at,
            a.epoch_number,
            a.amount_atomic,
            a.status,
            a.on_chain_tx_ref.as_deref().unwrap_or("")
        );
    }
    out
}

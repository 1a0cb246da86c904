//! Epoch audit: re-derives a stored epoch from its leaves and reports anything
//! that no longer matches the header.

use serde::Serialize;

use claimcraft_core::{hash_to_hex, ClaimLeaf, Epoch};
use claimcraft_prover::{claim_leaf_hash, MerkleTree};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditIssue {
    LeafCountMismatch { header: u32, stored: usize },
    TotalMismatch { header: u128, stored: u128 },
    IndexGap { position: usize, leaf_index: u32 },
    InvalidProof { leaf_index: u32, user_id: String },
    RootMismatch { header: String, rebuilt: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpochAudit {
    pub epoch_number: u64,
    pub leaves_checked: usize,
    pub issues: Vec<AuditIssue>,
}

impl EpochAudit {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check an epoch header against its stored leaves (ordered by leaf index).
pub fn audit_epoch(epoch: &Epoch, leaves: &[ClaimLeaf]) -> EpochAudit {
    let mut issues = Vec::new();

    if leaves.len() != epoch.leaf_count as usize {
        issues.push(AuditIssue::LeafCountMismatch {
            header: epoch.leaf_count,
            stored: leaves.len(),
        });
    }

    let stored_total: u128 = leaves.iter().map(|l| l.amount_atomic as u128).sum();
    if stored_total != epoch.total_atomic {
        issues.push(AuditIssue::TotalMismatch {
            header: epoch.total_atomic,
            stored: stored_total,
        });
    }

    let mut hashes = Vec::with_capacity(leaves.len());
    for (position, leaf) in leaves.iter().enumerate() {
        if leaf.leaf_index as usize != position {
            issues.push(AuditIssue::IndexGap {
                position,
                leaf_index: leaf.leaf_index,
            });
        }

        let hash = claim_leaf_hash(
            &leaf.wallet,
            epoch.epoch_number,
            leaf.amount_atomic,
            leaf.leaf_index,
        );
        if !MerkleTree::verify(&epoch.root, &hash, &leaf.proof) {
            issues.push(AuditIssue::InvalidProof {
                leaf_index: leaf.leaf_index,
                user_id: leaf.user_id.clone(),
            });
        }
        hashes.push(hash);
    }

    if let Ok(tree) = MerkleTree::from_leaves(hashes) {
        if tree.root() != epoch.root {
            issues.push(AuditIssue::RootMismatch {
                header: epoch.root_hex(),
                rebuilt: hash_to_hex(&tree.root()),
            });
        }
    }

    EpochAudit {
        epoch_number: epoch.epoch_number,
        leaves_checked: leaves.len(),
        issues,
    }
}

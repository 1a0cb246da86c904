use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{hash_to_hex, CoreError, WalletAddress};

/// 32-byte hash (leaf, node or root)
pub type Hash = [u8; 32];

/// One user's aggregated entitlement for a period, in settlement atomic units.
///
/// Computed fresh per aggregation; never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimableRow {
    pub user_id: String,
    pub wallet: WalletAddress,
    pub amount_atomic: u64,
}

/// On-chain commitment state of an epoch root.
///
/// Moves `Pending -> Committed` once and never back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OnChainStatus {
    /// Root built and stored, not yet confirmed on-chain
    Pending,
    /// Root confirmed on-chain
    Committed {
        /// Transaction that published the root (operator-supplied)
        tx_ref: Option<String>,
        /// Unix seconds when the commitment was recorded
        committed_at: u64,
    },
}

impl OnChainStatus {
    pub fn is_committed(&self) -> bool {
        matches!(self, OnChainStatus::Committed { .. })
    }
}

/// A frozen, numbered snapshot of claimable entitlements for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub epoch_number: u64,
    pub period_key: String,
    #[serde(with = "hex_hash")]
    pub root: Hash,
    pub total_atomic: u128,
    pub leaf_count: u32,
    pub on_chain: OnChainStatus,
    pub created_at: u64,
}

impl Epoch {
    pub fn root_hex(&self) -> String {
        hash_to_hex(&self.root)
    }

    pub fn is_committed(&self) -> bool {
        self.on_chain.is_committed()
    }

    pub fn on_chain_tx_ref(&self) -> Option<&str> {
        match &self.on_chain {
            OnChainStatus::Committed { tx_ref, .. } => tx_ref.as_deref(),
            OnChainStatus::Pending => None,
        }
    }

    pub fn summary(&self) -> EpochSummary {
        EpochSummary {
            epoch_number: self.epoch_number,
            period_key: self.period_key.clone(),
            root_hex: self.root_hex(),
            leaf_count: self.leaf_count,
            total_atomic: self.total_atomic,
            committed_on_chain: self.is_committed(),
            on_chain_tx_ref: self.on_chain_tx_ref().map(str::to_string),
            created_at: self.created_at,
        }
    }
}

/// Flat view of an epoch header for admin and scheduler responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch_number: u64,
    pub period_key: String,
    pub root_hex: String,
    pub leaf_count: u32,
    pub total_atomic: u128,
    pub committed_on_chain: bool,
    pub on_chain_tx_ref: Option<String>,
    pub created_at: u64,
}

/// One user's leaf within an epoch. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimLeaf {
    pub epoch_number: u64,
    pub period_key: String,
    pub user_id: String,
    pub wallet: WalletAddress,
    pub leaf_index: u32,
    pub amount_atomic: u64,
    #[serde(with = "hex_hash_vec")]
    pub proof: Vec<Hash>,
}

impl ClaimLeaf {
    pub fn proof_hex(&self) -> Vec<String> {
        self.proof.iter().map(hash_to_hex).collect()
    }
}

/// Claim attempt status.
///
/// `Pending` is conceptual (no row yet). Rows start in `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    Pending,
    Processing,
    Claimed,
    Failed,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Pending => "PENDING",
            ClaimStatus::Processing => "PROCESSING",
            ClaimStatus::Claimed => "CLAIMED",
            ClaimStatus::Failed => "FAILED",
        }
    }

    /// Whether `self -> next` is a legal lifecycle step.
    pub fn can_advance_to(&self, next: ClaimStatus) -> bool {
        matches!(
            (self, next),
            (ClaimStatus::Pending, ClaimStatus::Processing)
                | (ClaimStatus::Failed, ClaimStatus::Processing)
                | (ClaimStatus::Processing, ClaimStatus::Claimed)
                | (ClaimStatus::Processing, ClaimStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ClaimStatus::Claimed)
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ClaimStatus::Pending),
            "PROCESSING" => Ok(ClaimStatus::Processing),
            "CLAIMED" => Ok(ClaimStatus::Claimed),
            "FAILED" => Ok(ClaimStatus::Failed),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// Durable record of one user's claim for one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimAttempt {
    pub id: u64,
    pub user_id: String,
    pub epoch_number: u64,
    pub amount_atomic: u64,
    pub leaf_index: u32,
    pub status: ClaimStatus,
    /// Settlement transaction that satisfied this claim (globally unique)
    pub on_chain_tx_ref: Option<String>,
    pub started_at: u64,
    pub claimed_at: Option<u64>,
    pub last_error: Option<String>,
}

/// Fields for a claim attempt that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClaimAttempt {
    pub user_id: String,
    pub epoch_number: u64,
    pub amount_atomic: u64,
    pub leaf_index: u32,
    pub started_at: u64,
}

/// Everything a wallet needs to build and submit a claim instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafProofPayload {
    pub epoch_number: u64,
    pub period_key: String,
    pub root_hex: String,
    pub wallet: WalletAddress,
    pub leaf_index: u32,
    pub amount_atomic: u64,
    pub proof: Vec<String>,
}

impl LeafProofPayload {
    pub fn from_leaf(epoch: &Epoch, leaf: &ClaimLeaf) -> Self {
        Self {
            epoch_number: epoch.epoch_number,
            period_key: epoch.period_key.clone(),
            root_hex: epoch.root_hex(),
            wallet: leaf.wallet,
            leaf_index: leaf.leaf_index,
            amount_atomic: leaf.amount_atomic,
            proof: leaf.proof_hex(),
        }
    }
}

/// Epoch selector accepted by claim-side operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpochRef {
    Number(u64),
    Period(String),
}

impl fmt::Display for EpochRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpochRef::Number(n) => write!(f, "epoch {}", n),
            EpochRef::Period(p) => write!(f, "period {}", p),
        }
    }
}

impl From<u64> for EpochRef {
    fn from(n: u64) -> Self {
        EpochRef::Number(n)
    }
}

impl From<&str> for EpochRef {
    fn from(p: &str) -> Self {
        EpochRef::Period(p.to_string())
    }
}

impl From<String> for EpochRef {
    fn from(p: String) -> Self {
        EpochRef::Period(p)
    }
}

mod hex_hash {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Hash;

    pub fn serialize<S: Serializer>(hash: &Hash, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Hash, D::Error> {
        let s = String::deserialize(d)?;
        crate::hash_from_hex(&s).map_err(serde::de::Error::custom)
    }
}

mod hex_hash_vec {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::Hash;

    pub fn serialize<S: Serializer>(hashes: &[Hash], s: S) -> Result<S::Ok, S::Error> {
        let hexes: Vec<String> = hashes.iter().map(hex::encode).collect();
        hexes.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Hash>, D::Error> {
        let hexes = Vec::<String>::deserialize(d)?;
        hexes
            .iter()
            .map(|h| crate::hash_from_hex(h).map_err(serde::de::Error::custom))
            .collect()
    }
}

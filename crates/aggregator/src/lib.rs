//! Claimcraft Aggregator
//!
//! Computes the claimable balance of every user for one reward period.
//! Reads payable, unclaimed entries from the ledger-of-record, sums them per
//! user in ledger units, resolves each user's payout wallet, and converts the
//! sum into settlement atomic units through the decimal bridge.
//!
//! The result only changes if upstream ledger data for the period changes,
//! which must not happen once an epoch has frozen it.

mod ledger;
mod sqlite;

pub use ledger::{MemoryLedger, RewardEvent, RewardStatus};
pub use sqlite::{SqliteLedger, PAID_STATUS};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use claimcraft_core::{ClaimableRow, DecimalBridge, DecimalError, WalletAddress};

/// One payable ledger credit, in ledger units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub user_id: String,
    pub amount: u64,
    pub category: String,
}

/// Wallet fields of a user record. The primary address wins when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletRecord {
    pub primary: Option<String>,
    pub fallback: Option<String>,
}

impl WalletRecord {
    pub fn new(primary: Option<&str>, fallback: Option<&str>) -> Self {
        Self {
            primary: primary.map(str::to_string),
            fallback: fallback.map(str::to_string),
        }
    }

    /// First non-blank address, trimmed.
    pub fn resolve(&self) -> Option<&str> {
        [self.primary.as_deref(), self.fallback.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|w| !w.is_empty())
    }
}

/// Read-only view of the reward ledger.
#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// Entries for `period_key` that are payable and not yet claimed.
    /// `categories` restricts the result to those reward categories.
    async fn payable_entries(
        &self,
        period_key: &str,
        categories: Option<&[String]>,
    ) -> Result<Vec<LedgerEntry>>;

    /// Most recent period key that still has payable, unclaimed entries.
    async fn latest_payable_period(&self) -> Result<Option<String>>;
}

/// User to wallet lookup.
#[async_trait]
pub trait WalletDirectory: Send + Sync {
    async fn wallet_record(&self, user_id: &str) -> Result<Option<WalletRecord>>;

    async fn resolve_wallet(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .wallet_record(user_id)
            .await?
            .and_then(|r| r.resolve().map(str::to_string)))
    }
}

/// Aggregator errors
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("Ledger query failed: {0}")]
    Ledger(String),

    #[error("Decimal conversion failed: {0}")]
    Decimal(#[from] DecimalError),

    #[error("Claimable amount for user {user_id} does not fit a leaf: {amount}")]
    AmountOverflow { user_id: String, amount: u128 },

    #[error("Ledger lock poisoned")]
    LockPoisoned,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl AggregatorError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AggregatorError::Ledger(_) | AggregatorError::Database(_) | AggregatorError::LockPoisoned
        )
    }
}

pub type Result<T> = std::result::Result<T, AggregatorError>;

/// Per-period claimables computed from the ledger.
pub struct ClaimablesAggregator {
    ledger: Arc<dyn LedgerSource>,
    wallets: Arc<dyn WalletDirectory>,
    bridge: DecimalBridge,
}

impl ClaimablesAggregator {
    pub fn new(
        ledger: Arc<dyn LedgerSource>,
        wallets: Arc<dyn WalletDirectory>,
        bridge: DecimalBridge,
    ) -> Self {
        Self {
            ledger,
            wallets,
            bridge,
        }
    }

    pub fn bridge(&self) -> &DecimalBridge {
        &self.bridge
    }

    pub async fn latest_payable_period(&self) -> Result<Option<String>> {
        self.ledger.latest_payable_period().await
    }

    /// Compute claimable rows for a period.
    ///
    /// Rows come back ordered by user id. Users with a zero sum, no wallet, or
    /// a wallet that is not a valid settlement address are dropped.
    pub async fn claimables(
        &self,
        period_key: &str,
        categories: Option<&[String]>,
    ) -> Result<Vec<ClaimableRow>> {
        let entries = self.ledger.payable_entries(period_key, categories).await?;

        let mut sums: BTreeMap<String, u128> = BTreeMap::new();
        for entry in entries {
            *sums.entry(entry.user_id).or_default() += entry.amount as u128;
        }

        let mut rows = Vec::with_capacity(sums.len());
        let mut dropped = 0usize;

        for (user_id, ledger_amount) in sums {
            if ledger_amount == 0 {
                dropped += 1;
                continue;
            }

            let wallet = match self.wallets.resolve_wallet(&user_id).await? {
                Some(w) => w,
                None => {
                    debug!("Skipping user {}: no wallet linked", user_id);
                    dropped += 1;
                    continue;
                }
            };

            let wallet: WalletAddress = match wallet.parse() {
                Ok(w) => w,
                Err(e) => {
                    warn!("Skipping user {}: {}", user_id, e);
                    dropped += 1;
                    continue;
                }
            };

            let atomic = self.bridge.to_settlement_atomic(ledger_amount)?;
            let amount_atomic = u64::try_from(atomic).map_err(|_| AggregatorError::AmountOverflow {
                user_id: user_id.clone(),
                amount: atomic,
            })?;

            rows.push(ClaimableRow {
                user_id,
                wallet,
                amount_atomic,
            });
        }

        info!(
            "Aggregated period {}: {} claimable users, {} dropped",
            period_key,
            rows.len(),
            dropped
        );

        Ok(rows)
    }
}

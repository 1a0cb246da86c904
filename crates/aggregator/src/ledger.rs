//! In-memory reward ledger.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::{AggregatorError, LedgerEntry, LedgerSource, Result, WalletDirectory, WalletRecord};

/// Payout state of a reward event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardStatus {
    /// Earned, not yet released for payout
    Pending,
    /// Owed to the user and payable through a claim epoch
    Paid,
}

/// One raw ledger credit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardEvent {
    pub user_id: String,
    pub period_key: String,
    pub amount: u64,
    pub category: String,
    pub status: RewardStatus,
    pub claimed: bool,
}

impl RewardEvent {
    fn is_payable(&self) -> bool {
        self.status == RewardStatus::Paid && !self.claimed
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    events: Vec<RewardEvent>,
    users: HashMap<String, WalletRecord>,
}

/// Ledger and wallet directory held in memory.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: RewardEvent) {
        if let Ok(mut state) = self.state.write() {
            state.events.push(event);
        }
    }

    /// Add a payable, unclaimed credit.
    pub fn credit(&self, user_id: &str, period_key: &str, amount: u64, category: &str) {
        self.push(RewardEvent {
            user_id: user_id.to_string(),
            period_key: period_key.to_string(),
            amount,
            category: category.to_string(),
            status: RewardStatus::Paid,
            claimed: false,
        });
    }

    pub fn set_wallet(&self, user_id: &str, wallet: &str) {
        self.set_wallets(user_id, Some(wallet), None);
    }

    pub fn set_wallets(&self, user_id: &str, primary: Option<&str>, fallback: Option<&str>) {
        if let Ok(mut state) = self.state.write() {
            state
                .users
                .insert(user_id.to_string(), WalletRecord::new(primary, fallback));
        }
    }

    /// Flag every payable event of a user in a period as claimed.
    pub fn mark_claimed(&self, user_id: &str, period_key: &str) -> usize {
        let Ok(mut state) = self.state.write() else {
            return 0;
        };
        let mut marked = 0;
        for event in state
            .events
            .iter_mut()
            .filter(|e| e.user_id == user_id && e.period_key == period_key && e.is_payable())
        {
            event.claimed = true;
            marked += 1;
        }
        marked
    }
}

#[async_trait]
impl LedgerSource for MemoryLedger {
    async fn payable_entries(
        &self,
        period_key: &str,
        categories: Option<&[String]>,
    ) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().map_err(|_| AggregatorError::LockPoisoned)?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.period_key == period_key && e.is_payable())
            .filter(|e| categories.map_or(true, |c| c.contains(&e.category)))
            .map(|e| LedgerEntry {
                user_id: e.user_id.clone(),
                amount: e.amount,
                category: e.category.clone(),
            })
            .collect())
    }

    async fn latest_payable_period(&self) -> Result<Option<String>> {
        let state = self.state.read().map_err(|_| AggregatorError::LockPoisoned)?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.is_payable())
            .map(|e| e.period_key.clone())
            .max())
    }
}

#[async_trait]
impl WalletDirectory for MemoryLedger {
    async fn wallet_record(&self, user_id: &str) -> Result<Option<WalletRecord>> {
        let state = self.state.read().map_err(|_| AggregatorError::LockPoisoned)?;
        Ok(state.users.get(user_id).cloned())
    }
}

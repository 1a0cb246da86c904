//! Ledger adapter over an SQLite reward database.
//!
//! Expected tables:
//!
//! ```text
//! reward_events(user_id TEXT, period_key TEXT, amount INTEGER, category TEXT,
//!               status TEXT, claimed_at INTEGER NULL)
//! users(id TEXT PRIMARY KEY, primary_wallet TEXT NULL, fallback_wallet TEXT NULL)
//! ```
//!
//! An event is payable when `status = 'PAID'` and `claimed_at IS NULL`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::{AggregatorError, LedgerEntry, LedgerSource, Result, WalletDirectory, WalletRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS reward_events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    TEXT NOT NULL,
    period_key TEXT NOT NULL,
    amount     INTEGER NOT NULL,
    category   TEXT NOT NULL,
    status     TEXT NOT NULL,
    claimed_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_reward_events_period ON reward_events(period_key, status);

CREATE TABLE IF NOT EXISTS users (
    id              TEXT PRIMARY KEY,
    primary_wallet  TEXT,
    fallback_wallet TEXT
);
";

pub const PAID_STATUS: &str = "PAID";

#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened reward ledger at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| AggregatorError::LockPoisoned)
    }

    pub fn insert_event(
        &self,
        user_id: &str,
        period_key: &str,
        amount: u64,
        category: &str,
        status: &str,
    ) -> Result<()> {
        let amount = i64::try_from(amount)
            .map_err(|_| AggregatorError::Ledger(format!("amount {} out of range", amount)))?;
        self.conn()?.execute(
            "INSERT INTO reward_events (user_id, period_key, amount, category, status) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, period_key, amount, category, status],
        )?;
        Ok(())
    }

    pub fn upsert_user(
        &self,
        user_id: &str,
        primary_wallet: Option<&str>,
        fallback_wallet: Option<&str>,
    ) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO users (id, primary_wallet, fallback_wallet) VALUES (?1, ?2, ?3) \
             ON CONFLICT(id) DO UPDATE SET primary_wallet = excluded.primary_wallet, \
                                           fallback_wallet = excluded.fallback_wallet",
            params![user_id, primary_wallet, fallback_wallet],
        )?;
        Ok(())
    }
}

#[async_trait]
impl LedgerSource for SqliteLedger {
    async fn payable_entries(
        &self,
        period_key: &str,
        categories: Option<&[String]>,
    ) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, amount, category FROM reward_events \
             WHERE period_key = ?1 AND status = ?2 AND claimed_at IS NULL",
        )?;
        let rows = stmt.query_map(params![period_key, PAID_STATUS], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (user_id, amount, category) = row?;
            if let Some(allowed) = categories {
                if !allowed.contains(&category) {
                    continue;
                }
            }
            let amount = u64::try_from(amount).map_err(|_| {
                AggregatorError::Ledger(format!("negative amount {} for user {}", amount, user_id))
            })?;
            entries.push(LedgerEntry {
                user_id,
                amount,
                category,
            });
        }
        Ok(entries)
    }

    async fn latest_payable_period(&self) -> Result<Option<String>> {
        let conn = self.conn()?;
        let period = conn
            .query_row(
                "SELECT period_key FROM reward_events \
                 WHERE status = ?1 AND claimed_at IS NULL \
                 ORDER BY period_key DESC LIMIT 1",
                params![PAID_STATUS],
                |row| row.get(0),
            )
            .optional()?;
        Ok(period)
    }
}

#[async_trait]
impl WalletDirectory for SqliteLedger {
    async fn wallet_record(&self, user_id: &str) -> Result<Option<WalletRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT primary_wallet, fallback_wallet FROM users WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(WalletRecord {
                        primary: row.get(0)?,
                        fallback: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

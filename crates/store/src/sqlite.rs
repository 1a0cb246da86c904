//! SQLite store backend.
//!
//! Amounts are stored as decimal TEXT because settlement atomic values can
//! exceed the signed 64-bit range of an SQLite INTEGER.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Params, Row, TransactionBehavior,
};
use tracing::{debug, info, warn};

use claimcraft_core::{
    hash_from_hex, hash_to_hex, unix_now, ClaimAttempt, ClaimLeaf, ClaimStatus, Epoch,
    NewClaimAttempt, OnChainStatus, WalletAddress,
};

use crate::{
    validate_new_epoch, BuildLock, ClaimStore, EpochStore, NewEpoch, Result, StoreError,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS claim_epochs (
    epoch_number       INTEGER PRIMARY KEY,
    period_key         TEXT NOT NULL,
    root_hex           TEXT NOT NULL,
    total_atomic       TEXT NOT NULL,
    leaf_count         INTEGER NOT NULL,
    committed_on_chain INTEGER NOT NULL DEFAULT 0,
    on_chain_tx_ref    TEXT,
    committed_at       INTEGER,
    created_at         INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_claim_epochs_period ON claim_epochs(period_key);

CREATE TABLE IF NOT EXISTS claim_leaves (
    epoch_number  INTEGER NOT NULL REFERENCES claim_epochs(epoch_number),
    period_key    TEXT NOT NULL,
    user_id       TEXT NOT NULL,
    wallet        TEXT NOT NULL,
    leaf_index    INTEGER NOT NULL,
    amount_atomic TEXT NOT NULL,
    proof_json    TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_claim_leaves_user ON claim_leaves(epoch_number, user_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_claim_leaves_index ON claim_leaves(epoch_number, leaf_index);
CREATE INDEX IF NOT EXISTS idx_claim_leaves_wallet ON claim_leaves(epoch_number, wallet);

CREATE TABLE IF NOT EXISTS claim_attempts (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         TEXT NOT NULL,
    epoch_number    INTEGER NOT NULL,
    amount_atomic   TEXT NOT NULL,
    leaf_index      INTEGER NOT NULL,
    status          TEXT NOT NULL,
    on_chain_tx_ref TEXT,
    started_at      INTEGER NOT NULL,
    claimed_at      INTEGER,
    last_error      TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_claim_attempts_user_epoch ON claim_attempts(user_id, epoch_number);
CREATE UNIQUE INDEX IF NOT EXISTS idx_claim_attempts_tx_ref ON claim_attempts(on_chain_tx_ref);

CREATE TABLE IF NOT EXISTS build_locks (
    lock_key    INTEGER PRIMARY KEY,
    holder      TEXT NOT NULL,
    acquired_at INTEGER NOT NULL
);
";

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

const EPOCH_COLUMNS: &str = "epoch_number, period_key, root_hex, total_atomic, leaf_count, \
     committed_on_chain, on_chain_tx_ref, committed_at, created_at";

const LEAF_COLUMNS: &str =
    "epoch_number, period_key, user_id, wallet, leaf_index, amount_atomic, proof_json";

const ATTEMPT_COLUMNS: &str = "id, user_id, epoch_number, amount_atomic, leaf_index, status, \
     on_chain_tx_ref, started_at, claimed_at, last_error";

/// Store backed by a single SQLite database file.
///
/// The build lock is a row in `build_locks`, so it also excludes builders in
/// other processes sharing the same file. A lock row older than the
/// configured TTL is treated as abandoned and taken over.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    holder: String,
    lock_ttl_secs: u64,
}

impl SqliteStore {
    pub const DEFAULT_LOCK_TTL_SECS: u64 = 900;

    /// Open (or create) a database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        info!("Opened claim store at {}", path.display());
        Self::from_connection(conn)
    }

    /// Private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            holder: format!(
                "pid-{}-{}-{}",
                std::process::id(),
                unix_now(),
                NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
            ),
            lock_ttl_secs: Self::DEFAULT_LOCK_TTL_SECS,
        })
    }

    /// Age in seconds after which a build lock may be taken over. 0 disables takeover.
    pub fn with_lock_ttl(mut self, secs: u64) -> Self {
        self.lock_ttl_secs = secs;
        self
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn next_number(conn: &Connection) -> Result<u64> {
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(epoch_number), 0) FROM claim_epochs",
            [],
            |row| row.get(0),
        )?;
        Ok(from_sql_int(max, "epoch_number")? + 1)
    }

    fn load_epoch(conn: &Connection, filter: &str, value: &dyn rusqlite::ToSql) -> Result<Option<Epoch>> {
        let sql = format!("SELECT {} FROM claim_epochs WHERE {} = ?1", EPOCH_COLUMNS, filter);
        conn.query_row(&sql, [value], EpochRow::from_row)
            .optional()?
            .map(EpochRow::into_epoch)
            .transpose()
    }

    fn load_leaves(conn: &Connection, sql: &str, args: impl Params) -> Result<Vec<ClaimLeaf>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, LeafRow::from_row)?;
        let mut leaves = Vec::new();
        for row in rows {
            leaves.push(row?.into_leaf()?);
        }
        Ok(leaves)
    }
}

#[async_trait]
impl EpochStore for SqliteStore {
    async fn epoch_by_number(&self, epoch_number: u64) -> Result<Option<Epoch>> {
        let conn = self.conn()?;
        Self::load_epoch(&conn, "epoch_number", &to_sql_int(epoch_number)?)
    }

    async fn epoch_by_period(&self, period_key: &str) -> Result<Option<Epoch>> {
        let conn = self.conn()?;
        Self::load_epoch(&conn, "period_key", &period_key)
    }

    async fn latest_epoch(&self) -> Result<Option<Epoch>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM claim_epochs ORDER BY epoch_number DESC LIMIT 1",
            EPOCH_COLUMNS
        );
        conn.query_row(&sql, [], EpochRow::from_row)
            .optional()?
            .map(EpochRow::into_epoch)
            .transpose()
    }

    async fn next_epoch_number(&self) -> Result<u64> {
        let conn = self.conn()?;
        Self::next_number(&conn)
    }

    async fn uncommitted_epochs(&self) -> Result<Vec<Epoch>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM claim_epochs WHERE committed_on_chain = 0 ORDER BY epoch_number ASC",
            EPOCH_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], EpochRow::from_row)?;
        let mut epochs = Vec::new();
        for row in rows {
            epochs.push(row?.into_epoch()?);
        }
        Ok(epochs)
    }

    async fn insert_epoch(&self, epoch: NewEpoch, leaves: Vec<ClaimLeaf>) -> Result<Epoch> {
        validate_new_epoch(&epoch, &leaves)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let next = Self::next_number(&tx)?;
        if epoch.epoch_number != next {
            return Err(StoreError::EpochNumberConflict {
                expected: epoch.epoch_number,
                next,
            });
        }
        if Self::load_epoch(&tx, "period_key", &epoch.period_key)?.is_some() {
            return Err(StoreError::PeriodExists(epoch.period_key));
        }

        let epoch_number = to_sql_int(epoch.epoch_number)?;
        tx.execute(
            "INSERT INTO claim_epochs (epoch_number, period_key, root_hex, total_atomic, \
                                       leaf_count, committed_on_chain, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                epoch_number,
                epoch.period_key,
                hash_to_hex(&epoch.root),
                epoch.total_atomic.to_string(),
                epoch.leaf_count,
                to_sql_int(epoch.created_at)?,
            ],
        )?;

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO claim_leaves ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                LEAF_COLUMNS
            ))?;
            for leaf in &leaves {
                let proof_json = serde_json::to_string(&leaf.proof_hex())
                    .map_err(|e| StoreError::Corrupt(format!("proof encoding: {}", e)))?;
                stmt.execute(params![
                    epoch_number,
                    leaf.period_key,
                    leaf.user_id,
                    leaf.wallet.to_base58(),
                    leaf.leaf_index,
                    leaf.amount_atomic.to_string(),
                    proof_json,
                ])?;
            }
        }

        let stored = Self::load_epoch(&tx, "epoch_number", &epoch_number)?
            .ok_or(StoreError::EpochNotFound(epoch.epoch_number))?;
        tx.commit()?;

        info!(
            "Stored epoch {} ({}) root={} leaves={}",
            stored.epoch_number,
            stored.period_key,
            &stored.root_hex()[..16],
            stored.leaf_count
        );
        Ok(stored)
    }

    async fn mark_committed(
        &self,
        epoch_number: u64,
        tx_ref: Option<String>,
        committed_at: u64,
    ) -> Result<Epoch> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let key = to_sql_int(epoch_number)?;

        let current = Self::load_epoch(&tx, "epoch_number", &key)?
            .ok_or(StoreError::EpochNotFound(epoch_number))?;
        if current.is_committed() {
            return Ok(current);
        }

        tx.execute(
            "UPDATE claim_epochs SET committed_on_chain = 1, on_chain_tx_ref = ?2, committed_at = ?3 \
             WHERE epoch_number = ?1 AND committed_on_chain = 0",
            params![key, tx_ref, to_sql_int(committed_at)?],
        )?;
        let updated = Self::load_epoch(&tx, "epoch_number", &key)?
            .ok_or(StoreError::EpochNotFound(epoch_number))?;
        tx.commit()?;

        debug!("Epoch {} marked committed", epoch_number);
        Ok(updated)
    }

    async fn leaf_for_user(&self, epoch_number: u64, user_id: &str) -> Result<Option<ClaimLeaf>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM claim_leaves WHERE epoch_number = ?1 AND user_id = ?2",
            LEAF_COLUMNS
        );
        let leaves = Self::load_leaves(&conn, &sql, params![to_sql_int(epoch_number)?, user_id])?;
        Ok(leaves.into_iter().next())
    }

    async fn leaf_for_wallet(
        &self,
        epoch_number: u64,
        wallet: &WalletAddress,
    ) -> Result<Option<ClaimLeaf>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM claim_leaves WHERE epoch_number = ?1 AND wallet = ?2 \
             ORDER BY leaf_index ASC LIMIT 1",
            LEAF_COLUMNS
        );
        let leaves = Self::load_leaves(
            &conn,
            &sql,
            params![to_sql_int(epoch_number)?, wallet.to_base58()],
        )?;
        Ok(leaves.into_iter().next())
    }

    async fn leaves(&self, epoch_number: u64) -> Result<Vec<ClaimLeaf>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM claim_leaves WHERE epoch_number = ?1 ORDER BY leaf_index ASC",
            LEAF_COLUMNS
        );
        Self::load_leaves(&conn, &sql, params![to_sql_int(epoch_number)?])
    }
}

#[async_trait]
impl ClaimStore for SqliteStore {
    async fn claim_attempt(&self, user_id: &str, epoch_number: u64) -> Result<Option<ClaimAttempt>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM claim_attempts WHERE user_id = ?1 AND epoch_number = ?2",
            ATTEMPT_COLUMNS
        );
        conn.query_row(&sql, params![user_id, to_sql_int(epoch_number)?], AttemptRow::from_row)
            .optional()?
            .map(AttemptRow::into_attempt)
            .transpose()
    }

    async fn claim_attempt_by_tx_ref(&self, tx_ref: &str) -> Result<Option<ClaimAttempt>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM claim_attempts WHERE on_chain_tx_ref = ?1",
            ATTEMPT_COLUMNS
        );
        conn.query_row(&sql, params![tx_ref], AttemptRow::from_row)
            .optional()?
            .map(AttemptRow::into_attempt)
            .transpose()
    }

    async fn insert_claim_attempt(&self, attempt: NewClaimAttempt) -> Result<ClaimAttempt> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO claim_attempts (user_id, epoch_number, amount_atomic, leaf_index, status, started_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                attempt.user_id,
                to_sql_int(attempt.epoch_number)?,
                attempt.amount_atomic.to_string(),
                attempt.leaf_index,
                ClaimStatus::Processing.as_str(),
                to_sql_int(attempt.started_at)?,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(StoreError::DuplicateClaimAttempt {
                    user_id: attempt.user_id,
                    epoch_number: attempt.epoch_number,
                });
            }
            Err(e) => return Err(e.into()),
        }

        let id = from_sql_int(conn.last_insert_rowid(), "id")?;
        Ok(ClaimAttempt {
            id,
            user_id: attempt.user_id,
            epoch_number: attempt.epoch_number,
            amount_atomic: attempt.amount_atomic,
            leaf_index: attempt.leaf_index,
            status: ClaimStatus::Processing,
            on_chain_tx_ref: None,
            started_at: attempt.started_at,
            claimed_at: None,
            last_error: None,
        })
    }

    async fn update_claim_attempt(
        &self,
        attempt: &ClaimAttempt,
        expected: ClaimStatus,
    ) -> Result<()> {
        let conn = self.conn()?;
        let id = to_sql_int(attempt.id)?;
        let claimed_at = attempt.claimed_at.map(to_sql_int).transpose()?;
        let updated = conn.execute(
            "UPDATE claim_attempts SET amount_atomic = ?2, leaf_index = ?3, status = ?4, \
                    on_chain_tx_ref = ?5, started_at = ?6, claimed_at = ?7, last_error = ?8 \
             WHERE id = ?1 AND status = ?9",
            params![
                id,
                attempt.amount_atomic.to_string(),
                attempt.leaf_index,
                attempt.status.as_str(),
                attempt.on_chain_tx_ref,
                to_sql_int(attempt.started_at)?,
                claimed_at,
                attempt.last_error,
                expected.as_str(),
            ],
        );

        match updated {
            Ok(0) => {
                let actual: Option<String> = conn
                    .query_row(
                        "SELECT status FROM claim_attempts WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                match actual {
                    Some(actual) => Err(StoreError::ClaimAttemptConflict {
                        id: attempt.id,
                        expected,
                        actual: actual.parse().map_err(|e| {
                            StoreError::Corrupt(format!("attempt {}: {}", attempt.id, e))
                        })?,
                    }),
                    None => Err(StoreError::ClaimAttemptNotFound(attempt.id)),
                }
            }
            Ok(_) => {
                debug!("Claim attempt {}: {} -> {}", attempt.id, expected, attempt.status);
                Ok(())
            }
            Err(e) if is_constraint_violation(&e) => Err(StoreError::TxRefInUse(
                attempt.on_chain_tx_ref.clone().unwrap_or_default(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn claim_attempts_for_user(&self, user_id: &str) -> Result<Vec<ClaimAttempt>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM claim_attempts WHERE user_id = ?1 ORDER BY started_at DESC, id DESC",
            ATTEMPT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], AttemptRow::from_row)?;
        let mut attempts = Vec::new();
        for row in rows {
            attempts.push(row?.into_attempt()?);
        }
        Ok(attempts)
    }
}

#[async_trait]
impl BuildLock for SqliteStore {
    async fn try_acquire(&self, key: i64) -> Result<bool> {
        let now = to_sql_int(unix_now())?;
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if self.lock_ttl_secs > 0 {
            let cutoff = now - to_sql_int(self.lock_ttl_secs)?;
            let stale = tx.execute(
                "DELETE FROM build_locks WHERE lock_key = ?1 AND acquired_at < ?2",
                params![key, cutoff],
            )?;
            if stale > 0 {
                warn!("Taking over stale build lock {}", key);
            }
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO build_locks (lock_key, holder, acquired_at) VALUES (?1, ?2, ?3)",
            params![key, self.holder, now],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
    }

    async fn release(&self, key: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM build_locks WHERE lock_key = ?1 AND holder = ?2",
            params![key, self.holder],
        )?;
        Ok(())
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{} exceeds the sqlite integer range", value)))
}

fn from_sql_int(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {}: {}", field, value)))
}

fn parse_amount<T: std::str::FromStr>(value: &str, field: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("bad {}: {}", field, value)))
}

struct EpochRow {
    epoch_number: i64,
    period_key: String,
    root_hex: String,
    total_atomic: String,
    leaf_count: u32,
    committed: bool,
    tx_ref: Option<String>,
    committed_at: Option<i64>,
    created_at: i64,
}

impl EpochRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            epoch_number: row.get(0)?,
            period_key: row.get(1)?,
            root_hex: row.get(2)?,
            total_atomic: row.get(3)?,
            leaf_count: row.get(4)?,
            committed: row.get(5)?,
            tx_ref: row.get(6)?,
            committed_at: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_epoch(self) -> Result<Epoch> {
        let root = hash_from_hex(&self.root_hex)
            .map_err(|e| StoreError::Corrupt(format!("epoch {} root: {}", self.epoch_number, e)))?;
        let on_chain = if self.committed {
            OnChainStatus::Committed {
                tx_ref: self.tx_ref,
                committed_at: from_sql_int(self.committed_at.unwrap_or(0), "committed_at")?,
            }
        } else {
            OnChainStatus::Pending
        };
        Ok(Epoch {
            epoch_number: from_sql_int(self.epoch_number, "epoch_number")?,
            period_key: self.period_key,
            root,
            total_atomic: parse_amount(&self.total_atomic, "total_atomic")?,
            leaf_count: self.leaf_count,
            on_chain,
            created_at: from_sql_int(self.created_at, "created_at")?,
        })
    }
}

struct LeafRow {
    epoch_number: i64,
    period_key: String,
    user_id: String,
    wallet: String,
    leaf_index: u32,
    amount_atomic: String,
    proof_json: String,
}

impl LeafRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            epoch_number: row.get(0)?,
            period_key: row.get(1)?,
            user_id: row.get(2)?,
            wallet: row.get(3)?,
            leaf_index: row.get(4)?,
            amount_atomic: row.get(5)?,
            proof_json: row.get(6)?,
        })
    }

    fn into_leaf(self) -> Result<ClaimLeaf> {
        let wallet: WalletAddress = self
            .wallet
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("leaf wallet: {}", e)))?;
        let proof_hex: Vec<String> = serde_json::from_str(&self.proof_json)
            .map_err(|e| StoreError::Corrupt(format!("leaf proof: {}", e)))?;
        let proof = proof_hex
            .iter()
            .map(|h| hash_from_hex(h))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Corrupt(format!("leaf proof: {}", e)))?;

        Ok(ClaimLeaf {
            epoch_number: from_sql_int(self.epoch_number, "epoch_number")?,
            period_key: self.period_key,
            user_id: self.user_id,
            wallet,
            leaf_index: self.leaf_index,
            amount_atomic: parse_amount(&self.amount_atomic, "amount_atomic")?,
            proof,
        })
    }
}

struct AttemptRow {
    id: i64,
    user_id: String,
    epoch_number: i64,
    amount_atomic: String,
    leaf_index: u32,
    status: String,
    tx_ref: Option<String>,
    started_at: i64,
    claimed_at: Option<i64>,
    last_error: Option<String>,
}

impl AttemptRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            epoch_number: row.get(2)?,
            amount_atomic: row.get(3)?,
            leaf_index: row.get(4)?,
            status: row.get(5)?,
            tx_ref: row.get(6)?,
            started_at: row.get(7)?,
            claimed_at: row.get(8)?,
            last_error: row.get(9)?,
        })
    }

    fn into_attempt(self) -> Result<ClaimAttempt> {
        let status: ClaimStatus = self
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("attempt {}: {}", self.id, e)))?;
        Ok(ClaimAttempt {
            id: from_sql_int(self.id, "id")?,
            user_id: self.user_id,
            epoch_number: from_sql_int(self.epoch_number, "epoch_number")?,
            amount_atomic: parse_amount(&self.amount_atomic, "amount_atomic")?,
            leaf_index: self.leaf_index,
            status,
            on_chain_tx_ref: self.tx_ref,
            started_at: from_sql_int(self.started_at, "started_at")?,
            claimed_at: self.claimed_at.map(|t| from_sql_int(t, "claimed_at")).transpose()?,
            last_error: self.last_error,
        })
    }
}

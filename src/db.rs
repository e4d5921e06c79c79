//! SQLite store shared by the ledger, market and insurance layers.
//!
//! One connection guarded by an async mutex. Every balance-mutating operation takes the
//! mutex, opens an `IMMEDIATE` transaction (which takes SQLite's write lock up front) and
//! releases both at commit/rollback, so a single operation never interleaves with another.

use crate::entity::{EntityKind, EntityRef};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rusqlite::{types::Type, Connection, OpenFlags, Row, Transaction, TransactionBehavior};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS currencies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    symbol TEXT NOT NULL UNIQUE,
    is_system_currency INTEGER NOT NULL DEFAULT 0,
    precision INTEGER NOT NULL DEFAULT 2,
    issuer_kind TEXT,
    issuer_id INTEGER,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    accountable_kind TEXT NOT NULL,
    accountable_id INTEGER NOT NULL,
    currency_id INTEGER NOT NULL REFERENCES currencies(id),
    balance TEXT NOT NULL DEFAULT '0',
    lock_version INTEGER NOT NULL DEFAULT 0,
    settlement_id INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (accountable_kind, accountable_id, currency_id)
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    recipient_kind TEXT NOT NULL,
    recipient_id INTEGER NOT NULL,
    amount TEXT NOT NULL,
    transaction_type TEXT NOT NULL,
    currency_id INTEGER NOT NULL REFERENCES currencies(id),
    description TEXT,
    reference TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id, id);
CREATE INDEX IF NOT EXISTS idx_transactions_reference ON transactions(reference);

CREATE TABLE IF NOT EXISTS exchange_rates (
    from_currency_id INTEGER NOT NULL REFERENCES currencies(id),
    to_currency_id INTEGER NOT NULL REFERENCES currencies(id),
    rate TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (from_currency_id, to_currency_id)
);

CREATE TABLE IF NOT EXISTS bonds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issuer_kind TEXT NOT NULL,
    issuer_id INTEGER NOT NULL,
    holder_kind TEXT NOT NULL,
    holder_id INTEGER NOT NULL,
    amount TEXT NOT NULL,
    currency_id INTEGER NOT NULL REFERENCES currencies(id),
    status TEXT NOT NULL,
    description TEXT,
    issued_at TEXT NOT NULL,
    due_at TEXT
);

CREATE TABLE IF NOT EXISTS bond_repayments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bond_id INTEGER NOT NULL REFERENCES bonds(id),
    amount TEXT NOT NULL,
    currency_id INTEGER NOT NULL REFERENCES currencies(id),
    description TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_bond_repayments_bond ON bond_repayments(bond_id);

CREATE TABLE IF NOT EXISTS marketplaces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    settlement_id INTEGER NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS market_conditions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    marketplace_id INTEGER NOT NULL REFERENCES marketplaces(id),
    resource TEXT NOT NULL,
    supply INTEGER NOT NULL DEFAULT 1,
    demand INTEGER NOT NULL DEFAULT 1,
    UNIQUE (marketplace_id, resource)
);

CREATE TABLE IF NOT EXISTS market_orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    market_condition_id INTEGER NOT NULL REFERENCES market_conditions(id),
    base_settlement_id INTEGER NOT NULL,
    orderable_kind TEXT NOT NULL,
    orderable_id INTEGER NOT NULL,
    order_type TEXT NOT NULL,
    resource TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    initial_quantity INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_market_orders_condition ON market_orders(market_condition_id, id);

CREATE TABLE IF NOT EXISTS price_histories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    market_condition_id INTEGER NOT NULL REFERENCES market_conditions(id),
    price TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_price_histories_condition ON price_histories(market_condition_id, id DESC);

CREATE TABLE IF NOT EXISTS market_trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    market_condition_id INTEGER NOT NULL REFERENCES market_conditions(id),
    order_id INTEGER NOT NULL REFERENCES market_orders(id),
    seller_kind TEXT NOT NULL,
    seller_id INTEGER NOT NULL,
    buyer_kind TEXT NOT NULL,
    buyer_id INTEGER NOT NULL,
    resource TEXT NOT NULL,
    volume INTEGER NOT NULL,
    price TEXT NOT NULL,
    gross_value TEXT NOT NULL,
    tax_paid TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS supply_chains (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trade_id INTEGER NOT NULL REFERENCES market_trades(id),
    resource TEXT NOT NULL,
    volume INTEGER NOT NULL,
    origin_kind TEXT NOT NULL,
    origin_id INTEGER NOT NULL,
    destination_kind TEXT NOT NULL,
    destination_id INTEGER NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS insurance_corporations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    identifier TEXT NOT NULL UNIQUE,
    risk_models TEXT NOT NULL DEFAULT '{}',
    pricing_models TEXT NOT NULL DEFAULT '{}',
    reserve_requirements TEXT NOT NULL DEFAULT '{}',
    market_share REAL NOT NULL DEFAULT 0,
    reputation_score REAL NOT NULL DEFAULT 1,
    solvency_ratio REAL NOT NULL DEFAULT 1,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS insurance_policies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    corporation_id INTEGER NOT NULL REFERENCES insurance_corporations(id),
    holder_kind TEXT NOT NULL,
    holder_id INTEGER NOT NULL,
    contract_reference TEXT,
    tier TEXT NOT NULL,
    contract_value TEXT NOT NULL,
    coverage_amount TEXT NOT NULL,
    premium_amount TEXT NOT NULL,
    deductible TEXT NOT NULL,
    coverage_percentage TEXT NOT NULL,
    risk_factors TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_insurance_policies_corp ON insurance_policies(corporation_id, status);

CREATE TABLE IF NOT EXISTS claim_payouts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    policy_id INTEGER NOT NULL REFERENCES insurance_policies(id),
    loss_amount TEXT NOT NULL,
    payout TEXT NOT NULL,
    risk_score REAL NOT NULL,
    decision TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// Handle to the economy database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) a file-backed store and apply the schema.
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open economy database at {}", db_path))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let store = Self::from_connection(conn)?;
        info!(db_path, "economy database initialized");
        Ok(store)
    }

    /// In-memory store, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory economy db")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize economy schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Run `f` inside one `IMMEDIATE` transaction. Commits on `Ok`, rolls back on `Err`.
    pub(crate) async fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<rusqlite::Error>,
    {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Column helpers. Decimals are stored as TEXT, timestamps as RFC 3339.
// ---------------------------------------------------------------------------

pub(crate) fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(idx, &raw)
}

pub(crate) fn opt_timestamp_at(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_timestamp(idx, &s)).transpose()
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse an enum-like TEXT column through its `FromStr` impl.
pub(crate) fn parsed_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn entity_at(
    row: &Row<'_>,
    kind_idx: usize,
    id_idx: usize,
) -> rusqlite::Result<EntityRef> {
    let kind: EntityKind = parsed_at(row, kind_idx)?;
    Ok(EntityRef::new(kind, row.get(id_idx)?))
}

pub(crate) fn opt_entity_at(
    row: &Row<'_>,
    kind_idx: usize,
    id_idx: usize,
) -> rusqlite::Result<Option<EntityRef>> {
    let kind: Option<String> = row.get(kind_idx)?;
    match kind {
        None => Ok(None),
        Some(_) => entity_at(row, kind_idx, id_idx).map(Some),
    }
}

pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_schema_applies_to_file_store_twice() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();

        let store = Store::open(db_path).unwrap();
        drop(store);
        // Re-opening an existing database must be a no-op for the schema.
        let store = Store::open(db_path).unwrap();

        let conn = store.lock().await;
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('accounts', 'transactions', 'market_orders')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }
}

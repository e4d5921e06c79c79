use super::{Ledger, LedgerError};
use crate::db::{is_constraint_violation, opt_entity_at, timestamp_at};
use crate::entity::EntityRef;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const MAX_PRECISION: u32 = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Currency {
    pub id: i64,
    pub name: String,
    pub symbol: String,
    pub is_system_currency: bool,
    pub precision: u32,
    pub issuer: Option<EntityRef>,
    pub created_at: DateTime<Utc>,
}

/// Attributes for a currency that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewCurrency {
    pub name: String,
    pub symbol: String,
    pub precision: u32,
    pub is_system_currency: bool,
    pub issuer: Option<EntityRef>,
}

impl NewCurrency {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            precision: 2,
            is_system_currency: false,
            issuer: None,
        }
    }

    pub fn system(mut self) -> Self {
        self.is_system_currency = true;
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    pub fn issued_by(mut self, issuer: EntityRef) -> Self {
        self.issuer = Some(issuer);
        self
    }

    fn validated(mut self) -> Result<Self, LedgerError> {
        self.name = self.name.trim().to_string();
        self.symbol = normalize_symbol(&self.symbol);

        if self.name.is_empty() {
            return Err(LedgerError::InvalidCurrency("name is required".into()));
        }
        let symbol_ok = (2..=5).contains(&self.symbol.len())
            && self
                .symbol
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if !symbol_ok {
            return Err(LedgerError::InvalidCurrency(format!(
                "symbol {:?} must be 2-5 uppercase letters or digits",
                self.symbol
            )));
        }
        if self.precision > MAX_PRECISION {
            return Err(LedgerError::InvalidCurrency(format!(
                "precision {} exceeds {}",
                self.precision, MAX_PRECISION
            )));
        }
        Ok(self)
    }
}

pub(crate) fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

const CURRENCY_COLUMNS: &str =
    "id, name, symbol, is_system_currency, precision, issuer_kind, issuer_id, created_at";

fn currency_from_row(row: &Row<'_>) -> rusqlite::Result<Currency> {
    Ok(Currency {
        id: row.get(0)?,
        name: row.get(1)?,
        symbol: row.get(2)?,
        is_system_currency: row.get::<_, i64>(3)? == 1,
        precision: row.get(4)?,
        issuer: opt_entity_at(row, 5, 6)?,
        created_at: timestamp_at(row, 7)?,
    })
}

pub(crate) fn currency_by_symbol(conn: &Connection, symbol: &str) -> Result<Currency, LedgerError> {
    let symbol = normalize_symbol(symbol);
    conn.query_row(
        &format!("SELECT {} FROM currencies WHERE symbol = ?1", CURRENCY_COLUMNS),
        [&symbol],
        currency_from_row,
    )
    .optional()?
    .ok_or(LedgerError::CurrencyNotFound(symbol))
}

pub(crate) fn currency_by_id(conn: &Connection, id: i64) -> Result<Currency, LedgerError> {
    conn.query_row(
        &format!("SELECT {} FROM currencies WHERE id = ?1", CURRENCY_COLUMNS),
        [id],
        currency_from_row,
    )
    .optional()?
    .ok_or_else(|| LedgerError::CurrencyNotFound(format!("#{}", id)))
}

fn insert_currency(conn: &Connection, new: &NewCurrency) -> Result<Currency, LedgerError> {
    let now = Utc::now();
    let inserted = conn.execute(
        "INSERT INTO currencies (name, symbol, is_system_currency, precision, issuer_kind, issuer_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            new.name,
            new.symbol,
            new.is_system_currency as i64,
            new.precision,
            new.issuer.map(|e| e.kind.as_str()),
            new.issuer.map(|e| e.id),
            now.to_rfc3339(),
        ],
    );
    match inserted {
        Ok(_) => Ok(Currency {
            id: conn.last_insert_rowid(),
            name: new.name.clone(),
            symbol: new.symbol.clone(),
            is_system_currency: new.is_system_currency,
            precision: new.precision,
            issuer: new.issuer,
            created_at: now,
        }),
        Err(e) if is_constraint_violation(&e) => {
            Err(LedgerError::DuplicateCurrency(new.symbol.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

impl Ledger {
    /// Register a new currency. Name and symbol must both be unused.
    pub async fn create_currency(&self, new: NewCurrency) -> Result<Currency, LedgerError> {
        let new = new.validated()?;
        let currency = self.store.write(|tx| insert_currency(tx, &new)).await?;
        info!(
            currency_id = currency.id,
            symbol = %currency.symbol,
            system = currency.is_system_currency,
            "currency created"
        );
        Ok(currency)
    }

    /// Return the currency with this symbol, creating it if needed.
    pub async fn find_or_create_currency(&self, new: NewCurrency) -> Result<Currency, LedgerError> {
        let new = new.validated()?;
        self.store
            .write(|tx| match currency_by_symbol(tx, &new.symbol) {
                Ok(existing) => Ok(existing),
                Err(LedgerError::CurrencyNotFound(_)) => insert_currency(tx, &new),
                Err(e) => Err(e),
            })
            .await
    }

    /// Look up a currency by symbol; `None` if it was never registered.
    pub async fn find_currency(&self, symbol: &str) -> Result<Option<Currency>, LedgerError> {
        let conn = self.store.lock().await;
        match currency_by_symbol(&conn, symbol) {
            Ok(currency) => Ok(Some(currency)),
            Err(LedgerError::CurrencyNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn currency(&self, id: i64) -> Result<Currency, LedgerError> {
        let conn = self.store.lock().await;
        currency_by_id(&conn, id)
    }

    pub async fn currencies(&self) -> Result<Vec<Currency>, LedgerError> {
        let conn = self.store.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM currencies ORDER BY id",
            CURRENCY_COLUMNS
        ))?;
        let rows = stmt.query_map([], currency_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

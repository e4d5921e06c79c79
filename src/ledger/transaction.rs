use super::{Ledger, LedgerError};
use crate::db::{decimal_at, entity_at, parsed_at, timestamp_at};
use crate::entity::EntityRef;
use crate::error::ParseEnumError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    Transfer,
    TaxCollection,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdraw => "withdraw",
            TransactionType::Transfer => "transfer",
            TransactionType::TaxCollection => "tax_collection",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdraw" => Ok(TransactionType::Withdraw),
            "transfer" => Ok(TransactionType::Transfer),
            "tax_collection" => Ok(TransactionType::TaxCollection),
            other => Err(ParseEnumError::new("transaction type", other)),
        }
    }
}

/// One immutable ledger row. Both legs of a transfer share `reference`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    pub recipient: EntityRef,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub currency_id: i64,
    pub description: Option<String>,
    pub reference: Uuid,
    pub created_at: DateTime<Utc>,
}

const TRANSACTION_COLUMNS: &str = "id, account_id, recipient_kind, recipient_id, amount, transaction_type, currency_id, description, reference, created_at";

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: row.get(0)?,
        account_id: row.get(1)?,
        recipient: entity_at(row, 2, 3)?,
        amount: decimal_at(row, 4)?,
        transaction_type: parsed_at(row, 5)?,
        currency_id: row.get(6)?,
        description: row.get(7)?,
        reference: parsed_at(row, 8)?,
        created_at: timestamp_at(row, 9)?,
    })
}

pub(crate) struct NewTransaction<'a> {
    pub account_id: i64,
    pub recipient: EntityRef,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub currency_id: i64,
    pub description: Option<&'a str>,
    pub reference: Uuid,
}

pub(crate) fn record_transaction(
    conn: &Connection,
    row: &NewTransaction<'_>,
) -> Result<i64, LedgerError> {
    conn.execute(
        "INSERT INTO transactions (account_id, recipient_kind, recipient_id, amount, transaction_type, currency_id, description, reference, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            row.account_id,
            row.recipient.kind.as_str(),
            row.recipient.id,
            row.amount.to_string(),
            row.transaction_type.as_str(),
            row.currency_id,
            row.description,
            row.reference.to_string(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Ledger {
    /// Transaction log for one account, oldest first.
    pub async fn transactions(&self, account_id: i64) -> Result<Vec<Transaction>, LedgerError> {
        let conn = self.store.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE account_id = ?1 ORDER BY id",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt.query_map([account_id], transaction_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Every row written by one ledger operation.
    pub async fn transactions_by_reference(
        &self,
        reference: Uuid,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let conn = self.store.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE reference = ?1 ORDER BY id",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt.query_map([reference.to_string()], transaction_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

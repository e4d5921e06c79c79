//! Bonds: an issuer's obligation to a holder, repaid through ordinary ledger transfers.

use super::account::{resolve_account, transfer_within};
use super::currency::currency_by_id;
use super::exchange_rate::convert_within;
use super::transaction::TransactionType;
use super::{Ledger, LedgerError};
use crate::db::{decimal_at, entity_at, opt_timestamp_at, parsed_at, timestamp_at};
use crate::entity::EntityRef;
use crate::error::ParseEnumError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BondStatus {
    Issued,
    Paid,
    Defaulted,
}

impl BondStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BondStatus::Issued => "issued",
            BondStatus::Paid => "paid",
            BondStatus::Defaulted => "defaulted",
        }
    }
}

impl fmt::Display for BondStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BondStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issued" => Ok(BondStatus::Issued),
            "paid" => Ok(BondStatus::Paid),
            "defaulted" => Ok(BondStatus::Defaulted),
            other => Err(ParseEnumError::new("bond status", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bond {
    pub id: i64,
    pub issuer: EntityRef,
    pub holder: EntityRef,
    /// Face amount, denominated in `currency_id`.
    pub amount: Decimal,
    pub currency_id: i64,
    pub status: BondStatus,
    pub description: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BondRepayment {
    pub id: i64,
    pub bond_id: i64,
    pub amount: Decimal,
    pub currency_id: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBond {
    pub issuer: EntityRef,
    pub holder: EntityRef,
    pub amount: Decimal,
    pub currency_id: i64,
    pub due_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

const BOND_COLUMNS: &str = "id, issuer_kind, issuer_id, holder_kind, holder_id, amount, currency_id, status, description, issued_at, due_at";

fn bond_from_row(row: &Row<'_>) -> rusqlite::Result<Bond> {
    Ok(Bond {
        id: row.get(0)?,
        issuer: entity_at(row, 1, 2)?,
        holder: entity_at(row, 3, 4)?,
        amount: decimal_at(row, 5)?,
        currency_id: row.get(6)?,
        status: parsed_at(row, 7)?,
        description: row.get(8)?,
        issued_at: timestamp_at(row, 9)?,
        due_at: opt_timestamp_at(row, 10)?,
    })
}

fn repayment_from_row(row: &Row<'_>) -> rusqlite::Result<BondRepayment> {
    Ok(BondRepayment {
        id: row.get(0)?,
        bond_id: row.get(1)?,
        amount: decimal_at(row, 2)?,
        currency_id: row.get(3)?,
        description: row.get(4)?,
        created_at: timestamp_at(row, 5)?,
    })
}

fn load_bond(conn: &Connection, id: i64) -> Result<Bond, LedgerError> {
    conn.query_row(
        &format!("SELECT {} FROM bonds WHERE id = ?1", BOND_COLUMNS),
        [id],
        bond_from_row,
    )
    .optional()?
    .ok_or(LedgerError::BondNotFound(id))
}

fn load_repayments(conn: &Connection, bond_id: i64) -> Result<Vec<BondRepayment>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT id, bond_id, amount, currency_id, description, created_at
         FROM bond_repayments WHERE bond_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map([bond_id], repayment_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Sum of repayments, each converted into the bond's face currency.
fn total_repaid_within(conn: &Connection, bond: &Bond) -> Result<Decimal, LedgerError> {
    load_repayments(conn, bond.id)?
        .iter()
        .try_fold(Decimal::ZERO, |acc, r| {
            Ok(acc + convert_within(conn, r.amount, r.currency_id, bond.currency_id)?)
        })
}

fn set_status(conn: &Connection, bond_id: i64, status: BondStatus) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE bonds SET status = ?1 WHERE id = ?2",
        params![status.as_str(), bond_id],
    )?;
    Ok(())
}

fn ensure_outstanding(bond: &Bond) -> Result<(), LedgerError> {
    if bond.status != BondStatus::Issued {
        return Err(LedgerError::BondNotOutstanding {
            bond_id: bond.id,
            status: bond.status.to_string(),
        });
    }
    Ok(())
}

impl Bond {
    pub fn is_outstanding(&self) -> bool {
        self.status == BondStatus::Issued
    }
}

impl Ledger {
    /// Record a new obligation. No money moves at issuance.
    pub async fn issue_bond(&self, new: NewBond) -> Result<Bond, LedgerError> {
        if new.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount { amount: new.amount });
        }
        let bond = self
            .store
            .write(|tx| {
                currency_by_id(tx, new.currency_id)?;
                tx.execute(
                    "INSERT INTO bonds (issuer_kind, issuer_id, holder_kind, holder_id, amount, currency_id, status, description, issued_at, due_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        new.issuer.kind.as_str(),
                        new.issuer.id,
                        new.holder.kind.as_str(),
                        new.holder.id,
                        new.amount.to_string(),
                        new.currency_id,
                        BondStatus::Issued.as_str(),
                        new.description,
                        Utc::now().to_rfc3339(),
                        new.due_at.map(|d| d.to_rfc3339()),
                    ],
                )?;
                load_bond(tx, tx.last_insert_rowid())
            })
            .await?;
        info!(
            bond_id = bond.id,
            issuer = %bond.issuer,
            holder = %bond.holder,
            amount = %bond.amount,
            "bond issued"
        );
        Ok(bond)
    }

    /// Pay `amount` in `currency_id` from issuer to holder and record the repayment.
    ///
    /// The bond flips to `paid` once the converted total covers the face amount.
    pub async fn repay_bond(
        &self,
        bond_id: i64,
        amount: Decimal,
        currency_id: i64,
        description: Option<&str>,
    ) -> Result<Bond, LedgerError> {
        let directory = self.directory.clone();
        let bond = self
            .store
            .write(|tx| {
                let mut bond = load_bond(tx, bond_id)?;
                ensure_outstanding(&bond)?;

                let payer = resolve_account(tx, &bond.issuer, currency_id)?;
                let payee = resolve_account(tx, &bond.holder, currency_id)?;
                let memo = description
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Bond #{} repayment", bond.id));
                transfer_within(
                    tx,
                    directory.as_ref(),
                    &payer,
                    amount,
                    &payee,
                    TransactionType::Transfer,
                    Some(memo.as_str()),
                )?;

                tx.execute(
                    "INSERT INTO bond_repayments (bond_id, amount, currency_id, description, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        bond.id,
                        amount.to_string(),
                        currency_id,
                        memo,
                        Utc::now().to_rfc3339()
                    ],
                )?;

                if total_repaid_within(tx, &bond)? >= bond.amount {
                    set_status(tx, bond.id, BondStatus::Paid)?;
                    bond.status = BondStatus::Paid;
                }
                Ok::<_, LedgerError>(bond)
            })
            .await?;
        info!(bond_id, %amount, currency_id, status = %bond.status, "bond repayment recorded");
        Ok(bond)
    }

    pub async fn default_bond(&self, bond_id: i64) -> Result<Bond, LedgerError> {
        let bond = self
            .store
            .write(|tx| {
                let mut bond = load_bond(tx, bond_id)?;
                ensure_outstanding(&bond)?;
                set_status(tx, bond.id, BondStatus::Defaulted)?;
                bond.status = BondStatus::Defaulted;
                Ok::<_, LedgerError>(bond)
            })
            .await?;
        tracing::warn!(bond_id, issuer = %bond.issuer, "bond defaulted");
        Ok(bond)
    }

    pub async fn bond(&self, bond_id: i64) -> Result<Bond, LedgerError> {
        let conn = self.store.lock().await;
        load_bond(&conn, bond_id)
    }

    pub async fn bond_repayments(&self, bond_id: i64) -> Result<Vec<BondRepayment>, LedgerError> {
        let conn = self.store.lock().await;
        load_repayments(&conn, bond_id)
    }

    /// Total repaid so far, normalized to the bond's face currency.
    pub async fn total_repaid(&self, bond_id: i64) -> Result<Decimal, LedgerError> {
        let conn = self.store.lock().await;
        let bond = load_bond(&conn, bond_id)?;
        total_repaid_within(&conn, &bond)
    }

    /// Whether repayments, converted to the face currency, cover the face amount.
    pub async fn bond_paid_off(&self, bond_id: i64) -> Result<bool, LedgerError> {
        let conn = self.store.lock().await;
        let bond = load_bond(&conn, bond_id)?;
        Ok(total_repaid_within(&conn, &bond)? >= bond.amount)
    }
}

//! Accounts and the balance-mutating primitives.
//!
//! The `*_within` functions run against an already-open transaction so the market and
//! insurance layers can compose several ledger moves into one atomic unit. The public
//! `Ledger` methods wrap each of them in its own `IMMEDIATE` transaction.

use super::currency::currency_by_id;
use super::transaction::{record_transaction, NewTransaction, TransactionType};
use super::{Ledger, LedgerError};
use crate::db::{decimal_at, entity_at, timestamp_at};
use crate::entity::{EntityDirectory, EntityRef};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub accountable: EntityRef,
    pub currency_id: i64,
    pub balance: Decimal,
    /// Concurrency token. Every persisted mutation bumps it by one.
    pub lock_version: i64,
    pub settlement_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Both sides of a committed transfer.
#[derive(Debug, Clone)]
pub(crate) struct Posted {
    pub from: Account,
    pub to: Account,
    pub reference: Uuid,
}

const ACCOUNT_COLUMNS: &str = "id, accountable_kind, accountable_id, currency_id, balance, lock_version, settlement_id, created_at, updated_at";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        accountable: entity_at(row, 1, 2)?,
        currency_id: row.get(3)?,
        balance: decimal_at(row, 4)?,
        lock_version: row.get(5)?,
        settlement_id: row.get(6)?,
        created_at: timestamp_at(row, 7)?,
        updated_at: timestamp_at(row, 8)?,
    })
}

pub(crate) fn load_account(conn: &Connection, id: i64) -> Result<Account, LedgerError> {
    conn.query_row(
        &format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS),
        [id],
        account_from_row,
    )
    .optional()?
    .ok_or(LedgerError::AccountNotFound(id))
}

fn find_account(
    conn: &Connection,
    entity: &EntityRef,
    currency_id: i64,
) -> Result<Option<Account>, LedgerError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM accounts WHERE accountable_kind = ?1 AND accountable_id = ?2 AND currency_id = ?3",
                ACCOUNT_COLUMNS
            ),
            params![entity.kind.as_str(), entity.id, currency_id],
            account_from_row,
        )
        .optional()?)
}

/// Idempotent: returns the existing account or creates one with balance 0.
pub(crate) fn resolve_account(
    conn: &Connection,
    entity: &EntityRef,
    currency_id: i64,
) -> Result<Account, LedgerError> {
    if let Some(existing) = find_account(conn, entity, currency_id)? {
        return Ok(existing);
    }
    currency_by_id(conn, currency_id)?;

    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO accounts (accountable_kind, accountable_id, currency_id, balance, lock_version, created_at, updated_at)
         VALUES (?1, ?2, ?3, '0', 0, ?4, ?4)",
        params![entity.kind.as_str(), entity.id, currency_id, now],
    )?;
    find_account(conn, entity, currency_id)?.ok_or(LedgerError::Storage(
        rusqlite::Error::QueryReturnedNoRows,
    ))
}

/// Reload the row and check the caller's concurrency token against it.
fn lock_current(conn: &Connection, account: &Account) -> Result<Account, LedgerError> {
    let current = load_account(conn, account.id)?;
    if current.lock_version != account.lock_version {
        return Err(LedgerError::ConcurrentModification {
            account_id: account.id,
            expected_version: account.lock_version,
        });
    }
    Ok(current)
}

fn write_balance(
    conn: &Connection,
    account: &Account,
    balance: Decimal,
) -> Result<Account, LedgerError> {
    let now = Utc::now();
    let changed = conn.execute(
        "UPDATE accounts SET balance = ?1, lock_version = lock_version + 1, updated_at = ?2
         WHERE id = ?3 AND lock_version = ?4",
        params![
            balance.to_string(),
            now.to_rfc3339(),
            account.id,
            account.lock_version
        ],
    )?;
    if changed == 0 {
        return Err(LedgerError::ConcurrentModification {
            account_id: account.id,
            expected_version: account.lock_version,
        });
    }
    Ok(Account {
        balance,
        lock_version: account.lock_version + 1,
        updated_at: now,
        ..account.clone()
    })
}

fn ensure_positive(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount { amount });
    }
    Ok(())
}

/// Non-NPC owners may never go below zero.
fn ensure_can_debit(
    directory: &dyn EntityDirectory,
    account: &Account,
    amount: Decimal,
) -> Result<(), LedgerError> {
    if amount > account.balance && !directory.is_npc(&account.accountable) {
        return Err(LedgerError::InsufficientFunds {
            account_id: account.id,
            balance: account.balance,
            requested: amount,
        });
    }
    Ok(())
}

pub(crate) fn deposit_within(
    conn: &Connection,
    account: &Account,
    amount: Decimal,
    description: Option<&str>,
) -> Result<Account, LedgerError> {
    ensure_positive(amount)?;
    let current = lock_current(conn, account)?;
    let updated = write_balance(conn, &current, current.balance + amount)?;
    record_transaction(
        conn,
        &NewTransaction {
            account_id: updated.id,
            recipient: updated.accountable,
            amount,
            transaction_type: TransactionType::Deposit,
            currency_id: updated.currency_id,
            description,
            reference: Uuid::new_v4(),
        },
    )?;
    Ok(updated)
}

pub(crate) fn withdraw_within(
    conn: &Connection,
    directory: &dyn EntityDirectory,
    account: &Account,
    amount: Decimal,
    description: Option<&str>,
) -> Result<Account, LedgerError> {
    ensure_positive(amount)?;
    let current = lock_current(conn, account)?;
    ensure_can_debit(directory, &current, amount)?;
    let updated = write_balance(conn, &current, current.balance - amount)?;
    record_transaction(
        conn,
        &NewTransaction {
            account_id: updated.id,
            recipient: updated.accountable,
            amount: -amount,
            transaction_type: TransactionType::Withdraw,
            currency_id: updated.currency_id,
            description,
            reference: Uuid::new_v4(),
        },
    )?;
    Ok(updated)
}

/// Debit `from`, credit `to`, write both legs. Accounts are locked in ascending id order.
pub(crate) fn transfer_within(
    conn: &Connection,
    directory: &dyn EntityDirectory,
    from: &Account,
    amount: Decimal,
    to: &Account,
    transaction_type: TransactionType,
    description: Option<&str>,
) -> Result<Posted, LedgerError> {
    ensure_positive(amount)?;
    if from.currency_id != to.currency_id {
        return Err(LedgerError::CurrencyMismatch {
            from_currency: from.currency_id,
            to_currency: to.currency_id,
        });
    }
    if from.id == to.id {
        return Err(LedgerError::SameAccount {
            account_id: from.id,
        });
    }

    let (from_current, to_current) = if from.id < to.id {
        let f = lock_current(conn, from)?;
        let t = lock_current(conn, to)?;
        (f, t)
    } else {
        let t = lock_current(conn, to)?;
        let f = lock_current(conn, from)?;
        (f, t)
    };

    ensure_can_debit(directory, &from_current, amount)?;

    let from_updated = write_balance(conn, &from_current, from_current.balance - amount)?;
    let to_updated = write_balance(conn, &to_current, to_current.balance + amount)?;

    let reference = Uuid::new_v4();
    record_transaction(
        conn,
        &NewTransaction {
            account_id: from_updated.id,
            recipient: to_updated.accountable,
            amount: -amount,
            transaction_type,
            currency_id: from_updated.currency_id,
            description,
            reference,
        },
    )?;
    record_transaction(
        conn,
        &NewTransaction {
            account_id: to_updated.id,
            recipient: from_updated.accountable,
            amount,
            transaction_type,
            currency_id: to_updated.currency_id,
            description,
            reference,
        },
    )?;

    Ok(Posted {
        from: from_updated,
        to: to_updated,
        reference,
    })
}

impl Ledger {
    pub async fn find_or_create_account(
        &self,
        entity: EntityRef,
        currency_id: i64,
    ) -> Result<Account, LedgerError> {
        self.store
            .write(|tx| resolve_account(tx, &entity, currency_id))
            .await
    }

    /// Fresh copy of an account, including its current `lock_version`.
    pub async fn account(&self, id: i64) -> Result<Account, LedgerError> {
        let conn = self.store.lock().await;
        load_account(&conn, id)
    }

    /// Balance without creating the account; zero when it does not exist.
    pub async fn balance_of(
        &self,
        entity: EntityRef,
        currency_id: i64,
    ) -> Result<Decimal, LedgerError> {
        let conn = self.store.lock().await;
        Ok(find_account(&conn, &entity, currency_id)?
            .map(|a| a.balance)
            .unwrap_or(Decimal::ZERO))
    }

    pub async fn accounts_of(&self, entity: EntityRef) -> Result<Vec<Account>, LedgerError> {
        let conn = self.store.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts WHERE accountable_kind = ?1 AND accountable_id = ?2 ORDER BY currency_id",
            ACCOUNT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![entity.kind.as_str(), entity.id], account_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Credit `account`. On success the caller's copy is refreshed and the new balance returned.
    pub async fn deposit(
        &self,
        account: &mut Account,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<Decimal, LedgerError> {
        let result = self
            .store
            .write(|tx| deposit_within(tx, account, amount, description))
            .await;
        match result {
            Ok(updated) => {
                info!(
                    account_id = updated.id,
                    owner = %updated.accountable,
                    %amount,
                    balance = %updated.balance,
                    "deposit recorded"
                );
                *account = updated;
                Ok(account.balance)
            }
            Err(e) => {
                warn!(account_id = account.id, %amount, error = %e, "deposit rejected");
                Err(e)
            }
        }
    }

    /// Debit `account`. Non-NPC owners fail with `InsufficientFunds` rather than go negative.
    pub async fn withdraw(
        &self,
        account: &mut Account,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<Decimal, LedgerError> {
        let directory = self.directory.clone();
        let result = self
            .store
            .write(|tx| withdraw_within(tx, directory.as_ref(), account, amount, description))
            .await;
        match result {
            Ok(updated) => {
                info!(
                    account_id = updated.id,
                    owner = %updated.accountable,
                    %amount,
                    balance = %updated.balance,
                    "withdrawal recorded"
                );
                *account = updated;
                Ok(account.balance)
            }
            Err(e) => {
                warn!(account_id = account.id, %amount, error = %e, "withdrawal rejected");
                Err(e)
            }
        }
    }

    /// Move `amount` from `from` to `to` atomically. Returns the reference shared by both rows.
    pub async fn transfer(
        &self,
        from: &mut Account,
        amount: Decimal,
        to: &mut Account,
        description: Option<&str>,
    ) -> Result<Uuid, LedgerError> {
        let directory = self.directory.clone();
        let result = self
            .store
            .write(|tx| {
                transfer_within(
                    tx,
                    directory.as_ref(),
                    from,
                    amount,
                    to,
                    TransactionType::Transfer,
                    description,
                )
            })
            .await;
        match result {
            Ok(posted) => {
                info!(
                    from_account = posted.from.id,
                    to_account = posted.to.id,
                    %amount,
                    reference = %posted.reference,
                    "transfer recorded"
                );
                *from = posted.from;
                *to = posted.to;
                Ok(posted.reference)
            }
            Err(e) => {
                warn!(
                    from_account = from.id,
                    to_account = to.id,
                    %amount,
                    error = %e,
                    "transfer rejected"
                );
                Err(e)
            }
        }
    }
}

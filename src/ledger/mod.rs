//! Double-entry ledger.
//!
//! Money lives in one account per (entity, currency). Every balance change happens inside a
//! single SQLite transaction that also appends the matching transaction rows, and every
//! write is conditional on the caller's `lock_version`.

mod account;
mod bond;
mod currency;
mod error;
mod exchange_rate;
mod tax;
mod transaction;

pub use account::Account;
pub use bond::{Bond, BondRepayment, BondStatus, NewBond};
pub use currency::{Currency, NewCurrency};
pub use error::LedgerError;
pub use tax::{TaxAuthority, TAX_AUTHORITY};
pub use transaction::{Transaction, TransactionType};

pub(crate) use account::{deposit_within, resolve_account, transfer_within};

use crate::db::Store;
use crate::entity::EntityDirectory;
use std::sync::Arc;

/// Entry point for all monetary operations. Cheap to clone.
#[derive(Clone)]
pub struct Ledger {
    store: Store,
    directory: Arc<dyn EntityDirectory>,
}

impl Ledger {
    pub fn new(store: Store, directory: Arc<dyn EntityDirectory>) -> Self {
        Self { store, directory }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn directory(&self) -> &Arc<dyn EntityDirectory> {
        &self.directory
    }
}

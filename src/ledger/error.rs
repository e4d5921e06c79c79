use crate::error::ErrorClass;
use rust_decimal::Decimal;

/// Errors raised by ledger operations.
#[derive(Debug)]
pub enum LedgerError {
    /// Amount was zero or negative.
    InvalidAmount { amount: Decimal },
    /// Transfer between accounts held in different currencies.
    CurrencyMismatch { from_currency: i64, to_currency: i64 },
    /// Transfer whose source and destination are the same account.
    SameAccount { account_id: i64 },
    /// Non-NPC owner would go below zero.
    InsufficientFunds {
        account_id: i64,
        balance: Decimal,
        requested: Decimal,
    },
    /// Caller's `lock_version` no longer matches the stored row.
    ConcurrentModification { account_id: i64, expected_version: i64 },
    AccountNotFound(i64),
    CurrencyNotFound(String),
    /// Currency attributes failed validation.
    InvalidCurrency(String),
    DuplicateCurrency(String),
    InvalidRate { rate: Decimal },
    BondNotFound(i64),
    /// Repayment or default against a bond that is no longer outstanding.
    BondNotOutstanding { bond_id: i64, status: String },
    Storage(rusqlite::Error),
}

impl LedgerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidAmount { .. }
            | Self::CurrencyMismatch { .. }
            | Self::SameAccount { .. }
            | Self::InvalidCurrency(_)
            | Self::DuplicateCurrency(_)
            | Self::InvalidRate { .. }
            | Self::AccountNotFound(_)
            | Self::CurrencyNotFound(_)
            | Self::BondNotFound(_) => ErrorClass::Validation,
            Self::InsufficientFunds { .. } | Self::BondNotOutstanding { .. } => {
                ErrorClass::BusinessRule
            }
            Self::ConcurrentModification { .. } => ErrorClass::Concurrency,
            Self::Storage(_) => ErrorClass::Integrity,
        }
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAmount { amount } => {
                write!(f, "Amount must be positive (got {})", amount)
            }
            Self::CurrencyMismatch {
                from_currency,
                to_currency,
            } => write!(
                f,
                "Currency mismatch: cannot transfer from currency {} to currency {}",
                from_currency, to_currency
            ),
            Self::SameAccount { account_id } => {
                write!(f, "Cannot transfer account {} to itself", account_id)
            }
            Self::InsufficientFunds {
                account_id,
                balance,
                requested,
            } => write!(
                f,
                "Insufficient funds in account {}: balance {}, requested {}",
                account_id, balance, requested
            ),
            Self::ConcurrentModification {
                account_id,
                expected_version,
            } => write!(
                f,
                "Account {} was modified concurrently (expected lock_version {})",
                account_id, expected_version
            ),
            Self::AccountNotFound(id) => write!(f, "Account {} not found", id),
            Self::CurrencyNotFound(symbol) => write!(f, "Currency {} not found", symbol),
            Self::InvalidCurrency(msg) => write!(f, "Invalid currency: {}", msg),
            Self::DuplicateCurrency(symbol) => {
                write!(f, "Currency {} already exists", symbol)
            }
            Self::InvalidRate { rate } => {
                write!(f, "Exchange rate must be positive (got {})", rate)
            }
            Self::BondNotFound(id) => write!(f, "Bond {} not found", id),
            Self::BondNotOutstanding { bond_id, status } => {
                write!(f, "Bond {} is {}, not outstanding", bond_id, status)
            }
            Self::Storage(e) => write!(f, "Ledger storage error: {}", e),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e)
    }
}

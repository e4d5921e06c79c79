//! Logistics insurance: tiered policies, premiums and claims paid through the ledger, and
//! an NPC insurer market with reserve management and bankruptcy handling.

pub mod market_service;
pub mod records;
pub mod service;
pub mod tiers;

pub use market_service::{
    BankruptcyReport, InsuranceMarketService, NpcInsurerProfile, ReserveDistribution, NPC_INSURERS,
};
pub use records::{
    ClaimPayout, InsuranceCorporation, InsurancePolicy, InsurerStatus, ModelMap, NewInsurer,
    PolicyStatus,
};
pub use service::{ClaimOutcome, InsuranceQuote, InsuranceService, DEFAULT_SOLVENCY_FLOOR};
pub use tiers::{
    assess_claim, calculate_premium, ClaimAssessment, ClaimCircumstances, ClaimDecision,
    InsuranceTier, RiskFactors,
};

use crate::error::ErrorClass;
use crate::ledger::LedgerError;
use rust_decimal::Decimal;

#[derive(Debug)]
pub enum InsuranceError {
    Ledger(LedgerError),
    InsurerNotFound(i64),
    PolicyNotFound(i64),
    InsurerNotActive { insurer_id: i64, status: InsurerStatus },
    PolicyNotActive { policy_id: i64, status: PolicyStatus },
    InvalidContractValue(Decimal),
    InvalidLoss(Decimal),
    /// Paying the claim would push the reserve below the solvency floor.
    SolvencyFloorBreached {
        insurer_id: i64,
        projected_ratio: f64,
        floor: f64,
    },
    DuplicateInsurer(String),
    Storage(rusqlite::Error),
    Serialization(serde_json::Error),
}

impl InsuranceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Ledger(e) => e.class(),
            Self::InsurerNotFound(_)
            | Self::PolicyNotFound(_)
            | Self::InvalidContractValue(_)
            | Self::InvalidLoss(_)
            | Self::DuplicateInsurer(_) => ErrorClass::Validation,
            Self::InsurerNotActive { .. }
            | Self::PolicyNotActive { .. }
            | Self::SolvencyFloorBreached { .. } => ErrorClass::BusinessRule,
            Self::Storage(_) | Self::Serialization(_) => ErrorClass::Integrity,
        }
    }
}

impl std::fmt::Display for InsuranceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ledger(e) => write!(f, "Insurance ledger operation failed: {}", e),
            Self::InsurerNotFound(id) => write!(f, "Insurance corporation {} not found", id),
            Self::PolicyNotFound(id) => write!(f, "Insurance policy {} not found", id),
            Self::InsurerNotActive { insurer_id, status } => {
                write!(f, "Insurance corporation {} is {}", insurer_id, status)
            }
            Self::PolicyNotActive { policy_id, status } => {
                write!(f, "Insurance policy {} is {}", policy_id, status)
            }
            Self::InvalidContractValue(v) => {
                write!(f, "Contract value must be positive (got {})", v)
            }
            Self::InvalidLoss(v) => write!(f, "Loss amount must be positive (got {})", v),
            Self::SolvencyFloorBreached {
                insurer_id,
                projected_ratio,
                floor,
            } => write!(
                f,
                "Claim would leave insurer {} at solvency {:.4}, below floor {}; capital call issued",
                insurer_id, projected_ratio, floor
            ),
            Self::DuplicateInsurer(identifier) => {
                write!(f, "Insurer identifier {} already exists", identifier)
            }
            Self::Storage(e) => write!(f, "Insurance storage error: {}", e),
            Self::Serialization(e) => write!(f, "Insurance model serialization error: {}", e),
        }
    }
}

impl std::error::Error for InsuranceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ledger(e) => Some(e),
            Self::Storage(e) => Some(e),
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LedgerError> for InsuranceError {
    fn from(e: LedgerError) -> Self {
        Self::Ledger(e)
    }
}

impl From<rusqlite::Error> for InsuranceError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e)
    }
}

impl From<serde_json::Error> for InsuranceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let breach = InsuranceError::SolvencyFloorBreached {
            insurer_id: 1,
            projected_ratio: 0.05,
            floor: 0.1,
        };
        assert_eq!(breach.class(), ErrorClass::BusinessRule);
        assert!(breach.to_string().contains("capital call"));

        let wrapped = InsuranceError::from(LedgerError::ConcurrentModification {
            account_id: 3,
            expected_version: 1,
        });
        assert_eq!(wrapped.class(), ErrorClass::Concurrency);
        assert!(std::error::Error::source(&wrapped).is_some());

        assert_eq!(
            InsuranceError::PolicyNotFound(9).class(),
            ErrorClass::Validation
        );
    }
}

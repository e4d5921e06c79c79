//! Market clearing: per-settlement marketplaces, orders, synthetic NPC liquidity and
//! price discovery. Every trade settles through the [`Ledger`](crate::ledger::Ledger).

pub mod condition;
pub mod marketplace;
pub mod order;
pub mod pricing;
pub mod settlement;
pub mod trade_execution;

pub use condition::{MarketCondition, PriceHistory, FALLBACK_PRICE};
pub use marketplace::{MarketContext, Marketplace, Placement};
pub use order::{CounterOrder, Order, OrderStatus, OrderType, SyntheticCounterOrder};
pub use pricing::{BasePriceTable, NpcPriceCalculator, PriceSpread};
pub use settlement::{InMemoryInventory, Inventory, SettlementEconomy, SimulatedSettlement};
pub use trade_execution::{GoodsMovement, SupplyChain, Trade, AWAITING_LAUNCH};

use crate::entity::EntityRef;
use crate::error::ErrorClass;
use crate::ledger::LedgerError;

#[derive(Debug)]
pub enum MarketError {
    /// Payment or tax failed in the ledger.
    Ledger(LedgerError),
    /// No market condition for this resource at this marketplace.
    UnknownResource { marketplace_id: i64, resource: String },
    InvalidQuantity(i64),
    InvalidLevels { supply: i64, demand: i64 },
    InsufficientInventory {
        owner: EntityRef,
        resource: String,
        requested: i64,
        available: i64,
    },
    OrderNotFound(i64),
    /// Order is filled or expired.
    OrderNotOpen { order_id: i64, status: OrderStatus },
    /// Only sell orders execute, and only against buy-side counters.
    UnsupportedMatch { order_id: i64, order_type: OrderType },
    NoCounterOrder { order_id: i64 },
    /// Counter order trades a different condition or resource than the sell order.
    CounterMismatch {
        order_id: i64,
        resource: String,
        counter_resource: String,
    },
    /// Order belongs to another marketplace.
    ForeignOrder { order_id: i64, marketplace_id: i64 },
    Storage(rusqlite::Error),
}

impl MarketError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Ledger(e) => e.class(),
            Self::UnknownResource { .. }
            | Self::InvalidQuantity(_)
            | Self::InvalidLevels { .. }
            | Self::OrderNotFound(_)
            | Self::UnsupportedMatch { .. }
            | Self::NoCounterOrder { .. }
            | Self::CounterMismatch { .. }
            | Self::ForeignOrder { .. } => ErrorClass::Validation,
            Self::InsufficientInventory { .. } | Self::OrderNotOpen { .. } => {
                ErrorClass::BusinessRule
            }
            Self::Storage(_) => ErrorClass::Integrity,
        }
    }
}

impl std::fmt::Display for MarketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ledger(e) => write!(f, "Trade settlement failed: {}", e),
            Self::UnknownResource {
                marketplace_id,
                resource,
            } => write!(
                f,
                "No market condition for {} at marketplace {}",
                resource, marketplace_id
            ),
            Self::InvalidQuantity(q) => write!(f, "Quantity must be positive (got {})", q),
            Self::InvalidLevels { supply, demand } => write!(
                f,
                "Supply and demand must be non-negative (got {}, {})",
                supply, demand
            ),
            Self::InsufficientInventory {
                owner,
                resource,
                requested,
                available,
            } => write!(
                f,
                "{} holds {} {}, cannot deliver {}",
                owner, available, resource, requested
            ),
            Self::OrderNotFound(id) => write!(f, "Order {} not found", id),
            Self::OrderNotOpen { order_id, status } => {
                write!(f, "Order {} is {}", order_id, status)
            }
            Self::UnsupportedMatch {
                order_id,
                order_type,
            } => write!(
                f,
                "Order {} is a {} order; only sell orders execute against buyers",
                order_id, order_type
            ),
            Self::NoCounterOrder { order_id } => {
                write!(f, "No counter order supplied for order {}", order_id)
            }
            Self::CounterMismatch {
                order_id,
                resource,
                counter_resource,
            } => write!(
                f,
                "Counter order for {} cannot fill order {} for {} in another market",
                counter_resource, order_id, resource
            ),
            Self::ForeignOrder {
                order_id,
                marketplace_id,
            } => write!(
                f,
                "Order {} does not belong to marketplace {}",
                order_id, marketplace_id
            ),
            Self::Storage(e) => write!(f, "Market storage error: {}", e),
        }
    }
}

impl std::error::Error for MarketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ledger(e) => Some(e),
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LedgerError> for MarketError {
    fn from(e: LedgerError) -> Self {
        Self::Ledger(e)
    }
}

impl From<rusqlite::Error> for MarketError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e)
    }
}

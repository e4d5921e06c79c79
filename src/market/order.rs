use super::MarketError;
use crate::db::{entity_at, parsed_at, timestamp_at};
use crate::entity::EntityRef;
use crate::error::ParseEnumError;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_ORDER_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Buy,
    Sell,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Buy => "buy",
            OrderType::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(OrderType::Buy),
            "sell" => Ok(OrderType::Sell),
            other => Err(ParseEnumError::new("order type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Expired,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Filled => "filled",
            OrderStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A persisted order. Price is not stored; see `Marketplace::price_per_unit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub market_condition_id: i64,
    pub base_settlement_id: i64,
    pub orderable: EntityRef,
    pub order_type: OrderType,
    pub resource: String,
    /// Remaining quantity; 0 once filled.
    pub quantity: i64,
    pub initial_quantity: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Order {
    /// Filled wins over expired: a fully executed order stays filled forever.
    pub fn status_at(&self, now: DateTime<Utc>) -> OrderStatus {
        if self.quantity == 0 {
            OrderStatus::Filled
        } else if now >= self.expires_at {
            OrderStatus::Expired
        } else {
            OrderStatus::Pending
        }
    }

    pub fn status(&self) -> OrderStatus {
        self.status_at(Utc::now())
    }

    pub fn filled_quantity(&self) -> i64 {
        self.initial_quantity - self.quantity
    }
}

/// In-memory NPC buy order synthesized from settlement demand. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticCounterOrder {
    pub orderable: EntityRef,
    pub resource: String,
    pub order_type: OrderType,
    pub quantity: i64,
    pub price: Decimal,
    pub market_condition_id: i64,
}

/// Counterparty to a sell order.
#[derive(Debug, Clone, PartialEq)]
pub enum CounterOrder {
    /// A persisted buy order, traded at its live price.
    Resting { order: Order, price: Decimal },
    Synthetic(SyntheticCounterOrder),
}

impl CounterOrder {
    pub fn quantity(&self) -> i64 {
        match self {
            CounterOrder::Resting { order, .. } => order.quantity,
            CounterOrder::Synthetic(s) => s.quantity,
        }
    }

    pub fn price(&self) -> Decimal {
        match self {
            CounterOrder::Resting { price, .. } => *price,
            CounterOrder::Synthetic(s) => s.price,
        }
    }

    pub fn buyer(&self) -> EntityRef {
        match self {
            CounterOrder::Resting { order, .. } => order.orderable,
            CounterOrder::Synthetic(s) => s.orderable,
        }
    }

    pub fn order_type(&self) -> OrderType {
        match self {
            CounterOrder::Resting { order, .. } => order.order_type,
            CounterOrder::Synthetic(s) => s.order_type,
        }
    }
}

const ORDER_COLUMNS: &str = "id, market_condition_id, base_settlement_id, orderable_kind, orderable_id, order_type, resource, quantity, initial_quantity, created_at";

fn order_from_row(row: &Row<'_>, ttl: Duration) -> rusqlite::Result<Order> {
    let created_at = timestamp_at(row, 9)?;
    Ok(Order {
        id: row.get(0)?,
        market_condition_id: row.get(1)?,
        base_settlement_id: row.get(2)?,
        orderable: entity_at(row, 3, 4)?,
        order_type: parsed_at(row, 5)?,
        resource: row.get(6)?,
        quantity: row.get(7)?,
        initial_quantity: row.get(8)?,
        created_at,
        expires_at: created_at + ttl,
    })
}

pub(crate) struct NewOrder<'a> {
    pub market_condition_id: i64,
    pub base_settlement_id: i64,
    pub orderable: EntityRef,
    pub order_type: OrderType,
    pub resource: &'a str,
    pub quantity: i64,
}

pub(crate) fn insert_order(
    conn: &Connection,
    new: &NewOrder<'_>,
    ttl: Duration,
) -> Result<Order, MarketError> {
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO market_orders (market_condition_id, base_settlement_id, orderable_kind, orderable_id, order_type, resource, quantity, initial_quantity, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8)",
        params![
            new.market_condition_id,
            new.base_settlement_id,
            new.orderable.kind.as_str(),
            new.orderable.id,
            new.order_type.as_str(),
            new.resource,
            new.quantity,
            created_at.to_rfc3339(),
        ],
    )?;
    Ok(Order {
        id: conn.last_insert_rowid(),
        market_condition_id: new.market_condition_id,
        base_settlement_id: new.base_settlement_id,
        orderable: new.orderable,
        order_type: new.order_type,
        resource: new.resource.to_string(),
        quantity: new.quantity,
        initial_quantity: new.quantity,
        created_at,
        expires_at: created_at + ttl,
    })
}

pub(crate) fn load_order(conn: &Connection, id: i64, ttl: Duration) -> Result<Order, MarketError> {
    conn.query_row(
        &format!("SELECT {} FROM market_orders WHERE id = ?1", ORDER_COLUMNS),
        [id],
        |row| order_from_row(row, ttl),
    )
    .optional()?
    .ok_or(MarketError::OrderNotFound(id))
}

pub(crate) fn orders_for_condition(
    conn: &Connection,
    condition_id: i64,
    ttl: Duration,
) -> Result<Vec<Order>, MarketError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM market_orders WHERE market_condition_id = ?1 ORDER BY id",
        ORDER_COLUMNS
    ))?;
    let rows = stmt.query_map([condition_id], |row| order_from_row(row, ttl))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Decrement remaining quantity by `volume`, never below zero.
pub(crate) fn finalize_order(
    conn: &Connection,
    order: &mut Order,
    volume: i64,
) -> Result<(), MarketError> {
    let remaining = (order.quantity - volume).max(0);
    conn.execute(
        "UPDATE market_orders SET quantity = ?1 WHERE id = ?2",
        params![remaining, order.id],
    )?;
    order.quantity = remaining;
    Ok(())
}

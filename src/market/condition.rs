use super::MarketError;
use crate::db::{decimal_at, timestamp_at};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Price reported for a resource that has never traded.
pub const FALLBACK_PRICE: Decimal = dec!(10);

pub const DEFAULT_AVERAGE_WINDOW_DAYS: i64 = 30;

/// Market state for one resource at one marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketCondition {
    pub id: i64,
    pub marketplace_id: i64,
    pub resource: String,
    pub supply: i64,
    pub demand: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistory {
    pub id: i64,
    pub market_condition_id: i64,
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
}

const CONDITION_COLUMNS: &str = "id, marketplace_id, resource, supply, demand";

fn condition_from_row(row: &Row<'_>) -> rusqlite::Result<MarketCondition> {
    Ok(MarketCondition {
        id: row.get(0)?,
        marketplace_id: row.get(1)?,
        resource: row.get(2)?,
        supply: row.get(3)?,
        demand: row.get(4)?,
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<PriceHistory> {
    Ok(PriceHistory {
        id: row.get(0)?,
        market_condition_id: row.get(1)?,
        price: decimal_at(row, 2)?,
        created_at: timestamp_at(row, 3)?,
    })
}

pub(crate) fn find_or_create_marketplace(
    conn: &Connection,
    settlement_id: i64,
) -> Result<i64, MarketError> {
    conn.execute(
        "INSERT OR IGNORE INTO marketplaces (settlement_id, created_at) VALUES (?1, ?2)",
        params![settlement_id, Utc::now().to_rfc3339()],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM marketplaces WHERE settlement_id = ?1",
        [settlement_id],
        |row| row.get(0),
    )?)
}

pub(crate) fn find_condition(
    conn: &Connection,
    marketplace_id: i64,
    resource: &str,
) -> Result<Option<MarketCondition>, MarketError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM market_conditions WHERE marketplace_id = ?1 AND resource = ?2",
                CONDITION_COLUMNS
            ),
            params![marketplace_id, resource],
            condition_from_row,
        )
        .optional()?)
}

pub(crate) fn load_condition(conn: &Connection, id: i64) -> Result<MarketCondition, MarketError> {
    Ok(conn.query_row(
        &format!("SELECT {} FROM market_conditions WHERE id = ?1", CONDITION_COLUMNS),
        [id],
        condition_from_row,
    )?)
}

pub(crate) fn upsert_condition(
    conn: &Connection,
    marketplace_id: i64,
    resource: &str,
    supply: i64,
    demand: i64,
) -> Result<MarketCondition, MarketError> {
    if supply < 0 || demand < 0 {
        return Err(MarketError::InvalidLevels { supply, demand });
    }
    conn.execute(
        "INSERT INTO market_conditions (marketplace_id, resource, supply, demand)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(marketplace_id, resource) DO UPDATE SET supply = excluded.supply, demand = excluded.demand",
        params![marketplace_id, resource, supply, demand],
    )?;
    find_condition(conn, marketplace_id, resource)?.ok_or_else(|| MarketError::UnknownResource {
        marketplace_id,
        resource: resource.to_string(),
    })
}

pub(crate) fn list_conditions(
    conn: &Connection,
    marketplace_id: i64,
) -> Result<Vec<MarketCondition>, MarketError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM market_conditions WHERE marketplace_id = ?1 ORDER BY resource",
        CONDITION_COLUMNS
    ))?;
    let rows = stmt.query_map([marketplace_id], condition_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn record_price(
    conn: &Connection,
    condition_id: i64,
    price: Decimal,
) -> Result<(), MarketError> {
    conn.execute(
        "INSERT INTO price_histories (market_condition_id, price, created_at) VALUES (?1, ?2, ?3)",
        params![condition_id, price.to_string(), Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Newest first.
pub(crate) fn price_history(
    conn: &Connection,
    condition_id: i64,
) -> Result<Vec<PriceHistory>, MarketError> {
    let mut stmt = conn.prepare(
        "SELECT id, market_condition_id, price, created_at FROM price_histories
         WHERE market_condition_id = ?1 ORDER BY id DESC",
    )?;
    let rows = stmt.query_map([condition_id], history_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Latest traded price, or [`FALLBACK_PRICE`] when nothing has traded.
pub(crate) fn current_price(conn: &Connection, condition_id: i64) -> Result<Decimal, MarketError> {
    let latest = conn
        .query_row(
            "SELECT id, market_condition_id, price, created_at FROM price_histories
             WHERE market_condition_id = ?1 ORDER BY id DESC LIMIT 1",
            [condition_id],
            history_from_row,
        )
        .optional()?;
    Ok(latest.map(|h| h.price).unwrap_or(FALLBACK_PRICE))
}

/// Mean traded price over the trailing window, `None` without trades in it.
pub(crate) fn average_price(
    conn: &Connection,
    condition_id: i64,
    window_days: i64,
) -> Result<Option<Decimal>, MarketError> {
    let since = Utc::now() - Duration::days(window_days);
    let prices: Vec<Decimal> = price_history(conn, condition_id)?
        .into_iter()
        .filter(|h| h.created_at > since)
        .map(|h| h.price)
        .collect();
    if prices.is_empty() {
        return Ok(None);
    }
    let total: Decimal = prices.iter().copied().sum();
    Ok(Some((total / Decimal::from(prices.len())).round_dp(2)))
}

//! Settles one matched trade: payment, sales tax, trade record, price print, supply chain.
//!
//! Runs inside the caller's transaction. Goods are not moved here; the returned
//! [`GoodsMovement`] is applied by the marketplace after every SQL write has succeeded.

use super::condition::record_price;
use super::settlement::Inventory;
use super::MarketError;
use crate::db::{decimal_at, entity_at, timestamp_at};
use crate::entity::EntityRef;
use crate::ledger::{resolve_account, transfer_within, Ledger, TaxAuthority, TransactionType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

pub const AWAITING_LAUNCH: &str = "Awaiting Launch";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub market_condition_id: i64,
    pub order_id: i64,
    pub seller: EntityRef,
    pub buyer: EntityRef,
    pub resource: String,
    pub volume: i64,
    pub price: Decimal,
    pub gross_value: Decimal,
    pub tax_paid: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Shipment created by a trade; logistics picks it up from `Awaiting Launch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyChain {
    pub id: i64,
    pub trade_id: i64,
    pub resource: String,
    pub volume: i64,
    pub origin: EntityRef,
    pub destination: EntityRef,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoodsMovement {
    pub from: EntityRef,
    pub to: EntityRef,
    pub resource: String,
    pub volume: i64,
}

impl GoodsMovement {
    pub fn apply(&self, inventory: &dyn Inventory) -> Result<(), MarketError> {
        inventory.remove(&self.from, &self.resource, self.volume)?;
        inventory.add(&self.to, &self.resource, self.volume);
        Ok(())
    }

    pub fn reverse(&self, inventory: &dyn Inventory) {
        match inventory.remove(&self.to, &self.resource, self.volume) {
            Ok(()) => inventory.add(&self.from, &self.resource, self.volume),
            Err(e) => error!(
                from = %self.from,
                to = %self.to,
                resource = %self.resource,
                volume = self.volume,
                error = %e,
                "could not reverse goods movement"
            ),
        }
    }
}

pub(crate) struct TradeTerms<'a> {
    pub market_condition_id: i64,
    pub order_id: i64,
    pub seller: EntityRef,
    pub buyer: EntityRef,
    pub resource: &'a str,
    pub volume: i64,
    pub price: Decimal,
}

pub(crate) struct TradeExecutionService<'a> {
    pub ledger: &'a Ledger,
    pub tax: &'a TaxAuthority,
    pub inventory: &'a dyn Inventory,
    pub currency_id: i64,
}

impl TradeExecutionService<'_> {
    pub fn execute(
        &self,
        conn: &Connection,
        terms: &TradeTerms<'_>,
    ) -> Result<(Trade, GoodsMovement), MarketError> {
        let available = self.inventory.available(&terms.seller, terms.resource);
        if available < terms.volume {
            return Err(MarketError::InsufficientInventory {
                owner: terms.seller,
                resource: terms.resource.to_string(),
                requested: terms.volume,
                available,
            });
        }

        let directory = self.ledger.directory().as_ref();
        let gross = (Decimal::from(terms.volume) * terms.price).round_dp(2);

        let buyer_account = resolve_account(conn, &terms.buyer, self.currency_id)?;
        let seller_account = resolve_account(conn, &terms.seller, self.currency_id)?;
        let memo = format!("Purchase of {} {} at {}", terms.volume, terms.resource, terms.price);
        let posted = transfer_within(
            conn,
            directory,
            &buyer_account,
            gross,
            &seller_account,
            TransactionType::Transfer,
            Some(memo.as_str()),
        )?;

        let rate = self.tax.rate_for(directory, &terms.seller);
        let (tax_paid, _) = self
            .tax
            .collect_within(conn, directory, &posted.to, gross, rate)?;

        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO market_trades (market_condition_id, order_id, seller_kind, seller_id, buyer_kind, buyer_id, resource, volume, price, gross_value, tax_paid, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                terms.market_condition_id,
                terms.order_id,
                terms.seller.kind.as_str(),
                terms.seller.id,
                terms.buyer.kind.as_str(),
                terms.buyer.id,
                terms.resource,
                terms.volume,
                terms.price.to_string(),
                gross.to_string(),
                tax_paid.to_string(),
                created_at.to_rfc3339(),
            ],
        )?;
        let trade = Trade {
            id: conn.last_insert_rowid(),
            market_condition_id: terms.market_condition_id,
            order_id: terms.order_id,
            seller: terms.seller,
            buyer: terms.buyer,
            resource: terms.resource.to_string(),
            volume: terms.volume,
            price: terms.price,
            gross_value: gross,
            tax_paid,
            created_at,
        };

        record_price(conn, terms.market_condition_id, terms.price)?;

        conn.execute(
            "INSERT INTO supply_chains (trade_id, resource, volume, origin_kind, origin_id, destination_kind, destination_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                trade.id,
                terms.resource,
                terms.volume,
                terms.seller.kind.as_str(),
                terms.seller.id,
                terms.buyer.kind.as_str(),
                terms.buyer.id,
                AWAITING_LAUNCH,
                created_at.to_rfc3339(),
            ],
        )?;

        info!(
            trade_id = trade.id,
            order_id = terms.order_id,
            seller = %terms.seller,
            buyer = %terms.buyer,
            resource = terms.resource,
            volume = terms.volume,
            price = %terms.price,
            tax = %tax_paid,
            "trade executed"
        );

        let goods = GoodsMovement {
            from: terms.seller,
            to: terms.buyer,
            resource: terms.resource.to_string(),
            volume: terms.volume,
        };
        Ok((trade, goods))
    }
}

const TRADE_COLUMNS: &str = "id, market_condition_id, order_id, seller_kind, seller_id, buyer_kind, buyer_id, resource, volume, price, gross_value, tax_paid, created_at";

fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<Trade> {
    Ok(Trade {
        id: row.get(0)?,
        market_condition_id: row.get(1)?,
        order_id: row.get(2)?,
        seller: entity_at(row, 3, 4)?,
        buyer: entity_at(row, 5, 6)?,
        resource: row.get(7)?,
        volume: row.get(8)?,
        price: decimal_at(row, 9)?,
        gross_value: decimal_at(row, 10)?,
        tax_paid: decimal_at(row, 11)?,
        created_at: timestamp_at(row, 12)?,
    })
}

fn supply_chain_from_row(row: &Row<'_>) -> rusqlite::Result<SupplyChain> {
    Ok(SupplyChain {
        id: row.get(0)?,
        trade_id: row.get(1)?,
        resource: row.get(2)?,
        volume: row.get(3)?,
        origin: entity_at(row, 4, 5)?,
        destination: entity_at(row, 6, 7)?,
        status: row.get(8)?,
        created_at: timestamp_at(row, 9)?,
    })
}

pub(crate) fn trades_for_order(
    conn: &Connection,
    order_id: i64,
) -> Result<Vec<Trade>, MarketError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM market_trades WHERE order_id = ?1 ORDER BY id",
        TRADE_COLUMNS
    ))?;
    let rows = stmt.query_map([order_id], trade_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn supply_chains_for_trade(
    conn: &Connection,
    trade_id: i64,
) -> Result<Vec<SupplyChain>, MarketError> {
    let mut stmt = conn.prepare(
        "SELECT id, trade_id, resource, volume, origin_kind, origin_id, destination_kind, destination_id, status, created_at
         FROM supply_chains WHERE trade_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map([trade_id], supply_chain_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::settlement::InMemoryInventory;

    #[test]
    fn test_goods_movement_apply_and_reverse() {
        let inventory = InMemoryInventory::new();
        let seller = EntityRef::player(1);
        let buyer = EntityRef::settlement(2);
        inventory.add(&seller, "ibeam", 10);

        let movement = GoodsMovement {
            from: seller,
            to: buyer,
            resource: "ibeam".into(),
            volume: 6,
        };
        movement.apply(&inventory).unwrap();
        assert_eq!(inventory.available(&seller, "ibeam"), 4);
        assert_eq!(inventory.available(&buyer, "ibeam"), 6);

        movement.reverse(&inventory);
        assert_eq!(inventory.available(&seller, "ibeam"), 10);
        assert_eq!(inventory.available(&buyer, "ibeam"), 0);

        let too_much = GoodsMovement { volume: 11, ..movement };
        assert!(too_much.apply(&inventory).is_err());
        assert_eq!(inventory.available(&seller, "ibeam"), 10);
    }
}

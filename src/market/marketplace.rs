//! Per-settlement marketplace: order placement, matching against NPC demand, execution.
//!
//! Placement, matching, payment, tax, trade records and order finalization share one
//! `IMMEDIATE` transaction. Goods move through the external inventory only after every SQL
//! write succeeded, and are moved back if the commit itself fails.

use super::condition::{
    average_price, current_price, find_condition, find_or_create_marketplace, list_conditions,
    load_condition, price_history, upsert_condition, MarketCondition, PriceHistory,
};
use super::order::{
    finalize_order, insert_order, load_order, orders_for_condition, CounterOrder, NewOrder,
    Order, OrderStatus, OrderType, SyntheticCounterOrder,
};
use super::pricing::{NpcPriceCalculator, PriceSpread};
use super::settlement::{Inventory, SettlementEconomy};
use super::trade_execution::{
    supply_chains_for_trade, trades_for_order, GoodsMovement, SupplyChain, Trade,
    TradeExecutionService, TradeTerms,
};
use super::MarketError;
use crate::entity::EntityRef;
use crate::ledger::{Ledger, TaxAuthority};
use chrono::Duration;
use rust_decimal::Decimal;
use rusqlite::{Transaction, TransactionBehavior};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Services shared by every marketplace.
#[derive(Clone)]
pub struct MarketContext {
    pub ledger: Ledger,
    pub tax: TaxAuthority,
    pub pricing: Arc<NpcPriceCalculator>,
    pub trade_currency_id: i64,
    pub order_ttl: Duration,
}

/// Result of `place_order`.
#[derive(Debug, Clone)]
pub struct Placement {
    pub order: Order,
    pub trade: Option<Trade>,
}

impl Placement {
    pub fn is_filled(&self) -> bool {
        self.order.quantity == 0
    }

    /// The order if anything is left to fill.
    pub fn into_resting(self) -> Option<Order> {
        if self.is_filled() {
            None
        } else {
            Some(self.order)
        }
    }
}

pub struct Marketplace {
    id: i64,
    ctx: MarketContext,
    settlement: Arc<dyn SettlementEconomy>,
    inventory: Arc<dyn Inventory>,
}

impl Marketplace {
    /// Find or create the marketplace for `settlement`.
    pub async fn open(
        ctx: MarketContext,
        settlement: Arc<dyn SettlementEconomy>,
        inventory: Arc<dyn Inventory>,
    ) -> Result<Self, MarketError> {
        let settlement_id = settlement.settlement_id();
        let id = ctx
            .ledger
            .store()
            .write(|tx| find_or_create_marketplace(tx, settlement_id))
            .await?;
        debug!(marketplace_id = id, settlement_id, "marketplace opened");
        Ok(Self {
            id,
            ctx,
            settlement,
            inventory,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn settlement_id(&self) -> i64 {
        self.settlement.settlement_id()
    }

    /// Create (or update) the market condition for `resource`.
    pub async fn open_condition(
        &self,
        resource: &str,
        supply: i64,
        demand: i64,
    ) -> Result<MarketCondition, MarketError> {
        let resource = resource.trim();
        let condition = self
            .ctx
            .ledger
            .store()
            .write(|tx| upsert_condition(tx, self.id, resource, supply, demand))
            .await?;
        info!(
            marketplace_id = self.id,
            resource,
            supply,
            demand,
            "market condition set"
        );
        Ok(condition)
    }

    pub async fn current_market_condition(
        &self,
        resource: &str,
    ) -> Result<Option<MarketCondition>, MarketError> {
        let conn = self.ctx.ledger.store().lock().await;
        find_condition(&conn, self.id, resource.trim())
    }

    pub async fn conditions(&self) -> Result<Vec<MarketCondition>, MarketError> {
        let conn = self.ctx.ledger.store().lock().await;
        list_conditions(&conn, self.id)
    }

    /// Persist an order and immediately try to fill it.
    ///
    /// Any failure aborts the whole placement: no order row, no transfers, no price print.
    pub async fn place_order(
        &self,
        orderable: EntityRef,
        resource: &str,
        order_type: OrderType,
        quantity: i64,
    ) -> Result<Placement, MarketError> {
        let resource = resource.trim();
        let result = self
            .commit_with_goods(|tx| {
                if quantity <= 0 {
                    return Err(MarketError::InvalidQuantity(quantity));
                }
                let condition = find_condition(tx, self.id, resource)?.ok_or_else(|| {
                    MarketError::UnknownResource {
                        marketplace_id: self.id,
                        resource: resource.to_string(),
                    }
                })?;

                let mut order = insert_order(
                    tx,
                    &NewOrder {
                        market_condition_id: condition.id,
                        base_settlement_id: self.settlement_id(),
                        orderable,
                        order_type,
                        resource: &condition.resource,
                        quantity,
                    },
                    self.ctx.order_ttl,
                )?;

                let counters = self.find_matching_orders(&order);
                if counters.is_empty() {
                    return Ok(((order, None), None));
                }
                let (trade, goods) = self.execute_within(tx, &mut order, &counters)?;
                Ok(((order, Some(trade)), Some(goods)))
            })
            .await;

        match result {
            Ok((order, trade)) => {
                info!(
                    order_id = order.id,
                    orderable = %orderable,
                    resource,
                    order_type = %order_type,
                    quantity,
                    remaining = order.quantity,
                    "order placed"
                );
                Ok(Placement { order, trade })
            }
            Err(e) => {
                error!(
                    marketplace_id = self.id,
                    orderable = %orderable,
                    resource,
                    order_type = %order_type,
                    quantity,
                    error = %e,
                    "order placement failed"
                );
                Err(e)
            }
        }
    }

    /// NPC liquidity for a sell order: at most one synthetic buy at the settlement's bid.
    pub fn find_matching_orders(&self, order: &Order) -> Vec<CounterOrder> {
        if order.order_type != OrderType::Sell {
            return Vec::new();
        }
        let price = self.settlement.npc_market_bid(&order.resource);
        let capacity = self.settlement.npc_buy_capacity(&order.resource);
        let volume = order.quantity.min(capacity);
        if volume <= 0 || price <= Decimal::ZERO {
            return Vec::new();
        }
        vec![CounterOrder::Synthetic(SyntheticCounterOrder {
            orderable: self.settlement.entity(),
            resource: order.resource.clone(),
            order_type: OrderType::Buy,
            quantity: volume,
            price,
            market_condition_id: order.market_condition_id,
        })]
    }

    /// Execute `sell_order` against the first counter order, in its own transaction.
    ///
    /// On success the caller's order is updated with its remaining quantity.
    pub async fn execute_trades(
        &self,
        sell_order: &mut Order,
        counter_orders: &[CounterOrder],
    ) -> Result<Trade, MarketError> {
        let mut working = sell_order.clone();
        let result = self
            .commit_with_goods(|tx| {
                let (trade, goods) = self.execute_within(tx, &mut working, counter_orders)?;
                Ok((trade, Some(goods)))
            })
            .await;
        match result {
            Ok(trade) => {
                *sell_order = working;
                Ok(trade)
            }
            Err(e) => {
                error!(order_id = sell_order.id, error = %e, "trade execution failed");
                Err(e)
            }
        }
    }

    fn execute_within(
        &self,
        tx: &Transaction<'_>,
        sell_order: &mut Order,
        counter_orders: &[CounterOrder],
    ) -> Result<(Trade, GoodsMovement), MarketError> {
        let counter = counter_orders.first().ok_or(MarketError::NoCounterOrder {
            order_id: sell_order.id,
        })?;

        // Quantities come from the stored rows, never from the caller's copies.
        *sell_order = load_order(tx, sell_order.id, self.ctx.order_ttl)?;
        if sell_order.order_type != OrderType::Sell || counter.order_type() != OrderType::Buy {
            return Err(MarketError::UnsupportedMatch {
                order_id: sell_order.id,
                order_type: sell_order.order_type,
            });
        }
        require_open(sell_order)?;
        let condition = load_condition(tx, sell_order.market_condition_id)?;
        if condition.marketplace_id != self.id {
            return Err(MarketError::ForeignOrder {
                order_id: sell_order.id,
                marketplace_id: self.id,
            });
        }

        let (counter_condition_id, counter_resource, available, buyer) = match counter {
            CounterOrder::Resting { order, .. } => {
                let stored = load_order(tx, order.id, self.ctx.order_ttl)?;
                if stored.order_type != OrderType::Buy {
                    return Err(MarketError::UnsupportedMatch {
                        order_id: stored.id,
                        order_type: stored.order_type,
                    });
                }
                require_open(&stored)?;
                (
                    stored.market_condition_id,
                    stored.resource,
                    stored.quantity,
                    stored.orderable,
                )
            }
            CounterOrder::Synthetic(s) => (
                s.market_condition_id,
                s.resource.clone(),
                s.quantity,
                s.orderable,
            ),
        };
        if counter_condition_id != sell_order.market_condition_id
            || counter_resource != sell_order.resource
        {
            return Err(MarketError::CounterMismatch {
                order_id: sell_order.id,
                resource: sell_order.resource.clone(),
                counter_resource,
            });
        }

        let volume = sell_order.quantity.min(available);
        if volume <= 0 {
            return Err(MarketError::InvalidQuantity(volume));
        }
        let price = counter.price();

        let service = TradeExecutionService {
            ledger: &self.ctx.ledger,
            tax: &self.ctx.tax,
            inventory: self.inventory.as_ref(),
            currency_id: self.ctx.trade_currency_id,
        };
        let executed = service.execute(
            tx,
            &TradeTerms {
                market_condition_id: sell_order.market_condition_id,
                order_id: sell_order.id,
                seller: sell_order.orderable,
                buyer,
                resource: &sell_order.resource,
                volume,
                price,
            },
        )?;

        finalize_order(tx, sell_order, volume)?;
        if let CounterOrder::Resting { order, .. } = counter {
            let mut resting = load_order(tx, order.id, self.ctx.order_ttl)?;
            finalize_order(tx, &mut resting, volume)?;
        }
        Ok(executed)
    }

    /// Run `f` in one transaction, then move goods, then commit.
    async fn commit_with_goods<T, F>(&self, f: F) -> Result<T, MarketError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<(T, Option<GoodsMovement>), MarketError>,
    {
        let mut conn = self.ctx.ledger.store().lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let (value, goods) = f(&tx)?;

        if let Some(goods) = &goods {
            goods.apply(self.inventory.as_ref())?;
        }
        if let Err(e) = tx.commit() {
            if let Some(goods) = &goods {
                goods.reverse(self.inventory.as_ref());
            }
            return Err(e.into());
        }
        Ok(value)
    }

    pub async fn order(&self, order_id: i64) -> Result<Order, MarketError> {
        let conn = self.ctx.ledger.store().lock().await;
        load_order(&conn, order_id, self.ctx.order_ttl)
    }

    pub async fn orders(&self, resource: &str) -> Result<Vec<Order>, MarketError> {
        let conn = self.ctx.ledger.store().lock().await;
        match find_condition(&conn, self.id, resource.trim())? {
            Some(condition) => orders_for_condition(&conn, condition.id, self.ctx.order_ttl),
            None => Ok(Vec::new()),
        }
    }

    /// Live price for an order: the NPC bid for sells, the NPC ask for buys.
    ///
    /// Recomputed on every call from the current condition; nothing is snapshotted.
    pub async fn price_per_unit(&self, order: &Order) -> Result<Decimal, MarketError> {
        let condition = {
            let conn = self.ctx.ledger.store().lock().await;
            load_condition(&conn, order.market_condition_id)?
        };
        let settlement = self.settlement.as_ref();
        Ok(match order.order_type {
            OrderType::Sell => self.ctx.pricing.calculate_bid(&condition, settlement),
            OrderType::Buy => self.ctx.pricing.calculate_ask(&condition, settlement),
        })
    }

    /// Resting buy order as a counterparty, priced live.
    pub async fn resting_counter(&self, order: Order) -> Result<CounterOrder, MarketError> {
        let price = self.price_per_unit(&order).await?;
        Ok(CounterOrder::Resting { order, price })
    }

    pub async fn spread(&self, resource: &str) -> Result<PriceSpread, MarketError> {
        let condition = self.require_condition(resource).await?;
        Ok(self
            .ctx
            .pricing
            .calculate_spread(&condition, self.settlement.as_ref()))
    }

    pub async fn current_price(&self, resource: &str) -> Result<Decimal, MarketError> {
        let condition = self.require_condition(resource).await?;
        let conn = self.ctx.ledger.store().lock().await;
        current_price(&conn, condition.id)
    }

    pub async fn average_price(
        &self,
        resource: &str,
        window_days: i64,
    ) -> Result<Option<Decimal>, MarketError> {
        let condition = self.require_condition(resource).await?;
        let conn = self.ctx.ledger.store().lock().await;
        average_price(&conn, condition.id, window_days)
    }

    pub async fn price_history(&self, resource: &str) -> Result<Vec<PriceHistory>, MarketError> {
        let condition = self.require_condition(resource).await?;
        let conn = self.ctx.ledger.store().lock().await;
        price_history(&conn, condition.id)
    }

    pub async fn trades_for_order(&self, order_id: i64) -> Result<Vec<Trade>, MarketError> {
        let conn = self.ctx.ledger.store().lock().await;
        trades_for_order(&conn, order_id)
    }

    pub async fn supply_chains(&self, trade_id: i64) -> Result<Vec<SupplyChain>, MarketError> {
        let conn = self.ctx.ledger.store().lock().await;
        supply_chains_for_trade(&conn, trade_id)
    }

    async fn require_condition(&self, resource: &str) -> Result<MarketCondition, MarketError> {
        self.current_market_condition(resource)
            .await?
            .ok_or_else(|| MarketError::UnknownResource {
                marketplace_id: self.id,
                resource: resource.trim().to_string(),
            })
    }
}

fn require_open(order: &Order) -> Result<(), MarketError> {
    match order.status() {
        OrderStatus::Pending => Ok(()),
        status => Err(MarketError::OrderNotOpen {
            order_id: order.id,
            status,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::entity::EntityRegistry;
    use crate::error::ErrorClass;
    use crate::ledger::{NewCurrency, TAX_AUTHORITY};
    use crate::market::pricing::BasePriceTable;
    use crate::market::settlement::{InMemoryInventory, SimulatedSettlement};
    use rust_decimal_macros::dec;

    struct Fixture {
        ledger: Ledger,
        gcc: i64,
        inventory: Arc<InMemoryInventory>,
        settlement: Arc<SimulatedSettlement>,
        marketplace: Marketplace,
    }

    async fn fixture(tax_rate: Decimal) -> Fixture {
        let ledger = Ledger::new(
            Store::open_in_memory().unwrap(),
            Arc::new(EntityRegistry::new()),
        );
        let gcc = ledger
            .create_currency(NewCurrency::new("Galactic Crypto Currency", "GCC"))
            .await
            .unwrap()
            .id;
        let tax = TaxAuthority::establish(&ledger, gcc, tax_rate).await.unwrap();
        let ctx = MarketContext {
            ledger: ledger.clone(),
            tax,
            pricing: Arc::new(NpcPriceCalculator::new(
                BasePriceTable::default().with_price("ibeam", dec!(50)),
            )),
            trade_currency_id: gcc,
            order_ttl: Duration::hours(24),
        };
        // Colony-backed settlement so the NPC buyer may run a negative balance.
        let settlement = Arc::new(
            SimulatedSettlement::new(1)
                .paid_by(EntityRef::colony(1))
                .with_npc_demand("ibeam", dec!(50), 600),
        );
        let inventory = Arc::new(InMemoryInventory::new());
        let marketplace = Marketplace::open(ctx, settlement.clone(), inventory.clone())
            .await
            .unwrap();
        marketplace.open_condition("ibeam", 1, 1).await.unwrap();
        Fixture {
            ledger,
            gcc,
            inventory,
            settlement,
            marketplace,
        }
    }

    #[tokio::test]
    async fn test_partial_fill_against_npc_capacity() {
        let f = fixture(dec!(0)).await;
        let seller = EntityRef::player(7);
        f.inventory.add(&seller, "ibeam", 1000);

        let placement = f
            .marketplace
            .place_order(seller, "ibeam", OrderType::Sell, 1000)
            .await
            .unwrap();

        assert_eq!(placement.order.quantity, 400);
        assert_eq!(placement.order.initial_quantity, 1000);
        assert_eq!(placement.order.status(), OrderStatus::Pending);
        let trade = placement.trade.clone().unwrap();
        assert_eq!(trade.volume, 600);
        assert_eq!(trade.price, dec!(50));
        assert_eq!(trade.gross_value, dec!(30000));

        let history = f.marketplace.price_history("ibeam").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].price, dec!(50));
        assert_eq!(f.marketplace.current_price("ibeam").await.unwrap(), dec!(50));

        assert_eq!(f.ledger.balance_of(seller, f.gcc).await.unwrap(), dec!(30000));
        assert_eq!(
            f.ledger.balance_of(EntityRef::colony(1), f.gcc).await.unwrap(),
            dec!(-30000)
        );
        assert_eq!(f.inventory.available(&seller, "ibeam"), 400);
        assert_eq!(f.inventory.available(&EntityRef::colony(1), "ibeam"), 600);

        let chains = f.marketplace.supply_chains(trade.id).await.unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].status, "Awaiting Launch");
        assert_eq!(chains[0].origin, seller);

        let stored = f.marketplace.order(placement.order.id).await.unwrap();
        assert_eq!(stored.quantity, 400);
        assert!(placement.into_resting().is_some());
    }

    #[tokio::test]
    async fn test_full_fill_collects_tax() {
        let f = fixture(dec!(0.05)).await;
        let seller = EntityRef::player(7);
        f.inventory.add(&seller, "ibeam", 100);

        let placement = f
            .marketplace
            .place_order(seller, "ibeam", OrderType::Sell, 100)
            .await
            .unwrap();
        assert!(placement.is_filled());
        assert_eq!(placement.order.status(), OrderStatus::Filled);
        let trade = placement.trade.clone().unwrap();
        assert_eq!(trade.tax_paid, dec!(250));

        assert_eq!(f.ledger.balance_of(seller, f.gcc).await.unwrap(), dec!(4750));
        assert_eq!(
            f.ledger.balance_of(TAX_AUTHORITY, f.gcc).await.unwrap(),
            dec!(250)
        );
        assert!(placement.into_resting().is_none());
    }

    #[tokio::test]
    async fn test_buy_orders_rest_without_matching() {
        let f = fixture(dec!(0)).await;
        let placement = f
            .marketplace
            .place_order(EntityRef::player(2), "ibeam", OrderType::Buy, 10)
            .await
            .unwrap();
        assert!(placement.trade.is_none());
        assert_eq!(placement.order.quantity, 10);
        assert!(f.marketplace.price_history("ibeam").await.unwrap().is_empty());
        // Live ask for a buy order.
        assert_eq!(
            f.marketplace.price_per_unit(&placement.order).await.unwrap(),
            dec!(50)
        );
    }

    #[tokio::test]
    async fn test_failed_execution_leaves_no_trace() {
        let f = fixture(dec!(0)).await;
        let seller = EntityRef::player(7);
        f.inventory.add(&seller, "ibeam", 10);

        let err = f
            .marketplace
            .place_order(seller, "ibeam", OrderType::Sell, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::InsufficientInventory { .. }));

        assert!(f.marketplace.orders("ibeam").await.unwrap().is_empty());
        assert!(f.marketplace.price_history("ibeam").await.unwrap().is_empty());
        assert_eq!(f.ledger.balance_of(seller, f.gcc).await.unwrap(), dec!(0));
        assert_eq!(f.inventory.available(&seller, "ibeam"), 10);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let f = fixture(dec!(0)).await;
        let seller = EntityRef::player(7);
        assert!(matches!(
            f.marketplace
                .place_order(seller, "unobtainium", OrderType::Sell, 5)
                .await,
            Err(MarketError::UnknownResource { .. })
        ));
        assert!(matches!(
            f.marketplace.place_order(seller, "ibeam", OrderType::Sell, 0).await,
            Err(MarketError::InvalidQuantity(0))
        ));
    }

    #[tokio::test]
    async fn test_no_npc_demand_means_no_trade() {
        let f = fixture(dec!(0)).await;
        f.settlement.set_npc_demand("ibeam", dec!(50), 0);
        let seller = EntityRef::player(7);
        f.inventory.add(&seller, "ibeam", 10);

        let placement = f
            .marketplace
            .place_order(seller, "ibeam", OrderType::Sell, 10)
            .await
            .unwrap();
        assert!(placement.trade.is_none());
        assert_eq!(placement.order.quantity, 10);
        assert!(f.marketplace.find_matching_orders(&placement.order).is_empty());
    }

    #[tokio::test]
    async fn test_execute_against_resting_buy_order() {
        let f = fixture(dec!(0)).await;
        f.settlement.set_npc_demand("ibeam", dec!(50), 0);
        let buyer = EntityRef::colony(9);
        let seller = EntityRef::player(7);
        f.inventory.add(&seller, "ibeam", 30);

        let bid = f
            .marketplace
            .place_order(buyer, "ibeam", OrderType::Buy, 20)
            .await
            .unwrap()
            .order;
        let mut ask = f
            .marketplace
            .place_order(seller, "ibeam", OrderType::Sell, 30)
            .await
            .unwrap()
            .order;

        let counter = f.marketplace.resting_counter(bid.clone()).await.unwrap();
        let trade = f
            .marketplace
            .execute_trades(&mut ask, &[counter])
            .await
            .unwrap();

        assert_eq!(trade.volume, 20);
        assert_eq!(trade.buyer, buyer);
        assert_eq!(ask.quantity, 10);
        assert_eq!(f.marketplace.order(bid.id).await.unwrap().quantity, 0);
        assert_eq!(f.inventory.available(&buyer, "ibeam"), 20);

        assert!(matches!(
            f.marketplace.execute_trades(&mut ask, &[]).await,
            Err(MarketError::NoCounterOrder { .. })
        ));
    }

    #[tokio::test]
    async fn test_filled_orders_never_fill_again() {
        let f = fixture(dec!(0)).await;
        f.settlement.set_npc_demand("ibeam", dec!(50), 0);
        let buyer = EntityRef::colony(9);
        let seller = EntityRef::player(7);
        f.inventory.add(&seller, "ibeam", 50);

        let bid = f
            .marketplace
            .place_order(buyer, "ibeam", OrderType::Buy, 20)
            .await
            .unwrap()
            .order;
        let mut first = f
            .marketplace
            .place_order(seller, "ibeam", OrderType::Sell, 20)
            .await
            .unwrap()
            .order;
        let mut second = f
            .marketplace
            .place_order(seller, "ibeam", OrderType::Sell, 20)
            .await
            .unwrap()
            .order;
        let mut stale_first = first.clone();

        let counter = f.marketplace.resting_counter(bid.clone()).await.unwrap();
        f.marketplace
            .execute_trades(&mut first, &[counter.clone()])
            .await
            .unwrap();
        assert_eq!(first.quantity, 0);

        // The counter still claims 20 units; the stored bid has none left.
        let err = f
            .marketplace
            .execute_trades(&mut second, &[counter.clone()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MarketError::OrderNotOpen {
                order_id,
                status: OrderStatus::Filled,
            } if order_id == bid.id
        ));
        assert_eq!(second.quantity, 20);

        let fresh_bid = f
            .marketplace
            .place_order(buyer, "ibeam", OrderType::Buy, 20)
            .await
            .unwrap()
            .order;
        let fresh_counter = f.marketplace.resting_counter(fresh_bid).await.unwrap();
        let err = f
            .marketplace
            .execute_trades(&mut stale_first, &[fresh_counter])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MarketError::OrderNotOpen { order_id, .. } if order_id == first.id
        ));

        assert_eq!(f.inventory.available(&buyer, "ibeam"), 20);
        assert_eq!(f.inventory.available(&seller, "ibeam"), 30);
        assert_eq!(f.ledger.balance_of(seller, f.gcc).await.unwrap(), dec!(1000));
        assert_eq!(f.marketplace.trades_for_order(first.id).await.unwrap().len(), 1);
        assert!(f
            .marketplace
            .trades_for_order(second.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_counter_for_another_resource_is_rejected() {
        let f = fixture(dec!(0)).await;
        f.settlement.set_npc_demand("ibeam", dec!(50), 0);
        f.marketplace.open_condition("water", 1, 1).await.unwrap();
        let buyer = EntityRef::colony(9);
        let seller = EntityRef::player(7);
        f.inventory.add(&seller, "ibeam", 10);

        let water_bid = f
            .marketplace
            .place_order(buyer, "water", OrderType::Buy, 10)
            .await
            .unwrap()
            .order;
        let mut ask = f
            .marketplace
            .place_order(seller, "ibeam", OrderType::Sell, 10)
            .await
            .unwrap()
            .order;

        let counter = f.marketplace.resting_counter(water_bid.clone()).await.unwrap();
        let err = f
            .marketplace
            .execute_trades(&mut ask, &[counter])
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::CounterMismatch { .. }));
        assert_eq!(err.class(), ErrorClass::Validation);

        assert_eq!(ask.quantity, 10);
        assert_eq!(f.marketplace.order(water_bid.id).await.unwrap().quantity, 10);
        assert_eq!(f.inventory.available(&seller, "ibeam"), 10);
        assert_eq!(f.ledger.balance_of(seller, f.gcc).await.unwrap(), dec!(0));
        assert!(f.marketplace.price_history("ibeam").await.unwrap().is_empty());
        assert!(f.marketplace.price_history("water").await.unwrap().is_empty());
    }
}

//! NPC bid/ask pricing.
//!
//! ask = base × supply_multiplier(supply) × demand_modifier(settlement)
//! bid = base × demand_multiplier(demand) × supply_modifier(settlement)
//!
//! The settlement modifiers come from its inventory level for the resource: a settlement
//! that is nearly out pays (and charges) more.

use super::condition::MarketCondition;
use super::settlement::SettlementEconomy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_BASE_PRICE: Decimal = dec!(10);

const DEMAND_STEP: Decimal = dec!(0.1);
const SUPPLY_STEP: Decimal = dec!(0.05);

const INVENTORY_CRITICAL_THRESHOLD: f64 = 0.10;
const INVENTORY_LOW_THRESHOLD: f64 = 0.30;
const INVENTORY_CRITICAL_MULTIPLIER: Decimal = dec!(1.2);
const INVENTORY_LOW_MULTIPLIER: Decimal = dec!(1.1);

/// Static per-resource base prices with a default for anything unlisted.
#[derive(Debug, Clone)]
pub struct BasePriceTable {
    default: Decimal,
    prices: HashMap<String, Decimal>,
}

impl Default for BasePriceTable {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_PRICE)
    }
}

impl BasePriceTable {
    pub fn new(default: Decimal) -> Self {
        Self {
            default,
            prices: HashMap::new(),
        }
    }

    pub fn with_price(mut self, resource: impl Into<String>, price: Decimal) -> Self {
        self.prices.insert(resource.into(), price);
        self
    }

    pub fn insert(&mut self, resource: impl Into<String>, price: Decimal) {
        self.prices.insert(resource.into(), price);
    }

    pub fn price_for(&self, resource: &str) -> Decimal {
        self.prices.get(resource).copied().unwrap_or(self.default)
    }

    pub fn default_price(&self) -> Decimal {
        self.default
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceSpread {
    pub bid: Decimal,
    pub ask: Decimal,
    pub spread: Decimal,
    pub spread_percent: Option<Decimal>,
}

#[derive(Debug, Clone, Default)]
pub struct NpcPriceCalculator {
    base_prices: BasePriceTable,
}

impl NpcPriceCalculator {
    pub fn new(base_prices: BasePriceTable) -> Self {
        Self { base_prices }
    }

    pub fn base_prices(&self) -> &BasePriceTable {
        &self.base_prices
    }

    /// `1 + (d - 1) × 0.1`
    pub fn demand_multiplier(demand: i64) -> Decimal {
        Decimal::ONE + Decimal::from(demand - 1) * DEMAND_STEP
    }

    /// `1 / (1 + (s - 1) × 0.05)`
    pub fn supply_multiplier(supply: i64) -> Decimal {
        Decimal::ONE / (Decimal::ONE + Decimal::from(supply - 1) * SUPPLY_STEP)
    }

    pub fn inventory_modifier(level: Option<f64>) -> Decimal {
        match level {
            Some(l) if l < INVENTORY_CRITICAL_THRESHOLD => INVENTORY_CRITICAL_MULTIPLIER,
            Some(l) if l < INVENTORY_LOW_THRESHOLD => INVENTORY_LOW_MULTIPLIER,
            _ => Decimal::ONE,
        }
    }

    fn demand_modifier(settlement: &dyn SettlementEconomy, resource: &str) -> Decimal {
        Self::inventory_modifier(settlement.inventory_level(resource))
    }

    fn supply_modifier(settlement: &dyn SettlementEconomy, resource: &str) -> Decimal {
        Self::inventory_modifier(settlement.inventory_level(resource))
    }

    /// Price at which the NPC sells to players.
    pub fn calculate_ask(
        &self,
        condition: &MarketCondition,
        settlement: &dyn SettlementEconomy,
    ) -> Decimal {
        let base = self.base_prices.price_for(&condition.resource);
        (base
            * Self::supply_multiplier(condition.supply)
            * Self::demand_modifier(settlement, &condition.resource))
        .round_dp(2)
    }

    /// Price at which the NPC buys from players.
    pub fn calculate_bid(
        &self,
        condition: &MarketCondition,
        settlement: &dyn SettlementEconomy,
    ) -> Decimal {
        let base = self.base_prices.price_for(&condition.resource);
        (base
            * Self::demand_multiplier(condition.demand)
            * Self::supply_modifier(settlement, &condition.resource))
        .round_dp(2)
    }

    pub fn calculate_spread(
        &self,
        condition: &MarketCondition,
        settlement: &dyn SettlementEconomy,
    ) -> PriceSpread {
        let bid = self.calculate_bid(condition, settlement);
        let ask = self.calculate_ask(condition, settlement);
        let spread = (ask - bid).round_dp(2);
        let spread_percent = if ask.is_zero() {
            None
        } else {
            Some((spread / ask * dec!(100)).round_dp(2))
        };
        PriceSpread {
            bid,
            ask,
            spread,
            spread_percent,
        }
    }
}

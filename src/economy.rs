//! Startup wiring: store, ledger, trade currency, tax authority and the market and
//! insurance services built on them.

use crate::config::EconomyConfig;
use crate::db::Store;
use crate::entity::{EntityDirectory, EntityRegistry};
use crate::insurance::{InsuranceMarketService, InsuranceService};
use crate::ledger::{Currency, Ledger, NewCurrency, TaxAuthority};
use crate::market::{
    Inventory, MarketContext, MarketError, Marketplace, NpcPriceCalculator, SettlementEconomy,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Everything a caller needs to drive the economy. Cheap to clone.
#[derive(Clone)]
pub struct Economy {
    pub config: EconomyConfig,
    pub registry: Arc<EntityRegistry>,
    pub ledger: Ledger,
    pub trade_currency: Currency,
    pub market: MarketContext,
    pub insurance: InsuranceService,
    pub insurance_market: InsuranceMarketService,
}

impl Economy {
    /// Open the configured database file and wire the services.
    pub async fn bootstrap(config: EconomyConfig) -> Result<Self> {
        let store = Store::open(&config.db_path)?;
        Self::with_store(config, store).await
    }

    pub async fn with_store(config: EconomyConfig, store: Store) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(EntityRegistry::new());
        let directory: Arc<dyn EntityDirectory> = registry.clone();
        let ledger = Ledger::new(store, directory);

        let trade_currency = ledger
            .find_or_create_currency(
                NewCurrency::new(config.trade_currency.clone(), config.trade_currency.clone())
                    .system(),
            )
            .await
            .with_context(|| {
                format!("Failed to resolve trade currency {}", config.trade_currency)
            })?;

        let tax = TaxAuthority::establish(&ledger, trade_currency.id, config.sales_tax_rate)
            .await
            .context("Failed to establish tax authority")?;

        let market = MarketContext {
            ledger: ledger.clone(),
            tax,
            pricing: Arc::new(NpcPriceCalculator::new(config.base_prices()?)),
            trade_currency_id: trade_currency.id,
            order_ttl: config.order_ttl(),
        };

        let insurance =
            InsuranceService::new(ledger.clone(), trade_currency.id, config.solvency_floor);
        let insurance_market =
            InsuranceMarketService::new(insurance.clone(), config.insurer_starting_reserve);

        info!(
            db = %config.db_path,
            currency = %trade_currency.symbol,
            sales_tax = %config.sales_tax_rate,
            solvency_floor = config.solvency_floor,
            "economy ready"
        );

        Ok(Self {
            config,
            registry,
            ledger,
            trade_currency,
            market,
            insurance,
            insurance_market,
        })
    }

    /// Marketplace for a settlement, created on first use.
    pub async fn marketplace(
        &self,
        settlement: Arc<dyn SettlementEconomy>,
        inventory: Arc<dyn Inventory>,
    ) -> Result<Marketplace, MarketError> {
        Marketplace::open(self.market.clone(), settlement, inventory).await
    }
}

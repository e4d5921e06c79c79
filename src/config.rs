//! Runtime configuration, read from the environment (and `.env`).

use crate::insurance::DEFAULT_SOLVENCY_FLOOR;
use crate::market::order::DEFAULT_ORDER_TTL_HOURS;
use crate::market::pricing::{BasePriceTable, DEFAULT_BASE_PRICE};
use anyhow::{bail, Context, Result};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct EconomyConfig {
    pub db_path: String,
    /// Symbol of the currency trades, premiums and reserves settle in.
    pub trade_currency: String,
    pub sales_tax_rate: Decimal,
    pub order_ttl_hours: i64,
    pub solvency_floor: f64,
    pub insurer_starting_reserve: Decimal,
    pub default_base_price: Decimal,
    pub base_prices_path: Option<PathBuf>,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            db_path: "./galaxy_economy.db".to_string(),
            trade_currency: "GCC".to_string(),
            sales_tax_rate: dec!(0.05),
            order_ttl_hours: DEFAULT_ORDER_TTL_HOURS,
            solvency_floor: DEFAULT_SOLVENCY_FLOOR,
            insurer_starting_reserve: dec!(100000),
            default_base_price: DEFAULT_BASE_PRICE,
            base_prices_path: None,
        }
    }
}

/// Parse `key`, falling back to `default` when unset or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "invalid configuration value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

impl EconomyConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let db_path = std::env::var("ECONOMY_DB_PATH").unwrap_or(defaults.db_path);
        let trade_currency =
            std::env::var("ECONOMY_TRADE_CURRENCY").unwrap_or(defaults.trade_currency);

        let config = Self {
            db_path,
            trade_currency,
            sales_tax_rate: env_or("ECONOMY_SALES_TAX_RATE", defaults.sales_tax_rate),
            order_ttl_hours: env_or("ECONOMY_ORDER_TTL_HOURS", defaults.order_ttl_hours),
            solvency_floor: env_or("ECONOMY_SOLVENCY_FLOOR", defaults.solvency_floor),
            insurer_starting_reserve: env_or(
                "ECONOMY_INSURER_STARTING_RESERVE",
                defaults.insurer_starting_reserve,
            ),
            default_base_price: env_or("ECONOMY_DEFAULT_BASE_PRICE", defaults.default_base_price),
            base_prices_path: std::env::var("ECONOMY_BASE_PRICES_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sales_tax_rate < Decimal::ZERO || self.sales_tax_rate >= Decimal::ONE {
            bail!("sales tax rate must be in [0, 1), got {}", self.sales_tax_rate);
        }
        if !(self.solvency_floor > 0.0 && self.solvency_floor <= 1.0) {
            bail!("solvency floor must be in (0, 1], got {}", self.solvency_floor);
        }
        if self.order_ttl_hours <= 0 {
            bail!("order TTL must be positive, got {}h", self.order_ttl_hours);
        }
        if self.insurer_starting_reserve < Decimal::ZERO {
            bail!(
                "insurer starting reserve cannot be negative, got {}",
                self.insurer_starting_reserve
            );
        }
        if self.default_base_price <= Decimal::ZERO {
            bail!("default base price must be positive, got {}", self.default_base_price);
        }
        Ok(())
    }

    pub fn order_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.order_ttl_hours)
    }

    /// Base price table from `base_prices_path`, or just the default price when unset.
    pub fn base_prices(&self) -> Result<BasePriceTable> {
        match &self.base_prices_path {
            Some(path) => load_base_prices(path, self.default_base_price),
            None => Ok(BasePriceTable::new(self.default_base_price)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BasePriceFile {
    default: Option<f64>,
    #[serde(default)]
    prices: BTreeMap<String, f64>,
}

fn to_price(resource: &str, value: f64) -> Result<Decimal> {
    let price = Decimal::from_f64(value)
        .with_context(|| format!("base price for {} is not a finite number", resource))?
        .round_dp(2);
    if price <= Decimal::ZERO {
        bail!("base price for {} must be positive, got {}", resource, price);
    }
    Ok(price)
}

/// Read a TOML price file: an optional top-level `default` and a `[prices]` table.
pub fn load_base_prices(path: &Path, fallback_default: Decimal) -> Result<BasePriceTable> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read base prices from {}", path.display()))?;
    let file: BasePriceFile = toml::from_str(&raw)
        .with_context(|| format!("Failed to parse base prices in {}", path.display()))?;

    let default = match file.default {
        Some(value) => to_price("default", value)?,
        None => fallback_default,
    };
    let mut table = BasePriceTable::new(default);
    for (resource, value) in &file.prices {
        table.insert(resource.clone(), to_price(resource, *value)?);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = EconomyConfig::default();
        config.validate().unwrap();
        assert_eq!(config.order_ttl(), chrono::Duration::hours(24));
        assert_eq!(config.base_prices().unwrap().price_for("anything"), dec!(10));
    }

    #[test]
    fn test_validate_rejects_nonsense() {
        let mut config = EconomyConfig::default();
        config.sales_tax_rate = dec!(-0.01);
        assert!(config.validate().is_err());

        let mut config = EconomyConfig::default();
        config.solvency_floor = 0.0;
        assert!(config.validate().is_err());
        config.solvency_floor = 1.5;
        assert!(config.validate().is_err());

        let mut config = EconomyConfig::default();
        config.order_ttl_hours = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_base_prices_from_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "default = 12.5\n\n[prices]\nibeam = 50.0\nwater = 2.25").unwrap();

        let table = load_base_prices(file.path(), dec!(10)).unwrap();
        assert_eq!(table.default_price(), dec!(12.5));
        assert_eq!(table.price_for("ibeam"), dec!(50));
        assert_eq!(table.price_for("water"), dec!(2.25));
        assert_eq!(table.price_for("ore"), dec!(12.5));
    }

    #[test]
    fn test_load_base_prices_rejects_non_positive() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[prices]\nibeam = 0.0").unwrap();
        assert!(load_base_prices(file.path(), dec!(10)).is_err());
    }
}

use super::currency::currency_by_id;
use super::{Ledger, LedgerError};
use chrono::Utc;
use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension};
use std::str::FromStr;
use tracing::info;

/// Directed rate lookup. Missing pairs and identical currencies resolve to 1.
pub(crate) fn rate_within(
    conn: &Connection,
    from_currency: i64,
    to_currency: i64,
) -> Result<Decimal, LedgerError> {
    if from_currency == to_currency {
        return Ok(Decimal::ONE);
    }
    let raw: Option<String> = conn
        .query_row(
            "SELECT rate FROM exchange_rates WHERE from_currency_id = ?1 AND to_currency_id = ?2",
            params![from_currency, to_currency],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => Decimal::from_str(&raw).map_err(|e| {
            LedgerError::Storage(rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))
        }),
        None => Ok(Decimal::ONE),
    }
}

pub(crate) fn convert_within(
    conn: &Connection,
    amount: Decimal,
    from_currency: i64,
    to_currency: i64,
) -> Result<Decimal, LedgerError> {
    Ok(amount * rate_within(conn, from_currency, to_currency)?)
}

impl Ledger {
    /// Upsert the directed rate `from -> to`.
    pub async fn set_rate(
        &self,
        from_currency: i64,
        to_currency: i64,
        rate: Decimal,
    ) -> Result<(), LedgerError> {
        if rate <= Decimal::ZERO || from_currency == to_currency {
            return Err(LedgerError::InvalidRate { rate });
        }
        self.store
            .write(|tx| {
                currency_by_id(tx, from_currency)?;
                currency_by_id(tx, to_currency)?;
                tx.execute(
                    "INSERT INTO exchange_rates (from_currency_id, to_currency_id, rate, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(from_currency_id, to_currency_id)
                     DO UPDATE SET rate = excluded.rate, updated_at = excluded.updated_at",
                    params![
                        from_currency,
                        to_currency,
                        rate.to_string(),
                        Utc::now().to_rfc3339()
                    ],
                )?;
                Ok::<_, LedgerError>(())
            })
            .await?;
        info!(from_currency, to_currency, %rate, "exchange rate set");
        Ok(())
    }

    pub async fn get_rate(
        &self,
        from_currency: i64,
        to_currency: i64,
    ) -> Result<Decimal, LedgerError> {
        let conn = self.store.lock().await;
        rate_within(&conn, from_currency, to_currency)
    }

    pub async fn convert(
        &self,
        amount: Decimal,
        from_currency: i64,
        to_currency: i64,
    ) -> Result<Decimal, LedgerError> {
        let conn = self.store.lock().await;
        convert_within(&conn, amount, from_currency, to_currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::entity::EntityRegistry;
    use crate::ledger::NewCurrency;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_rates_default_to_one_and_upsert() {
        let ledger = Ledger::new(
            Store::open_in_memory().unwrap(),
            Arc::new(EntityRegistry::new()),
        );
        let gcc = ledger
            .create_currency(NewCurrency::new("Galactic Crypto Currency", "GCC"))
            .await
            .unwrap();
        let usd = ledger
            .create_currency(NewCurrency::new("US Dollar", "USD"))
            .await
            .unwrap();

        assert_eq!(ledger.get_rate(usd.id, gcc.id).await.unwrap(), Decimal::ONE);
        assert_eq!(ledger.get_rate(gcc.id, gcc.id).await.unwrap(), Decimal::ONE);

        ledger.set_rate(usd.id, gcc.id, dec!(2)).await.unwrap();
        ledger.set_rate(usd.id, gcc.id, dec!(2.5)).await.unwrap();
        assert_eq!(ledger.get_rate(usd.id, gcc.id).await.unwrap(), dec!(2.5));
        // Directed: the reverse pair is still unset.
        assert_eq!(ledger.get_rate(gcc.id, usd.id).await.unwrap(), Decimal::ONE);

        assert_eq!(
            ledger.convert(dec!(40), usd.id, gcc.id).await.unwrap(),
            dec!(100)
        );
        assert_eq!(ledger.convert(dec!(40), gcc.id, gcc.id).await.unwrap(), dec!(40));

        assert!(matches!(
            ledger.set_rate(usd.id, gcc.id, dec!(0)).await,
            Err(LedgerError::InvalidRate { .. })
        ));
    }
}

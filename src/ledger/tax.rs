use super::account::{resolve_account, transfer_within, Account};
use super::currency::currency_by_id;
use super::transaction::TransactionType;
use super::{Ledger, LedgerError};
use crate::entity::{EntityDirectory, EntityKind, EntityRef};
use rust_decimal::Decimal;
use rusqlite::Connection;
use tracing::{debug, info};

/// The single tax-collecting entity.
pub const TAX_AUTHORITY: EntityRef = EntityRef::new(EntityKind::TaxAuthority, 1);

/// Sales tax collector, resolved once at startup and handed to the market.
#[derive(Debug, Clone)]
pub struct TaxAuthority {
    entity: EntityRef,
    currency_id: i64,
    default_rate: Decimal,
}

impl TaxAuthority {
    /// Open the authority's account in `currency_id` and fix the default sales tax rate.
    pub async fn establish(
        ledger: &Ledger,
        currency_id: i64,
        default_rate: Decimal,
    ) -> Result<Self, LedgerError> {
        if default_rate < Decimal::ZERO || default_rate >= Decimal::ONE {
            return Err(LedgerError::InvalidRate { rate: default_rate });
        }
        let account = ledger
            .find_or_create_account(TAX_AUTHORITY, currency_id)
            .await?;
        info!(
            account_id = account.id,
            currency_id,
            rate = %default_rate,
            "tax authority established"
        );
        Ok(Self {
            entity: TAX_AUTHORITY,
            currency_id,
            default_rate,
        })
    }

    pub fn entity(&self) -> EntityRef {
        self.entity
    }

    pub fn currency_id(&self) -> i64 {
        self.currency_id
    }

    pub fn default_rate(&self) -> Decimal {
        self.default_rate
    }

    /// Entity override from the directory, else the default rate.
    pub fn rate_for(&self, directory: &dyn EntityDirectory, seller: &EntityRef) -> Decimal {
        directory.tax_rate(seller).unwrap_or(self.default_rate)
    }

    /// Move `gross × rate` from the seller to the authority as a `tax_collection` transfer.
    ///
    /// Returns the tax taken and the seller's refreshed account. Zero tax writes nothing.
    pub(crate) fn collect_within(
        &self,
        conn: &Connection,
        directory: &dyn EntityDirectory,
        seller_account: &Account,
        gross: Decimal,
        rate: Decimal,
    ) -> Result<(Decimal, Account), LedgerError> {
        let precision = currency_by_id(conn, seller_account.currency_id)?.precision;
        let tax = (gross * rate).round_dp(precision);
        if tax <= Decimal::ZERO {
            return Ok((Decimal::ZERO, seller_account.clone()));
        }

        let authority_account = resolve_account(conn, &self.entity, seller_account.currency_id)?;
        let description = format!("Sales tax on {} at {}", gross, rate);
        let posted = transfer_within(
            conn,
            directory,
            seller_account,
            tax,
            &authority_account,
            TransactionType::TaxCollection,
            Some(description.as_str()),
        )?;
        debug!(
            seller = %seller_account.accountable,
            %gross,
            %tax,
            reference = %posted.reference,
            "sales tax collected"
        );
        Ok((tax, posted.from))
    }

    /// Standalone collection, in its own transaction.
    pub async fn collect_sales_tax(
        &self,
        ledger: &Ledger,
        seller_account: &mut Account,
        gross: Decimal,
    ) -> Result<Decimal, LedgerError> {
        let directory = ledger.directory.clone();
        let rate = self.rate_for(directory.as_ref(), &seller_account.accountable);
        let (tax, updated) = ledger
            .store
            .write(|tx| self.collect_within(tx, directory.as_ref(), seller_account, gross, rate))
            .await?;
        *seller_account = updated;
        Ok(tax)
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
    async fn test_collects_default_and_override_rates() {
        let registry = Arc::new(EntityRegistry::new());
        let ledger = Ledger::new(Store::open_in_memory().unwrap(), registry.clone());
        let gcc = ledger
            .create_currency(NewCurrency::new("Galactic Crypto Currency", "GCC"))
            .await
            .unwrap();
        let authority = TaxAuthority::establish(&ledger, gcc.id, dec!(0.05))
            .await
            .unwrap();

        let seller = EntityRef::player(1);
        let mut account = ledger.find_or_create_account(seller, gcc.id).await.unwrap();
        ledger.deposit(&mut account, dec!(1000), None).await.unwrap();

        let tax = authority
            .collect_sales_tax(&ledger, &mut account, dec!(1000))
            .await
            .unwrap();
        assert_eq!(tax, dec!(50));
        assert_eq!(account.balance, dec!(950));
        assert_eq!(
            ledger.balance_of(TAX_AUTHORITY, gcc.id).await.unwrap(),
            dec!(50)
        );

        let log = ledger.transactions(account.id).await.unwrap();
        let leg = log.last().unwrap();
        assert_eq!(leg.transaction_type, TransactionType::TaxCollection);
        assert_eq!(leg.recipient, TAX_AUTHORITY);

        registry.set_tax_rate(seller, dec!(0));
        let tax = authority
            .collect_sales_tax(&ledger, &mut account, dec!(1000))
            .await
            .unwrap();
        assert_eq!(tax, dec!(0));
        assert_eq!(account.balance, dec!(950));
    }

    #[tokio::test]
    async fn test_rejects_nonsense_rate() {
        let ledger = Ledger::new(
            Store::open_in_memory().unwrap(),
            Arc::new(EntityRegistry::new()),
        );
        let gcc = ledger
            .create_currency(NewCurrency::new("Galactic Crypto Currency", "GCC"))
            .await
            .unwrap();
        assert!(TaxAuthority::establish(&ledger, gcc.id, dec!(-0.1)).await.is_err());
    }
}

//! Ledger behaviour through the public API: conservation, overdraft rules, currency
//! isolation, idempotent accounts and cross-currency bond repayment.

use galaxy_economy::config::EconomyConfig;
use galaxy_economy::db::Store;
use galaxy_economy::entity::EntityRef;
use galaxy_economy::ledger::{
    Account, BondStatus, LedgerError, NewBond, NewCurrency, TransactionType,
};
use galaxy_economy::{Economy, ErrorClass};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

async fn economy() -> Economy {
    Economy::with_store(EconomyConfig::default(), Store::open_in_memory().unwrap())
        .await
        .unwrap()
}

async fn funded(economy: &Economy, entity: EntityRef, amount: Decimal) -> Account {
    let mut account = economy
        .ledger
        .find_or_create_account(entity, economy.trade_currency.id)
        .await
        .unwrap();
    if amount > Decimal::ZERO {
        economy.ledger.deposit(&mut account, amount, None).await.unwrap();
    }
    account
}

#[tokio::test]
async fn transfer_conserves_value_and_writes_matching_legs() {
    let economy = economy().await;
    let mut a = funded(&economy, EntityRef::player(1), dec!(1000)).await;
    let mut b = funded(&economy, EntityRef::player(2), dec!(500)).await;

    let reference = economy
        .ledger
        .transfer(&mut a, dec!(500), &mut b, Some("hull plating"))
        .await
        .unwrap();

    assert_eq!(a.balance, dec!(500));
    assert_eq!(b.balance, dec!(1000));
    assert_eq!(a.balance + b.balance, dec!(1500));

    let legs = economy.ledger.transactions_by_reference(reference).await.unwrap();
    assert_eq!(legs.len(), 2);
    assert_eq!(legs.iter().map(|t| t.amount).sum::<Decimal>(), Decimal::ZERO);
    let debit = legs.iter().find(|t| t.account_id == a.id).unwrap();
    let credit = legs.iter().find(|t| t.account_id == b.id).unwrap();
    assert_eq!(debit.amount, dec!(-500));
    assert_eq!(debit.recipient, EntityRef::player(2));
    assert_eq!(credit.amount, dec!(500));
    assert_eq!(credit.recipient, EntityRef::player(1));
    assert_eq!(debit.transaction_type, TransactionType::Transfer);
}

#[tokio::test]
async fn players_cannot_overdraw_but_npcs_can() {
    let economy = economy().await;

    let mut player = funded(&economy, EntityRef::player(1), dec!(1000)).await;
    let err = economy
        .ledger
        .withdraw(&mut player, dec!(1500), None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    assert_eq!(err.class(), ErrorClass::BusinessRule);
    assert_eq!(
        economy.ledger.account(player.id).await.unwrap().balance,
        dec!(1000)
    );

    let mut colony = funded(&economy, EntityRef::colony(3), dec!(100)).await;
    let balance = economy
        .ledger
        .withdraw(&mut colony, dec!(500), None)
        .await
        .unwrap();
    assert_eq!(balance, dec!(-400));

    // Explicitly flagged organizations get the same allowance.
    let guild = EntityRef::organization(9);
    economy.registry.set_npc(guild, true);
    let mut guild_account = funded(&economy, guild, Decimal::ZERO).await;
    economy
        .ledger
        .withdraw(&mut guild_account, dec!(25), None)
        .await
        .unwrap();
    assert_eq!(guild_account.balance, dec!(-25));
}

#[tokio::test]
async fn non_positive_amounts_change_nothing() {
    let economy = economy().await;
    let mut a = funded(&economy, EntityRef::player(1), dec!(100)).await;
    let mut b = funded(&economy, EntityRef::player(2), dec!(100)).await;

    for amount in [Decimal::ZERO, dec!(-5)] {
        let err = economy
            .ledger
            .transfer(&mut a, amount, &mut b, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount { .. }));
        assert_eq!(err.class(), ErrorClass::Validation);
    }
    assert_eq!(economy.ledger.account(a.id).await.unwrap().balance, dec!(100));
    assert_eq!(economy.ledger.account(b.id).await.unwrap().balance, dec!(100));
    assert_eq!(economy.ledger.transactions(a.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn currencies_are_isolated() {
    let economy = economy().await;
    let luna = economy
        .ledger
        .create_currency(NewCurrency::new("Luna Dollar", "lnd"))
        .await
        .unwrap();
    assert_eq!(luna.symbol, "LND");

    let mut gcc = funded(&economy, EntityRef::player(1), dec!(100)).await;
    let mut lnd = economy
        .ledger
        .find_or_create_account(EntityRef::player(2), luna.id)
        .await
        .unwrap();

    let err = economy
        .ledger
        .transfer(&mut gcc, dec!(10), &mut lnd, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::CurrencyMismatch { .. }));
    assert_eq!(economy.ledger.account(gcc.id).await.unwrap().balance, dec!(100));
    assert_eq!(economy.ledger.account(lnd.id).await.unwrap().balance, Decimal::ZERO);
}

#[tokio::test]
async fn account_resolution_is_idempotent() {
    let economy = economy().await;
    let entity = EntityRef::settlement(4);
    let first = economy
        .ledger
        .find_or_create_account(entity, economy.trade_currency.id)
        .await
        .unwrap();
    let second = economy
        .ledger
        .find_or_create_account(entity, economy.trade_currency.id)
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(economy.ledger.accounts_of(entity).await.unwrap().len(), 1);
}

#[tokio::test]
async fn stale_account_copy_is_rejected() {
    let economy = economy().await;
    let mut fresh = funded(&economy, EntityRef::player(1), dec!(100)).await;
    let mut stale = fresh.clone();

    economy.ledger.deposit(&mut fresh, dec!(1), None).await.unwrap();
    let err = economy
        .ledger
        .deposit(&mut stale, dec!(1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ConcurrentModification { .. }));
    assert!(err.class().is_retryable());
    assert_eq!(economy.ledger.account(fresh.id).await.unwrap().balance, dec!(101));
}

#[tokio::test]
async fn bond_repaid_in_another_currency_flips_to_paid() {
    let economy = economy().await;
    let gcc = economy.trade_currency.id;
    let luna = economy
        .ledger
        .create_currency(NewCurrency::new("Luna Dollar", "LND"))
        .await
        .unwrap();
    // 1 LND = 2 GCC
    economy.ledger.set_rate(luna.id, gcc, dec!(2)).await.unwrap();

    let issuer = EntityRef::organization(1);
    let holder = EntityRef::player(5);
    let bond = economy
        .ledger
        .issue_bond(NewBond {
            issuer,
            holder,
            amount: dec!(1000),
            currency_id: gcc,
            due_at: None,
            description: Some("Shipyard expansion".into()),
        })
        .await
        .unwrap();
    assert_eq!(bond.status, BondStatus::Issued);

    let mut issuer_lnd = economy
        .ledger
        .find_or_create_account(issuer, luna.id)
        .await
        .unwrap();
    economy
        .ledger
        .deposit(&mut issuer_lnd, dec!(600), None)
        .await
        .unwrap();

    let partial = economy
        .ledger
        .repay_bond(bond.id, dec!(200), luna.id, None)
        .await
        .unwrap();
    assert_eq!(partial.status, BondStatus::Issued);
    assert_eq!(economy.ledger.total_repaid(bond.id).await.unwrap(), dec!(400));
    assert!(!economy.ledger.bond_paid_off(bond.id).await.unwrap());

    let paid = economy
        .ledger
        .repay_bond(bond.id, dec!(300), luna.id, None)
        .await
        .unwrap();
    assert_eq!(paid.status, BondStatus::Paid);
    assert_eq!(economy.ledger.total_repaid(bond.id).await.unwrap(), dec!(1000));
    assert!(economy.ledger.bond_paid_off(bond.id).await.unwrap());
    assert_eq!(economy.ledger.balance_of(holder, luna.id).await.unwrap(), dec!(500));
    assert_eq!(economy.ledger.bond_repayments(bond.id).await.unwrap().len(), 2);

    let err = economy
        .ledger
        .repay_bond(bond.id, dec!(1), luna.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::BondNotOutstanding { .. }));
}

#[tokio::test]
async fn balances_survive_reopening_the_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("economy.db");
    let config = EconomyConfig {
        db_path: path.to_string_lossy().into_owned(),
        ..EconomyConfig::default()
    };

    {
        let economy = Economy::bootstrap(config.clone()).await.unwrap();
        funded(&economy, EntityRef::player(1), dec!(42.5)).await;
    }

    let reopened = Economy::bootstrap(config).await.unwrap();
    assert_eq!(
        reopened
            .ledger
            .balance_of(EntityRef::player(1), reopened.trade_currency.id)
            .await
            .unwrap(),
        dec!(42.5)
    );
}

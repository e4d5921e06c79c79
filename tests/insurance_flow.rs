//! Insurance against a live ledger: capital calls instead of insolvent payouts, repricing
//! after heavy losses, and bankruptcy wind-down.

use galaxy_economy::config::EconomyConfig;
use galaxy_economy::db::Store;
use galaxy_economy::entity::EntityRef;
use galaxy_economy::insurance::{
    ClaimCircumstances, ClaimDecision, InsuranceCorporation, InsuranceError, InsuranceTier,
    InsurerStatus, ModelMap, NewInsurer, PolicyStatus, RiskFactors,
};
use galaxy_economy::{Economy, ErrorClass};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

async fn economy() -> Economy {
    Economy::with_store(EconomyConfig::default(), Store::open_in_memory().unwrap())
        .await
        .unwrap()
}

async fn fund(economy: &Economy, entity: EntityRef, amount: Decimal) {
    let mut account = economy
        .ledger
        .find_or_create_account(entity, economy.trade_currency.id)
        .await
        .unwrap();
    economy.ledger.deposit(&mut account, amount, None).await.unwrap();
}

async fn balance(economy: &Economy, entity: EntityRef) -> Decimal {
    economy
        .ledger
        .balance_of(entity, economy.trade_currency.id)
        .await
        .unwrap()
}

async fn small_insurer(
    economy: &Economy,
    identifier: &str,
    reserve: Decimal,
) -> InsuranceCorporation {
    economy
        .insurance_market
        .register_insurer(
            NewInsurer {
                name: format!("{} Mutual", identifier),
                identifier: identifier.to_string(),
                risk_models: ModelMap::new(),
                pricing_models: ModelMap::new(),
                reserve_requirements: ModelMap::new(),
            },
            reserve,
        )
        .await
        .unwrap()
}

/// Standard-tier policy on a contract; the holder is funded for exactly the premium.
async fn standard_policy(
    economy: &Economy,
    insurer_id: i64,
    holder: EntityRef,
    value: Decimal,
) -> i64 {
    fund(economy, holder, value * dec!(0.10)).await;
    economy
        .insurance
        .purchase_policy(
            insurer_id,
            holder,
            InsuranceTier::Standard,
            value,
            &RiskFactors::default(),
            None,
        )
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn solvency_breach_escalates_without_paying() {
    let economy = economy().await;
    let thin = small_insurer(&economy, "thin", dec!(100)).await;
    let holder = EntityRef::player(1);
    let policy_id = standard_policy(&economy, thin.id, holder, dec!(10000)).await;
    assert_eq!(economy.insurance.reserve(thin.id).await.unwrap(), dec!(1100));

    let err = economy
        .insurance
        .process_claim(policy_id, dec!(9000), &ClaimCircumstances::default())
        .await
        .unwrap_err();
    assert!(matches!(err, InsuranceError::SolvencyFloorBreached { .. }));
    assert_eq!(err.class(), ErrorClass::BusinessRule);

    assert_eq!(balance(&economy, holder).await, Decimal::ZERO);
    assert_eq!(economy.insurance.reserve(thin.id).await.unwrap(), dec!(1100));
    assert_eq!(
        economy.insurance.insurer(thin.id).await.unwrap().status,
        InsurerStatus::CapitalCall
    );
    assert_eq!(
        economy.insurance.policy(policy_id).await.unwrap().status,
        PolicyStatus::Active
    );
    assert!(economy.insurance.claims(policy_id).await.unwrap().is_empty());

    // No new business while the call is open.
    fund(&economy, EntityRef::player(2), dec!(1000)).await;
    let blocked = economy
        .insurance
        .purchase_policy(
            thin.id,
            EntityRef::player(2),
            InsuranceTier::Basic,
            dec!(1000),
            &RiskFactors::default(),
            None,
        )
        .await;
    assert!(matches!(blocked, Err(InsuranceError::InsurerNotActive { .. })));

    let recapitalized = economy
        .insurance
        .raise_capital(thin.id, dec!(10000))
        .await
        .unwrap();
    assert_eq!(recapitalized.status, InsurerStatus::Active);

    let outcome = economy
        .insurance
        .process_claim(policy_id, dec!(9000), &ClaimCircumstances::default())
        .await
        .unwrap();
    assert_eq!(outcome.assessment.decision, ClaimDecision::Investigate);
    assert_eq!(balance(&economy, holder).await, dec!(5700));
    assert_eq!(economy.insurance.reserve(thin.id).await.unwrap(), dec!(5400));
}

#[tokio::test]
async fn heavy_losses_raise_the_base_premium() {
    let economy = economy().await;
    let insurers = economy.insurance_market.seed_npc_insurers().await.unwrap();
    let gic = &insurers[0];
    let holder = EntityRef::player(1);
    let policy_id = standard_policy(&economy, gic.id, holder, dec!(10000)).await;

    economy
        .insurance
        .process_claim(policy_id, dec!(9000), &ClaimCircumstances::default())
        .await
        .unwrap();
    let loss_ratio = economy.insurance_market.loss_ratio(gic.id).await.unwrap();
    assert!((loss_ratio - 5.7).abs() < 1e-9);

    let updated = economy.insurance_market.update_market_rates().await.unwrap();
    let gic = updated.iter().find(|i| i.id == gic.id).unwrap();
    assert!((gic.base_premium() - 0.084).abs() < 1e-12);
    assert_eq!(gic.status, InsurerStatus::Active);
}

#[tokio::test]
async fn bankruptcy_reassigns_policies_and_drains_reserve_pro_rata() {
    let economy = economy().await;
    let insurers = economy.insurance_market.seed_npc_insurers().await.unwrap();
    let (gic, etu) = (&insurers[0], &insurers[2]);

    let first = EntityRef::player(1);
    let second = EntityRef::player(2);
    let p1 = standard_policy(&economy, gic.id, first, dec!(10000)).await;
    let p2 = standard_policy(&economy, gic.id, second, dec!(20000)).await;
    assert_eq!(economy.insurance.reserve(gic.id).await.unwrap(), dec!(103000));

    let report = economy
        .insurance_market
        .handle_insurer_bankruptcy(gic.id)
        .await
        .unwrap();

    // ETU's 0.09 base premium is the closest to GIC's 0.08.
    assert_eq!(report.reassigned, vec![(p1, etu.id), (p2, etu.id)]);
    assert!(report.stranded.is_empty());
    assert_eq!(report.distributed(), dec!(103000));
    assert_eq!(balance(&economy, first).await, dec!(34333.33));
    assert_eq!(balance(&economy, second).await, dec!(68666.67));
    assert_eq!(economy.insurance.reserve(gic.id).await.unwrap(), Decimal::ZERO);

    let policy = economy.insurance.policy(p1).await.unwrap();
    assert_eq!(policy.corporation_id, etu.id);
    assert_eq!(policy.status, PolicyStatus::Active);
    assert_eq!(
        economy.insurance.insurer(gic.id).await.unwrap().status,
        InsurerStatus::Bankrupt
    );

    let quotes = economy
        .insurance
        .quote_options(dec!(1000), &RiskFactors::default())
        .await
        .unwrap();
    assert_eq!(quotes.len(), 6);
    assert!(quotes.iter().all(|q| q.insurer_id != gic.id));

    let again = economy.insurance_market.handle_insurer_bankruptcy(gic.id).await;
    assert!(matches!(again, Err(InsuranceError::InsurerNotActive { .. })));
}

#[tokio::test]
async fn bankruptcy_without_replacement_strands_policies() {
    let economy = economy().await;
    let lone = small_insurer(&economy, "lone", dec!(500)).await;
    let holder = EntityRef::player(1);
    let policy_id = standard_policy(&economy, lone.id, holder, dec!(1000)).await;

    let report = economy
        .insurance_market
        .handle_insurer_bankruptcy(lone.id)
        .await
        .unwrap();
    assert_eq!(report.stranded, vec![policy_id]);
    assert!(report.reassigned.is_empty());
    assert_eq!(report.distributed(), dec!(600));
    assert_eq!(balance(&economy, holder).await, dec!(600));
    assert_eq!(
        economy.insurance.policy(policy_id).await.unwrap().status,
        PolicyStatus::Bankrupt
    );
}

//! Policy underwriting and claim settlement against insurer reserves.
//!
//! An insurer's reserve is its ledger account in the trade currency. Premiums flow holder →
//! insurer and payouts insurer → holder, each inside one store transaction together with
//! the policy/claim rows they belong to.

use super::records::{
    active_exposure, claims_for_policy, insert_claim, insert_policy, list_corporations,
    load_corporation, load_policy, policies_for, save_solvency, set_policy_status, ClaimPayout,
    InsuranceCorporation, InsurancePolicy, InsurerStatus, NewPolicy, PolicyStatus,
    REFERENCE_BASE_PREMIUM,
};
use super::tiers::{self, ClaimAssessment, ClaimCircumstances, InsuranceTier, RiskFactors};
use super::InsuranceError;
use crate::entity::EntityRef;
use crate::ledger::{deposit_within, resolve_account, transfer_within, Ledger, TransactionType};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

pub const DEFAULT_SOLVENCY_FLOOR: f64 = 0.1;

/// Reported ratio when an insurer has reserve but no active coverage.
pub(crate) const SOLVENCY_CAP: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsuranceQuote {
    pub insurer_id: i64,
    pub insurer_name: String,
    pub tier: InsuranceTier,
    pub contract_value: Decimal,
    pub coverage_amount: Decimal,
    pub premium: Decimal,
    pub deductible: Decimal,
    pub coverage_percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimOutcome {
    pub assessment: ClaimAssessment,
    pub claim: ClaimPayout,
    pub policy: InsurancePolicy,
    pub solvency_ratio: f64,
}

/// `reserve / exposure`, capped. No exposure reports the cap (or 0 for a negative reserve).
pub(crate) fn solvency_ratio(reserve: Decimal, exposure: Decimal) -> f64 {
    if exposure <= Decimal::ZERO {
        return if reserve < Decimal::ZERO { 0.0 } else { SOLVENCY_CAP };
    }
    (reserve / exposure).to_f64().unwrap_or(0.0).min(SOLVENCY_CAP)
}

/// Premium scaling for an insurer relative to the reference base premium.
pub(crate) fn premium_scale(base_premium: f64) -> Decimal {
    match (
        Decimal::from_f64(base_premium),
        Decimal::from_f64(REFERENCE_BASE_PREMIUM),
    ) {
        (Some(base), Some(reference)) if !reference.is_zero() => base / reference,
        _ => Decimal::ONE,
    }
}

pub(crate) fn reserve_within(
    conn: &Connection,
    insurer: &InsuranceCorporation,
    currency_id: i64,
) -> Result<Decimal, InsuranceError> {
    Ok(resolve_account(conn, &insurer.entity(), currency_id)?.balance)
}

#[derive(Clone)]
pub struct InsuranceService {
    ledger: Ledger,
    currency_id: i64,
    solvency_floor: f64,
}

impl InsuranceService {
    pub fn new(ledger: Ledger, currency_id: i64, solvency_floor: f64) -> Self {
        Self {
            ledger,
            currency_id,
            solvency_floor,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn currency_id(&self) -> i64 {
        self.currency_id
    }

    pub fn solvency_floor(&self) -> f64 {
        self.solvency_floor
    }

    pub async fn insurers(&self) -> Result<Vec<InsuranceCorporation>, InsuranceError> {
        let conn = self.ledger.store().lock().await;
        list_corporations(&conn)
    }

    pub async fn insurer(&self, id: i64) -> Result<InsuranceCorporation, InsuranceError> {
        let conn = self.ledger.store().lock().await;
        load_corporation(&conn, id)
    }

    pub async fn policy(&self, id: i64) -> Result<InsurancePolicy, InsuranceError> {
        let conn = self.ledger.store().lock().await;
        load_policy(&conn, id)
    }

    pub async fn policies(
        &self,
        insurer_id: i64,
        status: Option<PolicyStatus>,
    ) -> Result<Vec<InsurancePolicy>, InsuranceError> {
        let conn = self.ledger.store().lock().await;
        policies_for(&conn, insurer_id, status)
    }

    pub async fn claims(&self, policy_id: i64) -> Result<Vec<ClaimPayout>, InsuranceError> {
        let conn = self.ledger.store().lock().await;
        claims_for_policy(&conn, policy_id)
    }

    /// Current reserve. Zero for an insurer that never received capital.
    pub async fn reserve(&self, insurer_id: i64) -> Result<Decimal, InsuranceError> {
        let insurer = self.insurer(insurer_id).await?;
        Ok(self
            .ledger
            .balance_of(insurer.entity(), self.currency_id)
            .await?)
    }

    /// One quote per active insurer and tier, cheapest first within each insurer.
    pub async fn quote_options(
        &self,
        contract_value: Decimal,
        factors: &RiskFactors,
    ) -> Result<Vec<InsuranceQuote>, InsuranceError> {
        if contract_value <= Decimal::ZERO {
            return Err(InsuranceError::InvalidContractValue(contract_value));
        }

        let insurers = self.insurers().await?;
        let quotes = insurers
            .iter()
            .filter(|insurer| insurer.status == InsurerStatus::Active)
            .flat_map(|insurer| {
                InsuranceTier::ALL
                    .iter()
                    .map(move |tier| quote_for(insurer, *tier, contract_value, factors))
            })
            .collect();
        Ok(quotes)
    }

    /// Underwrite a policy and charge the premium in the same transaction.
    pub async fn purchase_policy(
        &self,
        insurer_id: i64,
        holder: EntityRef,
        tier: InsuranceTier,
        contract_value: Decimal,
        factors: &RiskFactors,
        contract_reference: Option<&str>,
    ) -> Result<InsurancePolicy, InsuranceError> {
        if contract_value <= Decimal::ZERO {
            return Err(InsuranceError::InvalidContractValue(contract_value));
        }
        let directory = self.ledger.directory().clone();
        let currency_id = self.currency_id;

        let result = self
            .ledger
            .store()
            .write(|tx| {
                let insurer = load_corporation(tx, insurer_id)?;
                if insurer.status != InsurerStatus::Active {
                    return Err(InsuranceError::InsurerNotActive {
                        insurer_id,
                        status: insurer.status,
                    });
                }

                let quote = quote_for(&insurer, tier, contract_value, factors);
                let policy = insert_policy(
                    tx,
                    &NewPolicy {
                        corporation_id: insurer.id,
                        holder,
                        contract_reference,
                        tier,
                        contract_value,
                        coverage_amount: quote.coverage_amount,
                        premium_amount: quote.premium,
                        deductible: quote.deductible,
                        coverage_percentage: quote.coverage_percentage,
                        risk_factors: factors,
                    },
                )?;

                if quote.premium > Decimal::ZERO {
                    let holder_account = resolve_account(tx, &holder, currency_id)?;
                    let insurer_account = resolve_account(tx, &insurer.entity(), currency_id)?;
                    let memo = format!("Insurance premium for policy {}", policy.id);
                    transfer_within(
                        tx,
                        directory.as_ref(),
                        &holder_account,
                        quote.premium,
                        &insurer_account,
                        TransactionType::Transfer,
                        Some(memo.as_str()),
                    )?;
                }

                let reserve = reserve_within(tx, &insurer, currency_id)?;
                let exposure = active_exposure(tx, insurer.id)?;
                save_solvency(tx, insurer.id, solvency_ratio(reserve, exposure), insurer.status)?;
                Ok::<_, InsuranceError>(policy)
            })
            .await;

        match &result {
            Ok(policy) => info!(
                policy_id = policy.id,
                insurer_id,
                holder = %holder,
                tier = %tier,
                coverage = %policy.coverage_amount,
                premium = %policy.premium_amount,
                "insurance policy purchased"
            ),
            Err(e) => warn!(
                insurer_id,
                holder = %holder,
                tier = %tier,
                error = %e,
                "policy purchase failed"
            ),
        }
        result
    }

    /// Decide a claim without paying it.
    pub async fn assess_claim(
        &self,
        policy_id: i64,
        loss_amount: Decimal,
        circumstances: &ClaimCircumstances,
    ) -> Result<ClaimAssessment, InsuranceError> {
        if loss_amount <= Decimal::ZERO {
            return Err(InsuranceError::InvalidLoss(loss_amount));
        }
        let policy = self.policy(policy_id).await?;
        Ok(tiers::assess_claim(
            policy.coverage_amount,
            policy.deductible,
            loss_amount,
            circumstances,
        ))
    }

    /// Assess and settle a claim.
    ///
    /// A payout that would leave the insurer below the solvency floor is refused: the insurer
    /// is moved to `capital_call`, nothing is paid and the policy stays active.
    pub async fn process_claim(
        &self,
        policy_id: i64,
        loss_amount: Decimal,
        circumstances: &ClaimCircumstances,
    ) -> Result<ClaimOutcome, InsuranceError> {
        if loss_amount <= Decimal::ZERO {
            return Err(InsuranceError::InvalidLoss(loss_amount));
        }
        let directory = self.ledger.directory().clone();
        let currency_id = self.currency_id;
        let floor = self.solvency_floor;

        // The outer result decides commit; a breach commits the capital call and still fails.
        let settled = self
            .ledger
            .store()
            .write(|tx| -> Result<Result<ClaimOutcome, InsuranceError>, InsuranceError> {
                let policy = load_policy(tx, policy_id)?;
                if policy.status != PolicyStatus::Active {
                    return Err(InsuranceError::PolicyNotActive {
                        policy_id,
                        status: policy.status,
                    });
                }
                let insurer = load_corporation(tx, policy.corporation_id)?;
                if insurer.status != InsurerStatus::Active {
                    return Err(InsuranceError::InsurerNotActive {
                        insurer_id: insurer.id,
                        status: insurer.status,
                    });
                }

                let assessment = tiers::assess_claim(
                    policy.coverage_amount,
                    policy.deductible,
                    loss_amount,
                    circumstances,
                );
                let insurer_account = resolve_account(tx, &insurer.entity(), currency_id)?;
                let exposure = active_exposure(tx, insurer.id)?;
                let remaining = exposure - policy.coverage_amount;
                let projected =
                    solvency_ratio(insurer_account.balance - assessment.payout, remaining);

                if assessment.payout > Decimal::ZERO && projected < floor {
                    let current = solvency_ratio(insurer_account.balance, exposure);
                    save_solvency(tx, insurer.id, current, InsurerStatus::CapitalCall)?;
                    return Ok(Err(InsuranceError::SolvencyFloorBreached {
                        insurer_id: insurer.id,
                        projected_ratio: projected,
                        floor,
                    }));
                }

                if assessment.payout > Decimal::ZERO {
                    let holder_account = resolve_account(tx, &policy.holder, currency_id)?;
                    let memo = format!("Insurance claim payout for policy {}", policy.id);
                    transfer_within(
                        tx,
                        directory.as_ref(),
                        &insurer_account,
                        assessment.payout,
                        &holder_account,
                        TransactionType::Transfer,
                        Some(memo.as_str()),
                    )?;
                }

                let claim = insert_claim(
                    tx,
                    policy.id,
                    loss_amount,
                    assessment.payout,
                    assessment.risk_score,
                    assessment.decision,
                )?;
                set_policy_status(tx, policy.id, PolicyStatus::Claimed)?;
                save_solvency(tx, insurer.id, projected, insurer.status)?;

                Ok(Ok(ClaimOutcome {
                    assessment,
                    claim,
                    policy: load_policy(tx, policy.id)?,
                    solvency_ratio: projected,
                }))
            })
            .await;

        match settled {
            Ok(Ok(outcome)) => {
                info!(
                    policy_id,
                    claim_id = outcome.claim.id,
                    decision = %outcome.assessment.decision,
                    risk_score = outcome.assessment.risk_score,
                    payout = %outcome.assessment.payout,
                    solvency_ratio = outcome.solvency_ratio,
                    "insurance claim processed"
                );
                Ok(outcome)
            }
            Ok(Err(breach)) => {
                warn!(
                    policy_id,
                    loss = %loss_amount,
                    error = %breach,
                    "claim escalated to capital call"
                );
                Err(breach)
            }
            Err(e) => {
                warn!(policy_id, loss = %loss_amount, error = %e, "claim processing failed");
                Err(e)
            }
        }
    }

    /// Inject capital into an insurer's reserve. Clears a capital call once the ratio is
    /// back at or above the floor.
    pub async fn raise_capital(
        &self,
        insurer_id: i64,
        amount: Decimal,
    ) -> Result<InsuranceCorporation, InsuranceError> {
        let currency_id = self.currency_id;
        let floor = self.solvency_floor;

        let insurer = self
            .ledger
            .store()
            .write(|tx| {
                let insurer = load_corporation(tx, insurer_id)?;
                if insurer.is_bankrupt() {
                    return Err(InsuranceError::InsurerNotActive {
                        insurer_id,
                        status: insurer.status,
                    });
                }
                let account = resolve_account(tx, &insurer.entity(), currency_id)?;
                let updated = deposit_within(tx, &account, amount, Some("Capital injection"))?;

                let ratio = solvency_ratio(updated.balance, active_exposure(tx, insurer.id)?);
                let status = match insurer.status {
                    InsurerStatus::CapitalCall if ratio >= floor => InsurerStatus::Active,
                    other => other,
                };
                save_solvency(tx, insurer.id, ratio, status)?;
                load_corporation(tx, insurer.id)
            })
            .await?;

        info!(
            insurer_id,
            amount = %amount,
            solvency_ratio = insurer.solvency_ratio,
            status = %insurer.status,
            "insurer capital raised"
        );
        Ok(insurer)
    }

    pub async fn expire_policy(&self, policy_id: i64) -> Result<InsurancePolicy, InsuranceError> {
        let policy = self
            .ledger
            .store()
            .write(|tx| {
                let policy = load_policy(tx, policy_id)?;
                if policy.status != PolicyStatus::Active {
                    return Err(InsuranceError::PolicyNotActive {
                        policy_id,
                        status: policy.status,
                    });
                }
                set_policy_status(tx, policy_id, PolicyStatus::Expired)?;
                load_policy(tx, policy_id)
            })
            .await?;
        info!(policy_id, "insurance policy expired");
        Ok(policy)
    }
}

fn quote_for(
    insurer: &InsuranceCorporation,
    tier: InsuranceTier,
    contract_value: Decimal,
    factors: &RiskFactors,
) -> InsuranceQuote {
    let terms = tier.terms();
    let base = tiers::calculate_premium(contract_value, tier, factors);
    let coverage_amount = (contract_value * terms.coverage).round_dp(2);
    InsuranceQuote {
        insurer_id: insurer.id,
        insurer_name: insurer.name.clone(),
        tier,
        contract_value,
        coverage_amount,
        premium: (base * premium_scale(insurer.base_premium())).round_dp(2),
        deductible: (coverage_amount * terms.deductible).round_dp(2),
        coverage_percentage: terms.coverage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::entity::EntityRegistry;
    use crate::insurance::market_service::InsuranceMarketService;
    use crate::insurance::tiers::ClaimDecision;
    use crate::ledger::{LedgerError, NewCurrency};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn setup() -> (InsuranceService, Vec<InsuranceCorporation>) {
        let store = Store::open_in_memory().unwrap();
        let ledger = Ledger::new(store, Arc::new(EntityRegistry::new()));
        let gcc = ledger
            .create_currency(NewCurrency::new("Galactic Credits", "GCC").system())
            .await
            .unwrap();
        let service = InsuranceService::new(ledger, gcc.id, DEFAULT_SOLVENCY_FLOOR);
        let market = InsuranceMarketService::new(service.clone(), dec!(100000));
        let insurers = market.seed_npc_insurers().await.unwrap();
        (service, insurers)
    }

    async fn fund(service: &InsuranceService, entity: EntityRef, amount: Decimal) {
        let mut account = service
            .ledger()
            .find_or_create_account(entity, service.currency_id())
            .await
            .unwrap();
        service
            .ledger()
            .deposit(&mut account, amount, None)
            .await
            .unwrap();
    }

    #[test]
    fn test_solvency_ratio_edges() {
        assert_eq!(solvency_ratio(dec!(100), Decimal::ZERO), SOLVENCY_CAP);
        assert_eq!(solvency_ratio(dec!(-1), Decimal::ZERO), 0.0);
        assert!((solvency_ratio(dec!(50), dec!(1000)) - 0.05).abs() < 1e-12);
        assert_eq!(solvency_ratio(dec!(1000000000), dec!(1)), SOLVENCY_CAP);
    }

    #[test]
    fn test_premium_scale() {
        assert_eq!(premium_scale(0.08), Decimal::ONE);
        assert_eq!(premium_scale(0.10), dec!(1.25));
    }

    #[tokio::test]
    async fn test_quote_options_cover_every_active_insurer_and_tier() {
        let (service, insurers) = setup().await;
        let quotes = service
            .quote_options(dec!(10000), &RiskFactors::default())
            .await
            .unwrap();
        assert_eq!(quotes.len(), insurers.len() * 3);

        let gic_standard = quotes
            .iter()
            .find(|q| {
                q.insurer_name == "Galactic Insurance Consortium"
                    && q.tier == InsuranceTier::Standard
            })
            .unwrap();
        assert_eq!(gic_standard.premium, dec!(1000));
        assert_eq!(gic_standard.coverage_amount, dec!(7500));
        assert_eq!(gic_standard.deductible, dec!(375));

        let luna_standard = quotes
            .iter()
            .find(|q| {
                q.insurer_name == "Luna Risk Management Corp" && q.tier == InsuranceTier::Standard
            })
            .unwrap();
        assert_eq!(luna_standard.premium, dec!(1250));

        assert!(matches!(
            service.quote_options(Decimal::ZERO, &RiskFactors::default()).await,
            Err(InsuranceError::InvalidContractValue(_))
        ));
    }

    #[tokio::test]
    async fn test_purchase_charges_premium_to_reserve() {
        let (service, insurers) = setup().await;
        let gic = &insurers[0];
        let holder = EntityRef::player(1);
        fund(&service, holder, dec!(2000)).await;

        let policy = service
            .purchase_policy(
                gic.id,
                holder,
                InsuranceTier::Standard,
                dec!(10000),
                &RiskFactors::default(),
                Some("contract-17"),
            )
            .await
            .unwrap();

        assert_eq!(policy.status, PolicyStatus::Active);
        assert_eq!(policy.premium_amount, dec!(1000));
        assert_eq!(policy.contract_reference.as_deref(), Some("contract-17"));
        assert_eq!(
            service.ledger().balance_of(holder, service.currency_id()).await.unwrap(),
            dec!(1000)
        );
        assert_eq!(service.reserve(gic.id).await.unwrap(), dec!(101000));
    }

    #[tokio::test]
    async fn test_purchase_without_funds_leaves_no_policy() {
        let (service, insurers) = setup().await;
        let gic = &insurers[0];
        let holder = EntityRef::player(2);
        fund(&service, holder, dec!(10)).await;

        let err = service
            .purchase_policy(
                gic.id,
                holder,
                InsuranceTier::Premium,
                dec!(10000),
                &RiskFactors::default(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InsuranceError::Ledger(LedgerError::InsufficientFunds { .. })
        ));
        assert!(service.policies(gic.id, None).await.unwrap().is_empty());
        assert_eq!(service.reserve(gic.id).await.unwrap(), dec!(100000));
    }

    #[tokio::test]
    async fn test_process_claim_pays_holder_and_closes_policy() {
        let (service, insurers) = setup().await;
        let gic = &insurers[0];
        let holder = EntityRef::player(3);
        fund(&service, holder, dec!(1000)).await;
        let policy = service
            .purchase_policy(
                gic.id,
                holder,
                InsuranceTier::Standard,
                dec!(10000),
                &RiskFactors::default(),
                None,
            )
            .await
            .unwrap();

        let outcome = service
            .process_claim(policy.id, dec!(9000), &ClaimCircumstances::default())
            .await
            .unwrap();
        assert_eq!(outcome.assessment.decision, ClaimDecision::Investigate);
        assert_eq!(outcome.claim.payout, dec!(5700));
        assert_eq!(outcome.policy.status, PolicyStatus::Claimed);
        assert_eq!(
            service.ledger().balance_of(holder, service.currency_id()).await.unwrap(),
            dec!(5700)
        );
        assert_eq!(service.reserve(gic.id).await.unwrap(), dec!(95300));

        let again = service
            .process_claim(policy.id, dec!(9000), &ClaimCircumstances::default())
            .await;
        assert!(matches!(again, Err(InsuranceError::PolicyNotActive { .. })));
        assert_eq!(service.claims(policy.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_denied_claim_pays_nothing() {
        let (service, insurers) = setup().await;
        let holder = EntityRef::player(4);
        fund(&service, holder, dec!(1000)).await;
        let policy = service
            .purchase_policy(
                insurers[0].id,
                holder,
                InsuranceTier::Standard,
                dec!(10000),
                &RiskFactors::default(),
                None,
            )
            .await
            .unwrap();

        let abandoned = ClaimCircumstances {
            cargo_recovered: false,
            contractor_abandoned: true,
        };
        let outcome = service
            .process_claim(policy.id, dec!(5000), &abandoned)
            .await
            .unwrap();
        assert_eq!(outcome.assessment.decision, ClaimDecision::Deny);
        assert_eq!(outcome.claim.payout, Decimal::ZERO);
        assert_eq!(outcome.policy.status, PolicyStatus::Claimed);
        assert_eq!(
            service.ledger().balance_of(holder, service.currency_id()).await.unwrap(),
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn test_expire_policy() {
        let (service, insurers) = setup().await;
        let holder = EntityRef::player(5);
        fund(&service, holder, dec!(1000)).await;
        let policy = service
            .purchase_policy(
                insurers[0].id,
                holder,
                InsuranceTier::Basic,
                dec!(1000),
                &RiskFactors::default(),
                None,
            )
            .await
            .unwrap();

        let expired = service.expire_policy(policy.id).await.unwrap();
        assert_eq!(expired.status, PolicyStatus::Expired);
        assert!(matches!(
            service.expire_policy(policy.id).await,
            Err(InsuranceError::PolicyNotActive { .. })
        ));
    }
}

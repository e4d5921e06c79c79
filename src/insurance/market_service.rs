//! NPC insurer market: seeding, rate adjustment, reserve monitoring and bankruptcy.

use super::records::{
    active_exposure, find_corporation_by_identifier, insert_corporation, list_corporations,
    load_corporation, policies_for, policy_count, reassign_policy, save_pricing_models,
    save_solvency, set_policy_status, total_claims, total_premiums, InsuranceCorporation,
    InsurerStatus, ModelMap, NewInsurer, PolicyStatus, BASE_PREMIUM_KEY, CARGO_RISK_KEY,
    LOGISTICS_RISK_KEY, MINIMUM_RATIO_KEY, RISK_MULTIPLIER_KEY,
};
use super::service::{reserve_within, solvency_ratio, InsuranceService};
use super::InsuranceError;
use crate::entity::EntityRef;
use crate::ledger::{deposit_within, resolve_account, transfer_within, TransactionType};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

const LOSS_RATIO_CEILING: f64 = 1.2;
const LOSS_RATIO_MARKUP: f64 = 1.05;
const LOW_MARKET_SHARE: f64 = 0.1;
const MARKET_SHARE_DISCOUNT: f64 = 0.98;

/// Pricing profile for one of the stock NPC insurers.
#[derive(Debug, Clone, Copy)]
pub struct NpcInsurerProfile {
    pub identifier: &'static str,
    pub name: &'static str,
    pub base_premium: f64,
    pub risk_multiplier: f64,
    pub minimum_ratio: f64,
    pub logistics_risk: f64,
    pub cargo_risk: f64,
}

fn models(pairs: &[(&str, f64)]) -> ModelMap {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

impl NpcInsurerProfile {
    pub fn to_new_insurer(&self) -> NewInsurer {
        NewInsurer {
            name: self.name.to_string(),
            identifier: self.identifier.to_string(),
            risk_models: models(&[
                (LOGISTICS_RISK_KEY, self.logistics_risk),
                (CARGO_RISK_KEY, self.cargo_risk),
            ]),
            pricing_models: models(&[
                (BASE_PREMIUM_KEY, self.base_premium),
                (RISK_MULTIPLIER_KEY, self.risk_multiplier),
            ]),
            reserve_requirements: models(&[(MINIMUM_RATIO_KEY, self.minimum_ratio)]),
        }
    }
}

pub const NPC_INSURERS: [NpcInsurerProfile; 3] = [
    NpcInsurerProfile {
        identifier: "gic_insurance",
        name: "Galactic Insurance Consortium",
        base_premium: 0.08,
        risk_multiplier: 1.2,
        minimum_ratio: 0.15,
        logistics_risk: 0.02,
        cargo_risk: 0.05,
    },
    NpcInsurerProfile {
        identifier: "lrmc_insurance",
        name: "Luna Risk Management Corp",
        base_premium: 0.10,
        risk_multiplier: 1.1,
        minimum_ratio: 0.20,
        logistics_risk: 0.03,
        cargo_risk: 0.04,
    },
    NpcInsurerProfile {
        identifier: "etu_insurance",
        name: "Earth Transport Underwriters",
        base_premium: 0.09,
        risk_multiplier: 1.15,
        minimum_ratio: 0.18,
        logistics_risk: 0.025,
        cargo_risk: 0.045,
    },
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReserveDistribution {
    pub policy_id: i64,
    pub holder: EntityRef,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankruptcyReport {
    pub insurer_id: i64,
    /// `(policy_id, new insurer id)`
    pub reassigned: Vec<(i64, i64)>,
    /// Policies with no replacement insurer; now `bankrupt`.
    pub stranded: Vec<i64>,
    pub distributions: Vec<ReserveDistribution>,
}

impl BankruptcyReport {
    pub fn distributed(&self) -> Decimal {
        self.distributions.iter().map(|d| d.amount).sum()
    }
}

#[derive(Clone)]
pub struct InsuranceMarketService {
    insurance: InsuranceService,
    starting_reserve: Decimal,
}

impl InsuranceMarketService {
    pub fn new(insurance: InsuranceService, starting_reserve: Decimal) -> Self {
        Self {
            insurance,
            starting_reserve,
        }
    }

    pub fn insurance(&self) -> &InsuranceService {
        &self.insurance
    }

    /// Create the stock NPC insurers that do not exist yet. Safe to call repeatedly.
    pub async fn seed_npc_insurers(&self) -> Result<Vec<InsuranceCorporation>, InsuranceError> {
        let currency_id = self.insurance.currency_id();
        let reserve = self.starting_reserve;

        let (insurers, created) = self
            .insurance
            .ledger()
            .store()
            .write(|tx| {
                let mut insurers = Vec::with_capacity(NPC_INSURERS.len());
                let mut created = 0usize;
                for profile in NPC_INSURERS.iter() {
                    match find_corporation_by_identifier(tx, profile.identifier)? {
                        Some(existing) => insurers.push(existing),
                        None => {
                            insurers.push(register_within(
                                tx,
                                &profile.to_new_insurer(),
                                reserve,
                                currency_id,
                            )?);
                            created += 1;
                        }
                    }
                }
                Ok::<_, InsuranceError>((insurers, created))
            })
            .await?;

        info!(created, total = insurers.len(), reserve = %reserve, "NPC insurers seeded");
        Ok(insurers)
    }

    /// Add an insurer with its own pricing profile and an initial reserve.
    pub async fn register_insurer(
        &self,
        new: NewInsurer,
        initial_reserve: Decimal,
    ) -> Result<InsuranceCorporation, InsuranceError> {
        let currency_id = self.insurance.currency_id();
        let insurer = self
            .insurance
            .ledger()
            .store()
            .write(|tx| {
                if find_corporation_by_identifier(tx, &new.identifier)?.is_some() {
                    return Err(InsuranceError::DuplicateInsurer(new.identifier.clone()));
                }
                register_within(tx, &new, initial_reserve, currency_id)
            })
            .await?;
        info!(insurer_id = insurer.id, identifier = %insurer.identifier, "insurer registered");
        Ok(insurer)
    }

    /// Share of all policies ever written that this insurer holds.
    pub async fn market_share(&self, insurer_id: i64) -> Result<f64, InsuranceError> {
        let conn = self.insurance.ledger().store().lock().await;
        market_share_within(&conn, insurer_id)
    }

    /// Claims paid over premiums earned. Zero before any premium is written.
    pub async fn loss_ratio(&self, insurer_id: i64) -> Result<f64, InsuranceError> {
        let conn = self.insurance.ledger().store().lock().await;
        loss_ratio_within(&conn, insurer_id)
    }

    /// Reprice every live insurer from its loss ratio and market share, then re-check reserves.
    pub async fn update_market_rates(&self) -> Result<Vec<InsuranceCorporation>, InsuranceError> {
        let currency_id = self.insurance.currency_id();
        let floor = self.insurance.solvency_floor();

        self.insurance
            .ledger()
            .store()
            .write(|tx| {
                for insurer in list_corporations(tx)? {
                    if insurer.is_bankrupt() {
                        continue;
                    }
                    let share = market_share_within(tx, insurer.id)?;
                    let loss_ratio = loss_ratio_within(tx, insurer.id)?;

                    let mut pricing = insurer.pricing_models.clone();
                    let base = insurer.base_premium();
                    let adjusted = if loss_ratio > LOSS_RATIO_CEILING {
                        base * LOSS_RATIO_MARKUP
                    } else if share < LOW_MARKET_SHARE {
                        base * MARKET_SHARE_DISCOUNT
                    } else {
                        base
                    };
                    pricing.insert(BASE_PREMIUM_KEY.to_string(), adjusted);
                    save_pricing_models(tx, insurer.id, &pricing, share)?;

                    debug!(
                        insurer_id = insurer.id,
                        loss_ratio,
                        market_share = share,
                        base_premium = adjusted,
                        "insurer rates updated"
                    );
                }
                manage_reserves_within(tx, currency_id, floor)
            })
            .await
    }

    /// Recompute and persist every live insurer's solvency ratio.
    pub async fn manage_reserves(&self) -> Result<Vec<InsuranceCorporation>, InsuranceError> {
        let currency_id = self.insurance.currency_id();
        let floor = self.insurance.solvency_floor();
        self.insurance
            .ledger()
            .store()
            .write(|tx| manage_reserves_within(tx, currency_id, floor))
            .await
    }

    /// Wind down an insurer.
    ///
    /// Active policies move to the live insurer with the closest base premium, or become
    /// `bankrupt` when none exists. The remaining reserve is paid out to the holders of those
    /// policies pro-rata by coverage. The insurer ends `bankrupt` and takes no further writes.
    pub async fn handle_insurer_bankruptcy(
        &self,
        insurer_id: i64,
    ) -> Result<BankruptcyReport, InsuranceError> {
        let currency_id = self.insurance.currency_id();
        let directory = self.insurance.ledger().directory().clone();

        let report = self
            .insurance
            .ledger()
            .store()
            .write(|tx| {
                let insurer = load_corporation(tx, insurer_id)?;
                if insurer.is_bankrupt() {
                    return Err(InsuranceError::InsurerNotActive {
                        insurer_id,
                        status: insurer.status,
                    });
                }

                let policies = policies_for(tx, insurer_id, Some(PolicyStatus::Active))?;
                let candidates: Vec<InsuranceCorporation> = list_corporations(tx)?
                    .into_iter()
                    .filter(|c| c.id != insurer_id && c.status == InsurerStatus::Active)
                    .collect();
                let replacement = candidates.iter().min_by(|a, b| {
                    let da = (a.base_premium() - insurer.base_premium()).abs();
                    let db = (b.base_premium() - insurer.base_premium()).abs();
                    da.total_cmp(&db)
                });

                let mut report = BankruptcyReport {
                    insurer_id,
                    reassigned: Vec::new(),
                    stranded: Vec::new(),
                    distributions: Vec::new(),
                };
                for policy in &policies {
                    match replacement {
                        Some(target) => {
                            reassign_policy(tx, policy.id, target.id)?;
                            report.reassigned.push((policy.id, target.id));
                        }
                        None => {
                            set_policy_status(tx, policy.id, PolicyStatus::Bankrupt)?;
                            report.stranded.push(policy.id);
                        }
                    }
                }

                let mut reserve_account = resolve_account(tx, &insurer.entity(), currency_id)?;
                let reserve = reserve_account.balance;
                let total_coverage: Decimal = policies.iter().map(|p| p.coverage_amount).sum();

                if reserve > Decimal::ZERO && total_coverage > Decimal::ZERO {
                    let mut remaining = reserve;
                    for (i, policy) in policies.iter().enumerate() {
                        let share = if i + 1 == policies.len() {
                            remaining
                        } else {
                            (reserve * policy.coverage_amount / total_coverage)
                                .round_dp(2)
                                .min(remaining)
                        };
                        if share <= Decimal::ZERO {
                            continue;
                        }
                        let holder_account = resolve_account(tx, &policy.holder, currency_id)?;
                        let memo = format!(
                            "Bankruptcy distribution from insurer {} for policy {}",
                            insurer_id, policy.id
                        );
                        let posted = transfer_within(
                            tx,
                            directory.as_ref(),
                            &reserve_account,
                            share,
                            &holder_account,
                            TransactionType::Transfer,
                            Some(memo.as_str()),
                        )?;
                        reserve_account = posted.from;
                        remaining -= share;
                        report.distributions.push(ReserveDistribution {
                            policy_id: policy.id,
                            holder: policy.holder,
                            amount: share,
                        });
                    }
                }

                save_solvency(tx, insurer_id, 0.0, InsurerStatus::Bankrupt)?;
                Ok::<_, InsuranceError>(report)
            })
            .await;

        match &report {
            Ok(report) => warn!(
                insurer_id,
                reassigned = report.reassigned.len(),
                stranded = report.stranded.len(),
                distributed = %report.distributed(),
                "insurer declared bankrupt"
            ),
            Err(e) => warn!(insurer_id, error = %e, "insurer bankruptcy failed"),
        }
        report
    }
}

fn register_within(
    conn: &Connection,
    new: &NewInsurer,
    reserve: Decimal,
    currency_id: i64,
) -> Result<InsuranceCorporation, InsuranceError> {
    let insurer = insert_corporation(conn, new)?;
    let account = resolve_account(conn, &insurer.entity(), currency_id)?;
    let balance = if reserve > Decimal::ZERO {
        deposit_within(conn, &account, reserve, Some("Starting reserve"))?.balance
    } else {
        account.balance
    };
    save_solvency(
        conn,
        insurer.id,
        solvency_ratio(balance, Decimal::ZERO),
        InsurerStatus::Active,
    )?;
    load_corporation(conn, insurer.id)
}

fn market_share_within(conn: &Connection, insurer_id: i64) -> Result<f64, InsuranceError> {
    let total = policy_count(conn, None)?;
    if total == 0 {
        return Ok(0.0);
    }
    Ok(policy_count(conn, Some(insurer_id))? as f64 / total as f64)
}

fn loss_ratio_within(conn: &Connection, insurer_id: i64) -> Result<f64, InsuranceError> {
    let premiums = total_premiums(conn, insurer_id)?;
    if premiums <= Decimal::ZERO {
        return Ok(0.0);
    }
    Ok((total_claims(conn, insurer_id)? / premiums)
        .to_f64()
        .unwrap_or(0.0))
}

fn manage_reserves_within(
    conn: &Connection,
    currency_id: i64,
    floor: f64,
) -> Result<Vec<InsuranceCorporation>, InsuranceError> {
    let mut updated = Vec::new();
    for insurer in list_corporations(conn)? {
        if insurer.is_bankrupt() {
            updated.push(insurer);
            continue;
        }
        let reserve = reserve_within(conn, &insurer, currency_id)?;
        let exposure = active_exposure(conn, insurer.id)?;
        let ratio = solvency_ratio(reserve, exposure);

        let status = if ratio < floor {
            warn!(
                insurer_id = insurer.id,
                solvency_ratio = ratio,
                floor,
                %reserve,
                %exposure,
                "insurer below solvency floor, capital call issued"
            );
            InsurerStatus::CapitalCall
        } else {
            if ratio < insurer.minimum_ratio() {
                warn!(
                    insurer_id = insurer.id,
                    solvency_ratio = ratio,
                    minimum_ratio = insurer.minimum_ratio(),
                    "insurer reserve below its minimum ratio"
                );
            }
            InsurerStatus::Active
        };
        save_solvency(conn, insurer.id, ratio, status)?;
        updated.push(load_corporation(conn, insurer.id)?);
    }
    Ok(updated)
}

//! Insurer, policy and claim rows.

use super::tiers::{ClaimDecision, InsuranceTier, RiskFactors};
use super::InsuranceError;
use crate::db::{decimal_at, entity_at, parsed_at, timestamp_at};
use crate::entity::{EntityKind, EntityRef};
use crate::error::ParseEnumError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Keyed model parameters, e.g. `base_premium`, `risk_multiplier`, `minimum_ratio`.
pub type ModelMap = BTreeMap<String, f64>;

pub const BASE_PREMIUM_KEY: &str = "base_premium";
pub const RISK_MULTIPLIER_KEY: &str = "risk_multiplier";
pub const MINIMUM_RATIO_KEY: &str = "minimum_ratio";
pub const LOGISTICS_RISK_KEY: &str = "logistics_risk";
pub const CARGO_RISK_KEY: &str = "cargo_risk";

/// Reference base premium that quotes are scaled against.
pub const REFERENCE_BASE_PREMIUM: f64 = 0.08;
pub const DEFAULT_MINIMUM_RATIO: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsurerStatus {
    Active,
    /// Reserve fell below the solvency floor; no claims are paid until recapitalized.
    CapitalCall,
    Bankrupt,
}

impl InsurerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsurerStatus::Active => "active",
            InsurerStatus::CapitalCall => "capital_call",
            InsurerStatus::Bankrupt => "bankrupt",
        }
    }
}

impl fmt::Display for InsurerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsurerStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(InsurerStatus::Active),
            "capital_call" => Ok(InsurerStatus::CapitalCall),
            "bankrupt" => Ok(InsurerStatus::Bankrupt),
            other => Err(ParseEnumError::new("insurer status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Active,
    Claimed,
    Expired,
    Bankrupt,
}

impl PolicyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyStatus::Active => "active",
            PolicyStatus::Claimed => "claimed",
            PolicyStatus::Expired => "expired",
            PolicyStatus::Bankrupt => "bankrupt",
        }
    }
}

impl fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PolicyStatus::Active),
            "claimed" => Ok(PolicyStatus::Claimed),
            "expired" => Ok(PolicyStatus::Expired),
            "bankrupt" => Ok(PolicyStatus::Bankrupt),
            other => Err(ParseEnumError::new("policy status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsuranceCorporation {
    pub id: i64,
    pub name: String,
    pub identifier: String,
    pub risk_models: ModelMap,
    pub pricing_models: ModelMap,
    pub reserve_requirements: ModelMap,
    pub market_share: f64,
    pub reputation_score: f64,
    pub solvency_ratio: f64,
    pub status: InsurerStatus,
    pub created_at: DateTime<Utc>,
}

impl InsuranceCorporation {
    /// Ledger identity; the reserve is this entity's account in the trade currency.
    pub fn entity(&self) -> EntityRef {
        EntityRef::new(EntityKind::InsuranceCorporation, self.id)
    }

    pub fn base_premium(&self) -> f64 {
        self.pricing_models
            .get(BASE_PREMIUM_KEY)
            .copied()
            .unwrap_or(REFERENCE_BASE_PREMIUM)
    }

    pub fn minimum_ratio(&self) -> f64 {
        self.reserve_requirements
            .get(MINIMUM_RATIO_KEY)
            .copied()
            .unwrap_or(DEFAULT_MINIMUM_RATIO)
    }

    pub fn is_bankrupt(&self) -> bool {
        self.status == InsurerStatus::Bankrupt
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsurancePolicy {
    pub id: i64,
    pub corporation_id: i64,
    pub holder: EntityRef,
    pub contract_reference: Option<String>,
    pub tier: InsuranceTier,
    pub contract_value: Decimal,
    pub coverage_amount: Decimal,
    pub premium_amount: Decimal,
    pub deductible: Decimal,
    pub coverage_percentage: Decimal,
    pub risk_factors: RiskFactors,
    pub status: PolicyStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimPayout {
    pub id: i64,
    pub policy_id: i64,
    pub loss_amount: Decimal,
    pub payout: Decimal,
    pub risk_score: f64,
    pub decision: ClaimDecision,
    pub created_at: DateTime<Utc>,
}

fn json_at<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

const CORPORATION_COLUMNS: &str = "id, name, identifier, risk_models, pricing_models, reserve_requirements, market_share, reputation_score, solvency_ratio, status, created_at";

fn corporation_from_row(row: &Row<'_>) -> rusqlite::Result<InsuranceCorporation> {
    Ok(InsuranceCorporation {
        id: row.get(0)?,
        name: row.get(1)?,
        identifier: row.get(2)?,
        risk_models: json_at(row, 3)?,
        pricing_models: json_at(row, 4)?,
        reserve_requirements: json_at(row, 5)?,
        market_share: row.get(6)?,
        reputation_score: row.get(7)?,
        solvency_ratio: row.get(8)?,
        status: parsed_at(row, 9)?,
        created_at: timestamp_at(row, 10)?,
    })
}

const POLICY_COLUMNS: &str = "id, corporation_id, holder_kind, holder_id, contract_reference, tier, contract_value, coverage_amount, premium_amount, deductible, coverage_percentage, risk_factors, status, created_at";

fn policy_from_row(row: &Row<'_>) -> rusqlite::Result<InsurancePolicy> {
    Ok(InsurancePolicy {
        id: row.get(0)?,
        corporation_id: row.get(1)?,
        holder: entity_at(row, 2, 3)?,
        contract_reference: row.get(4)?,
        tier: parsed_at(row, 5)?,
        contract_value: decimal_at(row, 6)?,
        coverage_amount: decimal_at(row, 7)?,
        premium_amount: decimal_at(row, 8)?,
        deductible: decimal_at(row, 9)?,
        coverage_percentage: decimal_at(row, 10)?,
        risk_factors: json_at(row, 11)?,
        status: parsed_at(row, 12)?,
        created_at: timestamp_at(row, 13)?,
    })
}

fn claim_from_row(row: &Row<'_>) -> rusqlite::Result<ClaimPayout> {
    Ok(ClaimPayout {
        id: row.get(0)?,
        policy_id: row.get(1)?,
        loss_amount: decimal_at(row, 2)?,
        payout: decimal_at(row, 3)?,
        risk_score: row.get(4)?,
        decision: parsed_at(row, 5)?,
        created_at: timestamp_at(row, 6)?,
    })
}

/// Attributes of an insurer that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewInsurer {
    pub name: String,
    pub identifier: String,
    pub risk_models: ModelMap,
    pub pricing_models: ModelMap,
    pub reserve_requirements: ModelMap,
}

pub(crate) fn insert_corporation(
    conn: &Connection,
    new: &NewInsurer,
) -> Result<InsuranceCorporation, InsuranceError> {
    conn.execute(
        "INSERT INTO insurance_corporations (name, identifier, risk_models, pricing_models, reserve_requirements, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            new.name,
            new.identifier,
            serde_json::to_string(&new.risk_models)?,
            serde_json::to_string(&new.pricing_models)?,
            serde_json::to_string(&new.reserve_requirements)?,
            Utc::now().to_rfc3339(),
        ],
    )?;
    load_corporation(conn, conn.last_insert_rowid())
}

pub(crate) fn load_corporation(
    conn: &Connection,
    id: i64,
) -> Result<InsuranceCorporation, InsuranceError> {
    conn.query_row(
        &format!("SELECT {} FROM insurance_corporations WHERE id = ?1", CORPORATION_COLUMNS),
        [id],
        corporation_from_row,
    )
    .optional()?
    .ok_or(InsuranceError::InsurerNotFound(id))
}

pub(crate) fn find_corporation_by_identifier(
    conn: &Connection,
    identifier: &str,
) -> Result<Option<InsuranceCorporation>, InsuranceError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM insurance_corporations WHERE identifier = ?1",
                CORPORATION_COLUMNS
            ),
            [identifier],
            corporation_from_row,
        )
        .optional()?)
}

pub(crate) fn list_corporations(
    conn: &Connection,
) -> Result<Vec<InsuranceCorporation>, InsuranceError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM insurance_corporations ORDER BY id",
        CORPORATION_COLUMNS
    ))?;
    let rows = stmt.query_map([], corporation_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn save_pricing_models(
    conn: &Connection,
    id: i64,
    pricing_models: &ModelMap,
    market_share: f64,
) -> Result<(), InsuranceError> {
    conn.execute(
        "UPDATE insurance_corporations SET pricing_models = ?1, market_share = ?2 WHERE id = ?3",
        params![serde_json::to_string(pricing_models)?, market_share, id],
    )?;
    Ok(())
}

pub(crate) fn save_solvency(
    conn: &Connection,
    id: i64,
    solvency_ratio: f64,
    status: InsurerStatus,
) -> Result<(), InsuranceError> {
    conn.execute(
        "UPDATE insurance_corporations SET solvency_ratio = ?1, status = ?2 WHERE id = ?3",
        params![solvency_ratio, status.as_str(), id],
    )?;
    Ok(())
}

pub(crate) struct NewPolicy<'a> {
    pub corporation_id: i64,
    pub holder: EntityRef,
    pub contract_reference: Option<&'a str>,
    pub tier: InsuranceTier,
    pub contract_value: Decimal,
    pub coverage_amount: Decimal,
    pub premium_amount: Decimal,
    pub deductible: Decimal,
    pub coverage_percentage: Decimal,
    pub risk_factors: &'a RiskFactors,
}

pub(crate) fn insert_policy(
    conn: &Connection,
    new: &NewPolicy<'_>,
) -> Result<InsurancePolicy, InsuranceError> {
    conn.execute(
        "INSERT INTO insurance_policies (corporation_id, holder_kind, holder_id, contract_reference, tier, contract_value, coverage_amount, premium_amount, deductible, coverage_percentage, risk_factors, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            new.corporation_id,
            new.holder.kind.as_str(),
            new.holder.id,
            new.contract_reference,
            new.tier.as_str(),
            new.contract_value.to_string(),
            new.coverage_amount.to_string(),
            new.premium_amount.to_string(),
            new.deductible.to_string(),
            new.coverage_percentage.to_string(),
            serde_json::to_string(new.risk_factors)?,
            PolicyStatus::Active.as_str(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    load_policy(conn, conn.last_insert_rowid())
}

pub(crate) fn load_policy(conn: &Connection, id: i64) -> Result<InsurancePolicy, InsuranceError> {
    conn.query_row(
        &format!("SELECT {} FROM insurance_policies WHERE id = ?1", POLICY_COLUMNS),
        [id],
        policy_from_row,
    )
    .optional()?
    .ok_or(InsuranceError::PolicyNotFound(id))
}

pub(crate) fn policies_for(
    conn: &Connection,
    corporation_id: i64,
    status: Option<PolicyStatus>,
) -> Result<Vec<InsurancePolicy>, InsuranceError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM insurance_policies
         WHERE corporation_id = ?1 AND (?2 IS NULL OR status = ?2) ORDER BY id",
        POLICY_COLUMNS
    ))?;
    let rows = stmt.query_map(
        params![corporation_id, status.map(|s| s.as_str())],
        policy_from_row,
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn set_policy_status(
    conn: &Connection,
    id: i64,
    status: PolicyStatus,
) -> Result<(), InsuranceError> {
    conn.execute(
        "UPDATE insurance_policies SET status = ?1 WHERE id = ?2",
        params![status.as_str(), id],
    )?;
    Ok(())
}

pub(crate) fn reassign_policy(
    conn: &Connection,
    id: i64,
    corporation_id: i64,
) -> Result<(), InsuranceError> {
    conn.execute(
        "UPDATE insurance_policies SET corporation_id = ?1 WHERE id = ?2",
        params![corporation_id, id],
    )?;
    Ok(())
}

pub(crate) fn policy_count(
    conn: &Connection,
    corporation_id: Option<i64>,
) -> Result<i64, InsuranceError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM insurance_policies WHERE (?1 IS NULL OR corporation_id = ?1)",
        params![corporation_id],
        |row| row.get(0),
    )?)
}

/// Sum of active coverage still on the insurer's books.
pub(crate) fn active_exposure(
    conn: &Connection,
    corporation_id: i64,
) -> Result<Decimal, InsuranceError> {
    Ok(policies_for(conn, corporation_id, Some(PolicyStatus::Active))?
        .iter()
        .map(|p| p.coverage_amount)
        .sum())
}

pub(crate) fn total_premiums(
    conn: &Connection,
    corporation_id: i64,
) -> Result<Decimal, InsuranceError> {
    Ok(policies_for(conn, corporation_id, None)?
        .iter()
        .map(|p| p.premium_amount)
        .sum())
}

pub(crate) fn insert_claim(
    conn: &Connection,
    policy_id: i64,
    loss_amount: Decimal,
    payout: Decimal,
    risk_score: f64,
    decision: ClaimDecision,
) -> Result<ClaimPayout, InsuranceError> {
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO claim_payouts (policy_id, loss_amount, payout, risk_score, decision, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            policy_id,
            loss_amount.to_string(),
            payout.to_string(),
            risk_score,
            decision.as_str(),
            created_at.to_rfc3339(),
        ],
    )?;
    Ok(ClaimPayout {
        id: conn.last_insert_rowid(),
        policy_id,
        loss_amount,
        payout,
        risk_score,
        decision,
        created_at,
    })
}

pub(crate) fn claims_for_policy(
    conn: &Connection,
    policy_id: i64,
) -> Result<Vec<ClaimPayout>, InsuranceError> {
    let mut stmt = conn.prepare(
        "SELECT id, policy_id, loss_amount, payout, risk_score, decision, created_at
         FROM claim_payouts WHERE policy_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map([policy_id], claim_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Claims paid on policies the insurer currently holds.
pub(crate) fn total_claims(
    conn: &Connection,
    corporation_id: i64,
) -> Result<Decimal, InsuranceError> {
    let mut stmt = conn.prepare(
        "SELECT c.payout FROM claim_payouts c
         JOIN insurance_policies p ON p.id = c.policy_id
         WHERE p.corporation_id = ?1",
    )?;
    let rows = stmt.query_map([corporation_id], |row| decimal_at(row, 0))?;
    let mut total = Decimal::ZERO;
    for payout in rows {
        total += payout?;
    }
    Ok(total)
}

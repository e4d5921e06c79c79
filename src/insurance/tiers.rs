//! Coverage tiers, premium pricing and claim assessment. Pure functions, no storage.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsuranceTier {
    Basic,
    Standard,
    Premium,
}

/// Fractions of contract value (coverage, premium) and of coverage (deductible).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierTerms {
    pub coverage: Decimal,
    pub premium_rate: Decimal,
    pub deductible: Decimal,
}

impl InsuranceTier {
    pub const ALL: [InsuranceTier; 3] = [
        InsuranceTier::Basic,
        InsuranceTier::Standard,
        InsuranceTier::Premium,
    ];

    pub fn terms(&self) -> TierTerms {
        match self {
            InsuranceTier::Basic => TierTerms {
                coverage: dec!(0.50),
                premium_rate: dec!(0.05),
                deductible: dec!(0.10),
            },
            InsuranceTier::Standard => TierTerms {
                coverage: dec!(0.75),
                premium_rate: dec!(0.10),
                deductible: dec!(0.05),
            },
            InsuranceTier::Premium => TierTerms {
                coverage: dec!(0.90),
                premium_rate: dec!(0.15),
                deductible: dec!(0.02),
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InsuranceTier::Basic => "basic",
            InsuranceTier::Standard => "standard",
            InsuranceTier::Premium => "premium",
        }
    }
}

impl fmt::Display for InsuranceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTierError(String);

impl fmt::Display for ParseTierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown insurance tier: {}", self.0)
    }
}

impl std::error::Error for ParseTierError {}

impl FromStr for InsuranceTier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(InsuranceTier::Basic),
            "standard" => Ok(InsuranceTier::Standard),
            "premium" => Ok(InsuranceTier::Premium),
            other => Err(ParseTierError(other.to_string())),
        }
    }
}

/// Contract risk inputs. Absent factors do not move the premium.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskFactors {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_risk: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contractor_reliability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cargo_value: Option<Decimal>,
}

pub fn risk_multiplier(factors: &RiskFactors) -> Decimal {
    let mut multiplier = Decimal::ONE;

    if let Some(route_risk) = factors.route_risk {
        if route_risk > 0.7 {
            multiplier *= dec!(1.5);
        } else if route_risk > 0.5 {
            multiplier *= dec!(1.2);
        }
    }

    if let Some(reliability) = factors.contractor_reliability {
        if reliability > 0.9 {
            multiplier *= dec!(0.8);
        } else if reliability < 0.5 {
            multiplier *= dec!(1.3);
        }
    }

    if let Some(cargo_value) = factors.cargo_value {
        if cargo_value > dec!(10000) {
            multiplier *= dec!(1.2);
        }
    }

    multiplier
}

/// `contract_value × tier premium rate × risk multiplier`, rounded to cents.
pub fn calculate_premium(
    contract_value: Decimal,
    tier: InsuranceTier,
    factors: &RiskFactors,
) -> Decimal {
    (contract_value * tier.terms().premium_rate * risk_multiplier(factors)).round_dp(2)
}

/// What happened when the insured contract failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimCircumstances {
    #[serde(default)]
    pub cargo_recovered: bool,
    #[serde(default)]
    pub contractor_abandoned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimDecision {
    Approve,
    Investigate,
    Deny,
}

impl ClaimDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimDecision::Approve => "approve",
            ClaimDecision::Investigate => "investigate",
            ClaimDecision::Deny => "deny",
        }
    }
}

impl fmt::Display for ClaimDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimDecision {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(ClaimDecision::Approve),
            "investigate" => Ok(ClaimDecision::Investigate),
            "deny" => Ok(ClaimDecision::Deny),
            other => Err(ParseTierError(format!("claim decision {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClaimAssessment {
    pub decision: ClaimDecision,
    pub risk_score: f64,
    pub payout: Decimal,
}

const INVESTIGATION_PAYOUT_SHARE: Decimal = dec!(0.8);

pub fn claim_risk_score(circumstances: &ClaimCircumstances) -> f64 {
    let mut score: f64 = 0.5;
    if circumstances.cargo_recovered {
        score -= 0.2;
    }
    if circumstances.contractor_abandoned {
        score += 0.3;
    }
    score.clamp(0.0, 1.0)
}

/// Decide a claim. The covered loss is capped at coverage and reduced by the deductible.
pub fn assess_claim(
    coverage_amount: Decimal,
    deductible: Decimal,
    loss_amount: Decimal,
    circumstances: &ClaimCircumstances,
) -> ClaimAssessment {
    assess_with_score(
        coverage_amount,
        deductible,
        loss_amount,
        claim_risk_score(circumstances),
    )
}

/// Band a precomputed risk score: `< 0.3` approve, `< 0.7` investigate, else deny.
pub fn assess_with_score(
    coverage_amount: Decimal,
    deductible: Decimal,
    loss_amount: Decimal,
    risk_score: f64,
) -> ClaimAssessment {
    let covered = (loss_amount.min(coverage_amount) - deductible).max(Decimal::ZERO);

    let (decision, payout) = if risk_score < 0.3 {
        (ClaimDecision::Approve, covered)
    } else if risk_score < 0.7 {
        (
            ClaimDecision::Investigate,
            (covered * INVESTIGATION_PAYOUT_SHARE).round_dp(2),
        )
    } else {
        (ClaimDecision::Deny, Decimal::ZERO)
    };

    ClaimAssessment {
        decision,
        risk_score,
        payout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_premium_by_tier() {
        let none = RiskFactors::default();
        assert_eq!(calculate_premium(dec!(10000), InsuranceTier::Basic, &none), dec!(500));
        assert_eq!(calculate_premium(dec!(10000), InsuranceTier::Standard, &none), dec!(1000));
        assert_eq!(calculate_premium(dec!(10000), InsuranceTier::Premium, &none), dec!(1500));
    }

    #[test]
    fn test_risk_multiplier_accumulates() {
        let risky = RiskFactors {
            route_risk: Some(0.8),
            contractor_reliability: Some(0.4),
            cargo_value: Some(dec!(20000)),
        };
        // 1.5 × 1.3 × 1.2
        assert_eq!(risk_multiplier(&risky), dec!(2.34));

        let safe = RiskFactors {
            route_risk: Some(0.6),
            contractor_reliability: Some(0.95),
            cargo_value: Some(dec!(10000)),
        };
        // 1.2 × 0.8; cargo at exactly 10000 does not trigger.
        assert_eq!(risk_multiplier(&safe), dec!(0.96));
        assert_eq!(
            calculate_premium(dec!(10000), InsuranceTier::Standard, &safe),
            dec!(960)
        );
    }

    #[test]
    fn test_claim_decisions() {
        let approved = assess_with_score(dec!(7500), dec!(375), dec!(5000), 0.2);
        assert_eq!(approved.decision, ClaimDecision::Approve);
        assert_eq!(approved.payout, dec!(4625));

        let neutral = ClaimCircumstances::default();
        let investigated = assess_claim(dec!(7500), dec!(375), dec!(9000), &neutral);
        assert_eq!(investigated.decision, ClaimDecision::Investigate);
        // min(9000, 7500) - 375 = 7125, 80% of that.
        assert_eq!(investigated.payout, dec!(5700));

        // Recovered cargo lands exactly on the 0.3 boundary, which investigates.
        let recovered = ClaimCircumstances {
            cargo_recovered: true,
            contractor_abandoned: false,
        };
        let boundary = assess_claim(dec!(7500), dec!(375), dec!(5000), &recovered);
        assert_eq!(boundary.decision, ClaimDecision::Investigate);
        assert_eq!(boundary.payout, dec!(3700));

        let abandoned = ClaimCircumstances {
            cargo_recovered: false,
            contractor_abandoned: true,
        };
        let denied = assess_claim(dec!(7500), dec!(375), dec!(5000), &abandoned);
        assert_eq!(denied.decision, ClaimDecision::Deny);
        assert_eq!(denied.payout, Decimal::ZERO);
    }

    #[test]
    fn test_loss_below_deductible_pays_nothing() {
        let assessment = assess_with_score(dec!(7500), dec!(375), dec!(100), 0.1);
        assert_eq!(assessment.decision, ClaimDecision::Approve);
        assert_eq!(assessment.payout, Decimal::ZERO);
    }

    #[test]
    fn test_risk_score_is_clamped() {
        let both = ClaimCircumstances {
            cargo_recovered: true,
            contractor_abandoned: true,
        };
        assert!((claim_risk_score(&both) - 0.6).abs() < 1e-9);
        assert!((claim_risk_score(&ClaimCircumstances::default()) - 0.5).abs() < 1e-9);
    }
}

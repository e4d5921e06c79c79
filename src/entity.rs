//! Accountable entity references and the capability directory.
//!
//! The economy never owns players, settlements or organizations. It only sees a stable
//! `(kind, id)` pair and asks an [`EntityDirectory`] what that entity may do.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Settlement,
    Colony,
    Organization,
    DevelopmentCorporation,
    InsuranceCorporation,
    TaxAuthority,
    Contract,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Player => "player",
            EntityKind::Settlement => "settlement",
            EntityKind::Colony => "colony",
            EntityKind::Organization => "organization",
            EntityKind::DevelopmentCorporation => "development_corporation",
            EntityKind::InsuranceCorporation => "insurance_corporation",
            EntityKind::TaxAuthority => "tax_authority",
            EntityKind::Contract => "contract",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEntityError(pub String);

impl fmt::Display for ParseEntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid entity reference: {}", self.0)
    }
}

impl std::error::Error for ParseEntityError {}

impl FromStr for EntityKind {
    type Err = ParseEntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "player" => Ok(EntityKind::Player),
            "settlement" => Ok(EntityKind::Settlement),
            "colony" => Ok(EntityKind::Colony),
            "organization" => Ok(EntityKind::Organization),
            "development_corporation" => Ok(EntityKind::DevelopmentCorporation),
            "insurance_corporation" => Ok(EntityKind::InsuranceCorporation),
            "tax_authority" => Ok(EntityKind::TaxAuthority),
            "contract" => Ok(EntityKind::Contract),
            other => Err(ParseEntityError(other.to_string())),
        }
    }
}

/// Stable reference to an accountable entity, written `kind:id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub const fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub const fn player(id: i64) -> Self {
        Self::new(EntityKind::Player, id)
    }

    pub const fn settlement(id: i64) -> Self {
        Self::new(EntityKind::Settlement, id)
    }

    pub const fn colony(id: i64) -> Self {
        Self::new(EntityKind::Colony, id)
    }

    pub const fn organization(id: i64) -> Self {
        Self::new(EntityKind::Organization, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for EntityRef {
    type Err = ParseEntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| ParseEntityError(s.to_string()))?;
        let id = id
            .trim()
            .parse::<i64>()
            .map_err(|_| ParseEntityError(s.to_string()))?;
        Ok(Self::new(kind.parse()?, id))
    }
}

/// Capability queries the economy needs about entities it does not own.
pub trait EntityDirectory: Send + Sync {
    /// NPC entities run on the virtual ledger and may hold negative balances.
    fn is_npc(&self, entity: &EntityRef) -> bool;

    /// Per-entity sales tax override; `None` means the configured default applies.
    fn tax_rate(&self, _entity: &EntityRef) -> Option<Decimal> {
        None
    }
}

/// Default directory: NPC by kind (colonies, development corporations) or by explicit flag.
pub struct EntityRegistry {
    npc_kinds: HashSet<EntityKind>,
    flags: RwLock<HashMap<EntityRef, bool>>,
    tax_rates: RwLock<HashMap<EntityRef, Decimal>>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self {
            npc_kinds: [EntityKind::Colony, EntityKind::DevelopmentCorporation]
                .into_iter()
                .collect(),
            flags: RwLock::new(HashMap::new()),
            tax_rates: RwLock::new(HashMap::new()),
        }
    }
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit operational flag; overrides the kind default in either direction.
    pub fn set_npc(&self, entity: EntityRef, is_npc: bool) {
        self.flags.write().insert(entity, is_npc);
    }

    pub fn set_tax_rate(&self, entity: EntityRef, rate: Decimal) {
        self.tax_rates.write().insert(entity, rate);
    }
}

impl EntityDirectory for EntityRegistry {
    fn is_npc(&self, entity: &EntityRef) -> bool {
        if let Some(flag) = self.flags.read().get(entity) {
            return *flag;
        }
        self.npc_kinds.contains(&entity.kind)
    }

    fn tax_rate(&self, entity: &EntityRef) -> Option<Decimal> {
        self.tax_rates.read().get(entity).copied()
    }
}

//! Settlement and inventory seams.
//!
//! The market never owns settlements or stockpiles. It queries NPC demand through
//! [`SettlementEconomy`] and moves goods through [`Inventory`].

use super::MarketError;
use crate::entity::EntityRef;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;

pub trait SettlementEconomy: Send + Sync {
    fn settlement_id(&self) -> i64;

    /// The entity that pays for NPC purchases at this settlement.
    fn entity(&self) -> EntityRef {
        EntityRef::settlement(self.settlement_id())
    }

    /// Price the settlement's NPC buyers will pay per unit; zero means not buying.
    fn npc_market_bid(&self, resource: &str) -> Decimal;

    /// Units the settlement's NPC buyers will absorb right now.
    fn npc_buy_capacity(&self, resource: &str) -> i64;

    /// Stock level as a fraction of storage capacity, if known.
    fn inventory_level(&self, _resource: &str) -> Option<f64> {
        None
    }
}

pub trait Inventory: Send + Sync {
    fn available(&self, owner: &EntityRef, resource: &str) -> i64;

    fn has_enough(&self, owner: &EntityRef, resource: &str, quantity: i64) -> bool {
        self.available(owner, resource) >= quantity
    }

    fn remove(&self, owner: &EntityRef, resource: &str, quantity: i64) -> Result<(), MarketError>;

    fn add(&self, owner: &EntityRef, resource: &str, quantity: i64);
}

#[derive(Debug, Clone, Copy)]
struct NpcDemand {
    bid: Decimal,
    capacity: i64,
}

/// Settlement with fixed, caller-supplied NPC demand.
pub struct SimulatedSettlement {
    id: i64,
    entity: EntityRef,
    demand: RwLock<HashMap<String, NpcDemand>>,
    levels: RwLock<HashMap<String, f64>>,
}

impl SimulatedSettlement {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            entity: EntityRef::settlement(id),
            demand: RwLock::new(HashMap::new()),
            levels: RwLock::new(HashMap::new()),
        }
    }

    /// Pay for purchases from a different entity, e.g. the colony that runs the settlement.
    pub fn paid_by(mut self, entity: EntityRef) -> Self {
        self.entity = entity;
        self
    }

    pub fn with_npc_demand(self, resource: &str, bid: Decimal, capacity: i64) -> Self {
        self.set_npc_demand(resource, bid, capacity);
        self
    }

    pub fn with_inventory_level(self, resource: &str, level: f64) -> Self {
        self.set_inventory_level(resource, level);
        self
    }

    pub fn set_npc_demand(&self, resource: &str, bid: Decimal, capacity: i64) {
        self.demand
            .write()
            .insert(resource.to_string(), NpcDemand { bid, capacity });
    }

    pub fn set_inventory_level(&self, resource: &str, level: f64) {
        self.levels.write().insert(resource.to_string(), level);
    }
}

impl SettlementEconomy for SimulatedSettlement {
    fn settlement_id(&self) -> i64 {
        self.id
    }

    fn entity(&self) -> EntityRef {
        self.entity
    }

    fn npc_market_bid(&self, resource: &str) -> Decimal {
        self.demand
            .read()
            .get(resource)
            .map(|d| d.bid)
            .unwrap_or(Decimal::ZERO)
    }

    fn npc_buy_capacity(&self, resource: &str) -> i64 {
        self.demand
            .read()
            .get(resource)
            .map(|d| d.capacity)
            .unwrap_or(0)
    }

    fn inventory_level(&self, resource: &str) -> Option<f64> {
        self.levels.read().get(resource).copied()
    }
}

/// Process-local stockpiles keyed by (owner, resource).
#[derive(Default)]
pub struct InMemoryInventory {
    stock: RwLock<HashMap<(EntityRef, String), i64>>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inventory for InMemoryInventory {
    fn available(&self, owner: &EntityRef, resource: &str) -> i64 {
        self.stock
            .read()
            .get(&(*owner, resource.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn remove(&self, owner: &EntityRef, resource: &str, quantity: i64) -> Result<(), MarketError> {
        let mut stock = self.stock.write();
        let held = stock.entry((*owner, resource.to_string())).or_insert(0);
        if *held < quantity {
            return Err(MarketError::InsufficientInventory {
                owner: *owner,
                resource: resource.to_string(),
                requested: quantity,
                available: *held,
            });
        }
        *held -= quantity;
        Ok(())
    }

    fn add(&self, owner: &EntityRef, resource: &str, quantity: i64) {
        *self
            .stock
            .write()
            .entry((*owner, resource.to_string()))
            .or_insert(0) += quantity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_simulated_settlement_defaults_to_no_demand() {
        let settlement = SimulatedSettlement::new(4).with_npc_demand("ibeam", dec!(50), 600);
        assert_eq!(settlement.entity(), EntityRef::settlement(4));
        assert_eq!(settlement.npc_market_bid("ibeam"), dec!(50));
        assert_eq!(settlement.npc_buy_capacity("ibeam"), 600);
        assert_eq!(settlement.npc_market_bid("water"), Decimal::ZERO);
        assert_eq!(settlement.npc_buy_capacity("water"), 0);
        assert_eq!(settlement.inventory_level("ibeam"), None);
    }

    #[test]
    fn test_inventory_remove_is_all_or_nothing() {
        let inventory = InMemoryInventory::new();
        let owner = EntityRef::player(1);
        inventory.add(&owner, "ibeam", 100);

        let err = inventory.remove(&owner, "ibeam", 150).unwrap_err();
        assert!(matches!(err, MarketError::InsufficientInventory { available: 100, .. }));
        assert_eq!(inventory.available(&owner, "ibeam"), 100);

        inventory.remove(&owner, "ibeam", 40).unwrap();
        assert_eq!(inventory.available(&owner, "ibeam"), 60);
        assert!(inventory.has_enough(&owner, "ibeam", 60));
        assert!(!inventory.has_enough(&owner, "ibeam", 61));
    }
}

//! Galaxy economy core.
//!
//! A double-entry ledger (accounts, currencies, transfers, tax, bonds, exchange rates), a
//! per-settlement market that clears player sell orders against synthetic NPC demand, and a
//! logistics insurance layer whose premiums, payouts and reserves all move through the ledger.

pub mod config;
pub mod db;
pub mod economy;
pub mod entity;
pub mod error;
pub mod insurance;
pub mod ledger;
pub mod market;

pub use economy::Economy;
pub use error::ErrorClass;

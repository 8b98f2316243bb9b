//! Database module: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: row and insert models returned/accepted by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `shiptrack::db`; the repository API and
//! commonly used models are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{
    InsertOutcome, NewNotification, NewTrackingEvent, ShipmentOwner, ShipmentPointer,
    StaleShipment,
};

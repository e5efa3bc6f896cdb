//! Infrastructure layer: stores, cache, config and the inventory services.
//!
//! The domain crates stay free of IO; everything that touches PostgreSQL,
//! Redis or process configuration lives here.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod movement_engine;
pub mod query_service;
pub mod services;
pub mod store;


pub use config::{InventoryConfig, LogFormat};
pub use error::{ErrorKind, InventoryError, InventoryResult};
pub use movement_engine::{MovementEngine, MovementKind, MovementRecord, MovementRequest, OwnerSnapshot};
pub use services::InventoryServices;

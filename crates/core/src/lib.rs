//! `gascyl-core`: shared building blocks for the cylinder inventory crates.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{CategoryId, CylinderId, CylinderTypeId, MovementId, UserId};

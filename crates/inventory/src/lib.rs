//! Gas-cylinder inventory domain.
//!
//! Business rules for the two inventory flows, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage):
//!
//! - **Category flow**: aggregate stock units with total/filled/empty counters.
//! - **Cylinder flow**: individually serialized cylinders with a current status.
//!
//! Both flows produce [`Movement`] audit records; the infrastructure layer is
//! responsible for persisting the record and the updated owner atomically.

pub mod category;
pub mod cylinder;
pub mod movement;

pub use category::{
    requires_restock, Category, CategoryPatch, CategoryStatus, NewCategory, StockOperation,
    RESTOCK_THRESHOLD_PERCENT,
};
pub use cylinder::{
    movement_type_for_status, needs_inspection, Cylinder, CylinderPatch, CylinderStatus,
    CylinderType, CylinderTypePatch, NewCylinder, NewCylinderType, StatusTransition,
    DEFAULT_INSPECTION_INTERVAL_DAYS,
};
pub use movement::{Movement, MovementContext, MovementOwner, MovementType};

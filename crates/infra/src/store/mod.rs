//! Entity store boundary.
//!
//! `InventoryStore` exposes committed reads; every write goes through a
//! `StoreTransaction` so that a movement row and the owner update it causes
//! commit or roll back together. Owner rows are fetched with the `lock_*`
//! methods, which hold the row until the transaction ends.
//!
//! Implementations contain no business logic beyond building query predicates
//! and mapping backend failures into [`StoreError`].

pub mod in_memory;
pub mod postgres;
pub mod query;

use async_trait::async_trait;
use thiserror::Error;

use gascyl_core::{CategoryId, CylinderId, CylinderTypeId, MovementId};
use gascyl_inventory::{Category, Cylinder, CylinderType, Movement, MovementOwner};

pub use in_memory::{FailPoint, InMemoryInventoryStore, InMemoryTransaction};
pub use postgres::{PostgresInventoryStore, PostgresTransaction};
pub use query::{
    CategoryFilter, CategorySort, CategorySortField, CylinderFilter, CylinderSort,
    CylinderSortField, MovementFilter, Page, PageMeta, PageRequest, SortOrder,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique or foreign-key constraint rejected the write.
    #[error("constraint violation: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be mapped back into the domain model.
    #[error("failed to decode row: {0}")]
    Decode(String),
}

/// Committed-state reads plus transaction entry.
#[async_trait]
pub trait InventoryStore: Send + Sync + 'static {
    type Tx: StoreTransaction;

    async fn begin(&self) -> StoreResult<Self::Tx>;

    async fn find_category(&self, id: CategoryId) -> StoreResult<Option<Category>>;

    async fn list_categories(
        &self,
        filter: &CategoryFilter,
        sort: CategorySort,
        page: PageRequest,
    ) -> StoreResult<Page<Category>>;

    async fn all_categories(&self) -> StoreResult<Vec<Category>>;

    async fn find_cylinder_type(&self, id: CylinderTypeId) -> StoreResult<Option<CylinderType>>;

    /// Types ordered by name.
    async fn list_cylinder_types(&self, page: PageRequest) -> StoreResult<Page<CylinderType>>;

    async fn all_cylinder_types(&self) -> StoreResult<Vec<CylinderType>>;

    async fn find_cylinder(&self, id: CylinderId) -> StoreResult<Option<Cylinder>>;

    async fn list_cylinders(
        &self,
        filter: &CylinderFilter,
        sort: CylinderSort,
        page: PageRequest,
    ) -> StoreResult<Page<Cylinder>>;

    async fn all_cylinders(&self) -> StoreResult<Vec<Cylinder>>;

    async fn find_movement(&self, id: MovementId) -> StoreResult<Option<Movement>>;

    /// Movements of one owner, newest first.
    async fn list_movements(
        &self,
        owner: MovementOwner,
        filter: &MovementFilter,
        page: PageRequest,
    ) -> StoreResult<Page<Movement>>;
}

/// One unit of work. Dropping it without `commit` discards every write.
#[async_trait]
pub trait StoreTransaction: Send + 'static {
    async fn lock_category(&mut self, id: CategoryId) -> StoreResult<Option<Category>>;
    async fn insert_category(&mut self, category: &Category) -> StoreResult<()>;
    async fn update_category(&mut self, category: &Category) -> StoreResult<()>;
    /// Deletes the category and its movements. Returns `false` if it did not exist.
    async fn delete_category(&mut self, id: CategoryId) -> StoreResult<bool>;

    async fn lock_cylinder_type(&mut self, id: CylinderTypeId) -> StoreResult<Option<CylinderType>>;
    async fn insert_cylinder_type(&mut self, cylinder_type: &CylinderType) -> StoreResult<()>;
    async fn update_cylinder_type(&mut self, cylinder_type: &CylinderType) -> StoreResult<()>;
    async fn delete_cylinder_type(&mut self, id: CylinderTypeId) -> StoreResult<bool>;
    async fn count_cylinders_of_type(&mut self, id: CylinderTypeId) -> StoreResult<u64>;

    async fn lock_cylinder(&mut self, id: CylinderId) -> StoreResult<Option<Cylinder>>;
    async fn find_cylinder_by_serial(&mut self, serial_number: &str) -> StoreResult<Option<CylinderId>>;
    async fn insert_cylinder(&mut self, cylinder: &Cylinder) -> StoreResult<()>;
    async fn update_cylinder(&mut self, cylinder: &Cylinder) -> StoreResult<()>;
    /// Deletes the cylinder and its movements. Returns `false` if it did not exist.
    async fn delete_cylinder(&mut self, id: CylinderId) -> StoreResult<bool>;

    async fn insert_movement(&mut self, movement: &Movement) -> StoreResult<()>;
    async fn lock_movement(&mut self, id: MovementId) -> StoreResult<Option<Movement>>;
    async fn update_movement_notes(&mut self, movement: &Movement) -> StoreResult<()>;

    async fn commit(self) -> StoreResult<()>;
    async fn rollback(self) -> StoreResult<()>;
}

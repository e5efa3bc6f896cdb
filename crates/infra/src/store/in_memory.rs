use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use gascyl_core::{CategoryId, CylinderId, CylinderTypeId, MovementId};
use gascyl_inventory::{Category, Cylinder, CylinderType, Movement, MovementOwner};

use super::query::{
    sort_movements, CategoryFilter, CategorySort, CylinderFilter, CylinderSort, MovementFilter,
    Page, PageRequest,
};
use super::{InventoryStore, StoreError, StoreResult, StoreTransaction};

/// Write step at which the in-memory store can be told to fail once.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertMovement,
    UpdateCategory,
    UpdateCylinder,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct InventoryState {
    categories: HashMap<CategoryId, Category>,
    cylinder_types: HashMap<CylinderTypeId, CylinderType>,
    cylinders: HashMap<CylinderId, Cylinder>,
    movements: HashMap<MovementId, Movement>,
}

impl InventoryState {
    fn drop_movements_of(&mut self, owner: MovementOwner) {
        self.movements.retain(|_, m| m.owner != owner);
    }
}

type FailPoints = Arc<Mutex<HashSet<FailPoint>>>;

fn trip(fail_points: &FailPoints, point: FailPoint) -> StoreResult<()> {
    let mut points = fail_points
        .lock()
        .map_err(|_| StoreError::Database("fail point lock poisoned".to_string()))?;
    if points.remove(&point) {
        return Err(StoreError::Database(format!("injected failure at {point:?}")));
    }
    Ok(())
}

/// In-memory entity store.
///
/// Intended for tests/dev. A transaction holds the state lock for its whole
/// lifetime and works on a private copy, so transactions are serialized and a
/// rollback simply drops the copy.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<AsyncMutex<InventoryState>>,
    fail_points: FailPoints,
    reads: AtomicU64,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next write at `point` fail with a database error.
    pub fn fail_once(&self, point: FailPoint) {
        if let Ok(mut points) = self.fail_points.lock() {
            points.insert(point);
        }
    }

    /// Number of committed-state reads served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    async fn read<T>(&self, f: impl FnOnce(&InventoryState) -> T) -> T {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;
        f(&state)
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryTransaction {
            guard,
            working,
            fail_points: self.fail_points.clone(),
        })
    }

    async fn find_category(&self, id: CategoryId) -> StoreResult<Option<Category>> {
        Ok(self.read(|s| s.categories.get(&id).cloned()).await)
    }

    async fn list_categories(
        &self,
        filter: &CategoryFilter,
        sort: CategorySort,
        page: PageRequest,
    ) -> StoreResult<Page<Category>> {
        let mut matched: Vec<Category> = self
            .read(|s| s.categories.values().filter(|c| filter.matches(c)).cloned().collect())
            .await;
        sort.sort(&mut matched);
        Ok(Page::from_sorted(matched, page))
    }

    async fn all_categories(&self) -> StoreResult<Vec<Category>> {
        Ok(self.read(|s| s.categories.values().cloned().collect()).await)
    }

    async fn find_cylinder_type(&self, id: CylinderTypeId) -> StoreResult<Option<CylinderType>> {
        Ok(self.read(|s| s.cylinder_types.get(&id).cloned()).await)
    }

    async fn list_cylinder_types(&self, page: PageRequest) -> StoreResult<Page<CylinderType>> {
        let mut types = self.all_cylinder_types().await?;
        types.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(Page::from_sorted(types, page))
    }

    async fn all_cylinder_types(&self) -> StoreResult<Vec<CylinderType>> {
        Ok(self.read(|s| s.cylinder_types.values().cloned().collect()).await)
    }

    async fn find_cylinder(&self, id: CylinderId) -> StoreResult<Option<Cylinder>> {
        Ok(self.read(|s| s.cylinders.get(&id).cloned()).await)
    }

    async fn list_cylinders(
        &self,
        filter: &CylinderFilter,
        sort: CylinderSort,
        page: PageRequest,
    ) -> StoreResult<Page<Cylinder>> {
        let mut matched: Vec<Cylinder> = self
            .read(|s| {
                s.cylinders
                    .values()
                    .filter(|c| filter.matches(c, s.cylinder_types.get(&c.type_id)))
                    .cloned()
                    .collect()
            })
            .await;
        sort.sort(&mut matched);
        Ok(Page::from_sorted(matched, page))
    }

    async fn all_cylinders(&self) -> StoreResult<Vec<Cylinder>> {
        Ok(self.read(|s| s.cylinders.values().cloned().collect()).await)
    }

    async fn find_movement(&self, id: MovementId) -> StoreResult<Option<Movement>> {
        Ok(self.read(|s| s.movements.get(&id).cloned()).await)
    }

    async fn list_movements(
        &self,
        owner: MovementOwner,
        filter: &MovementFilter,
        page: PageRequest,
    ) -> StoreResult<Page<Movement>> {
        let mut matched: Vec<Movement> = self
            .read(|s| {
                s.movements
                    .values()
                    .filter(|m| m.owner == owner && filter.matches(m))
                    .cloned()
                    .collect()
            })
            .await;
        sort_movements(&mut matched);
        Ok(Page::from_sorted(matched, page))
    }
}

/// Transaction over [`InMemoryInventoryStore`].
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<InventoryState>,
    working: InventoryState,
    fail_points: FailPoints,
}

impl core::fmt::Debug for InMemoryTransaction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryTransaction").finish_non_exhaustive()
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn lock_category(&mut self, id: CategoryId) -> StoreResult<Option<Category>> {
        Ok(self.working.categories.get(&id).cloned())
    }

    async fn insert_category(&mut self, category: &Category) -> StoreResult<()> {
        if self.working.categories.contains_key(&category.id) {
            return Err(StoreError::Conflict(format!("category {} already exists", category.id)));
        }
        self.working.categories.insert(category.id, category.clone());
        Ok(())
    }

    async fn update_category(&mut self, category: &Category) -> StoreResult<()> {
        trip(&self.fail_points, FailPoint::UpdateCategory)?;
        match self.working.categories.get_mut(&category.id) {
            Some(slot) => {
                *slot = category.clone();
                Ok(())
            }
            None => Err(StoreError::Database(format!("category {} vanished", category.id))),
        }
    }

    async fn delete_category(&mut self, id: CategoryId) -> StoreResult<bool> {
        let existed = self.working.categories.remove(&id).is_some();
        if existed {
            self.working.drop_movements_of(MovementOwner::Category(id));
        }
        Ok(existed)
    }

    async fn lock_cylinder_type(&mut self, id: CylinderTypeId) -> StoreResult<Option<CylinderType>> {
        Ok(self.working.cylinder_types.get(&id).cloned())
    }

    async fn insert_cylinder_type(&mut self, cylinder_type: &CylinderType) -> StoreResult<()> {
        if self.working.cylinder_types.contains_key(&cylinder_type.id) {
            return Err(StoreError::Conflict(format!(
                "cylinder type {} already exists",
                cylinder_type.id
            )));
        }
        self.working
            .cylinder_types
            .insert(cylinder_type.id, cylinder_type.clone());
        Ok(())
    }

    async fn update_cylinder_type(&mut self, cylinder_type: &CylinderType) -> StoreResult<()> {
        match self.working.cylinder_types.get_mut(&cylinder_type.id) {
            Some(slot) => {
                *slot = cylinder_type.clone();
                Ok(())
            }
            None => Err(StoreError::Database(format!(
                "cylinder type {} vanished",
                cylinder_type.id
            ))),
        }
    }

    async fn delete_cylinder_type(&mut self, id: CylinderTypeId) -> StoreResult<bool> {
        if self.working.cylinders.values().any(|c| c.type_id == id) {
            return Err(StoreError::Conflict(format!("cylinder type {id} is referenced")));
        }
        Ok(self.working.cylinder_types.remove(&id).is_some())
    }

    async fn count_cylinders_of_type(&mut self, id: CylinderTypeId) -> StoreResult<u64> {
        Ok(self
            .working
            .cylinders
            .values()
            .filter(|c| c.type_id == id)
            .count() as u64)
    }

    async fn lock_cylinder(&mut self, id: CylinderId) -> StoreResult<Option<Cylinder>> {
        Ok(self.working.cylinders.get(&id).cloned())
    }

    async fn find_cylinder_by_serial(&mut self, serial_number: &str) -> StoreResult<Option<CylinderId>> {
        Ok(self
            .working
            .cylinders
            .values()
            .find(|c| c.serial_number == serial_number)
            .map(|c| c.id))
    }

    async fn insert_cylinder(&mut self, cylinder: &Cylinder) -> StoreResult<()> {
        if !self.working.cylinder_types.contains_key(&cylinder.type_id) {
            return Err(StoreError::Conflict(format!(
                "cylinder type {} does not exist",
                cylinder.type_id
            )));
        }
        let serial_taken = self
            .working
            .cylinders
            .values()
            .any(|c| c.serial_number == cylinder.serial_number);
        if serial_taken || self.working.cylinders.contains_key(&cylinder.id) {
            return Err(StoreError::Conflict(format!(
                "cylinder with serial number {} already exists",
                cylinder.serial_number
            )));
        }
        self.working.cylinders.insert(cylinder.id, cylinder.clone());
        Ok(())
    }

    async fn update_cylinder(&mut self, cylinder: &Cylinder) -> StoreResult<()> {
        trip(&self.fail_points, FailPoint::UpdateCylinder)?;
        let serial_taken = self
            .working
            .cylinders
            .values()
            .any(|c| c.id != cylinder.id && c.serial_number == cylinder.serial_number);
        if serial_taken {
            return Err(StoreError::Conflict(format!(
                "cylinder with serial number {} already exists",
                cylinder.serial_number
            )));
        }
        match self.working.cylinders.get_mut(&cylinder.id) {
            Some(slot) => {
                *slot = cylinder.clone();
                Ok(())
            }
            None => Err(StoreError::Database(format!("cylinder {} vanished", cylinder.id))),
        }
    }

    async fn delete_cylinder(&mut self, id: CylinderId) -> StoreResult<bool> {
        let existed = self.working.cylinders.remove(&id).is_some();
        if existed {
            self.working.drop_movements_of(MovementOwner::Cylinder(id));
        }
        Ok(existed)
    }

    async fn insert_movement(&mut self, movement: &Movement) -> StoreResult<()> {
        trip(&self.fail_points, FailPoint::InsertMovement)?;
        let owner_exists = match movement.owner {
            MovementOwner::Category(id) => self.working.categories.contains_key(&id),
            MovementOwner::Cylinder(id) => self.working.cylinders.contains_key(&id),
        };
        if !owner_exists {
            return Err(StoreError::Conflict(format!(
                "movement owner {} does not exist",
                movement.owner
            )));
        }
        self.working.movements.insert(movement.id, movement.clone());
        Ok(())
    }

    async fn lock_movement(&mut self, id: MovementId) -> StoreResult<Option<Movement>> {
        Ok(self.working.movements.get(&id).cloned())
    }

    async fn update_movement_notes(&mut self, movement: &Movement) -> StoreResult<()> {
        match self.working.movements.get_mut(&movement.id) {
            Some(slot) => {
                slot.notes = movement.notes.clone();
                Ok(())
            }
            None => Err(StoreError::Database(format!("movement {} vanished", movement.id))),
        }
    }

    async fn commit(mut self) -> StoreResult<()> {
        trip(&self.fail_points, FailPoint::Commit)?;
        *self.guard = std::mem::take(&mut self.working);
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}

//! Transactional movement recording.
//!
//! Every inventory-affecting operation goes through one pipeline:
//!
//! ```text
//! MovementRequest
//!   ↓
//! 1. Validate quantities and owner/kind pairing (no IO)
//!   ↓
//! 2. Begin transaction, lock the owner row
//!   ↓
//! 3. Write the Movement row
//!   ↓
//! 4. Apply the delta to the owner (counters clamped at zero) and write it back
//!   ↓
//! 5. Commit, then invalidate the owner's cache entries
//! ```
//!
//! Any failure between 2 and 5 rolls the whole transaction back, so there is
//! never a movement without its counter update or the other way round.
//! Requests are not idempotent: recording the same sale twice yields two
//! movements and two decrements.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use gascyl_core::{CategoryId, CylinderId, MovementId};
use gascyl_inventory::{
    Category, Cylinder, CylinderStatus, Movement, MovementContext, MovementOwner, StockOperation,
};

use crate::cache::{CacheScope, InventoryCache};
use crate::error::{InventoryError, InventoryResult};
use crate::store::{InventoryStore, StoreTransaction};

/// What the movement does to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MovementKind {
    /// Counter change on a category.
    Stock(StockOperation),
    /// Status change of a single cylinder.
    StatusChange {
        to_status: CylinderStatus,
        to_location: Option<String>,
    },
}

impl MovementKind {
    fn label(&self) -> &'static str {
        match self {
            MovementKind::Stock(op) => op.movement_type().as_str(),
            MovementKind::StatusChange { .. } => "status change",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub owner: MovementOwner,
    pub kind: MovementKind,
    #[serde(default)]
    pub context: MovementContext,
}

/// Owner state right after the movement committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
pub enum OwnerSnapshot {
    Category(Category),
    Cylinder(Cylinder),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub movement: Movement,
    pub owner: OwnerSnapshot,
}

pub struct MovementEngine<S: InventoryStore> {
    store: Arc<S>,
    cache: InventoryCache,
}

impl<S: InventoryStore> Clone for MovementEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<S: InventoryStore> MovementEngine<S> {
    pub fn new(store: Arc<S>, cache: InventoryCache) -> Self {
        Self { store, cache }
    }

    /// Record one movement and apply its effect atomically.
    #[instrument(skip(self, request), fields(owner = %request.owner, kind = request.kind.label()), err)]
    pub async fn record_movement(&self, request: MovementRequest) -> InventoryResult<MovementRecord> {
        let MovementRequest {
            owner,
            kind,
            context,
        } = request;

        match (owner, kind) {
            (MovementOwner::Category(id), MovementKind::Stock(operation)) => {
                operation.validate()?;

                let mut tx = self.store.begin().await?;
                let result = stage_stock_operation(&mut tx, id, &operation, context, Utc::now()).await;
                let (movement, category) = finish(tx, result).await?;

                self.cache.invalidate(CacheScope::Category(id));
                info!(
                    movement_id = %movement.id,
                    movement_type = %movement.movement_type,
                    quantity = movement.quantity,
                    filled = category.filled_quantity,
                    empty = category.empty_quantity,
                    "movement recorded"
                );

                Ok(MovementRecord {
                    movement,
                    owner: OwnerSnapshot::Category(category),
                })
            }
            (MovementOwner::Cylinder(id), MovementKind::StatusChange { to_status, to_location }) => {
                let mut tx = self.store.begin().await?;
                let result =
                    stage_status_change(&mut tx, id, to_status, to_location, context, Utc::now()).await;
                let (movement, cylinder) = finish(tx, result).await?;

                self.cache.invalidate(CacheScope::Cylinder(id));
                info!(
                    movement_id = %movement.id,
                    movement_type = %movement.movement_type,
                    to_status = %cylinder.status,
                    "movement recorded"
                );

                Ok(MovementRecord {
                    movement,
                    owner: OwnerSnapshot::Cylinder(cylinder),
                })
            }
            (owner, kind) => Err(InventoryError::bad_request(format!(
                "{} movement cannot be recorded against {}",
                kind.label(),
                owner
            ))),
        }
    }

    pub async fn sale(
        &self,
        category_id: CategoryId,
        quantity: i64,
        context: MovementContext,
    ) -> InventoryResult<MovementRecord> {
        self.stock(category_id, StockOperation::Sale { quantity }, context)
            .await
    }

    pub async fn exchange(
        &self,
        category_id: CategoryId,
        quantity: i64,
        context: MovementContext,
    ) -> InventoryResult<MovementRecord> {
        self.stock(category_id, StockOperation::Exchange { quantity }, context)
            .await
    }

    pub async fn return_cylinders(
        &self,
        category_id: CategoryId,
        quantity: i64,
        context: MovementContext,
    ) -> InventoryResult<MovementRecord> {
        self.stock(category_id, StockOperation::Return { quantity }, context)
            .await
    }

    pub async fn restock(
        &self,
        category_id: CategoryId,
        filled: i64,
        empty: i64,
        context: MovementContext,
    ) -> InventoryResult<MovementRecord> {
        self.stock(category_id, StockOperation::Restock { filled, empty }, context)
            .await
    }

    /// Move a cylinder to `to_status`, optionally relocating it.
    ///
    /// A loan picks up `context.customer_id`; a return clears the customer.
    pub async fn change_status(
        &self,
        cylinder_id: CylinderId,
        to_status: CylinderStatus,
        to_location: Option<String>,
        context: MovementContext,
    ) -> InventoryResult<MovementRecord> {
        self.record_movement(MovementRequest {
            owner: MovementOwner::Cylinder(cylinder_id),
            kind: MovementKind::StatusChange {
                to_status,
                to_location,
            },
            context,
        })
        .await
    }

    /// Replace the notes of a recorded movement. Counters are left alone.
    #[instrument(skip(self, notes), fields(movement_id = %movement_id), err)]
    pub async fn amend_movement_notes(
        &self,
        movement_id: MovementId,
        notes: Option<String>,
    ) -> InventoryResult<Movement> {
        let mut tx = self.store.begin().await?;
        let result: InventoryResult<Movement> = async {
            let mut movement = tx
                .lock_movement(movement_id)
                .await?
                .ok_or_else(|| InventoryError::not_found(format!("movement {movement_id} not found")))?;
            movement.notes = notes.filter(|n| !n.trim().is_empty());
            tx.update_movement_notes(&movement).await?;
            Ok(movement)
        }
        .await;
        finish(tx, result).await
    }

    async fn stock(
        &self,
        category_id: CategoryId,
        operation: StockOperation,
        context: MovementContext,
    ) -> InventoryResult<MovementRecord> {
        self.record_movement(MovementRequest {
            owner: MovementOwner::Category(category_id),
            kind: MovementKind::Stock(operation),
            context,
        })
        .await
    }
}

/// Commit on success, roll back on failure. A failed rollback is logged; the
/// original error is what the caller sees.
pub(crate) async fn finish<Tx, T>(tx: Tx, result: InventoryResult<T>) -> InventoryResult<T>
where
    Tx: StoreTransaction,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "transaction rollback failed");
            }
            Err(err)
        }
    }
}

async fn stage_stock_operation<Tx: StoreTransaction>(
    tx: &mut Tx,
    category_id: CategoryId,
    operation: &StockOperation,
    context: MovementContext,
    now: DateTime<Utc>,
) -> InventoryResult<(Movement, Category)> {
    let category = tx
        .lock_category(category_id)
        .await?
        .ok_or_else(|| InventoryError::not_found(format!("category {category_id} not found")))?;

    let movement = Movement::for_stock_operation(MovementId::new(), &category, operation, context, now);
    tx.insert_movement(&movement).await?;

    let updated = operation.apply(&category, now);
    tx.update_category(&updated).await?;

    Ok((movement, updated))
}

async fn stage_status_change<Tx: StoreTransaction>(
    tx: &mut Tx,
    cylinder_id: CylinderId,
    to_status: CylinderStatus,
    to_location: Option<String>,
    context: MovementContext,
    now: DateTime<Utc>,
) -> InventoryResult<(Movement, Cylinder)> {
    let cylinder = tx
        .lock_cylinder(cylinder_id)
        .await?
        .ok_or_else(|| InventoryError::not_found(format!("cylinder {cylinder_id} not found")))?;

    stage_transition(tx, &cylinder, to_status, to_location, context, now).await
}

/// Write the movement for a status change of an already locked cylinder,
/// then the cylinder itself.
pub(crate) async fn stage_transition<Tx: StoreTransaction>(
    tx: &mut Tx,
    current: &Cylinder,
    to_status: CylinderStatus,
    to_location: Option<String>,
    context: MovementContext,
    now: DateTime<Utc>,
) -> InventoryResult<(Movement, Cylinder)> {
    let (next, transition) = current.transition(to_status, to_location, context.customer_id, now);

    let movement = Movement::for_transition(MovementId::new(), current.id, &transition, context, now);
    tx.insert_movement(&movement).await?;
    tx.update_cylinder(&next).await?;

    Ok((movement, next))
}

//! Create/update/delete of categories, cylinder types and cylinders.
//!
//! Writes share the movement engine's transaction handling and its post-commit
//! cache invalidation. Stock counters of an existing category are never edited
//! here; they only change through recorded movements.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use gascyl_core::{CategoryId, CylinderId, CylinderTypeId};
use gascyl_inventory::{
    Category, CategoryPatch, Cylinder, CylinderPatch, CylinderType, CylinderTypePatch, Movement,
    MovementContext, NewCategory, NewCylinder, NewCylinderType,
};

use crate::cache::{CacheScope, InventoryCache};
use crate::error::{InventoryError, InventoryResult};
use crate::movement_engine::{finish, stage_transition};
use crate::store::{InventoryStore, StoreTransaction};

/// Result of [`CatalogService::update_cylinder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CylinderUpdate {
    pub cylinder: Cylinder,
    /// Present when the update changed the status.
    pub movement: Option<Movement>,
}

pub struct CatalogService<S: InventoryStore> {
    store: Arc<S>,
    cache: InventoryCache,
}

impl<S: InventoryStore> Clone for CatalogService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<S: InventoryStore> CatalogService<S> {
    pub fn new(store: Arc<S>, cache: InventoryCache) -> Self {
        Self { store, cache }
    }

    // Categories

    #[instrument(skip(self, new), fields(name = %new.name), err)]
    pub async fn create_category(&self, new: NewCategory) -> InventoryResult<Category> {
        let category = Category::create(CategoryId::new(), new, Utc::now())?;

        let mut tx = self.store.begin().await?;
        let result: InventoryResult<()> = async {
            tx.insert_category(&category).await?;
            Ok(())
        }
        .await;
        finish(tx, result).await?;

        self.cache.invalidate(CacheScope::Category(category.id));
        info!(category_id = %category.id, "category created");
        Ok(category)
    }

    /// Edit descriptive fields. Quantities are not patchable.
    #[instrument(skip(self, patch), fields(category_id = %id), err)]
    pub async fn update_category(&self, id: CategoryId, patch: CategoryPatch) -> InventoryResult<Category> {
        let mut tx = self.store.begin().await?;
        let result: InventoryResult<Category> = async {
            let mut category = tx
                .lock_category(id)
                .await?
                .ok_or_else(|| InventoryError::not_found(format!("category {id} not found")))?;
            category.apply_patch(patch, Utc::now())?;
            tx.update_category(&category).await?;
            Ok(category)
        }
        .await;
        let category = finish(tx, result).await?;

        self.cache.invalidate(CacheScope::Category(id));
        Ok(category)
    }

    /// Remove a category together with its movement history.
    #[instrument(skip(self), fields(category_id = %id), err)]
    pub async fn delete_category(&self, id: CategoryId) -> InventoryResult<()> {
        let mut tx = self.store.begin().await?;
        let result: InventoryResult<()> = async {
            if !tx.delete_category(id).await? {
                return Err(InventoryError::not_found(format!("category {id} not found")));
            }
            Ok(())
        }
        .await;
        finish(tx, result).await?;

        self.cache.invalidate(CacheScope::Category(id));
        info!(category_id = %id, "category deleted");
        Ok(())
    }

    // Cylinder types

    #[instrument(skip(self, new), fields(name = %new.name), err)]
    pub async fn create_cylinder_type(&self, new: NewCylinderType) -> InventoryResult<CylinderType> {
        let cylinder_type = CylinderType::create(CylinderTypeId::new(), new, Utc::now())?;

        let mut tx = self.store.begin().await?;
        let result: InventoryResult<()> = async {
            tx.insert_cylinder_type(&cylinder_type).await?;
            Ok(())
        }
        .await;
        finish(tx, result).await?;

        self.cache.invalidate(CacheScope::CylinderType(cylinder_type.id));
        Ok(cylinder_type)
    }

    #[instrument(skip(self, patch), fields(cylinder_type_id = %id), err)]
    pub async fn update_cylinder_type(
        &self,
        id: CylinderTypeId,
        patch: CylinderTypePatch,
    ) -> InventoryResult<CylinderType> {
        let mut tx = self.store.begin().await?;
        let result: InventoryResult<CylinderType> = async {
            let mut cylinder_type = tx
                .lock_cylinder_type(id)
                .await?
                .ok_or_else(|| InventoryError::not_found(format!("cylinder type {id} not found")))?;
            cylinder_type.apply_patch(patch, Utc::now())?;
            tx.update_cylinder_type(&cylinder_type).await?;
            Ok(cylinder_type)
        }
        .await;
        let cylinder_type = finish(tx, result).await?;

        self.cache.invalidate(CacheScope::CylinderType(id));
        Ok(cylinder_type)
    }

    /// Remove a cylinder type. Refused while any cylinder still uses it.
    #[instrument(skip(self), fields(cylinder_type_id = %id), err)]
    pub async fn delete_cylinder_type(&self, id: CylinderTypeId) -> InventoryResult<()> {
        let mut tx = self.store.begin().await?;
        let result: InventoryResult<()> = async {
            if tx.lock_cylinder_type(id).await?.is_none() {
                return Err(InventoryError::not_found(format!("cylinder type {id} not found")));
            }
            let in_use = tx.count_cylinders_of_type(id).await?;
            if in_use > 0 {
                return Err(InventoryError::conflict(format!(
                    "cylinder type {id} is still used by {in_use} cylinder(s)"
                )));
            }
            tx.delete_cylinder_type(id).await?;
            Ok(())
        }
        .await;
        finish(tx, result).await?;

        self.cache.invalidate(CacheScope::CylinderType(id));
        Ok(())
    }

    // Cylinders

    #[instrument(skip(self, new), fields(serial_number = %new.serial_number), err)]
    pub async fn create_cylinder(&self, new: NewCylinder) -> InventoryResult<Cylinder> {
        let cylinder = Cylinder::create(CylinderId::new(), new, Utc::now())?;

        let mut tx = self.store.begin().await?;
        let result: InventoryResult<()> = async {
            if tx.lock_cylinder_type(cylinder.type_id).await?.is_none() {
                return Err(InventoryError::not_found(format!(
                    "cylinder type {} not found",
                    cylinder.type_id
                )));
            }
            ensure_serial_free(&mut tx, &cylinder.serial_number, None).await?;
            tx.insert_cylinder(&cylinder).await?;
            Ok(())
        }
        .await;
        finish(tx, result).await?;

        self.cache.invalidate(CacheScope::Cylinder(cylinder.id));
        info!(cylinder_id = %cylinder.id, "cylinder created");
        Ok(cylinder)
    }

    /// Edit a cylinder. A status in the patch is recorded as one movement in
    /// the same transaction, with the patched location as its destination.
    #[instrument(skip(self, patch, context), fields(cylinder_id = %id), err)]
    pub async fn update_cylinder(
        &self,
        id: CylinderId,
        patch: CylinderPatch,
        context: MovementContext,
    ) -> InventoryResult<CylinderUpdate> {
        if patch.is_empty() {
            return Err(InventoryError::bad_request("update contains no changes"));
        }

        let mut tx = self.store.begin().await?;
        let result: InventoryResult<CylinderUpdate> = async {
            let current = tx
                .lock_cylinder(id)
                .await?
                .ok_or_else(|| InventoryError::not_found(format!("cylinder {id} not found")))?;
            let now = Utc::now();

            let mut edited = current.clone();
            match patch.status {
                Some(to_status) => {
                    let details = CylinderPatch {
                        location: None,
                        status: None,
                        ..patch.clone()
                    };
                    edited.apply_details(&details, now)?;
                    if edited.serial_number != current.serial_number {
                        ensure_serial_free(&mut tx, &edited.serial_number, Some(id)).await?;
                    }
                    let (movement, cylinder) =
                        stage_transition(&mut tx, &edited, to_status, patch.location.clone(), context, now)
                            .await?;
                    Ok(CylinderUpdate {
                        cylinder,
                        movement: Some(movement),
                    })
                }
                None => {
                    edited.apply_details(&patch, now)?;
                    if edited.serial_number != current.serial_number {
                        ensure_serial_free(&mut tx, &edited.serial_number, Some(id)).await?;
                    }
                    tx.update_cylinder(&edited).await?;
                    Ok(CylinderUpdate {
                        cylinder: edited,
                        movement: None,
                    })
                }
            }
        }
        .await;
        let update = finish(tx, result).await?;

        self.cache.invalidate(CacheScope::Cylinder(id));
        Ok(update)
    }

    /// Remove a cylinder together with its movement history.
    #[instrument(skip(self), fields(cylinder_id = %id), err)]
    pub async fn delete_cylinder(&self, id: CylinderId) -> InventoryResult<()> {
        let mut tx = self.store.begin().await?;
        let result: InventoryResult<()> = async {
            if !tx.delete_cylinder(id).await? {
                return Err(InventoryError::not_found(format!("cylinder {id} not found")));
            }
            Ok(())
        }
        .await;
        finish(tx, result).await?;

        self.cache.invalidate(CacheScope::Cylinder(id));
        Ok(())
    }
}

async fn ensure_serial_free<Tx: StoreTransaction>(
    tx: &mut Tx,
    serial_number: &str,
    owner: Option<CylinderId>,
) -> InventoryResult<()> {
    match tx.find_cylinder_by_serial(serial_number).await? {
        Some(existing) if Some(existing) != owner => Err(InventoryError::conflict(format!(
            "serial number '{serial_number}' is already registered"
        ))),
        _ => Ok(()),
    }
}

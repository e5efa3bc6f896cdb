//! Read-side queries: cached lookups, filtered listings and summaries.
//!
//! Single-entity lookups are cache-first. Category views are cached as a
//! whole. Cylinders and their types are cached as raw rows, and the view is
//! assembled per call because `needs_inspection` depends on the current time.
//! Summaries are cached under one key each and dropped by any write in their
//! flow.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use gascyl_core::{CategoryId, CylinderId, CylinderTypeId, MovementId};
use gascyl_inventory::{
    needs_inspection, requires_restock, Category, Cylinder, CylinderStatus, CylinderType, Movement,
    MovementOwner,
};

use crate::cache::{keys, InventoryCache};
use crate::error::{InventoryError, InventoryResult};
use crate::store::{
    CategoryFilter, CategorySort, CylinderFilter, CylinderSort, InventoryStore, MovementFilter,
    Page, PageRequest,
};

/// Category plus its derived restock flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryView {
    #[serde(flatten)]
    pub category: Category,
    pub requires_restock: bool,
}

impl From<Category> for CategoryView {
    fn from(category: Category) -> Self {
        let requires_restock = requires_restock(&category);
        Self {
            category,
            requires_restock,
        }
    }
}

/// Cylinder joined with its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CylinderView {
    #[serde(flatten)]
    pub cylinder: Cylinder,
    pub type_name: String,
    pub gas_type: String,
    pub capacity_liters: f64,
    pub needs_inspection: bool,
}

/// Summed category counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTotals {
    pub categories: u64,
    pub total_quantity: i64,
    pub filled_quantity: i64,
    pub empty_quantity: i64,
}

impl StockTotals {
    fn add(&mut self, category: &Category) {
        self.categories += 1;
        self.total_quantity = self.total_quantity.saturating_add(category.total_quantity);
        self.filled_quantity = self.filled_quantity.saturating_add(category.filled_quantity);
        self.empty_quantity = self.empty_quantity.saturating_add(category.empty_quantity);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub totals: StockTotals,
    pub by_location: BTreeMap<String, StockTotals>,
    pub by_status: BTreeMap<String, StockTotals>,
    pub by_gas_type: BTreeMap<String, StockTotals>,
    /// Categories below the restock threshold.
    pub requires_restock: u64,
    pub generated_at: DateTime<Utc>,
}

impl CategorySummary {
    pub fn from_categories(categories: &[Category], generated_at: DateTime<Utc>) -> Self {
        let mut summary = Self {
            totals: StockTotals::default(),
            by_location: BTreeMap::new(),
            by_status: BTreeMap::new(),
            by_gas_type: BTreeMap::new(),
            requires_restock: 0,
            generated_at,
        };

        for category in categories {
            summary.totals.add(category);
            add_to_group(&mut summary.by_location, &category.location, category);
            add_to_group(&mut summary.by_status, category.status.as_str(), category);
            add_to_group(&mut summary.by_gas_type, &category.gas_type, category);
            if requires_restock(category) {
                summary.requires_restock += 1;
            }
        }
        summary
    }
}

fn add_to_group(groups: &mut BTreeMap<String, StockTotals>, key: &str, category: &Category) {
    if key.trim().is_empty() {
        return;
    }
    groups.entry(key.to_string()).or_default().add(category);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CylinderSummary {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_location: BTreeMap<String, u64>,
    pub by_gas_type: BTreeMap<String, u64>,
    pub needs_inspection: u64,
    pub loaned_out: u64,
    pub generated_at: DateTime<Utc>,
}

pub struct QueryService<S: InventoryStore> {
    store: Arc<S>,
    cache: InventoryCache,
    inspection_interval_days: u32,
    max_page_limit: u32,
}

impl<S: InventoryStore> Clone for QueryService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: self.cache.clone(),
            inspection_interval_days: self.inspection_interval_days,
            max_page_limit: self.max_page_limit,
        }
    }
}

impl<S: InventoryStore> QueryService<S> {
    pub fn new(
        store: Arc<S>,
        cache: InventoryCache,
        inspection_interval_days: u32,
        max_page_limit: u32,
    ) -> Self {
        Self {
            store,
            cache,
            inspection_interval_days,
            max_page_limit,
        }
    }

    // Categories

    #[instrument(skip(self), fields(category_id = %id), err)]
    pub async fn category(&self, id: CategoryId) -> InventoryResult<CategoryView> {
        let key = keys::category(id);
        if let Some(view) = self.cache.get_json::<CategoryView>(&key) {
            return Ok(view);
        }

        let category = self
            .store
            .find_category(id)
            .await?
            .ok_or_else(|| InventoryError::not_found(format!("category {id} not found")))?;
        let view = CategoryView::from(category);
        self.cache.put_json(&key, &view);
        Ok(view)
    }

    #[instrument(skip(self, filter), err)]
    pub async fn list_categories(
        &self,
        filter: &CategoryFilter,
        sort: CategorySort,
        page: PageRequest,
    ) -> InventoryResult<Page<CategoryView>> {
        let page = page.bounded(self.max_page_limit);
        let result = self.store.list_categories(filter, sort, page).await?;
        Ok(result.map(CategoryView::from))
    }

    #[instrument(skip(self), err)]
    pub async fn category_summary(&self) -> InventoryResult<CategorySummary> {
        if let Some(summary) = self.cache.get_json::<CategorySummary>(keys::CATEGORY_SUMMARY) {
            return Ok(summary);
        }

        let categories = self.store.all_categories().await?;
        let summary = CategorySummary::from_categories(&categories, Utc::now());
        self.cache.put_json(keys::CATEGORY_SUMMARY, &summary);
        Ok(summary)
    }

    // Cylinder types

    #[instrument(skip(self), fields(cylinder_type_id = %id), err)]
    pub async fn cylinder_type(&self, id: CylinderTypeId) -> InventoryResult<CylinderType> {
        let key = keys::cylinder_type(id);
        if let Some(cylinder_type) = self.cache.get_json::<CylinderType>(&key) {
            return Ok(cylinder_type);
        }

        let cylinder_type = self
            .store
            .find_cylinder_type(id)
            .await?
            .ok_or_else(|| InventoryError::not_found(format!("cylinder type {id} not found")))?;
        self.cache.put_json(&key, &cylinder_type);
        Ok(cylinder_type)
    }

    pub async fn list_cylinder_types(&self, page: PageRequest) -> InventoryResult<Page<CylinderType>> {
        let page = page.bounded(self.max_page_limit);
        Ok(self.store.list_cylinder_types(page).await?)
    }

    // Cylinders

    #[instrument(skip(self), fields(cylinder_id = %id), err)]
    pub async fn cylinder(&self, id: CylinderId) -> InventoryResult<CylinderView> {
        let key = keys::cylinder(id);
        let cylinder = match self.cache.get_json::<Cylinder>(&key) {
            Some(cylinder) => cylinder,
            None => {
                let cylinder = self
                    .store
                    .find_cylinder(id)
                    .await?
                    .ok_or_else(|| InventoryError::not_found(format!("cylinder {id} not found")))?;
                self.cache.put_json(&key, &cylinder);
                cylinder
            }
        };

        let cylinder_type = self.cylinder_type(cylinder.type_id).await.map_err(|e| match e {
            InventoryError::NotFound(_) => InventoryError::Database(format!(
                "cylinder {id} references missing type {}",
                cylinder.type_id
            )),
            other => other,
        })?;
        Ok(self.cylinder_view(cylinder, &cylinder_type, Utc::now()))
    }

    #[instrument(skip(self, filter), err)]
    pub async fn list_cylinders(
        &self,
        filter: &CylinderFilter,
        sort: CylinderSort,
        page: PageRequest,
    ) -> InventoryResult<Page<CylinderView>> {
        let page = page.bounded(self.max_page_limit);
        let result = self.store.list_cylinders(filter, sort, page).await?;
        let types = self.types_by_id().await?;
        let now = Utc::now();

        let mut items = Vec::with_capacity(result.items.len());
        for cylinder in result.items {
            let cylinder_type = types.get(&cylinder.type_id).ok_or_else(|| {
                InventoryError::Database(format!(
                    "cylinder {} references missing type {}",
                    cylinder.id, cylinder.type_id
                ))
            })?;
            items.push(self.cylinder_view(cylinder, cylinder_type, now));
        }

        Ok(Page {
            items,
            meta: result.meta,
        })
    }

    #[instrument(skip(self), err)]
    pub async fn cylinder_summary(&self) -> InventoryResult<CylinderSummary> {
        if let Some(summary) = self.cache.get_json::<CylinderSummary>(keys::CYLINDER_SUMMARY) {
            return Ok(summary);
        }

        let cylinders = self.store.all_cylinders().await?;
        let types = self.types_by_id().await?;
        let now = Utc::now();

        let mut summary = CylinderSummary {
            total: 0,
            by_status: BTreeMap::new(),
            by_location: BTreeMap::new(),
            by_gas_type: BTreeMap::new(),
            needs_inspection: 0,
            loaned_out: 0,
            generated_at: now,
        };
        for cylinder in &cylinders {
            summary.total += 1;
            *summary
                .by_status
                .entry(cylinder.status.as_str().to_string())
                .or_default() += 1;
            if !cylinder.location.trim().is_empty() {
                *summary
                    .by_location
                    .entry(cylinder.location.clone())
                    .or_default() += 1;
            }
            let cylinder_type = types.get(&cylinder.type_id);
            if let Some(t) = cylinder_type {
                *summary.by_gas_type.entry(t.gas_type.clone()).or_default() += 1;
            }
            if needs_inspection(cylinder, self.interval_for(cylinder_type), now) {
                summary.needs_inspection += 1;
            }
            if cylinder.status == CylinderStatus::Loaned {
                summary.loaned_out += 1;
            }
        }

        self.cache.put_json(keys::CYLINDER_SUMMARY, &summary);
        Ok(summary)
    }

    // Movements

    #[instrument(skip(self), fields(movement_id = %id), err)]
    pub async fn movement(&self, id: MovementId) -> InventoryResult<Movement> {
        self.store
            .find_movement(id)
            .await?
            .ok_or_else(|| InventoryError::not_found(format!("movement {id} not found")))
    }

    /// Movements of one owner, newest first.
    #[instrument(skip(self, filter), fields(owner = %owner), err)]
    pub async fn movements(
        &self,
        owner: MovementOwner,
        filter: &MovementFilter,
        page: PageRequest,
    ) -> InventoryResult<Page<Movement>> {
        let exists = match owner {
            MovementOwner::Category(id) => self.store.find_category(id).await?.is_some(),
            MovementOwner::Cylinder(id) => self.store.find_cylinder(id).await?.is_some(),
        };
        if !exists {
            return Err(InventoryError::not_found(format!("{owner} not found")));
        }

        let page = page.bounded(self.max_page_limit);
        Ok(self.store.list_movements(owner, filter, page).await?)
    }

    async fn types_by_id(&self) -> InventoryResult<BTreeMap<CylinderTypeId, CylinderType>> {
        Ok(self
            .store
            .all_cylinder_types()
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect())
    }

    fn interval_for(&self, cylinder_type: Option<&CylinderType>) -> u32 {
        cylinder_type
            .and_then(|t| t.inspection_interval_days)
            .unwrap_or(self.inspection_interval_days)
    }

    fn cylinder_view(&self, cylinder: Cylinder, cylinder_type: &CylinderType, now: DateTime<Utc>) -> CylinderView {
        let needs_inspection = needs_inspection(&cylinder, self.interval_for(Some(cylinder_type)), now);
        CylinderView {
            cylinder,
            type_name: cylinder_type.name.clone(),
            gas_type: cylinder_type.gas_type.clone(),
            capacity_liters: cylinder_type.capacity_liters,
            needs_inspection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gascyl_inventory::{CategoryStatus, NewCategory};

    fn category(location: &str, gas: &str, status: CategoryStatus, filled: i64, empty: i64) -> Category {
        Category::create(
            CategoryId::new(),
            NewCategory {
                name: format!("{gas} @ {location}"),
                description: None,
                gas_type: gas.to_string(),
                location: location.to_string(),
                status,
                total_quantity: filled + empty,
                filled_quantity: filled,
                empty_quantity: empty,
                price_cents: 0,
                deposit_cents: 0,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn summary_groups_and_skips_blank_keys() {
        let categories = vec![
            category("North", "Oxygen", CategoryStatus::Active, 1, 9),
            category("North", "Argon", CategoryStatus::Active, 8, 2),
            category("", "Oxygen", CategoryStatus::Inactive, 0, 10),
        ];
        let summary = CategorySummary::from_categories(&categories, Utc::now());

        assert_eq!(summary.totals.categories, 3);
        assert_eq!(summary.totals.total_quantity, 30);
        assert_eq!(summary.totals.filled_quantity, 9);
        assert_eq!(summary.by_location.len(), 1);
        assert_eq!(summary.by_location["North"].categories, 2);
        assert_eq!(summary.by_gas_type["Oxygen"].empty_quantity, 19);
        assert_eq!(summary.by_status["inactive"].categories, 1);
        // the inactive one is below threshold but only active categories count
        assert_eq!(summary.requires_restock, 1);
    }

    #[test]
    fn category_view_carries_restock_flag() {
        let view = CategoryView::from(category("A", "CO2", CategoryStatus::Active, 1, 9));
        assert!(view.requires_restock);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["requires_restock"], true);
        assert_eq!(json["filled_quantity"], 1);
    }
}

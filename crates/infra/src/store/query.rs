//! Listing criteria and pagination shared by every store implementation.
//!
//! Filters carry an in-process `matches` predicate (used by the in-memory
//! store and by tests); the PostgreSQL store translates the same fields into
//! SQL predicates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gascyl_core::CylinderTypeId;
use gascyl_inventory::{
    requires_restock, Category, CategoryStatus, Cylinder, CylinderStatus, CylinderType, Movement,
    MovementType,
};

/// 1-based page request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    /// Clamp to `page >= 1` and `1 <= limit <= max_limit`.
    pub fn bounded(self, max_limit: u32) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.clamp(1, max_limit.max(1)),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub page: u32,
    pub limit: u32,
    pub total_items: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl PageMeta {
    pub fn new(request: PageRequest, total_items: u64) -> Self {
        let limit = u64::from(request.limit.max(1));
        let total_pages = total_items.div_ceil(limit);
        let page = u64::from(request.page.max(1));
        Self {
            page: request.page.max(1),
            limit: request.limit,
            total_items,
            total_pages,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub meta: PageMeta,
}

impl<T> Page<T> {
    /// Slice an already filtered and sorted collection.
    pub fn from_sorted(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.limit as usize)
            .collect();
        Self {
            items,
            meta: PageMeta::new(request, total),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            meta: self.meta,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    fn apply(&self, ordering: core::cmp::Ordering) -> core::cmp::Ordering {
        match self {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

fn eq_ci(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// Category listing filter; every set field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFilter {
    pub status: Option<CategoryStatus>,
    pub gas_type: Option<String>,
    pub location: Option<String>,
    /// Case-insensitive substring over name, description and location.
    pub search: Option<String>,
    pub min_filled: Option<i64>,
    pub max_filled: Option<i64>,
    pub requires_restock: Option<bool>,
}

impl CategoryFilter {
    pub fn matches(&self, category: &Category) -> bool {
        if self.status.is_some_and(|s| s != category.status) {
            return false;
        }
        if let Some(gas_type) = &self.gas_type {
            if !eq_ci(gas_type, &category.gas_type) {
                return false;
            }
        }
        if let Some(location) = &self.location {
            if !eq_ci(location, &category.location) {
                return false;
            }
        }
        if let Some(term) = self.search_term() {
            let hit = contains_ci(&category.name, &term)
                || category
                    .description
                    .as_deref()
                    .is_some_and(|d| contains_ci(d, &term))
                || contains_ci(&category.location, &term);
            if !hit {
                return false;
            }
        }
        if self.min_filled.is_some_and(|min| category.filled_quantity < min) {
            return false;
        }
        if self.max_filled.is_some_and(|max| category.filled_quantity > max) {
            return false;
        }
        if self
            .requires_restock
            .is_some_and(|want| want != requires_restock(category))
        {
            return false;
        }
        true
    }

    /// Lower-cased, trimmed search term; blank terms are ignored.
    pub fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorySortField {
    Name,
    GasType,
    Location,
    FilledQuantity,
    TotalQuantity,
    #[default]
    CreatedAt,
    UpdatedAt,
}

impl CategorySortField {
    pub fn column(&self) -> &'static str {
        match self {
            CategorySortField::Name => "name",
            CategorySortField::GasType => "gas_type",
            CategorySortField::Location => "location",
            CategorySortField::FilledQuantity => "filled_quantity",
            CategorySortField::TotalQuantity => "total_quantity",
            CategorySortField::CreatedAt => "created_at",
            CategorySortField::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategorySort {
    pub field: CategorySortField,
    pub order: SortOrder,
}

impl CategorySort {
    pub fn new(field: CategorySortField, order: SortOrder) -> Self {
        Self { field, order }
    }

    pub fn sort(&self, categories: &mut [Category]) {
        categories.sort_by(|a, b| {
            let ord = match self.field {
                CategorySortField::Name => a.name.cmp(&b.name),
                CategorySortField::GasType => a.gas_type.cmp(&b.gas_type),
                CategorySortField::Location => a.location.cmp(&b.location),
                CategorySortField::FilledQuantity => a.filled_quantity.cmp(&b.filled_quantity),
                CategorySortField::TotalQuantity => a.total_quantity.cmp(&b.total_quantity),
                CategorySortField::CreatedAt => a.created_at.cmp(&b.created_at),
                CategorySortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            };
            self.order.apply(ord).then_with(|| a.id.cmp(&b.id))
        });
    }
}

// ---------------------------------------------------------------------------
// Cylinders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CylinderFilter {
    pub status: Option<CylinderStatus>,
    pub type_id: Option<CylinderTypeId>,
    pub customer_id: Option<Uuid>,
    pub location: Option<String>,
    /// Matched against the cylinder's type.
    pub gas_type: Option<String>,
    /// Case-insensitive substring over serial number, location and notes.
    pub search: Option<String>,
}

impl CylinderFilter {
    pub fn matches(&self, cylinder: &Cylinder, cylinder_type: Option<&CylinderType>) -> bool {
        if self.status.is_some_and(|s| s != cylinder.status) {
            return false;
        }
        if self.type_id.is_some_and(|t| t != cylinder.type_id) {
            return false;
        }
        if self.customer_id.is_some() && self.customer_id != cylinder.customer_id {
            return false;
        }
        if let Some(location) = &self.location {
            if !eq_ci(location, &cylinder.location) {
                return false;
            }
        }
        if let Some(gas_type) = &self.gas_type {
            if !cylinder_type.is_some_and(|t| eq_ci(gas_type, &t.gas_type)) {
                return false;
            }
        }
        if let Some(term) = self.search_term() {
            let hit = contains_ci(&cylinder.serial_number, &term)
                || contains_ci(&cylinder.location, &term)
                || cylinder.notes.as_deref().is_some_and(|n| contains_ci(n, &term));
            if !hit {
                return false;
            }
        }
        true
    }

    pub fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CylinderSortField {
    SerialNumber,
    Status,
    Location,
    LastInspectedAt,
    #[default]
    CreatedAt,
    UpdatedAt,
}

impl CylinderSortField {
    pub fn column(&self) -> &'static str {
        match self {
            CylinderSortField::SerialNumber => "serial_number",
            CylinderSortField::Status => "status",
            CylinderSortField::Location => "location",
            CylinderSortField::LastInspectedAt => "last_inspected_at",
            CylinderSortField::CreatedAt => "created_at",
            CylinderSortField::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CylinderSort {
    pub field: CylinderSortField,
    pub order: SortOrder,
}

impl CylinderSort {
    pub fn new(field: CylinderSortField, order: SortOrder) -> Self {
        Self { field, order }
    }

    pub fn sort(&self, cylinders: &mut [Cylinder]) {
        cylinders.sort_by(|a, b| {
            let ord = match self.field {
                CylinderSortField::SerialNumber => a.serial_number.cmp(&b.serial_number),
                CylinderSortField::Status => a.status.as_str().cmp(b.status.as_str()),
                CylinderSortField::Location => a.location.cmp(&b.location),
                CylinderSortField::LastInspectedAt => a.last_inspected_at.cmp(&b.last_inspected_at),
                CylinderSortField::CreatedAt => a.created_at.cmp(&b.created_at),
                CylinderSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            };
            self.order.apply(ord).then_with(|| a.id.cmp(&b.id))
        });
    }
}

// ---------------------------------------------------------------------------
// Movements
// ---------------------------------------------------------------------------

/// Movement listing filter. Results are always newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub movement_type: Option<MovementType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl MovementFilter {
    pub fn matches(&self, movement: &Movement) -> bool {
        self.movement_type.is_none_or(|t| t == movement.movement_type)
            && self.from.is_none_or(|from| movement.transaction_date >= from)
            && self.to.is_none_or(|to| movement.transaction_date <= to)
    }
}

/// Newest first: transaction date, then recording time.
pub fn sort_movements(movements: &mut [Movement]) {
    movements.sort_by(|a, b| {
        b.transaction_date
            .cmp(&a.transaction_date)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| b.id.cmp(&a.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use gascyl_core::CategoryId;
    use gascyl_inventory::NewCategory;

    fn category(name: &str, location: &str, filled: i64, empty: i64) -> Category {
        Category::create(
            CategoryId::new(),
            NewCategory {
                name: name.to_string(),
                description: Some("Industrial grade".to_string()),
                gas_type: "Oxygen".to_string(),
                location: location.to_string(),
                status: CategoryStatus::Active,
                total_quantity: filled + empty,
                filled_quantity: filled,
                empty_quantity: empty,
                price_cents: 100,
                deposit_cents: 100,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn page_meta_flags() {
        let meta = PageMeta::new(PageRequest::new(2, 10), 25);
        assert_eq!(meta.total_pages, 3);
        assert!(meta.has_next_page);
        assert!(meta.has_prev_page);

        let last = PageMeta::new(PageRequest::new(3, 10), 25);
        assert!(!last.has_next_page);

        let empty = PageMeta::new(PageRequest::new(1, 10), 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next_page);
        assert!(!empty.has_prev_page);
    }

    #[test]
    fn bounded_clamps_page_and_limit() {
        assert_eq!(PageRequest::new(0, 0).bounded(100), PageRequest::new(1, 1));
        assert_eq!(PageRequest::new(4, 500).bounded(100), PageRequest::new(4, 100));
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
    }

    #[test]
    fn from_sorted_slices_requested_page() {
        let page = Page::from_sorted((1..=7).collect::<Vec<_>>(), PageRequest::new(2, 3));
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.meta.total_items, 7);
    }

    #[test]
    fn search_is_case_insensitive_across_fields() {
        let c = category("Welding Mix", "North Yard", 5, 5);
        let hit = |term: &str| {
            CategoryFilter {
                search: Some(term.to_string()),
                ..Default::default()
            }
            .matches(&c)
        };
        assert!(hit("welding"));
        assert!(hit("INDUSTRIAL"));
        assert!(hit("north"));
        assert!(hit("   "));
        assert!(!hit("argon"));
    }

    #[test]
    fn filters_combine_with_and() {
        let c = category("O2 small", "Depot", 1, 9);
        let filter = CategoryFilter {
            gas_type: Some("oxygen".to_string()),
            requires_restock: Some(true),
            max_filled: Some(1),
            ..Default::default()
        };
        assert!(filter.matches(&c));

        let filter = CategoryFilter {
            location: Some("Elsewhere".to_string()),
            ..filter
        };
        assert!(!filter.matches(&c));
    }

    #[test]
    fn category_sort_orders_by_field() {
        let mut list = vec![
            category("b", "x", 5, 0),
            category("a", "x", 9, 0),
            category("c", "x", 1, 0),
        ];
        CategorySort::new(CategorySortField::FilledQuantity, SortOrder::Desc).sort(&mut list);
        let names: Vec<_> = list.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        CategorySort::new(CategorySortField::Name, SortOrder::Asc).sort(&mut list);
        let names: Vec<_> = list.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gascyl_core::{CategoryId, DomainError, DomainResult};

use crate::movement::MovementType;

/// Percentage of total stock below which an active category needs restocking.
pub const RESTOCK_THRESHOLD_PERCENT: i64 = 20;

/// Lifecycle status of an aggregate category.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    Active,
    Inactive,
    Discontinued,
}

impl CategoryStatus {
    pub const ALL: [CategoryStatus; 3] = [
        CategoryStatus::Active,
        CategoryStatus::Inactive,
        CategoryStatus::Discontinued,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryStatus::Active => "active",
            CategoryStatus::Inactive => "inactive",
            CategoryStatus::Discontinued => "discontinued",
        }
    }
}

impl core::fmt::Display for CategoryStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategoryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CategoryStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| DomainError::invalid_id(format!("unknown category status '{s}'")))
    }
}

/// Aggregate stock unit: counts filled and empty cylinders of one kind at one place.
///
/// `total_quantity == filled_quantity + empty_quantity` holds at all times and
/// neither counter is ever negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub gas_type: String,
    pub location: String,
    pub status: CategoryStatus,
    pub total_quantity: i64,
    pub filled_quantity: i64,
    pub empty_quantity: i64,
    /// Unit price in the smallest currency unit (e.g. cents).
    pub price_cents: i64,
    pub deposit_cents: i64,
    pub last_restocked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    pub description: Option<String>,
    pub gas_type: String,
    pub location: String,
    pub status: CategoryStatus,
    pub total_quantity: i64,
    pub filled_quantity: i64,
    pub empty_quantity: i64,
    pub price_cents: i64,
    pub deposit_cents: i64,
}

/// Edit of non-quantity fields. Counters only change through stock operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub gas_type: Option<String>,
    pub location: Option<String>,
    pub status: Option<CategoryStatus>,
    pub price_cents: Option<i64>,
    pub deposit_cents: Option<i64>,
}

impl CategoryPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.gas_type.is_none()
            && self.location.is_none()
            && self.status.is_none()
            && self.price_cents.is_none()
            && self.deposit_cents.is_none()
    }
}

impl Category {
    pub fn create(id: CategoryId, new: NewCategory, now: DateTime<Utc>) -> DomainResult<Self> {
        if new.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if new.total_quantity < 0 || new.filled_quantity < 0 || new.empty_quantity < 0 {
            return Err(DomainError::validation("quantities cannot be negative"));
        }
        let counted = new
            .filled_quantity
            .checked_add(new.empty_quantity)
            .ok_or_else(|| DomainError::validation("filled + empty quantity overflows"))?;
        if new.total_quantity != counted {
            return Err(DomainError::validation(format!(
                "total quantity ({}) must equal filled ({}) + empty ({})",
                new.total_quantity, new.filled_quantity, new.empty_quantity
            )));
        }
        ensure_price("price", new.price_cents)?;
        ensure_price("deposit", new.deposit_cents)?;

        Ok(Self {
            id,
            name: new.name.trim().to_string(),
            description: new.description,
            gas_type: new.gas_type,
            location: new.location,
            status: new.status,
            total_quantity: new.total_quantity,
            filled_quantity: new.filled_quantity,
            empty_quantity: new.empty_quantity,
            price_cents: new.price_cents,
            deposit_cents: new.deposit_cents,
            last_restocked: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Check the counter invariant on a category loaded from elsewhere.
    pub fn check_counters(&self) -> DomainResult<()> {
        let consistent = self.filled_quantity >= 0
            && self.empty_quantity >= 0
            && self.filled_quantity.checked_add(self.empty_quantity) == Some(self.total_quantity);
        if consistent {
            Ok(())
        } else {
            Err(DomainError::invariant(format!(
                "category {}: total {} != filled {} + empty {}",
                self.id, self.total_quantity, self.filled_quantity, self.empty_quantity
            )))
        }
    }

    pub fn apply_patch(&mut self, patch: CategoryPatch, now: DateTime<Utc>) -> DomainResult<()> {
        if patch.is_empty() {
            return Err(DomainError::validation("update contains no fields"));
        }
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("name cannot be empty"));
            }
        }
        if let Some(price) = patch.price_cents {
            ensure_price("price", price)?;
        }
        if let Some(deposit) = patch.deposit_cents {
            ensure_price("deposit", deposit)?;
        }

        if let Some(name) = patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            self.description = Some(description).filter(|d| !d.is_empty());
        }
        if let Some(gas_type) = patch.gas_type {
            self.gas_type = gas_type;
        }
        if let Some(location) = patch.location {
            self.location = location;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(price) = patch.price_cents {
            self.price_cents = price;
        }
        if let Some(deposit) = patch.deposit_cents {
            self.deposit_cents = deposit;
        }
        self.updated_at = now;
        Ok(())
    }
}

fn ensure_price(field: &str, cents: i64) -> DomainResult<()> {
    if cents < 0 {
        return Err(DomainError::validation(format!("{field} cannot be negative")));
    }
    Ok(())
}

/// `filled < total * 20%` on an active category.
pub fn requires_restock(category: &Category) -> bool {
    category.status == CategoryStatus::Active
        && category.filled_quantity.saturating_mul(100)
            < category.total_quantity.saturating_mul(RESTOCK_THRESHOLD_PERCENT)
}

/// A quantity-bearing operation on a category.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StockOperation {
    /// Filled cylinders leave stock.
    Sale { quantity: i64 },
    /// Filled cylinders go out, the same number of empties come back.
    Exchange { quantity: i64 },
    /// Empty cylinders come back into stock.
    Return { quantity: i64 },
    /// New stock arrives, split into filled and empty amounts.
    Restock { filled: i64, empty: i64 },
}

impl StockOperation {
    pub fn validate(&self) -> DomainResult<()> {
        match *self {
            StockOperation::Sale { quantity }
            | StockOperation::Exchange { quantity }
            | StockOperation::Return { quantity } => {
                if quantity <= 0 {
                    return Err(DomainError::validation("quantity must be greater than zero"));
                }
            }
            StockOperation::Restock { filled, empty } => {
                if filled < 0 || empty < 0 {
                    return Err(DomainError::validation("restock amounts cannot be negative"));
                }
                if filled == 0 && empty == 0 {
                    return Err(DomainError::validation(
                        "restock must add at least one filled or empty cylinder",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn movement_type(&self) -> MovementType {
        match self {
            StockOperation::Sale { .. } => MovementType::Sale,
            StockOperation::Exchange { .. } => MovementType::Exchange,
            StockOperation::Return { .. } => MovementType::Return,
            StockOperation::Restock { .. } => MovementType::Restock,
        }
    }

    /// Quantity recorded on the movement.
    pub fn quantity(&self) -> i64 {
        match *self {
            StockOperation::Sale { quantity }
            | StockOperation::Exchange { quantity }
            | StockOperation::Return { quantity } => quantity,
            StockOperation::Restock { filled, empty } => filled.saturating_add(empty),
        }
    }

    /// `(filled delta, empty delta)`.
    pub fn deltas(&self) -> (i64, i64) {
        match *self {
            StockOperation::Sale { quantity } => (-quantity, 0),
            StockOperation::Exchange { quantity } => (-quantity, quantity),
            StockOperation::Return { quantity } => (0, quantity),
            StockOperation::Restock { filled, empty } => (filled, empty),
        }
    }

    /// Compute the category state after this operation.
    ///
    /// Counters are clamped at zero and the total is re-derived from them.
    pub fn apply(&self, category: &Category, now: DateTime<Utc>) -> Category {
        let (filled_delta, empty_delta) = self.deltas();
        let mut next = category.clone();

        next.filled_quantity = category.filled_quantity.saturating_add(filled_delta).max(0);
        next.empty_quantity = category.empty_quantity.saturating_add(empty_delta).max(0);
        next.total_quantity = next.filled_quantity.saturating_add(next.empty_quantity);
        if matches!(self, StockOperation::Restock { .. }) {
            next.last_restocked = Some(now);
        }
        next.updated_at = now;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn category(total: i64, filled: i64, empty: i64) -> Category {
        Category::create(
            CategoryId::new(),
            NewCategory {
                name: "Oxygen 40L".to_string(),
                description: Some("medical".to_string()),
                gas_type: "oxygen".to_string(),
                location: "Main".to_string(),
                status: CategoryStatus::Active,
                total_quantity: total,
                filled_quantity: filled,
                empty_quantity: empty,
                price_cents: 4_000,
                deposit_cents: 10_000,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn create_rejects_total_mismatch() {
        let err = Category::create(
            CategoryId::new(),
            NewCategory {
                name: "CO2".to_string(),
                description: None,
                gas_type: "co2".to_string(),
                location: String::new(),
                status: CategoryStatus::Active,
                total_quantity: 10,
                filled_quantity: 5,
                empty_quantity: 4,
                price_cents: 0,
                deposit_cents: 0,
            },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn create_rejects_overflowing_counters() {
        let err = Category::create(
            CategoryId::new(),
            NewCategory {
                name: "Oxygen".to_string(),
                description: None,
                gas_type: "Oxygen".to_string(),
                location: String::new(),
                status: CategoryStatus::Active,
                total_quantity: i64::MAX,
                filled_quantity: i64::MAX,
                empty_quantity: 1,
                price_cents: 0,
                deposit_cents: 0,
            },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn check_counters_flags_inconsistent_state() {
        let mut c = category(100, 80, 20);
        assert!(c.check_counters().is_ok());

        c.total_quantity = 90;
        assert!(matches!(c.check_counters(), Err(DomainError::InvariantViolation(_))));

        c.total_quantity = 80;
        c.filled_quantity = 100;
        c.empty_quantity = -20;
        assert!(c.check_counters().is_err());
    }

    #[test]
    fn create_rejects_blank_name() {
        let mut new = NewCategory {
            name: "  ".to_string(),
            description: None,
            gas_type: "co2".to_string(),
            location: String::new(),
            status: CategoryStatus::Active,
            total_quantity: 0,
            filled_quantity: 0,
            empty_quantity: 0,
            price_cents: 0,
            deposit_cents: 0,
        };
        assert!(Category::create(CategoryId::new(), new.clone(), Utc::now()).is_err());
        new.name = "CO2".to_string();
        new.price_cents = -1;
        assert!(Category::create(CategoryId::new(), new, Utc::now()).is_err());
    }

    #[test]
    fn sale_decrements_filled_only() {
        let c = category(100, 80, 20);
        let next = StockOperation::Sale { quantity: 10 }.apply(&c, Utc::now());
        assert_eq!((next.total_quantity, next.filled_quantity, next.empty_quantity), (90, 70, 20));
    }

    #[test]
    fn exchange_moves_filled_to_empty() {
        let c = category(50, 40, 10);
        let next = StockOperation::Exchange { quantity: 5 }.apply(&c, Utc::now());
        assert_eq!((next.total_quantity, next.filled_quantity, next.empty_quantity), (50, 35, 15));
    }

    #[test]
    fn return_increments_empty() {
        let c = category(10, 5, 5);
        let next = StockOperation::Return { quantity: 3 }.apply(&c, Utc::now());
        assert_eq!((next.total_quantity, next.filled_quantity, next.empty_quantity), (13, 5, 8));
        assert_eq!(next.last_restocked, None);
    }

    #[test]
    fn restock_adds_both_amounts_and_stamps_time() {
        let c = category(100, 10, 90);
        let now = Utc::now();
        let next = StockOperation::Restock { filled: 20, empty: 0 }.apply(&c, now);
        assert_eq!((next.filled_quantity, next.empty_quantity), (30, 90));
        assert_eq!(next.total_quantity, 120);
        assert_eq!(next.last_restocked, Some(now));
        assert_eq!(StockOperation::Restock { filled: 20, empty: 3 }.quantity(), 23);
    }

    #[test]
    fn oversell_clamps_at_zero() {
        let c = category(5, 2, 3);
        let next = StockOperation::Sale { quantity: 10 }.apply(&c, Utc::now());
        assert_eq!(next.filled_quantity, 0);
        assert_eq!(next.total_quantity, 3);
    }

    #[test]
    fn validate_rejects_non_positive_quantities() {
        for q in [0, -1] {
            assert!(StockOperation::Sale { quantity: q }.validate().is_err());
            assert!(StockOperation::Exchange { quantity: q }.validate().is_err());
            assert!(StockOperation::Return { quantity: q }.validate().is_err());
        }
        assert!(StockOperation::Restock { filled: 0, empty: 0 }.validate().is_err());
        assert!(StockOperation::Restock { filled: -1, empty: 5 }.validate().is_err());
        assert!(StockOperation::Restock { filled: 0, empty: 5 }.validate().is_ok());
    }

    #[test]
    fn restock_threshold_is_strictly_below_twenty_percent() {
        assert!(requires_restock(&category(100, 19, 81)));
        assert!(!requires_restock(&category(100, 20, 80)));
        assert!(!requires_restock(&category(0, 0, 0)));

        let mut inactive = category(100, 0, 100);
        inactive.status = CategoryStatus::Inactive;
        assert!(!requires_restock(&inactive));
    }

    #[test]
    fn patch_never_touches_counters() {
        let mut c = category(10, 6, 4);
        c.apply_patch(
            CategoryPatch {
                location: Some("Warehouse 2".to_string()),
                status: Some(CategoryStatus::Discontinued),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(c.location, "Warehouse 2");
        assert_eq!(c.status, CategoryStatus::Discontinued);
        assert_eq!((c.total_quantity, c.filled_quantity, c.empty_quantity), (10, 6, 4));
    }

    #[test]
    fn empty_patch_is_rejected() {
        let mut c = category(10, 6, 4);
        assert!(c.apply_patch(CategoryPatch::default(), Utc::now()).is_err());
    }

    fn operation() -> impl Strategy<Value = StockOperation> {
        prop_oneof![
            (1i64..50).prop_map(|quantity| StockOperation::Sale { quantity }),
            (1i64..50).prop_map(|quantity| StockOperation::Exchange { quantity }),
            (1i64..50).prop_map(|quantity| StockOperation::Return { quantity }),
            (0i64..50, 1i64..50).prop_map(|(filled, empty)| StockOperation::Restock { filled, empty }),
        ]
    }

    proptest! {
        #[test]
        fn counters_are_conserved_and_non_negative(
            filled in 0i64..200,
            empty in 0i64..200,
            ops in proptest::collection::vec(operation(), 1..40),
        ) {
            let mut c = category(filled + empty, filled, empty);
            for op in ops {
                c = op.apply(&c, Utc::now());
                prop_assert!(c.filled_quantity >= 0);
                prop_assert!(c.empty_quantity >= 0);
                prop_assert_eq!(c.total_quantity, c.filled_quantity + c.empty_quantity);
            }
        }
    }
}

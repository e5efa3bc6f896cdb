use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gascyl_core::{CategoryId, CylinderId, DomainError, MovementId, UserId};

use crate::category::{Category, StockOperation};
use crate::cylinder::{CylinderStatus, StatusTransition};

/// Kind of inventory-affecting transaction a movement records.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Sale,
    Exchange,
    Return,
    Restock,
    Fill,
    Empty,
    Loan,
    Transfer,
    Maintenance,
    Inspection,
    Dispose,
}

impl MovementType {
    pub const ALL: [MovementType; 11] = [
        MovementType::Sale,
        MovementType::Exchange,
        MovementType::Return,
        MovementType::Restock,
        MovementType::Fill,
        MovementType::Empty,
        MovementType::Loan,
        MovementType::Transfer,
        MovementType::Maintenance,
        MovementType::Inspection,
        MovementType::Dispose,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Sale => "sale",
            MovementType::Exchange => "exchange",
            MovementType::Return => "return",
            MovementType::Restock => "restock",
            MovementType::Fill => "fill",
            MovementType::Empty => "empty",
            MovementType::Loan => "loan",
            MovementType::Transfer => "transfer",
            MovementType::Maintenance => "maintenance",
            MovementType::Inspection => "inspection",
            MovementType::Dispose => "dispose",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::invalid_id(format!("unknown movement type '{s}'")))
    }
}

/// The entity a movement belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MovementOwner {
    Category(CategoryId),
    Cylinder(CylinderId),
}

impl core::fmt::Display for MovementOwner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MovementOwner::Category(id) => write!(f, "category:{id}"),
            MovementOwner::Cylinder(id) => write!(f, "cylinder:{id}"),
        }
    }
}

/// Caller-supplied metadata attached to a movement.
///
/// Customer, driver and invoice belong to other modules and are referenced by id only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementContext {
    pub performed_by: Option<UserId>,
    pub customer_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub notes: Option<String>,
    /// Business date of the transaction; defaults to the recording time.
    pub transaction_date: Option<DateTime<Utc>>,
}

/// Immutable audit record of one inventory-affecting transaction.
///
/// Only `notes` may be corrected after creation, and correcting it never
/// re-applies any counter delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub owner: MovementOwner,
    pub movement_type: MovementType,
    pub from_location: Option<String>,
    pub to_location: Option<String>,
    pub from_status: Option<CylinderStatus>,
    pub to_status: Option<CylinderStatus>,
    pub quantity: i64,
    pub transaction_date: DateTime<Utc>,
    pub customer_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub performed_by: Option<UserId>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Movement {
    /// Build the movement describing a stock operation on a category.
    ///
    /// `category` is the state *before* the operation is applied.
    pub fn for_stock_operation(
        id: MovementId,
        category: &Category,
        operation: &StockOperation,
        context: MovementContext,
        now: DateTime<Utc>,
    ) -> Self {
        let location = Some(category.location.clone()).filter(|l| !l.is_empty());
        let (from_location, to_location) = match operation {
            StockOperation::Sale { .. } => (location, None),
            StockOperation::Exchange { .. } => (location.clone(), location),
            StockOperation::Return { .. } | StockOperation::Restock { .. } => (None, location),
        };

        Self::build(
            id,
            MovementOwner::Category(category.id),
            operation.movement_type(),
            from_location,
            to_location,
            None,
            None,
            operation.quantity(),
            context,
            now,
        )
    }

    /// Build the movement describing a cylinder status transition.
    pub fn for_transition(
        id: MovementId,
        cylinder_id: CylinderId,
        transition: &StatusTransition,
        context: MovementContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self::build(
            id,
            MovementOwner::Cylinder(cylinder_id),
            transition.movement_type,
            transition.from_location.clone(),
            transition.to_location.clone(),
            Some(transition.from),
            Some(transition.to),
            1,
            context,
            now,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        id: MovementId,
        owner: MovementOwner,
        movement_type: MovementType,
        from_location: Option<String>,
        to_location: Option<String>,
        from_status: Option<CylinderStatus>,
        to_status: Option<CylinderStatus>,
        quantity: i64,
        context: MovementContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            movement_type,
            from_location,
            to_location,
            from_status,
            to_status,
            quantity,
            transaction_date: context.transaction_date.unwrap_or(now),
            customer_id: context.customer_id,
            driver_id: context.driver_id,
            invoice_id: context.invoice_id,
            performed_by: context.performed_by,
            notes: context.notes,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{CategoryStatus, NewCategory};

    fn category() -> Category {
        Category::create(
            CategoryId::new(),
            NewCategory {
                name: "LPG 12kg".to_string(),
                description: None,
                gas_type: "lpg".to_string(),
                location: "Depot A".to_string(),
                status: CategoryStatus::Active,
                total_quantity: 10,
                filled_quantity: 6,
                empty_quantity: 4,
                price_cents: 2_500,
                deposit_cents: 5_000,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn movement_type_parses_every_literal() {
        for t in MovementType::ALL {
            assert_eq!(t.as_str().parse::<MovementType>().unwrap(), t);
        }
        assert!("refill".parse::<MovementType>().is_err());
    }

    #[test]
    fn sale_movement_leaves_from_category_location() {
        let c = category();
        let m = Movement::for_stock_operation(
            MovementId::new(),
            &c,
            &StockOperation::Sale { quantity: 3 },
            MovementContext::default(),
            Utc::now(),
        );
        assert_eq!(m.movement_type, MovementType::Sale);
        assert_eq!(m.quantity, 3);
        assert_eq!(m.from_location.as_deref(), Some("Depot A"));
        assert_eq!(m.to_location, None);
        assert_eq!(m.owner, MovementOwner::Category(c.id));
    }

    #[test]
    fn transaction_date_defaults_to_recording_time() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::days(2);
        let c = category();

        let defaulted = Movement::for_stock_operation(
            MovementId::new(),
            &c,
            &StockOperation::Return { quantity: 1 },
            MovementContext::default(),
            now,
        );
        assert_eq!(defaulted.transaction_date, now);

        let backdated = Movement::for_stock_operation(
            MovementId::new(),
            &c,
            &StockOperation::Return { quantity: 1 },
            MovementContext {
                transaction_date: Some(earlier),
                ..Default::default()
            },
            now,
        );
        assert_eq!(backdated.transaction_date, earlier);
        assert_eq!(backdated.created_at, now);
    }

    #[test]
    fn owner_display_is_prefixed_by_kind() {
        let id = CylinderId::new();
        assert_eq!(MovementOwner::Cylinder(id).to_string(), format!("cylinder:{id}"));
    }
}

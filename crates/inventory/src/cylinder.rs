use core::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gascyl_core::{CylinderId, CylinderTypeId, DomainError, DomainResult};

use crate::movement::MovementType;

/// Inspection interval applied when a cylinder type does not define one (5 years).
pub const DEFAULT_INSPECTION_INTERVAL_DAYS: u32 = 1825;

/// Current status of a serialized cylinder.
///
/// Every status may transition to every other status; each transition is
/// recorded as exactly one movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CylinderStatus {
    Available,
    InUse,
    Loaned,
    Empty,
    Filled,
    Maintenance,
    Testing,
    Expired,
    Damaged,
    Lost,
    Scrapped,
}

impl CylinderStatus {
    pub const ALL: [CylinderStatus; 11] = [
        CylinderStatus::Available,
        CylinderStatus::InUse,
        CylinderStatus::Loaned,
        CylinderStatus::Empty,
        CylinderStatus::Filled,
        CylinderStatus::Maintenance,
        CylinderStatus::Testing,
        CylinderStatus::Expired,
        CylinderStatus::Damaged,
        CylinderStatus::Lost,
        CylinderStatus::Scrapped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CylinderStatus::Available => "available",
            CylinderStatus::InUse => "in_use",
            CylinderStatus::Loaned => "loaned",
            CylinderStatus::Empty => "empty",
            CylinderStatus::Filled => "filled",
            CylinderStatus::Maintenance => "maintenance",
            CylinderStatus::Testing => "testing",
            CylinderStatus::Expired => "expired",
            CylinderStatus::Damaged => "damaged",
            CylinderStatus::Lost => "lost",
            CylinderStatus::Scrapped => "scrapped",
        }
    }
}

impl core::fmt::Display for CylinderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CylinderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CylinderStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| DomainError::invalid_id(format!("unknown cylinder status '{s}'")))
    }
}

/// Movement type recorded when a cylinder enters `status`.
pub fn movement_type_for_status(status: CylinderStatus) -> MovementType {
    match status {
        CylinderStatus::Filled => MovementType::Fill,
        CylinderStatus::Empty => MovementType::Empty,
        CylinderStatus::Loaned => MovementType::Loan,
        CylinderStatus::Available => MovementType::Return,
        CylinderStatus::Maintenance => MovementType::Maintenance,
        CylinderStatus::Testing => MovementType::Inspection,
        CylinderStatus::Damaged | CylinderStatus::Scrapped => MovementType::Dispose,
        _ => MovementType::Transfer,
    }
}

/// Specification template for individually tracked cylinders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CylinderType {
    pub id: CylinderTypeId,
    pub name: String,
    pub gas_type: String,
    pub capacity_liters: f64,
    pub description: Option<String>,
    pub price_cents: i64,
    pub deposit_cents: i64,
    /// Overrides [`DEFAULT_INSPECTION_INTERVAL_DAYS`] for cylinders of this type.
    pub inspection_interval_days: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCylinderType {
    pub name: String,
    pub gas_type: String,
    pub capacity_liters: f64,
    pub description: Option<String>,
    pub price_cents: i64,
    pub deposit_cents: i64,
    pub inspection_interval_days: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CylinderTypePatch {
    pub name: Option<String>,
    pub gas_type: Option<String>,
    pub capacity_liters: Option<f64>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub deposit_cents: Option<i64>,
    pub inspection_interval_days: Option<u32>,
}

impl CylinderType {
    pub fn create(id: CylinderTypeId, new: NewCylinderType, now: DateTime<Utc>) -> DomainResult<Self> {
        let mut ty = Self {
            id,
            name: String::new(),
            gas_type: String::new(),
            capacity_liters: 0.0,
            description: new.description,
            price_cents: 0,
            deposit_cents: 0,
            inspection_interval_days: None,
            created_at: now,
            updated_at: now,
        };
        ty.apply_patch(
            CylinderTypePatch {
                name: Some(new.name),
                gas_type: Some(new.gas_type),
                capacity_liters: Some(new.capacity_liters),
                description: None,
                price_cents: Some(new.price_cents),
                deposit_cents: Some(new.deposit_cents),
                inspection_interval_days: new.inspection_interval_days,
            },
            now,
        )?;
        Ok(ty)
    }

    pub fn apply_patch(&mut self, patch: CylinderTypePatch, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("name cannot be empty"));
            }
        }
        if let Some(gas_type) = &patch.gas_type {
            if gas_type.trim().is_empty() {
                return Err(DomainError::validation("gas type cannot be empty"));
            }
        }
        if let Some(capacity) = patch.capacity_liters {
            if !(capacity.is_finite() && capacity > 0.0) {
                return Err(DomainError::validation("capacity must be a positive number"));
            }
        }
        if patch.price_cents.is_some_and(|p| p < 0) || patch.deposit_cents.is_some_and(|d| d < 0) {
            return Err(DomainError::validation("prices cannot be negative"));
        }
        if patch.inspection_interval_days == Some(0) {
            return Err(DomainError::validation("inspection interval must be at least one day"));
        }

        if let Some(name) = patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(gas_type) = patch.gas_type {
            self.gas_type = gas_type.trim().to_string();
        }
        if let Some(capacity) = patch.capacity_liters {
            self.capacity_liters = capacity;
        }
        if let Some(description) = patch.description {
            self.description = Some(description).filter(|d| !d.is_empty());
        }
        if let Some(price) = patch.price_cents {
            self.price_cents = price;
        }
        if let Some(deposit) = patch.deposit_cents {
            self.deposit_cents = deposit;
        }
        if let Some(days) = patch.inspection_interval_days {
            self.inspection_interval_days = Some(days);
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn inspection_interval(&self) -> u32 {
        self.inspection_interval_days
            .unwrap_or(DEFAULT_INSPECTION_INTERVAL_DAYS)
    }
}

/// One physical, serialized cylinder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cylinder {
    pub id: CylinderId,
    pub serial_number: String,
    pub type_id: CylinderTypeId,
    pub status: CylinderStatus,
    pub location: String,
    /// Customer currently holding the cylinder, if loaned out.
    pub customer_id: Option<Uuid>,
    pub last_filled_at: Option<DateTime<Utc>>,
    pub last_inspected_at: Option<DateTime<Utc>>,
    pub manufactured_on: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCylinder {
    pub serial_number: String,
    pub type_id: CylinderTypeId,
    pub status: CylinderStatus,
    pub location: String,
    pub customer_id: Option<Uuid>,
    pub manufactured_on: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Edit of a cylinder. A `status` change is applied as a recorded transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CylinderPatch {
    pub serial_number: Option<String>,
    pub location: Option<String>,
    /// `Some(None)` clears the assigned customer; `None` leaves it unchanged.
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<Option<Uuid>>,
    pub notes: Option<String>,
    pub status: Option<CylinderStatus>,
}

impl CylinderPatch {
    pub fn is_empty(&self) -> bool {
        self.serial_number.is_none()
            && self.location.is_none()
            && self.customer_id.is_none()
            && self.notes.is_none()
            && self.status.is_none()
    }
}

/// Distinguishes an explicit `null` (`Some(None)`) from an absent field (`None`).
fn clearable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Description of one status change, before it is written as a movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: CylinderStatus,
    pub to: CylinderStatus,
    pub movement_type: MovementType,
    pub from_location: Option<String>,
    pub to_location: Option<String>,
}

impl Cylinder {
    pub fn create(id: CylinderId, new: NewCylinder, now: DateTime<Utc>) -> DomainResult<Self> {
        let serial_number = new.serial_number.trim().to_string();
        if serial_number.is_empty() {
            return Err(DomainError::validation("serial number cannot be empty"));
        }

        Ok(Self {
            id,
            serial_number,
            type_id: new.type_id,
            status: new.status,
            location: new.location,
            customer_id: new.customer_id,
            last_filled_at: None,
            last_inspected_at: None,
            manufactured_on: new.manufactured_on,
            notes: new.notes,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply the non-status fields of a patch.
    pub fn apply_details(&mut self, patch: &CylinderPatch, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(serial) = &patch.serial_number {
            let serial = serial.trim();
            if serial.is_empty() {
                return Err(DomainError::validation("serial number cannot be empty"));
            }
            self.serial_number = serial.to_string();
        }
        if let Some(location) = &patch.location {
            self.location = location.clone();
        }
        if let Some(customer_id) = patch.customer_id {
            self.customer_id = customer_id;
        }
        if let Some(notes) = &patch.notes {
            self.notes = Some(notes.clone()).filter(|n| !n.is_empty());
        }
        self.updated_at = now;
        Ok(())
    }

    /// Move the cylinder to `to`, returning the new state and the transition to record.
    pub fn transition(
        &self,
        to: CylinderStatus,
        to_location: Option<String>,
        customer_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> (Cylinder, StatusTransition) {
        let movement_type = movement_type_for_status(to);
        let mut next = self.clone();

        next.status = to;
        if let Some(location) = &to_location {
            next.location = location.clone();
        }
        match movement_type {
            MovementType::Fill => next.last_filled_at = Some(now),
            MovementType::Inspection => next.last_inspected_at = Some(now),
            MovementType::Loan => {
                if customer_id.is_some() {
                    next.customer_id = customer_id;
                }
            }
            MovementType::Return => next.customer_id = None,
            _ => {}
        }
        next.updated_at = now;

        let transition = StatusTransition {
            from: self.status,
            to,
            movement_type,
            from_location: non_empty(&self.location),
            to_location: non_empty(&next.location),
        };
        (next, transition)
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

/// Whether a cylinder is due for its periodic inspection.
///
/// A cylinder that was never inspected is always due, whatever its
/// manufacture date. Lost and scrapped cylinders are never due.
pub fn needs_inspection(cylinder: &Cylinder, interval_days: u32, now: DateTime<Utc>) -> bool {
    if matches!(cylinder.status, CylinderStatus::Lost | CylinderStatus::Scrapped) {
        return false;
    }

    match cylinder.last_inspected_at {
        Some(at) => now.signed_duration_since(at) >= Duration::days(i64::from(interval_days)),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cylinder(status: CylinderStatus) -> Cylinder {
        Cylinder::create(
            CylinderId::new(),
            NewCylinder {
                serial_number: " SN-0001 ".to_string(),
                type_id: CylinderTypeId::new(),
                status,
                location: "Yard".to_string(),
                customer_id: None,
                manufactured_on: None,
                notes: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn status_literals_round_trip() {
        for st in CylinderStatus::ALL {
            assert_eq!(st.as_str().parse::<CylinderStatus>().unwrap(), st);
        }
        assert!("broken".parse::<CylinderStatus>().is_err());
    }

    #[test]
    fn status_lookup_table() {
        use CylinderStatus::*;
        assert_eq!(movement_type_for_status(Filled), MovementType::Fill);
        assert_eq!(movement_type_for_status(Loaned), MovementType::Loan);
        assert_eq!(movement_type_for_status(Available), MovementType::Return);
        assert_eq!(movement_type_for_status(Maintenance), MovementType::Maintenance);
        assert_eq!(movement_type_for_status(Testing), MovementType::Inspection);
        assert_eq!(movement_type_for_status(Damaged), MovementType::Dispose);
        assert_eq!(movement_type_for_status(Scrapped), MovementType::Dispose);
        assert_eq!(movement_type_for_status(Lost), MovementType::Transfer);
        assert_eq!(movement_type_for_status(InUse), MovementType::Transfer);
    }

    #[test]
    fn create_trims_serial_and_rejects_blank() {
        assert_eq!(cylinder(CylinderStatus::Available).serial_number, "SN-0001");

        let err = Cylinder::create(
            CylinderId::new(),
            NewCylinder {
                serial_number: "   ".to_string(),
                type_id: CylinderTypeId::new(),
                status: CylinderStatus::Available,
                location: String::new(),
                customer_id: None,
                manufactured_on: None,
                notes: None,
            },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn loan_then_return_tracks_customer() {
        let customer = Uuid::now_v7();
        let c = cylinder(CylinderStatus::Filled);

        let (loaned, t) = c.transition(CylinderStatus::Loaned, None, Some(customer), Utc::now());
        assert_eq!(t.from, CylinderStatus::Filled);
        assert_eq!(t.to, CylinderStatus::Loaned);
        assert_eq!(t.movement_type, MovementType::Loan);
        assert_eq!(loaned.customer_id, Some(customer));

        let (back, t) = loaned.transition(CylinderStatus::Available, Some("Depot".to_string()), None, Utc::now());
        assert_eq!(t.movement_type, MovementType::Return);
        assert_eq!(t.from_location.as_deref(), Some("Yard"));
        assert_eq!(t.to_location.as_deref(), Some("Depot"));
        assert_eq!(back.customer_id, None);
        assert_eq!(back.location, "Depot");
    }

    #[test]
    fn fill_and_test_stamp_dates() {
        let now = Utc::now();
        let (filled, _) = cylinder(CylinderStatus::Empty).transition(CylinderStatus::Filled, None, None, now);
        assert_eq!(filled.last_filled_at, Some(now));

        let (tested, _) = filled.transition(CylinderStatus::Testing, None, None, now);
        assert_eq!(tested.last_inspected_at, Some(now));
    }

    #[test]
    fn same_status_transition_is_allowed() {
        let c = cylinder(CylinderStatus::Maintenance);
        let (next, t) = c.transition(CylinderStatus::Maintenance, None, None, Utc::now());
        assert_eq!(next.status, CylinderStatus::Maintenance);
        assert_eq!(t.from, t.to);
    }

    #[test]
    fn inspection_due_rules() {
        let now = Utc::now();
        let mut c = cylinder(CylinderStatus::Available);
        assert!(needs_inspection(&c, 365, now));

        c.last_inspected_at = Some(now - Duration::days(100));
        assert!(!needs_inspection(&c, 365, now));
        assert!(needs_inspection(&c, 90, now));

        c.status = CylinderStatus::Scrapped;
        assert!(!needs_inspection(&c, 90, now));
    }

    #[test]
    fn patch_can_assign_and_clear_customer() {
        let now = Utc::now();
        let mut c = cylinder(CylinderStatus::Loaned);
        let customer = Uuid::now_v7();

        let assign = CylinderPatch {
            customer_id: Some(Some(customer)),
            ..Default::default()
        };
        c.apply_details(&assign, now).unwrap();
        assert_eq!(c.customer_id, Some(customer));

        let notes_only = CylinderPatch {
            notes: Some("dent".into()),
            ..Default::default()
        };
        c.apply_details(&notes_only, now).unwrap();
        assert_eq!(c.customer_id, Some(customer));

        let clear = CylinderPatch {
            customer_id: Some(None),
            ..Default::default()
        };
        assert!(!clear.is_empty());
        c.apply_details(&clear, now).unwrap();
        assert_eq!(c.customer_id, None);
    }

    #[test]
    fn patch_json_separates_null_from_missing() {
        let clear: CylinderPatch = serde_json::from_str(r#"{"customer_id": null}"#).unwrap();
        assert_eq!(clear.customer_id, Some(None));

        let untouched: CylinderPatch = serde_json::from_str(r#"{"location": "Bay 2"}"#).unwrap();
        assert_eq!(untouched.customer_id, None);
    }

    #[test]
    fn never_inspected_is_due_regardless_of_manufacture_date() {
        let now = Utc::now();
        let mut c = cylinder(CylinderStatus::Available);
        c.manufactured_on = Some((now - Duration::days(30)).date_naive());
        assert!(needs_inspection(&c, 365, now));

        c.last_inspected_at = Some(now - Duration::days(30));
        assert!(!needs_inspection(&c, 365, now));
    }

    #[test]
    fn type_validation() {
        let new = NewCylinderType {
            name: "Argon 50L".to_string(),
            gas_type: "argon".to_string(),
            capacity_liters: 50.0,
            description: None,
            price_cents: 1_000,
            deposit_cents: 2_000,
            inspection_interval_days: None,
        };
        let ty = CylinderType::create(CylinderTypeId::new(), new.clone(), Utc::now()).unwrap();
        assert_eq!(ty.inspection_interval(), DEFAULT_INSPECTION_INTERVAL_DAYS);

        let bad = NewCylinderType {
            capacity_liters: 0.0,
            ..new.clone()
        };
        assert!(CylinderType::create(CylinderTypeId::new(), bad, Utc::now()).is_err());

        let bad = NewCylinderType {
            inspection_interval_days: Some(0),
            ..new
        };
        assert!(CylinderType::create(CylinderTypeId::new(), bad, Utc::now()).is_err());
    }
}

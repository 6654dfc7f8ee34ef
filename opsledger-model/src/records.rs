//! Typed views over the two built-in entity types.
//!
//! Entities are stored as JSON; these structs are what callers build and
//! read so field names stay consistent with the schemas registered by
//! [`crate::SchemaRegistry::with_builtin`].

use crate::entity::Entity;
use crate::error::{ModelError, ModelResult};
use crate::handler::DomainHandler;
use crate::schema::{EntitySchema, FieldSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const INVENTORY_ITEM: &str = "inventory_item";
pub const APPOINTMENT: &str = "appointment";

/// A stock-keeping unit tracked by the inventory screens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub sku: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    pub quantity: i64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub low_stock_threshold: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl InventoryItem {
    pub fn new(sku: impl Into<String>, name: impl Into<String>, quantity: i64) -> Self {
        Self {
            sku: sku.into(),
            name: name.into(),
            category: None,
            industry: None,
            quantity,
            price: 0.0,
            low_stock_threshold: 0,
            location: None,
            description: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = price;
        self
    }

    pub fn with_low_stock_threshold(mut self, threshold: i64) -> Self {
        self.low_stock_threshold = threshold;
        self
    }

    /// Stock at or below the threshold counts as low.
    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.low_stock_threshold
    }

    pub fn schema() -> EntitySchema {
        EntitySchema::new(
            INVENTORY_ITEM,
            "inventory",
            vec![
                FieldSpec::text("sku", true).required(),
                FieldSpec::text("name", true).required(),
                FieldSpec::text("category", true),
                FieldSpec::text("industry", false),
                FieldSpec::integer("quantity").required().non_negative(),
                FieldSpec::number("price").non_negative(),
                FieldSpec::integer("low_stock_threshold").non_negative(),
                FieldSpec::text("location", true),
                FieldSpec::text("description", true),
            ],
        )
    }

    pub fn to_data(&self) -> ModelResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_entity(entity: &Entity) -> ModelResult<Self> {
        expect_type(entity, INVENTORY_ITEM)?;
        Ok(serde_json::from_value(entity.data.clone())?)
    }
}

/// Lifecycle of a booked appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [&'static str; 5] = ["scheduled", "confirmed", "completed", "cancelled", "no_show"];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }
}

/// A booking on a staff member's calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub title: String,
    pub customer_name: String,
    pub staff_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: AppointmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Appointment {
    pub fn new(
        title: impl Into<String>,
        customer_name: impl Into<String>,
        staff_id: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            customer_name: customer_name.into(),
            staff_id: staff_id.into(),
            start,
            end,
            status: AppointmentStatus::Scheduled,
            industry: None,
            category: None,
            notes: None,
        }
    }

    /// Half-open interval overlap: back-to-back bookings do not overlap.
    pub fn overlaps(&self, other: &Appointment) -> bool {
        self.staff_id == other.staff_id && self.start < other.end && other.start < self.end
    }

    pub fn schema() -> EntitySchema {
        EntitySchema::new(
            APPOINTMENT,
            "appointments",
            vec![
                FieldSpec::text("title", true).required(),
                FieldSpec::text("customer_name", true).required(),
                FieldSpec::text("staff_id", false).required(),
                FieldSpec::datetime("start").required(),
                FieldSpec::datetime("end").required(),
                FieldSpec::enumeration("status", &AppointmentStatus::ALL).required(),
                FieldSpec::text("industry", false),
                FieldSpec::text("category", true),
                FieldSpec::text("notes", true),
            ],
        )
    }

    pub fn to_data(&self) -> ModelResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_entity(entity: &Entity) -> ModelResult<Self> {
        expect_type(entity, APPOINTMENT)?;
        Ok(serde_json::from_value(entity.data.clone())?)
    }
}

/// Rejects appointments that end before they start.
pub(crate) struct AppointmentWindow;

impl DomainHandler for AppointmentWindow {
    fn validate(&self, data: &Value) -> Result<(), String> {
        let parse = |field: &str| {
            data.get(field)
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        };
        match (parse("start"), parse("end")) {
            (Some(start), Some(end)) if end <= start => {
                Err(format!("appointment must end after it starts ({start} >= {end})"))
            }
            _ => Ok(()),
        }
    }
}

fn expect_type(entity: &Entity, expected: &str) -> ModelResult<()> {
    if entity.entity_type != expected {
        return Err(ModelError::validation(format!(
            "expected a {expected}, got a {}",
            entity.entity_type
        )));
    }
    Ok(())
}

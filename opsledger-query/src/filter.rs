//! Entity filters.

use chrono::{DateTime, Utc};
use opsledger_model::{Entity, EntitySyncState, SchemaRegistry, INVENTORY_ITEM};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Half-open time window `[from, to)` over a datetime field.
///
/// `created_at` and `modified_at` read the entity's own timestamps; any
/// other name reads an RFC 3339 string field from the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub field: String,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(field: impl Into<String>, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self {
            field: field.into(),
            from,
            to,
        }
    }

    fn contains(&self, entity: &Entity) -> bool {
        let Some(at) = entity_time(entity, &self.field) else {
            return false;
        };
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at < to)
    }
}

/// Reads a datetime from the entity's metadata or payload.
pub(crate) fn entity_time(entity: &Entity, field: &str) -> Option<DateTime<Utc>> {
    match field {
        "created_at" => DateTime::from_timestamp_millis(entity.created_at),
        "modified_at" => DateTime::from_timestamp_millis(entity.modified_at),
        _ => entity
            .get_str(&format!("/{field}"))
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

/// Filtering criteria for [`crate::QueryFacade::search`]. Unset criteria
/// match everything; set criteria must all match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityFilter {
    /// Case-insensitive substring over the type's searchable fields.
    pub text: Option<String>,
    pub entity_type: Option<String>,
    pub category: Option<String>,
    pub industry: Option<String>,
    /// Appointment status (`scheduled`, `confirmed`, ...).
    pub status: Option<String>,
    pub staff_id: Option<String>,
    /// Inventory items at or below their low-stock threshold.
    pub low_stock: Option<bool>,
    pub sync_state: Option<EntitySyncState>,
    pub date_range: Option<DateRange>,
}

impl EntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_staff(mut self, staff_id: impl Into<String>) -> Self {
        self.staff_id = Some(staff_id.into());
        self
    }

    pub fn low_stock(mut self, low: bool) -> Self {
        self.low_stock = Some(low);
        self
    }

    pub fn with_sync_state(mut self, state: EntitySyncState) -> Self {
        self.sync_state = Some(state);
        self
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    /// Check if an entity matches these filters.
    pub fn matches(&self, entity: &Entity, schemas: &SchemaRegistry) -> bool {
        if let Some(ref entity_type) = self.entity_type
            && entity.entity_type != *entity_type
        {
            return false;
        }

        if !field_equals(entity, "category", self.category.as_deref())
            || !field_equals(entity, "industry", self.industry.as_deref())
            || !field_equals(entity, "status", self.status.as_deref())
            || !field_equals(entity, "staff_id", self.staff_id.as_deref())
        {
            return false;
        }

        if let Some(low) = self.low_stock
            && is_low_stock(entity) != low
        {
            return false;
        }

        if let Some(state) = self.sync_state
            && entity.sync_state != state
        {
            return false;
        }

        if let Some(ref range) = self.date_range
            && !range.contains(entity)
        {
            return false;
        }

        if let Some(ref text) = self.text {
            let needle = text.trim().to_lowercase();
            if !needle.is_empty() && !text_matches(entity, schemas, &needle) {
                return false;
            }
        }

        true
    }
}

fn field_equals(entity: &Entity, field: &str, expected: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) => entity
            .field(field)
            .and_then(Value::as_str)
            .is_some_and(|v| v.eq_ignore_ascii_case(expected)),
    }
}

/// Stock at or below the threshold (0 when unset) counts as low.
pub(crate) fn is_low_stock(entity: &Entity) -> bool {
    if entity.entity_type != INVENTORY_ITEM {
        return false;
    }
    let Some(quantity) = entity.get_number("/quantity") else {
        return false;
    };
    quantity <= entity.get_number("/low_stock_threshold").unwrap_or(0.0)
}

fn text_matches(entity: &Entity, schemas: &SchemaRegistry, needle: &str) -> bool {
    let contains = |v: &Value| v.as_str().is_some_and(|s| s.to_lowercase().contains(needle));
    match schemas.schema(&entity.entity_type) {
        Some(schema) => schema
            .searchable_fields()
            .filter_map(|f| entity.field(f))
            .any(contains),
        // Unregistered types: every top-level string field is searchable.
        None => entity
            .data
            .as_object()
            .is_some_and(|obj| obj.values().any(contains)),
    }
}

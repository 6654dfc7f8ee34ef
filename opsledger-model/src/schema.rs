use crate::change::ChangeOp;
use crate::error::{ModelError, ModelResult};
use crate::handler::DomainHandler;
use crate::records::{Appointment, AppointmentWindow, InventoryItem, APPOINTMENT};
use crate::replay::apply_op;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Describes an entity type's fields for validation and search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySchema {
    pub entity_type: String,
    /// REST collection name (`/api/{collection}/{id}`).
    pub collection: String,
    pub fields: Vec<FieldSpec>,
}

impl EntitySchema {
    pub fn new(
        entity_type: impl Into<String>,
        collection: impl Into<String>,
        fields: Vec<FieldSpec>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            collection: collection.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Names of the fields text search looks at.
    pub fn searchable_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.searchable)
            .map(|f| f.name.as_str())
    }

    /// Checks a full payload against the field specs.
    pub fn validate(&self, data: &Value) -> ModelResult<()> {
        let obj = data.as_object().ok_or_else(|| {
            ModelError::validation(format!("{} payload must be a JSON object", self.entity_type))
        })?;

        for spec in &self.fields {
            match obj.get(&spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(ModelError::validation(format!(
                            "{}: '{}' is required",
                            self.entity_type, spec.name
                        )));
                    }
                }
                Some(value) => spec.check(value)?,
            }
        }
        Ok(())
    }
}

/// A top-level field of an entity payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub searchable: bool,
    #[serde(default)]
    pub non_negative: bool,
    /// Allowed values. Only meaningful when `field_type` is `Enum`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_options: Option<Vec<String>>,
}

impl FieldSpec {
    fn simple(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            searchable: false,
            non_negative: false,
            enum_options: None,
        }
    }

    /// Shorthand for a text field.
    pub fn text(name: &str, searchable: bool) -> Self {
        Self {
            searchable,
            ..Self::simple(name, FieldType::Text)
        }
    }

    /// Shorthand for a floating point field.
    pub fn number(name: &str) -> Self {
        Self::simple(name, FieldType::Number)
    }

    /// Shorthand for a whole-number field.
    pub fn integer(name: &str) -> Self {
        Self::simple(name, FieldType::Integer)
    }

    /// Shorthand for an RFC 3339 timestamp field.
    pub fn datetime(name: &str) -> Self {
        Self::simple(name, FieldType::DateTime)
    }

    /// Shorthand for a boolean field.
    pub fn bool(name: &str) -> Self {
        Self::simple(name, FieldType::Bool)
    }

    /// Shorthand for an enum field with fixed options.
    pub fn enumeration(name: &str, options: &[&str]) -> Self {
        Self {
            enum_options: Some(options.iter().map(|s| s.to_string()).collect()),
            ..Self::simple(name, FieldType::Enum)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn non_negative(mut self) -> Self {
        self.non_negative = true;
        self
    }

    fn check(&self, value: &Value) -> ModelResult<()> {
        let type_ok = match self.field_type {
            FieldType::Text => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::DateTime => value
                .as_str()
                .is_some_and(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok()),
            FieldType::Enum => value.as_str().is_some_and(|s| {
                self.enum_options
                    .as_ref()
                    .is_none_or(|opts| opts.iter().any(|o| o == s))
            }),
            FieldType::Json => true,
        };
        if !type_ok {
            return Err(ModelError::validation(format!(
                "'{}' must be a valid {:?} value, got {value}",
                self.name, self.field_type
            )));
        }
        if self.non_negative && value.as_f64().is_some_and(|n| n < 0.0) {
            return Err(ModelError::validation(format!(
                "'{}' must not be negative, got {value}",
                self.name
            )));
        }
        Ok(())
    }
}

/// The data type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Integer,
    Bool,
    DateTime,
    Enum,
    Json,
}

/// Schemas and handlers keyed by entity type.
///
/// Types without a registered schema are accepted as long as their payload
/// is a JSON object; their REST collection defaults to the type name.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, EntitySchema>,
    handlers: HashMap<String, Arc<dyn DomainHandler>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the inventory and appointment types.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(InventoryItem::schema());
        registry.register(Appointment::schema());
        registry.register_handler(APPOINTMENT, Arc::new(AppointmentWindow));
        registry
    }

    pub fn register(&mut self, schema: EntitySchema) {
        self.schemas.insert(schema.entity_type.clone(), schema);
    }

    pub fn register_handler(&mut self, entity_type: &str, handler: Arc<dyn DomainHandler>) {
        self.handlers.insert(entity_type.to_string(), handler);
    }

    pub fn schema(&self, entity_type: &str) -> Option<&EntitySchema> {
        self.schemas.get(entity_type)
    }

    pub fn collection_for(&self, entity_type: &str) -> String {
        self.schemas
            .get(entity_type)
            .map(|s| s.collection.clone())
            .unwrap_or_else(|| entity_type.to_string())
    }

    /// Validates a full payload for `entity_type`.
    pub fn validate(&self, entity_type: &str, data: &Value) -> ModelResult<()> {
        if !data.is_object() {
            return Err(ModelError::validation(format!(
                "{entity_type} payload must be a JSON object"
            )));
        }
        if let Some(schema) = self.schemas.get(entity_type) {
            schema.validate(data)?;
        }
        if let Some(handler) = self.handlers.get(entity_type) {
            handler.validate(data).map_err(ModelError::Validation)?;
        }
        Ok(())
    }

    /// Validates `op` against the entity's current payload and returns the
    /// payload the op would produce (`None` for a delete).
    pub fn validate_op(
        &self,
        entity_type: &str,
        current: Option<&Value>,
        op: &ChangeOp,
    ) -> ModelResult<Option<Value>> {
        match op {
            ChangeOp::SetFields { fields } if fields.is_empty() => {
                return Err(ModelError::validation("update must set at least one field"));
            }
            ChangeOp::Adjust { field, delta } => {
                if !delta.is_finite() {
                    return Err(ModelError::validation(format!("delta for '{field}' is not finite")));
                }
                let numeric = self
                    .schemas
                    .get(entity_type)
                    .and_then(|s| s.field(field))
                    .is_none_or(|f| matches!(f.field_type, FieldType::Number | FieldType::Integer));
                if !numeric {
                    return Err(ModelError::validation(format!("'{field}' is not a numeric field")));
                }
            }
            _ => {}
        }

        let next = apply_op(current.cloned(), op)?;
        if let Some(data) = &next {
            self.validate(entity_type, data)?;
        }
        Ok(next)
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.schemas.keys().collect();
        types.sort();
        let mut handlers: Vec<_> = self.handlers.keys().collect();
        handlers.sort();
        f.debug_struct("SchemaRegistry")
            .field("schemas", &types)
            .field("handlers", &handlers)
            .finish()
    }
}

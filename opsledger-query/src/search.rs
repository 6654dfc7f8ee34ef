//! Sorting and pagination.

use crate::filter::entity_time;
use opsledger_model::Entity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Sort key: a top-level payload field, or `created_at` / `modified_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Results are ordered by id when unset.
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl SearchOptions {
    pub fn sorted_by(sort: SortSpec) -> Self {
        Self {
            sort: Some(sort),
            ..Self::default()
        }
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub items: Vec<Entity>,
    /// Matches before pagination.
    pub total: usize,
    /// True when matches exist past this page.
    pub has_more: bool,
}

/// Sorts `entities` in place. Entities missing the key sort last in either
/// direction; ties keep id order.
pub(crate) fn sort_entities(entities: &mut [Entity], sort: &SortSpec) {
    entities.sort_by(|a, b| {
        let ka = sort_key(a, &sort.field);
        let kb = sort_key(b, &sort.field);
        let by_value = match (&ka, &kb) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = compare_values(x, y);
                match sort.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            }
        };
        by_value.then_with(|| a.id.cmp(&b.id))
    });
}

pub(crate) fn paginate(entities: Vec<Entity>, options: &SearchOptions) -> SearchResult {
    let total = entities.len();
    let items: Vec<Entity> = entities
        .into_iter()
        .skip(options.offset)
        .take(options.limit.unwrap_or(usize::MAX))
        .collect();
    let has_more = options.offset.saturating_add(items.len()) < total;
    SearchResult {
        items,
        total,
        has_more,
    }
}

fn sort_key(entity: &Entity, field: &str) -> Option<Value> {
    match field {
        "created_at" | "modified_at" => entity_time(entity, field).map(|t| Value::from(t.timestamp_millis())),
        _ => entity.field(field).filter(|v| !v.is_null()).cloned(),
    }
}

/// Numbers compare numerically, strings lexicographically; values of
/// different kinds order by kind.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

fn kind_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

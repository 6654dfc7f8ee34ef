//! Folding changes into entity state.

use crate::change::{Change, ChangeOp};
use crate::error::{ModelError, ModelResult};
use serde_json::{Number, Value};

/// Applies one operation to a payload.
///
/// `data` is `None` when the entity does not exist yet (or was deleted);
/// the result is `None` after a delete.
pub fn apply_op(data: Option<Value>, op: &ChangeOp) -> ModelResult<Option<Value>> {
    match op {
        ChangeOp::Create { data: initial } => {
            if data.is_some() {
                return Err(ModelError::validation("create applied to an existing entity"));
            }
            Ok(Some(initial.clone()))
        }
        ChangeOp::SetFields { fields } => {
            let mut current = data.ok_or_else(|| ModelError::validation("update of a missing entity"))?;
            let obj = current
                .as_object_mut()
                .ok_or_else(|| ModelError::validation("entity payload is not an object"))?;
            for (key, value) in fields {
                obj.insert(key.clone(), value.clone());
            }
            Ok(Some(current))
        }
        ChangeOp::Adjust { field, delta } => {
            let mut current = data.ok_or_else(|| ModelError::validation("adjust of a missing entity"))?;
            let obj = current
                .as_object_mut()
                .ok_or_else(|| ModelError::validation("entity payload is not an object"))?;
            let next = add_delta(obj.get(field), *delta, field)?;
            obj.insert(field.clone(), next);
            Ok(Some(current))
        }
        ChangeOp::Delete => {
            if data.is_none() {
                return Err(ModelError::validation("delete of a missing entity"));
            }
            Ok(None)
        }
    }
}

/// Folds `changes` over `base` in the given order.
///
/// Callers pass the changes of one entity sorted by sequence number; the
/// result is the materialized payload (or `None` if the last op deleted it).
pub fn replay<'a>(
    base: Option<Value>,
    changes: impl IntoIterator<Item = &'a Change>,
) -> ModelResult<Option<Value>> {
    changes
        .into_iter()
        .try_fold(base, |acc, change| apply_op(acc, &change.op))
}

fn add_delta(current: Option<&Value>, delta: f64, field: &str) -> ModelResult<Value> {
    if !delta.is_finite() {
        return Err(ModelError::validation(format!("delta for '{field}' is not finite")));
    }
    let current = match current {
        None | Some(Value::Null) => Value::from(0),
        Some(v) if v.is_number() => v.clone(),
        Some(_) => {
            return Err(ModelError::validation(format!("field '{field}' is not numeric")));
        }
    };

    // Whole-number deltas on integer fields keep the field an integer.
    // `i64::MAX as f64` rounds up to 2^63, so the upper bound is exclusive.
    let integral = delta.fract() == 0.0 && delta >= i64::MIN as f64 && delta < i64::MAX as f64;
    if integral && let Some(n) = current.as_i64() {
        let sum = n
            .checked_add(delta as i64)
            .ok_or_else(|| ModelError::validation(format!("field '{field}' overflowed")))?;
        return Ok(Value::from(sum));
    }

    let sum = current.as_f64().unwrap_or_default() + delta;
    Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| ModelError::validation(format!("field '{field}' is not finite")))
}

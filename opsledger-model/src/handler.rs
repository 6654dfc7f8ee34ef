use serde_json::Value;

/// Optional per-type hook for rules that field specs cannot express.
///
/// Most entity types do NOT need one; [`crate::EntitySchema`] covers
/// required fields, types and non-negative numbers. Implement this for
/// cross-field checks such as "an appointment ends after it starts".
pub trait DomainHandler: Send + Sync {
    /// Validate a materialized payload before the change is logged.
    /// Return `Err(message)` to reject the write.
    fn validate(&self, data: &Value) -> Result<(), String> {
        let _ = data;
        Ok(())
    }
}

//! State guards for event subscriptions
//!
//! A guard filters event payloads by field value. Handlers declared as
//! `OrderPlaced Handler<status:paid;tier:gold>` only fire when every
//! guard matches (AND across guards, OR within one guard's value set).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single field filter: the dot-path into the payload and the set of
/// accepted values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateGuard {
    pub field_path: String,
    pub valid_values: Vec<String>,
}

impl StateGuard {
    pub fn new(field_path: impl Into<String>, valid_values: Vec<String>) -> Self {
        Self {
            field_path: field_path.into(),
            valid_values,
        }
    }

    /// Whether the payload's field value is one of the accepted values.
    ///
    /// Path navigation and value comparison are case-insensitive. A
    /// missing field never matches.
    pub fn matches(&self, payload: &Value) -> bool {
        let Some(found) = resolve_path(payload, &self.field_path) else {
            return false;
        };
        let found = value_as_comparable(found);
        self.valid_values
            .iter()
            .any(|v| v.eq_ignore_ascii_case(&found))
    }
}

/// AND-combination of guards; the empty set matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateGuardSet {
    pub guards: Vec<StateGuard>,
}

impl StateGuardSet {
    pub fn new(guards: Vec<StateGuard>) -> Self {
        Self { guards }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    pub fn matches(&self, payload: &Value) -> bool {
        self.guards.iter().all(|g| g.matches(payload))
    }

    /// Parse the header form `field:v1,v2;field2:v3`.
    ///
    /// Malformed segments (no `:`) are skipped rather than failing the
    /// whole set; the parser reports those against the source span.
    pub fn parse(spec: &str) -> Self {
        let guards = spec
            .split(';')
            .filter_map(|segment| {
                let segment = segment.trim();
                let (field, values) = segment.split_once(':')?;
                let values: Vec<String> = values
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect();
                if field.trim().is_empty() || values.is_empty() {
                    return None;
                }
                Some(StateGuard::new(field.trim(), values))
            })
            .collect();
        Self { guards }
    }
}

/// Navigate a dot-path through nested objects, case-insensitively.
fn resolve_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in path.split('.') {
        let obj = current.as_object()?;
        current = obj
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(segment))
            .map(|(_, v)| v)?;
    }
    Some(current)
}

fn value_as_comparable(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_set_matches_everything() {
        let set = StateGuardSet::empty();
        assert!(set.matches(&json!({"status": "anything"})));
        assert!(set.matches(&json!(null)));
    }

    #[test]
    fn and_across_guards() {
        let set = StateGuardSet::parse("status:paid;tier:gold");
        assert!(set.matches(&json!({"status": "paid", "tier": "gold"})));
        assert!(!set.matches(&json!({"status": "paid", "tier": "silver"})));
        assert!(!set.matches(&json!({"status": "placed", "tier": "gold"})));
    }

    #[test]
    fn or_within_a_guard() {
        let set = StateGuardSet::parse("status:paid,shipped");
        assert!(set.matches(&json!({"status": "paid"})));
        assert!(set.matches(&json!({"status": "shipped"})));
        assert!(!set.matches(&json!({"status": "draft"})));
    }

    #[test]
    fn field_resolution_is_case_insensitive() {
        let set = StateGuardSet::parse("Status:PAID");
        assert!(set.matches(&json!({"status": "paid"})));
    }

    #[test]
    fn dot_path_navigates_nested_objects() {
        let guard = StateGuard::new("order.status", vec!["open".to_string()]);
        assert!(guard.matches(&json!({"order": {"status": "open"}})));
        assert!(!guard.matches(&json!({"order": {"status": "closed"}})));
    }

    #[test]
    fn missing_field_never_matches() {
        let guard = StateGuard::new("missing", vec!["x".to_string()]);
        assert!(!guard.matches(&json!({"present": "x"})));
    }

    #[test]
    fn non_string_values_compare_by_json_form() {
        let guard = StateGuard::new("count", vec!["3".to_string()]);
        assert!(guard.matches(&json!({"count": 3})));
    }
}

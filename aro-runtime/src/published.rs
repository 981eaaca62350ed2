//! Global published-symbol registry (runtime values)
//!
//! The analyzer records which names are published; this registry holds
//! the actual values once the publishing statements run. Lookups are
//! gated by business activity.

use aro_core::TypedValue;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedValue {
    pub value: TypedValue,
    pub feature_set: String,
    pub business_activity: String,
}

/// Name-indexed map of published values, shared across the engine.
#[derive(Default)]
pub struct PublishedRegistry {
    entries: RwLock<HashMap<String, PublishedValue>>,
}

impl PublishedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(
        &self,
        name: impl Into<String>,
        value: TypedValue,
        feature_set: impl Into<String>,
        business_activity: impl Into<String>,
    ) {
        self.entries.write().expect("published lock poisoned").insert(
            name.into(),
            PublishedValue {
                value,
                feature_set: feature_set.into(),
                business_activity: business_activity.into(),
            },
        );
    }

    /// Look up a published value from the given activity. A non-empty
    /// owning activity is only visible to the same activity.
    pub fn lookup(&self, name: &str, business_activity: &str) -> Option<TypedValue> {
        let entries = self.entries.read().expect("published lock poisoned");
        let entry = entries.get(name)?;
        if !entry.business_activity.is_empty()
            && !business_activity.is_empty()
            && entry.business_activity != business_activity
        {
            return None;
        }
        Some(entry.value.clone())
    }

    /// All (name, value) pairs visible to an activity.
    pub fn visible_for(&self, business_activity: &str) -> Vec<(String, TypedValue)> {
        self.entries
            .read()
            .expect("published lock poisoned")
            .iter()
            .filter(|(_, entry)| {
                entry.business_activity.is_empty()
                    || business_activity.is_empty()
                    || entry.business_activity == business_activity
            })
            .map(|(name, entry)| (name.clone(), entry.value.clone()))
            .collect()
    }

    /// Test-reset.
    pub fn clear(&self) {
        self.entries.write().expect("published lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn activity_gates_lookups() {
        let registry = PublishedRegistry::new();
        registry.publish(
            "user",
            TypedValue::infer(json!({"id": 1})),
            "Login",
            "Security",
        );

        assert!(registry.lookup("user", "Security").is_some());
        assert!(registry.lookup("user", "Commerce").is_none());
    }

    #[test]
    fn empty_activity_is_visible_everywhere() {
        let registry = PublishedRegistry::new();
        registry.publish("shared", TypedValue::integer(1), "Init", "");
        assert!(registry.lookup("shared", "Anything").is_some());
    }
}

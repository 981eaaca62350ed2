//! Event records for the ARO runtime
//!
//! Every event carries a stable string type-tag and a UTC timestamp.
//! Subscriptions match on the tag, then on the guard-visible payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

// ============================================================================
// CHANGE KIND
// ============================================================================

/// What a repository mutation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryChangeType {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for RepositoryChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RepositoryChangeType::Created => "created",
            RepositoryChangeType::Updated => "updated",
            RepositoryChangeType::Deleted => "deleted",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// EVENT
// ============================================================================

/// A runtime event. The payload exposed to state guards and handler
/// contexts is produced by [`Event::payload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EventKind {
    ApplicationStarted,
    ApplicationStopping {
        reason: String,
    },
    FeatureSetStarted {
        feature_set: String,
    },
    FeatureSetCompleted {
        feature_set: String,
    },
    VariablePublished {
        name: String,
        business_activity: String,
        value: Value,
    },
    RepositoryChanged {
        repository: String,
        change: RepositoryChangeType,
        entity_id: Option<String>,
        old_value: Option<Value>,
        new_value: Option<Value>,
    },
    StateTransition {
        field: String,
        object: String,
        from_state: String,
        to_state: String,
        entity_id: Option<String>,
        entity: Option<Value>,
    },
    Domain {
        tag: String,
        payload: Value,
    },
    FileCreated {
        path: String,
    },
    FileModified {
        path: String,
    },
    FileDeleted {
        path: String,
    },
    SocketClientConnected {
        connection: Value,
    },
    SocketDataReceived {
        connection: Value,
        packet: Value,
    },
    SocketClientDisconnected {
        connection: Value,
    },
    ErrorOccurred {
        message: String,
        recoverable: bool,
    },
}

/// An event record: kind plus the instant it was published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Shorthand for a domain event with a map payload.
    pub fn domain(tag: impl Into<String>, payload: Value) -> Self {
        Self::new(EventKind::Domain {
            tag: tag.into(),
            payload,
        })
    }

    /// The stable string tag subscriptions match on.
    ///
    /// Domain events use their own tag verbatim; built-in kinds use a
    /// fixed name.
    pub fn type_tag(&self) -> String {
        match &self.kind {
            EventKind::ApplicationStarted => "ApplicationStarted".to_string(),
            EventKind::ApplicationStopping { .. } => "ApplicationStopping".to_string(),
            EventKind::FeatureSetStarted { .. } => "FeatureSetStarted".to_string(),
            EventKind::FeatureSetCompleted { .. } => "FeatureSetCompleted".to_string(),
            EventKind::VariablePublished { .. } => "VariablePublished".to_string(),
            EventKind::RepositoryChanged { .. } => "RepositoryChanged".to_string(),
            EventKind::StateTransition { .. } => "StateTransition".to_string(),
            EventKind::Domain { tag, .. } => tag.clone(),
            EventKind::FileCreated { .. } => "FileCreated".to_string(),
            EventKind::FileModified { .. } => "FileModified".to_string(),
            EventKind::FileDeleted { .. } => "FileDeleted".to_string(),
            EventKind::SocketClientConnected { .. } => "SocketClientConnected".to_string(),
            EventKind::SocketDataReceived { .. } => "SocketDataReceived".to_string(),
            EventKind::SocketClientDisconnected { .. } => "SocketClientDisconnected".to_string(),
            EventKind::ErrorOccurred { .. } => "ErrorOccurred".to_string(),
        }
    }

    /// The map state guards and handler contexts see.
    pub fn payload(&self) -> Value {
        match &self.kind {
            EventKind::ApplicationStarted => json!({}),
            EventKind::ApplicationStopping { reason } => json!({ "reason": reason }),
            EventKind::FeatureSetStarted { feature_set }
            | EventKind::FeatureSetCompleted { feature_set } => {
                json!({ "feature-set": feature_set })
            }
            EventKind::VariablePublished {
                name,
                business_activity,
                value,
            } => json!({
                "name": name,
                "business-activity": business_activity,
                "value": value,
            }),
            EventKind::RepositoryChanged {
                repository,
                change,
                entity_id,
                old_value,
                new_value,
            } => {
                let mut map = Map::new();
                map.insert("repository".into(), json!(repository));
                map.insert("changeType".into(), json!(change.to_string()));
                if let Some(id) = entity_id {
                    map.insert("entityId".into(), json!(id));
                }
                if let Some(old) = old_value {
                    map.insert("oldValue".into(), old.clone());
                }
                if let Some(new) = new_value {
                    map.insert("newValue".into(), new.clone());
                }
                Value::Object(map)
            }
            EventKind::StateTransition {
                field,
                object,
                from_state,
                to_state,
                entity_id,
                entity,
            } => {
                let mut map = Map::new();
                map.insert("fieldName".into(), json!(field));
                map.insert("objectName".into(), json!(object));
                map.insert("fromState".into(), json!(from_state));
                map.insert("toState".into(), json!(to_state));
                if let Some(id) = entity_id {
                    map.insert("entityId".into(), json!(id));
                }
                if let Some(entity) = entity {
                    map.insert("entity".into(), entity.clone());
                }
                Value::Object(map)
            }
            EventKind::Domain { payload, .. } => payload.clone(),
            EventKind::FileCreated { path }
            | EventKind::FileModified { path }
            | EventKind::FileDeleted { path } => json!({ "path": path }),
            EventKind::SocketClientConnected { connection }
            | EventKind::SocketClientDisconnected { connection } => {
                json!({ "connection": connection })
            }
            EventKind::SocketDataReceived { connection, packet } => {
                json!({ "connection": connection, "packet": packet })
            }
            EventKind::ErrorOccurred {
                message,
                recoverable,
            } => json!({ "message": message, "recoverable": recoverable }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_tag_is_verbatim() {
        let event = Event::domain("OrderPlaced", json!({"status": "paid"}));
        assert_eq!(event.type_tag(), "OrderPlaced");
    }

    #[test]
    fn repository_payload_includes_change_fields() {
        let event = Event::new(EventKind::RepositoryChanged {
            repository: "order-repository".to_string(),
            change: RepositoryChangeType::Updated,
            entity_id: Some("1".to_string()),
            old_value: Some(json!({"id": "1", "status": "draft"})),
            new_value: Some(json!({"id": "1", "status": "paid"})),
        });
        let payload = event.payload();
        assert_eq!(payload["changeType"], json!("updated"));
        assert_eq!(payload["entityId"], json!("1"));
        assert_eq!(payload["oldValue"]["status"], json!("draft"));
    }

    #[test]
    fn events_serialize_round_trip() {
        let event = Event::new(EventKind::StateTransition {
            field: "status".to_string(),
            object: "order".to_string(),
            from_state: "draft".to_string(),
            to_state: "paid".to_string(),
            entity_id: None,
            entity: None,
        });
        let text = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }
}

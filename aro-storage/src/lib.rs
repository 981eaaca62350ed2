//! ARO Storage - Repository Storage
//!
//! Application-scoped in-memory storage: one ordered value list per
//! repository name. Access is serialized behind an async lock; every
//! mutation reports enough detail for the Store action to publish
//! `RepositoryChanged` events.
//!
//! Store semantics:
//! - objects with an equal `id` replace in place (an update),
//! - objects with a matching `name` and no `id` inherit that entry's id
//!   and replace it,
//! - scalars already present are idempotent no-ops (strict equality,
//!   types included: integer `1` does not dedup against float `1.0`).

use aro_core::RepositoryError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

// ============================================================================
// RESULTS
// ============================================================================

/// Outcome of a store operation.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreResult {
    pub stored: Value,
    pub old_value: Option<Value>,
    pub is_update: bool,
    pub entity_id: Option<String>,
    /// False for a scalar-dedup no-op; no change event should fire.
    pub changed: bool,
}

/// Outcome of a delete operation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResult {
    pub deleted: Vec<Value>,
}

// ============================================================================
// QUERY + TRAIT
// ============================================================================

/// A repository query: the repository name plus an optional field match.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub repository: String,
    pub field: Option<String>,
    pub value: Option<Value>,
}

impl Query {
    pub fn all(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            field: None,
            value: None,
        }
    }

    pub fn by_field(
        repository: impl Into<String>,
        field: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            repository: repository.into(),
            field: Some(field.into()),
            value: Some(value),
        }
    }
}

/// Storage abstraction the engine talks to. The core ships the in-memory
/// implementation; external storage engines implement the same surface.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find(&self, query: &Query) -> Result<Vec<Value>, RepositoryError>;
    async fn save(&self, repository: &str, value: Value) -> Result<StoreResult, RepositoryError>;
    async fn delete(&self, query: &Query) -> Result<DeleteResult, RepositoryError>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// The application-scoped in-memory repository store.
///
/// `Clone` shares the same storage; lifetime is the process lifetime,
/// cleared only through [`RepositoryStore::clear_all`].
#[derive(Clone, Default)]
pub struct RepositoryStore {
    repositories: Arc<RwLock<HashMap<String, Vec<Value>>>>,
}

impl RepositoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate_name(name: &str) -> Result<(), RepositoryError> {
        if name.ends_with("-repository") {
            Ok(())
        } else {
            Err(RepositoryError::InvalidName {
                name: name.to_string(),
            })
        }
    }

    /// Store a value, applying the id/name/scalar upsert rules.
    pub async fn store(
        &self,
        repository: &str,
        value: Value,
    ) -> Result<StoreResult, RepositoryError> {
        Self::validate_name(repository)?;
        let mut repositories = self.repositories.write().await;
        let entries = repositories.entry(repository.to_string()).or_default();

        if let Some(object) = value.as_object() {
            if let Some(id_value) = object.get("id") {
                let id = id_as_string(repository, id_value)?;
                if let Some(position) = entries
                    .iter()
                    .position(|entry| entry_id(entry).as_deref() == Some(id.as_str()))
                {
                    let old = std::mem::replace(&mut entries[position], value.clone());
                    return Ok(StoreResult {
                        stored: value,
                        old_value: Some(old),
                        is_update: true,
                        entity_id: Some(id),
                        changed: true,
                    });
                }
                entries.push(value.clone());
                return Ok(StoreResult {
                    stored: value,
                    old_value: None,
                    is_update: false,
                    entity_id: Some(id),
                    changed: true,
                });
            }

            if let Some(name) = object.get("name") {
                if let Some(position) = entries.iter().position(|entry| {
                    entry
                        .as_object()
                        .and_then(|e| e.get("name"))
                        .map(|n| n == name)
                        .unwrap_or(false)
                }) {
                    // Inherit the existing entry's id, then replace.
                    let inherited = entry_id(&entries[position]);
                    let mut stored = value.clone();
                    if let (Some(id), Some(map)) = (&inherited, stored.as_object_mut()) {
                        map.insert("id".to_string(), Value::String(id.clone()));
                    }
                    let old = std::mem::replace(&mut entries[position], stored.clone());
                    return Ok(StoreResult {
                        stored,
                        old_value: Some(old),
                        is_update: true,
                        entity_id: inherited,
                        changed: true,
                    });
                }
            }

            entries.push(value.clone());
            return Ok(StoreResult {
                stored: value,
                old_value: None,
                is_update: false,
                entity_id: None,
                changed: true,
            });
        }

        // Scalars deduplicate by strict equality.
        if entries.iter().any(|entry| entry == &value) {
            return Ok(StoreResult {
                stored: value.clone(),
                old_value: Some(value),
                is_update: false,
                entity_id: None,
                changed: false,
            });
        }
        entries.push(value.clone());
        Ok(StoreResult {
            stored: value,
            old_value: None,
            is_update: false,
            entity_id: None,
            changed: true,
        })
    }

    /// Remove every entry whose field equals the value; scalars match
    /// against the entry itself when `field` is `"value"`.
    pub async fn delete_by_field(
        &self,
        repository: &str,
        field: &str,
        value: &Value,
    ) -> Result<DeleteResult, RepositoryError> {
        Self::validate_name(repository)?;
        let mut repositories = self.repositories.write().await;
        let Some(entries) = repositories.get_mut(repository) else {
            return Ok(DeleteResult { deleted: Vec::new() });
        };

        let mut deleted = Vec::new();
        entries.retain(|entry| {
            let matches = match entry.as_object() {
                Some(object) => object.get(field).map(|f| f == value).unwrap_or(false),
                None => field == "value" && entry == value,
            };
            if matches {
                deleted.push(entry.clone());
            }
            !matches
        });
        Ok(DeleteResult { deleted })
    }

    /// All entries of a repository, insertion-ordered.
    pub async fn find_all(&self, repository: &str) -> Result<Vec<Value>, RepositoryError> {
        let repositories = self.repositories.read().await;
        match repositories.get(repository) {
            Some(entries) => Ok(entries.clone()),
            None => Err(RepositoryError::NotFound {
                name: repository.to_string(),
            }),
        }
    }

    /// Entries whose field equals the value.
    pub async fn find_by_field(
        &self,
        repository: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, RepositoryError> {
        let all = self.find_all(repository).await?;
        Ok(all
            .into_iter()
            .filter(|entry| match entry.as_object() {
                Some(object) => object.get(field).map(|f| f == value).unwrap_or(false),
                None => field == "value" && entry == value,
            })
            .collect())
    }

    /// Whether a repository exists (has ever been stored into).
    pub async fn exists(&self, repository: &str) -> bool {
        self.repositories.read().await.contains_key(repository)
    }

    /// Re-publish a repository's contents under a second name for
    /// application-global access.
    pub async fn export(
        &self,
        repository: &str,
        as_name: &str,
    ) -> Result<(), RepositoryError> {
        let mut repositories = self.repositories.write().await;
        let entries = repositories
            .get(repository)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound {
                name: repository.to_string(),
            })?;
        repositories.insert(as_name.to_string(), entries);
        Ok(())
    }

    /// Test-reset: drop every repository.
    pub async fn clear_all(&self) {
        self.repositories.write().await.clear();
    }
}

#[async_trait]
impl Repository for RepositoryStore {
    async fn find(&self, query: &Query) -> Result<Vec<Value>, RepositoryError> {
        match (&query.field, &query.value) {
            (Some(field), Some(value)) => {
                self.find_by_field(&query.repository, field, value).await
            }
            _ => self.find_all(&query.repository).await,
        }
    }

    async fn save(&self, repository: &str, value: Value) -> Result<StoreResult, RepositoryError> {
        self.store(repository, value).await
    }

    async fn delete(&self, query: &Query) -> Result<DeleteResult, RepositoryError> {
        let field = query.field.as_deref().unwrap_or("id");
        let value = query.value.clone().unwrap_or(Value::Null);
        self.delete_by_field(&query.repository, field, &value).await
    }
}

/// The id of an entry as a string, if it has one.
fn entry_id(entry: &Value) -> Option<String> {
    match entry.as_object()?.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn id_as_string(repository: &str, id: &Value) -> Result<String, RepositoryError> {
    match id {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(RepositoryError::InvalidIdType {
            repository: repository.to_string(),
            found: type_name(other).to_string(),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

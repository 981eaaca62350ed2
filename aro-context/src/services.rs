//! Service traits and the type-keyed registry
//!
//! Services are registered by type token before execution starts and
//! resolved lock-free-ish at run time. The registry is shared between a
//! context and all of its children.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

// ============================================================================
// SERVICE TRAITS
// ============================================================================

/// Clock and date handling.
pub trait DateService: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn parse(&self, text: &str) -> Option<DateTime<Utc>>;
    fn format(&self, instant: DateTime<Utc>, pattern: &str) -> String;
}

/// Structured logging sink.
pub trait LoggerService: Send + Sync {
    fn log(&self, output: aro_core::OutputContext, message: &str);
}

/// Metrics counters with a readable snapshot.
pub trait MetricsService: Send + Sync {
    fn increment(&self, name: &str);
    fn snapshot(&self) -> Value;
}

/// File-system access for the Read/Write actions.
pub trait FileSystemService: Send + Sync {
    fn read(&self, path: &str) -> std::io::Result<String>;
    fn write(&self, path: &str, contents: &str) -> std::io::Result<()>;
}

/// The OpenAPI contract exposed through the `Contract` magic object.
pub trait OpenApiSpecService: Send + Sync {
    fn contract(&self) -> Value;
}

/// HTTP client used by the Request/Fetch actions. The core ships no
/// implementation; transports register one before execution.
pub trait HttpClientService: Send + Sync {
    fn get(&self, url: &str) -> Result<Value, String>;
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Type-keyed service registry.
///
/// Keys are the `TypeId` of the stored `Arc<S>`, so both concrete types
/// and trait objects (`Arc<dyn DateService>`) register uniformly.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under its own type token. Startup-only by
    /// convention; later registrations replace earlier ones.
    pub fn register<S: ?Sized + Send + Sync + 'static>(&self, service: Arc<S>) {
        self.entries
            .write()
            .expect("service registry lock poisoned")
            .insert(TypeId::of::<Arc<S>>(), Box::new(service));
    }

    /// Resolve a service by type token.
    pub fn get<S: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<S>> {
        self.entries
            .read()
            .expect("service registry lock poisoned")
            .get(&TypeId::of::<Arc<S>>())
            .and_then(|entry| entry.downcast_ref::<Arc<S>>())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("service registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDate;

    impl DateService for FixedDate {
        fn now(&self) -> DateTime<Utc> {
            DateTime::<Utc>::from_timestamp(1_000, 0).unwrap()
        }
        fn parse(&self, _text: &str) -> Option<DateTime<Utc>> {
            None
        }
        fn format(&self, instant: DateTime<Utc>, _pattern: &str) -> String {
            instant.to_rfc3339()
        }
    }

    #[test]
    fn trait_objects_register_by_type_token() {
        let registry = ServiceRegistry::new();
        let service: Arc<dyn DateService> = Arc::new(FixedDate);
        registry.register(service);

        let resolved = registry.get::<dyn DateService>().unwrap();
        assert_eq!(resolved.now().timestamp(), 1_000);
    }

    #[test]
    fn missing_service_is_none() {
        let registry = ServiceRegistry::new();
        assert!(registry.get::<dyn DateService>().is_none());
    }

    #[test]
    fn concrete_types_register_too() {
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(42usize));
        assert_eq!(*registry.get::<usize>().unwrap(), 42);
    }
}

//! Default service implementations
//!
//! The engine registers these before execution unless the embedder has
//! registered its own. The HTTP client deliberately has no default; the
//! transports that provide one are external collaborators.

use aro_context::{
    DateService, FileSystemService, LoggerService, MetricsService, OpenApiSpecService,
    ServiceRegistry,
};
use aro_core::OutputContext;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

/// Wall-clock date service.
pub struct SystemDateService;

impl DateService for SystemDateService {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn parse(&self, text: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    fn format(&self, instant: DateTime<Utc>, pattern: &str) -> String {
        instant.format(pattern).to_string()
    }
}

/// Logger that renders through `tracing`, honoring the output context.
pub struct TracingLogger;

impl LoggerService for TracingLogger {
    fn log(&self, output: OutputContext, message: &str) {
        match output {
            OutputContext::Machine => {
                tracing::info!(target: "aro", message = %json!({ "log": message }))
            }
            OutputContext::Human => tracing::info!(target: "aro", "{}", message),
            OutputContext::Developer => {
                tracing::info!(target: "aro", message = %message, "log")
            }
        }
    }
}

/// Atomic counter metrics with a JSON snapshot.
#[derive(Default)]
pub struct CounterMetrics {
    counters: RwLock<HashMap<String, AtomicI64>>,
}

impl CounterMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsService for CounterMetrics {
    fn increment(&self, name: &str) {
        {
            let counters = self.counters.read().expect("metrics lock poisoned");
            if let Some(counter) = counters.get(name) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        let mut counters = self.counters.write().expect("metrics lock poisoned");
        counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Value {
        let counters = self.counters.read().expect("metrics lock poisoned");
        let map: Map<String, Value> = counters
            .iter()
            .map(|(name, counter)| (name.clone(), json!(counter.load(Ordering::Relaxed))))
            .collect();
        Value::Object(map)
    }
}

/// Direct std::fs file access.
pub struct StdFileSystem;

impl FileSystemService for StdFileSystem {
    fn read(&self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn write(&self, path: &str, contents: &str) -> std::io::Result<()> {
        std::fs::write(path, contents)
    }
}

/// A fixed OpenAPI contract, exposed through the `Contract` magic object.
pub struct StaticOpenApiSpec {
    contract: Value,
}

impl StaticOpenApiSpec {
    pub fn new(contract: Value) -> Self {
        Self { contract }
    }
}

impl Default for StaticOpenApiSpec {
    fn default() -> Self {
        Self {
            contract: json!({
                "openapi": "3.0.0",
                "paths": {},
                "http_server": { "host": "127.0.0.1", "port": 8080 },
            }),
        }
    }
}

impl OpenApiSpecService for StaticOpenApiSpec {
    fn contract(&self) -> Value {
        self.contract.clone()
    }
}

/// Register default implementations for any service slot still empty.
pub fn register_defaults(services: &ServiceRegistry) {
    if services.get::<dyn DateService>().is_none() {
        let service: Arc<dyn DateService> = Arc::new(SystemDateService);
        services.register(service);
    }
    if services.get::<dyn LoggerService>().is_none() {
        let service: Arc<dyn LoggerService> = Arc::new(TracingLogger);
        services.register(service);
    }
    if services.get::<dyn MetricsService>().is_none() {
        let service: Arc<dyn MetricsService> = Arc::new(CounterMetrics::new());
        services.register(service);
    }
    if services.get::<dyn FileSystemService>().is_none() {
        let service: Arc<dyn FileSystemService> = Arc::new(StdFileSystem);
        services.register(service);
    }
    if services.get::<dyn OpenApiSpecService>().is_none() {
        let service: Arc<dyn OpenApiSpecService> = Arc::new(StaticOpenApiSpec::default());
        services.register(service);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_increments() {
        let metrics = CounterMetrics::new();
        metrics.increment("requests");
        metrics.increment("requests");
        metrics.increment("errors");
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot["requests"], json!(2));
        assert_eq!(snapshot["errors"], json!(1));
    }

    #[test]
    fn defaults_fill_empty_slots_only() {
        let services = ServiceRegistry::new();
        let fixed: Arc<dyn OpenApiSpecService> =
            Arc::new(StaticOpenApiSpec::new(json!({"custom": true})));
        services.register(fixed);
        register_defaults(&services);

        let spec = services.get::<dyn OpenApiSpecService>().unwrap();
        assert_eq!(spec.contract(), json!({"custom": true}));
        assert!(services.get::<dyn DateService>().is_some());
    }

    #[test]
    fn date_service_parses_rfc3339() {
        let service = SystemDateService;
        let parsed = service.parse("2026-01-01T00:00:00Z").unwrap();
        assert_eq!(service.format(parsed, "%Y"), "2026");
    }
}

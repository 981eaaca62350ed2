//! ARO Context - Runtime Execution Context
//!
//! Thread-safe typed variable storage with immutability enforcement,
//! parent-chained resolution, magic names, the type-keyed service
//! registry, the name-keyed repository registry, and the response and
//! error channels that drive feature-set short-circuiting.

pub mod services;

pub use services::{
    DateService, FileSystemService, HttpClientService, LoggerService, MetricsService,
    OpenApiSpecService, ServiceRegistry,
};

use aro_core::{AroError, DataType, OutputContext, Response, TypedValue};
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use uuid::Uuid;

// ============================================================================
// SHUTDOWN COORDINATION
// ============================================================================

/// Broadcast shutdown signal shared by the engine and long-running
/// actions.
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Signal shutdown; all current and future subscribers observe it.
    pub fn signal(&self) {
        let _ = self.sender.send(true);
    }

    pub fn is_signalled(&self) -> bool {
        *self.sender.borrow()
    }

    /// A receiver that resolves once shutdown is signalled.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Block until shutdown is signalled.
    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        eprintln!("wait: subscribed, borrow={}", *receiver.borrow());
        while !*receiver.borrow() {
            eprintln!("wait: about to call changed");
            if receiver.changed().await.is_err() {
                eprintln!("wait: changed errored");
                return;
            }
            eprintln!("wait: changed resolved, borrow={}", *receiver.borrow());
        }
        eprintln!("wait: loop exited normally");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RUNTIME CONTEXT
// ============================================================================

type RepositoryRegistry = RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>;

/// The execution context of a feature set (or handler, or loop body).
pub struct RuntimeContext {
    pub feature_set_name: String,
    pub business_activity: String,
    pub execution_id: Uuid,
    parent: Option<Arc<RuntimeContext>>,
    bindings: RwLock<HashMap<String, TypedValue>>,
    immutable_names: RwLock<HashSet<String>>,
    services: Arc<ServiceRegistry>,
    repositories: Arc<RepositoryRegistry>,
    response: RwLock<Option<Response>>,
    execution_error: RwLock<Option<AroError>>,
    wait_state: AtomicBool,
    shutdown: Arc<ShutdownCoordinator>,
    pub output_context: OutputContext,
    pub is_compiled: bool,
}

impl RuntimeContext {
    /// Create a root context for a feature set.
    pub fn root(feature_set_name: impl Into<String>, business_activity: impl Into<String>) -> Self {
        Self {
            feature_set_name: feature_set_name.into(),
            business_activity: business_activity.into(),
            execution_id: Uuid::new_v4(),
            parent: None,
            bindings: RwLock::new(HashMap::new()),
            immutable_names: RwLock::new(HashSet::new()),
            services: Arc::new(ServiceRegistry::new()),
            repositories: Arc::new(RwLock::new(HashMap::new())),
            response: RwLock::new(None),
            execution_error: RwLock::new(None),
            wait_state: AtomicBool::new(false),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            output_context: OutputContext::default(),
            is_compiled: false,
        }
    }

    /// Create a named child sharing services, repositories, and the
    /// shutdown signal. Bindings are local; resolution falls back to the
    /// parent.
    pub fn child(
        self: &Arc<Self>,
        feature_set_name: impl Into<String>,
        business_activity: impl Into<String>,
    ) -> RuntimeContext {
        RuntimeContext {
            feature_set_name: feature_set_name.into(),
            business_activity: business_activity.into(),
            execution_id: Uuid::new_v4(),
            parent: Some(self.clone()),
            bindings: RwLock::new(HashMap::new()),
            immutable_names: RwLock::new(HashSet::new()),
            services: self.services.clone(),
            repositories: self.repositories.clone(),
            response: RwLock::new(None),
            execution_error: RwLock::new(None),
            wait_state: AtomicBool::new(false),
            shutdown: self.shutdown.clone(),
            output_context: self.output_context,
            is_compiled: self.is_compiled,
        }
    }

    pub fn with_output_context(mut self, output: OutputContext) -> Self {
        self.output_context = output;
        self
    }

    pub fn with_compiled(mut self, compiled: bool) -> Self {
        self.is_compiled = compiled;
        self
    }

    /// Attach an externally owned shutdown coordinator (the engine's).
    pub fn with_shutdown(mut self, shutdown: Arc<ShutdownCoordinator>) -> Self {
        self.shutdown = shutdown;
        self
    }

    // ------------------------------------------------------------------
    // bindings
    // ------------------------------------------------------------------

    /// Bind a value, enforcing immutability.
    ///
    /// # Panics
    ///
    /// Panics when re-binding a non-`_` name without `allow_rebind`. The
    /// analyzer rejects such programs; reaching this at run time is a
    /// framework bug.
    pub fn bind(&self, name: &str, value: TypedValue, allow_rebind: bool) {
        let mut bindings = self.bindings.write().expect("binding lock poisoned");
        if !allow_rebind && !name.starts_with('_') && bindings.contains_key(name) {
            panic!("attempt to rebind immutable variable '{}'", name);
        }
        bindings.insert(name.to_string(), value);
        drop(bindings);

        if !name.starts_with('_') {
            self.immutable_names
                .write()
                .expect("immutable set lock poisoned")
                .insert(name.to_string());
        }
    }

    /// Bind a raw JSON value, inferring its type.
    pub fn bind_value(&self, name: &str, value: Value, allow_rebind: bool) {
        self.bind(name, TypedValue::infer(value), allow_rebind);
    }

    /// Whether a name is bound in this context (not parents).
    pub fn is_bound_locally(&self, name: &str) -> bool {
        self.bindings
            .read()
            .expect("binding lock poisoned")
            .contains_key(name)
    }

    /// Whether a name resolves here or in any parent (magic included).
    pub fn is_bound(&self, name: &str) -> bool {
        self.resolve_typed(name).is_some()
    }

    /// Resolve a name to its raw value.
    pub fn resolve(&self, name: &str) -> Option<Value> {
        self.resolve_typed(name).map(|tv| tv.value)
    }

    /// Resolve a name to its typed value.
    ///
    /// Magic names (`now`, `Contract`, `http-server`, `metrics`) shadow
    /// user bindings; the local map is checked next, then the parent
    /// chain.
    pub fn resolve_typed(&self, name: &str) -> Option<TypedValue> {
        if let Some(magic) = self.resolve_magic(name) {
            return Some(magic);
        }
        if let Some(value) = self
            .bindings
            .read()
            .expect("binding lock poisoned")
            .get(name)
        {
            return Some(value.clone());
        }
        self.parent.as_ref()?.resolve_typed(name)
    }

    /// The type of a name without materializing magic values.
    pub fn type_of(&self, name: &str) -> Option<DataType> {
        match name {
            "now" => return Some(DataType::Schema("Date".to_string())),
            "Contract" => return Some(DataType::Schema("Contract".to_string())),
            "http-server" => return Some(DataType::Schema("HttpServerConfig".to_string())),
            "metrics" => return Some(DataType::Map(
                Box::new(DataType::String),
                Box::new(DataType::Integer),
            )),
            _ => {}
        }
        if let Some(value) = self
            .bindings
            .read()
            .expect("binding lock poisoned")
            .get(name)
        {
            return Some(value.data_type.clone());
        }
        self.parent.as_ref()?.type_of(name)
    }

    fn resolve_magic(&self, name: &str) -> Option<TypedValue> {
        match name {
            "now" => {
                let date = self.services.get::<dyn DateService>()?;
                let now = date.now();
                Some(TypedValue::schema(
                    "Date",
                    json!({
                        "epoch": now.timestamp(),
                        "iso": now.to_rfc3339(),
                    }),
                ))
            }
            "Contract" => {
                let spec = self.services.get::<dyn OpenApiSpecService>()?;
                Some(TypedValue::schema("Contract", spec.contract()))
            }
            "http-server" => {
                let spec = self.services.get::<dyn OpenApiSpecService>()?;
                let server = spec.contract().get("http_server").cloned()?;
                Some(TypedValue::schema("HttpServerConfig", server))
            }
            "metrics" => {
                let metrics = self.services.get::<dyn MetricsService>()?;
                Some(TypedValue::infer(metrics.snapshot()))
            }
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // services and repositories
    // ------------------------------------------------------------------

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Register a repository handle under its name.
    pub fn register_repository(&self, name: impl Into<String>, handle: Arc<dyn Any + Send + Sync>) {
        self.repositories
            .write()
            .expect("repository registry lock poisoned")
            .insert(name.into(), handle);
    }

    /// Look up a repository handle by name.
    pub fn repository(&self, name: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.repositories
            .read()
            .expect("repository registry lock poisoned")
            .get(name)
            .cloned()
    }

    // ------------------------------------------------------------------
    // response and error channels
    // ------------------------------------------------------------------

    /// Set the terminal response; the executor short-circuits after the
    /// current statement.
    pub fn set_response(&self, response: Response) {
        *self.response.write().expect("response lock poisoned") = Some(response);
    }

    pub fn get_response(&self) -> Option<Response> {
        self.response
            .read()
            .expect("response lock poisoned")
            .clone()
    }

    pub fn take_response(&self) -> Option<Response> {
        self.response.write().expect("response lock poisoned").take()
    }

    /// Record the first execution error; later errors are dropped.
    pub fn set_execution_error(&self, error: AroError) {
        let mut slot = self
            .execution_error
            .write()
            .expect("error channel lock poisoned");
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    pub fn execution_error(&self) -> Option<AroError> {
        self.execution_error
            .read()
            .expect("error channel lock poisoned")
            .clone()
    }

    // ------------------------------------------------------------------
    // wait state and shutdown
    // ------------------------------------------------------------------

    pub fn set_waiting(&self, waiting: bool) {
        self.wait_state.store(waiting, Ordering::SeqCst);
    }

    pub fn is_waiting(&self) -> bool {
        self.wait_state.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    struct FixedDate;

    impl DateService for FixedDate {
        fn now(&self) -> DateTime<Utc> {
            DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
        }
        fn parse(&self, _text: &str) -> Option<DateTime<Utc>> {
            None
        }
        fn format(&self, instant: DateTime<Utc>, _pattern: &str) -> String {
            instant.to_rfc3339()
        }
    }

    #[test]
    fn bind_and_resolve() {
        let ctx = RuntimeContext::root("Test", "Testing");
        ctx.bind("x", TypedValue::integer(7), false);
        assert_eq!(ctx.resolve("x"), Some(json!(7)));
        assert_eq!(ctx.type_of("x"), Some(DataType::Integer));
    }

    #[test]
    #[should_panic(expected = "rebind immutable variable 'x'")]
    fn rebinding_without_permission_panics() {
        let ctx = RuntimeContext::root("Test", "Testing");
        ctx.bind("x", TypedValue::integer(1), false);
        ctx.bind("x", TypedValue::integer(2), false);
    }

    #[test]
    fn underscore_names_rebind_freely() {
        let ctx = RuntimeContext::root("Test", "Testing");
        ctx.bind("_tmp", TypedValue::integer(1), false);
        ctx.bind("_tmp", TypedValue::integer(2), false);
        assert_eq!(ctx.resolve("_tmp"), Some(json!(2)));
    }

    #[test]
    fn allow_rebind_updates_in_place() {
        let ctx = RuntimeContext::root("Test", "Testing");
        ctx.bind("x", TypedValue::integer(1), false);
        ctx.bind("x", TypedValue::integer(2), true);
        assert_eq!(ctx.resolve("x"), Some(json!(2)));
    }

    #[test]
    fn children_resolve_through_parent() {
        let parent = Arc::new(RuntimeContext::root("Parent", "Testing"));
        parent.bind("shared", TypedValue::string("up"), false);
        let child = parent.child("Child", "Testing");
        assert_eq!(child.resolve("shared"), Some(json!("up")));
        // Child bindings stay local.
        child.bind("local", TypedValue::integer(1), false);
        assert!(parent.resolve("local").is_none());
    }

    #[test]
    fn children_share_services() {
        let parent = Arc::new(RuntimeContext::root("Parent", "Testing"));
        let date: Arc<dyn DateService> = Arc::new(FixedDate);
        parent.services().register(date);
        let child = parent.child("Child", "Testing");
        assert!(child.services().get::<dyn DateService>().is_some());
    }

    #[test]
    fn magic_now_shadows_user_binding() {
        let ctx = RuntimeContext::root("Test", "Testing");
        let date: Arc<dyn DateService> = Arc::new(FixedDate);
        ctx.services().register(date);
        ctx.bind("now", TypedValue::integer(5), false);
        let resolved = ctx.resolve_typed("now").unwrap();
        assert_eq!(resolved.data_type, DataType::Schema("Date".to_string()));
        assert_eq!(resolved.value["epoch"], json!(1_700_000_000));
    }

    #[test]
    fn schema_type_survives_binding() {
        let ctx = RuntimeContext::root("Test", "Testing");
        ctx.bind(
            "when",
            TypedValue::schema("Date", json!({"epoch": 10})),
            false,
        );
        assert_eq!(ctx.type_of("when"), Some(DataType::Schema("Date".to_string())));
    }

    #[test]
    fn first_error_wins() {
        let ctx = RuntimeContext::root("Test", "Testing");
        let first = sample_error("first");
        let second = sample_error("second");
        ctx.set_execution_error(first);
        ctx.set_execution_error(second);
        assert_eq!(ctx.execution_error().unwrap().verb, "first");
    }

    #[test]
    fn response_channel_round_trips() {
        let ctx = RuntimeContext::root("Test", "Testing");
        assert!(ctx.get_response().is_none());
        ctx.set_response(Response::ok());
        assert!(ctx.get_response().unwrap().is_ok());
    }

    #[tokio::test]
    async fn shutdown_signal_reaches_subscribers() {
        let ctx = Arc::new(RuntimeContext::root("Test", "Testing"));
        let shutdown = ctx.shutdown().clone();
        let waiter = tokio::spawn(async move { shutdown.wait().await });
        ctx.shutdown().signal();
        waiter.await.unwrap();
        assert!(ctx.shutdown().is_signalled());
    }

    fn sample_error(verb: &str) -> AroError {
        AroError {
            verb: verb.to_string(),
            result_name: "r".to_string(),
            preposition: "from".to_string(),
            object_name: "o".to_string(),
            when_clause: None,
            feature_set: "Test".to_string(),
            variables: Default::default(),
            cause: aro_core::ActionError::State {
                reason: "test".to_string(),
            },
        }
    }
}

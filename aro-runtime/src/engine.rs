//! Execution engine
//!
//! Loads an analyzed program, wires handler feature sets onto the event
//! bus, runs the entry point, waits for event quiescence, and dispatches
//! the Application-End feature set.

use crate::actions::ActionRegistry;
use crate::executor::Executor;
use crate::published::PublishedRegistry;
use crate::services;
use aro_context::{RuntimeContext, ShutdownCoordinator};
use aro_core::{
    Event, EventKind, OutputContext, Response, StateGuard, StateGuardSet, TypedValue,
};
use aro_dsl::ast::{FeatureSet, Statement};
use aro_dsl::{classify_activity, ActivityKind, AnalyzedProgram, FileEvent, SocketEvent};
use aro_events::{EventBus, EventHandler};
use aro_storage::RepositoryStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// The default entry-point feature set.
pub const DEFAULT_ENTRY_POINT: &str = "Application-Start";

/// How metadata is bound into a handler's child context.
#[derive(Clone, Copy, PartialEq, Eq)]
enum HandlerBinding {
    Domain,
    Repository,
    State,
    File,
    Socket,
}

/// One engine instance: bus, storage, registries, and shutdown signal.
pub struct Engine {
    registry: Arc<ActionRegistry>,
    bus: EventBus,
    store: RepositoryStore,
    published: Arc<PublishedRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    output_context: OutputContext,
    quiescence_timeout: Duration,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_registry(ActionRegistry::with_builtins())
    }

    /// Build with a custom registry (embedders add actions before
    /// execute).
    pub fn with_registry(registry: ActionRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            bus: EventBus::new(),
            store: RepositoryStore::new(),
            published: Arc::new(PublishedRegistry::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            output_context: OutputContext::default(),
            quiescence_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_output_context(mut self, output: OutputContext) -> Self {
        self.output_context = output;
        self
    }

    pub fn with_quiescence_timeout(mut self, timeout: Duration) -> Self {
        self.quiescence_timeout = timeout;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &RepositoryStore {
        &self.store
    }

    pub fn published(&self) -> &Arc<PublishedRegistry> {
        &self.published
    }

    /// Signal shutdown: long-running actions observe the coordinator and
    /// `waitForShutdown`-style callers unblock.
    pub fn stop(&self) {
        self.shutdown.signal();
        self.bus.publish(Event::new(EventKind::ApplicationStopping {
            reason: "stop requested".to_string(),
        }));
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Blocking adapter for synchronous embedders (foreign-language
    /// drivers): runs `execute` on a dedicated runtime with a bounded
    /// wall-clock wait.
    ///
    /// Must not be called from inside an async context; cooperative
    /// schedulers sharing the caller's thread would deadlock.
    pub fn execute_blocking(
        &self,
        program: &AnalyzedProgram,
        entry_point: &str,
        wait: Duration,
    ) -> Response {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => return Response::error("RuntimeError", e.to_string()),
        };
        runtime.block_on(async {
            match tokio::time::timeout(wait, self.execute(program, entry_point)).await {
                Ok(response) => response,
                Err(_) => Response::error(
                    "Timeout",
                    format!("execution exceeded {}ms", wait.as_millis()),
                ),
            }
        })
    }

    /// Run a program from its entry point to a terminal response.
    pub async fn execute(&self, program: &AnalyzedProgram, entry_point: &str) -> Response {
        let Some(entry) = program.feature_set(entry_point) else {
            tracing::error!(entry_point, "entry point not found");
            return Response::error(
                "NotFound",
                format!("Entry point not found: {}", entry_point),
            );
        };

        self.bus.publish(Event::new(EventKind::ApplicationStarted));

        let base = Arc::new(
            RuntimeContext::root(
                entry.feature_set.name.clone(),
                entry.feature_set.business_activity.clone(),
            )
            .with_output_context(self.output_context)
            .with_shutdown(self.shutdown.clone()),
        );

        services::register_defaults(base.services());
        self.register_repositories(program, &base);

        let executor = Executor::new(
            self.registry.clone(),
            self.bus.clone(),
            self.store.clone(),
            self.published.clone(),
        );
        self.wire_handlers(program, &executor, &base);

        let response = match executor
            .execute_feature_set(&entry.feature_set, base.clone())
            .await
        {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(error = %error, "entry feature set failed");
                base.set_execution_error(error.clone());
                error.into_response()
            }
        };

        if !self.bus.await_pending_events(self.quiescence_timeout).await {
            tracing::warn!(
                timeout_ms = self.quiescence_timeout.as_millis() as u64,
                "pending events did not quiesce before timeout"
            );
        }

        self.run_application_end(program, &executor, &base, &response)
            .await;

        response
    }

    /// Expose every repository named in the program through the context
    /// registry.
    fn register_repositories(&self, program: &AnalyzedProgram, base: &Arc<RuntimeContext>) {
        for analyzed in &program.feature_sets {
            aro_dsl::ast::walk_statements(&analyzed.feature_set.statements, &mut |statement| {
                if let Statement::Aro(aro) = statement {
                    let name = aro.object.noun.base();
                    if name.ends_with("-repository") {
                        base.register_repository(name, Arc::new(self.store.clone()));
                    }
                }
            });
        }
    }

    /// Subscribe every handler-style feature set to its event source.
    fn wire_handlers(
        &self,
        program: &AnalyzedProgram,
        executor: &Executor,
        base: &Arc<RuntimeContext>,
    ) {
        for analyzed in &program.feature_sets {
            let feature_set = &analyzed.feature_set;
            let kind = classify_activity(
                &feature_set.name,
                &feature_set.business_activity,
                feature_set.guard_spec.as_deref(),
            );
            let feature_set = Arc::new(feature_set.clone());

            match kind {
                ActivityKind::DomainHandler { tag } => {
                    let handler = self.make_handler(
                        executor,
                        feature_set.clone(),
                        base,
                        HandlerBinding::Domain,
                    );
                    self.bus
                        .subscribe(tag, feature_set.guards.clone(), handler);
                }
                ActivityKind::RepositoryObserver { repository } => {
                    let mut guards = feature_set.guards.clone();
                    guards
                        .guards
                        .push(StateGuard::new("repository", vec![repository]));
                    let handler = self.make_handler(
                        executor,
                        feature_set.clone(),
                        base,
                        HandlerBinding::Repository,
                    );
                    self.bus.subscribe("RepositoryChanged", guards, handler);
                }
                ActivityKind::StateObserver { field, transition } => {
                    let mut guards = StateGuardSet::empty();
                    guards.guards.push(StateGuard::new("fieldName", vec![field]));
                    if let Some((from, to)) = transition {
                        guards.guards.push(StateGuard::new("fromState", vec![from]));
                        guards.guards.push(StateGuard::new("toState", vec![to]));
                    }
                    let handler = self.make_handler(
                        executor,
                        feature_set.clone(),
                        base,
                        HandlerBinding::State,
                    );
                    self.bus.subscribe("StateTransition", guards, handler);
                }
                ActivityKind::FileWatcher { event } => {
                    let tag = match event {
                        FileEvent::Created => "FileCreated",
                        FileEvent::Modified => "FileModified",
                        FileEvent::Deleted => "FileDeleted",
                    };
                    let handler = self.make_handler(
                        executor,
                        feature_set.clone(),
                        base,
                        HandlerBinding::File,
                    );
                    self.bus
                        .subscribe(tag, feature_set.guards.clone(), handler);
                }
                ActivityKind::SocketHandler { event } => {
                    let tag = match event {
                        SocketEvent::ClientConnected => "SocketClientConnected",
                        SocketEvent::DataReceived => "SocketDataReceived",
                        SocketEvent::ClientDisconnected => "SocketClientDisconnected",
                    };
                    let handler = self.make_handler(
                        executor,
                        feature_set.clone(),
                        base,
                        HandlerBinding::Socket,
                    );
                    self.bus
                        .subscribe(tag, feature_set.guards.clone(), handler);
                }
                ActivityKind::Plain | ActivityKind::ApplicationEnd => {}
            }
        }
    }

    /// Wrap a feature set as an event handler: fork a child context,
    /// bind per-event metadata, execute, and isolate failures as
    /// `ErrorOccurred` events.
    fn make_handler(
        &self,
        executor: &Executor,
        feature_set: Arc<FeatureSet>,
        base: &Arc<RuntimeContext>,
        binding: HandlerBinding,
    ) -> EventHandler {
        let executor = executor.clone();
        let base = base.clone();
        let bus = self.bus.clone();

        Arc::new(move |event: Event| {
            let executor = executor.clone();
            let feature_set = feature_set.clone();
            let base = base.clone();
            let bus = bus.clone();

            Box::pin(async move {
                let ctx = Arc::new(base.child(
                    feature_set.name.clone(),
                    feature_set.business_activity.clone(),
                ));
                bind_event_metadata(&ctx, &event, binding);

                if let Err(error) = executor.execute_feature_set(&feature_set, ctx).await {
                    tracing::error!(
                        feature_set = %feature_set.name,
                        error = %error,
                        "event handler failed"
                    );
                    // Tracked so quiescence covers error observers too.
                    bus.publish_and_track(Event::new(EventKind::ErrorOccurred {
                        message: error.to_string(),
                        recoverable: true,
                    }));
                }
            })
        })
    }

    /// Run the Application-End feature set matching the outcome, with a
    /// `shutdown` binding. Failures are logged, never propagated.
    async fn run_application_end(
        &self,
        program: &AnalyzedProgram,
        executor: &Executor,
        base: &Arc<RuntimeContext>,
        response: &Response,
    ) {
        let outcome = if response.is_ok() && base.execution_error().is_none() {
            "Success"
        } else {
            "Error"
        };
        let Some(end) = program.feature_sets.iter().find(|fs| {
            fs.feature_set.name == "Application-End"
                && fs.feature_set.business_activity == outcome
        }) else {
            return;
        };

        let ctx = Arc::new(base.child("Application-End", outcome));
        let code = if outcome == "Success" { 0 } else { 1 };
        let reason = response
            .reason
            .clone()
            .unwrap_or_else(|| response.status.clone());
        ctx.bind(
            "shutdown",
            TypedValue::infer(json!({ "reason": reason, "code": code })),
            true,
        );

        if let Err(error) = executor
            .execute_feature_set(&end.feature_set, ctx)
            .await
        {
            tracing::error!(error = %error, "Application-End handler failed");
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Bind per-event metadata into a handler's child context.
fn bind_event_metadata(ctx: &Arc<RuntimeContext>, event: &Event, binding: HandlerBinding) {
    let payload = event.payload();
    ctx.bind("event", TypedValue::infer(payload.clone()), true);

    match binding {
        HandlerBinding::Repository => {
            ctx.bind("change", TypedValue::infer(payload.clone()), true);
        }
        HandlerBinding::State => {
            ctx.bind("transition", TypedValue::infer(payload.clone()), true);
        }
        HandlerBinding::Socket => {
            if let Some(connection) = payload.get("connection") {
                ctx.bind("connection", TypedValue::infer(connection.clone()), true);
            }
            if let Some(packet) = payload.get("packet") {
                ctx.bind("packet", TypedValue::infer(packet.clone()), true);
            }
        }
        HandlerBinding::Domain | HandlerBinding::File => {}
    }

    // Payload fields are addressable both as `event:field` and directly.
    if let Some(fields) = payload.as_object() {
        for (key, value) in fields {
            ctx.bind(
                &format!("event:{}", key),
                TypedValue::infer(value.clone()),
                true,
            );
            ctx.bind(key, TypedValue::infer(value.clone()), true);
        }
    }
}

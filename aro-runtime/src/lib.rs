//! ARO Runtime - Interpreter
//!
//! Executes analyzed ARO programs: expression evaluation, action
//! dispatch, feature-set execution, handler wiring, and the engine
//! entry point.
//!
//! ```no_run
//! use aro_dsl::compile;
//! use aro_runtime::Engine;
//!
//! # async fn run() {
//! let result = compile("(Sum: Math) { <Compute> the <sum> from <3> + <4>. <Return> an <OK> with <sum>. }");
//! assert!(result.is_success());
//! let engine = Engine::new();
//! let response = engine.execute(&result.program, "Sum").await;
//! assert_eq!(response.status, "OK");
//! # }
//! ```

pub mod actions;
pub mod engine;
pub mod eval;
pub mod executor;
pub mod published;
pub mod services;

pub use actions::{Action, ActionRegistry, Descriptor, Invocation};
pub use engine::{Engine, DEFAULT_ENTRY_POINT};
pub use eval::evaluate;
pub use executor::Executor;
pub use published::{PublishedRegistry, PublishedValue};
pub use services::{
    register_defaults, CounterMetrics, StaticOpenApiSpec, StdFileSystem, SystemDateService,
    TracingLogger,
};

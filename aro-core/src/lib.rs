//! ARO Core - Shared Types
//!
//! Core types used across the ARO compiler and runtime: source spans,
//! typed values, diagnostics, event records, state guards, responses,
//! and the runtime error taxonomy.

pub mod diagnostics;
pub mod error;
pub mod event;
pub mod guard;
pub mod response;
pub mod span;
pub mod value;

pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{ActionError, AroError, AroResult, EngineError, ExpressionError, RepositoryError};
pub use event::{Event, EventKind, RepositoryChangeType};
pub use guard::{StateGuard, StateGuardSet};
pub use response::{OutputContext, Response};
pub use span::SourceSpan;
pub use value::{DataType, TypedValue};

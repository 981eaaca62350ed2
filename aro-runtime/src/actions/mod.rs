//! Action dispatch
//!
//! An action is a verb set with a semantic role and an async entry.
//! Invocation passes compact descriptors (base, specifiers, preposition,
//! span) rather than raw AST nodes. The registry is populated at startup
//! and read-only afterwards.

mod builtin;

pub use builtin::register_builtins;

use crate::eval;
use crate::published::PublishedRegistry;
use aro_context::RuntimeContext;
use aro_core::{ActionError, SourceSpan, TypedValue};
use aro_dsl::ast::{ActionRole, QualifiedNoun, QueryModifiers, RangeModifiers};
use aro_dsl::Preposition;
use aro_events::EventBus;
use aro_storage::RepositoryStore;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// DESCRIPTORS
// ============================================================================

/// Compact view of a result or object noun handed to actions.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub base: String,
    pub specifiers: Vec<String>,
    pub preposition: Option<Preposition>,
    pub span: SourceSpan,
}

impl Descriptor {
    pub fn from_noun(noun: &QualifiedNoun, preposition: Option<Preposition>) -> Self {
        Self {
            base: noun.base().to_string(),
            specifiers: noun.specifiers(),
            preposition,
            span: noun.span,
        }
    }

    /// The specifier path below the base name.
    pub fn path(&self) -> &[String] {
        if self.specifiers.len() > 1 {
            &self.specifiers[1..]
        } else {
            &[]
        }
    }
}

/// Everything an action receives for one statement.
pub struct Invocation<'a> {
    pub verb: String,
    pub result: Descriptor,
    pub object: Descriptor,
    /// The statement's evaluated value source, if it had one.
    pub value: Option<TypedValue>,
    pub query: &'a QueryModifiers,
    pub range: &'a RangeModifiers,
    pub ctx: &'a Arc<RuntimeContext>,
    pub bus: &'a EventBus,
    pub store: &'a RepositoryStore,
    pub published: &'a PublishedRegistry,
}

impl Invocation<'_> {
    /// Resolve a descriptor to a value: context first, then the
    /// activity-gated published registry, then specifier navigation.
    pub fn resolve_descriptor(&self, descriptor: &Descriptor) -> Result<TypedValue, ActionError> {
        let base = self
            .ctx
            .resolve_typed(&descriptor.base)
            .or_else(|| {
                self.published
                    .lookup(&descriptor.base, &self.ctx.business_activity)
            })
            .ok_or_else(|| ActionError::MissingVariable {
                name: descriptor.base.clone(),
            })?;
        eval::navigate_path(&base, descriptor.path()).map_err(ActionError::from)
    }

    /// The statement's source value: evaluated value source if present,
    /// otherwise the resolved object.
    pub fn source_value(&self) -> Result<TypedValue, ActionError> {
        if let Some(value) = &self.value {
            return Ok(value.clone());
        }
        self.resolve_descriptor(&self.object)
    }
}

// ============================================================================
// ACTION TRAIT + REGISTRY
// ============================================================================

/// A verb implementation.
#[async_trait]
pub trait Action: Send + Sync {
    /// The verbs this action answers to (lowercase).
    fn verbs(&self) -> &'static [&'static str];

    /// Accepted object prepositions; empty means any.
    fn valid_prepositions(&self) -> &'static [Preposition] {
        &[]
    }

    fn role(&self) -> ActionRole;

    async fn execute(&self, invocation: &Invocation<'_>) -> Result<Value, ActionError>;
}

/// Lowercased verb → action. Registration is startup-only; resolution
/// afterwards is read-only.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the built-in actions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry);
        registry
    }

    /// Register an action under each of its verbs. Later registrations
    /// override earlier ones, so embedders can replace built-ins.
    pub fn register(&mut self, action: Arc<dyn Action>) {
        for verb in action.verbs() {
            self.actions.insert(verb.to_lowercase(), action.clone());
        }
    }

    pub fn resolve(&self, verb: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(&verb.to_lowercase()).cloned()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_covers_the_verb_surface() {
        let registry = ActionRegistry::with_builtins();
        for verb in [
            "extract", "parse", "retrieve", "read", "request", "fetch", "compute", "calculate",
            "derive", "transform", "map", "filter", "reduce", "validate", "create", "format",
            "store", "update", "delete", "accept", "set", "modify", "change", "return", "throw",
            "log", "emit", "send", "publish",
        ] {
            assert!(registry.resolve(verb).is_some(), "missing verb {}", verb);
        }
    }

    #[test]
    fn resolution_is_case_insensitive() {
        let registry = ActionRegistry::with_builtins();
        assert!(registry.resolve("Compute").is_some());
        assert!(registry.resolve("RETURN").is_some());
        assert!(registry.resolve("unknown-verb").is_none());
    }
}

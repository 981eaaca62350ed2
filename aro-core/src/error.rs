//! Runtime error taxonomy
//!
//! Compile-phase problems go through [`crate::diagnostics::Diagnostics`];
//! these types cover the interpreter side. An action or expression failure
//! inside a feature set is wrapped into an [`AroError`] carrying the full
//! statement context before it surfaces as a Response.

use crate::response::Response;
use crate::value::TypedValue;
use std::collections::BTreeMap;
use thiserror::Error;

/// Expression evaluation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    #[error("Undefined variable: {name}")]
    UndefinedVariable { name: String },

    #[error("Undefined member {member} on {subject}")]
    UndefinedMember { subject: String, member: String },

    #[error("Type mismatch: {operation} not supported for {left} and {right}")]
    TypeMismatch {
        operation: String,
        left: String,
        right: String,
    },

    #[error("Index {index} out of bounds for list of length {length}")]
    IndexOutOfBounds { index: usize, length: usize },

    #[error("Invalid regex pattern: {reason}")]
    InvalidPattern { reason: String },

    #[error("Unsupported expression: {reason}")]
    Unsupported { reason: String },
}

/// Repository storage errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RepositoryError {
    #[error("Repository name must end with -repository: {name}")]
    InvalidName { name: String },

    #[error("Repository not found: {name}")]
    NotFound { name: String },

    #[error("Invalid id type in {repository}: expected string or number, got {found}")]
    InvalidIdType { repository: String, found: String },
}

/// Action dispatch and execution errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActionError {
    #[error("Unknown action verb: {verb}")]
    UnknownVerb { verb: String },

    #[error("Missing required variable: {name}")]
    MissingVariable { name: String },

    #[error("Action {verb} does not accept preposition {preposition}")]
    InvalidPreposition { verb: String, preposition: String },

    #[error("Repository not found: {name}")]
    RepositoryNotFound { name: String },

    #[error("Service not registered: {service}")]
    ServiceNotRegistered { service: String },

    #[error("Feature set not found: {name}")]
    FeatureSetNotFound { name: String },

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Runtime state error: {reason}")]
    State { reason: String },
}

/// An action failure enriched with the statement that caused it.
///
/// Rendered as the template derived from the source statement:
/// `Cannot <verb> the <result> <preposition> the <object>`.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{}", self.render())]
pub struct AroError {
    pub verb: String,
    pub result_name: String,
    pub preposition: String,
    pub object_name: String,
    pub when_clause: Option<String>,
    pub feature_set: String,
    /// Resolved string forms of the statement's variables.
    pub variables: BTreeMap<String, String>,
    pub cause: ActionError,
}

impl AroError {
    fn render(&self) -> String {
        let mut out = format!(
            "Cannot {} the {} {} the {}",
            self.verb, self.result_name, self.preposition, self.object_name
        );
        if let Some(when) = &self.when_clause {
            out.push_str(&format!(" when {}", when));
        }
        out.push_str(&format!(" (in {}): {}", self.feature_set, self.cause));
        for (name, value) in &self.variables {
            out.push_str(&format!("\n  {} = {}", name, value));
        }
        out
    }

    /// Convert into the error Response a feature set surfaces.
    pub fn into_response(self) -> Response {
        let status = match &self.cause {
            ActionError::UnknownVerb { .. } => "UnknownAction",
            ActionError::MissingVariable { .. }
            | ActionError::Expression(ExpressionError::UndefinedVariable { .. }) => {
                "MissingVariable"
            }
            ActionError::RepositoryNotFound { .. }
            | ActionError::Repository(RepositoryError::NotFound { .. }) => "RepositoryNotFound",
            ActionError::FeatureSetNotFound { .. } => "NotFound",
            _ => "Error",
        };
        let mut response = Response::error(status, self.to_string());
        for (name, value) in &self.variables {
            response = response.with_data(name.clone(), TypedValue::string(value.clone()));
        }
        response
    }
}

/// Engine-level failures surfaced to the caller of `execute`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("Entry point not found: {name}")]
    EntryPointNotFound { name: String },

    #[error("Statement failed: {0}")]
    Statement(#[from] AroError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    /// Not a failure; the engine was asked to stop.
    #[error("Shutdown requested")]
    Shutdown,
}

/// Result alias for ARO runtime operations.
pub type AroResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aro_error_renders_statement_template() {
        let mut variables = BTreeMap::new();
        variables.insert("order".to_string(), "{\"id\":\"1\"}".to_string());
        let err = AroError {
            verb: "Store".to_string(),
            result_name: "order".to_string(),
            preposition: "into".to_string(),
            object_name: "order-repository".to_string(),
            when_clause: None,
            feature_set: "Create Order".to_string(),
            variables,
            cause: ActionError::RepositoryNotFound {
                name: "order-repository".to_string(),
            },
        };
        let text = err.to_string();
        assert!(text.starts_with("Cannot Store the order into the order-repository"));
        assert!(text.contains("Create Order"));
        assert!(text.contains("order = {\"id\":\"1\"}"));
    }

    #[test]
    fn response_status_derives_from_error_kind() {
        let err = AroError {
            verb: "Compute".to_string(),
            result_name: "total".to_string(),
            preposition: "from".to_string(),
            object_name: "_expression_".to_string(),
            when_clause: None,
            feature_set: "Sum".to_string(),
            variables: BTreeMap::new(),
            cause: ActionError::Expression(ExpressionError::UndefinedVariable {
                name: "a".to_string(),
            }),
        };
        assert_eq!(err.into_response().status, "MissingVariable");
    }
}

//! Built-in actions

use super::{Action, ActionRegistry, Invocation};
use crate::eval;
use aro_context::{FileSystemService, HttpClientService, LoggerService, RuntimeContext};
use aro_core::{
    ActionError, Event, EventKind, RepositoryChangeType, Response, TypedValue,
};
use aro_dsl::ast::{ActionRole, Aggregation, BinaryOp, Expression};
use aro_dsl::Preposition;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Register every built-in action.
pub fn register_builtins(registry: &mut ActionRegistry) {
    registry.register(Arc::new(RequestAction));
    registry.register(Arc::new(ComputeAction));
    registry.register(Arc::new(AcceptAction));
    registry.register(Arc::new(StoreAction));
    registry.register(Arc::new(ReturnAction));
    registry.register(Arc::new(ThrowAction));
    registry.register(Arc::new(LogAction));
    registry.register(Arc::new(EmitAction));
    registry.register(Arc::new(PublishAction));
}

// ============================================================================
// REQUEST ROLE
// ============================================================================

/// Extract / Parse / Retrieve / Read / Request / Fetch — pull a sub-path
/// or remote value into the context.
struct RequestAction;

#[async_trait]
impl Action for RequestAction {
    fn verbs(&self) -> &'static [&'static str] {
        &["extract", "parse", "retrieve", "read", "request", "fetch"]
    }

    fn role(&self) -> ActionRole {
        ActionRole::Request
    }

    async fn execute(&self, invocation: &Invocation<'_>) -> Result<Value, ActionError> {
        let verb = invocation.verb.to_lowercase();

        if invocation.object.base.ends_with("-repository") {
            return retrieve_from_repository(invocation).await;
        }

        match verb.as_str() {
            "read" => {
                let path = invocation.source_value()?.to_display_string();
                let fs = invocation
                    .ctx
                    .services()
                    .get::<dyn FileSystemService>()
                    .ok_or_else(|| ActionError::ServiceNotRegistered {
                        service: "FileSystemService".to_string(),
                    })?;
                let contents = fs.read(&path).map_err(|e| ActionError::State {
                    reason: format!("cannot read {}: {}", path, e),
                })?;
                Ok(Value::String(contents))
            }
            "request" | "fetch" => {
                let url = invocation.source_value()?.to_display_string();
                let client = invocation
                    .ctx
                    .services()
                    .get::<dyn HttpClientService>()
                    .ok_or_else(|| ActionError::ServiceNotRegistered {
                        service: "HttpClientService".to_string(),
                    })?;
                client
                    .get(&url)
                    .map_err(|reason| ActionError::State { reason })
            }
            _ => extract_value(invocation),
        }
    }
}

/// Pull the object value, favoring the result name as a field of the
/// object when the object itself carries no path.
fn extract_value(invocation: &Invocation<'_>) -> Result<Value, ActionError> {
    let source = invocation.source_value()?;
    if invocation.object.path().is_empty() && invocation.value.is_none() {
        if let Ok(field) = eval::member_of(&source, &invocation.result.base) {
            return Ok(field.value);
        }
    }
    Ok(source.value)
}

async fn retrieve_from_repository(invocation: &Invocation<'_>) -> Result<Value, ActionError> {
    let repository = &invocation.object.base;
    if !invocation.store.exists(repository).await {
        return Err(ActionError::RepositoryNotFound {
            name: repository.clone(),
        });
    }
    let mut entries = invocation.store.find_all(repository).await?;

    if let Some(where_clause) = &invocation.query.where_clause {
        let mut kept = Vec::new();
        for entry in entries {
            if entry_matches(where_clause, &entry, invocation.ctx)? {
                kept.push(entry);
            }
        }
        entries = kept;
    }

    match invocation.query.aggregation {
        None => Ok(Value::Array(entries)),
        Some(Aggregation::Count) => Ok(json!(entries.len() as i64)),
        Some(aggregation) => {
            let field = invocation.query.group_by.as_deref().ok_or_else(|| {
                ActionError::State {
                    reason: format!("{:?} aggregation needs a 'by' field", aggregation),
                }
            })?;
            aggregate(aggregation, field, &entries)
        }
    }
}

/// Evaluate a where-clause against one entry: the entry and its fields
/// are bound into a scratch child context.
fn entry_matches(
    where_clause: &Expression,
    entry: &Value,
    ctx: &Arc<RuntimeContext>,
) -> Result<bool, ActionError> {
    let scratch = Arc::new(ctx.child(ctx.feature_set_name.clone(), ctx.business_activity.clone()));
    scratch.bind("entry", TypedValue::infer(entry.clone()), true);
    if let Some(fields) = entry.as_object() {
        for (key, value) in fields {
            scratch.bind(key, TypedValue::infer(value.clone()), true);
        }
    }
    Ok(eval::evaluate(where_clause, &scratch)?.is_truthy())
}

fn aggregate(
    aggregation: Aggregation,
    field: &str,
    entries: &[Value],
) -> Result<Value, ActionError> {
    let numbers: Vec<f64> = entries
        .iter()
        .filter_map(|entry| entry.get(field).and_then(|v| v.as_f64()))
        .collect();
    if numbers.is_empty() {
        return Ok(Value::Null);
    }
    let result = match aggregation {
        Aggregation::Sum => numbers.iter().sum(),
        Aggregation::Average => numbers.iter().sum::<f64>() / numbers.len() as f64,
        Aggregation::Min => numbers.iter().cloned().fold(f64::INFINITY, f64::min),
        Aggregation::Max => numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        Aggregation::Count => unreachable!("count handled by caller"),
    };
    if result.fract() == 0.0 && result.abs() < i64::MAX as f64 {
        Ok(json!(result as i64))
    } else {
        Ok(json!(result))
    }
}

// ============================================================================
// OWN ROLE
// ============================================================================

/// Compute / Calculate / Derive / Transform / Map / Filter / Reduce /
/// Validate / Create / Format — pure computation over the value source
/// or specifier path.
struct ComputeAction;

#[async_trait]
impl Action for ComputeAction {
    fn verbs(&self) -> &'static [&'static str] {
        &[
            "compute",
            "calculate",
            "derive",
            "transform",
            "map",
            "filter",
            "reduce",
            "validate",
            "create",
            "format",
        ]
    }

    fn role(&self) -> ActionRole {
        ActionRole::Own
    }

    async fn execute(&self, invocation: &Invocation<'_>) -> Result<Value, ActionError> {
        let source = invocation.source_value()?;

        match invocation.verb.to_lowercase().as_str() {
            "validate" => {
                if source.is_truthy() {
                    Ok(source.value)
                } else {
                    Err(ActionError::State {
                        reason: format!("validation failed for {}", invocation.object.base),
                    })
                }
            }
            "filter" => {
                // Filter a list by the where-clause.
                let Some(items) = source.value.as_array() else {
                    return Ok(source.value);
                };
                let Some(where_clause) = &invocation.query.where_clause else {
                    return Ok(source.value.clone());
                };
                let mut kept = Vec::new();
                for item in items {
                    if entry_matches(where_clause, item, invocation.ctx)? {
                        kept.push(item.clone());
                    }
                }
                Ok(Value::Array(kept))
            }
            _ => Ok(source.value),
        }
    }
}

/// Accept / Set / Modify / Change — rebind-allowed assignment; a change
/// to a state field additionally emits `StateTransition`.
struct AcceptAction;

#[async_trait]
impl Action for AcceptAction {
    fn verbs(&self) -> &'static [&'static str] {
        &["accept", "set", "modify", "change"]
    }

    fn role(&self) -> ActionRole {
        ActionRole::Own
    }

    async fn execute(&self, invocation: &Invocation<'_>) -> Result<Value, ActionError> {
        let new_value = invocation.source_value()?;

        // Plain assignment when the result carries no field path.
        if invocation.result.path().is_empty() {
            return Ok(new_value.value);
        }

        // `<Accept> the <order.status> to "paid".` — update the field,
        // detect the transition.
        let entity_name = invocation.result.base.clone();
        let entity = invocation
            .ctx
            .resolve_typed(&entity_name)
            .ok_or_else(|| ActionError::MissingVariable {
                name: entity_name.clone(),
            })?;

        let field_path = invocation.result.path().to_vec();
        let old_state = eval::navigate_path(&entity, &field_path)
            .map(|v| v.to_display_string())
            .unwrap_or_default();
        let new_state = new_value.to_display_string();

        let mut updated = entity.value.clone();
        set_path(&mut updated, &field_path, new_value.value.clone()).map_err(|reason| {
            ActionError::State { reason }
        })?;

        if old_state != new_state {
            invocation
                .bus
                .publish_and_track(Event::new(EventKind::StateTransition {
                    field: field_path.join("."),
                    object: entity_name.clone(),
                    from_state: old_state,
                    to_state: new_state,
                    entity_id: entity_id_string(&updated),
                    entity: Some(updated.clone()),
                }));
        }

        Ok(updated)
    }
}

/// Write a value at a dot-path inside a JSON object tree.
fn set_path(target: &mut Value, path: &[String], value: Value) -> Result<(), String> {
    let Some((first, rest)) = path.split_first() else {
        *target = value;
        return Ok(());
    };
    let map = target
        .as_object_mut()
        .ok_or_else(|| format!("cannot set field '{}' on a non-object value", first))?;
    if rest.is_empty() {
        map.insert(first.clone(), value);
        return Ok(());
    }
    let inner = map
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Default::default()));
    set_path(inner, rest, value)
}

fn entity_id_string(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============================================================================
// EXPORT ROLE
// ============================================================================

/// Store / Update / Delete — repository mutations with change events.
struct StoreAction;

#[async_trait]
impl Action for StoreAction {
    fn verbs(&self) -> &'static [&'static str] {
        &["store", "update", "delete"]
    }

    fn valid_prepositions(&self) -> &'static [Preposition] {
        &[Preposition::Into, Preposition::To, Preposition::From]
    }

    fn role(&self) -> ActionRole {
        ActionRole::Export
    }

    async fn execute(&self, invocation: &Invocation<'_>) -> Result<Value, ActionError> {
        let repository = invocation.object.base.clone();

        if invocation.verb.to_lowercase() == "delete" {
            return delete_from_repository(invocation, &repository).await;
        }

        let value = match &invocation.value {
            Some(value) => value.clone(),
            None => invocation.resolve_descriptor(&invocation.result)?,
        };

        let result = invocation.store.store(&repository, value.value).await?;
        if result.changed {
            let change = if result.is_update {
                RepositoryChangeType::Updated
            } else {
                RepositoryChangeType::Created
            };
            invocation
                .bus
                .publish_and_track(Event::new(EventKind::RepositoryChanged {
                    repository: repository.clone(),
                    change,
                    entity_id: result.entity_id.clone(),
                    old_value: result.old_value.clone(),
                    new_value: Some(result.stored.clone()),
                }));
        }
        Ok(result.stored)
    }
}

async fn delete_from_repository(
    invocation: &Invocation<'_>,
    repository: &str,
) -> Result<Value, ActionError> {
    let (field, value) = match &invocation.query.where_clause {
        Some(where_clause) => simple_equality(where_clause, invocation.ctx)?,
        None => {
            let id = invocation
                .value
                .clone()
                .ok_or_else(|| ActionError::State {
                    reason: "delete needs a where clause or an id value".to_string(),
                })?;
            ("id".to_string(), id.value)
        }
    };

    let result = invocation
        .store
        .delete_by_field(repository, &field, &value)
        .await?;

    for deleted in &result.deleted {
        invocation
            .bus
            .publish_and_track(Event::new(EventKind::RepositoryChanged {
                repository: repository.to_string(),
                change: RepositoryChangeType::Deleted,
                entity_id: entity_id_string(deleted),
                old_value: Some(deleted.clone()),
                new_value: None,
            }));
    }
    Ok(Value::Array(result.deleted))
}

/// Destructure `<field> == <value>` out of a where-clause.
fn simple_equality(
    where_clause: &Expression,
    ctx: &Arc<RuntimeContext>,
) -> Result<(String, Value), ActionError> {
    if let Expression::Binary {
        op: BinaryOp::Eq,
        left,
        right,
        ..
    } = where_clause
    {
        if let Expression::Variable { name, .. } = left.as_ref() {
            let value = eval::evaluate(right, ctx)?;
            return Ok((name.clone(), value.value));
        }
    }
    Err(ActionError::State {
        reason: "delete supports only '<field> == <value>' where clauses".to_string(),
    })
}

/// Emit / Send — publish a domain event whose tag is the result name.
struct EmitAction;

#[async_trait]
impl Action for EmitAction {
    fn verbs(&self) -> &'static [&'static str] {
        &["emit", "send"]
    }

    fn valid_prepositions(&self) -> &'static [Preposition] {
        &[Preposition::With, Preposition::For, Preposition::To]
    }

    fn role(&self) -> ActionRole {
        ActionRole::Export
    }

    async fn execute(&self, invocation: &Invocation<'_>) -> Result<Value, ActionError> {
        let tag = invocation.result.base.clone();
        let payload = invocation.source_value()?;
        let payload = match payload.value {
            Value::Object(_) => payload.value,
            other => json!({ "value": other }),
        };
        invocation
            .bus
            .publish_and_track(Event::domain(tag, payload.clone()));
        Ok(payload)
    }
}

/// Publish — promote a variable into the global published registry.
struct PublishAction;

#[async_trait]
impl Action for PublishAction {
    fn verbs(&self) -> &'static [&'static str] {
        &["publish"]
    }

    fn role(&self) -> ActionRole {
        ActionRole::Export
    }

    async fn execute(&self, invocation: &Invocation<'_>) -> Result<Value, ActionError> {
        let name = invocation.result.base.clone();
        let value = invocation
            .ctx
            .resolve_typed(&name)
            .or_else(|| invocation.value.clone())
            .ok_or_else(|| ActionError::MissingVariable { name: name.clone() })?;

        invocation.published.publish(
            &name,
            value.clone(),
            invocation.ctx.feature_set_name.clone(),
            invocation.ctx.business_activity.clone(),
        );
        invocation
            .bus
            .publish(Event::new(EventKind::VariablePublished {
                name,
                business_activity: invocation.ctx.business_activity.clone(),
                value: value.value.clone(),
            }));
        Ok(value.value)
    }
}

// ============================================================================
// RESPONSE ROLE
// ============================================================================

/// Return — build the terminal response and set it on the context.
struct ReturnAction;

#[async_trait]
impl Action for ReturnAction {
    fn verbs(&self) -> &'static [&'static str] {
        &["return"]
    }

    fn valid_prepositions(&self) -> &'static [Preposition] {
        &[Preposition::With, Preposition::For]
    }

    fn role(&self) -> ActionRole {
        ActionRole::Response
    }

    async fn execute(&self, invocation: &Invocation<'_>) -> Result<Value, ActionError> {
        let status = invocation.result.base.clone();
        let mut response = Response::new(status);

        if invocation.object.base.starts_with('_') {
            // Literal or expression payload.
            if let Some(value) = &invocation.value {
                match &value.value {
                    Value::String(reason) => response = response.with_reason(reason.clone()),
                    Value::Object(map) => {
                        for (key, entry) in map {
                            response =
                                response.with_data(key.clone(), TypedValue::infer(entry.clone()));
                        }
                    }
                    _ => response = response.with_data("value", value.clone()),
                }
            }
        } else {
            let value = invocation.resolve_descriptor(&invocation.object)?;
            response = response.with_data(invocation.object.base.clone(), value);
        }

        invocation.ctx.set_response(response);
        Ok(Value::Null)
    }
}

/// Throw — serialize an error response and set it on the context.
struct ThrowAction;

#[async_trait]
impl Action for ThrowAction {
    fn verbs(&self) -> &'static [&'static str] {
        &["throw"]
    }

    fn role(&self) -> ActionRole {
        ActionRole::Response
    }

    async fn execute(&self, invocation: &Invocation<'_>) -> Result<Value, ActionError> {
        let status = invocation.result.base.clone();
        let reason = match &invocation.value {
            Some(value) => value.to_display_string(),
            None => invocation
                .resolve_descriptor(&invocation.object)
                .map(|v| v.to_display_string())
                .unwrap_or_else(|_| invocation.object.base.clone()),
        };
        invocation.ctx.set_response(Response::error(status, reason));
        Ok(Value::Null)
    }
}

/// Log — render a message to the output context. Sets no response.
struct LogAction;

#[async_trait]
impl Action for LogAction {
    fn verbs(&self) -> &'static [&'static str] {
        &["log"]
    }

    fn valid_prepositions(&self) -> &'static [Preposition] {
        &[Preposition::To, Preposition::At, Preposition::On]
    }

    fn role(&self) -> ActionRole {
        ActionRole::Response
    }

    async fn execute(&self, invocation: &Invocation<'_>) -> Result<Value, ActionError> {
        let message = match &invocation.value {
            Some(value) => value.to_display_string(),
            None => invocation
                .resolve_descriptor(&invocation.result)
                .map(|v| v.to_display_string())
                .unwrap_or_else(|_| invocation.result.base.clone()),
        };

        let logger = invocation
            .ctx
            .services()
            .get::<dyn LoggerService>()
            .ok_or_else(|| ActionError::ServiceNotRegistered {
                service: "LoggerService".to_string(),
            })?;
        logger.log(invocation.ctx.output_context, &message);
        Ok(Value::Null)
    }
}

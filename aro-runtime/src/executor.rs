//! Feature-set executor
//!
//! Runs a feature set's statements sequentially. Value sources are
//! evaluated and bound under the framework names (`_expression_`,
//! `_literal_`), action failures are wrapped into statement-context
//! errors, and any response set on the context short-circuits the rest
//! of the feature set.

use crate::actions::{ActionRegistry, Descriptor, Invocation};
use crate::eval;
use crate::published::PublishedRegistry;
use aro_context::RuntimeContext;
use aro_core::{ActionError, AroError, Event, EventKind, Response, TypedValue};
use aro_dsl::ast::{
    is_rebinding_verb, ActionRole, AroStatement, Expression, FeatureSet, ForEachLoop,
    InterpolatedPart, MatchStatement, PublishStatement, RequireStatement, Statement, ValueSource,
};
use aro_events::EventBus;
use aro_storage::RepositoryStore;
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Executes feature sets against a shared bus, store, and registry.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<ActionRegistry>,
    bus: EventBus,
    store: RepositoryStore,
    published: Arc<PublishedRegistry>,
}

impl Executor {
    pub fn new(
        registry: Arc<ActionRegistry>,
        bus: EventBus,
        store: RepositoryStore,
        published: Arc<PublishedRegistry>,
    ) -> Self {
        Self {
            registry,
            bus,
            store,
            published,
        }
    }

    /// Execute a feature set to its terminal response.
    ///
    /// An empty feature set returns `Response::ok()`.
    pub async fn execute_feature_set(
        &self,
        feature_set: &FeatureSet,
        ctx: Arc<RuntimeContext>,
    ) -> Result<Response, AroError> {
        // Cross-feature-set symbols visible to this activity become
        // local bindings before the first statement runs.
        for (name, value) in self.published.visible_for(&ctx.business_activity) {
            if !ctx.is_bound_locally(&name) {
                ctx.bind(&name, value, true);
            }
        }

        self.bus.publish(Event::new(EventKind::FeatureSetStarted {
            feature_set: feature_set.name.clone(),
        }));

        let short_circuit = self
            .run_block(&feature_set.statements, &ctx, &feature_set.name)
            .await?;

        self.bus.publish(Event::new(EventKind::FeatureSetCompleted {
            feature_set: feature_set.name.clone(),
        }));

        Ok(short_circuit
            .or_else(|| ctx.get_response())
            .unwrap_or_else(Response::ok))
    }

    /// Run a statement block; returns the response once one is set.
    fn run_block<'a>(
        &'a self,
        statements: &'a [Statement],
        ctx: &'a Arc<RuntimeContext>,
        feature_set: &'a str,
    ) -> BoxFuture<'a, Result<Option<Response>, AroError>> {
        async move {
            for statement in statements {
                match statement {
                    Statement::Aro(aro) => self.execute_aro(aro, ctx, feature_set).await?,
                    Statement::Publish(publish) => {
                        self.execute_publish(publish, ctx, feature_set)?
                    }
                    Statement::Require(require) => {
                        self.execute_require(require, ctx, feature_set)?
                    }
                    Statement::Match(m) => {
                        self.execute_match(m, ctx, feature_set).await?;
                    }
                    Statement::ForEach(f) => {
                        self.execute_for_each(f, ctx, feature_set).await?;
                    }
                }
                if let Some(response) = ctx.get_response() {
                    return Ok(Some(response));
                }
            }
            Ok(None)
        }
        .boxed()
    }

    async fn execute_aro(
        &self,
        statement: &AroStatement,
        ctx: &Arc<RuntimeContext>,
        feature_set: &str,
    ) -> Result<(), AroError> {
        // `when` guard: a falsy guard skips the statement entirely.
        if let Some(guard) = &statement.guard {
            let pass = eval::evaluate(guard, ctx)
                .map_err(|e| self.wrap(statement, ctx, feature_set, e.into()))?;
            if !pass.is_truthy() {
                return Ok(());
            }
        }

        // Evaluate the value source and bind it under its framework name.
        let mut value: Option<TypedValue> = None;
        match &statement.value {
            ValueSource::Expression(expr) | ValueSource::SinkExpression(expr) => {
                let evaluated = eval::evaluate(expr, ctx)
                    .map_err(|e| self.wrap(statement, ctx, feature_set, e.into()))?;
                ctx.bind("_expression_", evaluated.clone(), true);
                value = Some(evaluated);
            }
            ValueSource::Literal(literal) => {
                ctx.bind("_literal_", literal.clone(), true);
                value = Some(literal.clone());
            }
            ValueSource::None => {}
        }

        let role = ActionRole::of_verb(&statement.verb);

        // An expression object binds straight to the result; only
        // response-role actions still dispatch afterwards.
        let expression_object = statement.object.noun.base() == "_expression_";
        if expression_object {
            if let Some(evaluated) = &value {
                self.bind_result(statement, evaluated.clone(), ctx);
            }
            if role != ActionRole::Response {
                return Ok(());
            }
        }

        let action = self.registry.resolve(&statement.verb).ok_or_else(|| {
            self.wrap(
                statement,
                ctx,
                feature_set,
                ActionError::UnknownVerb {
                    verb: statement.verb.clone(),
                },
            )
        })?;

        let accepted = action.valid_prepositions();
        if !accepted.is_empty() && !accepted.contains(&statement.object.preposition) {
            return Err(self.wrap(
                statement,
                ctx,
                feature_set,
                ActionError::InvalidPreposition {
                    verb: statement.verb.clone(),
                    preposition: statement.object.preposition.lexeme().to_string(),
                },
            ));
        }

        let invocation = Invocation {
            verb: statement.verb.clone(),
            result: Descriptor::from_noun(&statement.result, None),
            object: Descriptor::from_noun(
                &statement.object.noun,
                Some(statement.object.preposition),
            ),
            value,
            query: &statement.query,
            range: &statement.range,
            ctx,
            bus: &self.bus,
            store: &self.store,
            published: &self.published,
        };

        let returned = action
            .execute(&invocation)
            .await
            .map_err(|e| self.wrap(statement, ctx, feature_set, e))?;

        if role != ActionRole::Response && !expression_object {
            let typed = match &statement.result.type_annotation {
                Some(annotation) => TypedValue::schema(annotation.clone(), returned),
                None => TypedValue::infer(returned),
            };
            self.bind_result(statement, typed, ctx);
        }
        Ok(())
    }

    /// Bind a statement result under the binding policy: `_` names and
    /// rebinder verbs may replace an existing local binding; any other
    /// already-bound name keeps its value.
    fn bind_result(&self, statement: &AroStatement, value: TypedValue, ctx: &Arc<RuntimeContext>) {
        let name = statement.result.base().to_string();
        if name.starts_with('_') {
            ctx.bind(&name, value, true);
            return;
        }
        if ctx.is_bound_locally(&name) {
            if is_rebinding_verb(&statement.verb) {
                ctx.bind(&name, value, true);
            }
            return;
        }
        ctx.bind(&name, value, false);
    }

    fn execute_publish(
        &self,
        statement: &PublishStatement,
        ctx: &Arc<RuntimeContext>,
        feature_set: &str,
    ) -> Result<(), AroError> {
        let value = ctx.resolve_typed(&statement.name).ok_or_else(|| AroError {
            verb: "Publish".to_string(),
            result_name: statement.name.clone(),
            preposition: "to".to_string(),
            object_name: "registry".to_string(),
            when_clause: None,
            feature_set: feature_set.to_string(),
            variables: BTreeMap::new(),
            cause: ActionError::MissingVariable {
                name: statement.name.clone(),
            },
        })?;

        self.published.publish(
            &statement.name,
            value.clone(),
            ctx.feature_set_name.clone(),
            ctx.business_activity.clone(),
        );
        self.bus.publish(Event::new(EventKind::VariablePublished {
            name: statement.name.clone(),
            business_activity: ctx.business_activity.clone(),
            value: value.value,
        }));
        Ok(())
    }

    fn execute_require(
        &self,
        statement: &RequireStatement,
        ctx: &Arc<RuntimeContext>,
        feature_set: &str,
    ) -> Result<(), AroError> {
        if ctx.is_bound(&statement.name) {
            return Ok(());
        }
        if let Some(value) = self
            .published
            .lookup(&statement.name, &ctx.business_activity)
        {
            ctx.bind(&statement.name, value, true);
            return Ok(());
        }
        Err(AroError {
            verb: "Require".to_string(),
            result_name: statement.name.clone(),
            preposition: "from".to_string(),
            object_name: statement
                .source
                .clone()
                .unwrap_or_else(|| "registry".to_string()),
            when_clause: None,
            feature_set: feature_set.to_string(),
            variables: BTreeMap::new(),
            cause: ActionError::MissingVariable {
                name: statement.name.clone(),
            },
        })
    }

    /// Pattern-match a subject; the first arm whose pattern matches runs
    /// in a child context. Boolean patterns match by truthiness, others
    /// by equality with the subject.
    async fn execute_match(
        &self,
        statement: &MatchStatement,
        ctx: &Arc<RuntimeContext>,
        feature_set: &str,
    ) -> Result<(), AroError> {
        let subject = eval::evaluate(&statement.subject, ctx).map_err(|e| {
            self.wrap_structural("Match", feature_set, e.into())
        })?;

        for arm in &statement.arms {
            let pattern = eval::evaluate(&arm.pattern, ctx)
                .map_err(|e| self.wrap_structural("Match", feature_set, e.into()))?;
            let matched = match &pattern.value {
                Value::Bool(b) => *b,
                _ => eval::values_equal(&subject, &pattern),
            };
            if matched {
                let child = Arc::new(
                    ctx.child(ctx.feature_set_name.clone(), ctx.business_activity.clone()),
                );
                let short = self.run_block(&arm.statements, &child, feature_set).await?;
                if let Some(response) = short.or_else(|| child.get_response()) {
                    ctx.set_response(response);
                }
                return Ok(());
            }
        }

        if let Some(otherwise) = &statement.otherwise {
            let child = Arc::new(
                ctx.child(ctx.feature_set_name.clone(), ctx.business_activity.clone()),
            );
            let short = self.run_block(otherwise, &child, feature_set).await?;
            if let Some(response) = short.or_else(|| child.get_response()) {
                ctx.set_response(response);
            }
        }
        Ok(())
    }

    /// Iterate a list, binding the item immutably in a per-iteration
    /// child context.
    async fn execute_for_each(
        &self,
        statement: &ForEachLoop,
        ctx: &Arc<RuntimeContext>,
        feature_set: &str,
    ) -> Result<(), AroError> {
        let list = eval::evaluate(&statement.list, ctx)
            .map_err(|e| self.wrap_structural("ForEach", feature_set, e.into()))?;
        let Some(items) = list.value.as_array() else {
            return Err(self.wrap_structural(
                "ForEach",
                feature_set,
                ActionError::State {
                    reason: format!("for each needs a list, got {}", list.data_type.tag()),
                },
            ));
        };

        for item in items {
            let child = Arc::new(
                ctx.child(ctx.feature_set_name.clone(), ctx.business_activity.clone()),
            );
            child.bind(&statement.item, TypedValue::infer(item.clone()), false);
            let short = self.run_block(&statement.statements, &child, feature_set).await?;
            if let Some(response) = short.or_else(|| child.get_response()) {
                ctx.set_response(response);
                return Ok(());
            }
        }
        Ok(())
    }

    /// Wrap an action failure with the statement's full context.
    fn wrap(
        &self,
        statement: &AroStatement,
        ctx: &Arc<RuntimeContext>,
        feature_set: &str,
        cause: ActionError,
    ) -> AroError {
        let mut variables = BTreeMap::new();
        for name in [&statement.result.name, &statement.object.noun.name] {
            let base = name.split('.').next().unwrap_or(name);
            if base.starts_with('_') {
                continue;
            }
            let resolved = ctx
                .resolve_typed(base)
                .map(|v| v.to_display_string())
                .unwrap_or_else(|| "<unresolved>".to_string());
            variables.insert(name.clone(), resolved);
        }

        AroError {
            verb: statement.verb.clone(),
            result_name: statement.result.name.clone(),
            preposition: statement.object.preposition.lexeme().to_string(),
            object_name: statement.object.noun.name.clone(),
            when_clause: statement.guard.as_ref().map(describe_expression),
            feature_set: feature_set.to_string(),
            variables,
            cause,
        }
    }

    fn wrap_structural(&self, verb: &str, feature_set: &str, cause: ActionError) -> AroError {
        AroError {
            verb: verb.to_string(),
            result_name: "_statement_".to_string(),
            preposition: "on".to_string(),
            object_name: "_statement_".to_string(),
            when_clause: None,
            feature_set: feature_set.to_string(),
            variables: BTreeMap::new(),
            cause,
        }
    }
}

/// Compact source-like rendering of an expression for error messages.
pub fn describe_expression(expression: &Expression) -> String {
    match expression {
        Expression::Literal(value, _) => value.to_display_string(),
        Expression::Variable { name, .. } => format!("<{}>", name),
        Expression::Array { items, .. } => {
            let inner: Vec<String> = items.iter().map(describe_expression).collect();
            format!("[{}]", inner.join(", "))
        }
        Expression::MapLiteral { entries, .. } => {
            let inner: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}: {}", k, describe_expression(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
        Expression::Binary {
            op, left, right, ..
        } => format!(
            "{} {:?} {}",
            describe_expression(left),
            op,
            describe_expression(right)
        ),
        Expression::Unary { operand, .. } => format!("!{}", describe_expression(operand)),
        Expression::Member { object, member, .. } => {
            format!("{}.{}", describe_expression(object), member)
        }
        Expression::Index { object, index, .. } => format!(
            "{}[{}]",
            describe_expression(object),
            describe_expression(index)
        ),
        Expression::Grouped { inner, .. } => format!("({})", describe_expression(inner)),
        Expression::Exists { name, .. } => format!("<{}> exists", name),
        Expression::TypeCheck { subject, expected, .. } => {
            format!("{} is {}", describe_expression(subject), expected)
        }
        Expression::Interpolated { parts, .. } => {
            let inner: String = parts
                .iter()
                .map(|part| match part {
                    InterpolatedPart::Text(text) => text.clone(),
                    InterpolatedPart::Expression(expr) => {
                        format!("${{{}}}", describe_expression(expr))
                    }
                })
                .collect();
            format!("\"{}\"", inner)
        }
    }
}

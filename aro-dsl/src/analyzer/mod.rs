//! Semantic analyzer
//!
//! Four passes over the parsed feature sets:
//!
//! 1. Symbol tables and per-statement data flow, duplicate-binding and
//!    immutability checks, published-symbol registration.
//! 2. Dependency verification against runtime externals, earlier
//!    statements, and the activity-gated global registry.
//! 3. Event-graph cycle detection over handler feature sets.
//! 4. Orphan-event and unused-binding warnings.

mod symbols;

pub use symbols::{
    AnalyzedFeatureSet, AnalyzedProgram, DataFlowInfo, PublishedSymbol, Symbol, SymbolSource,
    SymbolTable, SymbolVisibility,
};

use crate::activity::{classify_activity, ActivityKind};
use crate::parser::ast::*;
use aro_core::{Diagnostics, SourceSpan};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

/// Names the runtime provides without a binding statement.
static RUNTIME_EXTERNALS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "request",
        "context",
        "now",
        "contract",
        "metrics",
        "environment",
        "http-server",
        "shutdown",
        // Bound per event before a handler runs.
        "event",
        "transition",
        "packet",
        "connection",
        "change",
    ]
    .into_iter()
    .collect()
});

/// Output sinks that are addressable but never bound.
static SINKS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["console", "output", "stdout", "stderr", "log"]
        .into_iter()
        .collect()
});

/// Magic names that shadow user bindings at run time.
const MAGIC_NAMES: [&str; 4] = ["now", "contract", "http-server", "metrics"];

/// Run all analysis passes over a parsed program.
pub fn analyze(program: &Program) -> (AnalyzedProgram, Diagnostics) {
    let mut diagnostics = Diagnostics::new();

    // Pass 1: symbol tables, data flow, published registration.
    let mut analyzed = Vec::new();
    let mut published: HashMap<String, PublishedSymbol> = HashMap::new();
    let mut all_inputs_per_fs: Vec<HashSet<String>> = Vec::new();

    for feature_set in &program.feature_sets {
        let mut pass = SymbolPass {
            table: SymbolTable::new(),
            data_flow: Vec::new(),
            all_inputs: HashSet::new(),
            published_names: HashSet::new(),
            diagnostics: &mut diagnostics,
            feature_set,
            global: &mut published,
        };
        pass.run();
        let SymbolPass {
            table,
            data_flow,
            all_inputs,
            published_names,
            ..
        } = pass;
        all_inputs_per_fs.push(all_inputs);
        analyzed.push(AnalyzedFeatureSet {
            feature_set: feature_set.clone(),
            symbols: table,
            data_flow,
            external_dependencies: HashSet::new(),
            published: published_names,
        });
    }

    // Pass 2: dependency verification.
    for analyzed_fs in &mut analyzed {
        let mut pass = DependencyPass {
            defined: HashSet::new(),
            dependencies: HashSet::new(),
            diagnostics: &mut diagnostics,
            activity: analyzed_fs.feature_set.business_activity.clone(),
            global: &published,
        };
        pass.check_statements(&analyzed_fs.feature_set.statements);
        analyzed_fs.external_dependencies = pass.dependencies;
    }

    // Pass 3: event-graph cycles.
    detect_event_cycles(program, &mut diagnostics);

    // Pass 4: orphan events and unused bindings.
    warn_orphan_events(program, &mut diagnostics);
    for (analyzed_fs, all_inputs) in analyzed.iter().zip(&all_inputs_per_fs) {
        warn_unused(analyzed_fs, all_inputs, &mut diagnostics);
    }

    (
        AnalyzedProgram {
            feature_sets: analyzed,
            published,
        },
        diagnostics,
    )
}

// ============================================================================
// PASS 1: SYMBOLS + DATA FLOW
// ============================================================================

struct SymbolPass<'a> {
    table: SymbolTable,
    data_flow: Vec<DataFlowInfo>,
    all_inputs: HashSet<String>,
    published_names: HashSet<String>,
    diagnostics: &'a mut Diagnostics,
    feature_set: &'a FeatureSet,
    global: &'a mut HashMap<String, PublishedSymbol>,
}

impl SymbolPass<'_> {
    fn run(&mut self) {
        let feature_set = self.feature_set;
        for statement in &feature_set.statements {
            let flow = self.analyze_statement(statement, true);
            self.all_inputs.extend(flow.inputs.iter().cloned());
            self.data_flow.push(flow);
        }
    }

    fn analyze_statement(&mut self, statement: &Statement, top_level: bool) -> DataFlowInfo {
        match statement {
            Statement::Aro(aro) => self.analyze_aro(aro),
            Statement::Publish(publish) => self.analyze_publish(publish),
            Statement::Require(require) => self.analyze_require(require),
            Statement::Match(m) => self.analyze_match(m, top_level),
            Statement::ForEach(f) => self.analyze_for_each(f, top_level),
        }
    }

    fn analyze_aro(&mut self, aro: &AroStatement) -> DataFlowInfo {
        let role = ActionRole::of_verb(&aro.verb);
        let result_base = aro.result.base().to_string();
        let object_base = aro.object.noun.base().to_string();

        let mut flow = DataFlowInfo::default();

        if !object_base.starts_with('_') {
            flow.inputs.push(object_base.clone());
        }
        for expr in statement_expressions(aro) {
            for name in expr.referenced_variables() {
                if !name.starts_with('_') {
                    flow.inputs.push(name);
                }
            }
        }

        match role {
            ActionRole::Request | ActionRole::Own => {
                if !result_base.starts_with('_') {
                    self.bind_output(&aro.verb, &result_base, aro.span);
                    flow.outputs.push(result_base);
                }
            }
            ActionRole::Export => {
                let verb = aro.verb.to_lowercase();
                let side_effect = match verb.as_str() {
                    "store" | "update" | "delete" => format!("export-{}", object_base),
                    "emit" | "send" => format!("emit-{}", result_base),
                    _ => format!("export-{}", result_base),
                };
                flow.side_effects.push(side_effect);

                if matches!(verb.as_str(), "store" | "update" | "delete") {
                    if self.table.contains(&result_base) {
                        // The stored value is consumed, not re-bound.
                        flow.inputs.push(result_base.clone());
                    } else if !result_base.starts_with('_') {
                        self.bind_output(&aro.verb, &result_base, aro.span);
                        flow.outputs.push(result_base.clone());
                    }
                }

                // The Publish verb registers its variable globally, the
                // same way the publish statement form does.
                if verb == "publish" && self.table.contains(&result_base) {
                    if let Some(symbol) = self.table.get_mut(&result_base) {
                        symbol.visibility = SymbolVisibility::Published;
                    }
                    flow.inputs.push(result_base.clone());
                    self.published_names.insert(result_base.clone());
                    self.global.insert(
                        result_base.clone(),
                        PublishedSymbol {
                            value_source: result_base.clone(),
                            feature_set: self.feature_set.name.clone(),
                            business_activity: self.feature_set.business_activity.clone(),
                        },
                    );
                }
            }
            ActionRole::Response => {
                flow.side_effects.push("response".to_string());
            }
        }

        self.warn_magic_shadow(&flow.outputs, aro.span);
        flow
    }

    fn analyze_publish(&mut self, publish: &PublishStatement) -> DataFlowInfo {
        let mut flow = DataFlowInfo::default();
        flow.inputs.push(publish.name.clone());
        flow.side_effects.push(format!("publish-{}", publish.name));

        match self.table.get_mut(&publish.name) {
            Some(symbol) => {
                symbol.visibility = SymbolVisibility::Published;
                self.published_names.insert(publish.name.clone());
                self.global.insert(
                    publish.name.clone(),
                    PublishedSymbol {
                        value_source: publish.name.clone(),
                        feature_set: self.feature_set.name.clone(),
                        business_activity: self.feature_set.business_activity.clone(),
                    },
                );
            }
            None => {
                self.diagnostics.error(
                    format!("Cannot publish undefined variable '{}'", publish.name),
                    publish.span,
                );
            }
        }
        flow
    }

    fn analyze_require(&mut self, require: &RequireStatement) -> DataFlowInfo {
        if !self.table.contains(&require.name) {
            self.table.insert(Symbol {
                name: require.name.clone(),
                visibility: SymbolVisibility::External,
                source: SymbolSource::External,
                span: require.span,
                rebinder_origin: false,
            });
        }
        DataFlowInfo {
            inputs: vec![require.name.clone()],
            outputs: Vec::new(),
            side_effects: Vec::new(),
        }
    }

    fn analyze_match(&mut self, m: &MatchStatement, _top_level: bool) -> DataFlowInfo {
        let mut flow = DataFlowInfo::default();
        for name in m.subject.referenced_variables() {
            if !name.starts_with('_') {
                flow.inputs.push(name);
            }
        }
        for arm in &m.arms {
            for name in arm.pattern.referenced_variables() {
                if !name.starts_with('_') {
                    flow.inputs.push(name);
                }
            }
            for statement in &arm.statements {
                let inner = self.analyze_statement(statement, false);
                flow.inputs
                    .extend(inner.inputs.into_iter().filter(|n| !n.starts_with('_')));
                flow.side_effects.extend(inner.side_effects);
            }
        }
        if let Some(otherwise) = &m.otherwise {
            for statement in otherwise {
                let inner = self.analyze_statement(statement, false);
                flow.inputs
                    .extend(inner.inputs.into_iter().filter(|n| !n.starts_with('_')));
                flow.side_effects.extend(inner.side_effects);
            }
        }
        flow
    }

    fn analyze_for_each(&mut self, f: &ForEachLoop, _top_level: bool) -> DataFlowInfo {
        let mut flow = DataFlowInfo::default();
        for name in f.list.referenced_variables() {
            if !name.starts_with('_') {
                flow.inputs.push(name);
            }
        }

        // The loop item lives in a per-iteration child scope.
        let had_item = self.table.contains(&f.item);
        if !had_item {
            self.table.insert(Symbol {
                name: f.item.clone(),
                visibility: SymbolVisibility::Internal,
                source: SymbolSource::Alias,
                span: f.span,
                rebinder_origin: false,
            });
        }

        for statement in &f.statements {
            let inner = self.analyze_statement(statement, false);
            flow.inputs.extend(
                inner
                    .inputs
                    .into_iter()
                    .filter(|n| !n.starts_with('_') && n != &f.item),
            );
            flow.side_effects.extend(inner.side_effects);
        }
        flow
    }

    /// Bind a statement output, enforcing the immutability policy.
    fn bind_output(&mut self, verb: &str, name: &str, span: SourceSpan) {
        if let Some(existing) = self.table.get(name) {
            let allowed = is_rebinding_verb(verb) && !existing.rebinder_origin;
            if !allowed {
                self.diagnostics.error(
                    format!("Cannot rebind immutable variable '{}'", name),
                    span,
                );
                return;
            }
            let rebinder = is_rebinding_verb(verb);
            if let Some(symbol) = self.table.get_mut(name) {
                symbol.rebinder_origin = rebinder;
                symbol.span = span;
            }
            return;
        }
        self.table.insert(Symbol {
            name: name.to_string(),
            visibility: SymbolVisibility::Internal,
            source: SymbolSource::Statement,
            span,
            rebinder_origin: is_rebinding_verb(verb),
        });
    }

    fn warn_magic_shadow(&mut self, outputs: &[String], span: SourceSpan) {
        for name in outputs {
            if MAGIC_NAMES.contains(&name.to_lowercase().as_str()) {
                self.diagnostics.warning(
                    format!("Binding '{}' shadows a runtime-provided value", name),
                    span,
                );
            }
        }
    }
}

/// All expressions attached to a statement, in evaluation order.
fn statement_expressions(aro: &AroStatement) -> Vec<&Expression> {
    let mut expressions = Vec::new();
    match &aro.value {
        ValueSource::Expression(e) | ValueSource::SinkExpression(e) => expressions.push(e),
        ValueSource::None | ValueSource::Literal(_) => {}
    }
    if let Some(e) = &aro.query.where_clause {
        expressions.push(e);
    }
    if let Some(e) = &aro.guard {
        expressions.push(e);
    }
    if let Some(e) = &aro.range.to {
        expressions.push(e);
    }
    if let Some(e) = &aro.range.with {
        expressions.push(e);
    }
    expressions
}

// ============================================================================
// PASS 2: DEPENDENCY VERIFICATION
// ============================================================================

struct DependencyPass<'a> {
    defined: HashSet<String>,
    dependencies: HashSet<String>,
    diagnostics: &'a mut Diagnostics,
    activity: String,
    global: &'a HashMap<String, PublishedSymbol>,
}

impl DependencyPass<'_> {
    fn check_statements(&mut self, statements: &[Statement]) {
        for statement in statements {
            self.check_statement(statement);
        }
    }

    fn check_statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Aro(aro) => self.check_aro(aro),
            Statement::Publish(_) => {}
            Statement::Require(require) => {
                self.check_symbol(&require.name, require.span);
                self.defined.insert(require.name.clone());
            }
            Statement::Match(m) => {
                for name in m.subject.referenced_variables() {
                    self.check_symbol(&name, m.span);
                }
                let saved = self.defined.clone();
                for arm in &m.arms {
                    for name in arm.pattern.referenced_variables() {
                        self.check_symbol(&name, arm.span);
                    }
                    self.check_statements(&arm.statements);
                    self.defined = saved.clone();
                }
                if let Some(otherwise) = &m.otherwise {
                    self.check_statements(otherwise);
                    self.defined = saved;
                }
            }
            Statement::ForEach(f) => {
                for name in f.list.referenced_variables() {
                    self.check_symbol(&name, f.span);
                }
                let saved = self.defined.clone();
                self.defined.insert(f.item.clone());
                self.check_statements(&f.statements);
                self.defined = saved;
            }
        }
    }

    fn check_aro(&mut self, aro: &AroStatement) {
        let role = ActionRole::of_verb(&aro.verb);
        let object_base = aro.object.noun.base().to_string();

        // Request objects name external sources; repositories and sinks
        // are resources, not symbols.
        let object_is_resource = role == ActionRole::Request
            || object_base.ends_with("-repository")
            || SINKS.contains(object_base.to_lowercase().as_str());
        if !object_base.starts_with('_') && !object_is_resource {
            self.check_symbol(&object_base, aro.span);
        }

        // Where-clauses bind the fields of each filtered entry, so their
        // variables are not context symbols.
        let mut expressions: Vec<&Expression> = Vec::new();
        match &aro.value {
            ValueSource::Expression(e) | ValueSource::SinkExpression(e) => expressions.push(e),
            ValueSource::None | ValueSource::Literal(_) => {}
        }
        expressions.extend(aro.guard.iter());
        expressions.extend(aro.range.to.iter());
        expressions.extend(aro.range.with.iter());

        for expr in expressions {
            for name in expr.referenced_variables() {
                if !name.starts_with('_') && !name.ends_with("-repository") {
                    self.check_symbol(&name, expr.span());
                }
            }
        }

        // The stored value of an export must already exist.
        let verb = aro.verb.to_lowercase();
        if matches!(verb.as_str(), "store" | "update")
            && !aro.result.base().starts_with('_')
            && !matches!(aro.value, ValueSource::Expression(_) | ValueSource::Literal(_))
        {
            self.check_symbol(aro.result.base(), aro.span);
        }

        // Register outputs for later statements.
        match role {
            ActionRole::Request | ActionRole::Own => {
                self.defined.insert(aro.result.base().to_string());
            }
            ActionRole::Export => {
                self.defined.insert(aro.result.base().to_string());
            }
            ActionRole::Response => {}
        }
    }

    fn check_symbol(&mut self, name: &str, span: SourceSpan) {
        if name.starts_with('_') || self.defined.contains(name) {
            return;
        }
        if RUNTIME_EXTERNALS.contains(name.to_lowercase().as_str()) {
            return;
        }
        match self.global.get(name) {
            Some(symbol) => {
                if !symbol.business_activity.is_empty()
                    && !self.activity.is_empty()
                    && symbol.business_activity != self.activity
                {
                    self.diagnostics.error(
                        format!(
                            "Cannot access '{}': published by '{}' under a different business activity ('{}')",
                            name, symbol.feature_set, symbol.business_activity
                        ),
                        span,
                    );
                } else {
                    self.dependencies.insert(name.to_string());
                    self.defined.insert(name.to_string());
                }
            }
            None => {
                self.diagnostics
                    .error(format!("Unknown symbol '{}'", name), span);
            }
        }
    }
}

// ============================================================================
// PASS 3: EVENT-GRAPH CYCLES
// ============================================================================

/// Tags emitted by a list of statements (`Emit`/`Send` results).
fn emitted_tags(statements: &[Statement]) -> Vec<String> {
    let mut tags = Vec::new();
    walk_statements(statements, &mut |statement| {
        if let Statement::Aro(aro) = statement {
            let verb = aro.verb.to_lowercase();
            if verb == "emit" || verb == "send" {
                tags.push(aro.result.base().to_string());
            }
        }
    });
    tags
}

fn detect_event_cycles(program: &Program, diagnostics: &mut Diagnostics) {
    // tag -> (handler span, tags its handlers emit)
    let mut graph: HashMap<String, (SourceSpan, Vec<String>)> = HashMap::new();

    for feature_set in &program.feature_sets {
        let kind = classify_activity(
            &feature_set.name,
            &feature_set.business_activity,
            feature_set.guard_spec.as_deref(),
        );
        if let ActivityKind::DomainHandler { tag } = kind {
            let entry = graph
                .entry(tag)
                .or_insert_with(|| (feature_set.span, Vec::new()));
            entry.1.extend(emitted_tags(&feature_set.statements));
        }
    }

    // Sorted start order keeps cycle reports deterministic.
    let mut starts: Vec<String> = graph.keys().cloned().collect();
    starts.sort();

    let mut reported: HashSet<Vec<String>> = HashSet::new();
    for start in &starts {
        let mut stack = Vec::new();
        let mut visited = HashSet::new();
        find_cycle(start, &graph, &mut stack, &mut visited, &mut reported, diagnostics);
    }
}

fn find_cycle(
    tag: &str,
    graph: &HashMap<String, (SourceSpan, Vec<String>)>,
    stack: &mut Vec<String>,
    visited: &mut HashSet<String>,
    reported: &mut HashSet<Vec<String>>,
    diagnostics: &mut Diagnostics,
) {
    if let Some(position) = stack.iter().position(|t| t == tag) {
        let mut cycle: Vec<String> = stack[position..].to_vec();
        cycle.push(tag.to_string());

        // Report each distinct cycle once, regardless of entry point.
        let mut canonical: Vec<String> = stack[position..].to_vec();
        canonical.sort();
        if reported.insert(canonical) {
            let span = graph.get(tag).map(|(s, _)| *s).unwrap_or_default();
            diagnostics.error(
                format!("Circular event chain: {}", cycle.join(" → ")),
                span,
            );
        }
        return;
    }
    if !visited.insert(tag.to_string()) {
        return;
    }

    let Some((_, emitted)) = graph.get(tag) else {
        return;
    };
    stack.push(tag.to_string());
    for next in emitted {
        if graph.contains_key(next) {
            find_cycle(next, graph, stack, visited, reported, diagnostics);
        }
    }
    stack.pop();
}

// ============================================================================
// PASS 4: WARNINGS
// ============================================================================

fn warn_orphan_events(program: &Program, diagnostics: &mut Diagnostics) {
    let mut handled: HashSet<String> = HashSet::new();
    for feature_set in &program.feature_sets {
        if let ActivityKind::DomainHandler { tag } = classify_activity(
            &feature_set.name,
            &feature_set.business_activity,
            feature_set.guard_spec.as_deref(),
        ) {
            handled.insert(tag);
        }
    }

    let mut warned: HashSet<String> = HashSet::new();
    for feature_set in &program.feature_sets {
        for tag in emitted_tags(&feature_set.statements) {
            if !handled.contains(&tag) && warned.insert(tag.clone()) {
                diagnostics.warning(
                    format!("Event '{}' is emitted but never handled", tag),
                    feature_set.span,
                );
            }
        }
    }
}

fn warn_unused(
    analyzed: &AnalyzedFeatureSet,
    all_inputs: &HashSet<String>,
    diagnostics: &mut Diagnostics,
) {
    for symbol in analyzed.symbols.symbols() {
        if symbol.visibility != SymbolVisibility::Internal
            || symbol.source != SymbolSource::Statement
            || symbol.name.starts_with('_')
        {
            continue;
        }
        if !all_inputs.contains(&symbol.name) {
            diagnostics.warning(
                format!("Unused binding '{}'", symbol.name),
                symbol.span,
            );
        }
    }
}

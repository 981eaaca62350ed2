//! Semantic analyzer integration tests

use aro_core::Severity;
use aro_dsl::compile;

#[test]
fn clean_program_compiles() {
    let result = compile(
        "(Sum: Math) { <Compute> the <sum> from <3> + <4>. <Return> an <OK> with <sum>. }",
    );
    assert!(result.is_success(), "{:?}", result.diagnostics.entries());
}

#[test]
fn duplicate_set_is_an_immutability_error() {
    let result = compile("(Twice: Math) { <Set> the <x> to 1. <Set> the <x> to 2. }");
    let errors: Vec<_> = result.diagnostics.errors().collect();
    assert_eq!(errors.len(), 1, "{:?}", errors);
    assert!(errors[0].message.contains("x"));
    // The error points at the second statement.
    assert!(errors[0].span.start > 16);
}

#[test]
fn underscore_names_may_rebind() {
    let result = compile("(Scratch: Math) { <Set> the <_tmp> to 1. <Set> the <_tmp> to 2. }");
    assert!(result.is_success(), "{:?}", result.diagnostics.entries());
}

#[test]
fn rebinder_verb_may_rebind_a_plain_binding() {
    let result = compile(
        r#"(Flow: Orders) {
            <Create> the <order> from {"id": "1", "status": "draft"}.
            <Set> the <order> to {"id": "1", "status": "paid"}.
            <Return> an <OK> with <order>.
        }"#,
    );
    assert!(result.is_success(), "{:?}", result.diagnostics.entries());
}

#[test]
fn non_rebinder_duplicate_is_an_error() {
    let result = compile(
        r#"(Flow: Orders) {
            <Create> the <order> from {"id": "1"}.
            <Create> the <order> from {"id": "2"}.
            <Return> an <OK> with <order>.
        }"#,
    );
    assert_eq!(result.diagnostics.errors().count(), 1);
}

#[test]
fn unknown_symbol_is_an_error() {
    let result = compile("(Lookup: Math) { <Return> an <OK> with <missing>. }");
    let errors: Vec<_> = result.diagnostics.errors().collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("missing"));
}

#[test]
fn symbols_resolve_in_statement_order() {
    let result = compile(
        "(Chain: Math) { <Compute> the <a> from <1> + <1>. <Compute> the <b> from <a> * <2>. <Return> an <OK> with <b>. }",
    );
    assert!(result.is_success(), "{:?}", result.diagnostics.entries());
}

#[test]
fn cross_activity_publish_is_denied() {
    let result = compile(
        r#"(Login: Security) {
            <Create> the <user> from {"id": 1}.
            publish the <user>.
        }
        (Checkout: Commerce) {
            <Return> an <OK> with <user>.
        }"#,
    );
    let errors: Vec<_> = result.diagnostics.errors().collect();
    assert_eq!(errors.len(), 1, "{:?}", errors);
    assert!(errors[0].message.contains("user"));
    assert!(errors[0].message.contains("different business activity"));
}

#[test]
fn same_activity_publish_is_visible() {
    let result = compile(
        r#"(Login: Security) {
            <Create> the <user> from {"id": 1}.
            publish the <user>.
        }
        (Audit: Security) {
            <Return> an <OK> with <user>.
        }"#,
    );
    assert!(result.is_success(), "{:?}", result.diagnostics.entries());
}

#[test]
fn publishing_an_undefined_variable_is_an_error() {
    let result = compile("(Oops: Security) { publish the <ghost>. }");
    assert_eq!(result.diagnostics.errors().count(), 1);
}

#[test]
fn event_cycle_is_reported_once_with_path() {
    let result = compile(
        r#"(Start: Application-Start) {
            <Create> the <payload> from {"n": 1}.
            <Emit> an <X> with <payload>.
        }
        (HandleX: X Handler) {
            <Create> the <p> from {"n": 2}.
            <Emit> a <Y> with <p>.
        }
        (HandleY: Y Handler) {
            <Create> the <q> from {"n": 3}.
            <Emit> an <X> with <q>.
        }"#,
    );
    let cycle_errors: Vec<_> = result
        .diagnostics
        .errors()
        .filter(|e| e.message.contains("Circular event chain"))
        .collect();
    assert_eq!(cycle_errors.len(), 1, "{:?}", cycle_errors);
    assert!(cycle_errors[0].message.contains("X → Y → X"));
}

#[test]
fn orphan_event_warns() {
    let result = compile(
        r#"(Start: Application-Start) {
            <Create> the <payload> from {"n": 1}.
            <Emit> an <Unrouted> with <payload>.
        }"#,
    );
    assert!(result.is_success());
    let warnings: Vec<_> = result.diagnostics.warnings().collect();
    assert!(warnings
        .iter()
        .any(|w| w.message.contains("Unrouted") && w.message.contains("never handled")));
}

#[test]
fn handled_event_does_not_warn() {
    let result = compile(
        r#"(Start: Application-Start) {
            <Create> the <payload> from {"n": 1}.
            <Emit> an <OrderPlaced> with <payload>.
        }
        (Notify: OrderPlaced Handler) {
            <Log> "placed" to the <console>.
        }"#,
    );
    assert!(!result
        .diagnostics
        .warnings()
        .any(|w| w.message.contains("never handled")));
}

#[test]
fn unused_binding_warns() {
    let result = compile("(Waste: Math) { <Compute> the <unused> from <1> + <1>. }");
    assert!(result.is_success());
    assert!(result
        .diagnostics
        .warnings()
        .any(|w| w.message.contains("Unused binding 'unused'")));
}

#[test]
fn magic_name_shadow_warns() {
    let result = compile("(Clock: Time) { <Set> the <now> to 5. <Return> an <OK> with <now>. }");
    assert!(result
        .diagnostics
        .warnings()
        .any(|w| w.severity == Severity::Warning && w.message.contains("now")));
}

#[test]
fn runtime_externals_are_known() {
    let result = compile(
        "(Inbound: Web) { <Extract> the <user-id> from the <request>. <Return> an <OK> with <user-id>. }",
    );
    assert!(result.is_success(), "{:?}", result.diagnostics.entries());
}

#[test]
fn repositories_are_resources_not_symbols() {
    let result = compile(
        "(Load: Orders) { <Retrieve> the <orders> from the <order-repository>. <Return> an <OK> with <orders>. }",
    );
    assert!(result.is_success(), "{:?}", result.diagnostics.entries());
}

#[test]
fn stored_value_must_exist() {
    let result =
        compile("(Save: Orders) { <Store> the <order> into the <order-repository>. }");
    assert_eq!(result.diagnostics.errors().count(), 1);
}

#[test]
fn data_flow_records_inputs_and_outputs() {
    let result = compile(
        "(Sum: Math) { <Compute> the <sum> from <3> + <4>. <Return> an <OK> with <sum>. }",
    );
    let analyzed = &result.program.feature_sets[0];
    assert_eq!(analyzed.data_flow.len(), 2);
    assert_eq!(analyzed.data_flow[0].outputs, vec!["sum"]);
    assert!(analyzed.data_flow[1].inputs.contains(&"sum".to_string()));
    assert_eq!(analyzed.data_flow[1].side_effects, vec!["response"]);
}

#[test]
fn loop_items_are_scoped_to_the_loop() {
    let result = compile(
        r#"(Walk: Orders) {
            <Create> the <orders> from [1, 2, 3].
            for each <item> in the <orders> {
                <Log> "seen" to the <console>.
            }
        }"#,
    );
    assert!(result.is_success(), "{:?}", result.diagnostics.entries());
}

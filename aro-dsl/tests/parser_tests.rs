//! Parser integration tests

use aro_dsl::ast::*;
use aro_dsl::lexer::Preposition;
use aro_dsl::Parser;

fn parse_ok(source: &str) -> Program {
    let (program, diagnostics) = Parser::parse_source(source);
    assert!(
        !diagnostics.has_errors(),
        "unexpected errors: {:?}",
        diagnostics.entries()
    );
    program
}

fn first_aro(program: &Program) -> &AroStatement {
    match &program.feature_sets[0].statements[0] {
        Statement::Aro(aro) => aro,
        other => panic!("expected ARO statement, got {:?}", other),
    }
}

#[test]
fn parses_feature_set_header() {
    let program = parse_ok("(Sum: Math) { <Compute> the <sum> from <3> + <4>. }");
    assert_eq!(program.feature_sets.len(), 1);
    let fs = &program.feature_sets[0];
    assert_eq!(fs.name, "Sum");
    assert_eq!(fs.business_activity, "Math");
    assert_eq!(fs.statements.len(), 1);
}

#[test]
fn multi_word_names_and_activities() {
    let program = parse_ok("(Create Order: Order Management) { <Compute> the <x> from <1> + <1>. }");
    let fs = &program.feature_sets[0];
    assert_eq!(fs.name, "Create Order");
    assert_eq!(fs.business_activity, "Order Management");
}

#[test]
fn expression_object_becomes_value_source() {
    let program = parse_ok("(Sum: Math) { <Compute> the <sum> from <3> + <4>. }");
    let aro = first_aro(&program);
    assert_eq!(aro.verb, "Compute");
    assert_eq!(aro.result.name, "sum");
    assert_eq!(aro.object.preposition, Preposition::From);
    assert_eq!(aro.object.noun.name, "_expression_");
    assert!(matches!(aro.value, ValueSource::Expression(_)));
}

#[test]
fn plain_noun_object_has_no_value_source() {
    let program = parse_ok("(Reply: Web) { <Return> an <OK> with <sum>. }");
    let aro = first_aro(&program);
    assert_eq!(aro.verb, "Return");
    assert_eq!(aro.result.name, "OK");
    assert_eq!(aro.object.preposition, Preposition::With);
    assert_eq!(aro.object.noun.name, "sum");
    assert_eq!(aro.value, ValueSource::None);
}

#[test]
fn literal_object_binds_literal_source() {
    let program = parse_ok("(Init: Setup) { <Set> the <x> to 1. }");
    let aro = first_aro(&program);
    assert_eq!(aro.object.noun.name, "_literal_");
    match &aro.value {
        ValueSource::Literal(value) => assert_eq!(value.value, serde_json::json!(1)),
        other => panic!("expected literal, got {:?}", other),
    }
}

#[test]
fn literal_in_result_position() {
    let program = parse_ok(r#"(Log: Audit) { <Log> "changed" to the <console>. }"#);
    let aro = first_aro(&program);
    assert_eq!(aro.result.name, "_literal_");
    assert_eq!(aro.object.noun.name, "console");
    assert!(matches!(aro.value, ValueSource::Literal(_)));
}

#[test]
fn hyphenated_identifiers_compose() {
    let program =
        parse_ok("(Save: Orders) { <Store> the <order> into the <order-repository>. }");
    let aro = first_aro(&program);
    assert_eq!(aro.object.noun.name, "order-repository");
}

#[test]
fn type_annotations_on_nouns() {
    let program = parse_ok("(Load: Orders) { <Retrieve> the <order: Order> from the <order-repository>. }");
    let aro = first_aro(&program);
    assert_eq!(aro.result.name, "order");
    assert_eq!(aro.result.type_annotation.as_deref(), Some("Order"));
}

#[test]
fn where_and_when_clauses() {
    let program = parse_ok(
        r#"(Find: Orders) { <Retrieve> the <paid> from the <order-repository> where <status> == "paid" when <enabled>. }"#,
    );
    let aro = first_aro(&program);
    assert!(aro.query.where_clause.is_some());
    assert!(aro.guard.is_some());
}

#[test]
fn aggregation_with_group_by() {
    let program = parse_ok(
        "(Stats: Orders) { <Retrieve> the <totals> from the <order-repository> sum by amount. }",
    );
    let aro = first_aro(&program);
    assert_eq!(aro.query.aggregation, Some(Aggregation::Sum));
    assert_eq!(aro.query.group_by.as_deref(), Some("amount"));
}

#[test]
fn range_modifiers_after_object() {
    let program = parse_ok(
        "(Call: Web) { <Fetch> the <data> from the <api> with <headers> to <timeout>. }",
    );
    let aro = first_aro(&program);
    assert!(aro.range.with.is_some());
    assert!(aro.range.to.is_some());
}

#[test]
fn guarded_handler_header() {
    let program = parse_ok(
        r#"(Notify: OrderPlaced Handler<status:paid;tier:gold>) { <Log> "hi" to the <console>. }"#,
    );
    let fs = &program.feature_sets[0];
    assert_eq!(fs.business_activity, "OrderPlaced Handler");
    assert_eq!(fs.guard_spec.as_deref(), Some("status:paid;tier:gold"));
    assert_eq!(fs.guards.guards.len(), 2);
}

#[test]
fn publish_and_require_statements() {
    let program = parse_ok(
        "(Auth: Security) { <Create> the <user> from {\"id\": 1}. publish the <user>. require the <token> from <Issue Token>. }",
    );
    let statements = &program.feature_sets[0].statements;
    assert!(matches!(&statements[1], Statement::Publish(p) if p.name == "user"));
    assert!(
        matches!(&statements[2], Statement::Require(r) if r.name == "token" && r.source.as_deref() == Some("Issue Token"))
    );
}

#[test]
fn for_each_loop_parses() {
    let program = parse_ok(
        r#"(Walk: Orders) { for each <item> in the <orders> { <Log> "x" to the <console>. } }"#,
    );
    match &program.feature_sets[0].statements[0] {
        Statement::ForEach(f) => {
            assert_eq!(f.item, "item");
            assert_eq!(f.statements.len(), 1);
        }
        other => panic!("expected for-each, got {:?}", other),
    }
}

#[test]
fn bare_for_is_a_preposition() {
    let program = parse_ok("(Check: Orders) { <Validate> the <order> for the <rules>. }");
    let aro = first_aro(&program);
    assert_eq!(aro.object.preposition, Preposition::For);
}

#[test]
fn match_statement_parses() {
    let program = parse_ok(
        r#"(Route: Orders) {
            match the <status> {
                when "paid" { <Log> "paid" to the <console>. }
                otherwise { <Log> "other" to the <console>. }
            }
        }"#,
    );
    match &program.feature_sets[0].statements[0] {
        Statement::Match(m) => {
            assert_eq!(m.arms.len(), 1);
            assert!(m.otherwise.is_some());
        }
        other => panic!("expected match, got {:?}", other),
    }
}

#[test]
fn member_access_vs_statement_terminator() {
    // `.` continues the path when an identifier follows and terminates
    // the statement otherwise.
    let program = parse_ok("(Read: Users) { <Compute> the <city> from <user>.address.city. }");
    let aro = first_aro(&program);
    assert_eq!(aro.object.noun.name, "user.address.city");
    assert_eq!(
        aro.object.noun.specifiers(),
        vec!["user", "address", "city"]
    );
}

#[test]
fn comparison_with_literal_right_side() {
    let program =
        parse_ok("(Gate: Orders) { <Validate> the <order> for the <rules> when <total> < 100. }");
    let aro = first_aro(&program);
    match aro.guard.as_ref().unwrap() {
        Expression::Binary { op, .. } => assert_eq!(*op, BinaryOp::Lt),
        other => panic!("expected comparison, got {:?}", other),
    }
}

#[test]
fn imports_before_feature_sets() {
    let program = parse_ok(r#"import <helpers> from "std/helpers". (A: B) { <Set> the <x> to 1. }"#);
    assert_eq!(program.imports.len(), 1);
    assert_eq!(program.imports[0].name, "helpers");
    assert_eq!(program.imports[0].module, "std/helpers");
}

#[test]
fn recovery_skips_to_next_statement() {
    let (program, diagnostics) = Parser::parse_source(
        "(Bad: Math) { <Compute> the <x> junk junk <Set> the <y> to 2. }",
    );
    assert!(diagnostics.has_errors());
    // The second statement survives recovery.
    let statements = &program.feature_sets[0].statements;
    assert!(statements
        .iter()
        .any(|s| matches!(s, Statement::Aro(a) if a.result.name == "y")));
}

#[test]
fn recovery_skips_to_next_feature_set() {
    let (program, diagnostics) =
        Parser::parse_source("garbage here (Good: Math) { <Set> the <x> to 1. }");
    assert!(diagnostics.has_errors());
    assert_eq!(program.feature_sets.len(), 1);
    assert_eq!(program.feature_sets[0].name, "Good");
}

#[test]
fn keyword_lexemes_tolerated_in_headers() {
    let program = parse_ok("(Handle error: Faults) { <Set> the <x> to 1. }");
    assert_eq!(program.feature_sets[0].name, "Handle error");
}

#[test]
fn interpolated_string_expression() {
    let program = parse_ok(r#"(Fmt: Text) { <Format> the <msg> from "sum is ${total}". }"#);
    let aro = first_aro(&program);
    match &aro.value {
        ValueSource::Expression(Expression::Interpolated { parts, .. }) => {
            assert_eq!(parts.len(), 2);
        }
        other => panic!("expected interpolated string, got {:?}", other),
    }
}

#[test]
fn empty_feature_set_is_valid() {
    let program = parse_ok("(Noop: Idle) { }");
    assert!(program.feature_sets[0].statements.is_empty());
}

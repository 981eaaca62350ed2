//! Lex → pretty-print → re-lex round-trip properties

use aro_dsl::lexer::{Lexer, TokenKind};
use aro_dsl::pretty_printer::pretty_print;
use proptest::prelude::*;

fn kinds(source: &str) -> Vec<TokenKind> {
    Lexer::new(source)
        .tokenize()
        .into_iter()
        .map(|t| t.kind)
        .collect()
}

fn assert_round_trip(source: &str) {
    let tokens = Lexer::new(source).tokenize();
    let printed = pretty_print(&tokens);
    let original: Vec<TokenKind> = tokens.into_iter().map(|t| t.kind).collect();
    let reparsed = kinds(&printed);
    assert_eq!(original, reparsed, "printed: {}", printed);
}

proptest! {
    #[test]
    fn statements_round_trip(
        name in "[a-z][a-z0-9]{0,8}",
        noun in "[a-z][a-z0-9]{0,8}",
        n in any::<i64>(),
    ) {
        let source = format!("(Fs: Act) {{ <Set> the <{}> to {}. <Return> an <OK> with <{}>. }}", name, n, noun);
        assert_round_trip(&source);
    }

    #[test]
    fn string_contents_round_trip(text in "[ -#%-~]{0,24}") {
        // `$` is excluded so no interpolation opens mid-string.
        let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
        let source = format!("<Log> \"{}\" to the <console>.", escaped);
        assert_round_trip(&source);
    }

    #[test]
    fn floats_round_trip(n in any::<f64>().prop_filter("finite", |f| f.is_finite() && *f >= 0.0)) {
        let source = format!("<Set> the <x> to {:?}.", n);
        assert_round_trip(&source);
    }

    #[test]
    fn expressions_round_trip(
        a in 0i64..10_000,
        b in 0i64..10_000,
        op in prop::sample::select(vec!["+", "-", "*", "%", "++", "==", "!="]),
    ) {
        let source = format!("<Compute> the <t> from <{}> {} <{}>.", a, op, b);
        assert_round_trip(&source);
    }

    #[test]
    fn interpolations_round_trip(
        prefix in "[a-z ]{0,10}",
        var in "[a-z][a-z0-9]{0,6}",
        suffix in "[a-z ]{0,10}",
    ) {
        let source = format!("<Log> \"{}${{{}}}{}\" to the <console>.", prefix, var, suffix);
        assert_round_trip(&source);
    }
}

//! Expression evaluator
//!
//! A pure function of (expression, context) → typed value. Arithmetic
//! preserves integer-ness when both operands are integers and the result
//! is whole; comparisons coerce int↔float; schema-typed dates compare by
//! epoch.

use aro_context::RuntimeContext;
use aro_core::{DataType, ExpressionError, TypedValue};
use aro_dsl::ast::{BinaryOp, Expression, InterpolatedPart, UnaryOp};
use regex::RegexBuilder;
use serde_json::{Map, Value};

/// Evaluate an expression against a context.
pub fn evaluate(
    expression: &Expression,
    ctx: &RuntimeContext,
) -> Result<TypedValue, ExpressionError> {
    match expression {
        Expression::Literal(value, _) => Ok(value.clone()),

        Expression::Variable { name, .. } => {
            ctx.resolve_typed(name)
                .ok_or_else(|| ExpressionError::UndefinedVariable { name: name.clone() })
        }

        Expression::Array { items, .. } => {
            let values: Result<Vec<TypedValue>, _> =
                items.iter().map(|item| evaluate(item, ctx)).collect();
            let values = values?;
            Ok(TypedValue::infer(Value::Array(
                values.into_iter().map(|v| v.value).collect(),
            )))
        }

        Expression::MapLiteral { entries, .. } => {
            let mut map = Map::new();
            for (key, value) in entries {
                map.insert(key.clone(), evaluate(value, ctx)?.value);
            }
            Ok(TypedValue::infer(Value::Object(map)))
        }

        Expression::Grouped { inner, .. } => evaluate(inner, ctx),

        Expression::Unary { op, operand, .. } => {
            let value = evaluate(operand, ctx)?;
            match op {
                UnaryOp::Not => Ok(TypedValue::boolean(!value.is_truthy())),
                UnaryOp::Negate => negate(&value),
            }
        }

        Expression::Binary {
            op, left, right, ..
        } => evaluate_binary(*op, left, right, ctx),

        Expression::Member { object, member, .. } => {
            let value = evaluate(object, ctx)?;
            member_of(&value, member)
        }

        Expression::Index { object, index, .. } => {
            let list = evaluate(object, ctx)?;
            let index = evaluate(index, ctx)?;
            index_into(&list, &index)
        }

        Expression::Exists { name, .. } => {
            Ok(TypedValue::boolean(ctx.resolve_typed(name).is_some()))
        }

        Expression::TypeCheck {
            subject, expected, ..
        } => {
            let value = evaluate(subject, ctx)?;
            Ok(TypedValue::boolean(
                value.data_type.tag() == expected.to_lowercase(),
            ))
        }

        Expression::Interpolated { parts, .. } => {
            let mut out = String::new();
            for part in parts {
                match part {
                    InterpolatedPart::Text(text) => out.push_str(text),
                    InterpolatedPart::Expression(expr) => {
                        out.push_str(&evaluate(expr, ctx)?.to_display_string());
                    }
                }
            }
            Ok(TypedValue::string(out))
        }
    }
}

fn evaluate_binary(
    op: BinaryOp,
    left: &Expression,
    right: &Expression,
    ctx: &RuntimeContext,
) -> Result<TypedValue, ExpressionError> {
    // Logical operators short-circuit on truthiness.
    match op {
        BinaryOp::And => {
            let lhs = evaluate(left, ctx)?;
            if !lhs.is_truthy() {
                return Ok(TypedValue::boolean(false));
            }
            let rhs = evaluate(right, ctx)?;
            return Ok(TypedValue::boolean(rhs.is_truthy()));
        }
        BinaryOp::Or => {
            let lhs = evaluate(left, ctx)?;
            if lhs.is_truthy() {
                return Ok(TypedValue::boolean(true));
            }
            let rhs = evaluate(right, ctx)?;
            return Ok(TypedValue::boolean(rhs.is_truthy()));
        }
        _ => {}
    }

    let lhs = evaluate(left, ctx)?;
    let rhs = evaluate(right, ctx)?;

    match op {
        BinaryOp::Eq => Ok(TypedValue::boolean(values_equal(&lhs, &rhs))),
        BinaryOp::Ne => Ok(TypedValue::boolean(!values_equal(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => compare(op, &lhs, &rhs),
        BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Modulo => {
            arithmetic(op, &lhs, &rhs)
        }
        BinaryOp::Divide => divide(&lhs, &rhs),
        BinaryOp::Concat => Ok(TypedValue::string(format!(
            "{}{}",
            lhs.to_display_string(),
            rhs.to_display_string()
        ))),
        BinaryOp::Contains => contains(&lhs, &rhs),
        BinaryOp::Matches => matches_pattern(&lhs, &rhs),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

// ----------------------------------------------------------------------
// numeric helpers
// ----------------------------------------------------------------------

fn as_number(value: &TypedValue) -> Option<f64> {
    value.value.as_f64()
}

/// Epoch seconds of a schema-typed date value.
fn date_epoch(value: &TypedValue) -> Option<i64> {
    match &value.data_type {
        DataType::Schema(name) if name.eq_ignore_ascii_case("date") => {
            value.value.get("epoch")?.as_i64()
        }
        _ => None,
    }
}

fn negate(value: &TypedValue) -> Result<TypedValue, ExpressionError> {
    if let Some(n) = value.value.as_i64() {
        return Ok(TypedValue::integer(-n));
    }
    if let Some(n) = value.value.as_f64() {
        return Ok(TypedValue::float(-n));
    }
    Err(ExpressionError::TypeMismatch {
        operation: "negate".to_string(),
        left: value.data_type.tag(),
        right: "-".to_string(),
    })
}

fn arithmetic(
    op: BinaryOp,
    lhs: &TypedValue,
    rhs: &TypedValue,
) -> Result<TypedValue, ExpressionError> {
    let (Some(l), Some(r)) = (as_number(lhs), as_number(rhs)) else {
        return Err(mismatch(op, lhs, rhs));
    };

    if let (Some(li), Some(ri)) = (lhs.value.as_i64(), rhs.value.as_i64()) {
        let result = match op {
            BinaryOp::Add => li.checked_add(ri),
            BinaryOp::Subtract => li.checked_sub(ri),
            BinaryOp::Multiply => li.checked_mul(ri),
            BinaryOp::Modulo => {
                if ri == 0 {
                    return Err(ExpressionError::Unsupported {
                        reason: "modulo by zero".to_string(),
                    });
                }
                li.checked_rem(ri)
            }
            _ => unreachable!(),
        };
        if let Some(n) = result {
            return Ok(TypedValue::integer(n));
        }
        // Overflow falls through to float arithmetic.
    }

    let result = match op {
        BinaryOp::Add => l + r,
        BinaryOp::Subtract => l - r,
        BinaryOp::Multiply => l * r,
        BinaryOp::Modulo => {
            if r == 0.0 {
                return Err(ExpressionError::Unsupported {
                    reason: "modulo by zero".to_string(),
                });
            }
            l % r
        }
        _ => unreachable!(),
    };
    Ok(TypedValue::float(result))
}

/// Division stays integer only when both operands are integers and the
/// quotient is whole.
fn divide(lhs: &TypedValue, rhs: &TypedValue) -> Result<TypedValue, ExpressionError> {
    let (Some(l), Some(r)) = (as_number(lhs), as_number(rhs)) else {
        return Err(mismatch(BinaryOp::Divide, lhs, rhs));
    };
    if r == 0.0 {
        return Err(ExpressionError::Unsupported {
            reason: "division by zero".to_string(),
        });
    }
    if let (Some(li), Some(ri)) = (lhs.value.as_i64(), rhs.value.as_i64()) {
        if li % ri == 0 {
            return Ok(TypedValue::integer(li / ri));
        }
    }
    Ok(TypedValue::float(l / r))
}

fn compare(op: BinaryOp, lhs: &TypedValue, rhs: &TypedValue) -> Result<TypedValue, ExpressionError> {
    // Dates compare by epoch.
    let ordering = if let (Some(l), Some(r)) = (date_epoch(lhs), date_epoch(rhs)) {
        l.partial_cmp(&r)
    } else if let (Some(l), Some(r)) = (as_number(lhs), as_number(rhs)) {
        l.partial_cmp(&r)
    } else if let (Some(l), Some(r)) = (lhs.value.as_str(), rhs.value.as_str()) {
        Some(l.cmp(r))
    } else {
        return Err(mismatch(op, lhs, rhs));
    };

    let Some(ordering) = ordering else {
        return Err(mismatch(op, lhs, rhs));
    };
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => unreachable!(),
    };
    Ok(TypedValue::boolean(result))
}

/// Equality with int↔float coercion and epoch-based date comparison.
pub fn values_equal(lhs: &TypedValue, rhs: &TypedValue) -> bool {
    if let (Some(l), Some(r)) = (date_epoch(lhs), date_epoch(rhs)) {
        return l == r;
    }
    if let (Some(l), Some(r)) = (as_number(lhs), as_number(rhs)) {
        return l == r;
    }
    lhs.value == rhs.value
}

// ----------------------------------------------------------------------
// containment and matching
// ----------------------------------------------------------------------

fn contains(lhs: &TypedValue, rhs: &TypedValue) -> Result<TypedValue, ExpressionError> {
    match &lhs.value {
        Value::Array(items) => {
            let found = items
                .iter()
                .any(|item| values_equal(&TypedValue::infer(item.clone()), rhs));
            Ok(TypedValue::boolean(found))
        }
        Value::String(text) => Ok(TypedValue::boolean(
            text.contains(&rhs.to_display_string()),
        )),
        Value::Object(map) => Ok(TypedValue::boolean(
            map.contains_key(&rhs.to_display_string()),
        )),
        _ => Err(mismatch(BinaryOp::Contains, lhs, rhs)),
    }
}

fn matches_pattern(lhs: &TypedValue, rhs: &TypedValue) -> Result<TypedValue, ExpressionError> {
    let (pattern, flags) = match &rhs.value {
        Value::String(pattern) => (pattern.clone(), String::new()),
        Value::Object(map) => {
            let pattern = map
                .get("pattern")
                .and_then(|p| p.as_str())
                .ok_or_else(|| ExpressionError::InvalidPattern {
                    reason: "pattern map needs a string 'pattern' field".to_string(),
                })?
                .to_string();
            let flags = map
                .get("flags")
                .and_then(|f| f.as_str())
                .unwrap_or_default()
                .to_string();
            (pattern, flags)
        }
        _ => {
            return Err(ExpressionError::InvalidPattern {
                reason: "matches needs a string or {pattern, flags} map".to_string(),
            })
        }
    };

    if pattern.is_empty() {
        return Err(ExpressionError::InvalidPattern {
            reason: "empty pattern".to_string(),
        });
    }

    let regex = RegexBuilder::new(&pattern)
        .case_insensitive(flags.contains('i'))
        .dot_matches_new_line(flags.contains('s'))
        .multi_line(flags.contains('m'))
        .build()
        .map_err(|e| ExpressionError::InvalidPattern {
            reason: e.to_string(),
        })?;

    Ok(TypedValue::boolean(
        regex.is_match(&lhs.to_display_string()),
    ))
}

// ----------------------------------------------------------------------
// navigation
// ----------------------------------------------------------------------

/// Member access over maps; key lookup is exact first, then
/// case-insensitive.
pub fn member_of(value: &TypedValue, member: &str) -> Result<TypedValue, ExpressionError> {
    let Some(map) = value.value.as_object() else {
        return Err(ExpressionError::UndefinedMember {
            subject: value.data_type.tag(),
            member: member.to_string(),
        });
    };
    let found = map.get(member).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(member))
            .map(|(_, v)| v)
    });
    match found {
        Some(inner) => Ok(TypedValue::infer(inner.clone())),
        None => Err(ExpressionError::UndefinedMember {
            subject: value.data_type.tag(),
            member: member.to_string(),
        }),
    }
}

/// Subscript with reverse indexing: index 0 is the most recent (last)
/// element.
fn index_into(list: &TypedValue, index: &TypedValue) -> Result<TypedValue, ExpressionError> {
    let Some(items) = list.value.as_array() else {
        return Err(ExpressionError::Unsupported {
            reason: format!("cannot index into {}", list.data_type.tag()),
        });
    };
    let Some(i) = index.value.as_i64().filter(|i| *i >= 0) else {
        return Err(ExpressionError::Unsupported {
            reason: "subscript index must be a non-negative integer".to_string(),
        });
    };
    let i = i as usize;
    if i >= items.len() {
        return Err(ExpressionError::IndexOutOfBounds {
            index: i,
            length: items.len(),
        });
    }
    Ok(TypedValue::infer(items[items.len() - 1 - i].clone()))
}

fn mismatch(op: BinaryOp, lhs: &TypedValue, rhs: &TypedValue) -> ExpressionError {
    ExpressionError::TypeMismatch {
        operation: format!("{:?}", op),
        left: lhs.data_type.tag(),
        right: rhs.data_type.tag(),
    }
}

/// Navigate a specifier path (base already resolved) through a value.
pub fn navigate_path(value: &TypedValue, path: &[String]) -> Result<TypedValue, ExpressionError> {
    let mut current = value.clone();
    for segment in path {
        current = member_of(&current, segment)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aro_core::SourceSpan;
    use serde_json::json;

    fn ctx() -> RuntimeContext {
        RuntimeContext::root("Eval", "Testing")
    }

    fn lit(value: Value) -> Expression {
        Expression::Literal(TypedValue::infer(value), SourceSpan::default())
    }

    fn bin(op: BinaryOp, left: Expression, right: Expression) -> Expression {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span: SourceSpan::default(),
        }
    }

    #[test]
    fn integer_arithmetic_stays_integer() {
        let result = evaluate(&bin(BinaryOp::Add, lit(json!(3)), lit(json!(4))), &ctx()).unwrap();
        assert_eq!(result.value, json!(7));
        assert_eq!(result.data_type, DataType::Integer);
    }

    #[test]
    fn mixed_arithmetic_promotes_to_float() {
        let result =
            evaluate(&bin(BinaryOp::Add, lit(json!(3)), lit(json!(0.5))), &ctx()).unwrap();
        assert_eq!(result.data_type, DataType::Float);
    }

    #[test]
    fn whole_division_stays_integer() {
        let result =
            evaluate(&bin(BinaryOp::Divide, lit(json!(8)), lit(json!(2))), &ctx()).unwrap();
        assert_eq!(result.value, json!(4));
        assert_eq!(result.data_type, DataType::Integer);
    }

    #[test]
    fn fractional_division_promotes() {
        let result =
            evaluate(&bin(BinaryOp::Divide, lit(json!(7)), lit(json!(2))), &ctx()).unwrap();
        assert_eq!(result.value, json!(3.5));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let result = evaluate(&bin(BinaryOp::Divide, lit(json!(1)), lit(json!(0))), &ctx());
        assert!(result.is_err());
    }

    #[test]
    fn comparison_coerces_int_and_float() {
        let result =
            evaluate(&bin(BinaryOp::Eq, lit(json!(2)), lit(json!(2.0))), &ctx()).unwrap();
        assert_eq!(result.value, json!(true));
    }

    #[test]
    fn dates_compare_by_epoch() {
        let context = ctx();
        context.bind(
            "early",
            TypedValue::schema("Date", json!({"epoch": 100})),
            false,
        );
        context.bind(
            "late",
            TypedValue::schema("Date", json!({"epoch": 200})),
            false,
        );
        let expr = bin(
            BinaryOp::Lt,
            Expression::Variable {
                name: "early".to_string(),
                span: SourceSpan::default(),
            },
            Expression::Variable {
                name: "late".to_string(),
                span: SourceSpan::default(),
            },
        );
        assert_eq!(evaluate(&expr, &context).unwrap().value, json!(true));
    }

    #[test]
    fn concat_stringifies_both_sides() {
        let result =
            evaluate(&bin(BinaryOp::Concat, lit(json!(7)), lit(json!(""))), &ctx()).unwrap();
        assert_eq!(result.value, json!("7"));
    }

    #[test]
    fn contains_on_list_string_and_map() {
        let list = contains(
            &TypedValue::infer(json!([1, 2, 3])),
            &TypedValue::integer(2),
        )
        .unwrap();
        assert_eq!(list.value, json!(true));

        let text = contains(
            &TypedValue::string("hello world"),
            &TypedValue::string("world"),
        )
        .unwrap();
        assert_eq!(text.value, json!(true));

        let map = contains(
            &TypedValue::infer(json!({"key": 1})),
            &TypedValue::string("key"),
        )
        .unwrap();
        assert_eq!(map.value, json!(true));
    }

    #[test]
    fn matches_with_flags_map() {
        let result = matches_pattern(
            &TypedValue::string("HELLO"),
            &TypedValue::infer(json!({"pattern": "hello", "flags": "i"})),
        )
        .unwrap();
        assert_eq!(result.value, json!(true));
    }

    #[test]
    fn empty_pattern_is_an_error() {
        let result = matches_pattern(&TypedValue::string("x"), &TypedValue::string(""));
        assert!(matches!(
            result,
            Err(ExpressionError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn subscript_zero_is_most_recent() {
        let list = TypedValue::infer(json!(["oldest", "middle", "newest"]));
        let result = index_into(&list, &TypedValue::integer(0)).unwrap();
        assert_eq!(result.value, json!("newest"));
        let result = index_into(&list, &TypedValue::integer(2)).unwrap();
        assert_eq!(result.value, json!("oldest"));
    }

    #[test]
    fn subscript_at_length_is_out_of_bounds() {
        let list = TypedValue::infer(json!(["only"]));
        assert_eq!(
            index_into(&list, &TypedValue::integer(0)).unwrap().value,
            json!("only")
        );
        assert!(matches!(
            index_into(&list, &TypedValue::integer(1)),
            Err(ExpressionError::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn double_negation_is_boolean_coercion() {
        let context = ctx();
        for (value, expected) in [
            (json!(0), false),
            (json!(1), true),
            (json!(""), false),
            (json!("x"), true),
            (json!([]), false),
            (json!({"k": 1}), true),
        ] {
            let expr = Expression::Unary {
                op: UnaryOp::Not,
                operand: Box::new(Expression::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(lit(value.clone())),
                    span: SourceSpan::default(),
                }),
                span: SourceSpan::default(),
            };
            let result = evaluate(&expr, &context).unwrap();
            assert_eq!(
                result.value,
                json!(expected),
                "!!{} should be {}",
                value,
                expected
            );
        }
    }

    #[test]
    fn exists_checks_resolution() {
        let context = ctx();
        context.bind("present", TypedValue::integer(1), false);
        let expr = Expression::Exists {
            name: "present".to_string(),
            span: SourceSpan::default(),
        };
        assert_eq!(evaluate(&expr, &context).unwrap().value, json!(true));
        let expr = Expression::Exists {
            name: "absent".to_string(),
            span: SourceSpan::default(),
        };
        assert_eq!(evaluate(&expr, &context).unwrap().value, json!(false));
    }

    #[test]
    fn type_check_compares_tags() {
        let expr = Expression::TypeCheck {
            subject: Box::new(lit(json!("text"))),
            expected: "String".to_string(),
            span: SourceSpan::default(),
        };
        assert_eq!(evaluate(&expr, &ctx()).unwrap().value, json!(true));
    }

    #[test]
    fn undefined_variable_errors() {
        let expr = Expression::Variable {
            name: "ghost".to_string(),
            span: SourceSpan::default(),
        };
        assert!(matches!(
            evaluate(&expr, &ctx()),
            Err(ExpressionError::UndefinedVariable { .. })
        ));
    }

    #[test]
    fn member_access_is_case_insensitive_fallback() {
        let value = TypedValue::infer(json!({"Status": "paid"}));
        assert_eq!(member_of(&value, "status").unwrap().value, json!("paid"));
    }
}

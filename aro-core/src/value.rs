//! Typed runtime values
//!
//! ARO carries every runtime value as a `serde_json::Value` paired with a
//! [`DataType`]. Types are inferred from concrete values unless a schema
//! type was attached explicitly; schema types survive re-binding.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// DATA TYPES
// ============================================================================

/// The type lattice for ARO values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
    /// Homogeneous list with an element type.
    List(Box<DataType>),
    /// Map with key and value types. Keys are always strings in practice.
    Map(Box<DataType>, Box<DataType>),
    /// A named schema type (dates, contracts, user-declared entities).
    Schema(String),
    Unknown,
}

impl DataType {
    /// Infer the type of a concrete JSON value.
    pub fn infer(value: &Value) -> DataType {
        match value {
            Value::String(_) => DataType::String,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    DataType::Integer
                } else {
                    DataType::Float
                }
            }
            Value::Bool(_) => DataType::Boolean,
            Value::Array(items) => {
                let element = items
                    .first()
                    .map(DataType::infer)
                    .unwrap_or(DataType::Unknown);
                DataType::List(Box::new(element))
            }
            Value::Object(map) => {
                let value_type = map
                    .values()
                    .next()
                    .map(DataType::infer)
                    .unwrap_or(DataType::Unknown);
                DataType::Map(Box::new(DataType::String), Box::new(value_type))
            }
            Value::Null => DataType::Unknown,
        }
    }

    /// The short tag used by the `is` type-check operator and the
    /// developer output context.
    pub fn tag(&self) -> String {
        match self {
            DataType::String => "string".to_string(),
            DataType::Integer => "integer".to_string(),
            DataType::Float => "float".to_string(),
            DataType::Boolean => "boolean".to_string(),
            DataType::List(_) => "list".to_string(),
            DataType::Map(_, _) => "map".to_string(),
            DataType::Schema(name) => name.to_lowercase(),
            DataType::Unknown => "unknown".to_string(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::List(el) => write!(f, "list<{}>", el),
            DataType::Map(k, v) => write!(f, "map<{}, {}>", k, v),
            DataType::Schema(name) => write!(f, "{}", name),
            other => write!(f, "{}", other.tag()),
        }
    }
}

// ============================================================================
// TYPED VALUES
// ============================================================================

/// A runtime value together with its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    pub value: Value,
    pub data_type: DataType,
}

impl TypedValue {
    /// Wrap a value, inferring its type.
    pub fn infer(value: Value) -> Self {
        let data_type = DataType::infer(&value);
        Self { value, data_type }
    }

    /// Wrap a value under an explicit schema type.
    pub fn schema(name: impl Into<String>, value: Value) -> Self {
        Self {
            value,
            data_type: DataType::Schema(name.into()),
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self {
            value: Value::String(s.into()),
            data_type: DataType::String,
        }
    }

    pub fn integer(n: i64) -> Self {
        Self {
            value: Value::from(n),
            data_type: DataType::Integer,
        }
    }

    pub fn float(n: f64) -> Self {
        Self {
            value: Value::from(n),
            data_type: DataType::Float,
        }
    }

    pub fn boolean(b: bool) -> Self {
        Self {
            value: Value::Bool(b),
            data_type: DataType::Boolean,
        }
    }

    /// The canonical string form of the value (used by `++` and logging).
    ///
    /// Strings render without quotes; everything else renders as JSON.
    pub fn to_display_string(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Boolean coercion: `false`, `null`, `0`, `""`, `[]`, `{}` are falsy.
    pub fn is_truthy(&self) -> bool {
        match &self.value {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
        }
    }

    /// Render with a type annotation, as the developer output context does.
    pub fn to_annotated_string(&self) -> String {
        format!("{}: {}", self.to_display_string(), self.data_type)
    }
}

impl From<Value> for TypedValue {
    fn from(value: Value) -> Self {
        TypedValue::infer(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn infers_integer_and_float_separately() {
        assert_eq!(DataType::infer(&json!(7)), DataType::Integer);
        assert_eq!(DataType::infer(&json!(7.5)), DataType::Float);
    }

    #[test]
    fn infers_list_element_type_from_first_element() {
        let t = DataType::infer(&json!(["a", "b"]));
        assert_eq!(t, DataType::List(Box::new(DataType::String)));
    }

    #[test]
    fn empty_list_has_unknown_element() {
        let t = DataType::infer(&json!([]));
        assert_eq!(t, DataType::List(Box::new(DataType::Unknown)));
    }

    #[test]
    fn schema_type_survives_clone() {
        let v = TypedValue::schema("Date", json!({"epoch": 1000}));
        let copy = v.clone();
        assert_eq!(copy.data_type, DataType::Schema("Date".to_string()));
    }

    #[test]
    fn truthiness_matches_boolean_coercion() {
        assert!(!TypedValue::infer(json!(0)).is_truthy());
        assert!(TypedValue::infer(json!(1)).is_truthy());
        assert!(!TypedValue::infer(json!("")).is_truthy());
        assert!(TypedValue::infer(json!("x")).is_truthy());
        assert!(!TypedValue::infer(json!([])).is_truthy());
        assert!(!TypedValue::infer(json!(null)).is_truthy());
    }

    #[test]
    fn display_string_unquotes_strings() {
        assert_eq!(TypedValue::string("hi").to_display_string(), "hi");
        assert_eq!(TypedValue::integer(3).to_display_string(), "3");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn integers_always_infer_integer(n in any::<i64>()) {
                prop_assert_eq!(DataType::infer(&json!(n)), DataType::Integer);
            }

            #[test]
            fn numeric_truthiness_is_nonzero(n in any::<i64>()) {
                prop_assert_eq!(TypedValue::infer(json!(n)).is_truthy(), n != 0);
            }

            #[test]
            fn display_string_round_trips_strings(s in "[ -~]{0,32}") {
                prop_assert_eq!(TypedValue::string(s.clone()).to_display_string(), s);
            }
        }
    }
}

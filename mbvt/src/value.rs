//! Scalar values of feature attributes and style parameters.

use std::fmt;

use mvt_reader::feature::Value as MvtValue;
use serde_json::{Number, Value as Json};

#[derive(Debug, Clone, PartialEq, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Declared kind of a style parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Null,
    Bool,
    Int,
    Float,
    String,
}

impl Value {
    pub fn kind(&self) -> ParameterKind {
        match self {
            Value::Null => ParameterKind::Null,
            Value::Bool(_) => ParameterKind::Bool,
            Value::Int(_) => ParameterKind::Int,
            Value::Float(_) => ParameterKind::Float,
            Value::String(_) => ParameterKind::String,
        }
    }

    /// Parse `text` as a value of the given kind. Booleans accept literal `true`/`false` first
    /// and then the numeric `1`/`0` forms.
    pub fn parse_as(kind: ParameterKind, text: &str) -> Option<Value> {
        match kind {
            ParameterKind::Null => None,
            ParameterKind::Bool => match text {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => match text.trim() {
                    "1" => Some(Value::Bool(true)),
                    "0" => Some(Value::Bool(false)),
                    _ => None,
                },
            },
            ParameterKind::Int => text.trim().parse().ok().map(Value::Int),
            ParameterKind::Float => text.trim().parse().ok().map(Value::Float),
            ParameterKind::String => Some(Value::String(text.to_owned())),
        }
    }

    /// Interpret a style literal: booleans, integers, floats and everything else as a string.
    pub fn from_literal(text: &str) -> Value {
        match text {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => {
                if let Ok(i) = text.parse::<i64>() {
                    Value::Int(i)
                } else if let Ok(f) = text.parse::<f64>() {
                    Value::Float(f)
                } else {
                    Value::String(text.to_owned())
                }
            }
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Value::String(s) => Json::String(s.clone()),
        }
    }

    /// Convert a JSON scalar. Arrays and objects have no scalar counterpart.
    pub fn from_json(json: &Json) -> Option<Value> {
        match json {
            Json::Null => Some(Value::Null),
            Json::Bool(b) => Some(Value::Bool(*b)),
            Json::Number(n) => Some(match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64()?),
            }),
            Json::String(s) => Some(Value::String(s.clone())),
            Json::Array(_) | Json::Object(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<&MvtValue> for Value {
    fn from(value: &MvtValue) -> Self {
        match value {
            MvtValue::String(s) => Value::String(s.clone()),
            MvtValue::Float(f) => Value::Float(*f as f64),
            MvtValue::Double(d) => Value::Float(*d),
            MvtValue::Int(i) | MvtValue::SInt(i) => Value::Int(*i),
            MvtValue::UInt(u) => i64::try_from(*u)
                .map(Value::Int)
                .unwrap_or(Value::Float(*u as f64)),
            MvtValue::Bool(b) => Value::Bool(*b),
            MvtValue::Null => Value::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn booleans_accept_literals_then_numbers() {
        assert_eq!(
            Value::parse_as(ParameterKind::Bool, "true"),
            Some(Value::Bool(true))
        );
        assert_eq!(
            Value::parse_as(ParameterKind::Bool, "0"),
            Some(Value::Bool(false))
        );
        assert_eq!(Value::parse_as(ParameterKind::Bool, "yes"), None);
    }

    #[test]
    fn numbers_parse_by_kind() {
        assert_eq!(
            Value::parse_as(ParameterKind::Int, "42"),
            Some(Value::Int(42))
        );
        assert_eq!(Value::parse_as(ParameterKind::Int, "4.2"), None);
        assert_eq!(
            Value::parse_as(ParameterKind::Float, "4.25"),
            Some(Value::Float(4.25))
        );
        assert_eq!(Value::parse_as(ParameterKind::Null, "x"), None);
    }

    #[test]
    fn display_round_trips_through_parse() {
        for value in [
            Value::Bool(false),
            Value::Int(-7),
            Value::Float(0.5),
            Value::String("en".to_owned()),
        ] {
            assert_eq!(
                Value::parse_as(value.kind(), &value.to_string()),
                Some(value)
            );
        }
    }

    #[test]
    fn literals() {
        assert_eq!(Value::from_literal("12"), Value::Int(12));
        assert_eq!(Value::from_literal("1.5"), Value::Float(1.5));
        assert_eq!(Value::from_literal("false"), Value::Bool(false));
        assert_eq!(Value::from_literal("park"), Value::String("park".to_owned()));
    }

    #[test]
    fn json_conversion() {
        assert_eq!(Value::from_json(&json!(3)), Some(Value::Int(3)));
        assert_eq!(Value::from_json(&json!(3.5)), Some(Value::Float(3.5)));
        assert_eq!(Value::from_json(&json!([1])), None);
        assert_eq!(Value::Float(2.5).to_json(), json!(2.5));
    }

    #[test]
    fn wire_values() {
        assert_eq!(Value::from(&MvtValue::UInt(5)), Value::Int(5));
        assert_eq!(
            Value::from(&MvtValue::UInt(u64::MAX)),
            Value::Float(u64::MAX as f64)
        );
        assert_eq!(Value::from(&MvtValue::Float(0.5)), Value::Float(0.5));
    }
}

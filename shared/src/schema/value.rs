//! Typed values produced by validating JSON against a [`PropType`](super::PropType)

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use super::ValueType;

/// Property name to value
pub type ValueMap = BTreeMap<String, PropValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Int(i32),
    Double(f64),
    String(String),
    Boolean(bool),
    Object(ValueMap),
    Array(Vec<PropValue>),
}

impl PropValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            PropValue::Int(_) => ValueType::Int,
            PropValue::Double(_) => ValueType::Double,
            PropValue::String(_) => ValueType::String,
            PropValue::Boolean(_) => ValueType::Boolean,
            PropValue::Object(_) => ValueType::Object,
            PropValue::Array(_) => ValueType::Array,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            PropValue::Int(v) => Value::from(*v),
            PropValue::Double(v) => Value::from(*v),
            PropValue::String(v) => Value::String(v.clone()),
            PropValue::Boolean(v) => Value::Bool(*v),
            PropValue::Object(map) => values_to_json(map),
            PropValue::Array(items) => Value::Array(items.iter().map(PropValue::to_json).collect()),
        }
    }

    /// Equality used by `enum` constraints. Doubles compare within an
    /// epsilon; everything else compares exactly.
    pub fn is_equivalent(&self, other: &PropValue) -> bool {
        match (self, other) {
            (PropValue::Double(a), PropValue::Double(b)) => doubles_equal(*a, *b),
            (PropValue::Object(a), PropValue::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.is_equivalent(vb))
            }
            (PropValue::Array(a), PropValue::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.is_equivalent(y))
            }
            (a, b) => a == b,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            PropValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            PropValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ValueMap> {
        match self {
            PropValue::Object(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PropValue]> {
        match self {
            PropValue::Array(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Int(v) => write!(f, "{v}"),
            PropValue::Double(v) => write!(f, "{v}"),
            PropValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// Render a value map as a JSON object
pub fn values_to_json(map: &ValueMap) -> Value {
    Value::Object(
        map.iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect(),
    )
}

fn doubles_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0)
}

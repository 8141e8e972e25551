use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A single generated cell.
///
/// The variant set is closed so batch handling stays exhaustive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    /// Arrays (one level) and matrices (nested composites).
    Composite(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(value) => Some(*value as f64),
            Value::Float64(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Approximate encoded width in bytes.
    pub fn approx_size(&self) -> u64 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int64(_) | Value::Float64(_) | Value::Timestamp(_) => 8,
            Value::String(value) => value.len() as u64,
            Value::Bytes(value) => value.len() as u64,
            Value::Composite(values) => values.iter().map(Value::approx_size).sum(),
        }
    }

    /// Stable textual key, used for uniqueness and membership checks.
    pub fn key(&self) -> String {
        match self {
            Value::Null => "<null>".to_string(),
            Value::Bool(value) => value.to_string(),
            Value::Int64(value) => value.to_string(),
            Value::Float64(value) => value.to_string(),
            Value::String(value) => value.clone(),
            Value::Bytes(value) => value.iter().map(|byte| format!("{byte:02x}")).collect(),
            Value::Timestamp(value) => value.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            Value::Composite(values) => {
                let inner: Vec<String> = values.iter().map(Value::key).collect();
                format!("{{{}}}", inner.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_of_composite_sums_elements() {
        let value = Value::Composite(vec![
            Value::Int64(1),
            Value::String("abc".to_string()),
            Value::Null,
        ]);
        assert_eq!(value.approx_size(), 11);
    }

    #[test]
    fn keys_distinguish_nested_values() {
        let flat = Value::Composite(vec![Value::Int64(1), Value::Int64(2)]);
        let nested = Value::Composite(vec![Value::Composite(vec![Value::Int64(1)]), Value::Int64(2)]);
        assert_eq!(flat.key(), "{1,2}");
        assert_ne!(flat.key(), nested.key());
        assert_eq!(Value::Bytes(vec![0, 255]).key(), "00ff");
    }
}

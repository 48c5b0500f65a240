use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// CLR-level type of a mapped property, constant or projected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClrType {
    Bool,
    Byte,
    Int16,
    Int32,
    Int64,
    Single,
    Double,
    Decimal,
    String,
    DateTime,
    Guid,
}

impl ClrType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ClrType::Byte
                | ClrType::Int16
                | ClrType::Int32
                | ClrType::Int64
                | ClrType::Single
                | ClrType::Double
                | ClrType::Decimal
        )
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            ClrType::Byte | ClrType::Int16 | ClrType::Int32 | ClrType::Int64
        )
    }

    pub fn is_floating(self) -> bool {
        matches!(self, ClrType::Single | ClrType::Double)
    }

    /// Result type of a binary arithmetic operator, following C# numeric promotion.
    pub fn promote(left: ClrType, right: ClrType) -> ClrType {
        if !left.is_numeric() || !right.is_numeric() {
            return left;
        }
        if left == ClrType::Decimal || right == ClrType::Decimal {
            ClrType::Decimal
        } else if left == ClrType::Double || right == ClrType::Double {
            ClrType::Double
        } else if left == ClrType::Single || right == ClrType::Single {
            ClrType::Single
        } else if left == ClrType::Int64 || right == ClrType::Int64 {
            ClrType::Int64
        } else {
            ClrType::Int32
        }
    }
}

impl fmt::Display for ClrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClrType::Bool => "bool",
            ClrType::Byte => "byte",
            ClrType::Int16 => "short",
            ClrType::Int32 => "int",
            ClrType::Int64 => "long",
            ClrType::Single => "float",
            ClrType::Double => "double",
            ClrType::Decimal => "decimal",
            ClrType::String => "string",
            ClrType::DateTime => "DateTime",
            ClrType::Guid => "Guid",
        };
        write!(f, "{}", name)
    }
}

/// CLR type plus nullability, carried by every translated expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeMapping {
    pub clr: ClrType,
    pub nullable: bool,
}

impl TypeMapping {
    pub fn new(clr: ClrType, nullable: bool) -> Self {
        TypeMapping { clr, nullable }
    }

    pub fn non_null(clr: ClrType) -> Self {
        TypeMapping {
            clr,
            nullable: false,
        }
    }

    pub fn bool() -> Self {
        TypeMapping::non_null(ClrType::Bool)
    }

    pub fn with_nullable(self, nullable: bool) -> Self {
        TypeMapping {
            clr: self.clr,
            nullable,
        }
    }
}

/// A runtime value: constants in the query tree, parameter values and row cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Byte(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    Single(f32),
    Double(f64),
    Decimal(f64),
    String(String),
    DateTime(NaiveDateTime),
    Guid(Uuid),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// CLR type of the value, `None` for null and lists.
    pub fn clr_type(&self) -> Option<ClrType> {
        match self {
            Value::Null | Value::List(_) => None,
            Value::Bool(_) => Some(ClrType::Bool),
            Value::Byte(_) => Some(ClrType::Byte),
            Value::Short(_) => Some(ClrType::Int16),
            Value::Int(_) => Some(ClrType::Int32),
            Value::Long(_) => Some(ClrType::Int64),
            Value::Single(_) => Some(ClrType::Single),
            Value::Double(_) => Some(ClrType::Double),
            Value::Decimal(_) => Some(ClrType::Decimal),
            Value::String(_) => Some(ClrType::String),
            Value::DateTime(_) => Some(ClrType::DateTime),
            Value::Guid(_) => Some(ClrType::Guid),
        }
    }

    /// Element type of a list value, taken from its first non-null element.
    pub fn element_type(&self) -> Option<ClrType> {
        match self {
            Value::List(items) => items.iter().find_map(|v| v.clr_type()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(*v as i64),
            Value::Short(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Single(v) => Some(*v as f64),
            Value::Double(v) | Value::Decimal(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Stable textual key used for identity resolution and row-group comparison.
    pub fn identity_key(values: &[Value]) -> String {
        values
            .iter()
            .map(|v| match v {
                Value::String(s) => format!("s:{}", s),
                other => format!("{}", other),
            })
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Plain JSON to a value: integers that fit become `Int`, other integers
    /// `Long`, fractions `Double`. Objects have no counterpart.
    pub fn from_json(json: &serde_json::Value) -> Option<Value> {
        Some(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(v) => i32::try_from(v).map(Value::Int).unwrap_or(Value::Long(v)),
                None => Value::Double(n.as_f64()?),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect::<Option<_>>()?)
            }
            serde_json::Value::Object(_) => return None,
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Short(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Single(v) => write!(f, "{}", v),
            Value::Double(v) | Value::Decimal(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::DateTime(d) => write!(f, "{}", d.format("%Y-%m-%dT%H:%M:%S%.3f")),
            Value::Guid(g) => write!(f, "{}", g),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_promotion() {
        assert_eq!(ClrType::promote(ClrType::Int16, ClrType::Int16), ClrType::Int32);
        assert_eq!(ClrType::promote(ClrType::Int32, ClrType::Int64), ClrType::Int64);
        assert_eq!(ClrType::promote(ClrType::Int16, ClrType::Decimal), ClrType::Decimal);
        assert_eq!(ClrType::promote(ClrType::Single, ClrType::Int32), ClrType::Single);
        assert_eq!(ClrType::promote(ClrType::Single, ClrType::Double), ClrType::Double);
    }

    #[test]
    fn test_identity_key_distinguishes_strings_from_numbers() {
        let a = Value::identity_key(&[Value::String("1".into())]);
        let b = Value::identity_key(&[Value::Int(1)]);
        assert_ne!(a, b);
        assert_eq!(a, Value::identity_key(&[Value::String("1".into())]));
    }

    #[test]
    fn test_from_plain_json() {
        let json = serde_json::json!([1, 5_000_000_000i64, 1.5, "x", null, true]);
        assert_eq!(
            Value::from_json(&json),
            Some(Value::List(vec![
                Value::Int(1),
                Value::Long(5_000_000_000),
                Value::Double(1.5),
                Value::from("x"),
                Value::Null,
                Value::Bool(true),
            ]))
        );
        assert_eq!(Value::from_json(&serde_json::json!({"a": 1})), None);
    }

    #[test]
    fn test_list_element_type() {
        let list = Value::from(vec!["ALFKI", "ANATR"]);
        assert_eq!(list.element_type(), Some(ClrType::String));
        assert_eq!(Value::List(vec![]).element_type(), None);
    }
}

use super::dialect::{Dialect, DialectKind, Paging};
use super::errors::SqlGeneratorError;
use super::sql_server::decimal_text;
use crate::query::{ClrType, TypeMapping, Value};

pub struct Sqlite;

impl Dialect for Sqlite {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn literal(&self, value: &Value, _type_mapping: TypeMapping) -> Result<String, SqlGeneratorError> {
        Ok(match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Byte(v) => v.to_string(),
            Value::Short(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Long(v) => v.to_string(),
            Value::Single(v) => decimal_text(*v as f64, value)?,
            Value::Double(v) => decimal_text(*v, value)?,
            Value::Decimal(v) => format!("'{}'", decimal_text(*v, value)?),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::Guid(g) => format!("'{}'", g.to_string().to_uppercase()),
            Value::List(_) => {
                return Err(SqlGeneratorError::InvalidLiteral {
                    value: value.to_string(),
                    type_name: "a scalar".to_string(),
                })
            }
        })
    }

    /// SQLite has storage classes, not types; casts go to the class.
    fn store_type(&self, type_mapping: TypeMapping) -> Option<&'static str> {
        Some(match type_mapping.clr {
            ClrType::Bool | ClrType::Byte | ClrType::Int16 | ClrType::Int32 | ClrType::Int64 => {
                "INTEGER"
            }
            ClrType::Single | ClrType::Double => "REAL",
            ClrType::Decimal => "TEXT",
            ClrType::String | ClrType::DateTime | ClrType::Guid => "TEXT",
        })
    }

    fn paging(&self, offset: Option<&str>, limit: Option<&str>) -> Paging {
        let trailer = match (offset, limit) {
            (None, None) => None,
            (None, Some(limit)) => Some(format!("LIMIT {}", limit)),
            (Some(offset), Some(limit)) => Some(format!("LIMIT {} OFFSET {}", limit, offset)),
            (Some(offset), None) => Some(format!("LIMIT -1 OFFSET {}", offset)),
        };
        Paging {
            head: None,
            trailer,
            needs_ordering: false,
            limit_first: true,
        }
    }
}

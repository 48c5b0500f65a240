use super::dialect::{Dialect, DialectKind, Paging};
use super::errors::SqlGeneratorError;
use crate::query::{AggregateFunction, ClrType, TypeMapping, Value};
use crate::query_planner::logical_expr::SqlOperator;

/// Transact-SQL.
pub struct SqlServer;

impl Dialect for SqlServer {
    fn kind(&self) -> DialectKind {
        DialectKind::SqlServer
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn literal(&self, value: &Value, type_mapping: TypeMapping) -> Result<String, SqlGeneratorError> {
        Ok(match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => format!("CAST({} AS bit)", if *b { 1 } else { 0 }),
            Value::Byte(v) => format!("CAST({} AS tinyint)", v),
            Value::Short(v) => format!("CAST({} AS smallint)", v),
            Value::Int(v) => v.to_string(),
            Value::Long(v) => format!("CAST({} AS bigint)", v),
            Value::Single(v) => format!("CAST({} AS real)", float_text(*v as f64, value)?),
            Value::Double(v) => format!("{}E0", float_text(*v, value)?),
            Value::Decimal(v) => decimal_text(*v, value)?,
            Value::String(s) => {
                if type_mapping.clr == ClrType::String {
                    format!("N'{}'", s.replace('\'', "''"))
                } else {
                    format!("'{}'", s.replace('\'', "''"))
                }
            }
            Value::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%dT%H:%M:%S%.3f")),
            Value::Guid(g) => format!("'{}'", g),
            Value::List(_) => {
                return Err(SqlGeneratorError::InvalidLiteral {
                    value: value.to_string(),
                    type_name: "a scalar".to_string(),
                })
            }
        })
    }

    fn store_type(&self, type_mapping: TypeMapping) -> Option<&'static str> {
        Some(match type_mapping.clr {
            ClrType::Bool => "bit",
            ClrType::Byte => "tinyint",
            ClrType::Int16 => "smallint",
            ClrType::Int32 => "int",
            ClrType::Int64 => "bigint",
            ClrType::Single => "real",
            ClrType::Double => "float",
            ClrType::Decimal => "decimal(18,2)",
            ClrType::String => "nvarchar(max)",
            ClrType::DateTime => "datetime2",
            ClrType::Guid => "uniqueidentifier",
        })
    }

    fn operator(&self, op: SqlOperator) -> &'static str {
        match op {
            SqlOperator::Concat => "+",
            SqlOperator::Equal => "=",
            SqlOperator::NotEqual => "<>",
            SqlOperator::Add => "+",
            SqlOperator::Subtract => "-",
            SqlOperator::Multiply => "*",
            SqlOperator::Divide => "/",
            SqlOperator::Modulo => "%",
            SqlOperator::LessThan => "<",
            SqlOperator::LessThanOrEqual => "<=",
            SqlOperator::GreaterThan => ">",
            SqlOperator::GreaterThanOrEqual => ">=",
            SqlOperator::And => "AND",
            SqlOperator::Or => "OR",
        }
    }

    fn has_boolean_values(&self) -> bool {
        false
    }

    fn aggregate(&self, function: AggregateFunction, arg: Option<&str>) -> String {
        match function {
            AggregateFunction::LongCount => format!("COUNT_BIG({})", arg.unwrap_or("*")),
            AggregateFunction::Count => format!("COUNT({})", arg.unwrap_or("*")),
            AggregateFunction::Sum => format!("SUM({})", arg.unwrap_or("*")),
            AggregateFunction::Average => format!("AVG({})", arg.unwrap_or("*")),
            AggregateFunction::Min => format!("MIN({})", arg.unwrap_or("*")),
            AggregateFunction::Max => format!("MAX({})", arg.unwrap_or("*")),
        }
    }

    /// `TOP(n)` when only a limit is present, `OFFSET .. FETCH` otherwise.
    fn paging(&self, offset: Option<&str>, limit: Option<&str>) -> Paging {
        match (offset, limit) {
            (None, None) => Paging::default(),
            (None, Some(limit)) => Paging {
                head: Some(format!("TOP({})", limit)),
                ..Paging::default()
            },
            (Some(offset), limit) => {
                let mut trailer = format!("OFFSET {} ROWS", offset);
                if let Some(limit) = limit {
                    trailer.push_str(&format!(" FETCH NEXT {} ROWS ONLY", limit));
                }
                Paging {
                    head: None,
                    trailer: Some(trailer),
                    needs_ordering: true,
                    limit_first: false,
                }
            }
        }
    }
}

pub(super) fn float_text(v: f64, value: &Value) -> Result<String, SqlGeneratorError> {
    if !v.is_finite() {
        return Err(SqlGeneratorError::InvalidLiteral {
            value: value.to_string(),
            type_name: "a finite number".to_string(),
        });
    }
    Ok(v.to_string())
}

/// Decimal text always carries a fractional part: `1.0`, `2.5`.
pub(super) fn decimal_text(v: f64, value: &Value) -> Result<String, SqlGeneratorError> {
    let mut text = float_text(v, value)?;
    if !text.contains('.') {
        text.push_str(".0");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn lit(value: Value) -> String {
        let clr = value.clr_type().unwrap_or(ClrType::Int32);
        SqlServer.literal(&value, TypeMapping::non_null(clr)).unwrap()
    }

    #[test]
    fn test_string_literals_are_unicode_and_escaped() {
        assert_eq!(lit(Value::String("O'Brien".to_string())), "N'O''Brien'");
    }

    #[test]
    fn test_typed_literals() {
        assert_eq!(lit(Value::Bool(true)), "CAST(1 AS bit)");
        assert_eq!(lit(Value::Long(5)), "CAST(5 AS bigint)");
        assert_eq!(lit(Value::Double(1.5)), "1.5E0");
        assert_eq!(lit(Value::Decimal(3.0)), "3.0");
        let date = NaiveDate::from_ymd_opt(1998, 5, 4)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(lit(Value::DateTime(date)), "'1998-05-04T00:00:00.000'");
    }

    #[test]
    fn test_non_finite_double_is_rejected() {
        let result = SqlServer.literal(&Value::Double(f64::NAN), TypeMapping::non_null(ClrType::Double));
        assert!(matches!(result, Err(SqlGeneratorError::InvalidLiteral { .. })));
    }

    #[test]
    fn test_identifier_quoting_escapes_brackets() {
        assert_eq!(SqlServer.quote_identifier("Order Details"), "[Order Details]");
        assert_eq!(SqlServer.quote_identifier("a]b"), "[a]]b]");
    }

    #[test]
    fn test_paging_forms() {
        assert_eq!(SqlServer.paging(None, Some("@p")).head.as_deref(), Some("TOP(@p)"));
        let paging = SqlServer.paging(Some("2"), Some("5"));
        assert_eq!(paging.trailer.as_deref(), Some("OFFSET 2 ROWS FETCH NEXT 5 ROWS ONLY"));
        assert!(paging.needs_ordering);
    }
}

//! Cosmos DB SQL: one container queried as `root c`, documents addressed by
//! bracketed property paths.

use super::dialect::{Construct, Dialect, DialectKind, Paging};
use super::errors::SqlGeneratorError;
use super::sql_server::{decimal_text, float_text};
use crate::query::{AggregateFunction, TypeMapping, Value};
use crate::query_planner::logical_expr::SqlOperator;
use crate::render_plan::render_expr::ColumnRef;

pub struct Cosmos;

/// Largest `LIMIT` Cosmos accepts; stands in for "no limit" after `OFFSET`.
const MAX_LIMIT: i32 = i32::MAX;

impl Dialect for Cosmos {
    fn kind(&self) -> DialectKind {
        DialectKind::Cosmos
    }

    fn quote_identifier(&self, name: &str) -> String {
        name.to_string()
    }

    fn column(&self, column: &ColumnRef) -> String {
        let mut text = column.table_alias.clone();
        for segment in &column.path {
            text.push('[');
            text.push_str(&json_string(segment));
            text.push(']');
        }
        text
    }

    fn table(&self, _name: &str, _schema: Option<&str>, alias: &str) -> String {
        format!("root {}", alias)
    }

    fn literal(&self, value: &Value, type_mapping: TypeMapping) -> Result<String, SqlGeneratorError> {
        Ok(match value {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Byte(v) => v.to_string(),
            Value::Short(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Long(v) => v.to_string(),
            Value::Single(v) => float_text(*v as f64, value)?,
            Value::Double(v) => float_text(*v, value)?,
            Value::Decimal(v) => decimal_text(*v, value)?,
            Value::String(s) => json_string(s),
            Value::DateTime(dt) => json_string(&dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
            Value::Guid(g) => json_string(&g.to_string()),
            Value::List(items) => {
                let rendered = items
                    .iter()
                    .map(|item| self.literal(item, type_mapping))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("[{}]", rendered.join(", "))
            }
        })
    }

    fn store_type(&self, _type_mapping: TypeMapping) -> Option<&'static str> {
        None
    }

    fn operator(&self, op: SqlOperator) -> &'static str {
        match op {
            SqlOperator::NotEqual => "!=",
            SqlOperator::Add => "+",
            SqlOperator::Subtract => "-",
            SqlOperator::Multiply => "*",
            SqlOperator::Divide => "/",
            SqlOperator::Modulo => "%",
            SqlOperator::Concat => "||",
            SqlOperator::Equal => "=",
            SqlOperator::LessThan => "<",
            SqlOperator::LessThanOrEqual => "<=",
            SqlOperator::GreaterThan => ">",
            SqlOperator::GreaterThanOrEqual => ">=",
            SqlOperator::And => "AND",
            SqlOperator::Or => "OR",
        }
    }

    fn constant_condition(&self, value: bool) -> &'static str {
        if value {
            "true"
        } else {
            "false"
        }
    }

    fn is_null(&self, operand: &str, negated: bool) -> String {
        if negated {
            format!("({} != null)", operand)
        } else {
            format!("({} = null)", operand)
        }
    }

    /// Nested ternaries; there is no `CASE`.
    fn case(&self, whens: &[(String, String)], else_result: Option<&str>) -> String {
        let mut sql = else_result.unwrap_or("null").to_string();
        for (condition, result) in whens.iter().rev() {
            sql = format!("({} ? {} : {})", condition, result, sql);
        }
        sql
    }

    fn aggregate(&self, function: AggregateFunction, arg: Option<&str>) -> String {
        let name = match function {
            AggregateFunction::Count | AggregateFunction::LongCount => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Average => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        };
        format!("{}({})", name, arg.unwrap_or("1"))
    }

    fn paging(&self, offset: Option<&str>, limit: Option<&str>) -> Paging {
        if offset.is_none() && limit.is_none() {
            return Paging::default();
        }
        let max = MAX_LIMIT.to_string();
        Paging {
            head: None,
            trailer: Some(format!(
                "OFFSET {} LIMIT {}",
                offset.unwrap_or("0"),
                limit.unwrap_or(&max)
            )),
            needs_ordering: false,
            limit_first: false,
        }
    }

    fn always_alias_items(&self) -> bool {
        true
    }

    fn supports(&self, construct: Construct) -> bool {
        !matches!(
            construct,
            Construct::Join
                | Construct::DerivedTable
                | Construct::RawSqlSource
                | Construct::SetOperation
                | Construct::Subquery
                | Construct::RowNumber
        )
    }
}

fn json_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ClrType;

    #[test]
    fn test_column_uses_bracketed_path() {
        let column = ColumnRef {
            table_alias: "c".to_string(),
            column: "Address_City".to_string(),
            path: vec!["Address".to_string(), "City".to_string()],
        };
        assert_eq!(Cosmos.column(&column), "c[\"Address\"][\"City\"]");
    }

    #[test]
    fn test_strings_are_json_escaped() {
        let text = Cosmos
            .literal(
                &Value::String("say \"hi\"".to_string()),
                TypeMapping::non_null(ClrType::String),
            )
            .unwrap();
        assert_eq!(text, "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_case_becomes_nested_ternary() {
        let whens = vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ];
        assert_eq!(Cosmos.case(&whens, Some("3")), "(a ? 1 : (b ? 2 : 3))");
    }

    #[test]
    fn test_limit_only_pages_from_zero() {
        assert_eq!(
            Cosmos.paging(None, Some("@p")).trailer.as_deref(),
            Some("OFFSET 0 LIMIT @p")
        );
    }
}

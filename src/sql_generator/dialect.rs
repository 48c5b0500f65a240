use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::SqlGeneratorError;
use super::{cosmos::Cosmos, sql_server::SqlServer, sqlite::Sqlite};
use crate::config::UnknownVariant;
use crate::query::{AggregateFunction, TypeMapping, Value};
use crate::query_planner::logical_expr::SqlOperator;
use crate::render_plan::render_expr::ColumnRef;

/// Target query language.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum DialectKind {
    #[default]
    SqlServer,
    Sqlite,
    Cosmos,
}

impl DialectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DialectKind::SqlServer => "sql-server",
            DialectKind::Sqlite => "sqlite",
            DialectKind::Cosmos => "cosmos",
        }
    }

    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            DialectKind::SqlServer => &SqlServer,
            DialectKind::Sqlite => &Sqlite,
            DialectKind::Cosmos => &Cosmos,
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DialectKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sql-server" | "sqlserver" | "mssql" => Ok(DialectKind::SqlServer),
            "sqlite" => Ok(DialectKind::Sqlite),
            "cosmos" => Ok(DialectKind::Cosmos),
            _ => Err(UnknownVariant {
                kind: "dialect",
                value: s.to_string(),
            }),
        }
    }
}

/// Statement constructs a dialect may lack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Construct {
    Join,
    DerivedTable,
    RawSqlSource,
    SetOperation,
    Subquery,
    RowNumber,
}

impl Construct {
    pub fn describe(self) -> &'static str {
        match self {
            Construct::Join => "joins",
            Construct::DerivedTable => "derived tables",
            Construct::RawSqlSource => "raw SQL sources",
            Construct::SetOperation => "set operations",
            Construct::Subquery => "subqueries",
            Construct::RowNumber => "ROW_NUMBER windows",
        }
    }
}

/// Paging clauses of one statement, already rendered.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Paging {
    /// Goes right after `SELECT [DISTINCT]`.
    pub head: Option<String>,
    /// Goes after `ORDER BY`.
    pub trailer: Option<String>,
    /// The trailer is only valid after an `ORDER BY`.
    pub needs_ordering: bool,
    /// The trailer prints the limit before the offset.
    pub limit_first: bool,
}

/// The points where dialects differ. The statement walk itself lives in
/// the writer and is shared.
pub trait Dialect: Send + Sync {
    fn kind(&self) -> DialectKind;

    fn quote_identifier(&self, name: &str) -> String;

    fn column(&self, column: &ColumnRef) -> String {
        format!(
            "{}.{}",
            self.quote_identifier(&column.table_alias),
            self.quote_identifier(&column.column)
        )
    }

    /// A table in `FROM`/`JOIN`, alias included.
    fn table(&self, name: &str, schema: Option<&str>, alias: &str) -> String {
        let table = match schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(name)
            ),
            None => self.quote_identifier(name),
        };
        format!("{} AS {}", table, self.quote_identifier(alias))
    }

    fn parameter(&self, name: &str) -> String {
        format!("@{}", name)
    }

    fn literal(&self, value: &Value, type_mapping: TypeMapping) -> Result<String, SqlGeneratorError>;

    /// Type name for `CAST`; `None` when the dialect has no casts.
    fn store_type(&self, type_mapping: TypeMapping) -> Option<&'static str>;

    fn operator(&self, op: SqlOperator) -> &'static str {
        match op {
            SqlOperator::Add => "+",
            SqlOperator::Subtract => "-",
            SqlOperator::Multiply => "*",
            SqlOperator::Divide => "/",
            SqlOperator::Modulo => "%",
            SqlOperator::Concat => "||",
            SqlOperator::Equal => "=",
            SqlOperator::NotEqual => "<>",
            SqlOperator::LessThan => "<",
            SqlOperator::LessThanOrEqual => "<=",
            SqlOperator::GreaterThan => ">",
            SqlOperator::GreaterThanOrEqual => ">=",
            SqlOperator::And => "AND",
            SqlOperator::Or => "OR",
        }
    }

    /// False when conditions and values are different things and must be
    /// converted into each other (`bit` columns on SQL Server).
    fn has_boolean_values(&self) -> bool {
        true
    }

    /// A condition that is always (or never) true.
    fn constant_condition(&self, value: bool) -> &'static str {
        if value {
            "1 = 1"
        } else {
            "0 = 1"
        }
    }

    fn is_null(&self, operand: &str, negated: bool) -> String {
        if negated {
            format!("{} IS NOT NULL", operand)
        } else {
            format!("{} IS NULL", operand)
        }
    }

    fn case(&self, whens: &[(String, String)], else_result: Option<&str>) -> String {
        let mut sql = String::from("CASE");
        for (condition, result) in whens {
            sql.push_str(&format!(" WHEN {} THEN {}", condition, result));
        }
        if let Some(e) = else_result {
            sql.push_str(&format!(" ELSE {}", e));
        }
        sql.push_str(" END");
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
        format!("{}({})", name, arg.unwrap_or("*"))
    }

    fn paging(&self, offset: Option<&str>, limit: Option<&str>) -> Paging;

    /// Every select item gets an explicit `AS`.
    fn always_alias_items(&self) -> bool {
        false
    }

    fn supports(&self, construct: Construct) -> bool {
        let _ = construct;
        true
    }
}

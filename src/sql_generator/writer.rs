//! Statement walk shared by every dialect.
//!
//! Output layout is fixed so identical render plans always give identical
//! text: one clause per line, nested statements indented by four spaces
//! inside their parentheses.

use super::dialect::{Construct, Dialect};
use super::errors::SqlGeneratorError;
use super::function_registry::render_function;
use crate::config::UnorderedPagingPolicy;
use crate::query::{SetOperationKind, TypeMapping, Value};
use crate::query_planner::logical_expr::{SqlFunction, SqlOperator};
use crate::render_plan::render_expr::{OrderByItem, OrderByOrder, RenderExpr};
use crate::render_plan::{JoinType, RenderQuery, SelectStatement, TableSource};

const INDENT: &str = "    ";

// Binding strength, loosest first.
const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_NOT: u8 = 3;
const PREC_COMPARISON: u8 = 4;
const PREC_ADDITIVE: u8 = 5;
const PREC_MULTIPLICATIVE: u8 = 6;
const PREC_UNARY: u8 = 7;
const PREC_ATOMIC: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Condition,
    Value,
}

pub struct SqlWriter<'a> {
    dialect: &'a dyn Dialect,
    unordered_paging: UnorderedPagingPolicy,
    /// Parameter names in order of first appearance in the text.
    parameters: Vec<String>,
}

impl<'a> SqlWriter<'a> {
    pub fn new(dialect: &'a dyn Dialect, unordered_paging: UnorderedPagingPolicy) -> Self {
        SqlWriter {
            dialect,
            unordered_paging,
            parameters: Vec::new(),
        }
    }

    pub fn into_parameters(self) -> Vec<String> {
        self.parameters
    }

    pub fn query(&mut self, query: &RenderQuery) -> Result<String, SqlGeneratorError> {
        match query {
            RenderQuery::Select(statement) => self.select(statement),
            RenderQuery::SetOperation { kind, left, right } => {
                self.require(Construct::SetOperation)?;
                let left = self.query(left)?;
                let right = self.query(right)?;
                Ok(format!("{}\n{}\n{}", left, set_keyword(*kind), right))
            }
            RenderQuery::Verbatim(sql) => Ok(sql.clone()),
        }
    }

    fn select(&mut self, statement: &SelectStatement) -> Result<String, SqlGeneratorError> {
        // Paging values are rendered up front; their parameters are recorded
        // where the dialect actually prints them.
        let offset = match &statement.offset {
            Some(e) => Some(self.detached(|w| w.value(e))?),
            None => None,
        };
        let limit = match &statement.limit {
            Some(e) => Some(self.detached(|w| w.value(e))?),
            None => None,
        };
        let paging = self.dialect.paging(
            offset.as_ref().map(|(text, _)| text.as_str()),
            limit.as_ref().map(|(text, _)| text.as_str()),
        );

        let mut head = String::from("SELECT");
        if statement.distinct {
            head.push_str(" DISTINCT");
        }
        if let Some(top) = &paging.head {
            head.push(' ');
            head.push_str(top);
            if let Some((_, names)) = &limit {
                self.record_all(names);
            }
        }
        let items = statement
            .select
            .iter()
            .map(|item| {
                let text = self.value(&item.expression)?;
                Ok(self.with_alias(text, &item.expression, &item.alias))
            })
            .collect::<Result<Vec<_>, SqlGeneratorError>>()?;
        head.push(' ');
        head.push_str(&items.join(", "));

        let mut lines = vec![head];
        if let Some(from) = &statement.from {
            lines.push(format!("FROM {}", self.source(from)?));
        }
        for join in &statement.joins {
            self.require(Construct::Join)?;
            let source = self.source(&join.source)?;
            lines.push(match join.join_type {
                JoinType::Cross => format!("CROSS JOIN {}", source),
                JoinType::Inner | JoinType::Left => {
                    let keyword = if join.join_type == JoinType::Inner {
                        "INNER JOIN"
                    } else {
                        "LEFT JOIN"
                    };
                    let on = match &join.on {
                        Some(on) => self.condition(on)?,
                        None => self.dialect.constant_condition(true).to_string(),
                    };
                    format!("{} {} ON {}", keyword, source, on)
                }
            });
        }
        if let Some(filter) = &statement.filter {
            lines.push(format!("WHERE {}", self.condition(filter)?));
        }
        if !statement.group_by.is_empty() {
            let keys = statement
                .group_by
                .iter()
                .map(|k| self.value(k))
                .collect::<Result<Vec<_>, _>>()?;
            lines.push(format!("GROUP BY {}", keys.join(", ")));
        }
        if let Some(having) = &statement.having {
            lines.push(format!("HAVING {}", self.condition(having)?));
        }
        if !statement.order_by.is_empty() {
            lines.push(format!("ORDER BY {}", self.order_by(&statement.order_by)?));
        } else if paging.needs_ordering && paging.trailer.is_some() {
            match self.unordered_paging {
                UnorderedPagingPolicy::SyntacticOrder => {
                    log::warn!(
                        "Paging without OrderBy on {}; rows are returned in no particular order",
                        self.dialect.kind()
                    );
                    lines.push("ORDER BY (SELECT 1)".to_string());
                }
                UnorderedPagingPolicy::Fail => {
                    return Err(SqlGeneratorError::UnorderedPaging(self.dialect.kind()))
                }
            }
        }
        if let Some(trailer) = &paging.trailer {
            let mut pieces = Vec::new();
            if paging.limit_first {
                pieces.extend(limit.iter().filter(|_| paging.head.is_none()));
                pieces.extend(offset.iter());
            } else {
                pieces.extend(offset.iter());
                pieces.extend(limit.iter().filter(|_| paging.head.is_none()));
            }
            for (_, names) in pieces {
                self.record_all(names);
            }
            lines.push(trailer.clone());
        }
        Ok(lines.join("\n"))
    }

    fn with_alias(&self, text: String, expression: &RenderExpr, alias: &str) -> String {
        if alias.is_empty() {
            return text;
        }
        let same_name = matches!(expression, RenderExpr::Column(c) if c.column == alias);
        if same_name && !self.dialect.always_alias_items() {
            text
        } else {
            format!("{} AS {}", text, self.dialect.quote_identifier(alias))
        }
    }

    fn source(&mut self, source: &TableSource) -> Result<String, SqlGeneratorError> {
        match source {
            TableSource::Table {
                name,
                schema,
                alias,
            } => Ok(self.dialect.table(name, schema.as_deref(), alias)),
            TableSource::Sql { sql, alias } => {
                self.require(Construct::RawSqlSource)?;
                Ok(format!(
                    "(\n{}\n) AS {}",
                    indent(sql),
                    self.dialect.quote_identifier(alias)
                ))
            }
            TableSource::Derived { query, alias } => {
                self.require(Construct::DerivedTable)?;
                let inner = self.query(query)?;
                Ok(format!(
                    "(\n{}\n) AS {}",
                    indent(&inner),
                    self.dialect.quote_identifier(alias)
                ))
            }
        }
    }

    fn order_by(&mut self, items: &[OrderByItem]) -> Result<String, SqlGeneratorError> {
        let parts = items
            .iter()
            .map(|item| {
                let text = self.value(&item.expression)?;
                Ok(match item.order {
                    OrderByOrder::Asc => text,
                    OrderByOrder::Desc => format!("{} DESC", text),
                })
            })
            .collect::<Result<Vec<_>, SqlGeneratorError>>()?;
        Ok(parts.join(", "))
    }

    fn subquery(&mut self, query: &RenderQuery) -> Result<String, SqlGeneratorError> {
        self.require(Construct::Subquery)?;
        let inner = self.query(query)?;
        Ok(format!("(\n{}\n)", indent(&inner)))
    }

    fn value(&mut self, expr: &RenderExpr) -> Result<String, SqlGeneratorError> {
        Ok(self.operand(expr, Position::Value)?.0)
    }

    fn condition(&mut self, expr: &RenderExpr) -> Result<String, SqlGeneratorError> {
        Ok(self.operand(expr, Position::Condition)?.0)
    }

    /// Renders `expr` for a slot that wants a condition or a value and
    /// returns the binding strength of the text produced.
    fn operand(&mut self, expr: &RenderExpr, position: Position) -> Result<(String, u8), SqlGeneratorError> {
        let text = self.expr(expr)?;
        let precedence = self.precedence(expr);
        if self.dialect.has_boolean_values() {
            return Ok((text, precedence));
        }
        match (position, expr.is_condition()) {
            (Position::Value, true) => {
                let true_value = self.dialect.literal(&Value::Bool(true), TypeMapping::bool())?;
                let false_value = self.dialect.literal(&Value::Bool(false), TypeMapping::bool())?;
                Ok((
                    self.dialect.case(&[(text, true_value)], Some(&false_value)),
                    PREC_ATOMIC,
                ))
            }
            (Position::Condition, false) => match expr {
                RenderExpr::Literal(Value::Bool(b), _) => Ok((
                    self.dialect.constant_condition(*b).to_string(),
                    PREC_COMPARISON,
                )),
                _ => {
                    let true_value = self.dialect.literal(&Value::Bool(true), TypeMapping::bool())?;
                    let left = if precedence <= PREC_COMPARISON {
                        format!("({})", text)
                    } else {
                        text
                    };
                    Ok((format!("{} = {}", left, true_value), PREC_COMPARISON))
                }
            },
            _ => Ok((text, precedence)),
        }
    }

    fn precedence(&self, expr: &RenderExpr) -> u8 {
        match expr {
            RenderExpr::Binary { op, .. } => operator_precedence(*op),
            RenderExpr::Not(_) => PREC_NOT,
            RenderExpr::IsNull(_)
            | RenderExpr::IsNotNull(_)
            | RenderExpr::Like { .. }
            | RenderExpr::InList { .. }
            | RenderExpr::InSubquery { .. } => PREC_COMPARISON,
            RenderExpr::Function {
                function: SqlFunction::StringContains,
                ..
            } => PREC_COMPARISON,
            RenderExpr::Negate(_) => PREC_UNARY,
            RenderExpr::Cast { expr, to } if self.dialect.store_type(*to).is_none() => {
                self.precedence(expr)
            }
            _ => PREC_ATOMIC,
        }
    }

    fn expr(&mut self, expr: &RenderExpr) -> Result<String, SqlGeneratorError> {
        match expr {
            RenderExpr::Column(column) => Ok(self.dialect.column(column)),
            RenderExpr::Literal(value, type_mapping) => self.dialect.literal(value, *type_mapping),
            RenderExpr::Parameter { name, .. } => {
                self.record(name);
                Ok(self.dialect.parameter(name))
            }
            RenderExpr::Binary { op, left, right } => self.binary(*op, left, right),
            RenderExpr::Not(inner) => Ok(format!("NOT ({})", self.condition(inner)?)),
            RenderExpr::Negate(inner) => {
                let (text, precedence) = self.operand(inner, Position::Value)?;
                Ok(if precedence < PREC_ATOMIC {
                    format!("-({})", text)
                } else {
                    format!("-{}", text)
                })
            }
            RenderExpr::IsNull(inner) | RenderExpr::IsNotNull(inner) => {
                let text = self.tight_value(inner)?;
                Ok(self
                    .dialect
                    .is_null(&text, matches!(expr, RenderExpr::IsNotNull(_))))
            }
            RenderExpr::Like {
                expr,
                pattern,
                escape,
            } => {
                let subject = self.tight_value(expr)?;
                let pattern = self.tight_value(pattern)?;
                let mut text = format!("{} LIKE {}", subject, pattern);
                if let Some(escape) = escape {
                    let escape = self.dialect.literal(
                        &Value::String(escape.to_string()),
                        TypeMapping::non_null(crate::query::ClrType::String),
                    )?;
                    text.push_str(&format!(" ESCAPE {}", escape));
                }
                Ok(text)
            }
            RenderExpr::InList {
                expr,
                values,
                negated,
            } => {
                if values.is_empty() {
                    return Ok(self.dialect.constant_condition(*negated).to_string());
                }
                let subject = self.tight_value(expr)?;
                let values = values
                    .iter()
                    .map(|v| self.value(v))
                    .collect::<Result<Vec<_>, _>>()?;
                let keyword = if *negated { "NOT IN" } else { "IN" };
                Ok(format!("{} {} ({})", subject, keyword, values.join(", ")))
            }
            RenderExpr::InSubquery {
                expr,
                query,
                negated,
            } => {
                let subject = self.tight_value(expr)?;
                let keyword = if *negated { "NOT IN" } else { "IN" };
                Ok(format!("{} {} {}", subject, keyword, self.subquery(query)?))
            }
            RenderExpr::Exists { query, negated } => {
                let keyword = if *negated { "NOT EXISTS" } else { "EXISTS" };
                Ok(format!("{} {}", keyword, self.subquery(query)?))
            }
            RenderExpr::ScalarSubquery(query) => self.subquery(query),
            RenderExpr::Function { function, args } => {
                let args = args
                    .iter()
                    .map(|a| self.value(a))
                    .collect::<Result<Vec<_>, _>>()?;
                render_function(self.dialect.kind(), *function, &args)
            }
            RenderExpr::Aggregate { function, arg } => {
                let arg = match arg {
                    Some(a) => Some(self.value(a)?),
                    None => None,
                };
                Ok(self.dialect.aggregate(*function, arg.as_deref()))
            }
            RenderExpr::Cast { expr, to } => {
                let inner = self.value(expr)?;
                Ok(match self.dialect.store_type(*to) {
                    Some(store_type) => format!("CAST({} AS {})", inner, store_type),
                    None => inner,
                })
            }
            RenderExpr::Case { whens, else_result } => {
                let whens = whens
                    .iter()
                    .map(|(w, t)| Ok((self.condition(w)?, self.value(t)?)))
                    .collect::<Result<Vec<_>, SqlGeneratorError>>()?;
                let else_result = match else_result {
                    Some(e) => Some(self.value(e)?),
                    None => None,
                };
                Ok(self.dialect.case(&whens, else_result.as_deref()))
            }
            RenderExpr::RowNumber {
                partition_by,
                order_by,
            } => {
                self.require(Construct::RowNumber)?;
                let mut window = String::new();
                if !partition_by.is_empty() {
                    let keys = partition_by
                        .iter()
                        .map(|p| self.value(p))
                        .collect::<Result<Vec<_>, _>>()?;
                    window.push_str(&format!("PARTITION BY {}", keys.join(", ")));
                }
                if !order_by.is_empty() {
                    if !window.is_empty() {
                        window.push(' ');
                    }
                    window.push_str(&format!("ORDER BY {}", self.order_by(order_by)?));
                }
                Ok(format!("ROW_NUMBER() OVER({})", window))
            }
        }
    }

    fn binary(&mut self, op: SqlOperator, left: &RenderExpr, right: &RenderExpr) -> Result<String, SqlGeneratorError> {
        let position = if op.is_logical() {
            Position::Condition
        } else {
            Position::Value
        };
        let precedence = operator_precedence(op);
        let (left_text, left_prec) = self.operand(left, position)?;
        let (right_text, right_prec) = self.operand(right, position)?;

        let wrap_left = left_prec < precedence
            || (left_prec == precedence && precedence == PREC_COMPARISON)
            || (op == SqlOperator::Or && left_prec == PREC_AND);
        let same_associative = matches!(right, RenderExpr::Binary { op: child, .. } if *child == op)
            && is_associative(op);
        let wrap_right = right_prec < precedence
            || (right_prec == precedence && !same_associative)
            || (op == SqlOperator::Or && right_prec == PREC_AND);

        Ok(format!(
            "{} {} {}",
            parenthesize(left_text, wrap_left),
            self.dialect.operator(op),
            parenthesize(right_text, wrap_right)
        ))
    }

    /// Value operand of a postfix predicate (`IS NULL`, `LIKE`, `IN`).
    fn tight_value(&mut self, expr: &RenderExpr) -> Result<String, SqlGeneratorError> {
        let (text, precedence) = self.operand(expr, Position::Value)?;
        Ok(parenthesize(text, precedence <= PREC_COMPARISON))
    }

    fn require(&self, construct: Construct) -> Result<(), SqlGeneratorError> {
        if self.dialect.supports(construct) {
            Ok(())
        } else {
            Err(SqlGeneratorError::unsupported(
                self.dialect.kind(),
                construct.describe(),
            ))
        }
    }

    fn record(&mut self, name: &str) {
        if !self.parameters.iter().any(|p| p == name) {
            self.parameters.push(name.to_string());
        }
    }

    fn record_all(&mut self, names: &[String]) {
        for name in names {
            self.record(name);
        }
    }

    /// Runs `f` and hands back the parameters it recorded instead of
    /// keeping them.
    fn detached(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<String, SqlGeneratorError>,
    ) -> Result<(String, Vec<String>), SqlGeneratorError> {
        let mark = self.parameters.len();
        let text = f(self)?;
        let names = self.parameters.split_off(mark);
        Ok((text, names))
    }
}

fn operator_precedence(op: SqlOperator) -> u8 {
    match op {
        SqlOperator::Or => PREC_OR,
        SqlOperator::And => PREC_AND,
        SqlOperator::Equal
        | SqlOperator::NotEqual
        | SqlOperator::LessThan
        | SqlOperator::LessThanOrEqual
        | SqlOperator::GreaterThan
        | SqlOperator::GreaterThanOrEqual => PREC_COMPARISON,
        SqlOperator::Add | SqlOperator::Subtract | SqlOperator::Concat => PREC_ADDITIVE,
        SqlOperator::Multiply | SqlOperator::Divide | SqlOperator::Modulo => PREC_MULTIPLICATIVE,
    }
}

fn is_associative(op: SqlOperator) -> bool {
    matches!(
        op,
        SqlOperator::And
            | SqlOperator::Or
            | SqlOperator::Add
            | SqlOperator::Multiply
            | SqlOperator::Concat
    )
}

fn parenthesize(text: String, wrap: bool) -> String {
    if wrap {
        format!("({})", text)
    } else {
        text
    }
}

fn set_keyword(kind: SetOperationKind) -> &'static str {
    match kind {
        SetOperationKind::Union => "UNION",
        SetOperationKind::Concat => "UNION ALL",
        SetOperationKind::Intersect => "INTERSECT",
        SetOperationKind::Except => "EXCEPT",
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", INDENT, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ClrType;
    use crate::render_plan::render_expr::ColumnRef;
    use crate::render_plan::SelectItem;
    use crate::sql_generator::dialect::DialectKind;

    fn column(alias: &str, name: &str) -> RenderExpr {
        RenderExpr::Column(ColumnRef {
            table_alias: alias.to_string(),
            column: name.to_string(),
            path: vec![name.to_string()],
        })
    }

    fn int(v: i32) -> RenderExpr {
        RenderExpr::Literal(Value::Int(v), TypeMapping::non_null(ClrType::Int32))
    }

    fn write(kind: DialectKind, expr: &RenderExpr, position: Position) -> String {
        let mut writer = SqlWriter::new(kind.dialect(), UnorderedPagingPolicy::SyntacticOrder);
        writer.operand(expr, position).unwrap().0
    }

    #[test]
    fn test_right_nested_subtraction_keeps_parentheses() {
        let expr = RenderExpr::binary(
            SqlOperator::Subtract,
            column("o", "A"),
            RenderExpr::binary(SqlOperator::Subtract, column("o", "B"), int(1)),
        );
        assert_eq!(
            write(DialectKind::SqlServer, &expr, Position::Value),
            "[o].[A] - ([o].[B] - 1)"
        );
    }

    #[test]
    fn test_and_inside_or_is_parenthesized() {
        let a = RenderExpr::binary(SqlOperator::Equal, column("c", "A"), int(1));
        let b = RenderExpr::binary(SqlOperator::Equal, column("c", "B"), int(2));
        let expr = RenderExpr::binary(
            SqlOperator::Or,
            RenderExpr::and(a.clone(), b.clone()),
            RenderExpr::IsNull(Box::new(column("c", "C"))),
        );
        assert_eq!(
            write(DialectKind::Sqlite, &expr, Position::Condition),
            "(\"c\".\"A\" = 1 AND \"c\".\"B\" = 2) OR \"c\".\"C\" IS NULL"
        );
    }

    #[test]
    fn test_sql_server_converts_between_conditions_and_bits() {
        let flag = column("p", "Discontinued");
        assert_eq!(
            write(DialectKind::SqlServer, &flag, Position::Condition),
            "[p].[Discontinued] = CAST(1 AS bit)"
        );
        let test = RenderExpr::IsNull(Box::new(column("c", "Region")));
        assert_eq!(
            write(DialectKind::SqlServer, &test, Position::Value),
            "CASE WHEN [c].[Region] IS NULL THEN CAST(1 AS bit) ELSE CAST(0 AS bit) END"
        );
        assert_eq!(
            write(
                DialectKind::SqlServer,
                &RenderExpr::Literal(Value::Bool(false), TypeMapping::bool()),
                Position::Condition
            ),
            "0 = 1"
        );
    }

    #[test]
    fn test_empty_in_list_is_constant_condition() {
        let expr = RenderExpr::InList {
            expr: Box::new(column("c", "City")),
            values: Vec::new(),
            negated: false,
        };
        assert_eq!(write(DialectKind::SqlServer, &expr, Position::Condition), "0 = 1");
        assert_eq!(write(DialectKind::Cosmos, &expr, Position::Condition), "false");
    }

    #[test]
    fn test_parameters_follow_text_order_with_top() {
        let statement = SelectStatement {
            select: vec![SelectItem {
                expression: column("c", "City"),
                alias: "City".to_string(),
            }],
            from: Some(TableSource::Table {
                name: "Customers".to_string(),
                schema: None,
                alias: "c".to_string(),
            }),
            filter: Some(RenderExpr::binary(
                SqlOperator::Equal,
                column("c", "City"),
                RenderExpr::Parameter {
                    name: "city".to_string(),
                    type_mapping: TypeMapping::non_null(ClrType::String),
                },
            )),
            limit: Some(RenderExpr::Parameter {
                name: "p_0".to_string(),
                type_mapping: TypeMapping::non_null(ClrType::Int32),
            }),
            ..SelectStatement::default()
        };
        let mut writer = SqlWriter::new(DialectKind::SqlServer.dialect(), UnorderedPagingPolicy::Fail);
        let text = writer.query(&RenderQuery::select(statement.clone())).unwrap();
        assert_eq!(
            text,
            "SELECT TOP(@p_0) [c].[City]\nFROM [Customers] AS [c]\nWHERE [c].[City] = @city"
        );
        assert_eq!(writer.into_parameters(), vec!["p_0".to_string(), "city".to_string()]);

        let mut writer = SqlWriter::new(DialectKind::Sqlite.dialect(), UnorderedPagingPolicy::Fail);
        writer.query(&RenderQuery::select(statement)).unwrap();
        assert_eq!(writer.into_parameters(), vec!["city".to_string(), "p_0".to_string()]);
    }

    #[test]
    fn test_indent_skips_blank_lines() {
        assert_eq!(indent("a\n\nb"), "    a\n\n    b");
    }
}

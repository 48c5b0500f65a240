//! Removes derived tables that add nothing but a filter.
//!
//! `SELECT t.a FROM (SELECT x.a FROM X AS x WHERE p) AS t` becomes
//! `SELECT x.a FROM X AS x WHERE p`. A derived table on the right of a join
//! folds the same way with its filter moved into the join condition. A
//! top-level statement that only re-selects every column of one derived
//! table, in order, is replaced by that table's query.
//!
//! Derived tables with `DISTINCT`, grouping, paging, ordering, joins or
//! window functions are left alone.

use std::collections::HashMap;

use super::render_expr::RenderExpr;
use super::{RenderQuery, SelectStatement, TableSource};

pub fn flatten(query: RenderQuery) -> RenderQuery {
    let query = flatten_query(query);
    unwrap_trivial(query)
}

fn flatten_query(query: RenderQuery) -> RenderQuery {
    match query {
        RenderQuery::Select(statement) => RenderQuery::Select(Box::new(flatten_select(*statement))),
        RenderQuery::SetOperation { kind, left, right } => RenderQuery::SetOperation {
            kind,
            left: Box::new(flatten_query(*left)),
            right: Box::new(flatten_query(*right)),
        },
        verbatim @ RenderQuery::Verbatim(_) => verbatim,
    }
}

fn flatten_select(mut statement: SelectStatement) -> SelectStatement {
    if let Some(from) = statement.from.take() {
        statement.from = Some(match inline_candidate(flatten_source(from)) {
            Ok(inlined) => {
                substitute(&mut statement, &inlined.alias, &inlined.columns);
                statement.filter = match (inlined.filter, statement.filter.take()) {
                    (Some(inner), Some(outer)) => Some(RenderExpr::and(inner, outer)),
                    (inner, outer) => inner.or(outer),
                };
                inlined.from
            }
            Err(from) => from,
        });
    }

    let joins = std::mem::take(&mut statement.joins);
    for mut join in joins {
        match inline_candidate(flatten_source(join.source)) {
            Ok(inlined) => {
                substitute(&mut statement, &inlined.alias, &inlined.columns);
                if let Some(on) = &mut join.on {
                    substitute_expr(on, &inlined.alias, &inlined.columns);
                }
                join.source = inlined.from;
                if let Some(filter) = inlined.filter {
                    match join.on.take() {
                        Some(on) => join.on = Some(RenderExpr::and(on, filter)),
                        None => {
                            statement.filter = Some(match statement.filter.take() {
                                Some(outer) => RenderExpr::and(filter, outer),
                                None => filter,
                            })
                        }
                    }
                }
            }
            Err(source) => join.source = source,
        }
        statement.joins.push(join);
    }
    statement
}

fn flatten_source(source: TableSource) -> TableSource {
    match source {
        TableSource::Derived { query, alias } => TableSource::Derived {
            query: Box::new(flatten_query(*query)),
            alias,
        },
        other => other,
    }
}

/// A derived table folded into its parent.
struct Inlined {
    alias: String,
    from: TableSource,
    filter: Option<RenderExpr>,
    /// Output name -> expression computing it.
    columns: HashMap<String, RenderExpr>,
}

fn inline_candidate(source: TableSource) -> Result<Inlined, TableSource> {
    let (query, alias) = match source {
        TableSource::Derived { query, alias } => (query, alias),
        other => return Err(other),
    };
    match *query {
        RenderQuery::Select(inner) if inner.is_simple_filter() && inner.from.is_some() => {
            let SelectStatement {
                select,
                from,
                filter,
                ..
            } = *inner;
            match from {
                Some(from) => Ok(Inlined {
                    alias,
                    from,
                    filter,
                    columns: select
                        .into_iter()
                        .map(|item| (item.alias, item.expression))
                        .collect(),
                }),
                None => Err(TableSource::Derived {
                    query: Box::new(RenderQuery::select(SelectStatement {
                        select,
                        filter,
                        ..SelectStatement::default()
                    })),
                    alias,
                }),
            }
        }
        other => Err(TableSource::Derived {
            query: Box::new(other),
            alias,
        }),
    }
}

fn substitute(statement: &mut SelectStatement, alias: &str, columns: &HashMap<String, RenderExpr>) {
    statement.rewrite_columns(&mut |c| {
        if c.table_alias == alias {
            columns.get(&c.column).cloned()
        } else {
            None
        }
    });
}

fn substitute_expr(expr: &mut RenderExpr, alias: &str, columns: &HashMap<String, RenderExpr>) {
    expr.rewrite_columns(&mut |c| {
        if c.table_alias == alias {
            columns.get(&c.column).cloned()
        } else {
            None
        }
    });
}

/// `SELECT t.a, t.b FROM (q) AS t` with nothing else becomes `q`.
fn unwrap_trivial(query: RenderQuery) -> RenderQuery {
    let RenderQuery::Select(statement) = query else {
        return query;
    };
    let trivial = !statement.distinct
        && statement.joins.is_empty()
        && statement.filter.is_none()
        && statement.group_by.is_empty()
        && statement.having.is_none()
        && statement.order_by.is_empty()
        && !statement.has_paging();
    if !trivial {
        return RenderQuery::Select(statement);
    }
    let Some(TableSource::Derived { query: inner, alias }) = &statement.from else {
        return RenderQuery::Select(statement);
    };
    let inner_columns = inner.column_names();
    let reselects_all = inner_columns.len() == statement.select.len()
        && statement
            .select
            .iter()
            .zip(&inner_columns)
            .all(|(item, name)| match &item.expression {
                RenderExpr::Column(c) => c.table_alias == *alias && c.column == *name && item.alias == *name,
                _ => false,
            });
    if !reselects_all {
        return RenderQuery::Select(statement);
    }
    match statement.from {
        Some(TableSource::Derived { query, .. }) => *query,
        _ => RenderQuery::Select(statement),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SetOperationKind;
    use crate::query_planner::logical_expr::SqlOperator;
    use crate::render_plan::render_expr::ColumnRef;
    use crate::render_plan::{Join, JoinType, SelectItem};

    fn column(alias: &str, name: &str) -> RenderExpr {
        RenderExpr::Column(ColumnRef {
            table_alias: alias.to_string(),
            column: name.to_string(),
            path: vec![name.to_string()],
        })
    }

    fn item(alias: &str, name: &str) -> SelectItem {
        SelectItem {
            expression: column(alias, name),
            alias: name.to_string(),
        }
    }

    fn table(name: &str, alias: &str) -> TableSource {
        TableSource::Table {
            name: name.to_string(),
            schema: None,
            alias: alias.to_string(),
        }
    }

    fn filtered_orders() -> SelectStatement {
        SelectStatement {
            select: vec![item("o", "OrderID"), item("o", "CustomerID")],
            from: Some(table("Orders", "o")),
            filter: Some(RenderExpr::IsNotNull(Box::new(column("o", "CustomerID")))),
            ..SelectStatement::default()
        }
    }

    #[test]
    fn test_filter_only_derived_table_is_inlined() {
        let outer = SelectStatement {
            select: vec![item("t", "OrderID")],
            from: Some(TableSource::Derived {
                query: Box::new(RenderQuery::select(filtered_orders())),
                alias: "t".to_string(),
            }),
            ..SelectStatement::default()
        };
        let flattened = flatten(RenderQuery::select(outer));
        let RenderQuery::Select(s) = flattened else {
            panic!("expected select");
        };
        assert_eq!(s.from, Some(table("Orders", "o")));
        assert_eq!(s.select[0].expression, column("o", "OrderID"));
        assert!(s.filter.is_some());
    }

    #[test]
    fn test_left_joined_filter_moves_into_condition() {
        let outer = SelectStatement {
            select: vec![item("c", "CustomerID"), item("t", "OrderID")],
            from: Some(table("Customers", "c")),
            joins: vec![Join {
                join_type: JoinType::Left,
                source: TableSource::Derived {
                    query: Box::new(RenderQuery::select(filtered_orders())),
                    alias: "t".to_string(),
                },
                on: Some(RenderExpr::binary(
                    SqlOperator::Equal,
                    column("c", "CustomerID"),
                    column("t", "CustomerID"),
                )),
            }],
            ..SelectStatement::default()
        };
        let RenderQuery::Select(s) = flatten(RenderQuery::select(outer)) else {
            panic!("expected select");
        };
        assert_eq!(s.joins[0].source, table("Orders", "o"));
        let on = s.joins[0].on.as_ref().unwrap();
        assert!(!on.references_alias("t"));
        assert!(matches!(on, RenderExpr::Binary { op: SqlOperator::And, .. }));
        assert!(s.filter.is_none());
    }

    #[test]
    fn test_paged_derived_table_is_kept() {
        let mut inner = filtered_orders();
        inner.limit = Some(RenderExpr::Literal(
            crate::query::Value::Int(5),
            crate::query::TypeMapping::non_null(crate::query::ClrType::Int32),
        ));
        let outer = SelectStatement {
            select: vec![item("t", "OrderID")],
            from: Some(TableSource::Derived {
                query: Box::new(RenderQuery::select(inner)),
                alias: "t".to_string(),
            }),
            filter: Some(RenderExpr::IsNotNull(Box::new(column("t", "OrderID")))),
            ..SelectStatement::default()
        };
        let RenderQuery::Select(s) = flatten(RenderQuery::select(outer)) else {
            panic!("expected select");
        };
        assert!(matches!(s.from, Some(TableSource::Derived { .. })));
    }

    #[test]
    fn test_wrapper_around_set_operation_is_removed() {
        let union = RenderQuery::SetOperation {
            kind: SetOperationKind::Union,
            left: Box::new(RenderQuery::select(filtered_orders())),
            right: Box::new(RenderQuery::select(filtered_orders())),
        };
        let outer = SelectStatement {
            select: vec![item("t", "OrderID"), item("t", "CustomerID")],
            from: Some(TableSource::Derived {
                query: Box::new(union),
                alias: "t".to_string(),
            }),
            ..SelectStatement::default()
        };
        assert!(matches!(
            flatten(RenderQuery::select(outer)),
            RenderQuery::SetOperation { kind: SetOperationKind::Union, .. }
        ));
    }
}

//! Alias assignment and column resolution for lowering.
//!
//! Aliases are unique across the whole command, nested statements
//! included: the first source over `Customers` is `c`, the next ones `c0`,
//! `c1` in the order they are met.
//!
//! A [`Scope`] maps the logical sources of the statement being built to the
//! alias that currently exposes them. Once a statement is pushed into a
//! derived table, its sources are reached through the derived table's
//! projected column names instead.

use std::collections::{HashMap, HashSet};

use super::errors::RenderBuildError;
use super::render_expr::{ColumnRef, RenderExpr};
use crate::query_planner::logical_expr::{ColumnRef as LogicalColumn, LogicalExpr, SourceId};

#[derive(Debug, Clone, Default)]
pub struct AliasGenerator {
    used: HashSet<String>,
}

impl AliasGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `hint` if still free, else `hint` with the first free numeric suffix.
    pub fn next(&mut self, hint: &str) -> String {
        let base = if hint.is_empty() { "t" } else { hint };
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 0usize;
        loop {
            let candidate = format!("{}{}", base, n);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// How a logical source is reached from the current statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Table (or raw SQL) under `alias`; columns keep their names.
    Table { alias: String },
    /// Derived table under `alias`; maps source column -> projected name.
    Derived {
        alias: String,
        columns: HashMap<String, String>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    sources: HashMap<SourceId, Binding>,
    /// Non-column expressions already computed by a derived table.
    computed: Vec<(LogicalExpr, RenderExpr)>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_table(&mut self, source: SourceId, alias: &str) {
        self.sources.insert(
            source,
            Binding::Table {
                alias: alias.to_string(),
            },
        );
    }

    /// Records that `expr`, projected by the derived table `alias` as
    /// `name`, is read back from there.
    pub fn bind_projected(&mut self, alias: &str, name: &str, expr: &LogicalExpr) {
        match expr {
            LogicalExpr::Column(c) => {
                let binding = self
                    .sources
                    .entry(c.source)
                    .or_insert_with(|| Binding::Derived {
                        alias: alias.to_string(),
                        columns: HashMap::new(),
                    });
                if let Binding::Derived { columns, .. } = binding {
                    columns
                        .entry(c.column.clone())
                        .or_insert_with(|| name.to_string());
                }
            }
            other => self.computed.push((
                other.clone(),
                RenderExpr::Column(ColumnRef {
                    table_alias: alias.to_string(),
                    column: name.to_string(),
                    path: vec![name.to_string()],
                }),
            )),
        }
    }

    /// Takes over every binding of `other` (the right side of a join).
    pub fn merge(&mut self, other: Scope) {
        self.sources.extend(other.sources);
        self.computed.extend(other.computed);
    }

    pub fn resolve_column(&self, column: &LogicalColumn) -> Option<RenderExpr> {
        match self.sources.get(&column.source)? {
            Binding::Table { alias } => Some(RenderExpr::Column(ColumnRef {
                table_alias: alias.clone(),
                column: column.column.clone(),
                path: column.path.clone(),
            })),
            Binding::Derived { alias, columns } => {
                columns.get(&column.column).map(|name| {
                    RenderExpr::Column(ColumnRef {
                        table_alias: alias.clone(),
                        column: name.clone(),
                        path: vec![name.clone()],
                    })
                })
            }
        }
    }

    /// A computed expression projected by a derived table. Nullability is
    /// ignored: outer joins above the derived table change it, not the value.
    pub fn resolve_computed(&self, expr: &LogicalExpr) -> Option<RenderExpr> {
        if self.computed.is_empty() {
            return None;
        }
        let wanted = same_value_form(expr);
        self.computed
            .iter()
            .find(|(e, _)| same_value_form(e) == wanted)
            .map(|(_, r)| r.clone())
    }

    pub fn knows(&self, source: SourceId) -> bool {
        self.sources.contains_key(&source)
    }
}

/// Expression with nullability erased, for identity comparisons.
pub fn same_value_form(expr: &LogicalExpr) -> LogicalExpr {
    expr.clone().into_nullable()
}

/// Resolves a column against a chain of scopes, innermost first.
pub fn resolve_in(scopes: &[&Scope], column: &LogicalColumn) -> Result<RenderExpr, RenderBuildError> {
    scopes
        .iter()
        .find_map(|s| s.resolve_column(column))
        .ok_or_else(|| RenderBuildError::UnresolvedColumn {
            source_id: column.source,
            column: column.column.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{ClrType, TypeMapping};

    fn logical_column(source: u32, name: &str, nullable: bool) -> LogicalColumn {
        LogicalColumn {
            source: SourceId(source),
            column: name.to_string(),
            path: vec![name.to_string()],
            type_mapping: TypeMapping::new(ClrType::String, nullable),
        }
    }

    #[test]
    fn test_aliases_get_numeric_suffixes_in_order() {
        let mut aliases = AliasGenerator::new();
        assert_eq!(aliases.next("c"), "c");
        assert_eq!(aliases.next("c"), "c0");
        assert_eq!(aliases.next("o"), "o");
        assert_eq!(aliases.next("c"), "c1");
        assert_eq!(aliases.next(""), "t");
    }

    #[test]
    fn test_derived_binding_renames_columns() {
        let mut scope = Scope::new();
        let column = logical_column(3, "CustomerID", false);
        scope.bind_projected("t", "CustomerID0", &LogicalExpr::Column(column.clone()));
        match scope.resolve_column(&column) {
            Some(RenderExpr::Column(c)) => {
                assert_eq!(c.table_alias, "t");
                assert_eq!(c.column, "CustomerID0");
            }
            other => panic!("expected column, got {:?}", other),
        }
    }

    #[test]
    fn test_computed_lookup_ignores_nullability() {
        let mut scope = Scope::new();
        let upper = |nullable| LogicalExpr::Function {
            function: crate::query_planner::logical_expr::SqlFunction::Upper,
            args: vec![LogicalExpr::Column(logical_column(1, "City", nullable))],
            type_mapping: TypeMapping::new(ClrType::String, nullable),
        };
        scope.bind_projected("t", "c", &upper(false));
        assert!(scope.resolve_computed(&upper(true)).is_some());
    }

    #[test]
    fn test_unknown_source_fails_to_resolve() {
        let scope = Scope::new();
        let err = resolve_in(&[&scope], &logical_column(9, "X", false)).unwrap_err();
        assert!(matches!(err, RenderBuildError::UnresolvedColumn { .. }));
    }
}

//! Rewrites comparisons so SQL three-valued logic yields C# results.
//!
//! In C# `null == null` is true and `x != null` is true for any non-null
//! `x`; in SQL both comparisons are unknown. Comparisons over nullable
//! operands get explicit `IS NULL` terms, and negations are pushed down to
//! the comparisons so a negated unknown cannot turn into a match.
//!
//! Rules, for nullable `a` and `b` and non-nullable `n`:
//! ```text
//! a == null        ->  a IS NULL
//! a == n           ->  a = n                 (condition)
//! a != n           ->  a <> n OR a IS NULL
//! a == b           ->  a = b OR (a IS NULL AND b IS NULL)
//! a != b           ->  (a <> b OR a IS NULL OR b IS NULL)
//!                      AND (a IS NOT NULL OR b IS NOT NULL)
//! NOT (a < n)      ->  a >= n OR a IS NULL
//! NOT (x AND y)    ->  NOT x OR NOT y
//! ```
//! Outside conditions (projected booleans) an unknown would surface as a
//! NULL value, so equalities also get `IS NOT NULL` guards there. Join
//! conditions keep plain SQL semantics.

use std::sync::Arc;

use crate::query_planner::{
    analyzer::analyzer_pass::{rewrite_plan, AnalyzerPass, AnalyzerResult},
    errors::Pass,
    logical_expr::{LogicalExpr, SqlOperator},
    logical_plan::{ExprPosition, LogicalPlan},
    transformed::Transformed,
};
use crate::query::Value;

pub struct NullSemantics;

impl AnalyzerPass for NullSemantics {
    fn pass(&self) -> Pass {
        Pass::NullSemantics
    }

    fn analyze(&self, logical_plan: Arc<LogicalPlan>) -> AnalyzerResult<Transformed<Arc<LogicalPlan>>> {
        rewrite_plan(logical_plan, &mut |expr, position| {
            Ok(match position {
                ExprPosition::JoinCondition => expr,
                ExprPosition::Predicate => rewrite(expr, true),
                _ => rewrite(expr, false),
            })
        })
    }
}

/// `condition`: an unknown result is read as false (WHERE, CASE WHEN).
fn rewrite(expr: LogicalExpr, condition: bool) -> LogicalExpr {
    match expr {
        LogicalExpr::Not(inner) => match negate(*inner) {
            LogicalExpr::Not(irreducible) => LogicalExpr::Not(Box::new(rewrite(*irreducible, false))),
            negated => rewrite(negated, condition),
        },
        LogicalExpr::Binary {
            op: op @ (SqlOperator::Equal | SqlOperator::NotEqual),
            left,
            right,
            type_mapping,
        } if left.type_mapping().clr != crate::query::ClrType::Bool || !left.is_predicate() => {
            let left = rewrite(*left, false);
            let right = rewrite(*right, false);
            equality(op, left, right, condition).unwrap_or_else(|(left, right)| LogicalExpr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                type_mapping,
            })
        }
        LogicalExpr::Binary {
            op: op @ (SqlOperator::And | SqlOperator::Or),
            left,
            right,
            ..
        } => LogicalExpr::binary(op, rewrite(*left, condition), rewrite(*right, condition)),
        LogicalExpr::Case {
            whens,
            else_result,
            type_mapping,
        } => LogicalExpr::Case {
            whens: whens
                .into_iter()
                .map(|(when, then)| (rewrite(when, true), rewrite(then, false)))
                .collect(),
            else_result: else_result.map(|e| Box::new(rewrite(*e, false))),
            type_mapping,
        },
        other => {
            let original = other.clone();
            other
                .map_children(&mut |child| Ok(rewrite(child, false)))
                .unwrap_or(original)
        }
    }
}

/// Expands `left op right` for `==`/`!=`; gives the operands back when the
/// plain comparison is already correct.
fn equality(
    op: SqlOperator,
    left: LogicalExpr,
    right: LogicalExpr,
    condition: bool,
) -> Result<LogicalExpr, (LogicalExpr, LogicalExpr)> {
    let equal = op == SqlOperator::Equal;
    let is_null = |e: &LogicalExpr| LogicalExpr::IsNull(Box::new(e.clone()));
    let is_not_null = |e: &LogicalExpr| LogicalExpr::IsNotNull(Box::new(e.clone()));

    match (left.is_null_literal(), right.is_null_literal()) {
        (true, true) => return Ok(LogicalExpr::bool_literal(equal)),
        (false, true) => return Ok(if equal { is_null(&left) } else { is_not_null(&left) }),
        (true, false) => return Ok(if equal { is_null(&right) } else { is_not_null(&right) }),
        (false, false) => {}
    }

    let plain = LogicalExpr::binary(op, left.clone(), right.clone());
    match (left.is_nullable(), right.is_nullable()) {
        (false, false) => Err((left, right)),
        (true, true) => Ok(if equal {
            let both_null = LogicalExpr::and(is_null(&left), is_null(&right));
            let matched = if condition {
                plain
            } else {
                LogicalExpr::and(
                    LogicalExpr::and(plain, is_not_null(&left)),
                    is_not_null(&right),
                )
            };
            LogicalExpr::or(matched, both_null)
        } else {
            let differs = LogicalExpr::or(LogicalExpr::or(plain, is_null(&left)), is_null(&right));
            let not_both_null = LogicalExpr::or(is_not_null(&left), is_not_null(&right));
            LogicalExpr::and(differs, not_both_null)
        }),
        (l, _) => {
            let nullable = if l { &left } else { &right };
            Ok(if equal {
                if condition {
                    return Err((left, right));
                }
                LogicalExpr::and(plain, is_not_null(nullable))
            } else {
                LogicalExpr::or(plain, is_null(nullable))
            })
        }
    }
}

/// Logical negation pushed as far down as it goes. Returns `Not(x)` only for
/// an `x` that has no cheaper negated form.
fn negate(expr: LogicalExpr) -> LogicalExpr {
    match expr {
        LogicalExpr::Not(inner) => *inner,
        LogicalExpr::Literal(Value::Bool(b), tm) => LogicalExpr::Literal(Value::Bool(!b), tm),
        LogicalExpr::Binary {
            op: SqlOperator::And,
            left,
            right,
            ..
        } => LogicalExpr::or(negate_wrapped(*left), negate_wrapped(*right)),
        LogicalExpr::Binary {
            op: SqlOperator::Or,
            left,
            right,
            ..
        } => LogicalExpr::and(negate_wrapped(*left), negate_wrapped(*right)),
        LogicalExpr::Binary {
            op,
            left,
            right,
            type_mapping,
        } if op.is_comparison() => {
            let Some(negated) = op.negated_comparison() else {
                return LogicalExpr::Not(Box::new(LogicalExpr::Binary {
                    op,
                    left,
                    right,
                    type_mapping,
                }));
            };
            let compared = LogicalExpr::binary(negated, (*left).clone(), (*right).clone());
            if matches!(op, SqlOperator::Equal | SqlOperator::NotEqual) {
                // equality handles its own null terms
                return compared;
            }
            let mut result = compared;
            for operand in [left, right] {
                if operand.is_nullable() && !operand.is_null_literal() {
                    result = LogicalExpr::or(result, LogicalExpr::IsNull(operand));
                }
            }
            result
        }
        LogicalExpr::IsNull(inner) => LogicalExpr::IsNotNull(inner),
        LogicalExpr::IsNotNull(inner) => LogicalExpr::IsNull(inner),
        LogicalExpr::InList {
            expr,
            values,
            negated,
        } => {
            let list_has_null = values.iter().any(LogicalExpr::is_null_literal);
            let nullable = expr.is_nullable();
            let flipped = LogicalExpr::InList {
                expr: expr.clone(),
                values,
                negated: !negated,
            };
            if !negated && nullable && !list_has_null {
                LogicalExpr::or(flipped, LogicalExpr::IsNull(expr))
            } else {
                flipped
            }
        }
        LogicalExpr::InSubquery {
            expr,
            subquery,
            negated,
        } => LogicalExpr::InSubquery {
            expr,
            subquery,
            negated: !negated,
        },
        LogicalExpr::Exists { subquery, negated } => LogicalExpr::Exists {
            subquery,
            negated: !negated,
        },
        other => LogicalExpr::Not(Box::new(other)),
    }
}

/// Negation of an operand of AND/OR, left as `NOT x` for the outer rewrite
/// to push further.
fn negate_wrapped(expr: LogicalExpr) -> LogicalExpr {
    match expr {
        LogicalExpr::Not(inner) => *inner,
        other => LogicalExpr::Not(Box::new(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{ClrType, TypeMapping};
    use crate::query_planner::logical_expr::{ColumnRef, SourceId};

    fn column(name: &str, nullable: bool) -> LogicalExpr {
        LogicalExpr::Column(ColumnRef {
            source: SourceId(0),
            column: name.to_string(),
            path: vec![name.to_string()],
            type_mapping: TypeMapping::new(ClrType::String, nullable),
        })
    }

    fn text(value: &str) -> LogicalExpr {
        LogicalExpr::literal(Value::String(value.to_string()))
    }

    #[test]
    fn test_equality_with_null_literal_becomes_is_null() {
        let expr = LogicalExpr::equal(column("Region", true), LogicalExpr::literal(Value::Null));
        assert_eq!(rewrite(expr, true), LogicalExpr::IsNull(Box::new(column("Region", true))));
    }

    #[test]
    fn test_nullable_equality_in_condition_stays_plain() {
        let expr = LogicalExpr::equal(column("City", true), text("London"));
        assert_eq!(rewrite(expr.clone(), true), expr);
    }

    #[test]
    fn test_nullable_inequality_adds_is_null() {
        let expr = LogicalExpr::binary(SqlOperator::NotEqual, column("City", true), text("London"));
        let expected = LogicalExpr::or(
            LogicalExpr::binary(SqlOperator::NotEqual, column("City", true), text("London")),
            LogicalExpr::IsNull(Box::new(column("City", true))),
        );
        assert_eq!(rewrite(expr, true), expected);
    }

    #[test]
    fn test_not_equal_pushes_through_negation() {
        let expr = LogicalExpr::Not(Box::new(LogicalExpr::equal(column("City", true), text("London"))));
        let expected = LogicalExpr::or(
            LogicalExpr::binary(SqlOperator::NotEqual, column("City", true), text("London")),
            LogicalExpr::IsNull(Box::new(column("City", true))),
        );
        assert_eq!(rewrite(expr, true), expected);
    }

    #[test]
    fn test_two_nullable_operands_match_when_both_null() {
        let expr = LogicalExpr::equal(column("City", true), column("Region", true));
        let expected = LogicalExpr::or(
            LogicalExpr::equal(column("City", true), column("Region", true)),
            LogicalExpr::and(
                LogicalExpr::IsNull(Box::new(column("City", true))),
                LogicalExpr::IsNull(Box::new(column("Region", true))),
            ),
        );
        assert_eq!(rewrite(expr, true), expected);
    }

    #[test]
    fn test_de_morgan_on_non_nullable_operands() {
        let a = LogicalExpr::equal(column("A", false), text("x"));
        let b = LogicalExpr::equal(column("B", false), text("y"));
        let expr = LogicalExpr::Not(Box::new(LogicalExpr::and(a, b)));
        let expected = LogicalExpr::or(
            LogicalExpr::binary(SqlOperator::NotEqual, column("A", false), text("x")),
            LogicalExpr::binary(SqlOperator::NotEqual, column("B", false), text("y")),
        );
        assert_eq!(rewrite(expr, true), expected);
    }

    #[test]
    fn test_non_nullable_comparison_is_untouched() {
        let expr = LogicalExpr::equal(column("CustomerID", false), text("ALFKI"));
        assert_eq!(rewrite(expr.clone(), false), expr);
    }
}

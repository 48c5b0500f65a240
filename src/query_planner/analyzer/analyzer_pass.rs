use std::sync::Arc;

use crate::query_planner::{
    errors::{Pass, QueryPlannerError},
    logical_expr::LogicalExpr,
    logical_plan::{ExprPosition, LogicalPlan},
    transformed::Transformed,
};

pub type AnalyzerResult<T> = Result<T, QueryPlannerError>;

pub trait AnalyzerPass {
    fn pass(&self) -> Pass;

    fn analyze(&self, logical_plan: Arc<LogicalPlan>) -> AnalyzerResult<Transformed<Arc<LogicalPlan>>> {
        Ok(Transformed::No(logical_plan))
    }
}

type Rewriter<'a> = dyn FnMut(LogicalExpr, ExprPosition) -> AnalyzerResult<LogicalExpr> + 'a;

/// Passes every expression of `plan` through `rewrite`, entering the plans
/// of nested subqueries first. Reports whether anything changed.
pub(super) fn rewrite_plan(
    plan: Arc<LogicalPlan>,
    rewrite: &mut Rewriter<'_>,
) -> AnalyzerResult<Transformed<Arc<LogicalPlan>>> {
    let rewritten = rewrite_all(&plan, rewrite)?;
    if rewritten == plan {
        Ok(Transformed::No(plan))
    } else {
        Ok(Transformed::Yes(rewritten))
    }
}

fn rewrite_all(plan: &LogicalPlan, rewrite: &mut Rewriter<'_>) -> AnalyzerResult<Arc<LogicalPlan>> {
    plan.transform_expressions(&mut |expr, position| {
        let expr = expr.transform_up(&mut |e| rewrite_subquery(e, rewrite))?;
        rewrite(expr, position)
    })
}

fn rewrite_subquery(expr: LogicalExpr, rewrite: &mut Rewriter<'_>) -> AnalyzerResult<LogicalExpr> {
    Ok(match expr {
        LogicalExpr::Exists { subquery, negated } => LogicalExpr::Exists {
            subquery: rewrite_all(&subquery, rewrite)?,
            negated,
        },
        LogicalExpr::InSubquery {
            expr,
            subquery,
            negated,
        } => LogicalExpr::InSubquery {
            expr,
            subquery: rewrite_all(&subquery, rewrite)?,
            negated,
        },
        LogicalExpr::ScalarSubquery {
            subquery,
            type_mapping,
        } => LogicalExpr::ScalarSubquery {
            subquery: rewrite_all(&subquery, rewrite)?,
            type_mapping,
        },
        other => other,
    })
}

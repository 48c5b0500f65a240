//! Rejects client-only content outside the final projection.
//!
//! The normalizer turns anything it cannot translate into a client-only
//! marker. Only projections can evaluate those after materialization; in a
//! filter, ordering, join key, grouping key or paging count the query has to
//! fail, naming the operator and the offending expression.

use std::sync::Arc;

use crate::query_planner::{
    analyzer::analyzer_pass::{AnalyzerPass, AnalyzerResult},
    errors::{Pass, QueryPlannerError},
    logical_plan::{ExprPosition, LogicalPlan},
    shape::ProjectionShape,
    transformed::Transformed,
};

pub struct ClientEvalValidation;

impl AnalyzerPass for ClientEvalValidation {
    fn pass(&self) -> Pass {
        Pass::ClientEvalValidation
    }

    fn analyze(&self, logical_plan: Arc<LogicalPlan>) -> AnalyzerResult<Transformed<Arc<LogicalPlan>>> {
        validate(&logical_plan)?;
        Ok(Transformed::No(logical_plan))
    }
}

fn validate(plan: &LogicalPlan) -> AnalyzerResult<()> {
    for (expr, position) in plan.expressions() {
        if let Some(description) = expr.find_client_only() {
            return Err(QueryPlannerError::translation_failed_with_context(
                description,
                format!("in {}", operator_name(plan, position)),
            ));
        }
    }
    match plan {
        LogicalPlan::Distinct(node) => {
            if let Some(description) = first_client(&node.input.shape()) {
                return Err(QueryPlannerError::translation_failed_with_context(
                    description,
                    "in Distinct",
                ));
            }
        }
        LogicalPlan::SetOperation(node) => {
            if let Some(description) = first_client(&node.shape) {
                return Err(QueryPlannerError::translation_failed_with_context(
                    description,
                    format!("in {}", node.kind.name()),
                ));
            }
        }
        _ => {}
    }
    for input in plan.inputs() {
        validate(input)?;
    }
    Ok(())
}

/// Operator named in the error: aggregate arguments belong to the
/// aggregate, not to a `Select`.
fn operator_name(plan: &LogicalPlan, position: ExprPosition) -> &'static str {
    match (plan, position) {
        (LogicalPlan::Aggregate(_), ExprPosition::Projection) => "Aggregate",
        (LogicalPlan::GroupBy(_), _) => "GroupBy",
        _ => position.operator(),
    }
}

fn first_client(shape: &ProjectionShape) -> Option<String> {
    match shape {
        ProjectionShape::Client(c) => Some(c.description.clone()),
        ProjectionShape::Composite(members) => members.iter().find_map(|(_, s)| first_client(s)),
        ProjectionShape::Grouping { key, element } => first_client(key).or_else(|| first_client(element)),
        ProjectionShape::Collection(c) => first_client(&c.element),
        ProjectionShape::Entity(e) => e.includes.iter().find_map(|(_, s)| first_client(s)),
        ProjectionShape::Scalar(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{TypeMapping, Value};
    use crate::query_planner::logical_expr::LogicalExpr;
    use crate::query_planner::logical_plan::{Filter, Projection};
    use crate::query_planner::shape::ClientProjection;

    fn filter_over_empty(predicate: LogicalExpr) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Filter(Filter {
            input: Arc::new(LogicalPlan::Empty),
            predicate,
            correlation: false,
        }))
    }

    #[test]
    fn test_client_marker_in_filter_fails_with_operator() {
        let plan = filter_over_empty(LogicalExpr::client_only("c.IsLondon"));
        let err = ClientEvalValidation.analyze(plan).unwrap_err();
        assert_eq!(
            err,
            QueryPlannerError::translation_failed_with_context("c.IsLondon", "in Where")
        );
    }

    #[test]
    fn test_client_projection_is_allowed() {
        let plan = Arc::new(LogicalPlan::Projection(Projection {
            input: Arc::new(LogicalPlan::Empty),
            shape: ProjectionShape::Client(ClientProjection {
                function: "Format".to_string(),
                args: vec![ProjectionShape::Scalar(LogicalExpr::literal(Value::Int(1)))],
                description: "Format(1)".to_string(),
            }),
        }));
        let result = ClientEvalValidation.analyze(plan).unwrap();
        assert!(!result.is_yes());
    }

    #[test]
    fn test_server_predicate_passes() {
        let plan = filter_over_empty(LogicalExpr::Literal(Value::Bool(true), TypeMapping::bool()));
        assert!(ClientEvalValidation.analyze(plan).is_ok());
    }
}

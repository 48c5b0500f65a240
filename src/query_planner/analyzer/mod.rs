//! # Query Analyzer
//!
//! Checks and rewrites applied to the normalized plan before lowering:
//!
//! ```text
//! 1. ClientEvalValidation - client-only content outside the projection fails
//! 2. NullSemantics        - C# null comparison semantics in SQL predicates
//! 3. TypeCoercion         - casts for aggregate and mixed-width arithmetic
//! ```
//!
//! Passes run in order, each over the whole plan including subquery plans.

use std::sync::Arc;

use crate::query_planner::{
    analyzer::{
        analyzer_pass::{AnalyzerPass, AnalyzerResult},
        client_eval_validation::ClientEvalValidation,
        null_semantics::NullSemantics,
        type_coercion::TypeCoercion,
    },
    logical_plan::{LogicalPlan, QueryPlan},
};

mod analyzer_pass;
mod client_eval_validation;
mod null_semantics;
mod type_coercion;

pub fn analyze(query_plan: QueryPlan) -> AnalyzerResult<QueryPlan> {
    let passes: [&dyn AnalyzerPass; 3] = [&ClientEvalValidation, &NullSemantics, &TypeCoercion];
    let mut plan: Arc<LogicalPlan> = query_plan.root.clone();
    for pass in passes {
        let transformed = pass.analyze(plan)?;
        log::debug!(
            "ANALYZER: {} {}",
            pass.pass(),
            if transformed.is_yes() { "rewrote the plan" } else { "left the plan unchanged" }
        );
        plan = transformed.get_plan();
    }
    log::trace!("ANALYZER: final plan\n{}", plan);
    Ok(QueryPlan {
        root: plan,
        ..query_plan
    })
}

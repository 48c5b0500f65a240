//! Error types for planning context operations.
//!
//! These errors occur when a row source or query scope the normalizer refers
//! to was never registered.

use thiserror::Error;

use crate::query_planner::logical_expr::SourceId;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlanCtxError {
    #[error("No source context for `{id}`")]
    Source { id: SourceId },

    #[error("No open query scope")]
    Scope,
}

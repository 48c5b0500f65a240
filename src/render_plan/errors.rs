use thiserror::Error;

use crate::query_planner::logical_expr::SourceId;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RenderBuildError {
    /// No lowering rule for the construct.
    #[error("Unsupported query shape: {0}")]
    UnsupportedShape(String),

    #[error("Column {column} of source {source_id} is not visible in this scope")]
    UnresolvedColumn { source_id: SourceId, column: String },

    #[error("Expression {0} is not projected by the statement")]
    UnprojectedExpression(String),

    #[error("Client-only expression reached lowering: {0}")]
    ClientOnlyExpression(String),

    #[error("Invalid render plan: {0}")]
    InvalidRenderPlan(String),

    #[error("Result shape: {0}")]
    Shape(String),
}

impl RenderBuildError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        RenderBuildError::UnsupportedShape(message.into())
    }
}

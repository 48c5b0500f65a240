//! Crate-level error returned by the executor.
//!
//! Stage errors fold into the categories callers act on: translation
//! failures and unsupported shapes surface before anything runs, the rest
//! during execution.

use thiserror::Error;

use crate::executor::binding::ParameterError;
use crate::executor::errors::ConnectionError;
use crate::materializer::MaterializeError;
use crate::model::ModelError;
use crate::query_planner::errors::QueryPlannerError;
use crate::render_plan::errors::RenderBuildError;
use crate::sql_generator::SqlGeneratorError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    #[error("The LINQ expression '{expression}' could not be translated{}", reason_suffix(.reason))]
    TranslationFailed {
        expression: String,
        reason: Option<String>,
    },

    #[error("Unsupported query shape: {0}")]
    UnsupportedShape(String),

    #[error("Query execution failed: {0}")]
    ExecutionFailed(#[from] ConnectionError),

    #[error("The query was cancelled")]
    CancellationRequested,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error("Materialization failed: {0}")]
    Materialization(#[from] MaterializeError),

    #[error("{0}")]
    Cardinality(String),
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(r) => format!(" ({})", r),
        None => String::new(),
    }
}

impl QueryError {
    pub fn is_translation_error(&self) -> bool {
        matches!(
            self,
            QueryError::TranslationFailed { .. } | QueryError::UnsupportedShape(_)
        )
    }
}

impl From<QueryPlannerError> for QueryError {
    fn from(err: QueryPlannerError) -> Self {
        match err {
            QueryPlannerError::TranslationFailed {
                expression,
                context,
            } => QueryError::TranslationFailed {
                expression,
                reason: context,
            },
            QueryPlannerError::UnsupportedShape(message) => QueryError::UnsupportedShape(message),
            QueryPlannerError::MissingParameter(name) => {
                QueryError::Parameter(ParameterError::Missing(name))
            }
            QueryPlannerError::Model(e) => QueryError::Model(e),
            other => QueryError::UnsupportedShape(other.to_string()),
        }
    }
}

impl From<RenderBuildError> for QueryError {
    fn from(err: RenderBuildError) -> Self {
        match err {
            RenderBuildError::ClientOnlyExpression(expression) => QueryError::TranslationFailed {
                expression,
                reason: None,
            },
            other => QueryError::UnsupportedShape(other.to_string()),
        }
    }
}

impl From<SqlGeneratorError> for QueryError {
    fn from(err: SqlGeneratorError) -> Self {
        match err {
            SqlGeneratorError::UnorderedPaging(dialect) => QueryError::TranslationFailed {
                expression: "Skip/Take".to_string(),
                reason: Some(format!("{} paging requires an OrderBy", dialect)),
            },
            SqlGeneratorError::InvalidLiteral { value, type_name } => QueryError::TranslationFailed {
                expression: value,
                reason: Some(format!("not representable as {}", type_name)),
            },
            SqlGeneratorError::UnboundParameter(name) => {
                QueryError::Parameter(ParameterError::Missing(name))
            }
            other => QueryError::UnsupportedShape(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_generator::DialectKind;

    #[test]
    fn test_planner_failures_keep_their_category() {
        let err: QueryError = QueryPlannerError::translation_failed_with_context("c.IsLondon", "in Where").into();
        assert_eq!(
            err.to_string(),
            "The LINQ expression 'c.IsLondon' could not be translated (in Where)"
        );
        assert!(err.is_translation_error());
    }

    #[test]
    fn test_unordered_paging_is_a_translation_failure() {
        let err: QueryError = SqlGeneratorError::UnorderedPaging(DialectKind::SqlServer).into();
        assert!(matches!(err, QueryError::TranslationFailed { .. }));
    }

    #[test]
    fn test_connection_failures_are_execution_failures() {
        let err: QueryError = ConnectionError::Provider("deadlock".to_string()).into();
        assert_eq!(err.to_string(), "Query execution failed: Provider error: deadlock");
        assert!(!err.is_translation_error());
    }
}

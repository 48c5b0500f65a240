use std::fmt::Display;

use thiserror::Error;

use crate::model::errors::ModelError;
use crate::query_planner::plan_ctx::errors::PlanCtxError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum Pass {
    Normalizer,
    ClientEvalValidation,
    NullSemantics,
    TypeCoercion,
}

impl Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pass::Normalizer => write!(f, "Normalizer"),
            Pass::ClientEvalValidation => write!(f, "ClientEvalValidation"),
            Pass::NullSemantics => write!(f, "NullSemantics"),
            Pass::TypeCoercion => write!(f, "TypeCoercion"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryPlannerError {
    /// A sub-expression in a server-only position has no translation.
    #[error("The LINQ expression '{expression}' could not be translated{}", context_suffix(.context))]
    TranslationFailed {
        expression: String,
        context: Option<String>,
    },

    #[error("Unsupported query shape: {0}")]
    UnsupportedShape(String),

    #[error("No value supplied for parameter `{0}`")]
    MissingParameter(String),

    #[error("Model: {0}")]
    Model(#[from] ModelError),

    #[error("PlanCtxError: {0}")]
    PlanCtx(#[from] PlanCtxError),

    #[error("{pass}: {message}")]
    Internal { pass: Pass, message: String },
}

fn context_suffix(context: &Option<String>) -> String {
    match context {
        Some(c) => format!(" ({})", c),
        None => String::new(),
    }
}

impl QueryPlannerError {
    pub fn translation_failed(expression: impl Into<String>) -> Self {
        QueryPlannerError::TranslationFailed {
            expression: expression.into(),
            context: None,
        }
    }

    /// Translation failure with the operator it occurred in, e.g.
    /// `in Where(c => c.IsLondon)`.
    pub fn translation_failed_with_context(
        expression: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        QueryPlannerError::TranslationFailed {
            expression: expression.into(),
            context: Some(context.into()),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        QueryPlannerError::UnsupportedShape(message.into())
    }

    pub fn internal(pass: Pass, message: impl Into<String>) -> Self {
        QueryPlannerError::Internal {
            pass,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_failed_message_carries_expression() {
        let err = QueryPlannerError::translation_failed_with_context("c.IsLondon", "in Where");
        assert_eq!(
            err.to_string(),
            "The LINQ expression 'c.IsLondon' could not be translated (in Where)"
        );
    }
}

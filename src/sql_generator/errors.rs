use thiserror::Error;

use super::dialect::DialectKind;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SqlGeneratorError {
    /// The statement uses a construct the dialect cannot express.
    #[error("{dialect} cannot express {construct}")]
    UnsupportedConstruct {
        dialect: DialectKind,
        construct: String,
    },

    #[error("Skip/Take without OrderBy cannot be paged deterministically on {0}; add an ordering or set unordered_paging to syntactic-order")]
    UnorderedPaging(DialectKind),

    #[error("Literal {value} cannot be written as {type_name}")]
    InvalidLiteral { value: String, type_name: String },

    #[error("Parameter @{0} is used by the command but has no binding")]
    UnboundParameter(String),
}

impl SqlGeneratorError {
    pub fn unsupported(dialect: DialectKind, construct: impl Into<String>) -> Self {
        SqlGeneratorError::UnsupportedConstruct {
            dialect,
            construct: construct.into(),
        }
    }
}

use thiserror::Error;

use crate::query::ClrType;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MaterializeError {
    #[error("Row has {width} columns, column {ordinal} was requested")]
    MissingColumn { ordinal: usize, width: usize },

    #[error("Column {ordinal} is null but {clr} is not nullable")]
    UnexpectedNull { ordinal: usize, clr: ClrType },

    #[error("Cannot read column {ordinal} value '{value}' as {clr}")]
    InvalidCast {
        ordinal: usize,
        value: String,
        clr: ClrType,
    },

    #[error("No client function `{function}` registered (needed by '{description}')")]
    UnknownClientFunction {
        function: String,
        description: String,
    },

    #[error("Client function `{function}` failed: {message}")]
    ClientFunction { function: String, message: String },
}

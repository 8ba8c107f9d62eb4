//! Error types for the database engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Parse errors
    #[error("syntax error: {0}")]
    Syntax(String),

    // Bind errors
    #[error("parameter ${0} cannot be resolved to a concrete type")]
    UnresolvedParameterType(usize),

    #[error("column not found: {0}")]
    UnknownColumn(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("{function} is not allowed on type {datatype}")]
    DisallowedAggregate { function: String, datatype: String },

    // Catalog errors
    #[error("catalog entry not found: {0}")]
    NotFound(String),

    #[error("{0} already exists")]
    DuplicateName(String),

    #[error("cannot drop {name}: {dependents} dependent object(s) exist")]
    DependencyExists { name: String, dependents: usize },

    // Conversion errors
    #[error("value {value} is out of range for {target}")]
    OutOfRange {
        value: String,
        target: String,
        row: Option<usize>,
    },

    #[error("could not convert {text} to {target}")]
    InvalidFormat {
        text: String,
        target: String,
        row: Option<usize>,
    },

    // Constraint errors
    #[error("NOT NULL constraint violated on column {0}")]
    NotNull(String),

    #[error("value for column {column} exceeds the declared width {width}")]
    TypeOverflow { column: String, width: usize },

    // Transaction errors
    #[error("serialization conflict: {0}")]
    Serialization(String),

    #[error("transaction is aborted, only ROLLBACK is accepted")]
    TransactionAborted,

    // System errors
    #[error("io error: {0}")]
    Io(String),

    #[error("query interrupted")]
    Interrupted,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Attach a row index to a conversion error produced while executing a
    /// cast over a chunk. Other errors pass through unchanged.
    pub fn at_row(self, index: usize) -> Self {
        match self {
            Error::OutOfRange { value, target, .. } => Error::OutOfRange {
                value,
                target,
                row: Some(index),
            },
            Error::InvalidFormat { text, target, .. } => Error::InvalidFormat {
                text,
                target,
                row: Some(index),
            },
            other => other,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Io(format!("encoding: {}", err))
    }
}

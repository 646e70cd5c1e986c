use thiserror::Error;

use crate::handler::HandlerError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("failed to convert column `{column}`: {source}")]
    Handler {
        column: String,
        #[source]
        source: HandlerError,
    },
    #[error("document in {table}.{column} changed since it was read")]
    Conflict { table: String, column: String },
}

/// Caller mistakes detected before any statement is issued.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("table name is required")]
    MissingTableName,
    #[error("column name is required")]
    MissingColumnName,
    #[error("at least one column is required")]
    EmptyColumnList,
    #[error("column `{column}` does not exist on table `{table}`")]
    UnknownColumn { table: String, column: String },
    #[error("column `{column}` of type {tag} does not hold documents")]
    NotDocumentColumn { column: String, tag: String },
    #[error("invalid document path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

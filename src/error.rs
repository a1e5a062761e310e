use std::time::Duration;
use thiserror::Error;

use crate::cursor::CursorState;
use crate::value::ColumnType;

/// Mapping and schema defects. Raised once, when the plan for a record type
/// is first built, and never retried.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("no mapping registered for record type {0}")]
    UnmappedType(String),
    #[error("cannot bulk load {kind} mapping {property} on {type_name}")]
    UnsupportedMapping {
        type_name: String,
        property: String,
        kind: &'static str,
    },
    #[error("property {property} not found on {type_name}")]
    PropertyNotFound { type_name: String, property: String },
    #[error("property {property} on {type_name} is {actual}, mapping expects {expected}")]
    PropertyKindMismatch {
        type_name: String,
        property: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("column {column} maps {type_name}.{property} as {mapped}, but the property is {declared}")]
    ColumnTypeMismatch {
        type_name: String,
        property: String,
        column: String,
        mapped: ColumnType,
        declared: ColumnType,
    },
    #[error("column {column} is not nullable, but {type_name}.{property} is optional")]
    NullabilityMismatch {
        type_name: String,
        property: String,
        column: String,
    },
    #[error("column {column} is mapped more than once on {type_name}")]
    DuplicateColumn { type_name: String, column: String },
    #[error("record type {0} maps no columns")]
    EmptySchema(String),
    #[error("mapping for {mapped} cannot be applied to record type {actual}")]
    TypeMismatch { mapped: String, actual: String },
}

/// Caller programming errors: cursor misuse and calling conventions.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("no current row, cursor is {0}")]
    NoCurrentRow(CursorState),
    #[error("cursor is closed")]
    CursorClosed,
    #[error("column ordinal {ordinal} out of range for {count} columns")]
    OrdinalOutOfRange { ordinal: usize, count: usize },
    #[error("unknown column {0}")]
    UnknownColumn(String),
    #[error("column {ordinal} holds {actual}, cannot read it as {expected}")]
    InvalidCast {
        ordinal: usize,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("blocking bulk insert called from within an async runtime")]
    BlockingInAsyncContext,
}

/// Failures originating in the bulk-copy transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("bulk copy timed out after {0:?}")]
    Timeout(Duration),
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("destination {destination} rejected rows: {reason}")]
    Rejected { destination: String, reason: String },
}

#[derive(Debug, Error)]
pub enum BulkLoadError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("bulk insert cancelled")]
    Cancelled,
}

impl From<sqlx::Error> for BulkLoadError {
    fn from(err: sqlx::Error) -> Self {
        BulkLoadError::Transport(TransportError::Database(err))
    }
}

impl BulkLoadError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, BulkLoadError::Configuration(_))
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, BulkLoadError::Precondition(_))
    }
}

pub type Result<T, E = BulkLoadError> = std::result::Result<T, E>;

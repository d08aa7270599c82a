use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::trigger::TriggerPhase;

/// Result alias used across the table engine.
pub type Result<T> = std::result::Result<T, TableError>;

/// Errors raised by table operations.
#[derive(Debug, Error)]
pub enum TableError {
    /// A required argument was absent or empty.
    #[error("argument required: {0}")]
    ArgumentRequired(&'static str),
    /// The table has already been disposed.
    #[error("table {0} has been disposed")]
    Disposed(String),
    /// Another owner already holds the table file.
    #[error("table file {} is locked by another owner", .0.display())]
    TableLocked(PathBuf),
    /// An index key (or identity) is already mapped to a different row.
    #[error("unique index {index} on {table} already contains key {key}")]
    UniqueIndexViolation {
        /// Table name.
        table: String,
        /// Index name, `"id"` for the identity.
        index: String,
        /// Rendered key value.
        key: String,
    },
    /// A trigger rejected a row.
    #[error("invalid {table} row: {field} {reason}")]
    InvalidDataRow {
        /// Table name.
        table: String,
        /// Offending field.
        field: String,
        /// Validation message.
        reason: String,
    },
    /// The identity of a persisted row was modified.
    #[error("row identity {0} is immutable once persisted")]
    ImmutableIdentity(i64),
    /// The table path could not be resolved.
    #[error("invalid table path {}: {reason}", path.display())]
    PathInvalid {
        /// Path that was rejected.
        path: PathBuf,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// The row identity is not live in the table.
    #[error("row {id} not found in {table}")]
    RowNotFound {
        /// Table name.
        table: String,
        /// Missing identity.
        id: i64,
    },
    /// The row type declares no index with this name.
    #[error("table {table} has no index named {index}")]
    UnknownIndex {
        /// Table name.
        table: String,
        /// Requested index.
        index: String,
    },
    /// An `After*` trigger failed once the batch had already been committed.
    #[error("{phase:?} trigger failed after commit: {source}")]
    AfterTrigger {
        /// Phase that failed.
        phase: TriggerPhase,
        /// Underlying failure.
        #[source]
        source: Box<TableError>,
    },
    /// On-disk data failed validation.
    #[error("corruption: {0}")]
    Corruption(String),
    /// A row could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Options could not be parsed.
    #[error("config error: {0}")]
    Config(String),
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TableError {
    /// Builds an [`TableError::InvalidDataRow`] for trigger validation.
    pub fn invalid_row(
        table: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        TableError::InvalidDataRow {
            table: table.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Returns true when the error came from an `After*` trigger and the batch is committed.
    pub fn is_advisory(&self) -> bool {
        matches!(self, TableError::AfterTrigger { .. })
    }
}

impl From<serde_json::Error> for TableError {
    fn from(err: serde_json::Error) -> Self {
        TableError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for TableError {
    fn from(err: csv::Error) -> Self {
        TableError::Serialization(err.to_string())
    }
}

impl From<snap::Error> for TableError {
    fn from(err: snap::Error) -> Self {
        TableError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for TableError {
    fn from(err: toml::de::Error) -> Self {
        TableError::Config(err.to_string())
    }
}

//! Shared error type across procmetrics crates.

use std::path::PathBuf;

use thiserror::Error;

/// Stable error codes (used in logs and HTTP error bodies).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Incompatible re-registration of a metric name.
    SchemaConflict,
    /// Descriptor failed validation.
    InvalidDescriptor,
    /// Unknown metric.
    NotFound,
    /// Recording call does not match the metric type.
    TypeMismatch,
    /// Label value count does not match the schema.
    LabelMismatch,
    /// Negative or non-finite counter increment.
    InvalidDelta,
    /// Shared store directory missing or unwritable.
    StorageUnavailable,
    /// Store file could not be decoded.
    CorruptStore,
    /// Scrape exceeded its deadline.
    ScrapeTimeout,
    /// Invalid configuration.
    InvalidConfig,
    /// I/O or other internal failure.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and error responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::SchemaConflict => "SCHEMA_CONFLICT",
            ErrorCode::InvalidDescriptor => "INVALID_DESCRIPTOR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::TypeMismatch => "TYPE_MISMATCH",
            ErrorCode::LabelMismatch => "LABEL_MISMATCH",
            ErrorCode::InvalidDelta => "INVALID_DELTA",
            ErrorCode::StorageUnavailable => "STORAGE_UNAVAILABLE",
            ErrorCode::CorruptStore => "CORRUPT_STORE",
            ErrorCode::ScrapeTimeout => "SCRAPE_TIMEOUT",
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Unified error type used by core and gateway.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("schema conflict for {name}: {reason}")]
    SchemaConflict { name: String, reason: String },
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("metric not found: {0}")]
    NotFound(String),
    #[error("type mismatch for {name}: {op} is not valid for a {kind}")]
    TypeMismatch {
        name: String,
        op: &'static str,
        kind: &'static str,
    },
    #[error("label mismatch for {name}: expected {expected} values, got {got}")]
    LabelMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("invalid delta for counter {name}: {delta}")]
    InvalidDelta { name: String, delta: f64 },
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("corrupt store {}: {reason}", path.display())]
    CorruptStore { path: PathBuf, reason: String },
    #[error("scrape timed out after reading {read} of {total} stores")]
    ScrapeTimeout { read: usize, total: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("internal: {0}")]
    Internal(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MetricsError {
    /// Map an error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            MetricsError::SchemaConflict { .. } => ErrorCode::SchemaConflict,
            MetricsError::InvalidDescriptor(_) => ErrorCode::InvalidDescriptor,
            MetricsError::NotFound(_) => ErrorCode::NotFound,
            MetricsError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            MetricsError::LabelMismatch { .. } => ErrorCode::LabelMismatch,
            MetricsError::InvalidDelta { .. } => ErrorCode::InvalidDelta,
            MetricsError::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
            MetricsError::CorruptStore { .. } => ErrorCode::CorruptStore,
            MetricsError::ScrapeTimeout { .. } => ErrorCode::ScrapeTimeout,
            MetricsError::InvalidConfig(_) => ErrorCode::InvalidConfig,
            MetricsError::Internal(_) | MetricsError::Io(_) => ErrorCode::Internal,
        }
    }

    /// Whether a process hitting this error during startup must refuse to run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::SchemaConflict
                | ErrorCode::InvalidDescriptor
                | ErrorCode::StorageUnavailable
                | ErrorCode::InvalidConfig
        )
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        MetricsError::CorruptStore {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

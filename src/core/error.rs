//! Error types and etcd-facing mapping.
//!
//! The store surfaces a small, engine-neutral error vocabulary. Engine
//! errors are translated inside [`crate::storage`] and never leak past the
//! driver; the SQL log only ever returns [`StoreError::Compacted`] or one of
//! the opaque wrapped variants below.

use thiserror::Error;

/// Common kinestore error conditions.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Requested revision is older than the compaction floor.
    ///
    /// Callers must resynchronize from a fresh snapshot.
    #[error("required revision {revision} has been compacted; compaction floor is {compact_revision}")]
    Compacted {
        revision: i64,
        compact_revision: i64,
    },

    /// Admission control rejected the operation before any SQL was issued.
    #[error("denied: {op}: concurrency limit of {limit} reached")]
    Denied { op: &'static str, limit: usize },

    /// A unique constraint rejected the row (key already at this version,
    /// or a revision that is already taken).
    #[error("{op}: key exists")]
    KeyExists { op: &'static str },

    /// A transient engine error persisted past the retry budget.
    #[error("{op}: giving up after {attempts} attempts: {message}")]
    RetriesExhausted {
        op: &'static str,
        attempts: u32,
        message: String,
    },

    /// Non-transient engine failure.
    #[error("{op}: {message}")]
    Database { op: &'static str, message: String },

    /// The backing engine could not be reached.
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl StoreError {
    /// Create a Compacted error.
    pub fn compacted(revision: i64, compact_revision: i64) -> Self {
        Self::Compacted {
            revision,
            compact_revision,
        }
    }

    /// Create a Database error for an op.
    pub fn database(op: &'static str, message: impl Into<String>) -> Self {
        Self::Database {
            op,
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this is the compacted condition.
    pub fn is_compacted(&self) -> bool {
        matches!(self, Self::Compacted { .. })
    }

    /// Check if this error came from admission control.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }

    /// Check if a caller may reasonably retry the operation later.
    ///
    /// Denials and exhausted retries clear up once load drops; everything
    /// else needs caller action.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Denied { .. } | Self::RetriesExhausted { .. } | Self::Unavailable { .. }
        )
    }
}

/// Result type using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// etcd translation-layer mapping
// ============================================================================

/// gRPC status codes used by an etcd v3 translation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrpcCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

/// Maps store errors onto the status codes etcd clients expect.
pub struct EtcdErrorMapping;

impl EtcdErrorMapping {
    /// Map a StoreError to a gRPC status code.
    pub fn to_grpc_code(error: &StoreError) -> GrpcCode {
        match error {
            StoreError::Compacted { .. } => GrpcCode::OutOfRange,
            StoreError::Denied { .. } => GrpcCode::ResourceExhausted,
            StoreError::KeyExists { .. } => GrpcCode::AlreadyExists,
            StoreError::RetriesExhausted { .. } => GrpcCode::Unavailable,
            StoreError::Database { .. } => GrpcCode::Internal,
            StoreError::Unavailable { .. } => GrpcCode::Unavailable,
            StoreError::Cancelled => GrpcCode::Cancelled,
            StoreError::Internal { .. } => GrpcCode::Internal,
        }
    }

    /// Get the error message etcd clients match on.
    pub fn to_error_message(error: &StoreError) -> String {
        match error {
            StoreError::Compacted { .. } => {
                "etcdserver: mvcc: required revision has been compacted".to_string()
            }
            StoreError::Denied { .. } => format!("etcdserver: too many requests ({})", error),
            StoreError::KeyExists { .. } => "etcdserver: key exists".to_string(),
            _ => error.to_string(),
        }
    }
}

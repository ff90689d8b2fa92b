use thiserror::Error;

/// Primary error type for vellum operations.
///
/// Every failure that crosses the public API boundary is one of these
/// variants. Internal invariant violations are programming errors and are
/// guarded by assertions instead; they never surface here.
#[derive(Error, Debug)]
pub enum VellumError {
    /// A version, version vector, or revision ID failed to parse.
    #[error("invalid revision ID: {detail}")]
    BadRevisionId { detail: String },

    /// A stored record body or extra decodes to a shape that violates the
    /// document model (non-dict root, revision slot without a revID, ...).
    #[error("revision data is corrupt: {detail}")]
    CorruptRevisionData { detail: String },

    /// The store rejected a write because the caller's view is stale, or a
    /// record faulted in by sequence no longer exists at that sequence.
    #[error("document update conflict")]
    Conflict,

    /// The caller asked for body- or remote-level data on a document loaded
    /// with less content.
    #[error("unsupported operation: {detail}")]
    UnsupportedOperation { detail: String },

    /// A caller-supplied argument is invalid (e.g. an empty revision ID).
    #[error("invalid parameter: {detail}")]
    InvalidParameter { detail: String },

    /// File I/O error from an underlying store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable numeric codes for wire and FFI surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Successful result.
    Ok = 0,
    /// Malformed revision ID.
    BadRevisionId = 1,
    /// Corrupt revision data.
    CorruptRevisionData = 2,
    /// Update conflict.
    Conflict = 3,
    /// Unsupported operation for the loaded content level.
    Unsupported = 4,
    /// Invalid parameter.
    InvalidParameter = 5,
    /// I/O error.
    Io = 6,
    /// Internal logic error.
    Internal = 7,
}

impl VellumError {
    /// Map this error to its stable numeric code.
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::BadRevisionId { .. } => ErrorCode::BadRevisionId,
            Self::CorruptRevisionData { .. } => ErrorCode::CorruptRevisionData,
            Self::Conflict => ErrorCode::Conflict,
            Self::UnsupportedOperation { .. } => ErrorCode::Unsupported,
            Self::InvalidParameter { .. } => ErrorCode::InvalidParameter,
            Self::Io(_) => ErrorCode::Io,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether this error may succeed if the operation is retried on a
    /// fresh view of the document.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict)
    }

    /// Create a `BadRevisionId` error.
    pub fn bad_revision(detail: impl Into<String>) -> Self {
        Self::BadRevisionId {
            detail: detail.into(),
        }
    }

    /// Create a `CorruptRevisionData` error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::CorruptRevisionData {
            detail: detail.into(),
        }
    }

    /// Create an `UnsupportedOperation` error.
    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            detail: detail.into(),
        }
    }

    /// Create an `InvalidParameter` error.
    pub fn invalid_parameter(detail: impl Into<String>) -> Self {
        Self::InvalidParameter {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `VellumError`.
pub type Result<T> = std::result::Result<T, VellumError>;

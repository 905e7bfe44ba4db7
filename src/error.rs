use std::error::Error;
use std::fmt::{Display, Formatter};

/// Status codes reported by the Docstore backend, mirroring the canonical RPC
/// code set the wire protocol uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocstoreErrorCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    Internal,
    Unavailable,
    Unauthenticated,
}

impl DocstoreErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocstoreErrorCode::Cancelled => "docstore/cancelled",
            DocstoreErrorCode::Unknown => "docstore/unknown",
            DocstoreErrorCode::InvalidArgument => "docstore/invalid-argument",
            DocstoreErrorCode::DeadlineExceeded => "docstore/deadline-exceeded",
            DocstoreErrorCode::NotFound => "docstore/not-found",
            DocstoreErrorCode::AlreadyExists => "docstore/already-exists",
            DocstoreErrorCode::PermissionDenied => "docstore/permission-denied",
            DocstoreErrorCode::ResourceExhausted => "docstore/resource-exhausted",
            DocstoreErrorCode::FailedPrecondition => "docstore/failed-precondition",
            DocstoreErrorCode::Aborted => "docstore/aborted",
            DocstoreErrorCode::Internal => "docstore/internal",
            DocstoreErrorCode::Unavailable => "docstore/unavailable",
            DocstoreErrorCode::Unauthenticated => "docstore/unauthenticated",
        }
    }

    /// Whether a stream or RPC that failed with this code may be retried
    /// transparently. The set matches what the backend documents as transient
    /// for listen streams; everything else is surfaced to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DocstoreErrorCode::Unknown
                | DocstoreErrorCode::DeadlineExceeded
                | DocstoreErrorCode::ResourceExhausted
                | DocstoreErrorCode::Internal
                | DocstoreErrorCode::Unavailable
                | DocstoreErrorCode::Unauthenticated
        )
    }
}

#[derive(Clone, Debug)]
pub struct DocstoreError {
    pub code: DocstoreErrorCode,
    message: String,
}

impl DocstoreError {
    pub fn new(code: DocstoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl Display for DocstoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for DocstoreError {}

pub type DocstoreResult<T> = Result<T, DocstoreError>;

pub fn cancelled(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::Cancelled, message)
}

pub fn unknown_error(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::Unknown, message)
}

pub fn invalid_argument(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::InvalidArgument, message)
}

pub fn deadline_exceeded(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::DeadlineExceeded, message)
}

pub fn not_found(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::NotFound, message)
}

pub fn already_exists(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::AlreadyExists, message)
}

pub fn permission_denied(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::PermissionDenied, message)
}

pub fn resource_exhausted(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::ResourceExhausted, message)
}

pub fn failed_precondition(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::FailedPrecondition, message)
}

pub fn aborted(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::Aborted, message)
}

pub fn internal_error(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::Internal, message)
}

pub fn unavailable(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::Unavailable, message)
}

pub fn unauthenticated(message: impl Into<String>) -> DocstoreError {
    DocstoreError::new(DocstoreErrorCode::Unauthenticated, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_codes() {
        assert!(unavailable("try later").is_retryable());
        assert!(internal_error("oops").is_retryable());
        assert!(!permission_denied("nope").is_retryable());
        assert!(!invalid_argument("bad").is_retryable());
        assert!(!cancelled("stop").is_retryable());
    }

    #[test]
    fn display_includes_code() {
        let err = not_found("missing document");
        assert_eq!(err.to_string(), "missing document (docstore/not-found)");
    }
}

//! Error types for uvreq

use thiserror::Error;

/// Result type for request and arena operations
pub type Result<T> = std::result::Result<T, ReqError>;

/// Errors raised by the request layer itself.
///
/// `AllocationFailed` and `UntrackedRelease` point at a bug or resource
/// exhaustion in the binding layer; `Operation` carries a failure the
/// engine reported for an I/O operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReqError {
    /// The system allocator returned null
    #[error("native allocation of {size} bytes failed")]
    AllocationFailed { size: usize },

    /// Release of an address the arena is not tracking (double free or foreign pointer)
    #[error("release of untracked address {addr:#x}")]
    UntrackedRelease { addr: usize },

    /// Request block smaller than the generic request header
    #[error("request size {size} is smaller than the {min}-byte request header")]
    InvalidSize { size: usize, min: usize },

    /// Payload access on a request built without a payload slot
    #[error("request has no payload slot")]
    NoPayloadSlot,

    /// Access to a request after disposal
    #[error("request already disposed")]
    Disposed,

    /// Submission of a callback request with no callback armed
    #[error("request submitted without a completion callback")]
    CallbackNotSet,

    /// Failure reported by the native engine for an operation
    #[error(transparent)]
    Operation(#[from] OperationError),
}

/// Failure of a native operation, resolved through the engine's error tables.
///
/// Delivered to completion callbacks as a value; never unwound across the
/// native boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {description}")]
pub struct OperationError {
    /// Raw engine error code
    pub code: i32,
    /// Symbolic name, e.g. `ENOENT`
    pub name: String,
    /// Human-readable description
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn test_error_display() {
        let e = ReqError::AllocationFailed { size: 64 };
        assert_eq!(format!("{}", e), "native allocation of 64 bytes failed");

        let e = ReqError::UntrackedRelease { addr: 0x1000 };
        assert_eq!(format!("{}", e), "release of untracked address 0x1000");
    }

    #[test]
    fn test_operation_error_format() {
        let op = OperationError {
            code: 2,
            name: "ENOENT".into(),
            description: "No such file or directory".into(),
        };
        assert_eq!(op.to_string(), "ENOENT: No such file or directory");

        // transparent: same text, no extra source layer
        let e: ReqError = op.clone().into();
        assert_eq!(e.to_string(), op.to_string());
        assert!(matches!(e, ReqError::Operation(ref inner) if inner.code == 2));
    }

    #[test]
    fn test_simple_variants_have_no_source() {
        assert!(ReqError::Disposed.source().is_none());
        assert!(ReqError::CallbackNotSet.source().is_none());
    }
}

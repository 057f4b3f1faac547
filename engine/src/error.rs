//! Error types for the marksync engine.

use crate::OwnerId;
use thiserror::Error;

/// All possible errors from the marksync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("owner mismatch: expected {expected}, got {actual}")]
    OwnerMismatch { expected: OwnerId, actual: OwnerId },

    #[error("replica not initialized")]
    NotInitialized,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::OwnerMismatch {
            expected: "alice".into(),
            actual: "bob".into(),
        };
        assert_eq!(err.to_string(), "owner mismatch: expected alice, got bob");

        let err = Error::NotInitialized;
        assert_eq!(err.to_string(), "replica not initialized");
    }
}

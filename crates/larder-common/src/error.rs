//! Error types for Larder
//!
//! Store implementations report failures through this type; the index
//! itself never surfaces them to callers (a failed load degrades to an
//! empty directory, a failed write or purge is logged by the store task).

use thiserror::Error;

/// Common result type for Larder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Larder
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encode error: {0}")]
    Serialization(String),

    #[error("snapshot decode error: {0}")]
    Deserialization(String),

    #[error("store error: {0}")]
    Store(String),
}

impl Error {
    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Check if this error came from the I/O layer
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::store("index file locked");
        assert_eq!(err.to_string(), "store error: index file locked");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(err.is_io());
    }
}

use std::path::Path;

use thiserror::Error;

/// Main error type for the DayVault cache
#[derive(Error, Debug)]
pub enum DvError {
    /// Malformed symbol, interval, or expiration. Never retried; surfaced to
    /// the caller immediately.
    #[error("Invalid cache key: {message}")]
    InvalidKey { message: String },

    /// Checksum or parse failure while reading a cached entry. Recovered
    /// internally (the entry reads as a miss and is refetched); the client
    /// facade never surfaces this variant.
    #[error("Corrupt cache entry at {path}: {message}")]
    Corrupt { path: String, message: String },

    /// Upstream provider failure. Surfaced unless a full cache hit made the
    /// provider call avoidable.
    #[error("Data source error: {message}")]
    DataSource { message: String },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DvError {
    pub fn invalid_key(message: impl Into<String>) -> Self {
        DvError::InvalidKey {
            message: message.into(),
        }
    }

    pub fn corrupt(path: &Path, message: impl Into<String>) -> Self {
        DvError::Corrupt {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    pub fn data_source(message: impl Into<String>) -> Self {
        DvError::DataSource {
            message: message.into(),
        }
    }

    /// True for read failures that callers should treat as a cache miss.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, DvError::Corrupt { .. })
    }
}

/// Result type alias for DayVault operations
pub type DvResult<T> = Result<T, DvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DvError::invalid_key("empty symbol");
        assert!(error.to_string().contains("Invalid cache key"));
        assert!(error.to_string().contains("empty symbol"));
    }

    #[test]
    fn test_corrupt_carries_path() {
        let error = DvError::corrupt(Path::new("/tmp/AAPL/1d/x.csv"), "bad checksum");
        assert!(error.is_corrupt());
        assert!(error.to_string().contains("/tmp/AAPL/1d/x.csv"));
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error: DvError = io_err.into();
        match error {
            DvError::Io(_) => (),
            _ => panic!("Expected Io error"),
        }
        assert!(!error.is_corrupt());
    }
}

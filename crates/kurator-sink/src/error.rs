//! Sink error types.

/// Errors produced by [`SummarySink`](crate::SummarySink) operations.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Record fields or provenance could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The output target identifier does not name a usable store.
    #[error("invalid output target '{0}'")]
    InvalidTarget(String),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("sink lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, SinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_displays_context() {
        let inner = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(1),
            Some("table not found".into()),
        );
        let err = SinkError::Sqlite(inner);
        let msg = err.to_string();
        assert!(msg.contains("sqlite"), "got: {msg}");
    }

    #[test]
    fn lock_poisoned_displays() {
        let err = SinkError::LockPoisoned;
        assert_eq!(err.to_string(), "sink lock poisoned");
    }

    #[test]
    fn invalid_target_names_the_target() {
        let err = SinkError::InvalidTarget("sqlite:".into());
        assert!(err.to_string().contains("'sqlite:'"));
    }
}

//! Error taxonomy for comparison and ingestion.
//!
//! Storage backends speak `anyhow::Result` at the [`Store`](crate::store::Store)
//! boundary; those errors convert into [`Error::Store`] with `?`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad language, oversized file, empty content, malformed request.
    #[error("{0}")]
    InvalidInput(String),

    #[error("document not found: {0}")]
    NotFound(i64),

    /// A vector is missing or empty after a generation attempt.
    #[error("document {id}: {reason}")]
    StateInconsistency { id: i64, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// True for errors caused by the caller (4xx-class).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::NotFound(_))
    }

    /// True for I/O and store failures that may succeed on another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Store(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Store(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::NotFound(7).is_client_error());
        assert!(Error::invalid("bad").is_client_error());
        assert!(!Error::invalid("bad").is_transient());

        let state = Error::StateInconsistency {
            id: 1,
            reason: "empty vector".into(),
        };
        assert!(!state.is_client_error());
        assert!(!state.is_transient());

        let store: Error = anyhow::anyhow!("connection reset").into();
        assert!(store.is_transient());
        assert_eq!(store.to_string(), "store error: connection reset");
    }
}

use std::fmt;

/// Result type for convarc-providers operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the extraction layer
#[derive(Debug)]
pub enum Error {
    /// Store operation failed
    Store(convarc_store::Error),

    /// JSON parsing failed
    Json(serde_json::Error),

    /// Source payload violates a structural requirement
    /// (type mismatch, parent cycle, ...)
    Source(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::Source(msg) => write!(f, "Source error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Source(_) => None,
        }
    }
}

impl From<convarc_store::Error> for Error {
    fn from(err: convarc_store::Error) -> Self {
        Error::Store(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

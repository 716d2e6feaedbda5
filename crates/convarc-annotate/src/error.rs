use std::fmt;

/// Result type for convarc-annotate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the annotation layer
#[derive(Debug)]
pub enum Error {
    /// Store operation failed
    Store(convarc_store::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(err) => write!(f, "Store error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
        }
    }
}

impl From<convarc_store::Error> for Error {
    fn from(err: convarc_store::Error) -> Self {
        Error::Store(err)
    }
}

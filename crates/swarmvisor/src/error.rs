//! # Error Definitions
//!
//! Failures surfaced to whoever runs the supervisor. Nothing that happens to a
//! service or a connection is an error at this level; those are logged.

#[derive(Debug, Clone)]
pub enum Error {
    /// The listener could not be bound.
    Bind(String),
    /// The supervisor event loop is gone.
    Stopped,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind(msg) => write!(f, "Cannot bind listener: {}", msg),
            Self::Stopped => write!(f, "Supervisor has stopped"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Bind(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! # Error Definitions
//!
//! Failures raised while building, encoding, or decoding messages.

/// Message construction and wire failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The value could not be represented as a payload (e.g. a map with non-string keys).
    Unserializable(String),
    /// The frame is not a valid JSON document.
    Json(String),
    /// A required record field was absent.
    MissingField(&'static str),
    /// The declared payload type does not describe the payload value.
    TypeMismatch { expected: String, found: String },
    /// An instruction payload did not have the expected shape.
    MalformedInstruction { kind: String, details: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unserializable(msg) => write!(f, "value cannot be carried by a message: {}", msg),
            Self::Json(msg) => write!(f, "invalid frame: {}", msg),
            Self::MissingField(field) => write!(f, "frame is missing field '{}'", field),
            Self::TypeMismatch { expected, found } => {
                write!(f, "payload type mismatch: declared {}, found {}", expected, found)
            }
            Self::MalformedInstruction { kind, details } => {
                write!(f, "malformed {} instruction: {}", kind, details)
            }
        }
    }
}

impl std::error::Error for Error {}

/// A specialized Result type for message operations.
pub type Result<T> = std::result::Result<T, Error>;

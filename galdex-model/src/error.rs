use std::fmt;

/// Errors raised while parsing persisted model representations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A stored discriminant did not match any known variant.
    UnknownVariant {
        kind: &'static str,
        value: String,
    },
    /// A stored identifier was not a valid UUID.
    InvalidId(String),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownVariant { kind, value } => {
                write!(f, "unknown {kind} variant: {value}")
            }
            ModelError::InvalidId(value) => {
                write!(f, "invalid identifier: {value}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;

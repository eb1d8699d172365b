//! Error module for the Rusty Patterns library.
use std::error::Error;
use std::fmt;

/// Error types for the library.
#[derive(Debug, PartialEq, Clone)]
pub enum PatternError {
    /// Error for invalid settings, e.g., unknown pattern class or mismatched on/off periods.
    InvalidConfiguration(String),
    /// Error for broken structural invariants, e.g., a spike train whose channel count differs from the expected one.
    InvariantViolation(String),
    /// Error for invalid parameters of a pure operation.
    InvalidParameter(String),
    /// Error for an operation called out of order, e.g., drawing spikes before combining rates.
    InvalidOperation(String),
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PatternError::InvalidConfiguration(e) => write!(f, "Invalid configuration: {}", e),
            PatternError::InvariantViolation(e) => write!(f, "Invariant violation: {}", e),
            PatternError::InvalidParameter(e) => write!(f, "Invalid parameters: {}", e),
            PatternError::InvalidOperation(e) => write!(f, "Invalid operation: {}", e),
        }
    }
}

impl Error for PatternError {}

impl From<serde_json::Error> for PatternError {
    fn from(e: serde_json::Error) -> Self {
        PatternError::InvalidConfiguration(e.to_string())
    }
}

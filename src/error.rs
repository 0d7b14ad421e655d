//! Error types for agent-say

use std::io;
use thiserror::Error;

/// Main error type for agent-say
///
/// The first group mirrors the ways a speech request can fail; the
/// caller sees these rendered as text. The rest are ambient failures
/// (config, protocol, I/O).
#[derive(Error, Debug)]
pub enum SayError {
    #[error("{0}")]
    Validation(String),

    #[error("No available speech engine (say/swift/espeak).")]
    EngineUnavailable,

    #[error("Speech engine command not found.")]
    EngineMissing,

    #[error("Speech engine is not executable.")]
    EngineNotExecutable,

    #[error("Speech timed out after {seconds}s")]
    Timeout { seconds: String },

    #[error("Speech failed with code {code}: {stderr}")]
    EngineExit { code: i32, stderr: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for agent-say operations
pub type Result<T> = std::result::Result<T, SayError>;

impl From<String> for SayError {
    fn from(s: String) -> Self {
        SayError::Other(s)
    }
}

impl From<&str> for SayError {
    fn from(s: &str) -> Self {
        SayError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_exit_message() {
        let err = SayError::EngineExit {
            code: 3,
            stderr: "no voice".to_string(),
        };
        assert_eq!(err.to_string(), "Speech failed with code 3: no voice");
    }

    #[test]
    fn test_string_conversion() {
        let err: SayError = "boom".into();
        assert!(matches!(err, SayError::Other(ref s) if s == "boom"));
    }
}

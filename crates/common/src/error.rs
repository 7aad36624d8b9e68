use thiserror::Error;

/// Top-level error type for Tidepool operations.
#[derive(Debug, Error)]
pub enum TidepoolError {
    // --- Fatal at startup ---
    #[error("Config error: {0}")]
    Config(String),

    // --- Recoverable, consumed by the worker that hit them ---
    #[error("Upstream API error: {0}")]
    Upstream(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: missing field '{0}'")]
    Validation(String),

    // --- Queue signalling ---
    #[error("Queue empty")]
    Empty,

    #[error("Queue closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TidepoolError {
    /// Whether this error should prevent service startup (exit code 1).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Whether this error is expected in steady state and only worth DEBUG.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Result type alias for Tidepool operations.
pub type Result<T> = std::result::Result<T, TidepoolError>;

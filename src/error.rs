use thiserror::Error;

#[derive(Error, Debug)]
pub enum EisError {
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },
    #[error("Operation timed out")]
    Timeout,
    #[error("Instrument protocol error: {0}")]
    InstrumentProtocol(String),
    #[error("Insufficient data: expected at least {expected} samples, got {got}")]
    InsufficientData { expected: usize, got: usize },
    #[error("Frame error: {0}")]
    Frame(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EisError {
    /// Attach context to an IO error, as every socket and instrument path does.
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        EisError::Io {
            source,
            context: context.into(),
        }
    }

    /// Connection-level failures terminate a streaming session; everything
    /// else is contained within a single sweep step.
    pub fn is_connection(&self) -> bool {
        matches!(self, EisError::Io { .. } | EisError::Frame(_))
    }
}

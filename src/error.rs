use embedded_time::{clock, ConversionError};
use thiserror::Error;

/// Errors raised while configuring or running the controller.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A hardware line could not be acquired at startup.
    #[error("failed to request line {line}: {reason}")]
    LineRequest { line: u32, reason: String },

    /// An output line failed while running.
    #[error("output fault on motor {motor}: {reason}")]
    Output { motor: usize, reason: String },

    /// The input line could not be released.
    #[error("input line fault: {0}")]
    Input(String),

    /// A runtime task stopped abnormally.
    #[error("task failed: {0}")]
    Task(String),

    #[error("clock error: {0:?}")]
    Clock(clock::Error),

    #[error("time conversion error: {0:?}")]
    Time(ConversionError),
}

impl Error {
    /// Creates an invalid configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }
}

impl From<clock::Error> for Error {
    fn from(clock_error: clock::Error) -> Self {
        Error::Clock(clock_error)
    }
}

impl From<ConversionError> for Error {
    fn from(time_error: ConversionError) -> Self {
        Error::Time(time_error)
    }
}

/// Result type for controller operations.
pub type Result<T> = core::result::Result<T, Error>;

//! Error hierarchy for the live engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Engine error hierarchy.
///
/// Feed supervisors split these into two classes: `Decode` is a bad payload
/// (drop the message, keep the connection), everything else on a stream is a
/// transport failure (tear down and reconnect).
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP-level errors
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Feed connection failures (connect, read, unexpected close)
    #[error("transport error: {0}")]
    Transport(String),

    /// Exchange rejected or failed an operation
    #[error("exchange error: {0}")]
    Exchange(String),

    /// Malformed event payload
    #[error("decode error: {0}")]
    Decode(String),
}

impl Error {
    /// True for errors that are recoverable without dropping the connection.
    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Decode(_))
    }
}

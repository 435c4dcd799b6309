use thiserror::Error;

/// Errors surfaced by the book engine.
///
/// Snapshot and submission failures reach the caller as-is. Live channel
/// decode failures never become a `BookError`; they are logged and dropped
/// at the channel boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BookError {
    /// Boundary unreachable, connection refused, or a non-success response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The payload could not be decoded into the expected shape.
    #[error("Format error: {0}")]
    Format(String),

    /// Caller-supplied values violate preconditions. Never touches the network.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The reconnect policy gave up.
    #[error("Live channel gave up after {attempts} reconnect attempts")]
    ChannelExhausted { attempts: u32 },

    #[error("Live channel already has an active consumer")]
    AlreadySubscribed,
}

pub type Result<T> = std::result::Result<T, BookError>;

impl From<reqwest::Error> for BookError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BookError::Format(err.to_string())
        } else {
            BookError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BookError {
    fn from(err: serde_json::Error) -> Self {
        BookError::Format(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BookError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BookError::Transport(err.to_string())
    }
}

impl From<url::ParseError> for BookError {
    fn from(err: url::ParseError) -> Self {
        BookError::Validation(format!("invalid url: {}", err))
    }
}

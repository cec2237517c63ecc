//! Client error types

use thiserror::Error;

/// Client error type
#[derive(Error, Debug)]
pub enum ClientError {
    /// Event failed decoding or verification
    #[error("Event rejected: {0}")]
    Event(#[from] nostr::Nip01Error),

    /// Storage engine error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool error
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire message error
    #[error("Message error: {0}")]
    Message(#[from] crate::message::MessageError),

    /// Invalid relay URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Event already past its NIP-40 expiration
    #[error("Event {0} has expired")]
    ExpiredEvent(String),

    /// The subscription registry task has stopped
    #[error("Subscription registry is shut down")]
    RegistryClosed,

    /// Event publish failed
    #[error("Event publish failed: {0}")]
    PublishFailed(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;

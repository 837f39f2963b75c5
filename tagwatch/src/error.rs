/*!
Error types shared by the tracker core, durable stores, and event sinks
*/

use thiserror::Error;

use crate::core::registry::TagId;

/// Unified error type for tracker operations
#[derive(Error, Debug)]
pub enum TrackerError {
    // Registry errors
    #[error("Tag {0} is already registered")]
    DuplicateId(TagId),

    #[error("Unknown tag {0}")]
    UnknownId(TagId),

    // Store errors
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // Configuration errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Sink errors
    #[error("Webhook delivery failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook returned status {0}")]
    WebhookStatus(u16),

    // Runtime errors
    #[error("Tracker mailbox closed")]
    MailboxClosed,
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

//! Error types for the feed engine.

use thiserror::Error;

/// Main error type for feed operations.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Event already published: {0}")]
    Duplicate(String),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Fan-out failed for {failed} of {attempted} timelines: {first}")]
    FanoutFailed {
        failed: usize,
        attempted: usize,
        first: Box<FeedError>,
    },
}

impl FeedError {
    /// True for the one condition callers are expected to recover from.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, FeedError::Duplicate(_))
    }

    /// True for missing events and other missing entities.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FeedError::EventNotFound(_) | FeedError::NotFound(_))
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for FeedError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        FeedError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for FeedError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        FeedError::Deserialization(e.to_string())
    }
}

/// Result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;

//! Error types for inbox-glance

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Mailbox error: {0}")]
    Mailbox(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Fetch of UID {uid} failed: {reason}")]
    Fetch { uid: u32, reason: FetchFailure },

    #[error("None of the {requested} requested messages could be retrieved")]
    PartialFailure { requested: usize },

    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// Human-readable text for the `message` field of an error response.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(detail) => detail.clone(),
            Self::Connection(_) | Self::Tls(_) => {
                "Failed to connect to the mail server".to_string()
            }
            Self::Timeout(_) => "The mail server took too long to respond".to_string(),
            Self::Mailbox(_) => "Failed to open the inbox".to_string(),
            Self::Search(_) => "Failed to list messages in the inbox".to_string(),
            Self::Fetch { .. } | Self::PartialFailure { .. } => {
                "Failed to retrieve any emails".to_string()
            }
        }
    }
}

/// Why a single message fetch was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The server answered NO/BAD or the stream broke.
    Server(String),
    /// No complete response before the fetch deadline.
    TimedOut,
    /// The server returned no body for the UID.
    Missing,
    /// The message is larger than the per-message cap.
    TooLarge { size: usize, limit: usize },
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(detail) => write!(f, "server error: {detail}"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Missing => f.write_str("no body returned"),
            Self::TooLarge { size, limit } => {
                write!(f, "message is {size} bytes, limit is {limit}")
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

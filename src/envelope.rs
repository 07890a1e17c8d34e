//! JSON response bodies

use crate::error::Error;
use crate::message::ParsedEmail;
use serde::Serialize;

/// Message returned alongside an empty list.
pub const EMPTY_INBOX_MESSAGE: &str = "No emails found in inbox";

/// A successful invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    /// `{ "emails": [...], "count": N }`, newest first.
    Emails {
        emails: Vec<ParsedEmail>,
        count: usize,
    },
    /// `{ "emails": [], "message": "..." }` for an empty inbox.
    Empty {
        emails: Vec<ParsedEmail>,
        message: String,
    },
}

impl Envelope {
    #[must_use]
    pub fn with_emails(emails: Vec<ParsedEmail>) -> Self {
        let count = emails.len();
        Self::Emails { emails, count }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::Empty {
            emails: Vec::new(),
            message: EMPTY_INBOX_MESSAGE.to_string(),
        }
    }

    #[must_use]
    pub fn emails(&self) -> &[ParsedEmail] {
        match self {
            Self::Emails { emails, .. } | Self::Empty { emails, .. } => emails,
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.emails().len()
    }
}

/// A failed invocation: `{ "message": "..." }`, plus `"error"` with the
/// raw detail when errors are exposed (development mode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorBody {
    #[must_use]
    pub fn new(err: &Error, expose: bool) -> Self {
        Self {
            message: err.user_message(),
            error: expose.then(|| err.to_string()),
        }
    }
}

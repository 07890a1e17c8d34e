//! Newest-messages IMAP inbox reader
//!
//! Fetches the most recent messages from an IMAP inbox and returns
//! them as a JSON envelope through an HTTP GET trigger. The session is
//! read-only (`EXAMINE`, `BODY.PEEK[]`), every network step is
//! time-bounded, and messages that fail to fetch or parse are dropped
//! rather than failing the whole request.
//!
//! The entry point is [`fetch_latest`]; [`http::router`] wraps it for
//! serving.

mod config;
mod connection;
mod envelope;
mod error;
pub mod http;
mod message;
mod orchestrator;
mod session;

pub use config::{FetchStrategy, Limits, ServiceConfig, SessionConfig, Timeouts};
pub use envelope::{EMPTY_INBOX_MESSAGE, Envelope, ErrorBody};
pub use error::{Error, FetchFailure, Result};
pub use message::{Attachment, ParsedEmail, RawMessage, TRUNCATION_MARKER, parse};
pub use orchestrator::{
    MAX_EMAIL_COUNT, Retrieval, RetrievalPlan, RetrievalStats, build_response, fetch_latest,
    requested_count, retrieve, select_targets,
};
pub use session::{BodyFetcher, INBOX, MailboxMetadata, MailboxSession, SessionState};

//! Mailbox session lifecycle
//!
//! One [`MailboxSession`] exists per invocation. It is opened against
//! the inbox, examined read-only, searched, fetched from, and closed.
//! Commands are serialized by `&mut self`; IMAP allows one command in
//! flight per connection.
//!
//! A command abandoned on a timeout leaves its responses on the wire.
//! The session is then marked out of sync and refuses further commands
//! until [`BodyFetcher::resync`] has read past them.

use crate::config::{Limits, SessionConfig, Timeouts};
use crate::connection::{self, ImapSession};
use crate::error::{Error, FetchFailure, Result};
use crate::message::RawMessage;
use async_imap::imap_proto::Response;
use futures::StreamExt;
use std::future::Future;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};

/// The only mailbox this crate reads.
pub const INBOX: &str = "INBOX";

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Authenticated, no mailbox selected yet.
    Ready,
    /// The inbox is open read-only.
    Selected,
    /// Logged out or dropped; every command fails.
    Closed,
}

/// What `EXAMINE` reported about the inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxMetadata {
    pub exists: u32,
    pub uid_validity: Option<u32>,
    pub uid_next: Option<u32>,
}

/// Something that can fetch the full source of a message by UID.
///
/// Implemented by [`MailboxSession`]; the retrieval logic is written
/// against this so it can be driven without a server.
pub trait BodyFetcher {
    /// Fetch one message, giving up after `timeout`.
    fn fetch_body(
        &mut self,
        uid: u32,
        timeout: Duration,
    ) -> impl Future<Output = Result<RawMessage>> + Send;

    /// Make the transport usable again after an abandoned fetch,
    /// giving up after `within`. A no-op when nothing was abandoned.
    fn resync(&mut self, within: Duration) -> impl Future<Output = Result<()>> + Send {
        let _ = within;
        async { Ok(()) }
    }
}

/// A single connected, authenticated IMAP session.
pub struct MailboxSession {
    inner: Option<ImapSession>,
    state: SessionState,
    /// An abandoned command still has responses in flight.
    desynced: bool,
    limits: Limits,
    command_timeout: Duration,
    close_timeout: Duration,
}

impl MailboxSession {
    /// Connect and authenticate.
    ///
    /// Credentials are checked before any socket is opened. The whole
    /// handshake is bounded by `timeouts.connection`. Inside it the
    /// transport gets `timeouts.connect` and LOGIN gets `timeouts.auth`,
    /// each shorter than the whole but together allowed to exceed it.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for empty credentials.
    /// - [`Error::Connection`] when the handshake fails, or when the
    ///   transport or LOGIN alone overruns its bound.
    /// - [`Error::Timeout`] when both stages are slow and together
    ///   overrun `timeouts.connection`.
    pub async fn open(config: &SessionConfig, timeouts: &Timeouts, limits: Limits) -> Result<Self> {
        config.ensure_credentials()?;

        let session = time::timeout(timeouts.connection, connection::connect(config, timeouts))
            .await
            .map_err(|_| {
                debug!("Connection deadline elapsed, dropping partial connection");
                Error::Timeout(format!(
                    "IMAP connection not established within {}ms",
                    timeouts.connection.as_millis()
                ))
            })??;

        Ok(Self {
            inner: Some(session),
            state: SessionState::Ready,
            desynced: false,
            limits,
            command_timeout: timeouts.command,
            close_timeout: timeouts.close,
        })
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn is_desynced(&self) -> bool {
        self.desynced
    }

    /// The connection, if it is open and in sync.
    fn live(&mut self) -> Option<&mut ImapSession> {
        if self.desynced {
            return None;
        }
        self.inner.as_mut()
    }

    /// Open the inbox read-only with `EXAMINE`, bounded by
    /// `Timeouts::command`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mailbox`] if the session is unusable, the server
    /// refuses the mailbox, or no answer arrives in time.
    pub async fn select_inbox(&mut self) -> Result<MailboxMetadata> {
        let limit = self.command_timeout;
        let session = self
            .live()
            .ok_or_else(|| Error::Mailbox("session is closed or out of sync".into()))?;

        let Ok(examined) = time::timeout(limit, session.examine(INBOX)).await else {
            self.desynced = true;
            return Err(Error::Mailbox(format!(
                "{INBOX} not opened within {}ms",
                limit.as_millis()
            )));
        };
        let mailbox =
            examined.map_err(|e| Error::Mailbox(format!("Failed to open {INBOX}: {e}")))?;

        self.state = SessionState::Selected;
        debug!("{} opened read-only with {} messages", INBOX, mailbox.exists);
        Ok(MailboxMetadata {
            exists: mailbox.exists,
            uid_validity: mailbox.uid_validity,
            uid_next: mailbox.uid_next,
        })
    }

    /// Every UID in the inbox, ascending (oldest first). Bounded by
    /// `Timeouts::command`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Search`] if no mailbox is selected, the search
    /// fails, or no answer arrives in time.
    pub async fn list_all_identifiers(&mut self) -> Result<Vec<u32>> {
        if self.state != SessionState::Selected {
            return Err(Error::Search("no mailbox selected".into()));
        }
        let limit = self.command_timeout;
        let session = self
            .live()
            .ok_or_else(|| Error::Search("session is closed or out of sync".into()))?;

        let Ok(searched) = time::timeout(limit, session.uid_search("ALL")).await else {
            self.desynced = true;
            return Err(Error::Search(format!(
                "Search not answered within {}ms",
                limit.as_millis()
            )));
        };
        let uids = searched.map_err(|e| Error::Search(format!("Search failed: {e}")))?;

        let mut uid_list: Vec<u32> = uids.into_iter().collect();
        uid_list.sort_unstable();
        info!("Found {} messages in {}", uid_list.len(), INBOX);
        Ok(uid_list)
    }

    /// Log out and drop the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        let Some(mut session) = self.inner.take() else {
            return;
        };
        self.state = SessionState::Closed;

        match time::timeout(self.close_timeout, session.logout()).await {
            Ok(Ok(())) => debug!("Logged out"),
            Ok(Err(e)) => warn!("Logout failed: {}", e),
            Err(_) => warn!("Logout timed out, dropping connection"),
        }
    }

    async fn fetch_within(&mut self, uid: u32) -> Result<RawMessage> {
        let max = self.limits.max_message_bytes;
        let fail = |reason| Error::Fetch { uid, reason };

        if self.state != SessionState::Selected {
            return Err(fail(FetchFailure::Server("no mailbox selected".into())));
        }
        let session = self.live().ok_or_else(|| {
            fail(FetchFailure::Server(
                "session is closed or out of sync".into(),
            ))
        })?;

        // Ask for the size first so oversized bodies are never transferred.
        if let Some(size) = fetch_size(session, uid).await?
            && size > max
        {
            return Err(fail(FetchFailure::TooLarge { size, limit: max }));
        }

        let body = fetch_source(session, uid).await?;
        if body.len() > max {
            return Err(fail(FetchFailure::TooLarge {
                size: body.len(),
                limit: max,
            }));
        }

        debug!("Fetched UID {} ({} bytes)", uid, body.len());
        Ok(RawMessage { uid, bytes: body })
    }
}

impl BodyFetcher for MailboxSession {
    async fn fetch_body(&mut self, uid: u32, timeout: Duration) -> Result<RawMessage> {
        let Ok(fetched) = time::timeout(timeout, self.fetch_within(uid)).await else {
            self.desynced = true;
            return Err(Error::Fetch {
                uid,
                reason: FetchFailure::TimedOut,
            });
        };
        fetched
    }

    /// Sends `NOOP` and discards responses until its completion
    /// arrives; the server answers in order, so nothing older can follow
    /// it. On failure the session stays out of sync and a later call may
    /// try again.
    async fn resync(&mut self, within: Duration) -> Result<()> {
        if !self.desynced {
            return Ok(());
        }
        let session = self
            .inner
            .as_mut()
            .ok_or_else(|| Error::Connection("session is closed".into()))?;

        time::timeout(within, drain_until_noop(session))
            .await
            .map_err(|_| {
                Error::Connection(format!(
                    "connection still out of sync after {}ms",
                    within.as_millis()
                ))
            })??;

        self.desynced = false;
        debug!("Connection back in sync");
        Ok(())
    }
}

async fn drain_until_noop(session: &mut ImapSession) -> Result<()> {
    let lost = |e: &dyn std::fmt::Display| Error::Connection(format!("Resync failed: {e}"));
    let marker = session.run_command("NOOP").await.map_err(|e| lost(&e))?;

    loop {
        let Some(response) = session.read_response().await.map_err(|e| lost(&e))? else {
            return Err(Error::Connection("connection closed during resync".into()));
        };
        if let Response::Done { tag, .. } = response.parsed()
            && *tag == marker
        {
            return Ok(());
        }
    }
}

/// `UID FETCH <uid> RFC822.SIZE`. `None` if the server left it out.
async fn fetch_size(session: &mut ImapSession, uid: u32) -> Result<Option<usize>> {
    let mut messages = session
        .uid_fetch(uid.to_string(), "RFC822.SIZE")
        .await
        .map_err(|e| server_error(uid, &e))?;

    let mut size = None;
    while let Some(item) = messages.next().await {
        let msg = item.map_err(|e| server_error(uid, &e))?;
        if msg.uid == Some(uid)
            && let Some(reported) = msg.size
        {
            size = usize::try_from(reported).ok();
        }
    }
    Ok(size)
}

/// `UID FETCH <uid> BODY.PEEK[]`, leaving `\Seen` untouched.
async fn fetch_source(session: &mut ImapSession, uid: u32) -> Result<Vec<u8>> {
    let mut messages = session
        .uid_fetch(uid.to_string(), "BODY.PEEK[]")
        .await
        .map_err(|e| server_error(uid, &e))?;

    let mut body = None;
    while let Some(item) = messages.next().await {
        let msg = item.map_err(|e| server_error(uid, &e))?;
        if msg.uid == Some(uid)
            && let Some(bytes) = msg.body()
        {
            body = Some(bytes.to_vec());
        }
    }

    body.ok_or(Error::Fetch {
        uid,
        reason: FetchFailure::Missing,
    })
}

fn server_error(uid: u32, e: &async_imap::error::Error) -> Error {
    Error::Fetch {
        uid,
        reason: FetchFailure::Server(e.to_string()),
    }
}

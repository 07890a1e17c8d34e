//! Retrieval orchestration
//!
//! Decides which messages to fetch, fetches them newest first under a
//! time budget, parses them, and shapes the envelope. Per-message
//! failures are logged and dropped; session-level failures abort the
//! invocation. The session is closed on every path.

use crate::config::{FetchStrategy, Limits, ServiceConfig};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::message::{self, ParsedEmail};
use crate::session::{BodyFetcher, MailboxSession};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Upper bound on messages returned by one invocation.
pub const MAX_EMAIL_COUNT: usize = 50;

/// Parse a requested message count leniently and clamp it to
/// `[1, MAX_EMAIL_COUNT]`.
///
/// Leading digits are honoured (`"3abc"` is 3). Missing or
/// non-numeric input gives 1.
#[must_use]
pub fn requested_count(raw: Option<&str>) -> usize {
    let Some(raw) = raw else {
        return 1;
    };
    let trimmed = raw.trim();
    let (negative, digits) = trimmed
        .strip_prefix('-')
        .map_or((false, trimmed.strip_prefix('+').unwrap_or(trimmed)), |rest| {
            (true, rest)
        });
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if negative || end == 0 {
        return 1;
    }
    // Overlong digit strings saturate.
    digits[..end]
        .parse::<usize>()
        .unwrap_or(MAX_EMAIL_COUNT)
        .clamp(1, MAX_EMAIL_COUNT)
}

/// The newest `count` identifiers, still ascending.
#[must_use]
pub fn select_targets(all: &[u32], count: usize) -> Vec<u32> {
    let start = all.len().saturating_sub(count);
    all[start..].to_vec()
}

/// Time and size bounds for one retrieval.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalPlan {
    pub strategy: FetchStrategy,
    /// Total time for all fetches after the first.
    pub budget: Duration,
    /// Upper bound for any single fetch.
    pub fetch_timeout: Duration,
    pub limits: Limits,
}

impl From<&ServiceConfig> for RetrievalPlan {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            strategy: config.strategy,
            budget: config.timeouts.retrieval_budget,
            fetch_timeout: config.timeouts.fetch,
            limits: config.limits,
        }
    }
}

/// Counts of what happened to each requested message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrievalStats {
    pub requested: usize,
    pub fetched: usize,
    pub fetch_failures: usize,
    pub parse_failures: usize,
    /// Never attempted because the budget ran out or the transport
    /// stayed out of sync.
    pub skipped: usize,
}

/// Parsed emails in request order (newest first) plus stats.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub emails: Vec<ParsedEmail>,
    pub stats: RetrievalStats,
}

/// Fetch and parse `targets` (ascending UIDs), newest first.
///
/// The newest message is always attempted with the full fetch timeout.
/// Each later fetch gets whatever is left of `plan.budget`, capped at
/// `plan.fetch_timeout`; once the budget is spent the rest are skipped.
/// Before each later fetch the fetcher is resynced within the remaining
/// budget, so a timed-out fetch cannot poison the ones after it. If the
/// transport cannot be recovered in time the rest are skipped too.
/// With [`FetchStrategy::Concurrent`] bodies are parsed on the blocking
/// pool while the next fetch runs; results are put back in request
/// order either way.
pub async fn retrieve<F>(fetcher: &mut F, targets: &[u32], plan: &RetrievalPlan) -> Retrieval
where
    F: BodyFetcher + Send,
{
    let started = Instant::now();
    let mut stats = RetrievalStats {
        requested: targets.len(),
        ..RetrievalStats::default()
    };
    let mut parsed: Vec<(usize, ParsedEmail)> = Vec::with_capacity(targets.len());
    let mut parsing = JoinSet::new();

    for (index, &uid) in targets.iter().rev().enumerate() {
        let timeout = if index == 0 {
            plan.fetch_timeout
        } else if let Some(timeout) = next_timeout(fetcher, plan, started).await {
            timeout
        } else {
            stats.skipped = targets.len() - index;
            info!("Skipping {} older messages", stats.skipped);
            break;
        };

        let raw = match fetcher.fetch_body(uid, timeout).await {
            Ok(raw) => raw,
            Err(e) => {
                stats.fetch_failures += 1;
                warn!("Dropping message: {}", e);
                continue;
            }
        };
        stats.fetched += 1;

        match plan.strategy {
            FetchStrategy::Sequential => match message::parse(raw, &plan.limits) {
                Some(email) => parsed.push((index, email)),
                None => {
                    stats.parse_failures += 1;
                    warn!("Dropping UID {}: not a parsable message", uid);
                }
            },
            FetchStrategy::Concurrent => {
                let limits = plan.limits;
                parsing.spawn_blocking(move || (index, uid, message::parse(raw, &limits)));
            }
        }
    }

    while let Some(joined) = parsing.join_next().await {
        match joined {
            Ok((index, _, Some(email))) => parsed.push((index, email)),
            Ok((_, uid, None)) => {
                stats.parse_failures += 1;
                warn!("Dropping UID {}: not a parsable message", uid);
            }
            Err(e) => {
                stats.parse_failures += 1;
                warn!("Parse task failed: {}", e);
            }
        }
    }

    parsed.sort_by_key(|(index, _)| *index);
    debug!(
        "Retrieved {} of {} messages in {}ms",
        parsed.len(),
        stats.requested,
        started.elapsed().as_millis()
    );

    Retrieval {
        emails: parsed.into_iter().map(|(_, email)| email).collect(),
        stats,
    }
}

/// Timeout for the next non-first fetch, or `None` when the budget is
/// spent or the transport could not be brought back in sync within it.
async fn next_timeout<F>(
    fetcher: &mut F,
    plan: &RetrievalPlan,
    started: Instant,
) -> Option<Duration>
where
    F: BodyFetcher + Send,
{
    let remaining = plan.budget.saturating_sub(started.elapsed());
    if remaining.is_zero() {
        info!("Retrieval budget of {}ms spent", plan.budget.as_millis());
        return None;
    }
    if let Err(e) = fetcher.resync(remaining).await {
        warn!("Abandoning remaining fetches: {}", e);
        return None;
    }
    let remaining = plan.budget.saturating_sub(started.elapsed());
    if remaining.is_zero() {
        info!("Retrieval budget of {}ms spent", plan.budget.as_millis());
        return None;
    }
    Some(remaining.min(plan.fetch_timeout))
}

/// Shape the final envelope, newest first.
///
/// # Errors
///
/// Returns [`Error::PartialFailure`] when the mailbox had messages but
/// none survived fetching and parsing.
pub fn build_response(
    mut emails: Vec<ParsedEmail>,
    mailbox_empty: bool,
    requested: usize,
) -> Result<Envelope> {
    if emails.is_empty() {
        if mailbox_empty {
            return Ok(Envelope::empty());
        }
        return Err(Error::PartialFailure { requested });
    }
    emails.sort_by(|a, b| b.uid.cmp(&a.uid));
    Ok(Envelope::with_emails(emails))
}

/// Run one invocation: open, examine, search, fetch, parse, close.
///
/// Everything finishes within `Timeouts::request_deadline`. The work
/// after `open` is cut off early enough to leave `Timeouts::close` for
/// the logout, so the session is closed on every path.
///
/// # Errors
///
/// Configuration, connection, timeout, mailbox and search errors are
/// returned as-is. [`Error::Timeout`] when the request deadline cuts
/// the work short. [`Error::PartialFailure`] when nothing could be
/// retrieved from a non-empty inbox.
pub async fn fetch_latest(config: &ServiceConfig) -> Result<Envelope> {
    let timeouts = &config.timeouts;
    let started = Instant::now();
    let deadline = started + timeouts.request_deadline;
    let overrun = || {
        Error::Timeout(format!(
            "request deadline of {}ms exceeded",
            timeouts.request_deadline.as_millis()
        ))
    };

    let mut session = time::timeout_at(
        deadline,
        MailboxSession::open(&config.session, timeouts, config.limits),
    )
    .await
    .map_err(|_| overrun())??;

    let work_deadline = deadline.checked_sub(timeouts.close).unwrap_or(started);
    let result = time::timeout_at(work_deadline, fetch_from(&mut session, config))
        .await
        .unwrap_or_else(|_| {
            warn!("Request deadline reached, closing session");
            Err(overrun())
        });
    session.close().await;
    result
}

async fn fetch_from(session: &mut MailboxSession, config: &ServiceConfig) -> Result<Envelope> {
    session.select_inbox().await?;
    let all = session.list_all_identifiers().await?;

    let count = config.email_count.clamp(1, MAX_EMAIL_COUNT);
    let targets = select_targets(&all, count);
    if targets.is_empty() {
        info!("Inbox is empty");
        return build_response(Vec::new(), true, 0);
    }

    info!("Fetching {} most recent messages", targets.len());
    let retrieval = retrieve(session, &targets, &RetrievalPlan::from(config)).await;
    let stats = retrieval.stats;
    info!(
        requested = stats.requested,
        fetched = stats.fetched,
        fetch_failures = stats.fetch_failures,
        parse_failures = stats.parse_failures,
        skipped = stats.skipped,
        "Retrieval finished"
    );

    build_response(retrieval.emails, false, targets.len())
}

//! Invocation configuration
//!
//! Everything is read once at the trigger boundary by
//! [`ServiceConfig::from_env`] and passed down explicitly.

use crate::error::{Error, Result};
use crate::orchestrator::requested_count;
use std::env;
use std::time::Duration;

/// IMAP connection configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Implicit TLS (IMAPS). Plain TCP when false.
    pub use_tls: bool,
    /// Skip certificate verification (self-signed servers).
    pub tls_insecure: bool,
}

impl SessionConfig {
    /// Reject empty credentials before any network I/O happens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the user or password is empty.
    pub fn ensure_credentials(&self) -> Result<()> {
        if self.user.trim().is_empty() || self.password.is_empty() {
            return Err(Error::Config("IMAP credentials not configured".into()));
        }
        Ok(())
    }
}

/// Nested time bounds for one invocation.
///
/// `connect` (TCP and TLS) and `auth` (LOGIN) run back to back inside
/// `connection`; `auth` is the shorter of the two and each is shorter
/// than `connection`, but together they may exceed it. `command` bounds `EXAMINE` and `UID SEARCH`. `fetch`
/// sits inside `retrieval_budget`. The sum of the sequential stages
/// must stay below `request_deadline`, the hosting platform's limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connection: Duration,
    pub connect: Duration,
    pub auth: Duration,
    pub command: Duration,
    pub retrieval_budget: Duration,
    pub fetch: Duration,
    pub close: Duration,
    pub request_deadline: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connection: Duration::from_secs(3),
            connect: Duration::from_secs(2),
            auth: Duration::from_millis(1500),
            command: Duration::from_secs(1),
            retrieval_budget: Duration::from_secs(3),
            fetch: Duration::from_secs(2),
            close: Duration::from_secs(1),
            request_deadline: Duration::from_secs(10),
        }
    }
}

impl Timeouts {
    /// Worst case for everything before the outer deadline: open,
    /// examine, search, retrieval and logout.
    #[must_use]
    pub fn internal_total(&self) -> Duration {
        self.connection + self.command * 2 + self.retrieval_budget + self.close
    }

    /// Check the nesting and that the internal budgets leave room
    /// before the outer deadline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an inner bound is not shorter than
    /// its enclosing one, or the budgets add up to the deadline or
    /// beyond.
    pub fn validate(&self) -> Result<()> {
        if self.auth >= self.connect || self.connect >= self.connection {
            return Err(Error::Config(format!(
                "timeouts must satisfy auth ({:?}) < connect ({:?}) < connection ({:?})",
                self.auth, self.connect, self.connection
            )));
        }
        if self.fetch > self.retrieval_budget {
            return Err(Error::Config(format!(
                "fetch timeout ({:?}) must not exceed the retrieval budget ({:?})",
                self.fetch, self.retrieval_budget
            )));
        }
        let internal = self.internal_total();
        if internal >= self.request_deadline {
            return Err(Error::Config(format!(
                "internal time budgets ({internal:?}) must be below the request deadline ({:?})",
                self.request_deadline
            )));
        }
        Ok(())
    }
}

/// Per-message resource caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Largest raw message accepted from the server.
    pub max_message_bytes: usize,
    /// Largest text or HTML body kept after parsing; longer bodies are
    /// truncated with a marker.
    pub max_body_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_message_bytes: 10 * 1024 * 1024,
            max_body_bytes: 50 * 1024,
        }
    }
}

/// How message bodies are fetched and parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchStrategy {
    /// Fetch and parse one message at a time.
    Sequential,
    /// Keep fetching while earlier bodies are parsed on the blocking
    /// pool.
    #[default]
    Concurrent,
}

impl FetchStrategy {
    fn from_env_value(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "concurrent" | "" => Ok(Self::Concurrent),
            other => Err(Error::Config(format!(
                "Invalid FETCH_STRATEGY '{other}', expected 'sequential' or 'concurrent'"
            ))),
        }
    }
}

/// Full configuration of one invocation.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub session: SessionConfig,
    /// Newest messages to return, already clamped to `[1, 50]`.
    pub email_count: usize,
    pub strategy: FetchStrategy,
    pub timeouts: Timeouts,
    pub limits: Limits,
    /// Attach raw error detail to error responses.
    pub expose_errors: bool,
}

impl ServiceConfig {
    /// Configuration with default budgets for the given session.
    #[must_use]
    pub fn new(session: SessionConfig) -> Self {
        Self {
            session,
            email_count: 1,
            strategy: FetchStrategy::default(),
            timeouts: Timeouts::default(),
            limits: Limits::default(),
            expose_errors: false,
        }
    }

    /// Load configuration from environment variables
    ///
    /// Reads from `.env` file if present. Credentials have no defaults
    /// and are checked when the session opens:
    /// - `IMAP_USER`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_HOST` (default: `imap.gmail.com`)
    /// - `IMAP_PORT` (default: `993`)
    /// - `IMAP_TLS` (default: `true`, only `"false"` disables)
    /// - `IMAP_TLS_INSECURE` (default: `false`)
    /// - `EMAIL_COUNT` (default: `1`, clamped to `[1, 50]`)
    /// - `FETCH_STRATEGY` (default: `concurrent`)
    /// - `APP_ENV` (`development` exposes raw errors)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unparsable port or strategy.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let session = SessionConfig {
            host: env::var("IMAP_HOST").unwrap_or_else(|_| "imap.gmail.com".to_string()),
            port: env::var("IMAP_PORT")
                .unwrap_or_else(|_| "993".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?,
            user: env::var("IMAP_USER").unwrap_or_default(),
            password: env::var("IMAP_PASSWORD").unwrap_or_default(),
            use_tls: !env::var("IMAP_TLS").is_ok_and(|v| v.trim().eq_ignore_ascii_case("false")),
            tls_insecure: env::var("IMAP_TLS_INSECURE")
                .is_ok_and(|v| v.trim().eq_ignore_ascii_case("true")),
        };

        let config = Self {
            session,
            email_count: requested_count(env::var("EMAIL_COUNT").ok().as_deref()),
            strategy: env::var("FETCH_STRATEGY")
                .map_or(Ok(FetchStrategy::default()), |v| FetchStrategy::from_env_value(&v))?,
            timeouts: Timeouts::default(),
            limits: Limits::default(),
            expose_errors: env::var("APP_ENV").is_ok_and(|v| v == "development"),
        };
        config.timeouts.validate()?;
        Ok(config)
    }
}

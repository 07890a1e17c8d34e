//! Raw and parsed message types
//!
//! A [`RawMessage`] is the full RFC 5322 source of one message as
//! returned by `BODY.PEEK[]`. [`parse`] consumes it and produces the
//! JSON-facing [`ParsedEmail`], or `None` if the bytes are not a
//! message.

use crate::config::Limits;
use chrono::{DateTime, SecondsFormat, Utc};
use mail_parser::{Addr, Address, MessageParser, MimeHeaders};
use serde::Serialize;

pub const NO_SUBJECT: &str = "(no subject)";
pub const UNKNOWN_SENDER: &str = "(unknown sender)";
pub const UNKNOWN_RECIPIENT: &str = "(unknown recipient)";
pub const TRUNCATION_MARKER: &str = "\n\n[... content truncated]";

/// The full source of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub uid: u32,
    pub bytes: Vec<u8>,
}

/// An attachment listed by name and MIME type. Contents are not kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
}

/// One message as returned to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedEmail {
    /// Mailbox UID; orders the envelope, not serialized.
    #[serde(skip)]
    pub uid: u32,
    pub subject: String,
    pub from: String,
    pub to: String,
    /// ISO-8601, UTC, millisecond precision.
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// Parse a raw message, capping text and HTML bodies at
/// `limits.max_body_bytes`.
///
/// Missing subject, sender and recipient fall back to placeholders; a
/// missing or unparsable date falls back to now.
#[must_use]
pub fn parse(raw: RawMessage, limits: &Limits) -> Option<ParsedEmail> {
    let message = MessageParser::default().parse(raw.bytes.as_slice())?;

    let date = message
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true);

    let attachments = message
        .attachments()
        .map(|part| Attachment {
            filename: part.attachment_name().unwrap_or("unnamed").to_string(),
            content_type: part.content_type().map_or_else(
                || "application/octet-stream".to_string(),
                |ct| match ct.subtype() {
                    Some(sub) => format!("{}/{sub}", ct.ctype()),
                    None => ct.ctype().to_string(),
                },
            ),
        })
        .collect();

    Some(ParsedEmail {
        uid: raw.uid,
        subject: message
            .subject()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(NO_SUBJECT)
            .to_string(),
        from: format_address(message.from()).unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
        to: format_address(message.to()).unwrap_or_else(|| UNKNOWN_RECIPIENT.to_string()),
        date,
        text: message
            .body_text(0)
            .map(|body| cap_body(&body, limits.max_body_bytes)),
        html: message
            .body_html(0)
            .map(|body| cap_body(&body, limits.max_body_bytes)),
        attachments,
    })
}

/// Render an address header as `Name <addr>, addr, ...`.
fn format_address(address: Option<&Address<'_>>) -> Option<String> {
    let rendered: Vec<String> = match address? {
        Address::List(addrs) => addrs.iter().filter_map(format_addr).collect(),
        Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter().filter_map(format_addr))
            .collect(),
    };
    (!rendered.is_empty()).then(|| rendered.join(", "))
}

fn format_addr(addr: &Addr<'_>) -> Option<String> {
    match (addr.name.as_deref(), addr.address.as_deref()) {
        (Some(name), Some(address)) if !name.trim().is_empty() => {
            Some(format!("{name} <{address}>"))
        }
        (_, Some(address)) => Some(address.to_string()),
        (Some(name), None) => Some(name.to_string()),
        (None, None) => None,
    }
}

/// Truncate `body` to at most `limit` bytes on a char boundary and
/// append the marker.
fn cap_body(body: &str, limit: usize) -> String {
    if body.len() <= limit {
        return body.to_string();
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{TRUNCATION_MARKER}", &body[..end])
}

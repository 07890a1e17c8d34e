//! UID FETCH command handler.
//!
//! Two shapes of request are answered:
//!
//! ```text
//! C: A5 UID FETCH 42 RFC822.SIZE
//! S: * 1 FETCH (UID 42 RFC822.SIZE 1234)
//!
//! C: A6 UID FETCH 42 BODY.PEEK[]
//! S: * 1 FETCH (UID 42 BODY[] {1234}
//! S: <exactly 1234 bytes of raw RFC 2822 message>
//! S: )
//! ```
//!
//! The `{length}\r\n` is an IMAP literal marker: the next `length`
//! bytes are raw data, not protocol text. The sequence number is the
//! 1-based index of the message within the folder (RFC 3501 Section
//! 7.4.2).
//!
//! A body request honours the email's `FetchBehavior`: it may be
//! answered with NO, or only after a delay.

use crate::fake_imap::io::{write_line, write_literal, write_tagged};
use crate::fake_imap::mailbox::{FetchBehavior, Mailbox};
use imap_codec::imap_types::fetch::{MacroOrMessageDataItemNames, MessageDataItemName};
use imap_codec::imap_types::sequence::{SeqOrUid, Sequence, SequenceSet};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Extract UIDs from a `SequenceSet`. We only support single values
/// (not ranges) since that's what the client sends.
fn extract_uids(seq_set: &SequenceSet) -> Vec<u32> {
    seq_set
        .0
        .as_ref()
        .iter()
        .filter_map(|seq| match seq {
            Sequence::Single(SeqOrUid::Value(v)) => Some(v.get()),
            _ => None,
        })
        .collect()
}

/// Whether the request only asks for the message size.
fn wants_size_only(items: &MacroOrMessageDataItemNames<'_>) -> bool {
    match items {
        MacroOrMessageDataItemNames::MessageDataItemNames(names) => names.iter().all(|name| {
            matches!(
                name,
                MessageDataItemName::Rfc822Size | MessageDataItemName::Uid
            )
        }),
        MacroOrMessageDataItemNames::Macro(_) => false,
    }
}

/// Handle the UID FETCH command.
pub async fn handle_uid_fetch<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    items: &MacroOrMessageDataItemNames<'_>,
    mailbox: &Mailbox,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder_name) = selected_folder else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    let Some(folder) = mailbox.get_folder(folder_name) else {
        let resp = format!("{tag} BAD Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    let size_only = wants_size_only(items);

    for uid in extract_uids(sequence_set) {
        let Some((idx, email)) = folder.emails.iter().enumerate().find(|(_, e)| e.uid == uid)
        else {
            continue;
        };
        let seq = idx + 1;
        let body_len = email.raw.len();

        if size_only {
            let line = format!("* {seq} FETCH (UID {uid} RFC822.SIZE {body_len})\r\n");
            if write_line(stream, &line).await.is_err() {
                return;
            }
            continue;
        }

        match email.behavior {
            FetchBehavior::Fail => {
                let text = format!("Message {uid} is unavailable");
                let _ = write_tagged(stream, tag, "NO", &text).await;
                return;
            }
            FetchBehavior::Stall(delay) => tokio::time::sleep(delay).await,
            FetchBehavior::Normal => {}
        }

        let prefix = format!("* {seq} FETCH (UID {uid} BODY[]");
        if write_literal(stream, &prefix, &email.raw).await.is_err() {
            return;
        }
    }

    let _ = write_tagged(stream, tag, "OK", "FETCH completed").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use imap_codec::CommandCodec;
    use imap_codec::decode::Decoder;
    use imap_codec::imap_types::command::CommandBody;
    use std::num::NonZeroU32;
    use tokio::io::BufReader;

    fn make_raw_email() -> Vec<u8> {
        b"From: a@b.com\r\nSubject: Test\r\n\r\nBody".to_vec()
    }

    fn uid_set(uid: u32) -> SequenceSet {
        SequenceSet(
            vec![Sequence::Single(SeqOrUid::Value(
                NonZeroU32::new(uid).unwrap(),
            ))]
            .try_into()
            .unwrap(),
        )
    }

    /// Parse the item list the way the server sees it on the wire.
    fn items(names: &str) -> MacroOrMessageDataItemNames<'static> {
        let line: &'static [u8] =
            Box::leak(format!("A1 UID FETCH 1 {names}\r\n").into_bytes().into_boxed_slice());
        let (_, command) = CommandCodec::default().decode(line).unwrap();
        match command.body {
            CommandBody::Fetch {
                macro_or_item_names,
                ..
            } => macro_or_item_names,
            other => panic!("expected FETCH, got {other:?}"),
        }
    }

    fn body_peek() -> MacroOrMessageDataItemNames<'static> {
        items("BODY.PEEK[]")
    }

    fn size() -> MacroOrMessageDataItemNames<'static> {
        items("RFC822.SIZE")
    }

    async fn run(
        tag: &str,
        sequence_set: &SequenceSet,
        items: &MacroOrMessageDataItemNames<'_>,
        mailbox: &Mailbox,
        selected: Option<&str>,
    ) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        handle_uid_fetch(tag, sequence_set, items, mailbox, selected, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn fetches_email_by_uid() {
        let raw = make_raw_email();
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(42, false, &raw)
            .build();

        let output = run("A1", &uid_set(42), &body_peek(), &mailbox, Some("INBOX")).await;

        assert!(output.contains("* 1 FETCH (UID 42 BODY[]"));
        assert!(output.contains("From: a@b.com"));
        assert!(output.contains(&format!("{{{}}}", raw.len())));
        assert!(output.contains("A1 OK FETCH completed"));
    }

    #[tokio::test]
    async fn size_request_sends_no_body() {
        let raw = make_raw_email();
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(7, false, &raw)
            .build();

        let output = run("A1", &uid_set(7), &size(), &mailbox, Some("INBOX")).await;

        assert!(output.contains(&format!("* 1 FETCH (UID 7 RFC822.SIZE {})", raw.len())));
        assert!(!output.contains("From: a@b.com"));
    }

    #[tokio::test]
    async fn failing_email_answers_no() {
        let raw = make_raw_email();
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .failing_email(3, &raw)
            .build();

        let output = run("A1", &uid_set(3), &body_peek(), &mailbox, Some("INBOX")).await;

        assert!(output.contains("A1 NO"));
        assert!(!output.contains("BODY[]"));
    }

    #[tokio::test]
    async fn missing_uid_returns_only_ok() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();

        let output = run("A1", &uid_set(99), &body_peek(), &mailbox, Some("INBOX")).await;

        assert!(!output.contains("FETCH (UID"));
        assert!(output.contains("A1 OK FETCH completed"));
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();

        let output = run("A1", &uid_set(1), &body_peek(), &mailbox, None).await;

        assert!(output.contains("A1 BAD No folder selected"));
    }

    #[test]
    fn body_request_is_not_size_only() {
        assert!(wants_size_only(&size()));
        assert!(!wants_size_only(&body_peek()));
        assert!(!wants_size_only(&items("FULL")));
    }
}

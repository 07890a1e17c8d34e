//! LOGOUT command handler.
//!
//! Counts the logout so tests can check that a session was closed,
//! then answers with an untagged BYE and the tagged OK.

use crate::fake_imap::io::{write_line, write_tagged};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the LOGOUT command. The caller ends the connection after it.
pub async fn handle_logout<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    logouts: &AtomicUsize,
    stream: &mut BufReader<S>,
) {
    logouts.fetch_add(1, Ordering::SeqCst);
    if write_line(stream, "* BYE Fake server logging out\r\n")
        .await
        .is_ok()
    {
        let _ = write_tagged(stream, tag, "OK", "LOGOUT completed").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn run(tag: &str, logouts: &AtomicUsize) -> String {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);

        handle_logout(tag, logouts, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn bye_precedes_tagged_ok() {
        let logouts = AtomicUsize::new(0);
        let output = run("A0005", &logouts).await;

        assert!(output.starts_with("* BYE"));
        assert!(output.ends_with("A0005 OK LOGOUT completed\r\n"));
    }

    #[tokio::test]
    async fn every_logout_is_counted() {
        let logouts = AtomicUsize::new(0);
        run("A1", &logouts).await;
        run("B1", &logouts).await;

        assert_eq!(logouts.load(Ordering::SeqCst), 2);
    }
}

//! Reply writers for the fake IMAP server.
//!
//! Every reply is flushed before the writer returns, so a client
//! waiting on a response never waits on the server's buffer.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Send one protocol line, CRLF included.
pub async fn write_line<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    line: &str,
) -> std::io::Result<()> {
    stream.get_mut().write_all(line.as_bytes()).await?;
    stream.get_mut().flush().await
}

/// Send the tagged completion of a command, e.g. `A7 OK NOOP completed`.
pub async fn write_tagged<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    tag: &str,
    status: &str,
    text: &str,
) -> std::io::Result<()> {
    write_line(stream, &format!("{tag} {status} {text}\r\n")).await
}

/// Send `prefix {len}`, the `data` as a counted literal, and the `)`
/// that closes a FETCH item list, as one flushed reply.
pub async fn write_literal<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    prefix: &str,
    data: &[u8],
) -> std::io::Result<()> {
    let writer = stream.get_mut();
    writer
        .write_all(format!("{prefix} {{{}}}\r\n", data.len()).as_bytes())
        .await?;
    writer.write_all(data).await?;
    writer.write_all(b")\r\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn collect<F, Fut>(write: F) -> String
    where
        F: FnOnce(BufReader<tokio::io::DuplexStream>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let (mut client, server) = tokio::io::duplex(1024);
        write(BufReader::new(server)).await;

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn literal_is_counted_and_closed() {
        let output = collect(|mut stream| async move {
            write_literal(&mut stream, "* 1 FETCH (UID 9 BODY[]", b"hi\r\n")
                .await
                .unwrap();
        })
        .await;

        assert_eq!(output, "* 1 FETCH (UID 9 BODY[] {4}\r\nhi\r\n)\r\n");
    }

    #[tokio::test]
    async fn tagged_reply_has_status_and_text() {
        let output = collect(|mut stream| async move {
            write_tagged(&mut stream, "A3", "NO", "busy").await.unwrap();
        })
        .await;

        assert_eq!(output, "A3 NO busy\r\n");
    }
}

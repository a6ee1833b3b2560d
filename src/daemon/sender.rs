//! Write side of a connection.

use crate::error::{Error, Result};
use crate::message::BoxMessage;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Drains the outbound queue onto the wire.
///
/// Each message must be fully written within the write timeout. Any write
/// failure ends the sender: after a partial write the stream framing is
/// undefined, so nothing further may be sent.
pub(crate) struct Sender<W> {
    writer: W,
    outbound: mpsc::Receiver<BoxMessage>,
    write_timeout: Duration,
}

impl<W: AsyncWrite + Unpin> Sender<W> {
    pub(crate) fn new(
        writer: W,
        outbound: mpsc::Receiver<BoxMessage>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            writer,
            outbound,
            write_timeout,
        }
    }

    pub(crate) async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = self.outbound.recv() => match message {
                    Some(message) => message,
                    None => return Ok(()),
                },
            };
            self.send(message.as_bytes()).await?;
            trace!(bytes = message.as_bytes().len(), "Sent message");
        }
    }

    /// Write all of `buf`, reissuing writes after short writes.
    async fn send(&mut self, mut buf: &[u8]) -> Result<()> {
        let limit = self.write_timeout;
        let writer = &mut self.writer;

        let write_all = async move {
            while !buf.is_empty() {
                let n = writer.write(buf).await?;
                if n == 0 {
                    return Err(io::Error::from(io::ErrorKind::WriteZero));
                }
                buf = &buf[n..];
            }
            writer.flush().await
        };

        tokio::time::timeout(limit, write_all)
            .await
            .map_err(|_| Error::WriteTimeout(limit))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Packet;
    use tokio_test::io::Builder;

    async fn queue(messages: &[&str]) -> mpsc::Receiver<BoxMessage> {
        let (tx, rx) = mpsc::channel::<BoxMessage>(messages.len().max(1));
        for m in messages {
            tx.send(Box::new(Packet::from(*m))).await.unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn test_sends_in_order_until_queue_closes() {
        let writer = Builder::new().write(b"hello").write(b"world").build();
        let sender = Sender::new(writer, queue(&["hello", "world"]).await, Duration::from_secs(1));

        assert!(sender.run(CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_partial_writes_are_completed() {
        // The wait forces the first write to stop after "hel".
        let writer = Builder::new()
            .write(b"hel")
            .wait(Duration::from_millis(5))
            .write(b"lo")
            .wait(Duration::from_millis(5))
            .write(b"world")
            .build();
        let sender = Sender::new(writer, queue(&["hello", "world"]).await, Duration::from_secs(1));

        assert!(sender.run(CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_error_mid_message_stops_sending() {
        let writer = Builder::new()
            .write(b"hel")
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            .build();
        let sender = Sender::new(writer, queue(&["hello", "world"]).await, Duration::from_secs(1));

        let result = sender.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[tokio::test]
    async fn test_write_deadline() {
        let writer = Builder::new()
            .write(b"hel")
            .wait(Duration::from_secs(5))
            .build();
        let sender = Sender::new(writer, queue(&["hello"]).await, Duration::from_millis(50));

        let result = sender.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::WriteTimeout(_))));
    }

    #[tokio::test]
    async fn test_cancel_while_idle() {
        let (_tx, rx) = mpsc::channel::<BoxMessage>(1);
        let writer = Builder::new().build();
        let sender = Sender::new(writer, rx, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(sender.run(cancel).await.is_ok());
    }
}

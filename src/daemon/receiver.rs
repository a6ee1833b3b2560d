//! Read side of a connection.

use crate::error::{Error, Result, SplitError};
use crate::message::BoxMessage;
use crate::splitter::Splitter;
use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Reads the stream, frames it with the splitter and hands each message to
/// the processor.
///
/// The handoff waits for the processor, so a slow handler stops further
/// socket reads. Unconsumed bytes stay buffered across reads.
pub(crate) struct Receiver<R> {
    reader: R,
    splitter: Splitter,
    received: mpsc::Sender<BoxMessage>,
    chunk_size: usize,
    read_timeout: Option<Duration>,
}

impl<R: AsyncRead + Unpin> Receiver<R> {
    pub(crate) fn new(
        reader: R,
        splitter: Splitter,
        received: mpsc::Sender<BoxMessage>,
        chunk_size: usize,
        read_timeout: Option<Duration>,
    ) -> Self {
        Self {
            reader,
            splitter,
            received,
            chunk_size: chunk_size.max(1),
            read_timeout,
        }
    }

    pub(crate) async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut buffer = BytesMut::with_capacity(self.chunk_size);

        loop {
            buffer.reserve(self.chunk_size);
            let n = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                n = self.fill(&mut buffer) => n?,
            };

            if n == 0 {
                if buffer.is_empty() {
                    trace!("Connection closed by peer");
                    return Ok(());
                }
                return Err(Error::TruncatedFrame(buffer.len()));
            }
            trace!(bytes = n, buffered = buffer.len(), "Read from connection");

            while let Some(message) = self.split(&mut buffer)? {
                trace!(?message, "Framed message");
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    sent = self.received.send(message) => {
                        if sent.is_err() {
                            // Processor is gone; the connection is closing.
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// One read of at most the spare capacity of `buffer`.
    async fn fill(&mut self, buffer: &mut BytesMut) -> Result<usize> {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.reader.read_buf(buffer))
                .await
                .map_err(|_| Error::ReadTimeout(limit))?
                .map_err(Error::from),
            None => Ok(self.reader.read_buf(buffer).await?),
        }
    }

    /// Take the next complete message off the front of `buffer`, if any.
    fn split(&self, buffer: &mut BytesMut) -> Result<Option<BoxMessage>> {
        match (self.splitter)(&buffer[..]) {
            Ok((message, consumed)) => {
                if consumed == 0 || consumed > buffer.len() {
                    return Err(Error::InvalidConsumption {
                        consumed,
                        available: buffer.len(),
                    });
                }
                buffer.advance(consumed);
                Ok(Some(message))
            }
            Err(SplitError::NotEnoughData) => Ok(None),
            Err(e) => Err(Error::Split(e)),
        }
    }
}

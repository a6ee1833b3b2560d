//! Bridges an externally supplied message source onto a connection.

use crate::error::{Error, Result};
use crate::message::BoxMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Moves messages from the connect-callback source into the outbound queue.
///
/// Forwarded messages interleave with handler replies; each source stays
/// FIFO on its own. The source closing ends the connection.
pub(crate) struct Forwarder {
    source: Option<mpsc::Receiver<BoxMessage>>,
    outbound: mpsc::Sender<BoxMessage>,
}

impl Forwarder {
    pub(crate) fn new(
        source: Option<mpsc::Receiver<BoxMessage>>,
        outbound: mpsc::Sender<BoxMessage>,
    ) -> Self {
        Self { source, outbound }
    }

    pub(crate) async fn run(self, cancel: CancellationToken) -> Result<()> {
        let Some(mut source) = self.source else {
            // Nothing to forward; idle until the connection closes.
            cancel.cancelled().await;
            return Ok(());
        };

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = source.recv() => message.ok_or(Error::SourceClosed)?,
            };
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = self.outbound.send(message) => sent.map_err(|_| Error::OutboundClosed)?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Packet};
    use std::time::Duration;

    #[tokio::test]
    async fn test_forwards_then_fails_on_source_close() {
        let (source_tx, source_rx) = mpsc::channel::<BoxMessage>(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        source_tx.send(Box::new(Packet::from("tick-1"))).await.unwrap();
        source_tx.send(Box::new(Packet::from("tick-2"))).await.unwrap();
        drop(source_tx);

        let result = Forwarder::new(Some(source_rx), out_tx)
            .run(CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::SourceClosed)));
        assert_eq!(out_rx.recv().await.unwrap().as_bytes(), b"tick-1");
        assert_eq!(out_rx.recv().await.unwrap().as_bytes(), b"tick-2");
    }

    #[tokio::test]
    async fn test_without_source_waits_for_cancel() {
        let (out_tx, _out_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Forwarder::new(None, out_tx).run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }
}

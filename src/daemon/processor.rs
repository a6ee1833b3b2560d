//! Runs the composed handler chain for each received message.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::HandlerRef;
use crate::id::ConnectionId;
use crate::message::BoxMessage;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

pub(crate) struct Processor {
    conn_id: ConnectionId,
    received: mpsc::Receiver<BoxMessage>,
    outbound: mpsc::Sender<BoxMessage>,
    handler: HandlerRef,
}

impl Processor {
    pub(crate) fn new(
        conn_id: ConnectionId,
        received: mpsc::Receiver<BoxMessage>,
        outbound: mpsc::Sender<BoxMessage>,
        handler: HandlerRef,
    ) -> Self {
        Self {
            conn_id,
            received,
            outbound,
            handler,
        }
    }

    /// Handle messages one at a time, in receipt order.
    ///
    /// Handler errors are logged and do not affect the connection. A
    /// panicking handler ends the connection.
    pub(crate) async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = self.received.recv() => match message {
                    Some(message) => message,
                    None => return Ok(()),
                },
            };

            let mut ctx = Context::new(self.conn_id.clone(), message, self.outbound.clone());
            let invocation = AssertUnwindSafe(self.handler.call(&mut ctx)).catch_unwind();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                outcome = invocation => outcome,
            };

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(conn_id = %self.conn_id, error = %e, "Handler failed");
                }
                Err(_) => {
                    error!(conn_id = %self.conn_id, "Handler panicked");
                    return Err(Error::TaskPanicked);
                }
            }
        }
    }
}

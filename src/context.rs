//! Per-message handler context.

use crate::error::{Error, Result};
use crate::id::ConnectionId;
use crate::message::{BoxMessage, Message};
use tokio::sync::mpsc;

/// Handle given to the handler chain for one received message.
///
/// Lives for exactly one handler-chain invocation. Middleware may replace
/// the received message with a richer type through [`set_received`].
///
/// [`set_received`]: Context::set_received
#[derive(Debug)]
pub struct Context {
    conn_id: ConnectionId,
    received: BoxMessage,
    outbound: mpsc::Sender<BoxMessage>,
}

impl Context {
    pub(crate) fn new(
        conn_id: ConnectionId,
        received: BoxMessage,
        outbound: mpsc::Sender<BoxMessage>,
    ) -> Self {
        Self {
            conn_id,
            received,
            outbound,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.conn_id
    }

    pub fn received(&self) -> &dyn Message {
        &*self.received
    }

    /// The received message as a `T`, if that is its concrete type.
    pub fn received_as<T: Message>(&self) -> Option<&T> {
        self.received().downcast_ref::<T>()
    }

    pub fn set_received(&mut self, message: BoxMessage) {
        self.received = message;
    }

    /// Queue a reply on this connection.
    ///
    /// Waits until the outbound queue accepts the message. Replies from one
    /// handler reach the wire in the order they were sent.
    pub async fn send<M: Message>(&self, message: M) -> Result<()> {
        self.send_boxed(Box::new(message)).await
    }

    pub async fn send_boxed(&self, message: BoxMessage) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| Error::OutboundClosed)
    }
}

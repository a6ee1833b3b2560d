//! Per-connection supervision.
//!
//! A [`Daemon`] owns one accepted stream from accept to disconnect and runs
//! four cooperating tasks on it:
//!
//! - `Receiver`: reads and frames the stream
//! - `Processor`: runs the handler chain for each message
//! - `Sender`: writes outbound messages
//! - `Forwarder`: injects messages from the connect-callback source
//!
//! The tasks share one cancellation scope. Whichever task returns first,
//! successfully or not, cancels the scope; the others stop at their next
//! suspension point. The daemon then fires the disconnect callback and
//! reports the first error observed.

mod forwarder;
mod processor;
mod receiver;
mod sender;

use crate::error::{Error, Result};
use crate::handler::HandlerRef;
use crate::id::ConnectionId;
use crate::message::BoxMessage;
use crate::splitter::Splitter;
use forwarder::Forwarder;
use processor::Processor;
use receiver::Receiver;
use sender::Sender;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Called when a connection becomes active. May return a source of
/// messages to push to that connection independently of requests.
pub type OnConnected =
    Arc<dyn Fn(&ConnectionId) -> Option<mpsc::Receiver<BoxMessage>> + Send + Sync>;

/// Called once after all tasks of a connection have stopped.
pub type OnDisconnected = Arc<dyn Fn(&ConnectionId) + Send + Sync>;

/// Capacity of the per-connection queues. One slot keeps each handoff a
/// near-rendezvous so backpressure reaches the socket reader.
const QUEUE_CAPACITY: usize = 1;

/// Per-connection I/O settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Bytes requested from the socket per read.
    pub read_chunk_size: usize,
    /// Deadline for writing one complete message.
    pub write_timeout: Duration,
    /// Close the connection after this long without incoming data.
    pub read_timeout: Option<Duration>,
    /// Maximum number of live connections per server.
    pub max_connections: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            read_chunk_size: 1024,
            write_timeout: Duration::from_secs(1),
            read_timeout: None,
            max_connections: 10_000,
        }
    }
}

/// Lifecycle of a daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Supervisor for a single connection.
pub struct Daemon<S> {
    conn_id: ConnectionId,
    stream: S,
    splitter: Splitter,
    handler: HandlerRef,
    on_connected: Option<OnConnected>,
    on_disconnected: Option<OnDisconnected>,
    settings: ConnectionSettings,
}

impl<S> Daemon<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(
        conn_id: ConnectionId,
        stream: S,
        splitter: Splitter,
        handler: HandlerRef,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            conn_id,
            stream,
            splitter,
            handler,
            on_connected: None,
            on_disconnected: None,
            settings,
        }
    }

    pub fn with_on_connected(mut self, callback: Option<OnConnected>) -> Self {
        self.on_connected = callback;
        self
    }

    pub fn with_on_disconnected(mut self, callback: Option<OnDisconnected>) -> Self {
        self.on_disconnected = callback;
        self
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.conn_id
    }

    /// Serve the connection until one of its tasks stops or `shutdown` fires.
    ///
    /// The stream is dropped, and so closed, when this returns.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Daemon {
            conn_id,
            stream,
            splitter,
            handler,
            on_connected,
            on_disconnected,
            settings,
        } = self;
        trace!(%conn_id, state = ?DaemonState::Connecting, "Daemon state");

        let source = on_connected.and_then(|callback| callback(&conn_id));
        let (received_tx, received_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (reader, writer) = tokio::io::split(stream);

        let scope = shutdown.child_token();
        let first_error = Mutex::new(None);

        let receiver = Receiver::new(
            reader,
            splitter,
            received_tx,
            settings.read_chunk_size,
            settings.read_timeout,
        );
        let sender = Sender::new(writer, outbound_rx, settings.write_timeout);
        let processor = Processor::new(conn_id.clone(), received_rx, outbound_tx.clone(), handler);
        let forwarder = Forwarder::new(source, outbound_tx);

        debug!(%conn_id, state = ?DaemonState::Active, "Daemon state");
        tokio::join!(
            supervise(&conn_id, "receiver", &scope, &first_error, receiver.run(scope.clone())),
            supervise(&conn_id, "sender", &scope, &first_error, sender.run(scope.clone())),
            supervise(&conn_id, "processor", &scope, &first_error, processor.run(scope.clone())),
            supervise(&conn_id, "forwarder", &scope, &first_error, forwarder.run(scope.clone())),
        );

        if let Some(callback) = on_disconnected {
            callback(&conn_id);
        }
        debug!(%conn_id, state = ?DaemonState::Closed, "Daemon state");

        match first_error.into_inner().unwrap_or_else(PoisonError::into_inner) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Run one connection task, then close the shared scope.
///
/// Only the first error across all tasks is kept.
async fn supervise(
    conn_id: &ConnectionId,
    task: &'static str,
    scope: &CancellationToken,
    first_error: &Mutex<Option<Error>>,
    work: impl Future<Output = Result<()>>,
) {
    let result = work.await;
    if !scope.is_cancelled() {
        debug!(%conn_id, task, state = ?DaemonState::Closing, "Daemon state");
    }
    scope.cancel();

    if let Err(e) = result {
        debug!(%conn_id, task, error = %e, "Connection task failed");
        first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(e);
    }
}

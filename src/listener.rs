//! TCP listener producing identified connections.

use crate::error::{Error, Result};
use crate::id::{ConnectionId, IdGenerator};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Listen backlog for the bound socket.
const BACKLOG: i32 = 1024;

/// An accepted connection and the identifier assigned to it.
#[derive(Debug)]
pub struct Accepted {
    pub conn_id: ConnectionId,
    pub stream: TcpStream,
    pub peer: SocketAddr,
}

/// Why the accept loop ended.
#[derive(Debug, Clone)]
pub enum ListenerExit {
    /// [`Listener::stop`] was called.
    Stopped,
    /// Accepting failed; no further connections will be accepted.
    Failed(Arc<io::Error>),
}

/// Binds a socket and hands accepted connections to a channel.
///
/// Binding happens up front so bind errors surface immediately; the accept
/// loop runs in the background once [`start`](Listener::start) is called.
pub struct Listener {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    ids: Arc<IdGenerator>,
    stop: CancellationToken,
    exit: Arc<Mutex<Option<ListenerExit>>>,
}

impl Listener {
    /// Bind to `address` (host:port).
    pub async fn bind(address: &str) -> Result<Self> {
        let addr = tokio::net::lookup_host(address).await?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no address found for {address}"),
            )
        })?;

        let listener = TcpListener::from_std(create_listener(addr)?)?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Listening");

        Ok(Self {
            listener: Some(listener),
            local_addr,
            ids: Arc::new(IdGenerator::new()),
            stop: CancellationToken::new(),
            exit: Arc::new(Mutex::new(None)),
        })
    }

    /// Use a shared identifier generator instead of a private one.
    pub fn with_id_generator(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start accepting. The returned channel closes when the accept loop
    /// ends; [`exit`](Listener::exit) then tells why.
    pub fn start(&mut self) -> Result<mpsc::Receiver<Accepted>> {
        let listener = self.listener.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AlreadyExists, "listener already started")
        })?;
        let (tx, rx) = mpsc::channel(1);

        let ids = Arc::clone(&self.ids);
        let stop = self.stop.clone();
        let exit = Arc::clone(&self.exit);
        tokio::spawn(async move {
            let reason = accept_loop(listener, ids, tx.clone(), stop).await;
            *exit.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
            // The exit reason is published before the channel closes.
            drop(tx);
        });

        Ok(rx)
    }

    /// Stop accepting. Only valid after a successful [`start`](Listener::start).
    pub fn stop(&self) -> Result<()> {
        if self.listener.is_some() {
            return Err(Error::NotStarted);
        }
        self.stop.cancel();
        Ok(())
    }

    /// Handle that can stop this listener from elsewhere.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Reason the accept loop ended, once the channel has closed.
    pub fn exit(&self) -> Option<ListenerExit> {
        self.exit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn accept_loop(
    listener: TcpListener,
    ids: Arc<IdGenerator>,
    connections: mpsc::Sender<Accepted>,
    stop: CancellationToken,
) -> ListenerExit {
    loop {
        let accepted = tokio::select! {
            _ = stop.cancelled() => return ListenerExit::Stopped,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) if is_transient(&e) => {
                warn!(error = %e, "Transient accept failure");
                continue;
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                return ListenerExit::Failed(Arc::new(e));
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }
        let conn_id = ids.next_id();
        debug!(%conn_id, peer = %peer, "New connection");

        let accepted = Accepted {
            conn_id,
            stream,
            peer,
        };
        tokio::select! {
            _ = stop.cancelled() => return ListenerExit::Stopped,
            sent = connections.send(accepted) => {
                if sent.is_err() {
                    // Nobody is consuming connections any more.
                    return ListenerExit::Stopped;
                }
            }
        }
    }
}

/// Accept errors caused by a single peer rather than the listening socket.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

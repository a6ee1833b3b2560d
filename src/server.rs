//! Server: the composition root.
//!
//! Holds the framing rule, middleware, routes, default handler and
//! connection callbacks; accepts connections and runs a [`Daemon`] for
//! each. Configure it first, then share it (e.g. in an `Arc`) to call
//! [`start`](Server::start) and [`stop`](Server::stop) from different tasks.
//!
//! Three ways to end a running server:
//!
//! - [`stop`](Server::stop): stop accepting, then close live connections
//! - [`drain`](Server::drain): stop accepting, let live connections finish
//! - [`shutdown`](Server::shutdown): close the listener and every
//!   connection at once

use crate::daemon::{ConnectionSettings, Daemon, OnConnected, OnDisconnected};
use crate::error::{Error, HandlerError, Result};
use crate::handler::{compose, handler_fn, HandlerRef, Middleware, Predicate, Router, RouterPair};
use crate::id::{ConnectionId, IdGenerator};
use crate::listener::{Listener, ListenerExit};
use crate::message::{BoxMessage, Message};
use crate::splitter::{self, Splitter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Default fallback: the message matched no route.
fn unknown_message() -> HandlerRef {
    handler_fn(|_ctx| Box::pin(async { Err(HandlerError::from("unknown message")) }))
}

/// Stop signals for a running server.
struct Running {
    listener: CancellationToken,
    connections: CancellationToken,
    draining: Arc<AtomicBool>,
}

pub struct Server {
    splitter: Splitter,
    middleware: Vec<Middleware>,
    routes: Vec<RouterPair>,
    default_handler: HandlerRef,
    on_connected: Option<OnConnected>,
    on_disconnected: Option<OnDisconnected>,
    settings: ConnectionSettings,
    ids: Arc<IdGenerator>,
    running: Mutex<Option<Running>>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// A server that treats each read as one message and answers every
    /// message with a handler error.
    pub fn new() -> Self {
        Self {
            splitter: splitter::whole_buffer(),
            middleware: Vec::new(),
            routes: Vec::new(),
            default_handler: unknown_message(),
            on_connected: None,
            on_disconnected: None,
            settings: ConnectionSettings::default(),
            ids: Arc::new(IdGenerator::new()),
            running: Mutex::new(None),
        }
    }

    pub fn set_splitter(&mut self, splitter: Splitter) {
        self.splitter = splitter;
    }

    pub fn set_settings(&mut self, settings: ConnectionSettings) {
        self.settings = settings;
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Append middleware. Earlier registrations wrap later ones.
    pub fn use_middleware<F>(&mut self, middleware: F)
    where
        F: Fn(HandlerRef) -> HandlerRef + Send + Sync + 'static,
    {
        self.middleware.push(Arc::new(middleware));
    }

    /// Register a route. Routes are tried in registration order.
    pub fn add_route<P>(&mut self, predicate: P, handler: HandlerRef)
    where
        P: Fn(&dyn Message) -> bool + Send + Sync + 'static,
    {
        let predicate: Predicate = Arc::new(predicate);
        self.routes.push(RouterPair::new(predicate, handler));
    }

    /// Handler for messages no route matches.
    pub fn set_default_handler(&mut self, handler: HandlerRef) {
        self.default_handler = handler;
    }

    pub fn set_on_connected<F>(&mut self, callback: F)
    where
        F: Fn(&ConnectionId) -> Option<mpsc::Receiver<BoxMessage>> + Send + Sync + 'static,
    {
        self.on_connected = Some(Arc::new(callback));
    }

    pub fn set_on_disconnected<F>(&mut self, callback: F)
    where
        F: Fn(&ConnectionId) + Send + Sync + 'static,
    {
        self.on_disconnected = Some(Arc::new(callback));
    }

    /// Bind `address` and serve until stopped.
    ///
    /// Returns only after every connection accepted has closed. Fails on
    /// bind errors and on accept failures that were not caused by
    /// [`stop`](Server::stop). Once accepting ends, live connections are
    /// closed unless [`drain`](Server::drain) was requested.
    pub async fn start(&self, address: &str) -> Result<()> {
        let listener = Listener::bind(address).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: Listener) -> Result<()> {
        let mut listener = listener.with_id_generator(Arc::clone(&self.ids));
        let mut incoming = listener.start()?;

        let connections = CancellationToken::new();
        let draining = Arc::new(AtomicBool::new(false));
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = Some(Running {
            listener: listener.stop_handle(),
            connections: connections.clone(),
            draining: Arc::clone(&draining),
        });

        let limit = Arc::new(Semaphore::new(self.settings.max_connections.max(1)));
        let routes: Arc<[RouterPair]> = self.routes.clone().into();
        let mut daemons = JoinSet::new();

        let stop = listener.stop_handle();
        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                _ = stop.cancelled() => break,
                permit = Arc::clone(&limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let Some(accepted) = incoming.recv().await else {
                break;
            };
            debug!(conn_id = %accepted.conn_id, peer = %accepted.peer, "Starting daemon");

            let router: HandlerRef = Arc::new(Router::new(
                Arc::clone(&routes),
                Arc::clone(&self.default_handler),
            ));
            let handler = compose(&self.middleware, router);
            let daemon = Daemon::new(
                accepted.conn_id,
                accepted.stream,
                Arc::clone(&self.splitter),
                handler,
                self.settings.clone(),
            )
            .with_on_connected(self.on_connected.clone())
            .with_on_disconnected(self.on_disconnected.clone());

            let shutdown = connections.clone();
            let peer = accepted.peer;
            daemons.spawn(async move {
                let conn_id = daemon.connection_id().clone();
                match daemon.run(shutdown).await {
                    Ok(()) => debug!(%conn_id, peer = %peer, "Connection closed"),
                    Err(e) => debug!(%conn_id, peer = %peer, error = %e, "Connection closed with error"),
                }
                drop(permit);
            });

            // Reap finished daemons
            while let Some(joined) = daemons.try_join_next() {
                log_join(joined);
            }
        }

        let live = daemons.len();
        if draining.load(Ordering::SeqCst) {
            if live > 0 {
                info!(connections = live, "Listener closed, waiting for connections to finish");
            }
        } else {
            if live > 0 {
                info!(connections = live, "Listener closed, closing connections");
            }
            connections.cancel();
        }
        while let Some(joined) = daemons.join_next().await {
            log_join(joined);
        }
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match listener.exit() {
            Some(ListenerExit::Failed(e)) => Err(Error::Accept(e)),
            _ => {
                info!("Server stopped");
                Ok(())
            }
        }
    }

    /// Stop accepting connections and close the live ones.
    /// [`start`](Server::start) returns once their tasks have exited.
    pub fn stop(&self) -> Result<()> {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let running = running.as_ref().ok_or(Error::NotStarted)?;
        running.listener.cancel();
        // A drain already past the accept loop will not cancel on its own.
        if running.draining.swap(false, Ordering::SeqCst) {
            running.connections.cancel();
        }
        Ok(())
    }

    /// Stop accepting connections. [`start`](Server::start) returns once
    /// the live connections have closed on their own.
    pub fn drain(&self) -> Result<()> {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let running = running.as_ref().ok_or(Error::NotStarted)?;
        running.draining.store(true, Ordering::SeqCst);
        running.listener.cancel();
        Ok(())
    }

    /// Stop accepting and close every live connection.
    pub fn shutdown(&self) -> Result<()> {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let running = running.as_ref().ok_or(Error::NotStarted)?;
        running.listener.cancel();
        running.connections.cancel();
        Ok(())
    }
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Connection task panicked");
    }
}

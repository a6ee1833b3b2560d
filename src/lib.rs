//! tcp-daemon: a connection-oriented TCP server framework.
//!
//! A [`Server`] accepts connections and runs a [`Daemon`] for each one.
//! Incoming bytes are cut into messages by a [`Splitter`], passed through
//! [`Middleware`] to a predicate [`Router`], and handlers reply through
//! their [`Context`]. A connect callback may hand back a channel whose
//! messages are pushed to the peer alongside the replies.
//!
//! ```ignore
//! let mut server = Server::new();
//! server.set_splitter(splitter::delimited(b'\n'));
//! server.add_route(
//!     |m: &dyn Message| m.as_bytes().starts_with(b"ping"),
//!     handler_fn(|ctx| Box::pin(async move {
//!         ctx.send(Packet::from("pong\n")).await?;
//!         Ok(())
//!     })),
//! );
//! server.start("0.0.0.0:11223").await?;
//! ```

pub mod context;
pub mod daemon;
pub mod error;
pub mod handler;
pub mod id;
pub mod listener;
pub mod message;
pub mod server;
pub mod splitter;

pub use context::Context;
pub use daemon::{ConnectionSettings, Daemon, DaemonState, OnConnected, OnDisconnected};
pub use error::{Error, HandlerError, HandlerResult, Result, SplitError};
pub use handler::{compose, handler_fn, Handler, HandlerRef, Middleware, Predicate, Router, RouterPair};
pub use id::{ConnectionId, IdGenerator};
pub use listener::{Accepted, Listener, ListenerExit};
pub use message::{BoxMessage, Envelope, Message, Packet};
pub use server::Server;
pub use splitter::{SplitResult, Splitter};

//! Error types shared by the listener, the server and the per-connection tasks.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error produced by a handler. Logged by the processor, never fatal.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by handlers.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Outcome of a splitter that could not produce a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    /// The buffer does not yet hold a complete message. Read more and retry.
    #[error("not enough data")]
    NotEnoughData,
    /// The buffer can never form a valid message. Fatal to the connection.
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Errors raised by the framework.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("write not completed within {0:?}")]
    WriteTimeout(Duration),

    #[error("no data received within {0:?}")]
    ReadTimeout(Duration),

    #[error("splitter failed: {0}")]
    Split(SplitError),

    /// The splitter reported a consumed length that does not fit the buffer.
    #[error("splitter consumed {consumed} bytes from a buffer of {available}")]
    InvalidConsumption { consumed: usize, available: usize },

    /// Peer closed the stream while a partial message was still buffered.
    #[error("connection closed with {0} unframed bytes buffered")]
    TruncatedFrame(usize),

    #[error("external message source closed")]
    SourceClosed,

    #[error("outbound queue closed")]
    OutboundClosed,

    /// The listener stopped accepting because of a socket error.
    #[error("accept failed: {0}")]
    Accept(#[source] Arc<io::Error>),

    #[error("listener has not been started")]
    NotStarted,

    #[error("connection task panicked")]
    TaskPanicked,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

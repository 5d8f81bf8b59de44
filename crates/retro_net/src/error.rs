//! Error types for the TCP server engine.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors surfaced by the server engine.
///
/// Only `Bind` and `Invariant` indicate conditions the owner must act on;
/// everything local to a single connection stays inside that connection's
/// handling and never reaches the accept loop.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The listening endpoint could not be bound. Fatal to this server
    /// instance; the owner decides whether to retry or abort.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The server is already running; `start` may only be called from the
    /// stopped state.
    #[error("server is already running")]
    AlreadyRunning,

    /// The server has been disposed and can no longer be used.
    #[error("server has been disposed")]
    Disposed,

    /// The connection has already been closed or released.
    #[error("connection closed")]
    ConnectionClosed,

    /// A resource-manager invariant was violated, e.g. the read/write
    /// context pool ran dry despite admission control. Programmer-visible
    /// defect, not a runtime condition to recover from.
    #[error("resource invariant violated: {0}")]
    Invariant(&'static str),

    /// A protocol handler reported a failure while taking over an accepted
    /// connection.
    #[error("handler error: {0}")]
    Handler(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

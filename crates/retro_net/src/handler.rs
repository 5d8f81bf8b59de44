//! The contract between the server engine and protocol-specific logic.

use crate::error::EngineError;
use crate::stream::ClientStream;
use async_trait::async_trait;
use tokio::net::TcpStream;

/// Implemented by each protocol server (presence, master list, ...) layered
/// on the engine. The engine owns acceptance, admission, and pooling; the
/// handler owns everything protocol-specific about an admitted connection.
#[async_trait]
pub trait ProtocolHandler: Send + Sync + 'static {
    /// Invoked once per admitted connection; the handler takes ownership of
    /// the stream and is responsible for eventually releasing it through the
    /// owning server.
    ///
    /// Errors returned here are reported via [`on_exception`] and the
    /// stream's resources are reclaimed by the engine; the server keeps
    /// running.
    ///
    /// [`on_exception`]: ProtocolHandler::on_exception
    async fn process_accept(&self, stream: ClientStream) -> Result<(), EngineError>;

    /// Invoked when accept handling raises an error.
    async fn on_exception(&self, error: EngineError);

    /// Invoked when a connection is rejected for capacity under
    /// `DuringPrepare` and a full-server message is configured. The engine
    /// has already written the configured message; the raw, not-yet-wrapped
    /// socket is handed over for any protocol-specific farewell before it
    /// is closed. Silent rejections (empty message) skip this callback.
    async fn on_accept_fails(&self, _socket: &mut TcpStream) {}
}

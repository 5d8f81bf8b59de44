//! Presence service handler: long-lived client sessions.
//!
//! Emulates the connection-manager side of the legacy suite. Sessions stay
//! open for the life of a client's login; the handler tracks them in a
//! concurrent map and releases each stream when its peer hangs up.

use async_trait::async_trait;
use dashmap::DashMap;
use retro_net::{ClientStream, EngineError, ProtocolHandler, TcpServer};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};
use std::time::SystemTime;
use tracing::{error, info, trace};

/// Metadata tracked per connected client.
#[derive(Debug)]
pub struct ClientInfo {
    pub remote_addr: SocketAddr,
    pub connected_at: SystemTime,
}

struct Inner {
    /// Back-reference to the owning server, set by the factory after both
    /// exist. Weak so the handler never keeps a disposed server alive.
    server: OnceLock<Weak<TcpServer>>,
    /// Active sessions keyed by connection id.
    clients: DashMap<u64, ClientInfo>,
}

/// Handler for the presence/login service.
#[derive(Clone)]
pub struct PresenceHandler {
    inner: Arc<Inner>,
}

impl PresenceHandler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                server: OnceLock::new(),
                clients: DashMap::new(),
            }),
        }
    }

    /// Wires the handler to the server that owns its streams. Must be
    /// called before the server starts accepting.
    pub fn bind_server(&self, server: &Arc<TcpServer>) {
        let _ = self.inner.server.set(Arc::downgrade(server));
    }

    /// Number of currently connected clients.
    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }
}

impl Default for PresenceHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolHandler for PresenceHandler {
    async fn process_accept(&self, stream: ClientStream) -> Result<(), EngineError> {
        let inner = self.inner.clone();
        inner.clients.insert(
            stream.id(),
            ClientInfo {
                remote_addr: stream.peer_addr(),
                connected_at: SystemTime::now(),
            },
        );
        info!(conn = stream.id(), peer = %stream.peer_addr(), "presence client connected");

        tokio::spawn(run_session(inner, stream));
        Ok(())
    }

    async fn on_exception(&self, error: EngineError) {
        error!(%error, "presence accept handling failed");
    }

    async fn on_accept_fails(&self, _socket: &mut tokio::net::TcpStream) {
        // The engine already wrote the configured full-server notice; the
        // legacy protocol adds nothing on top of it.
    }
}

/// Drains the session until the peer disconnects, then releases the stream
/// through the owning server.
async fn run_session(inner: Arc<Inner>, mut stream: ClientStream) {
    let conn = stream.id();
    loop {
        match stream.recv().await {
            Ok(data) if data.is_empty() => break,
            Ok(data) => {
                // Login exchanges live behind this boundary; for emulation
                // purposes the session just consumes traffic.
                trace!(conn, len = data.len(), "presence data");
            }
            Err(_) => break,
        }
    }

    inner.clients.remove(&stream.id());
    info!(conn = stream.id(), peer = %stream.peer_addr(), "presence client disconnected");

    if let Some(server) = inner.server.get().and_then(Weak::upgrade) {
        server.release(&mut stream).await;
    }
    // Without a live server the stream's drop reclaims its resources.
}

#[cfg(test)]
mod tests {
    use super::*;
    use retro_net::EngineConfig;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::time::sleep;

    #[tokio::test(flavor = "multi_thread")]
    async fn sessions_are_tracked_and_untracked() {
        let handler = PresenceHandler::new();
        let server = Arc::new(TcpServer::new(
            EngineConfig::default(),
            Arc::new(handler.clone()),
        ));
        handler.bind_server(&server);

        let addr = server
            .start("127.0.0.1:0".parse().unwrap(), 4)
            .expect("server should start");

        let mut client = TcpStream::connect(addr).await.expect("client connects");
        client.write_all(b"\\login\\request\\").await.unwrap();
        sleep(Duration::from_millis(200)).await;
        assert_eq!(handler.client_count(), 1);

        client.shutdown().await.unwrap();
        drop(client);
        sleep(Duration::from_millis(300)).await;
        assert_eq!(handler.client_count(), 0);
        assert_eq!(server.stats().active_connections, 0);

        server.dispose();
    }
}

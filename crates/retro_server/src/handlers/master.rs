//! Master service handler: short-lived server-list queries.
//!
//! Emulates the server-browser side of the legacy suite. A client connects,
//! sends one query, and is disconnected; connections are expected to turn
//! over quickly, so the handler closes the session itself once the query
//! (or a quiet period) has passed.

use async_trait::async_trait;
use retro_net::{ClientStream, EngineError, ProtocolHandler, TcpServer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{debug, error, info};

/// How long a client gets to deliver its query before the session is
/// dropped.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

struct Inner {
    server: OnceLock<Weak<TcpServer>>,
    /// Total queries served since startup.
    served: AtomicU64,
}

/// Handler for the master/server-list service.
#[derive(Clone)]
pub struct MasterHandler {
    inner: Arc<Inner>,
}

impl MasterHandler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                server: OnceLock::new(),
                served: AtomicU64::new(0),
            }),
        }
    }

    /// Wires the handler to the server that owns its streams. Must be
    /// called before the server starts accepting.
    pub fn bind_server(&self, server: &Arc<TcpServer>) {
        let _ = self.inner.server.set(Arc::downgrade(server));
    }

    /// Total queries served since startup.
    pub fn served(&self) -> u64 {
        self.inner.served.load(Ordering::Relaxed)
    }
}

impl Default for MasterHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolHandler for MasterHandler {
    async fn process_accept(&self, stream: ClientStream) -> Result<(), EngineError> {
        debug!(conn = stream.id(), peer = %stream.peer_addr(), "list query connection");
        let inner = self.inner.clone();
        tokio::spawn(run_query(inner, stream));
        Ok(())
    }

    async fn on_exception(&self, error: EngineError) {
        error!(%error, "master accept handling failed");
    }
}

/// Reads one query, then tears the session down. List responses live
/// behind the excluded protocol boundary.
async fn run_query(inner: Arc<Inner>, mut stream: ClientStream) {
    let conn = stream.id();
    match tokio::time::timeout(REQUEST_TIMEOUT, stream.recv()).await {
        Ok(Ok(data)) if !data.is_empty() => {
            let total = inner.served.fetch_add(1, Ordering::Relaxed) + 1;
            info!(conn, bytes = data.len(), total, "list query served");
        }
        Ok(_) => {
            debug!(conn = stream.id(), "client left before sending a query");
        }
        Err(_) => {
            debug!(conn = stream.id(), "query timed out");
        }
    }

    stream.close().await;
    if let Some(server) = inner.server.get().and_then(Weak::upgrade) {
        server.release(&mut stream).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retro_net::EngineConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::{sleep, timeout};

    #[tokio::test(flavor = "multi_thread")]
    async fn queries_are_counted_and_sessions_closed() {
        let handler = MasterHandler::new();
        let server = Arc::new(TcpServer::new(
            EngineConfig::default(),
            Arc::new(handler.clone()),
        ));
        handler.bind_server(&server);

        let addr = server
            .start("127.0.0.1:0".parse().unwrap(), 4)
            .expect("server should start");

        let mut client = TcpStream::connect(addr).await.expect("client connects");
        client.write_all(b"list request").await.unwrap();

        // The server closes short-lived sessions itself.
        let mut buf = [0u8; 16];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("session should be closed by the server")
            .expect("socket read");
        assert_eq!(n, 0);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.served(), 1);
        assert_eq!(server.stats().active_connections, 0);

        server.dispose();
    }
}

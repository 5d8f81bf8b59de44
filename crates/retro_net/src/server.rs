//! Server lifecycle, the accept loop, and the stream release routine.

use crate::admission::{AdmissionController, EnforceMode};
use crate::buffer::BufferPool;
use crate::context::{ContextPool, OpContext, OpKind};
use crate::error::EngineError;
use crate::handler::ProtocolHandler;
use crate::stream::{ClientStream, StreamShared};
use socket2::{Domain, Protocol, Socket, Type};
use std::any::Any;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Tuning options recognized at construction. The bind endpoint and
/// connection ceiling are supplied to [`TcpServer::start`] instead, since
/// they size the pools.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bytes assigned to each read/write operation segment.
    pub buffer_size: usize,
    /// Initial size of the concurrent accept-context pool. Accepting is
    /// fast, so a small pool suffices; it grows under bursts.
    pub accept_pool_size: usize,
    /// When admission is enforced relative to the OS-level accept.
    pub enforce_mode: EnforceMode,
    /// How long `DuringPrepare` waits for a slot before rejecting.
    pub wait_timeout: Duration,
    /// Message written to a rejected client under `DuringPrepare`. Empty
    /// means silent rejection.
    pub full_message: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            accept_pool_size: 4,
            enforce_mode: EnforceMode::BeforeAccept,
            wait_timeout: Duration::from_millis(500),
            full_message: String::new(),
        }
    }
}

/// Lifecycle state of a server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Running,
    Disposed,
}

/// Observation points used by operators and tests; every count is a
/// point-in-time snapshot of the shared pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStats {
    pub active_connections: usize,
    pub accept_contexts_free: usize,
    pub rw_contexts_free: usize,
    pub admission_slots_free: usize,
}

/// Everything sized by `start`; torn down as a unit by `dispose`.
struct Resources {
    buffer_pool: Arc<BufferPool>,
    accept_pool: Arc<ContextPool>,
    rw_pool: Arc<ContextPool>,
    admission: Arc<AdmissionController>,
    stream_shared: Arc<StreamShared>,
    local_addr: SocketAddr,
}

/// State shared between the server handle and its accept loop task.
struct Shared {
    config: EngineConfig,
    handler: Arc<dyn ProtocolHandler>,
    running: AtomicBool,
    ignore_new: AtomicBool,
    next_conn_id: AtomicU64,
    active: Arc<std::sync::atomic::AtomicUsize>,
}

/// An asynchronous, connection-pooled TCP server.
///
/// Owns one buffer pool, two operation-context pools, and one admission
/// controller for its lifetime; multiple instances (one per protocol/port)
/// are fully independent. Lifecycle is `Stopped -> Running -> Stopped ->
/// Disposed`, with no return from `Disposed`.
pub struct TcpServer {
    shared: Arc<Shared>,
    disposed: AtomicBool,
    resources: Mutex<Option<Arc<Resources>>>,
    stop_tx: Mutex<Option<broadcast::Sender<()>>>,
    /// Externally-owned handle (e.g. a database connection) dropped at
    /// disposal, mirroring the rest of the owned resources.
    persistence: Mutex<Option<Box<dyn Any + Send>>>,
}

impl TcpServer {
    pub fn new(config: EngineConfig, handler: Arc<dyn ProtocolHandler>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                handler,
                running: AtomicBool::new(false),
                ignore_new: AtomicBool::new(false),
                next_conn_id: AtomicU64::new(0),
                active: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            }),
            disposed: AtomicBool::new(false),
            resources: Mutex::new(None),
            stop_tx: Mutex::new(None),
            persistence: Mutex::new(None),
        }
    }

    /// Like [`new`], with an externally-owned persistence handle that will
    /// be dropped when the server is disposed.
    ///
    /// [`new`]: TcpServer::new
    pub fn with_persistence(
        config: EngineConfig,
        handler: Arc<dyn ProtocolHandler>,
        persistence: Box<dyn Any + Send>,
    ) -> Self {
        let server = Self::new(config, handler);
        *server.persistence.lock().unwrap() = Some(persistence);
        server
    }

    /// Binds and listens on `addr`, sizes all pools to `max_connections`,
    /// and starts the accept loop. Returns the bound address (useful when
    /// binding port 0).
    ///
    /// Bind failures are fatal to this instance and propagated; the owner
    /// decides whether to retry or abort.
    pub fn start(&self, addr: SocketAddr, max_connections: usize) -> Result<SocketAddr, EngineError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::Disposed);
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }

        let listener = match bind_listener(addr) {
            Ok(l) => l,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let local_addr = listener.local_addr().map_err(EngineError::Io)?;

        // One segment per read context and one per write context.
        let buffer_pool = Arc::new(BufferPool::new(
            max_connections * 2,
            self.shared.config.buffer_size,
        ));

        let accept_pool = Arc::new(ContextPool::new(self.shared.config.accept_pool_size));
        for _ in 0..self.shared.config.accept_pool_size {
            // No buffer segment for accept operations.
            accept_pool.push(OpContext::new(OpKind::Accept));
        }

        let rw_pool = Arc::new(ContextPool::new(max_connections * 2));
        for i in 0..max_connections * 2 {
            let kind = if i % 2 == 0 { OpKind::Read } else { OpKind::Write };
            let mut ctx = OpContext::new(kind);
            buffer_pool.assign(&mut ctx)?;
            rw_pool.push(ctx);
        }

        let admission = Arc::new(AdmissionController::new(max_connections));
        let stream_shared = Arc::new(StreamShared {
            rw_pool: rw_pool.clone(),
            buffer_pool: buffer_pool.clone(),
            admission: admission.clone(),
            active: self.shared.active.clone(),
        });

        let resources = Arc::new(Resources {
            buffer_pool,
            accept_pool,
            rw_pool,
            admission,
            stream_shared,
            local_addr,
        });
        *self.resources.lock().unwrap() = Some(resources.clone());

        let (stop_tx, stop_rx) = broadcast::channel(1);
        *self.stop_tx.lock().unwrap() = Some(stop_tx);

        info!(
            addr = %local_addr,
            max_connections,
            mode = ?self.shared.config.enforce_mode,
            "server listening"
        );

        tokio::spawn(accept_loop(
            self.shared.clone(),
            resources,
            listener,
            stop_rx,
        ));
        Ok(local_addr)
    }

    /// Shuts the listening socket down, preventing further OS-level
    /// accepts. Idempotent; in-flight connections are unaffected and must
    /// be released individually by their owners.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("server stopping");
        if let Some(tx) = self.stop_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    /// Stops the server, drains both context pools, tears down the buffer
    /// pool and admission gate, and drops the persistence handle.
    /// Idempotent. Pools are drained before the buffer pool goes away,
    /// since contexts still reference its segments.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop();

        let resources = self.resources.lock().unwrap().clone();
        if let Some(res) = resources {
            drop(res.accept_pool.drain());
            for mut ctx in res.rw_pool.drain() {
                res.buffer_pool.release(&mut ctx);
            }
            res.buffer_pool.dispose();
            res.admission.close();
        }
        self.persistence.lock().unwrap().take();
        info!("server disposed");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ServerState {
        if self.disposed.load(Ordering::SeqCst) {
            ServerState::Disposed
        } else if self.is_running() {
            ServerState::Running
        } else {
            ServerState::Stopped
        }
    }

    /// When set, completions for newly accepted sockets are discarded
    /// without ever building a stream. Takes effect on the next completion,
    /// not preemptively.
    pub fn ignore_new_connections(&self, ignore: bool) {
        self.shared.ignore_new.store(ignore, Ordering::SeqCst);
    }

    /// The bound address while resources exist.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.resources.lock().unwrap().as_ref().map(|r| r.local_addr)
    }

    /// Point-in-time pool and admission counters. Zeroes before `start`.
    pub fn stats(&self) -> ServerStats {
        let guard = self.resources.lock().unwrap();
        match guard.as_ref() {
            Some(res) => ServerStats {
                active_connections: self.shared.active.load(Ordering::SeqCst),
                accept_contexts_free: res.accept_pool.available(),
                rw_contexts_free: res.rw_pool.available(),
                admission_slots_free: res.admission.available(),
            },
            None => ServerStats {
                active_connections: 0,
                accept_contexts_free: 0,
                rw_contexts_free: 0,
                admission_slots_free: 0,
            },
        }
    }

    /// Releases a stream's contexts back to the pool and frees its
    /// admission slot. If the socket is still live it is closed first;
    /// resources are never released under a live socket. Safe to call on an
    /// already-released stream (no-op).
    pub async fn release(&self, stream: &mut ClientStream) {
        if stream.is_released() {
            return;
        }
        if !stream.socket_closed() {
            stream.close().await;
        }
        stream.release_to_pools();
    }
}

/// Builds the listening socket the way the original services did: keepalive
/// on, reuse-address for fast restarts, backlog of 25.
fn bind_listener(addr: SocketAddr) -> Result<TcpListener, EngineError> {
    let map_bind = |source: std::io::Error| EngineError::Bind { addr, source };

    let socket =
        Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(map_bind)?;
    socket.set_reuse_address(true).ok();
    socket.set_keepalive(true).ok();
    socket.bind(&addr.into()).map_err(map_bind)?;
    socket.listen(25).map_err(map_bind)?;

    let std_listener: StdTcpListener = socket.into();
    std_listener.set_nonblocking(true).map_err(map_bind)?;
    TcpListener::from_std(std_listener).map_err(map_bind)
}

/// The self-perpetuating accept loop. Every completion, successful or not,
/// immediately leads to the next accept being issued, until the server is
/// stopped.
async fn accept_loop(
    shared: Arc<Shared>,
    res: Arc<Resources>,
    listener: TcpListener,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let before_accept = shared.config.enforce_mode == EnforceMode::BeforeAccept;
    debug!(addr = %res.local_addr, "accept loop started");

    loop {
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        let ctx = res.accept_pool.pop_or_new(OpKind::Accept);

        // BeforeAccept: hold the next accept until a slot frees up, so the
        // OS never hands back a connection that cannot be served.
        if before_accept {
            tokio::select! {
                granted = res.admission.acquire() => {
                    if granted.is_err() {
                        res.accept_pool.push(ctx);
                        break;
                    }
                }
                _ = stop_rx.recv() => {
                    res.accept_pool.push(ctx);
                    break;
                }
            }
        }

        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = stop_rx.recv() => {
                if before_accept {
                    res.admission.release();
                }
                res.accept_pool.push(ctx);
                break;
            }
        };

        match accepted {
            Ok((socket, peer)) => {
                // Hand the completion off so the loop can re-arm at once;
                // the spawned task owns the accept context until it is done.
                let shared = shared.clone();
                let res = res.clone();
                tokio::spawn(prepare_accept(shared, res, ctx, socket, peer));
            }
            Err(e) => {
                // Transient accept error: discard and keep going.
                debug!(error = %e, "accept completion failed; recycling context");
                if before_accept {
                    res.admission.release();
                }
                res.accept_pool.push(ctx);
            }
        }
    }

    // Dropping the listener here closes the listening socket.
    debug!(addr = %res.local_addr, "accept loop stopped");
}

/// Converts one completed accept into a connection stream and hands it to
/// the protocol handler, enforcing admission per the configured policy.
async fn prepare_accept(
    shared: Arc<Shared>,
    res: Arc<Resources>,
    ctx: OpContext,
    mut socket: TcpStream,
    peer: SocketAddr,
) {
    let before_accept = shared.config.enforce_mode == EnforceMode::BeforeAccept;

    if shared.ignore_new.load(Ordering::SeqCst) || !shared.running.load(Ordering::SeqCst) {
        debug!(%peer, "discarding accepted socket: new connections ignored");
        drop(socket);
        if before_accept {
            // The slot acquired ahead of this accept belongs to no stream.
            res.admission.release();
        }
        res.accept_pool.push(ctx);
        return;
    }

    if shared.config.enforce_mode == EnforceMode::DuringPrepare {
        match res.admission.acquire_timeout(shared.config.wait_timeout).await {
            Ok(true) => {}
            Ok(false) => {
                if !shared.running.load(Ordering::SeqCst) {
                    res.accept_pool.push(ctx);
                    return;
                }
                warn!(%peer, "server full; rejecting client");
                if !shared.config.full_message.is_empty() {
                    if let Err(e) = socket.write_all(shared.config.full_message.as_bytes()).await {
                        debug!(%peer, error = %e, "failed to deliver full-server notice");
                    }
                    shared.handler.on_accept_fails(&mut socket).await;
                }
                let _ = socket.shutdown().await;
                drop(socket);
                res.accept_pool.push(ctx);
                return;
            }
            // Gate closed by disposal while we waited.
            Err(_) => {
                res.accept_pool.push(ctx);
                return;
            }
        }
    }

    // Slot granted. The accept context goes back first so another accept
    // can complete while we wire this connection up.
    res.accept_pool.push(ctx);

    let (read_ctx, write_ctx) = match (res.rw_pool.pop(), res.rw_pool.pop()) {
        (Some(r), Some(w)) => (r, w),
        (r, w) => {
            if let Some(c) = r {
                res.rw_pool.push(c);
            }
            if let Some(c) = w {
                res.rw_pool.push(c);
            }
            res.admission.release();
            error!("read/write context pool exhausted despite admission control");
            shared
                .handler
                .on_exception(EngineError::Invariant(
                    "read/write context pool exhausted despite admission control",
                ))
                .await;
            return;
        }
    };

    let id = shared.next_conn_id.fetch_add(1, Ordering::SeqCst) + 1;
    let (read_half, write_half) = socket.into_split();
    let mut read_ctx = read_ctx;
    let mut write_ctx = write_ctx;
    read_ctx.bind_read(read_half);
    write_ctx.bind_write(write_half);

    let stream = ClientStream::new(id, peer, read_ctx, write_ctx, res.stream_shared.clone());
    debug!(conn = id, %peer, "connection admitted");

    if let Err(e) = shared.handler.process_accept(stream).await {
        // The stream moved into the handler; wherever it was dropped, its
        // contexts and slot have already been reclaimed.
        error!(conn = id, %peer, error = %e, "accept handler failed; stream force-released");
        shared.handler.on_exception(e).await;
    }
}

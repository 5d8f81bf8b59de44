//! Per-connection stream handle and the release-back-to-pool protocol.

use crate::admission::AdmissionController;
use crate::buffer::BufferPool;
use crate::context::{ContextPool, OpContext};
use crate::error::EngineError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{trace, warn};

/// Lifecycle of a connection stream. Linear; `Released` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Active,
    Closed,
    Released,
}

/// The pooled resources a stream returns to when it is released. Shared by
/// every stream of one server instance; servers share nothing with each
/// other.
pub(crate) struct StreamShared {
    pub(crate) rw_pool: Arc<ContextPool>,
    pub(crate) buffer_pool: Arc<BufferPool>,
    pub(crate) admission: Arc<AdmissionController>,
    pub(crate) active: Arc<AtomicUsize>,
}

/// One accepted, live connection: the socket halves bound into a borrowed
/// read context and a borrowed write context, each with its own buffer
/// segment.
///
/// The stream holds exactly those two contexts for its whole active
/// lifetime. All reads and writes go through the borrowed segments, so a
/// connection performs no per-operation allocation. Releasing returns both
/// contexts to the pool and frees the admission slot; releasing twice is a
/// no-op.
pub struct ClientStream {
    id: u64,
    peer: SocketAddr,
    state: StreamState,
    read_ctx: Option<OpContext>,
    write_ctx: Option<OpContext>,
    shared: Arc<StreamShared>,
}

impl ClientStream {
    pub(crate) fn new(
        id: u64,
        peer: SocketAddr,
        read_ctx: OpContext,
        write_ctx: OpContext,
        shared: Arc<StreamShared>,
    ) -> Self {
        shared.active.fetch_add(1, Ordering::SeqCst);
        Self {
            id,
            peer,
            state: StreamState::Active,
            read_ctx: Some(read_ctx),
            write_ctx: Some(write_ctx),
            shared,
        }
    }

    /// Unique identifier of this connection on its server.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote address of the client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_released(&self) -> bool {
        self.state == StreamState::Released
    }

    /// Whether the socket has been closed (by either side or by error).
    pub fn socket_closed(&self) -> bool {
        self.state != StreamState::Active
    }

    /// Receives up to one buffer segment of data.
    ///
    /// Returns the bytes read; an empty slice means the peer closed the
    /// connection, after which the stream is `Closed` and further I/O fails
    /// with [`EngineError::ConnectionClosed`].
    pub async fn recv(&mut self) -> Result<&[u8], EngineError> {
        if self.state != StreamState::Active {
            return Err(EngineError::ConnectionClosed);
        }
        let ctx = self
            .read_ctx
            .as_mut()
            .ok_or(EngineError::Invariant("read context detached"))?;
        let (half, segment) = ctx
            .read_parts()
            .ok_or(EngineError::Invariant("read context has no socket or segment"))?;
        let n = match half.read(&mut segment[..]).await {
            Ok(n) => n,
            Err(e) => {
                self.state = StreamState::Closed;
                return Err(e.into());
            }
        };
        if n == 0 {
            self.state = StreamState::Closed;
        }
        Ok(&segment[..n])
    }

    /// Sends `data`, staging it through the write segment one chunk at a
    /// time so no transient buffer is allocated.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), EngineError> {
        if self.state != StreamState::Active {
            return Err(EngineError::ConnectionClosed);
        }
        let ctx = self
            .write_ctx
            .as_mut()
            .ok_or(EngineError::Invariant("write context detached"))?;
        let (half, segment) = ctx
            .write_parts()
            .ok_or(EngineError::Invariant("write context has no socket or segment"))?;
        for chunk in data.chunks(segment.len()) {
            segment[..chunk.len()].copy_from_slice(chunk);
            if let Err(e) = half.write_all(&segment[..chunk.len()]).await {
                self.state = StreamState::Closed;
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Shuts the connection down and marks the stream `Closed`. Idempotent.
    /// Resources stay borrowed until the release protocol runs.
    pub async fn close(&mut self) {
        if self.state != StreamState::Active {
            return;
        }
        if let Some(ctx) = self.write_ctx.as_mut() {
            if let Some(half) = ctx.write_half_mut() {
                let _ = half.shutdown().await;
            }
        }
        self.state = StreamState::Closed;
        trace!(conn = self.id, peer = %self.peer, "stream closed");
    }

    /// The release protocol: detach both contexts from the (now closed)
    /// socket, return them to the read/write pool, then free the admission
    /// slot. Step ordering matters - the slot is freed last so a newly
    /// admitted connection can never observe an exhausted context pool.
    ///
    /// Idempotent: a second call finds the stream already `Released` and
    /// does nothing.
    pub(crate) fn release_to_pools(&mut self) {
        if self.state == StreamState::Released {
            return;
        }
        for slot in [&mut self.read_ctx, &mut self.write_ctx] {
            if let Some(mut ctx) = slot.take() {
                // Dropping the socket half closes this direction before the
                // context can be observed back in the pool.
                ctx.reset();
                if !ctx.has_segment() {
                    // The segment was torn down out from under us (server
                    // disposal racing a late release); provision a fresh one
                    // so the pool entry stays usable.
                    if let Err(e) = self.shared.buffer_pool.assign(&mut ctx) {
                        warn!(conn = self.id, error = %e, "could not re-provision segment during release");
                    }
                }
                self.shared.rw_pool.push(ctx);
            }
        }
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
        self.shared.admission.release();
        self.state = StreamState::Released;
        trace!(conn = self.id, peer = %self.peer, "stream released");
    }
}

impl Drop for ClientStream {
    /// Leak backstop: a stream dropped without going through the release
    /// routine still returns its contexts and frees its slot. The explicit
    /// routine remains the primary protocol; this only covers handler
    /// failure paths that lose the stream.
    fn drop(&mut self) {
        if self.state != StreamState::Released {
            trace!(conn = self.id, "stream dropped while unreleased; releasing");
            self.release_to_pools();
        }
    }
}

impl std::fmt::Debug for ClientStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientStream")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .finish()
    }
}

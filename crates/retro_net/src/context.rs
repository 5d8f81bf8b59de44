//! Reusable operation contexts and their pools.
//!
//! An [`OpContext`] is the token for one pending or in-flight asynchronous
//! operation: accepting a connection, or reading/writing on an established
//! one. Contexts are allocated once at server start and cycled through a
//! [`ContextPool`] so steady-state operation touches the allocator only for
//! the connections themselves, never for I/O plumbing.

use bytes::BytesMut;
use std::sync::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// The kind of operation a context is currently serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Accept,
    Read,
    Write,
}

/// One directional half of an accepted socket, bound to a context for the
/// lifetime of its connection.
#[derive(Debug)]
pub(crate) enum SocketHalf {
    Read(OwnedReadHalf),
    Write(OwnedWriteHalf),
}

/// A reusable token for one asynchronous accept/read/write operation.
///
/// Accept contexts never carry a buffer segment; read/write contexts keep
/// theirs for the whole time they live in the pool and while lent to a
/// stream. The socket half is only present while a connection is live.
#[derive(Debug)]
pub struct OpContext {
    kind: OpKind,
    half: Option<SocketHalf>,
    segment: Option<BytesMut>,
}

impl OpContext {
    pub fn new(kind: OpKind) -> Self {
        Self {
            kind,
            half: None,
            segment: None,
        }
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn has_segment(&self) -> bool {
        self.segment.is_some()
    }

    pub fn segment_len(&self) -> Option<usize> {
        self.segment.as_ref().map(|s| s.len())
    }

    pub(crate) fn set_segment(&mut self, segment: BytesMut) {
        self.segment = Some(segment);
    }

    pub(crate) fn take_segment(&mut self) -> Option<BytesMut> {
        self.segment.take()
    }

    pub(crate) fn bind_read(&mut self, half: OwnedReadHalf) {
        self.kind = OpKind::Read;
        self.half = Some(SocketHalf::Read(half));
    }

    pub(crate) fn bind_write(&mut self, half: OwnedWriteHalf) {
        self.kind = OpKind::Write;
        self.half = Some(SocketHalf::Write(half));
    }

    pub(crate) fn write_half_mut(&mut self) -> Option<&mut OwnedWriteHalf> {
        match self.half.as_mut() {
            Some(SocketHalf::Write(half)) => Some(half),
            _ => None,
        }
    }

    /// Splits the context into its read half and segment, when both are
    /// present. Borrowing both at once keeps read operations zero-copy.
    pub(crate) fn read_parts(&mut self) -> Option<(&mut OwnedReadHalf, &mut BytesMut)> {
        match (&mut self.half, &mut self.segment) {
            (Some(SocketHalf::Read(half)), Some(segment)) => Some((half, segment)),
            _ => None,
        }
    }

    pub(crate) fn write_parts(&mut self) -> Option<(&mut OwnedWriteHalf, &mut BytesMut)> {
        match (&mut self.half, &mut self.segment) {
            (Some(SocketHalf::Write(half)), Some(segment)) => Some((half, segment)),
            _ => None,
        }
    }

    /// Clears per-operation state before the context goes back to its pool.
    /// The buffer segment stays attached; dropping the socket half closes
    /// that direction of the connection.
    pub(crate) fn reset(&mut self) {
        self.half = None;
    }
}

/// A concurrency-safe stack of reusable operation contexts.
///
/// Two independent instances exist per server: a small accept pool that may
/// grow past its initial size (accept contexts are cheap, they carry no
/// buffer), and a read/write pool whose capacity exactly matches
/// `2 x max_connections`. The read/write pool must never need to construct
/// new contexts: its capacity equals the admission ceiling's worst case, so
/// exhaustion there means admission accounting is broken.
pub struct ContextPool {
    free: Mutex<Vec<OpContext>>,
    capacity: usize,
}

impl ContextPool {
    /// Creates an empty pool; the server populates it during startup.
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Pops a ready context, or `None` when the pool is empty.
    pub fn pop(&self) -> Option<OpContext> {
        self.free.lock().unwrap().pop()
    }

    /// Pops a ready context, constructing a fresh one when the pool is
    /// empty. Only the accept pool uses this: a burst of connections is
    /// allowed to grow it rather than stall the accept loop.
    pub fn pop_or_new(&self, kind: OpKind) -> OpContext {
        self.free
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| OpContext::new(kind))
    }

    /// Returns a context for reuse after resetting its per-operation state.
    pub fn push(&self, mut ctx: OpContext) {
        ctx.reset();
        self.free.lock().unwrap().push(ctx);
    }

    /// Removes and returns every pooled context. Used by disposal to tear
    /// contexts down before the buffer pool goes away.
    pub fn drain(&self) -> Vec<OpContext> {
        std::mem::take(&mut *self.free.lock().unwrap())
    }

    /// Number of contexts currently available.
    pub fn available(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    /// The capacity the pool was sized for at startup.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_pool_grows_on_exhaustion() {
        let pool = ContextPool::new(2);
        pool.push(OpContext::new(OpKind::Accept));
        assert_eq!(pool.available(), 1);

        let first = pool.pop_or_new(OpKind::Accept);
        let second = pool.pop_or_new(OpKind::Accept);
        assert_eq!(pool.available(), 0);
        assert_eq!(first.kind(), OpKind::Accept);
        assert_eq!(second.kind(), OpKind::Accept);

        pool.push(first);
        pool.push(second);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn pop_on_empty_pool_returns_none() {
        let pool = ContextPool::new(4);
        assert!(pool.pop().is_none());
    }

    #[test]
    fn push_preserves_the_buffer_segment() {
        let pool = ContextPool::new(1);
        let mut ctx = OpContext::new(OpKind::Read);
        ctx.set_segment(bytes::BytesMut::zeroed(32));

        pool.push(ctx);
        let ctx = pool.pop().unwrap();
        assert!(ctx.has_segment());
        assert_eq!(ctx.segment_len(), Some(32));
    }

    #[test]
    fn drain_empties_the_pool() {
        let pool = ContextPool::new(3);
        for _ in 0..3 {
            pool.push(OpContext::new(OpKind::Accept));
        }
        let drained = pool.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(pool.available(), 0);
    }
}

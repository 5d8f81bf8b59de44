//! Pre-allocated buffer pool for per-operation I/O segments.
//!
//! Socket buffers are the main source of allocation churn under sustained
//! load, so the pool carves one contiguous block into fixed-size segments at
//! startup and only ever lends them out. Nothing is allocated or freed after
//! construction; segments move between the free list and the read/write
//! operation contexts that borrow them.

use crate::context::OpContext;
use crate::error::EngineError;
use bytes::BytesMut;
use std::sync::Mutex;

/// A fixed-size pool of buffer segments carved from one contiguous block.
///
/// Sized once at server start to `2 x max_connections` segments: one for the
/// read context and one for the write context of every possible connection.
/// `assign` and `release` are safe under concurrent access from multiple
/// workers; the free list is never exposed.
pub struct BufferPool {
    /// Segments not currently attached to a context.
    free: Mutex<Vec<BytesMut>>,
    segment_size: usize,
    segment_count: usize,
}

impl BufferPool {
    /// Allocates the backing block and slices it into `segment_count`
    /// segments of `segment_size` bytes each.
    pub fn new(segment_count: usize, segment_size: usize) -> Self {
        let mut block = BytesMut::zeroed(segment_count * segment_size);
        let mut free = Vec::with_capacity(segment_count);
        for _ in 0..segment_count {
            free.push(block.split_to(segment_size));
        }
        Self {
            free: Mutex::new(free),
            segment_size,
            segment_count,
        }
    }

    /// Attaches a free segment to the given read/write context.
    ///
    /// Fails only when the free list is empty, which cannot happen while the
    /// context pool and admission ceiling stay in step; such a failure is a
    /// startup-order or accounting bug, not a runtime condition.
    pub fn assign(&self, ctx: &mut OpContext) -> Result<(), EngineError> {
        let segment = self
            .free
            .lock()
            .unwrap()
            .pop()
            .ok_or(EngineError::Invariant("buffer pool exhausted"))?;
        ctx.set_segment(segment);
        Ok(())
    }

    /// Detaches the context's segment and returns it to the free list.
    ///
    /// Double-release is guarded by the caller: the stream release protocol
    /// guarantees each context passes through here at most once per borrow,
    /// and a context without a segment is left untouched.
    pub fn release(&self, ctx: &mut OpContext) {
        if let Some(segment) = ctx.take_segment() {
            self.free.lock().unwrap().push(segment);
        }
    }

    /// Drops every pooled segment. Called during server disposal, after both
    /// context pools have been drained back into this pool.
    pub fn dispose(&self) {
        self.free.lock().unwrap().clear();
    }

    /// Number of segments currently on the free list.
    pub fn available(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    /// Size in bytes of every segment.
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Total number of segments carved at construction.
    pub fn segment_count(&self) -> usize {
        self.segment_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{OpContext, OpKind};

    #[test]
    fn pool_is_fully_populated_at_construction() {
        let pool = BufferPool::new(8, 256);
        assert_eq!(pool.available(), 8);
        assert_eq!(pool.segment_size(), 256);
        assert_eq!(pool.segment_count(), 8);
    }

    #[test]
    fn assign_and_release_round_trip() {
        let pool = BufferPool::new(2, 64);
        let mut ctx = OpContext::new(OpKind::Read);

        pool.assign(&mut ctx).unwrap();
        assert!(ctx.has_segment());
        assert_eq!(pool.available(), 1);

        pool.release(&mut ctx);
        assert!(!ctx.has_segment());
        assert_eq!(pool.available(), 2);

        // A context without a segment is a no-op on release.
        pool.release(&mut ctx);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn exhaustion_is_an_invariant_violation() {
        let pool = BufferPool::new(1, 64);
        let mut first = OpContext::new(OpKind::Read);
        let mut second = OpContext::new(OpKind::Write);

        pool.assign(&mut first).unwrap();
        let err = pool.assign(&mut second).unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    #[test]
    fn segments_have_the_configured_length() {
        let pool = BufferPool::new(4, 128);
        let mut ctx = OpContext::new(OpKind::Write);
        pool.assign(&mut ctx).unwrap();
        assert_eq!(ctx.segment_len(), Some(128));
    }
}

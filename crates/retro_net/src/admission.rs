//! Counting admission gate bounding concurrently active connections.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// When the admission gate is consulted relative to the OS-level accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforceMode {
    /// Wait for a free slot before issuing the next accept. The OS is never
    /// handed a connection that cannot be served; a burst queues in the
    /// kernel backlog instead of being told the server is full.
    #[default]
    BeforeAccept,
    /// Accept unconditionally (up to the kernel backlog), then wait for a
    /// slot with a bounded timeout. On timeout the connection is rejected
    /// and, if configured, told the server is full before the close.
    DuringPrepare,
}

/// A counting gate initialized to the connection ceiling.
///
/// One slot is acquired per admitted connection and released exactly once
/// when that connection's stream is released back to the pools - never
/// earlier, so a freed slot always implies the buffers behind it are
/// actually available again.
pub struct AdmissionController {
    slots: Arc<Semaphore>,
    max: usize,
}

impl AdmissionController {
    pub fn new(max_connections: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_connections)),
            max: max_connections,
        }
    }

    /// Suspends until a slot is free. Errors only when the gate has been
    /// closed by disposal.
    pub async fn acquire(&self) -> Result<(), EngineError> {
        match self.slots.acquire().await {
            Ok(permit) => {
                permit.forget();
                Ok(())
            }
            Err(_) => Err(EngineError::Disposed),
        }
    }

    /// Suspends until a slot is free or the timeout elapses. Returns
    /// `Ok(false)` on timeout, `Err` when the gate was closed by disposal.
    pub async fn acquire_timeout(&self, wait: Duration) -> Result<bool, EngineError> {
        match tokio::time::timeout(wait, self.slots.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                Ok(true)
            }
            Ok(Err(_)) => Err(EngineError::Disposed),
            Err(_) => Ok(false),
        }
    }

    /// Frees exactly one slot. Called by the stream release protocol after
    /// the connection's contexts are back in their pool.
    pub fn release(&self) {
        self.slots.add_permits(1);
    }

    /// Closes the gate; pending and future acquires fail. Part of disposal.
    pub fn close(&self) {
        self.slots.close();
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// The configured ceiling.
    pub fn max(&self) -> usize {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_release_track_the_slot_count() {
        let gate = AdmissionController::new(2);
        assert_eq!(gate.available(), 2);

        gate.acquire().await.unwrap();
        gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);

        gate.release();
        assert_eq!(gate.available(), 1);
        gate.release();
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test]
    async fn acquire_timeout_reports_exhaustion() {
        let gate = AdmissionController::new(1);
        gate.acquire().await.unwrap();

        let granted = gate
            .acquire_timeout(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(!granted);

        gate.release();
        let granted = gate
            .acquire_timeout(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(granted);
    }

    #[tokio::test]
    async fn closed_gate_rejects_acquires() {
        let gate = AdmissionController::new(1);
        gate.close();
        assert!(matches!(gate.acquire().await, Err(EngineError::Disposed)));
    }

    #[test]
    fn enforce_mode_parses_from_snake_case() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            mode: EnforceMode,
        }
        let wrapper: Wrapper = toml::from_str("mode = \"during_prepare\"").unwrap();
        assert_eq!(wrapper.mode, EnforceMode::DuringPrepare);
    }
}

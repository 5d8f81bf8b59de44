//! # retro_net - Pooled Async TCP Server Engine
//!
//! The reusable networking foundation for the legacy game-service emulator.
//! It accepts inbound TCP connections at high volume while holding three
//! guarantees at once:
//!
//! * **Bounded admission** - an operator-configured ceiling on concurrently
//!   active connections is never exceeded, even under accept bursts, with a
//!   choice of two enforcement policies ([`EnforceMode`]).
//! * **Bounded memory** - buffers and operation contexts are pre-allocated
//!   at startup and recycled through pools; steady-state operation performs
//!   no per-operation allocation.
//! * **Partial-failure tolerance** - a socket erroring mid-accept, a
//!   handler failing, or a shutdown racing in-flight accepts never leaks a
//!   pooled resource or an admission slot.
//!
//! Protocol-specific logic plugs in through the [`ProtocolHandler`]
//! contract: the engine hands each admitted connection over as a
//! [`ClientStream`], and the owner returns it through [`TcpServer::release`]
//! when the session ends.
//!
//! ## Architecture
//!
//! * [`BufferPool`] - one contiguous block sliced into fixed segments,
//!   borrowed by read/write contexts
//! * [`ContextPool`] - reusable accept and read/write operation contexts
//! * [`AdmissionController`] - counting gate over the connection ceiling
//! * [`TcpServer`] - lifecycle, accept loop, and the release routine
//! * [`ClientStream`] - per-connection handle with borrowed I/O resources
//!
//! Each server instance owns its pools and gate outright; instances (one
//! per emulated service/port) share nothing.

pub use admission::{AdmissionController, EnforceMode};
pub use buffer::BufferPool;
pub use context::{ContextPool, OpContext, OpKind};
pub use error::EngineError;
pub use handler::ProtocolHandler;
pub use server::{EngineConfig, ServerState, ServerStats, TcpServer};
pub use stream::{ClientStream, StreamState};

pub mod admission;
pub mod buffer;
pub mod context;
pub mod error;
pub mod handler;
pub mod server;
pub mod stream;

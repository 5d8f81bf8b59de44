//! Protocol handlers for the emulated services.
//!
//! Each handler implements the engine's [`retro_net::ProtocolHandler`]
//! contract. Wire formats are out of scope here; the handlers own session
//! lifecycle - tracking clients, draining their sockets, and releasing
//! streams back to the owning server when a session ends.

pub mod master;
pub mod presence;

pub use master::MasterHandler;
pub use presence::PresenceHandler;

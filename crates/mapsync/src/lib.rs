//! `mapsync`: pushes live map payloads to WebSocket subscribers.
//!
//! ```text
//! SyncServer  (server.rs)    accept loop, HTTP routes, per-connection reader/writer tasks
//!   └── Registry (registry.rs) subscribers keyed by player, fan-out, liveness pings
//!         └── mapcore::build    payload for one player
//! ```
//!
//! The game loop calls [`SyncServer::notify`] (or [`Registry::notify`]) whenever a
//! player's explored rooms or position change.

pub mod config;
pub mod page;
pub mod registry;
pub mod server;

pub use config::SyncConfig;
pub use registry::{Outbound, Registry, SubscriberId};
pub use server::SyncServer;

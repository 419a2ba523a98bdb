//! Readiness-driven TCP forwarding engine for the tcp-relay project.
//!
//! One [`Engine`] serves one forwarding rule: it owns a listening socket
//! and relays every accepted connection to a single fixed target. All
//! sockets are non-blocking and multiplexed by one readiness poll, driven
//! from whatever thread calls [`Engine::run`].
//!
//! # Architecture
//!
//! ```text
//! Client  <--TCP-->  [Session]  <--TCP-->  Target
//!                     |      |
//!              upstream    downstream
//!                 Link        Link
//!                     \      /
//!                    Activity
//! ```
//!
//! Each session owns both sockets, one buffered [`Link`](link::Link) per
//! direction and a single activity counter shared by the two directions.
//! When a destination cannot keep up, reads on the matching source are
//! suspended until the backlog drains. Sessions that move no bytes for a
//! whole idle interval are closed by a periodic sweep.

pub mod activity;
pub mod config;
pub mod engine;
pub mod error;
pub mod link;
pub mod observer;
pub mod registry;
pub mod session;
pub mod stats;

// Re-export the primary public types at the crate root for convenience.
pub use config::{resolve_target, EngineConfig, DEFAULT_BUFFER_SIZE, DEFAULT_IDLE_TIMEOUT};
pub use engine::{Engine, StopHandle};
pub use error::EngineError;
pub use observer::{NullObserver, SessionEvent, SessionObserver};
pub use session::{CloseReason, Direction, SessionId, Side, Traffic};
pub use stats::{EngineStats, StatsSnapshot};

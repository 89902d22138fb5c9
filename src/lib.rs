//! # Voidstream Server
//!
//! Authoritative real-time world server. Clients connect over WebSocket,
//! join named worlds, stream movement and ability input, and receive a
//! snapshot of their world on every tick.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    VOIDSTREAM SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  └── vec2.rs     - 2D vector                                 │
//! │                                                              │
//! │  game/           - World simulation (no I/O)                 │
//! │  ├── state.rs    - Players, projectiles, worlds              │
//! │  ├── registry.rs - World lookup and lazy creation            │
//! │  ├── ability.rs  - Cooldown-gated abilities                  │
//! │  └── tick.rs     - Per-tick integration                      │
//! │                                                              │
//! │  network/        - Transport and sessions                    │
//! │  ├── server.rs   - WebSocket server, config, tick timer      │
//! │  ├── protocol.rs - JSON envelope messages                    │
//! │  └── session.rs  - Join / input / disconnect handling        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering
//!
//! Worlds and players are kept in `BTreeMap`s, so ticks step worlds in name
//! order and snapshots list players in id order. All handlers and ticks run
//! under one lock and never interleave.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::vec2::Vec2;
pub use crate::game::state::{Ability, ConnectionId, Player, World};
pub use crate::game::tick::SimConfig;
pub use crate::network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default simulation tick rate (Hz)
pub const DEFAULT_TICK_RATE: u32 = 20;

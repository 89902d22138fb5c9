//! Game Logic Module
//!
//! World simulation. Nothing here touches sockets, clocks or locks; callers
//! pass in the current time and serialize access.
//!
//! ## Module Structure
//!
//! - `state`: Players, projectiles, worlds, playfield
//! - `registry`: World lookup and lazy creation
//! - `ability`: Cooldown-gated abilities
//! - `tick`: Per-tick integration and simulation config

pub mod state;
pub mod registry;
pub mod ability;
pub mod tick;

// Re-export key types
pub use state::{Ability, ConnectionId, Player, Playfield, Projectile, World};
pub use registry::WorldRegistry;
pub use ability::{Activation, AbilityConfig, Rejection};
pub use tick::{SimConfig, TickResult};

//! World Registry
//!
//! Maps world names to worlds. Worlds are created lazily on first join and
//! live for the rest of the process. The registry does no locking of its
//! own; its owner serializes access.

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::game::state::{ConnectionId, Player, World};

/// All worlds known to this process.
#[derive(Debug, Default)]
pub struct WorldRegistry {
    worlds: BTreeMap<String, World>,
}

impl WorldRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the named world, creating an empty one if it does not exist.
    pub fn get_or_create(&mut self, name: &str, now: DateTime<Utc>) -> &mut World {
        self.worlds.entry(name.to_string()).or_insert_with(|| {
            info!(world = %name, "Creating world");
            World::new(name, now)
        })
    }

    /// Remove a player from a world. No-op if either is missing.
    pub fn remove(&mut self, world_name: &str, id: &ConnectionId) -> Option<Player> {
        self.worlds.get_mut(world_name)?.remove_player(id)
    }

    /// Get a world.
    pub fn get(&self, name: &str) -> Option<&World> {
        self.worlds.get(name)
    }

    /// Get a world mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut World> {
        self.worlds.get_mut(name)
    }

    /// Check a world exists.
    pub fn contains(&self, name: &str) -> bool {
        self.worlds.contains_key(name)
    }

    /// Iterate all worlds mutably, in name order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut World> {
        self.worlds.values_mut()
    }

    /// Iterate all worlds, in name order.
    pub fn iter(&self) -> impl Iterator<Item = &World> {
        self.worlds.values()
    }

    /// Number of worlds.
    pub fn len(&self) -> usize {
        self.worlds.len()
    }

    /// Check if there are no worlds.
    pub fn is_empty(&self) -> bool {
        self.worlds.is_empty()
    }

    /// Total players across all worlds.
    pub fn player_count(&self) -> usize {
        self.worlds.values().map(World::player_count).sum()
    }
}

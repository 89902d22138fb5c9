//! Simulation Tick
//!
//! Fixed-rate integration of every player in every world. This module holds
//! the per-tick work; the timer that drives it lives in the network layer.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::vec2::Vec2;
use crate::game::ability::AbilityConfig;
use crate::game::registry::WorldRegistry;
use crate::game::state::{Playfield, World};

/// Rectangle new players spawn in.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnArea {
    /// Minimum corner (inclusive)
    pub min: Vec2,
    /// Maximum corner (exclusive)
    pub max: Vec2,
}

impl Default for SpawnArea {
    fn default() -> Self {
        Self {
            min: Vec2::new(50.0, 50.0),
            max: Vec2::new(650.0, 350.0),
        }
    }
}

impl SpawnArea {
    /// Pick a uniformly random point in the area.
    ///
    /// An axis with an empty or non-finite range yields its minimum.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec2 {
        Vec2::new(
            sample_axis(rng, self.min.x, self.max.x),
            sample_axis(rng, self.min.y, self.max.y),
        )
    }
}

fn sample_axis<R: Rng + ?Sized>(rng: &mut R, min: f64, max: f64) -> f64 {
    if min < max && (max - min).is_finite() {
        rng.gen_range(min..max)
    } else {
        min
    }
}

/// Configuration for world simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Ticks per second
    pub tick_rate: u32,
    /// Playfield bounds
    pub playfield: Playfield,
    /// Velocity per unit of move input (units per second)
    pub move_speed: f64,
    /// Velocity multiplier applied once per tick
    pub damping: f64,
    /// Health new players start with
    pub max_hp: u32,
    /// Where new players appear
    pub spawn: SpawnArea,
    /// Ability tuning
    pub abilities: AbilityConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate: crate::DEFAULT_TICK_RATE,
            playfield: Playfield::default(),
            move_speed: 200.0,
            damping: 0.95,
            max_hp: 100,
            spawn: SpawnArea::default(),
            abilities: AbilityConfig::default(),
        }
    }
}

impl SimConfig {
    /// Seconds per tick.
    #[inline]
    pub fn dt(&self) -> f64 {
        1.0 / f64::from(self.tick_rate.max(1))
    }
}

/// Summary of one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickResult {
    /// Worlds stepped
    pub worlds: usize,
    /// Players integrated
    pub players: usize,
}

/// Integrate every player in one world.
///
/// Returns the number of players stepped.
pub fn step_world(world: &mut World, config: &SimConfig) -> usize {
    let dt = config.dt();
    for player in world.players.values_mut() {
        player.integrate(dt, config.damping, &config.playfield);
    }
    world.players.len()
}

/// Integrate every world in the registry.
///
/// `after_step` sees each world right after its players were integrated,
/// before the next world is touched.
pub fn tick(
    registry: &mut WorldRegistry,
    config: &SimConfig,
    mut after_step: impl FnMut(&World),
) -> TickResult {
    let mut result = TickResult::default();
    for world in registry.iter_mut() {
        result.players += step_world(world, config);
        result.worlds += 1;
        after_step(world);
    }
    result
}

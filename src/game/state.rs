//! World State Definitions
//!
//! Entity records for a world: players, projectiles and the world itself.
//! Players are keyed in a BTreeMap so snapshots list them in a stable order.

use std::collections::BTreeMap;
use std::fmt;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::vec2::Vec2;

// =============================================================================
// CONNECTION ID
// =============================================================================

/// Identifier the transport assigns to a connection.
///
/// Doubles as the player id on the wire. Serialized as a hyphenated UUID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Allocate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// ABILITY
// =============================================================================

/// Cooldown-gated actions a player can trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ability {
    /// Impulse along the facing direction.
    Dash,
    /// Jump to a target point or a fixed distance ahead.
    Teleport,
    /// Timed shield.
    Shield,
}

impl Ability {
    /// All abilities.
    pub const ALL: [Ability; 3] = [Ability::Dash, Ability::Teleport, Ability::Shield];

    /// Parse a wire name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Ability> {
        match name {
            "dash" => Some(Ability::Dash),
            "teleport" => Some(Ability::Teleport),
            "shield" => Some(Ability::Shield),
            _ => None,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Ability::Dash => "dash",
            Ability::Teleport => "teleport",
            Ability::Shield => "shield",
        }
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Skill levels. Sent to clients, not yet used by gameplay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skills {
    /// Dash level
    pub dash: u32,
    /// Teleport level
    pub teleport: u32,
    /// Shield level
    pub shield: u32,
}

// =============================================================================
// PLAYFIELD
// =============================================================================

/// Rectangular playfield `[0, width] x [0, height]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Playfield {
    /// Width in world units
    pub width: f64,
    /// Height in world units
    pub height: f64,
}

impl Default for Playfield {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
        }
    }
}

impl Playfield {
    /// Clamp a point into the playfield.
    #[inline]
    pub fn clamp(&self, p: Vec2) -> Vec2 {
        Vec2::new(p.x.max(0.0).min(self.width), p.y.max(0.0).min(self.height))
    }

    /// Check a point lies inside (inclusive).
    #[inline]
    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= 0.0 && p.x <= self.width && p.y >= 0.0 && p.y <= self.height
    }
}

// =============================================================================
// PLAYER
// =============================================================================

/// State of a single player in a world.
#[derive(Clone, Debug, PartialEq)]
pub struct Player {
    /// Owning connection (also the player id)
    pub id: ConnectionId,

    /// Display name
    pub username: String,

    /// Current position
    pub position: Vec2,

    /// Current velocity (units per second)
    pub velocity: Vec2,

    /// Current health. Nothing decrements it yet.
    pub hp: u32,

    /// Maximum health
    pub max_hp: u32,

    /// Facing angle in radians, from the last aim point
    pub facing: f64,

    /// Last activation per ability (ms since epoch)
    pub last_ability_ts: BTreeMap<Ability, i64>,

    /// Shield expiry (ms since epoch). Stored only; no damage path reads it.
    pub shield_until: Option<i64>,

    /// Skill levels
    pub skills: Skills,

    /// Display colour `#rrggbb`
    pub color: String,
}

impl Player {
    /// Create a new player at rest.
    pub fn new(
        id: ConnectionId,
        username: impl Into<String>,
        position: Vec2,
        max_hp: u32,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id,
            username: username.into(),
            position,
            velocity: Vec2::ZERO,
            hp: max_hp,
            max_hp,
            facing: 0.0,
            last_ability_ts: BTreeMap::new(),
            shield_until: None,
            skills: Skills::default(),
            color: color.into(),
        }
    }

    /// Advance one tick.
    ///
    /// Damping is applied once per call regardless of `dt`, then the
    /// position moves by `velocity * dt` and is clamped into the playfield.
    pub fn integrate(&mut self, dt: f64, damping: f64, playfield: &Playfield) {
        self.velocity = self.velocity.scale(damping);
        self.position = playfield.clamp(self.position.add(self.velocity.scale(dt)));
    }

    /// Direction the player is facing.
    #[inline]
    pub fn facing_dir(&self) -> Vec2 {
        Vec2::from_angle(self.facing)
    }

    /// Pick a random display colour `#rrggbb`.
    pub fn random_color<R: Rng + ?Sized>(rng: &mut R) -> String {
        format!("#{:06x}", rng.gen_range(0..=0xFF_FFFFu32))
    }

    /// Check whether the shield is up at `now_ms`.
    pub fn shield_active(&self, now_ms: i64) -> bool {
        self.shield_until.is_some_and(|until| now_ms < until)
    }
}

// =============================================================================
// PROJECTILE
// =============================================================================

/// A projectile. Part of the world shape; gameplay does not spawn any yet.
#[derive(Clone, Debug, PartialEq)]
pub struct Projectile {
    /// Projectile id, unique within its world
    pub id: u32,
    /// Player that fired it
    pub owner: ConnectionId,
    /// Current position
    pub position: Vec2,
    /// Current velocity
    pub velocity: Vec2,
}

// =============================================================================
// WORLD
// =============================================================================

/// An isolated simulation instance.
#[derive(Clone, Debug)]
pub struct World {
    /// Unique name
    pub name: String,
    /// Players by connection
    pub players: BTreeMap<ConnectionId, Player>,
    /// Projectiles in flight
    pub projectiles: Vec<Projectile>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl World {
    /// Create an empty world.
    pub fn new(name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            players: BTreeMap::new(),
            projectiles: Vec::new(),
            created_at,
        }
    }

    /// Insert a player, replacing any previous entry for the same connection.
    pub fn insert_player(&mut self, player: Player) {
        self.players.insert(player.id, player);
    }

    /// Remove a player.
    pub fn remove_player(&mut self, id: &ConnectionId) -> Option<Player> {
        self.players.remove(id)
    }

    /// Get a player.
    pub fn player(&self, id: &ConnectionId) -> Option<&Player> {
        self.players.get(id)
    }

    /// Get a player mutably.
    pub fn player_mut(&mut self, id: &ConnectionId) -> Option<&mut Player> {
        self.players.get_mut(id)
    }

    /// Number of players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Connections in this world's room.
    pub fn members(&self) -> impl Iterator<Item = &ConnectionId> {
        self.players.keys()
    }
}

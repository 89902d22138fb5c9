//! Session Management
//!
//! Tracks which connection is in which world and turns join, input and
//! disconnect events into world mutations and outbound messages.
//!
//! `SessionManager` is plain synchronous state. The server keeps it behind
//! one lock so each handler and each tick runs to completion before anything
//! else can observe the worlds.

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::game::ability::{self, Activation, Rejection};
use crate::game::registry::WorldRegistry;
use crate::game::state::{Ability, ConnectionId, Player, World};
use crate::game::tick::{SimConfig, TickResult};
use crate::network::protocol::{JoinWorld, PlayerInfo, PlayerInput, ServerMessage, WorldSnapshot};

/// Outbound half of the transport.
///
/// Rooms are derived from world membership here, so the transport only has
/// to reach single connections.
pub trait Outbound {
    /// Queue a message for one connection. Must not block.
    fn deliver(&self, to: &ConnectionId, message: ServerMessage);
}

/// World a connection has joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    /// Display name chosen at join
    pub username: String,
    /// World name
    pub world: String,
}

/// What a join did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinReceipt {
    /// World joined
    pub world: String,
    /// The world did not exist before this join
    pub created_world: bool,
    /// World left to make this join, if any
    pub left: Option<String>,
}

/// What an input did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    /// No membership or no player; nothing changed.
    Ignored,
    /// Movement and aim applied.
    Applied {
        /// Ability attempt, when a known ability was named
        ability: Option<Activation>,
    },
}

/// Join/input/disconnect handling over all worlds.
pub struct SessionManager {
    config: SimConfig,
    registry: WorldRegistry,
    members: BTreeMap<ConnectionId, Membership>,
    rng: StdRng,
    tick: u64,
}

impl SessionManager {
    /// Create a session manager with no worlds.
    pub fn new(config: SimConfig, rng: StdRng) -> Self {
        Self {
            config,
            registry: WorldRegistry::new(),
            members: BTreeMap::new(),
            rng,
            tick: 0,
        }
    }

    /// Handle `joinWorld`.
    ///
    /// A connection already in a world leaves it first. The joiner gets
    /// `joined`; everyone else in the room gets `playerJoined`.
    pub fn join(
        &mut self,
        conn: ConnectionId,
        request: &JoinWorld,
        now: DateTime<Utc>,
        out: &dyn Outbound,
    ) -> JoinReceipt {
        let username = request.username().to_string();
        let world_name = request.world().to_string();

        let left = self.leave(&conn, out);

        let position = self.config.spawn.sample(&mut self.rng);
        let color = Player::random_color(&mut self.rng);
        let player = Player::new(conn, username.clone(), position, self.config.max_hp, color);
        let info = PlayerInfo::from(&player);

        let created_world = !self.registry.contains(&world_name);
        let world = self.registry.get_or_create(&world_name, now);
        world.insert_player(player);

        out.deliver(&conn, ServerMessage::Joined {
            player: info.clone(),
            world_snapshot: WorldSnapshot::of(world),
        });
        broadcast_room(world, &ServerMessage::PlayerJoined { player: info }, Some(&conn), out);

        info!(%conn, world = %world_name, %username, players = world.player_count(), "Player joined");

        self.members.insert(conn, Membership {
            username,
            world: world_name.clone(),
        });

        JoinReceipt {
            world: world_name,
            created_world,
            left,
        }
    }

    /// Handle `input`.
    ///
    /// Velocity is overwritten from the move axes, facing follows the aim
    /// point, and a named ability goes through the cooldown check.
    pub fn input(&mut self, conn: &ConnectionId, input: &PlayerInput, now: DateTime<Utc>) -> InputOutcome {
        let Some(membership) = self.members.get(conn) else {
            return InputOutcome::Ignored;
        };
        let Some(player) = self
            .registry
            .get_mut(&membership.world)
            .and_then(|world| world.player_mut(conn))
        else {
            return InputOutcome::Ignored;
        };

        player.velocity = input.move_dir().scale(self.config.move_speed);

        if let Some(aim) = input.aim {
            player.facing = player.position.angle_to(aim);
        }

        let mut activation = None;
        if let Some(name) = input.act.as_deref() {
            match Ability::from_name(name) {
                Some(kind) => {
                    let result = ability::activate(
                        player,
                        kind,
                        input.act_target,
                        now.timestamp_millis(),
                        &self.config.abilities,
                    );
                    if let Activation::Rejected(Rejection::OnCooldown { remaining_ms }) = result {
                        debug!(%conn, ability = %kind, remaining_ms, "Ability on cooldown");
                    }
                    activation = Some(result);
                }
                None => debug!(%conn, ability = %name, "Ignoring unknown ability"),
            }
        }

        InputOutcome::Applied { ability: activation }
    }

    /// Handle a closed connection.
    ///
    /// Returns the world the player was removed from. Calling it again for
    /// the same connection does nothing.
    pub fn disconnect(&mut self, conn: &ConnectionId, out: &dyn Outbound) -> Option<String> {
        let world = self.leave(conn, out);
        if let Some(world) = &world {
            info!(%conn, %world, "Player left");
        }
        world
    }

    /// Step every world once and broadcast each world's snapshot to its room.
    pub fn tick(&mut self, out: &dyn Outbound) -> TickResult {
        self.tick += 1;
        crate::game::tick::tick(&mut self.registry, &self.config, |world| {
            if world.players.is_empty() {
                return;
            }
            let snapshot = ServerMessage::WorldSnapshot(WorldSnapshot::of(world));
            broadcast_room(world, &snapshot, None, out);
        })
    }

    /// Drop membership and player, telling the remaining room.
    fn leave(&mut self, conn: &ConnectionId, out: &dyn Outbound) -> Option<String> {
        let membership = self.members.remove(conn)?;
        self.registry.remove(&membership.world, conn)?;
        if let Some(world) = self.registry.get(&membership.world) {
            broadcast_room(world, &ServerMessage::PlayerLeft { id: *conn }, None, out);
        }
        Some(membership.world)
    }

    /// Simulation config.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// All worlds.
    pub fn registry(&self) -> &WorldRegistry {
        &self.registry
    }

    /// Get a world by name.
    pub fn world(&self, name: &str) -> Option<&World> {
        self.registry.get(name)
    }

    /// Membership of a connection.
    pub fn membership(&self, conn: &ConnectionId) -> Option<&Membership> {
        self.members.get(conn)
    }

    /// Player owned by a connection.
    pub fn player(&self, conn: &ConnectionId) -> Option<&Player> {
        let membership = self.members.get(conn)?;
        self.registry.get(&membership.world)?.player(conn)
    }

    /// Connections currently in a world.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Number of worlds.
    pub fn world_count(&self) -> usize {
        self.registry.len()
    }

    /// Ticks run so far.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }
}

/// Send `message` to every connection in `world`, optionally skipping one.
fn broadcast_room(world: &World, message: &ServerMessage, except: Option<&ConnectionId>, out: &dyn Outbound) {
    for member in world.members() {
        if Some(member) != except {
            out.deliver(member, message.clone());
        }
    }
}

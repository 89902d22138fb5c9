//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON envelope `{"event": <name>, "data": <payload>}`.
//!
//! Inbound payloads are read leniently: missing or wrongly-typed fields fall
//! back to defaults instead of rejecting the message. Only a frame that is
//! not an envelope at all, or names an unknown event, is refused.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::vec2::Vec2;
use crate::game::state::{Ability, ConnectionId, Player, Skills, World};

/// World joined when the client names none.
pub const DEFAULT_WORLD: &str = "lobby";

/// Display name used when the client sends none.
pub const DEFAULT_USERNAME: &str = "Anon";

/// Inbound frame errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame is not a JSON envelope.
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Envelope names an event the server does not handle.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
///
/// Disconnect is not a message; the transport reports it when the socket
/// closes.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Join (or switch to) a named world.
    JoinWorld(JoinWorld),

    /// Movement, aim and ability input.
    Input(PlayerInput),
}

/// Join request. Absent or empty fields mean "use the default".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinWorld {
    /// Requested display name
    pub username: Option<String>,
    /// Requested world name
    pub world: Option<String>,
}

impl JoinWorld {
    /// Display name to use.
    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(DEFAULT_USERNAME)
    }

    /// World name to use.
    pub fn world(&self) -> &str {
        self.world.as_deref().unwrap_or(DEFAULT_WORLD)
    }

    fn from_value(data: &Value) -> Self {
        Self {
            username: text(data, "username"),
            world: text(data, "world"),
        }
    }
}

/// Player input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerInput {
    /// Horizontal move axis
    pub move_x: f64,
    /// Vertical move axis
    pub move_y: f64,
    /// Aim point (only when both coordinates were sent)
    pub aim: Option<Vec2>,
    /// Ability name
    pub act: Option<String>,
    /// Ability target point
    pub act_target: Option<Vec2>,
}

impl PlayerInput {
    /// Movement-only input.
    pub fn with_movement(move_x: f64, move_y: f64) -> Self {
        Self {
            move_x,
            move_y,
            ..Default::default()
        }
    }

    /// Move axes as a vector.
    pub fn move_dir(&self) -> Vec2 {
        Vec2::new(self.move_x, self.move_y)
    }

    fn from_value(data: &Value) -> Self {
        let aim = match (number(data, "aimX"), number(data, "aimY")) {
            (Some(x), Some(y)) => Some(Vec2::new(x, y)),
            _ => None,
        };
        Self {
            move_x: number(data, "moveX").unwrap_or(0.0),
            move_y: number(data, "moveY").unwrap_or(0.0),
            aim,
            act: text(data, "act"),
            act_target: data.get("actTarget").and_then(point),
        }
    }
}

/// Raw envelope before the payload is interpreted.
#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ClientMessage {
    /// Parse a text frame.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(s)?;
        match envelope.event.as_str() {
            "joinWorld" => Ok(ClientMessage::JoinWorld(JoinWorld::from_value(&envelope.data))),
            "input" => Ok(ClientMessage::Input(PlayerInput::from_value(&envelope.data))),
            _ => Err(ProtocolError::UnknownEvent(envelope.event)),
        }
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> String {
        let value = match self {
            ClientMessage::JoinWorld(join) => json!({
                "event": "joinWorld",
                "data": { "username": join.username, "world": join.world },
            }),
            ClientMessage::Input(input) => {
                let mut data = json!({ "moveX": input.move_x, "moveY": input.move_y });
                if let Some(aim) = input.aim {
                    data["aimX"] = json!(aim.x);
                    data["aimY"] = json!(aim.y);
                }
                if let Some(act) = &input.act {
                    data["act"] = json!(act);
                }
                if let Some(target) = input.act_target {
                    data["actTarget"] = json!({ "x": target.x, "y": target.y });
                }
                json!({ "event": "input", "data": data })
            }
        };
        value.to_string()
    }
}

/// Finite number field, or `None`.
fn number(data: &Value, key: &str) -> Option<f64> {
    data.get(key)?.as_f64().filter(|v| v.is_finite())
}

/// Non-empty string field, or `None`.
fn text(data: &Value, key: &str) -> Option<String> {
    data.get(key)?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// `{x, y}` object with both coordinates present.
fn point(data: &Value) -> Option<Vec2> {
    Some(Vec2::new(number(data, "x")?, number(data, "y")?))
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Sent to a connection after it joins.
    Joined {
        /// The new player
        player: PlayerInfo,
        /// The world as it was right after the join
        #[serde(rename = "worldSnapshot")]
        world_snapshot: WorldSnapshot,
    },

    /// Another player entered the room.
    PlayerJoined {
        /// The new player
        player: PlayerInfo,
    },

    /// A player left the room.
    PlayerLeft {
        /// Connection id of the player
        id: ConnectionId,
    },

    /// Per-tick world state.
    WorldSnapshot(WorldSnapshot),
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Wire event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::PlayerJoined { .. } => "playerJoined",
            ServerMessage::PlayerLeft { .. } => "playerLeft",
            ServerMessage::WorldSnapshot(_) => "worldSnapshot",
        }
    }
}

/// Full player record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    /// Player (connection) id
    pub id: ConnectionId,
    /// Display name
    pub username: String,
    /// Position X
    pub x: f64,
    /// Position Y
    pub y: f64,
    /// Velocity X
    pub vx: f64,
    /// Velocity Y
    pub vy: f64,
    /// Current health
    pub hp: u32,
    /// Maximum health
    pub max_hp: u32,
    /// Facing angle (radians)
    pub facing: f64,
    /// Last activation per ability (ms since epoch)
    pub last_ability_ts: BTreeMap<Ability, i64>,
    /// Skill levels
    pub skills: Skills,
    /// Display colour
    pub color: String,
    /// Shield expiry, when one has been raised
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shield_until: Option<i64>,
}

impl From<&Player> for PlayerInfo {
    fn from(p: &Player) -> Self {
        Self {
            id: p.id,
            username: p.username.clone(),
            x: p.position.x,
            y: p.position.y,
            vx: p.velocity.x,
            vy: p.velocity.y,
            hp: p.hp,
            max_hp: p.max_hp,
            facing: p.facing,
            last_ability_ts: p.last_ability_ts.clone(),
            skills: p.skills,
            color: p.color.clone(),
            shield_until: p.shield_until,
        }
    }
}

/// Reduced player record used in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSummary {
    /// Player (connection) id
    pub id: ConnectionId,
    /// Display name
    pub username: String,
    /// Position X
    pub x: f64,
    /// Position Y
    pub y: f64,
    /// Current health
    pub hp: u32,
    /// Display colour
    pub color: String,
}

impl From<&Player> for PlayerSummary {
    fn from(p: &Player) -> Self {
        Self {
            id: p.id,
            username: p.username.clone(),
            x: p.position.x,
            y: p.position.y,
            hp: p.hp,
            color: p.color.clone(),
        }
    }
}

/// All players in a world, reduced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Players, ordered by id
    pub players: Vec<PlayerSummary>,
}

impl WorldSnapshot {
    /// Snapshot a world.
    pub fn of(world: &World) -> Self {
        Self {
            players: world.players.values().map(PlayerSummary::from).collect(),
        }
    }

    /// Check whether a player is listed.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.players.iter().any(|p| p.id == *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn test_player() -> Player {
        let mut player = Player::new(
            ConnectionId::from(Uuid::from_u128(42)),
            "alice",
            Vec2::new(120.0, 80.0),
            100,
            "#00ff00",
        );
        player.velocity = Vec2::new(3.0, -4.0);
        player
    }

    #[test]
    fn test_parse_join_world() {
        let msg = ClientMessage::from_json(r#"{"event":"joinWorld","data":{"username":"bob","world":"arena"}}"#).unwrap();
        let ClientMessage::JoinWorld(join) = msg else {
            panic!("expected join");
        };
        assert_eq!(join.username(), "bob");
        assert_eq!(join.world(), "arena");
    }

    #[test]
    fn test_join_world_defaults() {
        for frame in [
            r#"{"event":"joinWorld"}"#,
            r#"{"event":"joinWorld","data":null}"#,
            r#"{"event":"joinWorld","data":{}}"#,
            r#"{"event":"joinWorld","data":{"username":"","world":""}}"#,
            r#"{"event":"joinWorld","data":{"username":7,"world":["x"]}}"#,
        ] {
            let Ok(ClientMessage::JoinWorld(join)) = ClientMessage::from_json(frame) else {
                panic!("expected join for {frame}");
            };
            assert_eq!(join.username(), DEFAULT_USERNAME);
            assert_eq!(join.world(), DEFAULT_WORLD);
        }
    }

    #[test]
    fn test_parse_full_input() {
        let frame = r#"{"event":"input","data":{"moveX":1,"moveY":-0.5,"aimX":10,"aimY":20,"act":"teleport","actTarget":{"x":900,"y":300}}}"#;
        let ClientMessage::Input(input) = ClientMessage::from_json(frame).unwrap() else {
            panic!("expected input");
        };
        assert_eq!(input.move_dir(), Vec2::new(1.0, -0.5));
        assert_eq!(input.aim, Some(Vec2::new(10.0, 20.0)));
        assert_eq!(input.act.as_deref(), Some("teleport"));
        assert_eq!(input.act_target, Some(Vec2::new(900.0, 300.0)));
    }

    #[test]
    fn test_input_lenient_fields() {
        let frame = r#"{"event":"input","data":{"moveX":"fast","aimX":10,"act":"","actTarget":{"x":5}}}"#;
        let ClientMessage::Input(input) = ClientMessage::from_json(frame).unwrap() else {
            panic!("expected input");
        };
        assert_eq!(input, PlayerInput::default());
    }

    #[test]
    fn test_unknown_event_rejected() {
        let result = ClientMessage::from_json(r#"{"event":"fly","data":{}}"#);
        assert!(matches!(result, Err(ProtocolError::UnknownEvent(name)) if name == "fly"));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(ClientMessage::from_json("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(ClientMessage::from_json(r#"{"data":{}}"#), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_client_message_encoding_parses_back() {
        let input = PlayerInput {
            move_x: 1.0,
            move_y: 0.0,
            aim: Some(Vec2::new(5.0, 6.0)),
            act: Some("dash".to_string()),
            act_target: Some(Vec2::new(7.0, 8.0)),
        };
        let msg = ClientMessage::Input(input);
        assert_eq!(ClientMessage::from_json(&msg.to_json()).unwrap(), msg);

        let join = ClientMessage::JoinWorld(JoinWorld {
            username: Some("eve".to_string()),
            world: None,
        });
        assert_eq!(ClientMessage::from_json(&join.to_json()).unwrap(), join);
    }

    #[test]
    fn test_player_info_wire_shape() {
        let mut player = test_player();
        player.last_ability_ts.insert(Ability::Dash, 1234);

        let value = serde_json::to_value(PlayerInfo::from(&player)).unwrap();

        for key in ["id", "username", "x", "y", "vx", "vy", "hp", "maxHp", "facing", "lastAbilityTs", "skills", "color"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert!(value.get("shieldUntil").is_none());
        assert_eq!(value["id"], json!(Uuid::from_u128(42).to_string()));
        assert_eq!(value["lastAbilityTs"]["dash"], json!(1234));
        assert_eq!(value["skills"], json!({"dash": 0, "teleport": 0, "shield": 0}));
    }

    #[test]
    fn test_snapshot_is_reduced() {
        let mut world = World::new("arena", Utc::now());
        world.insert_player(test_player());

        let msg = ServerMessage::WorldSnapshot(WorldSnapshot::of(&world));
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["event"], "worldSnapshot");
        let entry = &value["data"]["players"][0];
        assert_eq!(entry["username"], "alice");
        assert_eq!(entry["x"], json!(120.0));
        assert!(entry.get("vx").is_none());
        assert!(entry.get("facing").is_none());
        assert!(entry.get("lastAbilityTs").is_none());
    }

    #[test]
    fn test_server_message_names() {
        let player = PlayerInfo::from(&test_player());
        let messages = vec![
            ServerMessage::Joined {
                player: player.clone(),
                world_snapshot: WorldSnapshot::default(),
            },
            ServerMessage::PlayerJoined { player },
            ServerMessage::PlayerLeft {
                id: ConnectionId::from(Uuid::from_u128(42)),
            },
            ServerMessage::WorldSnapshot(WorldSnapshot::default()),
        ];

        for msg in messages {
            let json = msg.to_json().unwrap();
            let value: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(value["event"], msg.event_name());
            assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);
        }
    }

    #[test]
    fn test_joined_uses_world_snapshot_key() {
        let msg = ServerMessage::Joined {
            player: PlayerInfo::from(&test_player()),
            world_snapshot: WorldSnapshot::default(),
        };
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert!(value["data"].get("worldSnapshot").is_some());
        assert!(value["data"].get("player").is_some());
    }
}

//! Network Layer
//!
//! WebSocket server, wire protocol and session handling.
//! Everything that touches sockets or the wall clock lives here; the
//! simulation itself runs through `game/`.

pub mod protocol;
pub mod session;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, JoinWorld, PlayerInput, PlayerInfo, WorldSnapshot, ProtocolError};
pub use session::{Outbound, SessionManager, Membership, JoinReceipt, InputOutcome};
pub use server::{GameServer, ServerConfig, ConfigError, GameServerError, ClientDirectory};

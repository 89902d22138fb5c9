//! WebSocket Game Server
//!
//! Async WebSocket server for world connections.
//! Owns the listener, per-connection queues and the tick timer; all game
//! decisions are delegated to the `SessionManager`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, instrument, trace};

use crate::game::state::ConnectionId;
use crate::game::tick::SimConfig;
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::session::{Outbound, SessionManager};

/// Port used when nothing else is configured.
pub const DEFAULT_PORT: u16 = 3000;

/// Env var naming a JSON config file.
pub const CONFIG_PATH_ENV: &str = "VOIDSTREAM_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Per-connection outbound queue capacity (messages).
    pub outbound_buffer: usize,
    /// Fixed spawn seed. Random when unset.
    pub spawn_seed: Option<u64>,
    /// Simulation tuning.
    pub sim: SimConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            outbound_buffer: 64,
            spawn_seed: None,
            sim: SimConfig::default(),
        }
    }
}

/// Configuration errors. All fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// File path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for `ServerConfig`.
    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    /// Env override could not be parsed.
    #[error("Invalid value for {name}: {value:?}")]
    BadEnv {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
    },

    /// Values parse but make no sense.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ServerConfig {
    /// Load from the process environment.
    ///
    /// Reads the JSON file named by `VOIDSTREAM_CONFIG` if set, then applies
    /// `PORT`, `VOIDSTREAM_BIND`, `VOIDSTREAM_TICK_RATE` and
    /// `VOIDSTREAM_SPAWN_SEED`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` in place of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(CONFIG_PATH_ENV) {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Read { path, source })?;
                serde_json::from_str(&text)?
            }
            None => Self::default(),
        };

        if let Some(port) = lookup("PORT") {
            config.bind_addr.set_port(parse_env("PORT", &port)?);
        }
        if let Some(bind) = lookup("VOIDSTREAM_BIND") {
            config.bind_addr = parse_env("VOIDSTREAM_BIND", &bind)?;
        }
        if let Some(rate) = lookup("VOIDSTREAM_TICK_RATE") {
            config.sim.tick_rate = parse_env("VOIDSTREAM_TICK_RATE", &rate)?;
        }
        if let Some(seed) = lookup("VOIDSTREAM_SPAWN_SEED") {
            config.spawn_seed = Some(parse_env("VOIDSTREAM_SPAWN_SEED", &seed)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON config. Missing fields take defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.sim;
        if sim.tick_rate == 0 || sim.tick_rate > 1000 {
            return Err(ConfigError::Invalid(format!(
                "tick_rate must be in 1..=1000, got {}",
                sim.tick_rate
            )));
        }
        let field = sim.playfield;
        if !(field.width.is_finite() && field.height.is_finite() && field.width > 0.0 && field.height > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "playfield must be positive, got {}x{}",
                field.width, field.height
            )));
        }
        if !(0.0..=1.0).contains(&sim.damping) {
            return Err(ConfigError::Invalid(format!("damping must be in [0, 1], got {}", sim.damping)));
        }
        if !sim.move_speed.is_finite() || sim.move_speed < 0.0 {
            return Err(ConfigError::Invalid(format!("move_speed must be >= 0, got {}", sim.move_speed)));
        }
        let abilities = &sim.abilities;
        for (name, value) in [
            ("dash_cooldown_ms", abilities.dash_cooldown_ms),
            ("teleport_cooldown_ms", abilities.teleport_cooldown_ms),
            ("shield_cooldown_ms", abilities.shield_cooldown_ms),
            ("shield_duration_ms", abilities.shield_duration_ms),
        ] {
            if value < 0 {
                return Err(ConfigError::Invalid(format!("{name} must be >= 0, got {value}")));
            }
        }
        for (name, value) in [
            ("dash_impulse", abilities.dash_impulse),
            ("teleport_distance", abilities.teleport_distance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!("{name} must be >= 0, got {value}")));
            }
        }
        let spawn = sim.spawn;
        let inside = spawn.min.is_finite()
            && spawn.max.is_finite()
            && field.contains(spawn.min)
            && field.contains(spawn.max);
        if !inside || spawn.min.x >= spawn.max.x || spawn.min.y >= spawn.max.y {
            return Err(ConfigError::Invalid(format!(
                "spawn area {:?}..{:?} must be non-empty and inside the playfield",
                spawn.min, spawn.max
            )));
        }
        if self.outbound_buffer == 0 {
            return Err(ConfigError::Invalid("outbound_buffer must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::BadEnv {
        name,
        value: value.to_string(),
    })
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Configuration rejected.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Outbound queues of all open connections.
#[derive(Debug, Default)]
pub struct ClientDirectory {
    clients: BTreeMap<ConnectionId, mpsc::Sender<ServerMessage>>,
}

impl ClientDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection's queue.
    pub fn register(&mut self, conn: ConnectionId, sender: mpsc::Sender<ServerMessage>) {
        self.clients.insert(conn, sender);
    }

    /// Remove a connection's queue.
    pub fn unregister(&mut self, conn: &ConnectionId) -> bool {
        self.clients.remove(conn).is_some()
    }

    /// Open connections.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Check if no connection is open.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Outbound for ClientDirectory {
    fn deliver(&self, to: &ConnectionId, message: ServerMessage) {
        let Some(sender) = self.clients.get(to) else {
            return;
        };
        match sender.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                debug!(conn = %to, event = message.event_name(), "Outbound queue full, dropping message");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn = %to, "Outbound queue closed");
            }
        }
    }
}

/// Resolve once shutdown has been requested or the server is gone.
async fn shutdown_signal(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// State shared by connection tasks and the tick task.
struct Shared {
    sessions: SessionManager,
    clients: ClientDirectory,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Sessions and client queues behind one lock.
    shared: Arc<Mutex<Shared>>,
    /// Shutdown signal.
    shutdown_tx: watch::Sender<bool>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let rng = match config.spawn_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let shared = Shared {
            sessions: SessionManager::new(config.sim.clone(), rng),
            clients: ClientDirectory::new(),
        };

        Self {
            config,
            shared: Arc::new(Mutex::new(shared)),
            shutdown_tx,
        }
    }

    /// Bind `bind_addr` and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        self.config.validate()?;
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!("Game server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let tick_handle = tokio::spawn(Self::run_tick_loop(
            self.shared.clone(),
            self.config.sim.tick_rate,
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_signal(&mut shutdown_rx) => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        tick_handle.abort();
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let shared = self.shared.clone();
        let buffer = self.config.outbound_buffer;
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) = Self::serve_client(stream, addr, shared, buffer, shutdown_rx).await {
                error!("Connection {} failed: {}", addr, e);
            }
        });
    }

    /// Drive one connection from handshake to cleanup.
    async fn serve_client(
        stream: TcpStream,
        addr: SocketAddr,
        shared: Arc<Mutex<Shared>>,
        buffer: usize,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), GameServerError> {
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(buffer);

        let conn = ConnectionId::new();
        shared.lock().await.clients.register(conn, msg_tx);
        info!(%conn, %addr, "Client connected");

        // Spawn message sender task
        let sender_task = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let result = loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_frame(&shared, conn, &text).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break Ok(()),
                        Some(Err(e)) => break Err(GameServerError::from(e)),
                        Some(Ok(_)) => {}
                    }
                }
                _ = shutdown_signal(&mut shutdown_rx) => break Ok(()),
            }
        };

        // Cleanup
        {
            let mut guard = shared.lock().await;
            let Shared { sessions, clients } = &mut *guard;
            clients.unregister(&conn);
            sessions.disconnect(&conn, &*clients);
        }
        sender_task.abort();

        info!(%conn, "Client disconnected");
        result
    }

    /// Decode one text frame and apply it.
    async fn handle_frame(shared: &Mutex<Shared>, conn: ConnectionId, text: &str) {
        let msg = match ClientMessage::from_json(text) {
            Ok(m) => m,
            Err(e) => {
                debug!(%conn, "Dropping frame: {}", e);
                return;
            }
        };

        let now = Utc::now();
        let mut guard = shared.lock().await;
        let Shared { sessions, clients } = &mut *guard;
        match msg {
            ClientMessage::JoinWorld(join) => {
                sessions.join(conn, &join, now, &*clients);
            }
            ClientMessage::Input(input) => {
                sessions.input(&conn, &input, now);
            }
        }
    }

    /// Step all worlds at the configured rate.
    async fn run_tick_loop(shared: Arc<Mutex<Shared>>, tick_rate: u32, mut shutdown_rx: watch::Receiver<bool>) {
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    let mut guard = shared.lock().await;
                    let Shared { sessions, clients } = &mut *guard;
                    let result = sessions.tick(&*clients);
                    trace!(tick = sessions.current_tick(), worlds = result.worlds, players = result.players, "Tick");
                }
                _ = shutdown_signal(&mut shutdown_rx) => break,
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get open connection count.
    pub async fn connection_count(&self) -> usize {
        self.shared.lock().await.clients.len()
    }

    /// Get world count.
    pub async fn world_count(&self) -> usize {
        self.shared.lock().await.sessions.world_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use crate::network::protocol::{JoinWorld, WorldSnapshot};

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name: &str| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.outbound_buffer, 64);
        assert_eq!(config.spawn_seed, None);
        assert_eq!(config.sim.tick_rate, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_without_vars_is_default() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORT", "4000"),
            ("VOIDSTREAM_TICK_RATE", "30"),
            ("VOIDSTREAM_SPAWN_SEED", "99"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:4000".parse().unwrap());
        assert_eq!(config.sim.tick_rate, 30);
        assert_eq!(config.spawn_seed, Some(99));

        let config = ServerConfig::from_lookup(lookup(&[("VOIDSTREAM_BIND", "127.0.0.1:5000")])).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:5000".parse().unwrap());
    }

    #[test]
    fn test_bad_env_value() {
        let err = ServerConfig::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::BadEnv { name: "PORT", .. }));

        let err = ServerConfig::from_lookup(lookup(&[("VOIDSTREAM_TICK_RATE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_config_file() {
        let path = std::env::temp_dir().join(format!("voidstream-{}.json", Uuid::new_v4()));
        std::fs::write(&path, r#"{"bind_addr": "127.0.0.1:7000", "sim": {"move_speed": 150.0}}"#).unwrap();
        let path_str = path.to_string_lossy().to_string();

        let config = ServerConfig::from_lookup(lookup(&[(CONFIG_PATH_ENV, path_str.as_str()), ("PORT", "7001")])).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:7001".parse().unwrap());
        assert_eq!(config.sim.move_speed, 150.0);
        assert_eq!(config.sim.damping, 0.95);
        assert_eq!(config.outbound_buffer, 64);
    }

    #[test]
    fn test_missing_config_file() {
        let err = ServerConfig::from_lookup(lookup(&[(CONFIG_PATH_ENV, "/nonexistent/voidstream.json")])).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_from_json_str_validates() {
        assert!(ServerConfig::from_json_str("{}").is_ok());
        assert!(matches!(ServerConfig::from_json_str("[1]"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            ServerConfig::from_json_str(r#"{"sim": {"playfield": {"width": 0}}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServerConfig::from_json_str(r#"{"sim": {"damping": 1.5}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServerConfig::from_json_str(r#"{"outbound_buffer": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_abilities_and_spawn() {
        for bad in [
            r#"{"sim": {"abilities": {"dash_cooldown_ms": -1}}}"#,
            r#"{"sim": {"abilities": {"shield_duration_ms": -1500}}}"#,
            r#"{"sim": {"abilities": {"teleport_distance": -5.0}}}"#,
            r#"{"sim": {"spawn": {"min": {"x": 50, "y": 50}, "max": {"x": 900, "y": 350}}}}"#,
            r#"{"sim": {"spawn": {"min": {"x": -10, "y": 50}, "max": {"x": 650, "y": 350}}}}"#,
            r#"{"sim": {"spawn": {"min": {"x": 300, "y": 50}, "max": {"x": 300, "y": 350}}}}"#,
        ] {
            assert!(
                matches!(ServerConfig::from_json_str(bad), Err(ConfigError::Invalid(_))),
                "accepted {bad}"
            );
        }

        let config = ServerConfig::from_json_str(
            r#"{"sim": {"spawn": {"min": {"x": 0, "y": 0}, "max": {"x": 800, "y": 600}}, "abilities": {"dash_cooldown_ms": 0}}}"#,
        )
        .unwrap();
        assert_eq!(config.sim.abilities.dash_cooldown_ms, 0);
    }

    #[tokio::test]
    async fn test_directory_delivers_and_drops_when_full() {
        let mut directory = ClientDirectory::new();
        let conn = ConnectionId::new();
        let (tx, mut rx) = mpsc::channel(1);
        directory.register(conn, tx);

        let first = ServerMessage::WorldSnapshot(WorldSnapshot::default());
        let second = ServerMessage::PlayerLeft { id: conn };
        directory.deliver(&conn, first.clone());
        directory.deliver(&conn, second);
        // Unknown connections are ignored
        directory.deliver(&ConnectionId::new(), first.clone());

        assert_eq!(rx.recv().await, Some(first));
        assert!(rx.try_recv().is_err());

        assert!(directory.unregister(&conn));
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        });

        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.world_count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_serve() {
        let server = Arc::new(GameServer::new(ServerConfig {
            spawn_seed: Some(1),
            ..Default::default()
        }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        // Shutdown before serve starts must still be observed
        server.shutdown();
        let handle = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_config() {
        let mut config = ServerConfig::default();
        config.sim.tick_rate = 0;
        let server = GameServer::new(config);
        assert!(matches!(server.run().await, Err(GameServerError::Config(_))));
    }

    fn drain_snapshots(rx: &mut mpsc::Receiver<ServerMessage>) -> usize {
        let mut count = 0;
        while let Ok(msg) = rx.try_recv() {
            if matches!(msg, ServerMessage::WorldSnapshot(_)) {
                count += 1;
            }
        }
        count
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_loop_cadence_and_no_catch_up() {
        let conn = ConnectionId::new();
        let (tx, mut rx) = mpsc::channel(256);
        let mut shared = Shared {
            sessions: SessionManager::new(SimConfig::default(), StdRng::seed_from_u64(3)),
            clients: ClientDirectory::new(),
        };
        shared.clients.register(conn, tx);
        {
            let Shared { sessions, clients } = &mut shared;
            sessions.join(conn, &JoinWorld::default(), Utc::now(), &*clients);
        }
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Joined { .. })));
        let shared = Arc::new(Mutex::new(shared));

        let (stop_tx, stop_rx) = watch::channel(false);
        let ticker = tokio::spawn(GameServer::run_tick_loop(shared.clone(), 20, stop_rx));

        // First tick is immediate, then every 50ms: 0, 50, ..., 450
        tokio::time::sleep(Duration::from_millis(475)).await;
        assert_eq!(drain_snapshots(&mut rx), 10);

        // Hold the lock across a full second so every deadline is missed
        {
            let _guard = shared.lock().await;
            tokio::time::advance(Duration::from_millis(1000)).await;
        }

        // Missed ticks collapse into one; the schedule resumes on the 50ms grid
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(drain_snapshots(&mut rx), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(drain_snapshots(&mut rx), 2);
        assert_eq!(shared.lock().await.sessions.current_tick(), 13);

        stop_tx.send_replace(true);
        ticker.await.unwrap();
    }
}

use std::time::Duration;

use clap::ValueEnum;

use voxnet::{DEFAULT_TICK_RATE, HostConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum GameMode {
    #[default]
    Deathmatch,
    TeamDeathmatch,
    CaptureTheFlag,
}

impl GameMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Deathmatch => "deathmatch",
            GameMode::TeamDeathmatch => "team deathmatch",
            GameMode::CaptureTheFlag => "capture the flag",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub map: String,
    pub mode: GameMode,
    pub tick_rate: u32,
    pub max_players: usize,
    /// Server-driven players spawned at startup.
    pub bots: usize,
    /// A snapshot goes out every this many ticks.
    pub snapshot_interval: u32,
    /// Poll timeout while anyone is playing.
    pub active_poll_timeout: Duration,
    /// Poll timeout for an empty server.
    pub idle_poll_timeout: Duration,
    /// Units per second.
    pub player_speed: f32,
    pub host: HostConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            map: String::new(),
            mode: GameMode::Deathmatch,
            tick_rate: DEFAULT_TICK_RATE,
            max_players: 16,
            bots: 0,
            snapshot_interval: 1,
            active_poll_timeout: Duration::ZERO,
            idle_poll_timeout: Duration::from_millis(1000),
            player_speed: 5.0,
            host: HostConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Ticks per second as announced to clients in `ClientConfig`.
    pub fn sample_rate(&self) -> f64 {
        self.tick_rate as f64
    }
}

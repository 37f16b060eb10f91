use std::time::Duration;

use voxnet::time::ticks_to_duration;
use voxnet::{DEFAULT_PORT, DEFAULT_TICK_RATE, HostConfig, InterpolationConfig};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
    /// Assumed until the server's `ClientConfig` says otherwise.
    pub server_tick_rate: u32,
    pub interpolation: InterpolationConfig,
    /// Movement commands per second.
    pub command_rate: u32,
    pub connection_timeout: Duration,
    /// How long to stay connected. `None` runs until the server goes away.
    pub run_duration: Option<Duration>,
    pub report_interval: Duration,
    pub resolver_workers: usize,
    pub host: HostConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: DEFAULT_PORT,
            server_tick_rate: DEFAULT_TICK_RATE,
            interpolation: InterpolationConfig::default(),
            command_rate: DEFAULT_TICK_RATE,
            connection_timeout: Duration::from_secs(10),
            run_duration: None,
            report_interval: Duration::from_secs(1),
            resolver_workers: 1,
            host: HostConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn command_interval(&self) -> Duration {
        ticks_to_duration(1, self.command_rate)
    }
}

pub mod net;

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use glam::Vec3;

use voxnet::net::resolve;
use voxnet::snapshot::DEFAULT_INTERPOLATION_DELAY_TICKS;
use voxnet::time::millis_f64;
use voxnet::{
    Clock, DEFAULT_PORT, DEFAULT_TICK_RATE, InterpolatedWorld, SystemClock, TaskPool, Timer,
    UdpHost,
};

use net::{ClientConfig, ClientState, NetworkClient};

#[derive(Parser)]
#[command(name = "voxnet-client")]
#[command(about = "Headless voxnet client")]
struct Args {
    #[arg(long, default_value = "127.0.0.1", help = "Server hostname or IP address")]
    host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, help = "Disconnect after this many seconds")]
    duration_secs: Option<u64>,

    #[arg(
        long,
        default_value_t = DEFAULT_INTERPOLATION_DELAY_TICKS,
        help = "Interpolation delay in ticks"
    )]
    interp_delay: f64,

    #[arg(long, default_value_t = DEFAULT_TICK_RATE, help = "Movement commands per second")]
    command_rate: u32,
}

impl Args {
    fn into_config(self) -> ClientConfig {
        let mut config = ClientConfig {
            server_host: self.host,
            server_port: self.port,
            command_rate: self.command_rate,
            run_duration: self.duration_secs.map(Duration::from_secs),
            ..Default::default()
        };
        config.interpolation.delay_ticks = self.interp_delay.max(0.0);
        config
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = args.into_config();
    let addr = resolve_server(&config)?;

    let host = UdpHost::connect(addr, config.host.clone())
        .with_context(|| format!("failed to open a connection to {}", addr))?;
    let client = NetworkClient::new(host, config.clone());

    run(client, &config)
}

/// Resolves the server off the main thread so a slow lookup only delays
/// this poll loop, never blocks it.
fn resolve_server(config: &ClientConfig) -> Result<SocketAddr> {
    resolve_server_with(config, resolve)
}

fn resolve_server_with<F>(config: &ClientConfig, lookup: F) -> Result<SocketAddr>
where
    F: FnOnce(&str, u16) -> Option<SocketAddr> + Send + 'static,
{
    let pool = TaskPool::new(config.resolver_workers, 1);
    let host = config.server_host.clone();
    let port = config.server_port;
    pool.submit(move || lookup(&host, port))?;

    let clock = SystemClock::new();
    let deadline = Timer::start(config.connection_timeout, clock.now());
    loop {
        if let Some(resolved) = pool.poll() {
            let addr = resolved
                .with_context(|| format!("cannot resolve server {}", config.server_host))?;
            log::info!("{} resolved to {}", config.server_host, addr);
            return Ok(addr);
        }
        if deadline.is_elapsed(clock.now()) {
            bail!("timed out resolving {}", config.server_host);
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn run(mut client: NetworkClient<UdpHost>, config: &ClientConfig) -> Result<()> {
    let clock = SystemClock::new();
    let mut command_timer = Timer::new(config.command_interval());
    let mut report_timer = Timer::start(config.report_interval, clock.now());
    let mut was_connected = false;

    loop {
        client.process_events(Duration::from_millis(1))?;

        match client.state() {
            ClientState::Connected => was_connected = true,
            ClientState::Disconnected if was_connected => break,
            ClientState::Disconnected => bail!("could not connect to the server"),
            ClientState::Connecting => {}
        }

        let elapsed = clock.now();
        if let Some(duration) = config.run_duration {
            if elapsed >= duration {
                log::info!("run duration reached");
                break;
            }
        }

        let now = Instant::now();
        if client.is_connected() && command_timer.consume(elapsed) {
            let angle = elapsed.as_secs_f32();
            let move_dir = Vec3::new(angle.cos(), 0.0, angle.sin());
            if let Err(e) = client.send_movement(move_dir, now) {
                log::warn!("movement not sent: {}", e);
            }
        }

        let world = client.render(now);
        if report_timer.consume(elapsed) {
            if let Some(world) = world {
                report(&client, &world);
            }
        }
    }

    log::info!("disconnecting after {:.0} ms", millis_f64(clock.now()));
    client.disconnect();
    Ok(())
}

fn report(client: &NetworkClient<UdpHost>, world: &InterpolatedWorld) {
    log::info!(
        "ticks {}..{} alpha {:.2} at {} Hz, {} buffered, {} announced, last ack {:?}",
        world.from_tick,
        world.to_tick,
        world.alpha,
        client.sample_rate(),
        client.interpolation().len(),
        client.known_players().len(),
        client.last_acked_tick()
    );
    let others = world
        .players
        .iter()
        .filter(|(id, _)| Some(**id) != client.player_id());
    for (id, player) in others {
        let p = player.transform.position;
        log::info!(
            "  player {} at ({:.2}, {:.2}, {:.2}) yaw {:.0}",
            id,
            p.x,
            p.y,
            p.z,
            player.transform.rotation.y
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn args_become_config() {
        let config = Args::try_parse_from([
            "voxnet-client",
            "--host",
            "example.org",
            "--duration-secs",
            "5",
            "--interp-delay",
            "3",
        ])
        .unwrap()
        .into_config();

        assert_eq!(config.server_host, "example.org");
        assert_eq!(config.server_port, 27015);
        assert_eq!(config.run_duration, Some(Duration::from_secs(5)));
        assert_eq!(config.interpolation.delay_ticks, 3.0);
    }

    #[test]
    fn literal_addresses_resolve_through_the_pool() {
        let config = ClientConfig {
            server_host: "127.0.0.1".to_string(),
            server_port: 4000,
            ..Default::default()
        };
        assert_eq!(
            resolve_server(&config).unwrap(),
            "127.0.0.1:4000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn slow_lookup_times_out_on_schedule() {
        let config = ClientConfig {
            server_host: "slow.example".to_string(),
            connection_timeout: Duration::from_millis(50),
            ..Default::default()
        };

        let started = Instant::now();
        let result = resolve_server_with(&config, |_, _| {
            thread::sleep(Duration::from_millis(500));
            None
        });

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_millis(400));
    }
}

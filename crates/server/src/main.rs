mod config;
mod events;
mod server;
mod simulation;

use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;

use config::{GameMode, ServerConfig};
use server::GameServer;
use voxnet::net::resolve;
use voxnet::{HostConfig, PacketLossSimulation, Snapshot, UdpHost};

#[derive(Parser)]
#[command(name = "voxnet-server")]
#[command(about = "Dedicated voxnet game server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = voxnet::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, help = "Map to host")]
    map: String,

    #[arg(long, default_value_t = 16, value_parser = parse_max_players)]
    max_players: usize,

    #[arg(long, default_value_t = 0, help = "Server-driven players to start with")]
    players: usize,

    #[arg(long, value_enum, default_value_t = GameMode::Deathmatch)]
    mode: GameMode,

    #[arg(short, long, default_value_t = voxnet::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(long, default_value_t = 1, help = "Ticks between snapshots")]
    snapshot_interval: u32,

    #[arg(long, default_value_t = 0.0, help = "Outgoing packet loss percentage (0-100)")]
    loss_percent: f32,
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let addr = resolve(&args.bind, args.port)
        .with_context(|| format!("cannot resolve bind address {}", args.bind))?;

    let host_config = HostConfig {
        max_peers: args.max_players,
        packet_loss: PacketLossSimulation::new(args.loss_percent),
        ..Default::default()
    };
    let config = ServerConfig {
        map: args.map,
        mode: args.mode,
        tick_rate: args.tick_rate,
        max_players: args.max_players,
        bots: args.players,
        snapshot_interval: args.snapshot_interval,
        host: host_config,
        ..Default::default()
    };

    let host = UdpHost::listen(addr, config.host.clone())
        .with_context(|| format!("failed to start server on {}", addr))?;
    let mut server = GameServer::new(host, config);

    log::info!(
        "serving {} ({}) on {} at {} Hz",
        server.config().map,
        server.config().mode.as_str(),
        addr,
        server.config().tick_rate
    );

    let running = server.running();
    ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
        .context("failed to install the Ctrl-C handler")?;

    server.run();
    Ok(())
}

/// Every player has to fit in one snapshot datagram.
fn parse_max_players(value: &str) -> Result<usize, String> {
    let count: usize = value.parse().map_err(|e| format!("{}", e))?;
    let most = Snapshot::max_players_within(UdpHost::max_payload());
    if count == 0 || count > most {
        return Err(format!("must be between 1 and {}, the most a snapshot can carry", most));
    }
    Ok(count)
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
    fn defaults() {
        let args = Args::try_parse_from(["voxnet-server", "--map", "arena"]).unwrap();
        assert_eq!(args.bind, "0.0.0.0");
        assert_eq!(args.port, 27015);
        assert_eq!(args.max_players, 16);
        assert_eq!(args.players, 0);
        assert_eq!(args.mode, GameMode::Deathmatch);
        assert_eq!(args.tick_rate, 60);
    }

    #[test]
    fn map_is_required() {
        assert!(Args::try_parse_from(["voxnet-server"]).is_err());
    }

    #[test]
    fn game_mode_names() {
        let args = Args::try_parse_from([
            "voxnet-server",
            "--map",
            "arena",
            "--mode",
            "capture-the-flag",
            "--players",
            "4",
        ])
        .unwrap();
        assert_eq!(args.mode, GameMode::CaptureTheFlag);
        assert_eq!(args.players, 4);
        assert!(Args::try_parse_from(["voxnet-server", "--map", "a", "--mode", "tag"]).is_err());
    }

    #[test]
    fn max_players_must_fit_in_a_snapshot() {
        let most = Snapshot::max_players_within(UdpHost::max_payload());
        let parse = |count: usize| {
            Args::try_parse_from([
                "voxnet-server",
                "--map",
                "arena",
                "--max-players",
                count.to_string().as_str(),
            ])
        };

        assert_eq!(parse(most).unwrap().max_players, most);
        assert!(parse(most + 1).is_err());
        assert!(parse(0).is_err());
    }
}

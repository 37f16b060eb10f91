use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use glam::Vec3;

use voxnet::net::{CHANNEL_COMMANDS, CHANNEL_SNAPSHOTS, Direction};
use voxnet::time::duration_to_ticks;
use voxnet::{
    Command, Host, InterpolatedWorld, Payload, PeerId, PlayerId, Reliability, Snapshot,
    SnapshotInterpolator, TransportError, TransportEvent,
};

use super::config::ClientConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Connected,
    Disconnected,
}

pub struct NetworkClient<H: Host> {
    host: H,
    config: ClientConfig,
    state: ClientState,
    server: Option<PeerId>,
    player_id: Option<PlayerId>,
    /// Server ticks per second.
    sample_rate: f64,
    interpolation: SnapshotInterpolator,
    /// Latest snapshot tick and when it arrived.
    last_snapshot: Option<(u32, Instant)>,
    known_players: BTreeMap<PlayerId, Vec3>,
    command_tick: u32,
    last_acked_tick: Option<u32>,
    connect_started: Instant,
}

impl<H: Host> NetworkClient<H> {
    pub fn new(host: H, config: ClientConfig) -> Self {
        Self {
            host,
            state: ClientState::Connecting,
            server: None,
            player_id: None,
            sample_rate: config.server_tick_rate as f64,
            interpolation: SnapshotInterpolator::new(config.interpolation.clone()),
            last_snapshot: None,
            known_players: BTreeMap::new(),
            command_tick: 0,
            last_acked_tick: None,
            connect_started: Instant::now(),
            config,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn last_acked_tick(&self) -> Option<u32> {
        self.last_acked_tick
    }

    /// Players announced through `PlayerUpdate`, at their announced position.
    pub fn known_players(&self) -> &BTreeMap<PlayerId, Vec3> {
        &self.known_players
    }

    pub fn interpolation(&self) -> &SnapshotInterpolator {
        &self.interpolation
    }

    /// Drains transport events, waiting at most `timeout` for the first.
    pub fn process_events(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let mut timeout = timeout;
        while let Some(event) = self.host.poll_event(timeout)? {
            self.handle_event(event, Instant::now());
            timeout = Duration::ZERO;
        }

        if self.state == ClientState::Connecting
            && self.connect_started.elapsed() > self.config.connection_timeout
        {
            log::warn!("connection timed out");
            self.state = ClientState::Disconnected;
        }
        Ok(())
    }

    fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Connect(peer) => {
                log::info!("connected to server (peer {})", peer);
                self.server = Some(peer);
                self.state = ClientState::Connected;
            }
            TransportEvent::Receive {
                peer,
                channel,
                payload,
            } => {
                if Some(peer) != self.server {
                    log::warn!("ignoring message from unknown peer {}", peer);
                    return;
                }
                match channel {
                    CHANNEL_COMMANDS => self.handle_command(payload.as_bytes()),
                    CHANNEL_SNAPSHOTS => self.handle_snapshot(payload.as_bytes(), now),
                    other => log::warn!("dropping message on unknown channel {}", other),
                }
            }
            TransportEvent::Disconnect(peer) => {
                if Some(peer) == self.server || self.server.is_none() {
                    log::info!("disconnected from server");
                    self.server = None;
                    self.state = ClientState::Disconnected;
                }
            }
        }
    }

    fn handle_command(&mut self, bytes: &[u8]) {
        let command = match Command::from_bytes(bytes) {
            Ok(command) => command,
            Err(e) => {
                log::warn!("dropping malformed command: {}", e);
                return;
            }
        };
        if command.kind().direction() != Direction::ServerToClient {
            log::warn!("dropping {:?} sent by the server", command.kind());
            return;
        }

        match command.payload {
            Payload::ClientConfig {
                player_id,
                sample_rate,
            } => {
                log::info!("playing as {} at {} Hz", player_id, sample_rate);
                self.player_id = Some(player_id);
                if sample_rate > 0.0 {
                    self.sample_rate = sample_rate;
                }
            }
            Payload::PlayerUpdate { player_id, pos } => {
                self.known_players.insert(player_id, pos);
            }
            Payload::PlayerDisconnected { player_id } => {
                log::info!("player {} left", player_id);
                self.known_players.remove(&player_id);
            }
            Payload::AckCommand { command_id } => {
                if self.last_acked_tick.is_none_or(|acked| command_id > acked) {
                    self.last_acked_tick = Some(command_id);
                }
            }
            Payload::PlayerMovement { .. } => {}
        }
    }

    fn handle_snapshot(&mut self, bytes: &[u8], now: Instant) {
        let snapshot = match Snapshot::from_bytes(bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("dropping malformed snapshot: {}", e);
                return;
            }
        };
        let tick = snapshot.server_tick;
        if self.interpolation.push(snapshot) {
            self.last_snapshot = Some((tick, now));
        }
    }

    /// Latest snapshot tick advanced by the time since it arrived.
    pub fn estimated_server_tick(&self, now: Instant) -> Option<f64> {
        let (tick, received) = self.last_snapshot?;
        let elapsed = now.saturating_duration_since(received);
        Some(tick as f64 + duration_to_ticks(elapsed, self.sample_rate))
    }

    /// The world as it should be drawn at `now`.
    pub fn render(&mut self, now: Instant) -> Option<InterpolatedWorld> {
        let estimate = self.estimated_server_tick(now)?;
        let target = self.interpolation.render_tick(estimate);
        self.interpolation.update(target)
    }

    /// Sends a movement command stamped with the estimated server tick.
    /// Returns the tick used.
    pub fn send_movement(&mut self, move_dir: Vec3, now: Instant) -> Result<u32, TransportError> {
        let server = self
            .server
            .filter(|_| self.is_connected())
            .ok_or(TransportError::UnknownPeer(0))?;

        let next = self.command_tick.wrapping_add(1);
        let tick = self
            .estimated_server_tick(now)
            .map_or(next, |estimate| (estimate as u32).max(next));
        self.command_tick = tick;

        let command = Command::new(tick, Payload::PlayerMovement { move_dir });
        self.host.send(
            server,
            CHANNEL_COMMANDS,
            command.encode().as_bytes(),
            Reliability::Unreliable,
        )?;
        Ok(tick)
    }

    pub fn disconnect(&mut self) {
        if let Some(server) = self.server.take() {
            self.host.disconnect(server);
        }
        self.state = ClientState::Disconnected;
        self.interpolation.reset();
        self.last_snapshot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use voxnet::net::MemoryHost;
    use voxnet::{HostFactory, MemoryNetwork, PlayerSnapshot, Transform};

    fn addr() -> SocketAddr {
        "127.0.0.1:27015".parse().unwrap()
    }

    fn connected() -> (MemoryHost, NetworkClient<MemoryHost>) {
        let network = MemoryNetwork::new();
        let mut server = network.listen(addr()).unwrap();
        let host = network.connect(addr()).unwrap();
        let mut client = NetworkClient::new(host, ClientConfig::default());

        client.process_events(Duration::ZERO).unwrap();
        assert!(client.is_connected());
        assert_eq!(
            server.poll_event(Duration::ZERO).unwrap(),
            Some(TransportEvent::Connect(1))
        );
        (server, client)
    }

    fn send(server: &mut MemoryHost, payload: Payload) {
        let command = Command::new(0, payload).encode();
        server
            .send(1, CHANNEL_COMMANDS, command.as_bytes(), Reliability::Reliable)
            .unwrap();
    }

    fn send_snapshot(server: &mut MemoryHost, tick: u32, x: f32) {
        let snapshot = Snapshot::new(tick).with_player(
            3,
            PlayerSnapshot::new(Transform::from_position(Vec3::new(x, 0.0, 0.0))),
        );
        server
            .send(
                1,
                CHANNEL_SNAPSHOTS,
                snapshot.encode().unwrap().as_bytes(),
                Reliability::Unreliable,
            )
            .unwrap();
    }

    #[test]
    fn server_commands_update_client_state() {
        let (mut server, mut client) = connected();

        send(
            &mut server,
            Payload::ClientConfig {
                player_id: 4,
                sample_rate: 30.0,
            },
        );
        send(
            &mut server,
            Payload::PlayerUpdate {
                player_id: 1,
                pos: Vec3::ONE,
            },
        );
        send(&mut server, Payload::AckCommand { command_id: 12 });
        send(&mut server, Payload::AckCommand { command_id: 9 });
        client.process_events(Duration::ZERO).unwrap();

        assert_eq!(client.player_id(), Some(4));
        assert_eq!(client.sample_rate(), 30.0);
        assert_eq!(client.known_players().get(&1), Some(&Vec3::ONE));
        assert_eq!(client.last_acked_tick(), Some(12));

        send(&mut server, Payload::PlayerDisconnected { player_id: 1 });
        client.process_events(Duration::ZERO).unwrap();
        assert!(client.known_players().is_empty());
    }

    #[test]
    fn snapshots_are_interpolated_behind_the_estimate() {
        let (mut server, mut client) = connected();
        send_snapshot(&mut server, 10, 0.0);
        send_snapshot(&mut server, 20, 10.0);
        send_snapshot(&mut server, 15, 99.0);
        client.process_events(Duration::ZERO).unwrap();

        assert_eq!(client.interpolation().ticks(), vec![10, 20]);

        // Sampled right at arrival: estimate 20, render tick 18.
        let (_, arrived) = client.last_snapshot.unwrap();
        let world = client.render(arrived).unwrap();
        assert_eq!((world.from_tick, world.to_tick), (10, 20));
        assert!((world.alpha - 0.8).abs() < 1e-6);
        assert!((world.players[&3].transform.position.x - 8.0).abs() < 1e-4);
    }

    #[test]
    fn movement_ticks_never_go_backwards() {
        let (mut server, mut client) = connected();
        let now = Instant::now();

        assert_eq!(client.send_movement(Vec3::X, now).unwrap(), 1);
        assert_eq!(client.send_movement(Vec3::X, now).unwrap(), 2);

        send_snapshot(&mut server, 50, 0.0);
        client.process_events(Duration::ZERO).unwrap();
        let (_, arrived) = client.last_snapshot.unwrap();
        assert_eq!(client.send_movement(Vec3::Z, arrived).unwrap(), 50);
        assert_eq!(client.send_movement(Vec3::Z, arrived).unwrap(), 51);

        let mut received = Vec::new();
        while let Some(event) = server.poll_event(Duration::ZERO).unwrap() {
            if let TransportEvent::Receive { payload, .. } = event {
                received.push(Command::from_bytes(payload.as_bytes()).unwrap().tick);
            }
        }
        assert_eq!(received, vec![1, 2, 50, 51]);
    }

    #[test]
    fn garbage_is_dropped_and_disconnect_is_noticed() {
        let (mut server, mut client) = connected();
        server
            .send(1, CHANNEL_COMMANDS, &[1, 2, 3], Reliability::Reliable)
            .unwrap();
        server
            .send(1, CHANNEL_SNAPSHOTS, &[1, 2, 3], Reliability::Unreliable)
            .unwrap();
        client.process_events(Duration::ZERO).unwrap();
        assert!(client.is_connected());
        assert!(client.interpolation().is_empty());

        server.disconnect(1);
        client.process_events(Duration::ZERO).unwrap();
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(client.send_movement(Vec3::X, Instant::now()).is_err());
    }
}

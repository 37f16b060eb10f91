use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use glam::Vec3;

use voxnet::net::{CHANNEL_COMMANDS, CHANNEL_SNAPSHOTS, Direction};
use voxnet::{
    Clock, Command, CommandBuffer, CommandType, FixedTimestep, Host, Payload, PeerId, PlayerId,
    PlayerSnapshot, Reliability, Snapshot, SystemClock, Timer, Transform, TransportError,
    TransportEvent,
};

use crate::config::ServerConfig;
use crate::events::ServerEvent;
use crate::simulation::{Bot, apply_movement};

const STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    /// `None` for bots.
    pub peer: Option<PeerId>,
    pub state: PlayerSnapshot,
    /// Tick of the last movement command applied for this player.
    pub last_applied_tick: Option<u32>,
    bot: Option<Bot>,
}

impl Player {
    pub fn position(&self) -> Vec3 {
        self.state.transform.position
    }

    pub fn is_bot(&self) -> bool {
        self.bot.is_some()
    }
}

pub struct GameServer<H: Host> {
    host: H,
    config: ServerConfig,
    commands: CommandBuffer,
    players: BTreeMap<PlayerId, Player>,
    peers: HashMap<PeerId, PlayerId>,
    timestep: FixedTimestep,
    tick: u32,
    last_update: Instant,
    running: Arc<AtomicBool>,
    pending_events: VecDeque<ServerEvent>,
    /// Set while snapshots exceed the transport's payload limit.
    snapshots_oversized: bool,
}

impl<H: Host> GameServer<H> {
    pub fn new(host: H, config: ServerConfig) -> Self {
        let mut server = Self {
            host,
            commands: CommandBuffer::new(),
            players: BTreeMap::new(),
            peers: HashMap::new(),
            timestep: FixedTimestep::new(config.tick_rate),
            tick: 0,
            last_update: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
            pending_events: VecDeque::new(),
            snapshots_oversized: false,
            config,
        };

        for n in 0..server.config.bots {
            let Some(id) = server.spawn_player(None) else {
                log::warn!("no room for bot {}", n);
                break;
            };
            if let Some(player) = server.players.get_mut(&id) {
                player.bot = Some(Bot::new(0x9E37_79B9_7F4A_7C15 ^ (id as u64 + 1)));
            }
        }

        server
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Clearing this flag makes [`GameServer::run`] wind down.
    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    #[cfg(test)]
    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    #[cfg(test)]
    pub fn player_for_peer(&self, peer: PeerId) -> Option<&Player> {
        self.peers.get(&peer).and_then(|id| self.players.get(id))
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    #[cfg(test)]
    pub fn commands(&self) -> &CommandBuffer {
        &self.commands
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// Runs the game loop until the running flag is cleared, then
    /// disconnects every client.
    pub fn run(&mut self) {
        let clock = SystemClock::new();
        let mut status = Timer::start(STATUS_INTERVAL, clock.now());

        while self.running.load(Ordering::SeqCst) {
            self.update();
            for event in self.drain_events() {
                event.log();
            }

            if status.consume(clock.now()) {
                log::info!("tick {}, {} players", self.tick(), self.player_count());
            }
            if self.player_count() > 0 {
                thread::sleep(self.until_next_tick().min(Duration::from_millis(1)));
            }
        }

        log::info!("server shutting down");
        self.shutdown();
    }

    /// One pass of the game loop: drain the transport, then run every tick
    /// that has come due.
    pub fn update(&mut self) {
        let timeout = if self.players.is_empty() {
            self.config.idle_poll_timeout
        } else {
            self.config.active_poll_timeout
        };
        self.process_events(timeout);

        let now = Instant::now();
        self.timestep
            .accumulate(now.duration_since(self.last_update).as_secs_f32());
        self.last_update = now;

        while self.timestep.consume_tick() {
            self.run_tick();
        }
    }

    /// Time until the next tick, for callers that want to sleep.
    pub fn until_next_tick(&self) -> Duration {
        self.timestep.until_next_tick()
    }

    /// Waits up to `timeout` for the first event, then takes whatever else
    /// is already queued.
    pub fn process_events(&mut self, timeout: Duration) {
        let mut timeout = timeout;
        loop {
            match self.host.poll_event(timeout) {
                Ok(Some(event)) => self.handle_event(event),
                Ok(None) => break,
                Err(e) => {
                    self.pending_events.push_back(ServerEvent::Error {
                        message: format!("transport error: {}", e),
                    });
                    break;
                }
            }
            timeout = Duration::ZERO;
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connect(peer) => self.handle_connect(peer),
            TransportEvent::Receive {
                peer,
                channel,
                payload,
            } => {
                if channel != CHANNEL_COMMANDS {
                    self.drop_message(peer, format!("unexpected channel {}", channel));
                    return;
                }
                self.handle_command(peer, payload.as_bytes());
            }
            TransportEvent::Disconnect(peer) => self.handle_disconnect(peer),
        }
    }

    fn handle_connect(&mut self, peer: PeerId) {
        let Some(player_id) = self.spawn_player(Some(peer)) else {
            self.pending_events.push_back(ServerEvent::ConnectionRefused {
                peer,
                reason: "server full",
            });
            self.host.disconnect(peer);
            return;
        };
        self.peers.insert(peer, player_id);
        self.pending_events
            .push_back(ServerEvent::PlayerJoined { peer, player_id });

        self.send_reliable(
            peer,
            Payload::ClientConfig {
                player_id,
                sample_rate: self.config.sample_rate(),
            },
        );

        let others: Vec<(PlayerId, Option<PeerId>, Vec3)> = self
            .players
            .values()
            .filter(|p| p.id != player_id)
            .map(|p| (p.id, p.peer, p.position()))
            .collect();
        let position = self
            .players
            .get(&player_id)
            .map(Player::position)
            .unwrap_or_default();

        for (other_id, other_peer, pos) in others {
            self.send_reliable(
                peer,
                Payload::PlayerUpdate {
                    player_id: other_id,
                    pos,
                },
            );
            if let Some(other_peer) = other_peer {
                self.send_reliable(
                    other_peer,
                    Payload::PlayerUpdate {
                        player_id,
                        pos: position,
                    },
                );
            }
        }
    }

    fn handle_command(&mut self, peer: PeerId, bytes: &[u8]) {
        if !self.peers.contains_key(&peer) {
            self.drop_message(peer, "peer has no player".to_string());
            return;
        }

        let command = match Command::from_bytes(bytes) {
            Ok(command) => command,
            Err(e) => {
                self.drop_message(peer, e.to_string());
                return;
            }
        };

        if command.kind().direction() != Direction::ClientToServer {
            self.drop_message(peer, format!("{:?} is not a client command", command.kind()));
            return;
        }

        self.commands.push(peer, command);
    }

    fn handle_disconnect(&mut self, peer: PeerId) {
        self.commands.remove_peer(peer);
        let Some(player_id) = self.peers.remove(&peer) else {
            return;
        };
        self.players.remove(&player_id);
        self.pending_events
            .push_back(ServerEvent::PlayerLeft { peer, player_id });

        let goodbye = Command::new(self.tick, Payload::PlayerDisconnected { player_id }).encode();
        if let Err(e) = self
            .host
            .broadcast(CHANNEL_COMMANDS, goodbye.as_bytes(), Reliability::Reliable)
        {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("failed to announce departure of {}: {}", player_id, e),
            });
        }
    }

    /// Advances the world one tick.
    pub fn run_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        let dt = self.timestep.dt();
        let speed = self.config.player_speed;
        let mut acks = Vec::new();

        for player in self.players.values_mut() {
            if let Some(bot) = player.bot.as_mut() {
                let dir = bot.wander(player.state.transform.position);
                apply_movement(&mut player.state.transform, dir, speed, dt);
                continue;
            }

            let Some(peer) = player.peer else {
                continue;
            };
            let Some(command) = self.commands.last(peer, CommandType::PlayerMovement) else {
                continue;
            };
            if player
                .last_applied_tick
                .is_some_and(|applied| command.tick <= applied)
            {
                continue;
            }

            if let Payload::PlayerMovement { move_dir } = command.payload {
                apply_movement(
                    &mut player.state.transform,
                    move_dir.clamp_length_max(1.0),
                    speed,
                    dt,
                );
            }
            player.last_applied_tick = Some(command.tick);
            acks.push((peer, command.tick));
        }

        for (peer, command_id) in acks {
            self.send_reliable(peer, Payload::AckCommand { command_id });
        }

        if self.tick % self.config.snapshot_interval.max(1) == 0 {
            self.broadcast_snapshot();
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::new(self.tick);
        for player in self.players.values() {
            snapshot.players.insert(player.id, player.state);
        }
        snapshot
    }

    fn broadcast_snapshot(&mut self) {
        let bytes = match self.snapshot().encode() {
            Ok(buf) => buf,
            Err(e) => {
                self.pending_events.push_back(ServerEvent::Error {
                    message: format!("failed to encode snapshot {}: {}", self.tick, e),
                });
                return;
            }
        };

        let mut oversized = None;
        for peer in self.host.peers() {
            match self
                .host
                .send(peer, CHANNEL_SNAPSHOTS, bytes.as_bytes(), Reliability::Unreliable)
            {
                Ok(()) => {}
                Err(e @ TransportError::PayloadTooLarge { .. }) => {
                    oversized = Some(e);
                    break;
                }
                Err(e) => log::debug!("snapshot {} to peer {} not sent: {}", self.tick, peer, e),
            }
        }

        match oversized {
            Some(e) if !self.snapshots_oversized => {
                self.snapshots_oversized = true;
                self.pending_events.push_back(ServerEvent::Error {
                    message: format!(
                        "snapshots with {} players cannot be sent: {}",
                        self.players.len(),
                        e
                    ),
                });
            }
            Some(_) => {}
            None => self.snapshots_oversized = false,
        }
    }

    fn send_reliable(&mut self, peer: PeerId, payload: Payload) {
        let command = Command::new(self.tick, payload);
        if let Err(e) = self.host.send(
            peer,
            CHANNEL_COMMANDS,
            command.encode().as_bytes(),
            Reliability::Reliable,
        ) {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("failed to send {:?} to peer {}: {}", command.kind(), peer, e),
            });
        }
    }

    fn drop_message(&mut self, peer: PeerId, reason: String) {
        self.pending_events
            .push_back(ServerEvent::MessageDropped { peer, reason });
    }

    /// Lowest free player id, or `None` when the server is full.
    fn spawn_player(&mut self, peer: Option<PeerId>) -> Option<PlayerId> {
        if self.players.len() >= self.config.max_players {
            return None;
        }
        let id = (0..=PlayerId::MAX).find(|id| !self.players.contains_key(id))?;

        let spawn = Vec3::new(id as f32 * 2.0, 1.0, 0.0);
        self.players.insert(
            id,
            Player {
                id,
                peer,
                state: PlayerSnapshot::new(Transform::from_position(spawn)),
                last_applied_tick: None,
                bot: None,
            },
        );
        Some(id)
    }

    /// Disconnects every client.
    pub fn shutdown(&mut self) {
        for peer in self.host.peers() {
            self.host.disconnect(peer);
        }
        self.peers.clear();
        self.commands.clear();
        self.players.retain(|_, p| p.is_bot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use voxnet::{HostFactory, MemoryNetwork, net::MemoryHost};

    fn addr() -> SocketAddr {
        "127.0.0.1:27015".parse().unwrap()
    }

    fn server(network: &MemoryNetwork, config: ServerConfig) -> GameServer<MemoryHost> {
        GameServer::new(network.listen(addr()).unwrap(), config)
    }

    fn commands_received(client: &mut MemoryHost) -> Vec<Command> {
        let mut commands = Vec::new();
        while let Some(event) = client.poll_event(Duration::ZERO).unwrap() {
            if let TransportEvent::Receive {
                channel: CHANNEL_COMMANDS,
                payload,
                ..
            } = event
            {
                commands.push(Command::from_bytes(payload.as_bytes()).unwrap());
            }
        }
        commands
    }

    fn snapshots_received(client: &mut MemoryHost) -> Vec<Snapshot> {
        let mut snapshots = Vec::new();
        while let Some(event) = client.poll_event(Duration::ZERO).unwrap() {
            if let TransportEvent::Receive {
                channel: CHANNEL_SNAPSHOTS,
                payload,
                ..
            } = event
            {
                snapshots.push(Snapshot::from_bytes(payload.as_bytes()).unwrap());
            }
        }
        snapshots
    }

    fn send_movement(client: &mut MemoryHost, tick: u32, move_dir: Vec3) {
        let command = Command::new(tick, Payload::PlayerMovement { move_dir });
        client
            .send(1, CHANNEL_COMMANDS, command.encode().as_bytes(), Reliability::Unreliable)
            .unwrap();
    }

    #[test]
    fn new_client_gets_its_config() {
        let network = MemoryNetwork::new();
        let mut server = server(&network, ServerConfig::default());
        let mut client = network.connect(addr()).unwrap();

        server.process_events(Duration::ZERO);

        let received = commands_received(&mut client);
        assert_eq!(
            received[0].payload,
            Payload::ClientConfig {
                player_id: 0,
                sample_rate: 60.0
            }
        );
        assert_eq!(server.player_count(), 1);
        assert_eq!(
            server.drain_events().collect::<Vec<_>>(),
            vec![ServerEvent::PlayerJoined {
                peer: 1,
                player_id: 0
            }]
        );
    }

    #[test]
    fn newcomer_learns_about_existing_players() {
        let network = MemoryNetwork::new();
        let mut server = server(&network, ServerConfig::default());
        let mut first = network.connect(addr()).unwrap();
        server.process_events(Duration::ZERO);
        commands_received(&mut first);

        let mut second = network.connect(addr()).unwrap();
        server.process_events(Duration::ZERO);

        let to_second = commands_received(&mut second);
        assert_eq!(to_second.len(), 2);
        assert!(matches!(
            to_second[1].payload,
            Payload::PlayerUpdate { player_id: 0, .. }
        ));

        let to_first = commands_received(&mut first);
        assert!(matches!(
            to_first.as_slice(),
            [Command {
                payload: Payload::PlayerUpdate { player_id: 1, .. },
                ..
            }]
        ));
    }

    #[test]
    fn latest_movement_is_applied_once_and_acknowledged() {
        let network = MemoryNetwork::new();
        let mut server = server(&network, ServerConfig::default());
        let mut client = network.connect(addr()).unwrap();
        server.process_events(Duration::ZERO);
        commands_received(&mut client);

        send_movement(&mut client, 100, Vec3::new(0.0, 0.0, 1.0));
        send_movement(&mut client, 101, Vec3::X);
        server.process_events(Duration::ZERO);
        server.run_tick();

        let dt = server.timestep.dt();
        let start = Vec3::new(0.0, 1.0, 0.0);
        let player = server.player(0).unwrap();
        assert_eq!(player.last_applied_tick, Some(101));
        assert!((player.position() - (start + Vec3::X * 5.0 * dt)).length() < 1e-5);

        let acks = commands_received(&mut client);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].payload, Payload::AckCommand { command_id: 101 });
        assert_eq!(acks[0].tick, 1);

        // Nothing new arrived: no movement, no ack.
        server.run_tick();
        assert!((server.player(0).unwrap().position().x - 5.0 * dt).abs() < 1e-5);
        assert!(commands_received(&mut client).is_empty());

        // A late, older command is ignored.
        send_movement(&mut client, 99, Vec3::X);
        server.process_events(Duration::ZERO);
        server.run_tick();
        assert_eq!(server.player(0).unwrap().last_applied_tick, Some(101));
    }

    #[test]
    fn snapshots_follow_the_interval() {
        let network = MemoryNetwork::new();
        let config = ServerConfig {
            snapshot_interval: 3,
            ..Default::default()
        };
        let mut server = server(&network, config);
        let mut client = network.connect(addr()).unwrap();
        server.process_events(Duration::ZERO);

        for _ in 0..6 {
            server.run_tick();
        }

        let ticks: Vec<u32> = snapshots_received(&mut client)
            .iter()
            .map(|s| s.server_tick)
            .collect();
        assert_eq!(ticks, vec![3, 6]);
    }

    #[test]
    fn disconnect_removes_player_and_tells_the_others() {
        let network = MemoryNetwork::new();
        let mut server = server(&network, ServerConfig::default());
        let mut stays = network.connect(addr()).unwrap();
        let mut leaves = network.connect(addr()).unwrap();
        server.process_events(Duration::ZERO);
        send_movement(&mut leaves, 1, Vec3::X);
        server.process_events(Duration::ZERO);
        assert_eq!(server.commands().len(2, CommandType::PlayerMovement), 1);
        commands_received(&mut stays);

        drop(leaves);
        server.process_events(Duration::ZERO);

        assert_eq!(server.player_count(), 1);
        assert!(server.player_for_peer(2).is_none());
        assert_eq!(server.commands().len(2, CommandType::PlayerMovement), 0);
        assert_eq!(
            commands_received(&mut stays)
                .iter()
                .map(|c| c.payload)
                .collect::<Vec<_>>(),
            vec![Payload::PlayerDisconnected { player_id: 1 }]
        );
    }

    #[test]
    fn full_server_refuses_connections() {
        let network = MemoryNetwork::new();
        let config = ServerConfig {
            max_players: 1,
            ..Default::default()
        };
        let mut server = server(&network, config);
        let _first = network.connect(addr()).unwrap();
        let mut second = network.connect(addr()).unwrap();
        server.process_events(Duration::ZERO);

        assert_eq!(server.player_count(), 1);
        assert!(
            server
                .drain_events()
                .any(|e| e == ServerEvent::ConnectionRefused {
                    peer: 2,
                    reason: "server full"
                })
        );
        assert_eq!(
            second.poll_event(Duration::ZERO).unwrap(),
            Some(TransportEvent::Connect(1))
        );
        assert_eq!(
            second.poll_event(Duration::ZERO).unwrap(),
            Some(TransportEvent::Disconnect(1))
        );
    }

    #[test]
    fn bad_messages_are_dropped_without_disconnecting() {
        let network = MemoryNetwork::new();
        let mut server = server(&network, ServerConfig::default());
        let mut client = network.connect(addr()).unwrap();
        server.process_events(Duration::ZERO);
        server.drain_events().for_each(drop);

        client
            .send(1, CHANNEL_COMMANDS, &[9, 0, 0, 0], Reliability::Reliable)
            .unwrap();
        let ack = Command::new(5, Payload::AckCommand { command_id: 1 }).encode();
        client
            .send(1, CHANNEL_COMMANDS, ack.as_bytes(), Reliability::Reliable)
            .unwrap();
        client
            .send(1, CHANNEL_SNAPSHOTS, &[0; 8], Reliability::Unreliable)
            .unwrap();
        server.process_events(Duration::ZERO);

        let dropped = server
            .drain_events()
            .filter(|e| matches!(e, ServerEvent::MessageDropped { peer: 1, .. }))
            .count();
        assert_eq!(dropped, 3);
        assert_eq!(server.player_count(), 1);
        assert_eq!(server.commands().len(1, CommandType::AckCommand), 0);
    }

    #[test]
    fn bots_spawn_and_wander() {
        let network = MemoryNetwork::new();
        let config = ServerConfig {
            bots: 2,
            ..Default::default()
        };
        let mut server = server(&network, config);
        assert_eq!(server.player_count(), 2);
        assert!(server.player(0).unwrap().is_bot());

        let before: Vec<Vec3> = (0..2).map(|id| server.player(id).unwrap().position()).collect();
        for _ in 0..30 {
            server.run_tick();
        }
        let moved = (0..2)
            .filter(|&id| server.player(id).unwrap().position() != before[id as usize])
            .count();
        assert!(moved > 0);

        // Humans take the next free id.
        let _client = network.connect(addr()).unwrap();
        server.process_events(Duration::ZERO);
        assert_eq!(server.player_for_peer(1).map(|p| p.id), Some(2));
    }

    #[test]
    fn shutdown_keeps_only_bots() {
        let network = MemoryNetwork::new();
        let config = ServerConfig {
            bots: 1,
            ..Default::default()
        };
        let mut server = server(&network, config);
        let mut client = network.connect(addr()).unwrap();
        server.process_events(Duration::ZERO);
        commands_received(&mut client);

        server.shutdown();
        assert_eq!(server.player_count(), 1);
        assert_eq!(
            client.poll_event(Duration::ZERO).unwrap(),
            Some(TransportEvent::Disconnect(1))
        );
    }

    #[test]
    fn oversized_snapshots_are_reported_once() {
        let network = MemoryNetwork::new();
        let config = ServerConfig {
            max_players: 40,
            bots: 35,
            ..Default::default()
        };
        let mut server = server(&network, config);
        let mut client = network.connect(addr()).unwrap();
        server.process_events(Duration::ZERO);
        server.drain_events().for_each(drop);
        assert!(server.snapshot().encoded_len() > MemoryHost::max_payload());

        for _ in 0..3 {
            server.run_tick();
        }

        let errors = server
            .drain_events()
            .filter(|e| matches!(e, ServerEvent::Error { .. }))
            .count();
        assert_eq!(errors, 1);
        assert!(snapshots_received(&mut client).is_empty());
    }

    #[test]
    fn clearing_the_running_flag_stops_the_loop_and_disconnects_clients() {
        let network = MemoryNetwork::new();
        let mut server = server(&network, ServerConfig::default());
        let mut client = network.connect(addr()).unwrap();
        server.process_events(Duration::ZERO);

        let running = server.running();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            running.store(false, Ordering::SeqCst);
        });
        server.run();
        stopper.join().unwrap();

        assert_eq!(server.player_count(), 0);
        let mut last = None;
        while let Some(event) = client.poll_event(Duration::ZERO).unwrap() {
            last = Some(event);
        }
        assert_eq!(last, Some(TransportEvent::Disconnect(1)));
    }
}

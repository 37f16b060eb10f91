use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use crate::buffer::Buffer;

use super::connection::{ConnectionState, PeerConnection, PeerTable};
use super::frame::{FrameHeader, FrameKind};
use super::protocol::{CHANNEL_COUNT, ChannelId, MAX_PACKET_SIZE};
use super::stats::{NetworkStats, PacketLossSimulation};
use super::transport::{Host, HostFactory, PeerId, Reliability, TransportError, TransportEvent};

const POLL_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub max_peers: usize,
    pub channels: usize,
    pub resend_interval: Duration,
    pub keepalive_interval: Duration,
    pub peer_timeout: Duration,
    pub packet_loss: PacketLossSimulation,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_peers: 32,
            channels: CHANNEL_COUNT,
            resend_interval: Duration::from_millis(100),
            keepalive_interval: Duration::from_secs(1),
            peer_timeout: Duration::from_secs(10),
            packet_loss: PacketLossSimulation::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Server,
    Client,
}

/// The socket plus everything touched when a datagram leaves it.
struct Link {
    socket: UdpSocket,
    stats: NetworkStats,
    packet_loss: PacketLossSimulation,
}

impl Link {
    fn transmit(&mut self, addr: SocketAddr, datagram: &[u8]) -> io::Result<()> {
        self.stats.packets_sent += 1;
        if self.packet_loss.should_drop() {
            self.stats.packets_dropped += 1;
            return Ok(());
        }
        let bytes = self.socket.send_to(datagram, addr)?;
        self.stats.bytes_sent += bytes as u64;
        Ok(())
    }

    fn send_frame(
        &mut self,
        peer: &mut PeerConnection,
        kind: FrameKind,
        channel: ChannelId,
        body: &[u8],
        now: Instant,
    ) -> io::Result<u32> {
        let (sequence, datagram) = peer.frame(kind, channel, body);
        peer.last_send_time = now;
        self.transmit(peer.addr, datagram.as_bytes())?;
        Ok(sequence)
    }
}

/// Reliable-UDP host: connection handshake, per-channel reliable ordering
/// via acks and resends, keepalives and timeouts.
pub struct UdpHost {
    link: Link,
    local_addr: SocketAddr,
    config: HostConfig,
    role: Role,
    peers: PeerTable,
    events: VecDeque<TransportEvent>,
    recv_buffer: [u8; MAX_PACKET_SIZE],
}

impl UdpHost {
    pub fn listen(addr: SocketAddr, config: HostConfig) -> Result<Self, TransportError> {
        let host = Self::bind(addr, config, Role::Server)?;
        log::info!("listening on {}", host.local_addr);
        Ok(host)
    }

    /// Starts the handshake. A `Connect` event follows once the server
    /// accepts; a `Disconnect` event if it never answers.
    pub fn connect(server: SocketAddr, config: HostConfig) -> Result<Self, TransportError> {
        let any: SocketAddr = if server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let mut host = Self::bind(any, config, Role::Client)?;

        let now = Instant::now();
        let channels = host.config.channels;
        let peer = host
            .peers
            .insert(server, channels, now)
            .ok_or(TransportError::UnknownPeer(0))?;
        host.link.send_frame(peer, FrameKind::Connect, 0, &[], now)?;
        log::info!("connecting to {} from {}", server, host.local_addr);
        Ok(host)
    }

    fn bind(addr: SocketAddr, config: HostConfig, role: Role) -> Result<Self, TransportError> {
        let socket =
            UdpSocket::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            link: Link {
                socket,
                stats: NetworkStats::default(),
                packet_loss: config.packet_loss.clone(),
            },
            local_addr,
            peers: PeerTable::new(config.max_peers),
            config,
            role,
            events: VecDeque::new(),
            recv_buffer: [0u8; MAX_PACKET_SIZE],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.link.stats
    }

    pub fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        self.peers.get(peer).map(|p| p.addr)
    }

    pub fn set_packet_loss(&mut self, packet_loss: PacketLossSimulation) {
        self.link.packet_loss = packet_loss;
    }

    /// Max payload accepted by [`Host::send`].
    pub fn max_payload() -> usize {
        MAX_PACKET_SIZE - FrameHeader::SIZE - FrameHeader::RELIABLE_PREFIX
    }

    /// Sends a disconnect to every peer and forgets them.
    pub fn shutdown(&mut self) {
        for id in self.peers.ids() {
            self.disconnect(id);
        }
    }

    /// Forgets a peer whose link is broken and reports it as disconnected.
    fn drop_peer(&mut self, id: PeerId, reason: &dyn fmt::Display) {
        let Some(mut connection) = self.peers.remove(id) else {
            return;
        };
        log::warn!("dropping peer {} ({}): {}", id, connection.addr, reason);
        let now = Instant::now();
        if let Err(e) = self
            .link
            .send_frame(&mut connection, FrameKind::Disconnect, 0, &[], now)
        {
            log::debug!("disconnect to {} not sent: {}", connection.addr, e);
        }
        self.events.push_back(TransportEvent::Disconnect(id));
    }

    fn receive(&mut self) -> Result<(), TransportError> {
        loop {
            match self.link.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    self.link.stats.packets_received += 1;
                    self.link.stats.bytes_received += size as u64;
                    let datagram = self.recv_buffer[..size].to_vec();
                    self.handle_datagram(&datagram, addr, Instant::now());
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable from a vanished peer; its timeout
                // takes care of it.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn handle_datagram(&mut self, data: &[u8], addr: SocketAddr, now: Instant) {
        let mut buf = Buffer::from_slice(data);
        let header = match FrameHeader::read_from(&mut buf) {
            Ok(header) => header,
            Err(e) => {
                log::debug!("ignoring datagram from {}: {}", addr, e);
                return;
            }
        };

        if header.kind == FrameKind::Connect {
            self.handle_connect(addr, now);
        }

        let Some(id) = self.peers.id_of(&addr) else {
            return;
        };
        let Some(peer) = self.peers.get_mut(id) else {
            return;
        };

        peer.touch(now);
        peer.resend.acknowledge(header.ack, header.ack_bits, now);
        self.link.stats.rtt_ms = peer.resend.rtt().smoothed_ms();
        self.link.stats.rtt_variance = peer.resend.rtt().variance_ms();

        if !peer.window.accept(header.sequence) {
            // The original may have arrived with its ack lost.
            if header.kind == FrameKind::ReliableData {
                let ack = peer.ack_frame(header.sequence);
                if let Err(e) = self.link.transmit(peer.addr, ack.as_bytes()) {
                    self.drop_peer(id, &e);
                }
            }
            return;
        }

        // Anything but a refusal proves the server accepted us, even if the
        // accept itself was lost.
        if self.role == Role::Client
            && peer.state == ConnectionState::Connecting
            && header.kind != FrameKind::Disconnect
        {
            peer.state = ConnectionState::Connected;
            log::info!("connected to {}", addr);
            self.events.push_back(TransportEvent::Connect(id));
        }

        match header.kind {
            FrameKind::Data => {
                if peer.state == ConnectionState::Connected {
                    self.events.push_back(TransportEvent::Receive {
                        peer: id,
                        channel: header.channel,
                        payload: Buffer::from_slice(buf.unread()),
                    });
                }
            }
            FrameKind::ReliableData => {
                let ack = peer.ack_frame(header.sequence);
                if let Err(e) = self.link.transmit(peer.addr, ack.as_bytes()) {
                    self.drop_peer(id, &e);
                    return;
                }

                let Ok(order) = buf.read::<u32>() else {
                    log::debug!("reliable frame from {} without order", addr);
                    return;
                };
                match peer.accept_reliable(header.channel, order, buf.unread().to_vec()) {
                    Ok(ready) => {
                        for payload in ready {
                            self.events.push_back(TransportEvent::Receive {
                                peer: id,
                                channel: header.channel,
                                payload: Buffer::from_bytes(payload),
                            });
                        }
                    }
                    Err(gap) => self.drop_peer(id, &gap),
                }
            }
            FrameKind::Disconnect => {
                self.peers.remove(id);
                log::info!("peer {} ({}) disconnected", id, addr);
                self.events.push_back(TransportEvent::Disconnect(id));
            }
            FrameKind::Connect | FrameKind::Accept | FrameKind::Ack | FrameKind::Ping => {}
        }
    }

    fn handle_connect(&mut self, addr: SocketAddr, now: Instant) {
        if self.role != Role::Server {
            return;
        }

        let is_new = self.peers.id_of(&addr).is_none();
        let channels = self.config.channels;
        let Some(peer) = self.peers.insert(addr, channels, now) else {
            log::warn!("refusing {}: server full", addr);
            let mut refused = PeerConnection::new(0, addr, 0, now);
            if let Err(e) = self
                .link
                .send_frame(&mut refused, FrameKind::Disconnect, 0, &[], now)
            {
                log::debug!("refusal to {} not sent: {}", addr, e);
            }
            return;
        };

        // A repeated connect means our accept was lost.
        let id = peer.id;
        if let Err(e) = self.link.send_frame(peer, FrameKind::Accept, 0, &[], now) {
            self.peers.remove(id);
            log::warn!("accept to {} not sent: {}", addr, e);
            if !is_new {
                self.events.push_back(TransportEvent::Disconnect(id));
            }
            return;
        }

        if is_new {
            peer.state = ConnectionState::Connected;
            log::info!("peer {} connected from {}", id, addr);
            self.events.push_back(TransportEvent::Connect(id));
        }
    }

    fn service(&mut self, now: Instant) {
        let mut broken = Vec::new();
        for peer in self.peers.iter_mut() {
            if let Err(e) = Self::service_peer(&mut self.link, &self.config, peer, now) {
                broken.push((peer.id, e));
            }
        }
        for (id, e) in broken {
            self.drop_peer(id, &e);
        }

        for id in self.peers.timed_out(self.config.peer_timeout, now) {
            if let Some(peer) = self.peers.remove(id) {
                log::info!("peer {} ({}) timed out", id, peer.addr);
            }
            self.events.push_back(TransportEvent::Disconnect(id));
        }
    }

    /// Connect retries, due resends and keepalives for one peer.
    fn service_peer(
        link: &mut Link,
        config: &HostConfig,
        peer: &mut PeerConnection,
        now: Instant,
    ) -> io::Result<()> {
        if peer.state == ConnectionState::Connecting {
            if now.duration_since(peer.last_send_time) >= config.resend_interval {
                link.send_frame(peer, FrameKind::Connect, 0, &[], now)?;
            }
            return Ok(());
        }

        for datagram in peer.resend.due(now, config.resend_interval) {
            link.stats.packets_resent += 1;
            link.transmit(peer.addr, &datagram)?;
            peer.last_send_time = now;
        }

        if now.duration_since(peer.last_send_time) >= config.keepalive_interval {
            link.send_frame(peer, FrameKind::Ping, 0, &[], now)?;
        }
        Ok(())
    }
}

impl Host for UdpHost {
    fn poll_event(&mut self, timeout: Duration) -> Result<Option<TransportEvent>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.events.pop_front() {
                return Ok(Some(event));
            }

            self.receive()?;
            let now = Instant::now();
            self.service(now);

            if let Some(event) = self.events.pop_front() {
                return Ok(Some(event));
            }
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_SLEEP.min(deadline - now));
        }
    }

    /// Transmit failures and a full resend queue are fatal for the peer: it
    /// is dropped, a `Disconnect` event follows and the error is returned.
    fn send(
        &mut self,
        peer: PeerId,
        channel: ChannelId,
        payload: &[u8],
        reliability: Reliability,
    ) -> Result<(), TransportError> {
        let max = Self::max_payload();
        if payload.len() > max {
            return Err(TransportError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }
        if channel as usize >= self.config.channels {
            return Err(TransportError::InvalidChannel(channel));
        }

        let connection = self
            .peers
            .get_mut(peer)
            .filter(|p| p.state == ConnectionState::Connected)
            .ok_or(TransportError::UnknownPeer(peer))?;
        let now = Instant::now();

        let sent = match reliability {
            Reliability::Unreliable => self
                .link
                .send_frame(connection, FrameKind::Data, channel, payload, now)
                .map(|_| ()),
            Reliability::Reliable => {
                if connection.resend.is_full() {
                    let error = TransportError::Backlogged(peer);
                    self.drop_peer(peer, &error);
                    return Err(error);
                }
                let order = connection
                    .next_send_order(channel)
                    .ok_or(TransportError::InvalidChannel(channel))?;
                let mut body = Buffer::with_capacity(FrameHeader::RELIABLE_PREFIX + payload.len());
                body.write(&order);
                body.append_bytes(payload);

                let (sequence, datagram) =
                    connection.frame(FrameKind::ReliableData, channel, body.as_bytes());
                connection.last_send_time = now;
                let sent = self.link.transmit(connection.addr, datagram.as_bytes());
                connection.resend.push(sequence, datagram.into_bytes(), now);
                sent
            }
        };

        if let Err(e) = sent {
            self.drop_peer(peer, &e);
            return Err(e.into());
        }
        Ok(())
    }

    fn disconnect(&mut self, peer: PeerId) {
        let Some(mut connection) = self.peers.remove(peer) else {
            return;
        };
        let now = Instant::now();
        if let Err(e) = self
            .link
            .send_frame(&mut connection, FrameKind::Disconnect, 0, &[], now)
        {
            log::debug!("disconnect to {} not sent: {}", connection.addr, e);
        }
    }

    fn peers(&self) -> Vec<PeerId> {
        self.peers
            .ids()
            .into_iter()
            .filter(|id| {
                self.peers
                    .get(*id)
                    .is_some_and(|p| p.state == ConnectionState::Connected)
            })
            .collect()
    }
}

impl Drop for UdpHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug, Clone, Default)]
pub struct UdpHostFactory {
    pub config: HostConfig,
}

impl UdpHostFactory {
    pub fn new(config: HostConfig) -> Self {
        Self { config }
    }
}

impl HostFactory for UdpHostFactory {
    type Host = UdpHost;

    fn listen(&self, addr: SocketAddr) -> Result<UdpHost, TransportError> {
        UdpHost::listen(addr, self.config.clone())
    }

    fn connect(&self, addr: SocketAddr) -> Result<UdpHost, TransportError> {
        UdpHost::connect(addr, self.config.clone())
    }
}

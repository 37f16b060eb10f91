use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::buffer::Buffer;

use super::frame::{FrameHeader, FrameKind};
use super::protocol::ChannelId;
use super::tracking::{ReceiveWindow, ResendQueue};
use super::transport::PeerId;

/// Unacknowledged reliable datagrams per peer. Also bounds how far ahead
/// of delivery a reliable message may arrive.
pub const MAX_PENDING_RELIABLE: usize = 256;

/// A reliable message arrived further ahead of delivery than any sender
/// can legitimately be, so an earlier one is never coming.
#[derive(Debug, thiserror::Error)]
#[error("reliable message {order} on channel {channel} is {ahead} ahead of delivery")]
pub struct ReliableGap {
    pub channel: ChannelId,
    pub order: u32,
    pub ahead: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
}

/// Reliable ordering state for one channel.
#[derive(Debug, Default)]
struct ChannelState {
    next_send_order: u32,
    next_recv_order: u32,
    held: BTreeMap<u32, Vec<u8>>,
}

#[derive(Debug)]
pub struct PeerConnection {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub state: ConnectionState,
    pub last_receive_time: Instant,
    pub last_send_time: Instant,
    pub resend: ResendQueue,
    pub window: ReceiveWindow,
    send_sequence: u32,
    channels: Vec<ChannelState>,
}

impl PeerConnection {
    pub fn new(id: PeerId, addr: SocketAddr, channel_count: usize, now: Instant) -> Self {
        Self {
            id,
            addr,
            state: ConnectionState::Connecting,
            last_receive_time: now,
            last_send_time: now,
            resend: ResendQueue::new(MAX_PENDING_RELIABLE),
            window: ReceiveWindow::new(),
            send_sequence: 1,
            channels: (0..channel_count).map(|_| ChannelState::default()).collect(),
        }
    }

    pub fn is_timed_out(&self, timeout: Duration, now: Instant) -> bool {
        now.duration_since(self.last_receive_time) > timeout
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_receive_time = now;
    }

    /// Builds a datagram carrying the current ack state.
    pub fn frame(&mut self, kind: FrameKind, channel: ChannelId, body: &[u8]) -> (u32, Buffer) {
        let (ack, ack_bits) = self.window.ack_header();
        self.frame_with_ack(kind, channel, ack, ack_bits, body)
    }

    /// Builds an `Ack` datagram for exactly `sequence`.
    pub fn ack_frame(&mut self, sequence: u32) -> Buffer {
        self.frame_with_ack(FrameKind::Ack, 0, sequence, 0, &[]).1
    }

    fn frame_with_ack(
        &mut self,
        kind: FrameKind,
        channel: ChannelId,
        ack: u32,
        ack_bits: u32,
        body: &[u8],
    ) -> (u32, Buffer) {
        let sequence = self.send_sequence;
        self.send_sequence = self.send_sequence.wrapping_add(1).max(1);

        let mut buf = Buffer::with_capacity(FrameHeader::SIZE + body.len());
        FrameHeader {
            kind,
            channel,
            sequence,
            ack,
            ack_bits,
        }
        .write_to(&mut buf);
        buf.append_bytes(body);
        (sequence, buf)
    }

    pub fn next_send_order(&mut self, channel: ChannelId) -> Option<u32> {
        let state = self.channels.get_mut(channel as usize)?;
        let order = state.next_send_order;
        state.next_send_order = state.next_send_order.wrapping_add(1);
        Some(order)
    }

    /// Accepts a reliable message and returns every payload now deliverable
    /// in order. Duplicates and unknown channels yield nothing.
    pub fn accept_reliable(
        &mut self,
        channel: ChannelId,
        order: u32,
        payload: Vec<u8>,
    ) -> Result<Vec<Vec<u8>>, ReliableGap> {
        let Some(state) = self.channels.get_mut(channel as usize) else {
            return Ok(Vec::new());
        };

        let ahead = order.wrapping_sub(state.next_recv_order);
        if ahead > u32::MAX / 2 {
            return Ok(Vec::new());
        }
        if ahead as usize >= MAX_PENDING_RELIABLE {
            return Err(ReliableGap {
                channel,
                order,
                ahead,
            });
        }
        state.held.entry(order).or_insert(payload);

        let mut ready = Vec::new();
        while let Some(payload) = state.held.remove(&state.next_recv_order) {
            ready.push(payload);
            state.next_recv_order = state.next_recv_order.wrapping_add(1);
        }
        Ok(ready)
    }
}

#[derive(Debug)]
pub struct PeerTable {
    by_addr: HashMap<SocketAddr, PeerId>,
    peers: HashMap<PeerId, PeerConnection>,
    next_peer_id: PeerId,
    max_peers: usize,
}

impl PeerTable {
    pub fn new(max_peers: usize) -> Self {
        Self {
            by_addr: HashMap::new(),
            peers: HashMap::new(),
            next_peer_id: 1,
            max_peers,
        }
    }

    /// `None` when the table is full.
    pub fn insert(
        &mut self,
        addr: SocketAddr,
        channel_count: usize,
        now: Instant,
    ) -> Option<&mut PeerConnection> {
        if let Some(&id) = self.by_addr.get(&addr) {
            return self.peers.get_mut(&id);
        }

        if self.peers.len() >= self.max_peers {
            return None;
        }

        let id = self.next_peer_id;
        self.next_peer_id = self.next_peer_id.wrapping_add(1).max(1);

        self.by_addr.insert(addr, id);
        Some(
            self.peers
                .entry(id)
                .or_insert_with(|| PeerConnection::new(id, addr, channel_count, now)),
        )
    }

    pub fn get(&self, id: PeerId) -> Option<&PeerConnection> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut PeerConnection> {
        self.peers.get_mut(&id)
    }

    pub fn id_of(&self, addr: &SocketAddr) -> Option<PeerId> {
        self.by_addr.get(addr).copied()
    }

    pub fn remove(&mut self, id: PeerId) -> Option<PeerConnection> {
        let peer = self.peers.remove(&id)?;
        self.by_addr.remove(&peer.addr);
        Some(peer)
    }

    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerConnection> {
        self.peers.values_mut()
    }

    pub fn timed_out(&self, timeout: Duration, now: Instant) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|p| p.is_timed_out(timeout, now))
            .map(|p| p.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

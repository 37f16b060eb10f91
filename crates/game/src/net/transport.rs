use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::buffer::Buffer;

use super::protocol::ChannelId;

pub type PeerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    Reliable,
    Unreliable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connect(PeerId),
    Receive {
        peer: PeerId,
        channel: ChannelId,
        payload: Buffer,
    },
    Disconnect(PeerId),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("invalid channel {0}")]
    InvalidChannel(ChannelId),
    #[error("peer {0} has too many unacknowledged reliable messages")]
    Backlogged(PeerId),
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("transport i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// A message-delivery endpoint with per-peer channels.
pub trait Host {
    /// Waits at most `timeout` for the next event.
    fn poll_event(&mut self, timeout: Duration) -> Result<Option<TransportEvent>, TransportError>;

    /// Reliable messages are delivered in order within their channel.
    /// There is no ordering across channels.
    fn send(
        &mut self,
        peer: PeerId,
        channel: ChannelId,
        payload: &[u8],
        reliability: Reliability,
    ) -> Result<(), TransportError>;

    fn disconnect(&mut self, peer: PeerId);

    fn peers(&self) -> Vec<PeerId>;

    fn broadcast(
        &mut self,
        channel: ChannelId,
        payload: &[u8],
        reliability: Reliability,
    ) -> Result<(), TransportError> {
        for peer in self.peers() {
            self.send(peer, channel, payload, reliability)?;
        }
        Ok(())
    }
}

/// Creates hosts. Passed explicitly to whatever needs to open connections.
pub trait HostFactory {
    type Host: Host;

    fn listen(&self, addr: SocketAddr) -> Result<Self::Host, TransportError>;

    fn connect(&self, addr: SocketAddr) -> Result<Self::Host, TransportError>;
}

/// Resolves a literal IP or a hostname. `None` when resolution fails.
pub fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    resolve_literal(host, port).or_else(|| resolve_hostname(host, port))
}

pub fn resolve_literal(host: &str, port: u16) -> Option<SocketAddr> {
    host.parse::<IpAddr>()
        .ok()
        .map(|ip| SocketAddr::new(ip, port))
}

pub fn resolve_hostname(host: &str, port: u16) -> Option<SocketAddr> {
    match (host, port).to_socket_addrs() {
        Ok(addrs) => {
            let addrs: Vec<SocketAddr> = addrs.collect();
            addrs
                .iter()
                .find(|a| a.is_ipv4())
                .or_else(|| addrs.first())
                .copied()
        }
        Err(e) => {
            log::warn!("failed to resolve {}: {}", host, e);
            None
        }
    }
}

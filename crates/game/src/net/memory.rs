use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::buffer::Buffer;

use super::protocol::{CHANNEL_COUNT, ChannelId, MAX_PACKET_SIZE};
use super::transport::{
    Host, HostFactory, PeerId, Reliability, TransportError, TransportEvent,
};

type EndpointId = u32;

#[derive(Default)]
struct Endpoint {
    events: VecDeque<TransportEvent>,
    /// Local peer id to the remote endpoint and the id it knows us by.
    links: HashMap<PeerId, (EndpointId, PeerId)>,
    next_peer_id: PeerId,
}

impl Endpoint {
    fn link(&mut self, remote: EndpointId, remote_peer: PeerId) -> PeerId {
        self.next_peer_id += 1;
        let id = self.next_peer_id;
        self.links.insert(id, (remote, remote_peer));
        id
    }
}

#[derive(Default)]
struct Inner {
    endpoints: HashMap<EndpointId, Endpoint>,
    listeners: HashMap<SocketAddr, EndpointId>,
    closed: HashSet<EndpointId>,
    next_endpoint: EndpointId,
}

impl Inner {
    fn open(&mut self) -> EndpointId {
        self.next_endpoint += 1;
        let id = self.next_endpoint;
        self.endpoints.insert(id, Endpoint::default());
        id
    }
}

#[derive(Default)]
struct Shared {
    inner: Mutex<Inner>,
    ready: Condvar,
}

/// An in-process network. Every message is delivered, in order, and
/// nothing is ever dropped. Hosts made from one network only see each other.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    shared: Arc<Shared>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn host(&self, endpoint: EndpointId) -> MemoryHost {
        MemoryHost {
            network: self.clone(),
            endpoint,
        }
    }
}

impl HostFactory for MemoryNetwork {
    type Host = MemoryHost;

    fn listen(&self, addr: SocketAddr) -> Result<MemoryHost, TransportError> {
        let mut inner = self.lock();
        if inner.listeners.contains_key(&addr) {
            return Err(TransportError::Bind {
                addr,
                source: std::io::ErrorKind::AddrInUse.into(),
            });
        }
        let endpoint = inner.open();
        inner.listeners.insert(addr, endpoint);
        Ok(self.host(endpoint))
    }

    /// Connects immediately. Both sides see a `Connect` event on their next poll.
    fn connect(&self, addr: SocketAddr) -> Result<MemoryHost, TransportError> {
        let mut inner = self.lock();
        let server = inner
            .listeners
            .get(&addr)
            .copied()
            .filter(|id| !inner.closed.contains(id))
            .ok_or_else(|| TransportError::Io(std::io::ErrorKind::ConnectionRefused.into()))?;
        let client = inner.open();
        // A fresh endpoint hands out 1 for its first link.
        let client_peer: PeerId = 1;

        let server_peer = inner
            .endpoints
            .get_mut(&server)
            .map(|endpoint| {
                let id = endpoint.link(client, client_peer);
                endpoint.events.push_back(TransportEvent::Connect(id));
                id
            })
            .ok_or(TransportError::UnknownPeer(0))?;
        if let Some(endpoint) = inner.endpoints.get_mut(&client) {
            endpoint.link(server, server_peer);
            endpoint.events.push_back(TransportEvent::Connect(client_peer));
        }
        drop(inner);
        self.shared.ready.notify_all();

        Ok(self.host(client))
    }
}

pub struct MemoryHost {
    network: MemoryNetwork,
    endpoint: EndpointId,
}

impl MemoryHost {
    pub fn max_payload() -> usize {
        MAX_PACKET_SIZE
    }
}

impl Host for MemoryHost {
    fn poll_event(&mut self, timeout: Duration) -> Result<Option<TransportEvent>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.network.lock();
        loop {
            if let Some(event) = inner
                .endpoints
                .get_mut(&self.endpoint)
                .and_then(|e| e.events.pop_front())
            {
                return Ok(Some(event));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            inner = self
                .network
                .shared
                .ready
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn send(
        &mut self,
        peer: PeerId,
        channel: ChannelId,
        payload: &[u8],
        _reliability: Reliability,
    ) -> Result<(), TransportError> {
        if payload.len() > Self::max_payload() {
            return Err(TransportError::PayloadTooLarge {
                len: payload.len(),
                max: Self::max_payload(),
            });
        }
        if channel as usize >= CHANNEL_COUNT {
            return Err(TransportError::InvalidChannel(channel));
        }

        let mut inner = self.network.lock();
        let (remote, remote_peer) = inner
            .endpoints
            .get(&self.endpoint)
            .and_then(|e| e.links.get(&peer))
            .copied()
            .ok_or(TransportError::UnknownPeer(peer))?;

        if let Some(endpoint) = inner.endpoints.get_mut(&remote) {
            endpoint.events.push_back(TransportEvent::Receive {
                peer: remote_peer,
                channel,
                payload: Buffer::from_slice(payload),
            });
        }
        drop(inner);
        self.network.shared.ready.notify_all();
        Ok(())
    }

    fn disconnect(&mut self, peer: PeerId) {
        let mut inner = self.network.lock();
        let Some((remote, remote_peer)) = inner
            .endpoints
            .get_mut(&self.endpoint)
            .and_then(|e| e.links.remove(&peer))
        else {
            return;
        };

        if let Some(endpoint) = inner.endpoints.get_mut(&remote) {
            endpoint.links.remove(&remote_peer);
            endpoint
                .events
                .push_back(TransportEvent::Disconnect(remote_peer));
        }
        drop(inner);
        self.network.shared.ready.notify_all();
    }

    fn peers(&self) -> Vec<PeerId> {
        let inner = self.network.lock();
        let mut peers: Vec<PeerId> = inner
            .endpoints
            .get(&self.endpoint)
            .map(|e| e.links.keys().copied().collect())
            .unwrap_or_default();
        peers.sort_unstable();
        peers
    }
}

impl Drop for MemoryHost {
    fn drop(&mut self) {
        for peer in self.peers() {
            self.disconnect(peer);
        }
        let mut inner = self.network.lock();
        let endpoint = self.endpoint;
        inner.closed.insert(endpoint);
        inner.endpoints.remove(&endpoint);
        inner.listeners.retain(|_, listener| *listener != endpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:27015".parse().unwrap()
    }

    fn next(host: &mut MemoryHost) -> TransportEvent {
        host.poll_event(Duration::from_millis(100)).unwrap().unwrap()
    }

    #[test]
    fn connect_is_seen_by_both_sides() {
        let network = MemoryNetwork::new();
        let mut server = network.listen(addr()).unwrap();
        let mut client = network.connect(addr()).unwrap();

        assert_eq!(next(&mut server), TransportEvent::Connect(1));
        assert_eq!(next(&mut client), TransportEvent::Connect(1));
        assert_eq!(server.peers(), vec![1]);
        assert_eq!(client.peers(), vec![1]);
    }

    #[test]
    fn messages_arrive_in_order_on_their_channel() {
        let network = MemoryNetwork::new();
        let mut server = network.listen(addr()).unwrap();
        let mut client = network.connect(addr()).unwrap();
        next(&mut server);
        next(&mut client);

        client.send(1, 0, b"one", Reliability::Reliable).unwrap();
        client.send(1, 1, b"two", Reliability::Unreliable).unwrap();

        let TransportEvent::Receive { channel, payload, .. } = next(&mut server) else {
            panic!("expected receive");
        };
        assert_eq!((channel, payload.as_bytes()), (0, &b"one"[..]));

        let TransportEvent::Receive { channel, payload, .. } = next(&mut server) else {
            panic!("expected receive");
        };
        assert_eq!((channel, payload.as_bytes()), (1, &b"two"[..]));
    }

    #[test]
    fn disconnect_and_drop_notify_the_other_side() {
        let network = MemoryNetwork::new();
        let mut server = network.listen(addr()).unwrap();
        let mut first = network.connect(addr()).unwrap();
        let second = network.connect(addr()).unwrap();
        next(&mut server);
        next(&mut server);
        next(&mut first);

        first.disconnect(1);
        assert_eq!(next(&mut server), TransportEvent::Disconnect(1));

        drop(second);
        assert_eq!(next(&mut server), TransportEvent::Disconnect(2));
        assert!(server.peers().is_empty());
    }

    #[test]
    fn invalid_sends_are_rejected() {
        let network = MemoryNetwork::new();
        let mut server = network.listen(addr()).unwrap();

        assert!(matches!(
            server.send(9, 0, b"x", Reliability::Reliable),
            Err(TransportError::UnknownPeer(9))
        ));
        assert!(matches!(
            server.send(1, 7, b"x", Reliability::Reliable),
            Err(TransportError::InvalidChannel(7))
        ));
        assert!(network.connect("127.0.0.1:1".parse().unwrap()).is_err());
        assert!(server.poll_event(Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn dropped_listener_frees_its_address() {
        let network = MemoryNetwork::new();
        let server = network.listen(addr()).unwrap();
        assert!(matches!(network.listen(addr()), Err(TransportError::Bind { .. })));

        drop(server);
        assert!(network.connect(addr()).is_err());

        let mut server = network.listen(addr()).unwrap();
        let mut client = network.connect(addr()).unwrap();
        assert_eq!(next(&mut server), TransportEvent::Connect(1));
        assert_eq!(next(&mut client), TransportEvent::Connect(1));
    }
}

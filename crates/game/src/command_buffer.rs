use std::collections::HashMap;

use crate::net::{Command, CommandType, PeerId};
use crate::ring::RingBuffer;

/// Commands retained per peer and command type.
pub const COMMAND_HISTORY: usize = 5;

/// Sliding window of the most recently received commands, one ring per
/// `(peer, command type)`. Ring order is arrival order, which is not
/// necessarily send order.
#[derive(Debug)]
pub struct CommandBuffer {
    rings: HashMap<(PeerId, CommandType), RingBuffer<Command>>,
    capacity: usize,
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::with_capacity(COMMAND_HISTORY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rings: HashMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&mut self, peer: PeerId, command: Command) {
        let capacity = self.capacity;
        let evicted = self
            .rings
            .entry((peer, command.kind()))
            .or_insert_with(|| RingBuffer::new(capacity))
            .push(command);

        if let Some(old) = evicted {
            log::trace!(
                "peer {} evicted {:?} from tick {}",
                peer,
                old.kind(),
                old.tick
            );
        }
    }

    pub fn last(&self, peer: PeerId, kind: CommandType) -> Option<&Command> {
        self.ring(peer, kind)?.last()
    }

    /// Index 0 is the oldest retained command, `-1` the most recent.
    pub fn at(&self, peer: PeerId, kind: CommandType, index: isize) -> Option<&Command> {
        let ring = self.ring(peer, kind)?;
        match index {
            -1 => ring.last(),
            i if i >= 0 => ring.get(i as usize),
            _ => None,
        }
    }

    pub fn filter<F>(&self, peer: PeerId, kind: CommandType, mut predicate: F) -> Vec<&Command>
    where
        F: FnMut(&Command) -> bool,
    {
        self.iter(peer, kind).filter(|c| predicate(*c)).collect()
    }

    pub fn first_matching<F>(
        &self,
        peer: PeerId,
        kind: CommandType,
        mut predicate: F,
    ) -> Option<&Command>
    where
        F: FnMut(&Command) -> bool,
    {
        self.iter(peer, kind).find(|c| predicate(*c))
    }

    pub fn last_matching<F>(
        &self,
        peer: PeerId,
        kind: CommandType,
        mut predicate: F,
    ) -> Option<&Command>
    where
        F: FnMut(&Command) -> bool,
    {
        self.iter(peer, kind).rev().find(|c| predicate(*c))
    }

    /// Oldest to newest within the retained window.
    pub fn iter(
        &self,
        peer: PeerId,
        kind: CommandType,
    ) -> impl DoubleEndedIterator<Item = &Command> + '_ {
        self.ring(peer, kind).into_iter().flat_map(|ring| ring.iter())
    }

    pub fn len(&self, peer: PeerId, kind: CommandType) -> usize {
        self.ring(peer, kind).map_or(0, RingBuffer::len)
    }

    pub fn remove_peer(&mut self, peer: PeerId) {
        self.rings.retain(|(owner, _), _| *owner != peer);
    }

    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.rings.keys().map(|(peer, _)| *peer).collect();
        peers.sort_unstable();
        peers.dedup();
        peers
    }

    pub fn clear(&mut self) {
        self.rings.clear();
    }

    fn ring(&self, peer: PeerId, kind: CommandType) -> Option<&RingBuffer<Command>> {
        self.rings.get(&(peer, kind))
    }
}

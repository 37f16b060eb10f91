use std::collections::BTreeMap;

use crate::buffer::Buffer;
use crate::net::{PlayerId, ProtocolError};

use super::entity::{EntityId, PlayerSnapshot, ProjectileState};

/// World state at one server tick.
///
/// Wire layout:
/// `[server_tick u32][player_count u8][(player_id u8, PlayerSnapshot) * n]`
/// `[projectile_count u16][(entity_id u32, ProjectileState) * m]`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub server_tick: u32,
    pub players: BTreeMap<PlayerId, PlayerSnapshot>,
    pub projectiles: BTreeMap<EntityId, ProjectileState>,
}

impl Snapshot {
    pub fn new(server_tick: u32) -> Self {
        Self {
            server_tick,
            ..Default::default()
        }
    }

    pub fn with_player(mut self, id: PlayerId, player: PlayerSnapshot) -> Self {
        self.players.insert(id, player);
        self
    }

    /// Tick and both counts.
    pub const HEADER_SIZE: usize = 4 + 1 + 2;
    pub const PLAYER_ENTRY_SIZE: usize = 1 + PlayerSnapshot::SIZE;
    pub const PROJECTILE_ENTRY_SIZE: usize = 4 + ProjectileState::SIZE;

    pub fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE
            + self.players.len() * Self::PLAYER_ENTRY_SIZE
            + self.projectiles.len() * Self::PROJECTILE_ENTRY_SIZE
    }

    /// Most players a projectile-free snapshot can carry in `max_bytes`.
    pub fn max_players_within(max_bytes: usize) -> usize {
        (max_bytes.saturating_sub(Self::HEADER_SIZE) / Self::PLAYER_ENTRY_SIZE)
            .min(u8::MAX as usize)
    }

    pub fn write_to(&self, buf: &mut Buffer) -> Result<(), ProtocolError> {
        let player_count = u8::try_from(self.players.len())
            .map_err(|_| ProtocolError::TooManyPlayers(self.players.len()))?;
        let projectile_count = u16::try_from(self.projectiles.len())
            .map_err(|_| ProtocolError::TooManyProjectiles(self.projectiles.len()))?;

        buf.reserve(self.encoded_len());
        buf.write(&self.server_tick);

        buf.write(&player_count);
        for (id, player) in &self.players {
            buf.write(id);
            player.write_to(buf);
        }

        buf.write(&projectile_count);
        for (id, projectile) in &self.projectiles {
            buf.write(id);
            projectile.write_to(buf);
        }

        Ok(())
    }

    pub fn encode(&self) -> Result<Buffer, ProtocolError> {
        let mut buf = Buffer::with_capacity(self.encoded_len());
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn decode(buf: &mut Buffer) -> Result<Self, ProtocolError> {
        let mut snapshot = Self::new(buf.read()?);

        let player_count: u8 = buf.read()?;
        for _ in 0..player_count {
            let id: PlayerId = buf.read()?;
            snapshot.players.insert(id, PlayerSnapshot::read_from(buf)?);
        }

        let projectile_count: u16 = buf.read()?;
        for _ in 0..projectile_count {
            let id: EntityId = buf.read()?;
            snapshot
                .projectiles
                .insert(id, ProjectileState::read_from(buf)?);
        }

        Ok(snapshot)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = Buffer::from_slice(bytes);
        let snapshot = Self::decode(&mut buf)?;
        match buf.remaining() {
            0 => Ok(snapshot),
            extra => Err(ProtocolError::TrailingBytes(extra)),
        }
    }
}

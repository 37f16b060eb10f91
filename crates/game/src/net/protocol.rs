use crate::buffer::BufferError;

pub const MAX_PACKET_SIZE: usize = 1200;
pub const PROTOCOL_MAGIC: u32 = 0x564F_584E;
pub const DEFAULT_PORT: u16 = 27015;
pub const DEFAULT_TICK_RATE: u32 = 60;

pub type ChannelId = u8;

/// Commands in both directions. Reliable traffic lives here.
pub const CHANNEL_COMMANDS: ChannelId = 0;
/// World snapshots, sent unreliably.
pub const CHANNEL_SNAPSHOTS: ChannelId = 1;
pub const CHANNEL_COUNT: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown command type {0}")]
    UnknownCommandType(u32),
    #[error("unknown weapon state {0}")]
    UnknownWeaponState(u8),
    #[error("snapshot holds {0} players, the wire format allows 255")]
    TooManyPlayers(usize),
    #[error("snapshot holds {0} projectiles, the wire format allows 65535")]
    TooManyProjectiles(usize),
    #[error("bad frame magic {0:#010x}")]
    BadMagic(u32),
    #[error("unknown frame kind {0}")]
    UnknownFrameKind(u8),
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

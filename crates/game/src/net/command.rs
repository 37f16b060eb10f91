use glam::Vec3;

use crate::buffer::{Buffer, Wire};

use super::protocol::ProtocolError;

pub type PlayerId = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum CommandType {
    ClientConfig = 0,
    PlayerUpdate = 1,
    PlayerDisconnected = 2,
    AckCommand = 3,
    PlayerMovement = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ServerToClient,
    ClientToServer,
}

impl CommandType {
    pub fn direction(self) -> Direction {
        match self {
            Self::PlayerMovement => Direction::ClientToServer,
            Self::ClientConfig
            | Self::PlayerUpdate
            | Self::PlayerDisconnected
            | Self::AckCommand => Direction::ServerToClient,
        }
    }

    /// Fixed payload size that follows the header on the wire.
    pub fn payload_len(self) -> usize {
        match self {
            Self::ClientConfig => u8::SIZE + f64::SIZE,
            Self::PlayerUpdate => u8::SIZE + Vec3::SIZE,
            Self::PlayerDisconnected => u8::SIZE,
            Self::AckCommand => u32::SIZE,
            Self::PlayerMovement => Vec3::SIZE,
        }
    }
}

impl TryFrom<u32> for CommandType {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::ClientConfig),
            1 => Ok(Self::PlayerUpdate),
            2 => Ok(Self::PlayerDisconnected),
            3 => Ok(Self::AckCommand),
            4 => Ok(Self::PlayerMovement),
            other => Err(ProtocolError::UnknownCommandType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: CommandType,
    pub tick: u32,
}

impl Header {
    pub const SIZE: usize = u32::SIZE * 2;

    pub fn write_to(&self, buf: &mut Buffer) {
        buf.write(&(self.kind as u32));
        buf.write(&self.tick);
    }

    pub fn read_from(buf: &mut Buffer) -> Result<Self, ProtocolError> {
        let kind = CommandType::try_from(buf.read::<u32>()?)?;
        let tick = buf.read::<u32>()?;
        Ok(Self { kind, tick })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    ClientConfig { player_id: PlayerId, sample_rate: f64 },
    PlayerUpdate { player_id: PlayerId, pos: Vec3 },
    PlayerDisconnected { player_id: PlayerId },
    AckCommand { command_id: u32 },
    PlayerMovement { move_dir: Vec3 },
}

impl Payload {
    pub fn kind(&self) -> CommandType {
        match self {
            Self::ClientConfig { .. } => CommandType::ClientConfig,
            Self::PlayerUpdate { .. } => CommandType::PlayerUpdate,
            Self::PlayerDisconnected { .. } => CommandType::PlayerDisconnected,
            Self::AckCommand { .. } => CommandType::AckCommand,
            Self::PlayerMovement { .. } => CommandType::PlayerMovement,
        }
    }

    fn write_to(&self, buf: &mut Buffer) {
        match self {
            Self::ClientConfig {
                player_id,
                sample_rate,
            } => {
                buf.write(player_id);
                buf.write(sample_rate);
            }
            Self::PlayerUpdate { player_id, pos } => {
                buf.write(player_id);
                buf.write(pos);
            }
            Self::PlayerDisconnected { player_id } => buf.write(player_id),
            Self::AckCommand { command_id } => buf.write(command_id),
            Self::PlayerMovement { move_dir } => buf.write(move_dir),
        }
    }

    fn read_from(kind: CommandType, buf: &mut Buffer) -> Result<Self, ProtocolError> {
        let payload = match kind {
            CommandType::ClientConfig => Self::ClientConfig {
                player_id: buf.read()?,
                sample_rate: buf.read()?,
            },
            CommandType::PlayerUpdate => Self::PlayerUpdate {
                player_id: buf.read()?,
                pos: buf.read()?,
            },
            CommandType::PlayerDisconnected => Self::PlayerDisconnected {
                player_id: buf.read()?,
            },
            CommandType::AckCommand => Self::AckCommand {
                command_id: buf.read()?,
            },
            CommandType::PlayerMovement => Self::PlayerMovement {
                move_dir: buf.read()?,
            },
        };
        Ok(payload)
    }
}

/// A header plus the payload selected by its type tag. The tag is derived
/// from the payload variant, so the two can never disagree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    pub tick: u32,
    pub payload: Payload,
}

impl Command {
    pub fn new(tick: u32, payload: Payload) -> Self {
        Self { tick, payload }
    }

    pub fn kind(&self) -> CommandType {
        self.payload.kind()
    }

    pub fn header(&self) -> Header {
        Header {
            kind: self.kind(),
            tick: self.tick,
        }
    }

    pub fn encoded_len(&self) -> usize {
        Header::SIZE + self.kind().payload_len()
    }

    pub fn write_to(&self, buf: &mut Buffer) {
        buf.reserve(self.encoded_len());
        self.header().write_to(buf);
        self.payload.write_to(buf);
    }

    pub fn encode(&self) -> Buffer {
        let mut buf = Buffer::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf
    }

    /// Reads one command at the cursor. The type tag is always read first.
    pub fn decode(buf: &mut Buffer) -> Result<Self, ProtocolError> {
        let header = Header::read_from(buf)?;
        let payload = Payload::read_from(header.kind, buf)?;
        Ok(Self {
            tick: header.tick,
            payload,
        })
    }

    /// Decodes a datagram holding exactly one command.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = Buffer::from_slice(bytes);
        let command = Self::decode(&mut buf)?;
        match buf.remaining() {
            0 => Ok(command),
            extra => Err(ProtocolError::TrailingBytes(extra)),
        }
    }
}

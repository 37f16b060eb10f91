use crate::buffer::{Buffer, Wire};

use super::protocol::{ChannelId, PROTOCOL_MAGIC, ProtocolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Connect = 0,
    Accept = 1,
    Data = 2,
    /// Body starts with a per-channel `order u32`.
    ReliableData = 3,
    /// `ack` names exactly one sequence being acknowledged.
    Ack = 4,
    Ping = 5,
    Disconnect = 6,
}

impl TryFrom<u8> for FrameKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Connect),
            1 => Ok(Self::Accept),
            2 => Ok(Self::Data),
            3 => Ok(Self::ReliableData),
            4 => Ok(Self::Ack),
            5 => Ok(Self::Ping),
            6 => Ok(Self::Disconnect),
            other => Err(ProtocolError::UnknownFrameKind(other)),
        }
    }
}

/// `[magic u32][kind u8][channel u8][sequence u32][ack u32][ack_bits u32]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub channel: ChannelId,
    pub sequence: u32,
    pub ack: u32,
    pub ack_bits: u32,
}

impl FrameHeader {
    pub const SIZE: usize = u32::SIZE * 4 + u8::SIZE * 2;
    pub const RELIABLE_PREFIX: usize = u32::SIZE;

    pub fn write_to(&self, buf: &mut Buffer) {
        buf.write(&PROTOCOL_MAGIC);
        buf.write(&(self.kind as u8));
        buf.write(&self.channel);
        buf.write(&self.sequence);
        buf.write(&self.ack);
        buf.write(&self.ack_bits);
    }

    pub fn read_from(buf: &mut Buffer) -> Result<Self, ProtocolError> {
        let magic: u32 = buf.read()?;
        if magic != PROTOCOL_MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }
        Ok(Self {
            kind: FrameKind::try_from(buf.read::<u8>()?)?,
            channel: buf.read()?,
            sequence: buf.read()?,
            ack: buf.read()?,
            ack_bits: buf.read()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let header = FrameHeader {
            kind: FrameKind::ReliableData,
            channel: 1,
            sequence: 10,
            ack: 9,
            ack_bits: 0xFF,
        };
        let mut buf = Buffer::new();
        header.write_to(&mut buf);

        assert_eq!(buf.len(), FrameHeader::SIZE);
        assert_eq!(FrameHeader::read_from(&mut buf).unwrap(), header);
    }

    #[test]
    fn foreign_datagrams_are_rejected() {
        let mut buf = Buffer::new();
        buf.write(&0xDEAD_BEEFu32);
        buf.append_bytes(&[0; 14]);
        assert!(matches!(
            FrameHeader::read_from(&mut buf),
            Err(ProtocolError::BadMagic(0xDEAD_BEEF))
        ));

        let mut buf = Buffer::new();
        buf.write(&PROTOCOL_MAGIC);
        buf.write(&99u8);
        assert!(matches!(
            FrameHeader::read_from(&mut buf),
            Err(ProtocolError::UnknownFrameKind(99))
        ));
    }
}

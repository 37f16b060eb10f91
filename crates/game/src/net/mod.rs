mod command;
mod connection;
mod endpoint;
mod frame;
mod memory;
mod protocol;
mod stats;
mod tracking;
mod transport;

pub use command::{Command, CommandType, Direction, Header, Payload, PlayerId};
pub use connection::{
    ConnectionState, MAX_PENDING_RELIABLE, PeerConnection, PeerTable, ReliableGap,
};
pub use endpoint::{HostConfig, UdpHost, UdpHostFactory};
pub use frame::{FrameHeader, FrameKind};
pub use memory::{MemoryHost, MemoryNetwork};
pub use protocol::{
    CHANNEL_COMMANDS, CHANNEL_COUNT, CHANNEL_SNAPSHOTS, ChannelId, DEFAULT_PORT,
    DEFAULT_TICK_RATE, MAX_PACKET_SIZE, PROTOCOL_MAGIC, ProtocolError,
};
pub use stats::{NetworkStats, PacketLossSimulation};
pub use tracking::{InFlight, ReceiveWindow, ResendQueue, RttEstimator, sequence_newer};
pub use transport::{
    Host, HostFactory, PeerId, Reliability, TransportError, TransportEvent, resolve,
    resolve_hostname, resolve_literal,
};

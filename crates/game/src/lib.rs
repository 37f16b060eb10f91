pub mod buffer;
pub mod command_buffer;
pub mod net;
pub mod ring;
pub mod snapshot;
pub mod tasks;
pub mod time;

pub use buffer::{Buffer, BufferError, Wire};
pub use command_buffer::{COMMAND_HISTORY, CommandBuffer};
pub use net::{
    Command, CommandType, DEFAULT_PORT, DEFAULT_TICK_RATE, Header, Host, HostConfig,
    HostFactory, MemoryNetwork, NetworkStats, PacketLossSimulation, Payload, PeerId, PlayerId,
    ProtocolError, Reliability, TransportError, TransportEvent, UdpHost, UdpHostFactory,
};
pub use ring::RingBuffer;
pub use snapshot::{
    InterpolatedWorld, InterpolationConfig, PlayerSnapshot, ProjectileState, Snapshot,
    SnapshotInterpolator, Transform, WeaponState,
};
pub use tasks::{TaskError, TaskPool};
pub use time::{Clock, FixedTimestep, ManualClock, SystemClock, Timer};

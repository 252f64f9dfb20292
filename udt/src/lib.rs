//! UDT - reliable datagram transport, send side
//!
//! High-level API around the send queue: application data goes into a
//! backlog, is sequenced and paced onto a UDP socket, and is retained until
//! the peer acknowledges it or asks for a retransmission.

pub use udt_io as io;
pub use udt_protocol as protocol;

pub mod backlog;
pub mod events;
pub mod send_queue;

pub use backlog::{PacketList, PendingPacket};
pub use events::{SendQueueEvent, SendQueueState, SendQueueStats};
pub use send_queue::{
    SendQueue, SendQueueConfig, SendQueueError, DEFAULT_EVENT_CAPACITY, DEFAULT_FLOW_WINDOW,
    DEFAULT_INACTIVITY_TIMEOUT,
};

// Re-export commonly used types
pub use io::{DatagramSocket, SocketError, UdtSocket};
pub use protocol::{ControlEvent, LossRange, Packet, SeqNumber};

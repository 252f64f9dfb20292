//! UDT I/O and Platform Abstraction
//!
//! Network I/O and timing for the UDT send path: the datagram socket
//! capability, a UDP socket implementing it, packet timestamps and the
//! pacing gate.

pub mod socket;
pub mod time;

pub use socket::{DatagramSocket, SocketError, UdtSocket};
pub use time::{PacingGate, Timer, Timestamp};

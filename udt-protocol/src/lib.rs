//! UDT Protocol Core
//!
//! Wire-level building blocks for the UDT send path: circular sequence
//! numbers, the packet codec, ACK/NAK control payloads, the sender loss list
//! and the sent-packet ledger used for byte-identical retransmission.

pub mod control;
pub mod ledger;
pub mod loss;
pub mod packet;
pub mod sequence;

pub use control::{AckInfo, ControlError, ControlEvent, NakInfo};
pub use ledger::{LedgerError, SentPacket, SentPacketLedger};
pub use loss::{LossList, LossRange};
pub use packet::{
    ControlPacket, ControlType, DataPacket, MsgNumber, Packet, PacketBoundary, PacketError,
};
pub use sequence::{SeqCounter, SeqNumber};

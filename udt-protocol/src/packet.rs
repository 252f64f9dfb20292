//! UDT Packet Structures and Serialization
//!
//! Every packet starts with a 128-bit (16-byte) header followed by an
//! optional payload. Bit 31 of the first header word distinguishes control
//! packets from data packets.

use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the UDT packet header in bytes (4 fields × 4 bytes each)
pub const HEADER_SIZE: usize = 16;

/// Maximum payload size (MTU 1500 - IP/UDP headers - UDT header)
pub const MAX_PAYLOAD_SIZE: usize = 1456; // 1500 - 28 (IP+UDP) - 16 (UDT header)

/// Largest message number (26 bits)
pub const MAX_MSG_NUMBER: u32 = 0x03FF_FFFF;

/// Control packet flag (bit 31 of sequence number field)
const CONTROL_FLAG: u32 = 0x8000_0000;

/// Mask for sequence number value (bits 0-30)
const SEQ_MASK: u32 = 0x7FFF_FFFF;

/// Control packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ControlType {
    /// Connection handshake
    Handshake = 0,
    /// Keep-alive
    KeepAlive = 1,
    /// Acknowledgement
    Ack = 2,
    /// Negative acknowledgement (loss report)
    Nak = 3,
    /// Congestion warning
    CongestionWarning = 4,
    /// Shutdown
    Shutdown = 5,
    /// Acknowledgement of acknowledgement
    AckAck = 6,
    /// Message drop request
    DropReq = 7,
    /// Peer error
    PeerError = 8,
    /// User-defined control packet
    UserDefined = 0x7FFF,
}

impl ControlType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(ControlType::Handshake),
            1 => Some(ControlType::KeepAlive),
            2 => Some(ControlType::Ack),
            3 => Some(ControlType::Nak),
            4 => Some(ControlType::CongestionWarning),
            5 => Some(ControlType::Shutdown),
            6 => Some(ControlType::AckAck),
            7 => Some(ControlType::DropReq),
            8 => Some(ControlType::PeerError),
            0x7FFF => Some(ControlType::UserDefined),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Message boundary flags (bits 30-31 of message number field)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketBoundary {
    /// Packet in the middle of a message
    Subsequent = 0b00,
    /// Last packet of a message
    Last = 0b01,
    /// First packet of a message
    First = 0b10,
    /// Solo packet (complete message)
    Solo = 0b11,
}

impl PacketBoundary {
    pub fn from_bits(value: u8) -> Self {
        match value & 0b11 {
            0b00 => PacketBoundary::Subsequent,
            0b01 => PacketBoundary::Last,
            0b10 => PacketBoundary::First,
            _ => PacketBoundary::Solo,
        }
    }

    pub fn as_bits(self) -> u8 {
        self as u8
    }

    /// Boundary of fragment `index` in a message of `count` fragments
    pub fn for_fragment(index: usize, count: usize) -> Self {
        match (index == 0, index + 1 == count) {
            (true, true) => PacketBoundary::Solo,
            (true, false) => PacketBoundary::First,
            (false, true) => PacketBoundary::Last,
            (false, false) => PacketBoundary::Subsequent,
        }
    }

    /// Whether this fragment closes its message
    pub fn is_final(self) -> bool {
        matches!(self, PacketBoundary::Last | PacketBoundary::Solo)
    }
}

/// Message number and flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgNumber {
    /// Message boundary (bits 30-31)
    pub boundary: PacketBoundary,
    /// In-order delivery flag (bit 29)
    pub in_order: bool,
    /// Retransmission flag (bit 26)
    pub retransmitted: bool,
    /// Message sequence number (bits 0-25)
    pub seq: u32,
}

impl MsgNumber {
    /// Create a solo message number
    pub fn new(seq: u32) -> Self {
        MsgNumber {
            boundary: PacketBoundary::Solo,
            in_order: false,
            retransmitted: false,
            seq: seq & MAX_MSG_NUMBER,
        }
    }

    /// Parse message number from raw 32-bit value
    pub fn from_raw(raw: u32) -> Self {
        MsgNumber {
            boundary: PacketBoundary::from_bits(((raw >> 30) & 0b11) as u8),
            in_order: (raw & (1 << 29)) != 0,
            retransmitted: (raw & (1 << 26)) != 0,
            seq: raw & MAX_MSG_NUMBER,
        }
    }

    /// Convert to raw 32-bit value
    ///
    /// Bits 27-28 (key specification) are always zero.
    pub fn to_raw(self) -> u32 {
        let mut raw = self.seq & MAX_MSG_NUMBER;
        raw |= (self.boundary.as_bits() as u32) << 30;
        if self.in_order {
            raw |= 1 << 29;
        }
        if self.retransmitted {
            raw |= 1 << 26;
        }
        raw
    }
}

/// Common packet header (128 bits = 16 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    /// Field 0: Sequence number or control information
    pub seq_or_control: u32,
    /// Field 1: Message number or additional info
    pub msg_or_info: u32,
    /// Field 2: Timestamp (microseconds)
    pub timestamp: u32,
    /// Field 3: Destination socket ID
    pub dest_socket_id: u32,
}

impl PacketHeader {
    /// Create a new data packet header
    pub fn new_data(
        seq: SeqNumber,
        msg_number: MsgNumber,
        timestamp: u32,
        dest_socket_id: u32,
    ) -> Self {
        PacketHeader {
            seq_or_control: seq.as_raw() & SEQ_MASK,
            msg_or_info: msg_number.to_raw(),
            timestamp,
            dest_socket_id,
        }
    }

    /// Create a new control packet header
    pub fn new_control(
        control_type: ControlType,
        type_specific_info: u16,
        additional_info: u32,
        timestamp: u32,
        dest_socket_id: u32,
    ) -> Self {
        let seq_or_control =
            CONTROL_FLAG | ((control_type.as_u16() as u32) << 16) | (type_specific_info as u32);

        PacketHeader {
            seq_or_control,
            msg_or_info: additional_info,
            timestamp,
            dest_socket_id,
        }
    }

    /// Check if this is a control packet
    #[inline]
    pub fn is_control(&self) -> bool {
        (self.seq_or_control & CONTROL_FLAG) != 0
    }

    /// Check if this is a data packet
    #[inline]
    pub fn is_data(&self) -> bool {
        !self.is_control()
    }

    /// Get the sequence number (for data packets only)
    pub fn seq_number(&self) -> Option<SeqNumber> {
        self.is_data()
            .then(|| SeqNumber::new_unchecked(self.seq_or_control & SEQ_MASK))
    }

    /// Get the raw control type value (for control packets only)
    pub fn raw_control_type(&self) -> Option<u16> {
        self.is_control()
            .then(|| ((self.seq_or_control >> 16) & 0x7FFF) as u16)
    }

    /// Get the control type (for control packets only)
    pub fn control_type(&self) -> Option<ControlType> {
        self.raw_control_type().and_then(ControlType::from_u16)
    }

    /// Get the type-specific information field (for control packets only)
    pub fn type_specific_info(&self) -> Option<u16> {
        self.is_control()
            .then(|| (self.seq_or_control & 0xFFFF) as u16)
    }

    /// Get the message number (for data packets only)
    pub fn msg_number(&self) -> Option<MsgNumber> {
        self.is_data().then(|| MsgNumber::from_raw(self.msg_or_info))
    }

    /// Get the additional info field (for control packets only)
    pub fn additional_info(&self) -> Option<u32> {
        self.is_control().then_some(self.msg_or_info)
    }

    /// Parse header from bytes (network byte order)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PacketError::InsufficientData {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..HEADER_SIZE];
        Ok(PacketHeader {
            seq_or_control: buf.get_u32(),
            msg_or_info: buf.get_u32(),
            timestamp: buf.get_u32(),
            dest_socket_id: buf.get_u32(),
        })
    }

    /// Serialize header to bytes (network byte order)
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u32(self.seq_or_control);
        buf.put_u32(self.msg_or_info);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.dest_socket_id);
    }
}

/// Data packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Packet header
    pub header: PacketHeader,
    /// Payload data
    pub payload: Bytes,
}

impl DataPacket {
    /// Create a new data packet
    pub fn new(
        seq: SeqNumber,
        msg_number: MsgNumber,
        timestamp: u32,
        dest_socket_id: u32,
        payload: Bytes,
    ) -> Self {
        DataPacket {
            header: PacketHeader::new_data(seq, msg_number, timestamp, dest_socket_id),
            payload,
        }
    }

    /// Get the sequence number
    pub fn seq_number(&self) -> SeqNumber {
        SeqNumber::new_unchecked(self.header.seq_or_control & SEQ_MASK)
    }

    /// Get the message number
    pub fn msg_number(&self) -> MsgNumber {
        MsgNumber::from_raw(self.header.msg_or_info)
    }

    /// Total size of the packet (header + payload)
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize the packet to bytes
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        self.header.to_bytes(&mut buf);
        buf.put_slice(&self.payload);
        buf
    }

    /// Parse a data packet from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let header = PacketHeader::from_bytes(bytes)?;

        if !header.is_data() {
            return Err(PacketError::WrongPacketType {
                expected: "data",
                actual: "control",
            });
        }

        Ok(DataPacket {
            header,
            payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
        })
    }
}

/// Control packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    /// Packet header
    pub header: PacketHeader,
    /// Control information data
    pub control_info: Bytes,
}

impl ControlPacket {
    /// Create a new control packet
    pub fn new(
        control_type: ControlType,
        type_specific_info: u16,
        additional_info: u32,
        timestamp: u32,
        dest_socket_id: u32,
        control_info: Bytes,
    ) -> Self {
        ControlPacket {
            header: PacketHeader::new_control(
                control_type,
                type_specific_info,
                additional_info,
                timestamp,
                dest_socket_id,
            ),
            control_info,
        }
    }

    /// Get the control type
    pub fn control_type(&self) -> Result<ControlType, PacketError> {
        let raw = self
            .header
            .raw_control_type()
            .ok_or(PacketError::WrongPacketType {
                expected: "control",
                actual: "data",
            })?;
        ControlType::from_u16(raw).ok_or(PacketError::InvalidControlType(raw))
    }

    /// Total size of the packet (header + control info)
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.control_info.len()
    }

    /// Serialize the packet to bytes
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        self.header.to_bytes(&mut buf);
        buf.put_slice(&self.control_info);
        buf
    }

    /// Parse a control packet from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let header = PacketHeader::from_bytes(bytes)?;

        if !header.is_control() {
            return Err(PacketError::WrongPacketType {
                expected: "control",
                actual: "data",
            });
        }

        Ok(ControlPacket {
            header,
            control_info: Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
        })
    }
}

/// Unified packet type (either data or control)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Data(DataPacket),
    Control(ControlPacket),
}

impl Packet {
    /// Parse a packet from bytes (automatically determines type)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let header = PacketHeader::from_bytes(bytes)?;

        if header.is_data() {
            Ok(Packet::Data(DataPacket::from_bytes(bytes)?))
        } else {
            Ok(Packet::Control(ControlPacket::from_bytes(bytes)?))
        }
    }
}

/// Packet parsing and validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Wrong packet type: expected {expected}, got {actual}")]
    WrongPacketType {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Invalid control type: {0}")]
    InvalidControlType(u16),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

//! ACK and NAK control payloads
//!
//! Encodes and decodes the control information carried by ACK and NAK
//! packets, and maps inbound control packets to the events a send queue
//! consumes.

use crate::loss::LossRange;
use crate::packet::{ControlPacket, ControlType, PacketError};
use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of a full ACK body in bytes
pub const FULL_ACK_SIZE: usize = 28;

/// Size of a light ACK body in bytes (sequence number only)
pub const LIGHT_ACK_SIZE: usize = 4;

/// Type-specific flag marking a NAK as the receiver's complete loss list
pub const FULL_NAK_FLAG: u16 = 0x0001;

/// Bit 31 of a NAK word marks the start of a range
const RANGE_FLAG: u32 = 0x8000_0000;

/// Control decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Expected {expected:?} packet, got {actual:?}")]
    UnexpectedType {
        expected: ControlType,
        actual: ControlType,
    },

    #[error("Truncated loss report: range start without end")]
    TruncatedNak,
}

/// ACK packet information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckInfo {
    /// Sequence number being acknowledged (up to and including this)
    pub ack_seq: SeqNumber,
    /// Round-trip time in microseconds
    pub rtt_us: u32,
    /// RTT variance in microseconds
    pub rtt_var_us: u32,
    /// Available buffer size (packets)
    pub buffer_available: u32,
    /// Packet arrival rate (packets per second)
    pub packet_arrival_rate: u32,
    /// Estimated link capacity (packets per second)
    pub estimated_link_capacity: u32,
    /// Receive rate (bytes per second)
    pub receive_rate_bps: u32,
}

impl AckInfo {
    /// Create a new ACK info
    pub fn new(ack_seq: SeqNumber) -> Self {
        AckInfo {
            ack_seq,
            rtt_us: 0,
            rtt_var_us: 0,
            buffer_available: 8192,
            packet_arrival_rate: 0,
            estimated_link_capacity: 0,
            receive_rate_bps: 0,
        }
    }

    /// Serialize ACK info to control packet data
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FULL_ACK_SIZE);
        buf.put_u32(self.ack_seq.as_raw());
        buf.put_u32(self.rtt_us);
        buf.put_u32(self.rtt_var_us);
        buf.put_u32(self.buffer_available);
        buf.put_u32(self.packet_arrival_rate);
        buf.put_u32(self.estimated_link_capacity);
        buf.put_u32(self.receive_rate_bps);
        buf.freeze()
    }

    /// Parse ACK info from bytes
    ///
    /// A light ACK (sequence number only) yields defaults for the other
    /// fields.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut buf = bytes;

        if buf.len() < LIGHT_ACK_SIZE {
            return None;
        }
        let ack_seq = SeqNumber::new_unchecked(buf.get_u32());
        if buf.len() < FULL_ACK_SIZE - LIGHT_ACK_SIZE {
            return Some(AckInfo::new(ack_seq));
        }

        Some(AckInfo {
            ack_seq,
            rtt_us: buf.get_u32(),
            rtt_var_us: buf.get_u32(),
            buffer_available: buf.get_u32(),
            packet_arrival_rate: buf.get_u32(),
            estimated_link_capacity: buf.get_u32(),
            receive_rate_bps: buf.get_u32(),
        })
    }

    /// Build an ACK control packet
    pub fn to_packet(&self, ack_number: u16, timestamp: u32, dest_socket_id: u32) -> ControlPacket {
        ControlPacket::new(
            ControlType::Ack,
            ack_number,
            self.ack_seq.as_raw(),
            timestamp,
            dest_socket_id,
            self.to_bytes(),
        )
    }
}

/// NAK packet information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NakInfo {
    /// Lost packet ranges
    pub loss_ranges: Vec<LossRange>,
}

impl NakInfo {
    /// Create a new NAK info
    pub fn new(loss_ranges: Vec<LossRange>) -> Self {
        NakInfo { loss_ranges }
    }

    /// Serialize to the compact loss encoding
    ///
    /// A single loss is one word; a range is two words with bit 31 set on
    /// the first.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.loss_ranges.len() * 8);

        for range in &self.loss_ranges {
            if range.is_single() {
                buf.put_u32(range.start.as_raw());
            } else {
                buf.put_u32(range.start.as_raw() | RANGE_FLAG);
                buf.put_u32(range.end.as_raw());
            }
        }

        buf.freeze()
    }

    /// Parse the compact loss encoding
    ///
    /// Trailing bytes shorter than a word are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ControlError> {
        let mut loss_ranges = Vec::new();
        let mut buf = bytes;

        while buf.remaining() >= 4 {
            let first = buf.get_u32();

            if (first & RANGE_FLAG) != 0 {
                if buf.remaining() < 4 {
                    return Err(ControlError::TruncatedNak);
                }
                let start = SeqNumber::new_unchecked(first);
                let end = SeqNumber::new_unchecked(buf.get_u32());
                loss_ranges.push(LossRange::new(start, end));
            } else {
                loss_ranges.push(LossRange::single(SeqNumber::new_unchecked(first)));
            }
        }

        Ok(NakInfo { loss_ranges })
    }

    /// Build a NAK control packet
    ///
    /// With `full` set the packet carries the receiver's complete loss list
    /// and replaces whatever the sender had queued.
    pub fn to_packet(&self, full: bool, timestamp: u32, dest_socket_id: u32) -> ControlPacket {
        let flags = if full { FULL_NAK_FLAG } else { 0 };
        ControlPacket::new(
            ControlType::Nak,
            flags,
            0,
            timestamp,
            dest_socket_id,
            self.to_bytes(),
        )
    }

    /// Parse the loss report carried by a NAK control packet
    pub fn from_packet(packet: &ControlPacket) -> Result<Self, ControlError> {
        let actual = packet.control_type()?;
        if actual != ControlType::Nak {
            return Err(ControlError::UnexpectedType {
                expected: ControlType::Nak,
                actual,
            });
        }
        NakInfo::from_bytes(&packet.control_info)
    }
}

/// Inbound control event relevant to the send side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Cumulative acknowledgement up to and including the sequence number
    Ack(AckInfo),
    /// Incremental loss report
    Nak(Vec<LossRange>),
    /// Complete loss list replacing the sender's current one
    FullNak(Vec<LossRange>),
    /// Any other control packet; the send side ignores it
    Other(ControlType),
}

impl ControlEvent {
    /// Decode a control packet
    pub fn from_packet(packet: &ControlPacket) -> Result<Self, ControlError> {
        match packet.control_type()? {
            ControlType::Ack => {
                let info = AckInfo::from_bytes(&packet.control_info).unwrap_or_else(|| {
                    AckInfo::new(SeqNumber::new_unchecked(packet.header.msg_or_info))
                });
                Ok(ControlEvent::Ack(info))
            }
            ControlType::Nak => {
                let nak = NakInfo::from_bytes(&packet.control_info)?;
                let flags = packet.header.type_specific_info().unwrap_or(0);
                if flags & FULL_NAK_FLAG != 0 {
                    Ok(ControlEvent::FullNak(nak.loss_ranges))
                } else {
                    Ok(ControlEvent::Nak(nak.loss_ranges))
                }
            }
            other => Ok(ControlEvent::Other(other)),
        }
    }
}

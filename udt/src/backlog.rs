//! Outgoing packet backlog
//!
//! Application data waits here until the orchestrator assigns it a sequence
//! number. Message numbers and boundary flags are fixed at enqueue time, so
//! the fragments of one message always sit next to each other.

use bytes::Bytes;
use std::collections::VecDeque;
use udt_protocol::packet::{MsgNumber, PacketBoundary, PacketError, MAX_MSG_NUMBER};

/// A packet waiting to be sent for the first time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPacket {
    /// Payload bytes, sent unchanged
    pub payload: Bytes,
    /// Message number with boundary and ordering flags
    pub msg: MsgNumber,
}

impl PendingPacket {
    /// Whether this packet closes its message
    pub fn is_final_fragment(&self) -> bool {
        self.msg.boundary.is_final()
    }
}

/// The fragments of one logical multi-packet message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketList {
    fragments: Vec<Bytes>,
    ordered: bool,
}

impl PacketList {
    /// Create an empty list
    ///
    /// `ordered` sets the in-order delivery flag on every fragment.
    pub fn new(ordered: bool) -> Self {
        PacketList {
            fragments: Vec::new(),
            ordered,
        }
    }

    /// Split a message into fragments of at most `max_payload` bytes
    pub fn from_message(message: Bytes, max_payload: usize, ordered: bool) -> Self {
        let max_payload = max_payload.max(1);
        let mut fragments = Vec::with_capacity(message.len() / max_payload + 1);
        let mut rest = message;

        while rest.len() > max_payload {
            fragments.push(rest.split_to(max_payload));
        }
        if !rest.is_empty() || fragments.is_empty() {
            fragments.push(rest);
        }

        PacketList { fragments, ordered }
    }

    /// Append a fragment
    pub fn push(&mut self, fragment: Bytes) {
        self.fragments.push(fragment);
    }

    /// Number of fragments
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Check if the list has no fragments
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Whether fragments carry the in-order flag
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Total payload bytes across fragments
    pub fn total_size(&self) -> usize {
        self.fragments.iter().map(Bytes::len).sum()
    }
}

/// Something handed to the queue by the application
#[derive(Debug, Clone)]
pub(crate) enum Outgoing {
    /// A single-packet message
    Packet(Bytes),
    /// A multi-packet message, enqueued as one unit
    List(PacketList),
}

impl Outgoing {
    /// Reject payloads that would not fit in one datagram
    pub(crate) fn validate(&self, max_payload: usize) -> Result<(), PacketError> {
        let too_large = |payload: &Bytes| PacketError::PayloadTooLarge {
            size: payload.len(),
            max: max_payload,
        };

        match self {
            Outgoing::Packet(payload) if payload.len() > max_payload => Err(too_large(payload)),
            Outgoing::Packet(_) => Ok(()),
            Outgoing::List(list) => match list.fragments.iter().find(|f| f.len() > max_payload) {
                Some(fragment) => Err(too_large(fragment)),
                None => Ok(()),
            },
        }
    }
}

/// FIFO of packets not yet sent
#[derive(Debug, Default)]
pub(crate) struct Backlog {
    packets: VecDeque<PendingPacket>,
    /// Last message number handed out
    current_message: u32,
}

impl Backlog {
    pub(crate) fn new() -> Self {
        Backlog::default()
    }

    fn next_message_number(&mut self) -> u32 {
        self.current_message = (self.current_message + 1) & MAX_MSG_NUMBER;
        self.current_message
    }

    /// Append a message, returning the message number it was given
    pub(crate) fn push(&mut self, outgoing: Outgoing) -> u32 {
        let message = self.next_message_number();

        match outgoing {
            Outgoing::Packet(payload) => {
                self.packets.push_back(PendingPacket {
                    payload,
                    msg: MsgNumber::new(message),
                });
            }
            Outgoing::List(list) => {
                let count = list.fragments.len();
                for (index, payload) in list.fragments.into_iter().enumerate() {
                    self.packets.push_back(PendingPacket {
                        payload,
                        msg: MsgNumber {
                            boundary: PacketBoundary::for_fragment(index, count),
                            in_order: list.ordered,
                            retransmitted: false,
                            seq: message,
                        },
                    });
                }
            }
        }

        message
    }

    pub(crate) fn pop_front(&mut self) -> Option<PendingPacket> {
        self.packets.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.packets.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_message_splits() {
        let list = PacketList::from_message(Bytes::from(vec![7u8; 25]), 10, true);

        assert_eq!(list.len(), 3);
        assert_eq!(list.total_size(), 25);
        assert!(list.is_ordered());
        assert_eq!(list.fragments[2].len(), 5);
    }

    #[test]
    fn test_from_message_empty_is_one_fragment() {
        let list = PacketList::from_message(Bytes::new(), 10, false);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_backlog_assigns_message_numbers() {
        let mut backlog = Backlog::new();

        let first = backlog.push(Outgoing::Packet(Bytes::from_static(b"a")));
        let list = PacketList::from_message(Bytes::from_static(b"bcd"), 1, true);
        let second = backlog.push(Outgoing::List(list));

        assert_eq!(second, first + 1);
        assert_eq!(backlog.len(), 4);

        let solo = backlog.pop_front().unwrap();
        assert_eq!(solo.msg.boundary, PacketBoundary::Solo);
        assert!(solo.is_final_fragment());

        let boundaries: Vec<_> = std::iter::from_fn(|| backlog.pop_front())
            .map(|p| {
                assert_eq!(p.msg.seq, second);
                assert!(p.msg.in_order);
                p.msg.boundary
            })
            .collect();
        assert_eq!(
            boundaries,
            vec![
                PacketBoundary::First,
                PacketBoundary::Subsequent,
                PacketBoundary::Last
            ]
        );
        assert!(backlog.is_empty());
    }

    #[test]
    fn test_message_number_wraps() {
        let mut backlog = Backlog::new();
        backlog.current_message = MAX_MSG_NUMBER;

        assert_eq!(backlog.push(Outgoing::Packet(Bytes::new())), 0);
    }

    #[test]
    fn test_validate_payload_size() {
        let ok = Outgoing::Packet(Bytes::from(vec![0u8; 10]));
        assert!(ok.validate(10).is_ok());

        let mut list = PacketList::new(false);
        list.push(Bytes::from(vec![0u8; 4]));
        list.push(Bytes::from(vec![0u8; 11]));
        assert_eq!(
            Outgoing::List(list).validate(10),
            Err(PacketError::PayloadTooLarge { size: 11, max: 10 })
        );
    }
}

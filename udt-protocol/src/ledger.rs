//! Sent-packet ledger
//!
//! Keeps the exact wire bytes of every transmitted data packet until the
//! peer cumulatively acknowledges it, so retransmissions are byte-identical
//! to the original send.
//!
//! Entries are stored in ascending circular sequence order. The send path
//! only ever appends the next number, so in practice the ledger is a
//! contiguous window `[first_seq, last_seq]`.

use crate::loss::LossRange;
use crate::sequence::SeqNumber;
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::time::Instant;
use thiserror::Error;

/// Ledger errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Packet not found: {0}")]
    NotFound(SeqNumber),
}

/// A transmitted packet awaiting acknowledgement
#[derive(Debug, Clone)]
pub struct SentPacket {
    /// Sequence number the packet was sent with
    pub seq: SeqNumber,
    /// Serialized packet exactly as it went on the wire
    pub wire: Bytes,
    /// Payload length (wire length minus header)
    pub payload_len: usize,
    /// Time of the first transmission
    pub first_sent: Instant,
    /// Time of the most recent transmission
    pub last_sent: Instant,
    /// Number of times this packet has been handed to the socket
    pub send_count: u32,
}

/// Sent-packet ledger keyed by sequence number
#[derive(Debug, Default)]
pub struct SentPacketLedger {
    entries: VecDeque<SentPacket>,
}

impl SentPacketLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        SentPacketLedger {
            entries: VecDeque::new(),
        }
    }

    /// Binary search by circular order
    fn search(&self, seq: SeqNumber) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|entry| entry.seq.cmp_circular(seq))
    }

    /// Record a transmitted packet
    ///
    /// Recording a number that is already present overwrites the entry; this
    /// only happens when a number is reissued after a full wraparound.
    pub fn record(&mut self, seq: SeqNumber, wire: Bytes, payload_len: usize) {
        let now = Instant::now();
        let packet = SentPacket {
            seq,
            wire,
            payload_len,
            first_sent: now,
            last_sent: now,
            send_count: 1,
        };

        match self.entries.back() {
            None => self.entries.push_back(packet),
            Some(last) if last.seq.lt(seq) => self.entries.push_back(packet),
            Some(_) => match self.search(seq) {
                Ok(idx) => self.entries[idx] = packet,
                Err(idx) => self.entries.insert(idx, packet),
            },
        }
    }

    /// Fetch the bytes for a retransmission without removing the entry
    ///
    /// Updates the entry's send count and last-sent time.
    pub fn take(&mut self, seq: SeqNumber) -> Result<Bytes, LedgerError> {
        let idx = self.search(seq).map_err(|_| LedgerError::NotFound(seq))?;
        let entry = &mut self.entries[idx];
        entry.last_sent = Instant::now();
        entry.send_count += 1;
        Ok(entry.wire.clone())
    }

    /// Look at an entry without touching its statistics
    pub fn get(&self, seq: SeqNumber) -> Option<&SentPacket> {
        self.search(seq).ok().map(|idx| &self.entries[idx])
    }

    /// Remove every entry up to and including `seq`
    ///
    /// Returns the number of entries removed.
    pub fn acknowledge_up_to(&mut self, seq: SeqNumber) -> usize {
        let mut removed = 0;
        while let Some(front) = self.entries.front() {
            if front.seq.cmp_circular(seq) == Ordering::Greater {
                break;
            }
            self.entries.pop_front();
            removed += 1;
        }
        removed
    }

    /// Intersect a range with the ledger's current span
    pub fn clip(&self, range: LossRange) -> Option<LossRange> {
        let first = self.first_seq()?;
        let last = self.last_seq()?;
        range.clip(first, last)
    }

    /// Check if a sequence number is awaiting acknowledgement
    pub fn contains(&self, seq: SeqNumber) -> bool {
        self.search(seq).is_ok()
    }

    /// Oldest unacknowledged sequence number
    pub fn first_seq(&self) -> Option<SeqNumber> {
        self.entries.front().map(|e| e.seq)
    }

    /// Newest recorded sequence number
    pub fn last_seq(&self) -> Option<SeqNumber> {
        self.entries.back().map(|e| e.seq)
    }

    /// Number of packets in flight
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::MAX_SEQ_NUMBER;

    fn record_range(ledger: &mut SentPacketLedger, first: u32, count: u32) {
        let mut seq = SeqNumber::new(first);
        for i in 0..count {
            ledger.record(seq, Bytes::from(vec![i as u8; 4]), 4);
            seq = seq.next();
        }
    }

    #[test]
    fn test_record_and_take() {
        let mut ledger = SentPacketLedger::new();
        ledger.record(SeqNumber::new(7), Bytes::from_static(b"wire"), 4);

        let bytes = ledger.take(SeqNumber::new(7)).unwrap();
        assert_eq!(&bytes[..], b"wire");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(SeqNumber::new(7)).unwrap().send_count, 2);

        assert_eq!(
            ledger.take(SeqNumber::new(8)),
            Err(LedgerError::NotFound(SeqNumber::new(8)))
        );
    }

    #[test]
    fn test_acknowledge_up_to_inclusive() {
        let mut ledger = SentPacketLedger::new();
        record_range(&mut ledger, 0, 4);

        assert_eq!(ledger.acknowledge_up_to(SeqNumber::new(1)), 2);
        assert_eq!(ledger.first_seq(), Some(SeqNumber::new(2)));
        assert_eq!(ledger.last_seq(), Some(SeqNumber::new(3)));

        // Repeating the same ACK changes nothing
        assert_eq!(ledger.acknowledge_up_to(SeqNumber::new(1)), 0);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_acknowledge_across_wrap() {
        let mut ledger = SentPacketLedger::new();
        record_range(&mut ledger, MAX_SEQ_NUMBER - 2, 6);

        ledger.acknowledge_up_to(SeqNumber::new(0));

        assert!(!ledger.contains(SeqNumber::new(MAX_SEQ_NUMBER)));
        assert!(!ledger.contains(SeqNumber::new(0)));
        assert!(ledger.contains(SeqNumber::new(1)));
        assert!(ledger.contains(SeqNumber::new(2)));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_record_overwrites() {
        let mut ledger = SentPacketLedger::new();
        record_range(&mut ledger, 10, 3);
        ledger.record(SeqNumber::new(11), Bytes::from_static(b"new"), 3);

        assert_eq!(ledger.len(), 3);
        assert_eq!(&ledger.take(SeqNumber::new(11)).unwrap()[..], b"new");
    }

    #[test]
    fn test_clip() {
        let mut ledger = SentPacketLedger::new();
        assert_eq!(
            ledger.clip(LossRange::single(SeqNumber::new(1))),
            None
        );

        record_range(&mut ledger, 10, 5);
        assert_eq!(
            ledger.clip(LossRange::new(SeqNumber::new(0), SeqNumber::new(12))),
            Some(LossRange::new(SeqNumber::new(10), SeqNumber::new(12)))
        );
        assert_eq!(
            ledger.clip(LossRange::new(SeqNumber::new(20), SeqNumber::new(30))),
            None
        );
    }
}

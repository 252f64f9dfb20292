//! In-order reassembly for the test sink
//!
//! Holds out-of-order payloads until the gap before them fills, and tracks
//! the gaps themselves so the sink can report them back as NAKs.

use bytes::Bytes;
use std::collections::HashMap;
use udt::protocol::{LossList, LossRange, SeqNumber};

/// Result of accepting one data packet
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Payloads now deliverable, in sequence order
    pub ready: Vec<Bytes>,
    /// Newly detected gap, to be reported immediately
    pub gap: Option<LossRange>,
    /// The packet was already delivered or buffered
    pub duplicate: bool,
}

/// Receive-side reorder buffer
#[derive(Debug)]
pub struct Reassembler {
    /// Next sequence number to deliver
    next_expected: SeqNumber,
    /// Highest sequence number seen so far
    highest: SeqNumber,
    /// Packets received ahead of a gap
    buffered: HashMap<SeqNumber, Bytes>,
    /// Numbers between `next_expected` and `highest` not yet received
    missing: LossList,
}

impl Reassembler {
    /// Expect `initial_seq` as the first packet
    pub fn new(initial_seq: SeqNumber) -> Self {
        Reassembler {
            next_expected: initial_seq,
            highest: initial_seq.prev(),
            buffered: HashMap::new(),
            missing: LossList::new(),
        }
    }

    /// Accept a data packet
    pub fn accept(&mut self, seq: SeqNumber, payload: Bytes) -> Delivery {
        let mut delivery = Delivery::default();

        if seq.lt(self.next_expected) || self.buffered.contains_key(&seq) {
            delivery.duplicate = true;
            return delivery;
        }

        if seq.gt(self.highest) {
            if seq.gt(self.highest.next()) {
                let gap = LossRange::new(self.highest.next(), seq.prev());
                self.missing.insert_range(gap);
                delivery.gap = Some(gap);
            }
            self.highest = seq;
        } else {
            self.missing.remove(seq);
        }

        if seq != self.next_expected {
            self.buffered.insert(seq, payload);
            return delivery;
        }

        delivery.ready.push(payload);
        self.next_expected.increment();
        while let Some(next) = self.buffered.remove(&self.next_expected) {
            delivery.ready.push(next);
            self.next_expected.increment();
        }
        delivery
    }

    /// Highest sequence number delivered in order (cumulative ACK point)
    pub fn ack_point(&self) -> SeqNumber {
        self.next_expected.prev()
    }

    /// Every gap still outstanding
    pub fn missing(&self) -> Vec<LossRange> {
        self.missing.ranges()
    }

    /// Number of packets waiting on a gap
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }
}

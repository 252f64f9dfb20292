//! Sender loss list
//!
//! Tracks sequence numbers the peer reported lost (via NAK) that still need
//! to be retransmitted. Entries are kept as inclusive ranges, sorted by
//! circular order, with overlapping or adjacent ranges merged.

use crate::sequence::SeqNumber;

/// Loss sequence range (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LossRange {
    /// First sequence number in range
    pub start: SeqNumber,
    /// Last sequence number in range (inclusive)
    pub end: SeqNumber,
}

impl LossRange {
    /// Create a new loss range
    ///
    /// The bounds are normalized so that `start <= end` circularly.
    pub fn new(start: SeqNumber, end: SeqNumber) -> Self {
        if end.lt(start) {
            LossRange { start: end, end: start }
        } else {
            LossRange { start, end }
        }
    }

    /// Create a single-packet loss range
    pub fn single(seq: SeqNumber) -> Self {
        LossRange { start: seq, end: seq }
    }

    /// Check if this range contains a sequence number
    pub fn contains(&self, seq: SeqNumber) -> bool {
        seq.ge(self.start) && seq.le(self.end)
    }

    /// Number of sequence numbers covered
    pub fn len(&self) -> usize {
        self.start.distance_to(self.end) as usize + 1
    }

    /// Check if this is a single packet
    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    /// Merge with another range if they overlap or are adjacent
    pub fn try_merge(&self, other: &LossRange) -> Option<LossRange> {
        if other.start.le(self.end.next()) && other.end.ge(self.start.prev()) {
            Some(LossRange {
                start: self.start.min_circular(other.start),
                end: self.end.max_circular(other.end),
            })
        } else {
            None
        }
    }

    /// Intersection with the inclusive span `[lo, hi]`
    pub fn clip(&self, lo: SeqNumber, hi: SeqNumber) -> Option<LossRange> {
        let start = self.start.max_circular(lo);
        let end = self.end.min_circular(hi);
        if start.le(end) {
            Some(LossRange { start, end })
        } else {
            None
        }
    }
}

/// Loss list for retransmission scheduling
///
/// `pop_smallest` hands out the circularly smallest pending number first, so
/// retransmissions go out in the order the packets were originally sent.
#[derive(Debug, Default, Clone)]
pub struct LossList {
    /// Disjoint, non-adjacent ranges in ascending circular order
    ranges: Vec<LossRange>,
}

impl LossList {
    /// Create an empty loss list
    pub fn new() -> Self {
        LossList { ranges: Vec::new() }
    }

    /// Add a single lost packet
    pub fn insert(&mut self, seq: SeqNumber) {
        self.insert_range(LossRange::single(seq));
    }

    /// Add a range of lost packets
    ///
    /// Inserting a range that is already covered is a no-op; partially
    /// overlapping or adjacent ranges are merged.
    pub fn insert_range(&mut self, range: LossRange) {
        let mut merged = range;
        let mut ranges = Vec::with_capacity(self.ranges.len() + 1);

        for existing in self.ranges.drain(..) {
            if let Some(joined) = merged.try_merge(&existing) {
                merged = joined;
            } else if existing.start.lt(merged.start) {
                ranges.push(existing);
            } else {
                ranges.push(merged);
                merged = existing;
            }
        }

        ranges.push(merged);
        self.ranges = ranges;
    }

    /// Remove an exact sequence number, splitting its range if needed
    ///
    /// Returns whether the number was present.
    pub fn remove(&mut self, seq: SeqNumber) -> bool {
        let Some(idx) = self.ranges.iter().position(|r| r.contains(seq)) else {
            return false;
        };

        let range = self.ranges[idx];
        if range.is_single() {
            self.ranges.remove(idx);
        } else if seq == range.start {
            self.ranges[idx].start = seq.next();
        } else if seq == range.end {
            self.ranges[idx].end = seq.prev();
        } else {
            self.ranges[idx].end = seq.prev();
            self.ranges
                .insert(idx + 1, LossRange::new(seq.next(), range.end));
        }
        true
    }

    /// Remove all losses up to and including a sequence number
    pub fn remove_up_to(&mut self, seq: SeqNumber) {
        self.ranges.retain(|range| range.end.gt(seq));

        if let Some(first) = self.ranges.first_mut() {
            if first.start.le(seq) {
                first.start = seq.next();
            }
        }
    }

    /// Remove and return the smallest pending sequence number
    pub fn pop_smallest(&mut self) -> Option<SeqNumber> {
        let first = self.ranges.first_mut()?;
        let seq = first.start;

        if first.is_single() {
            self.ranges.remove(0);
        } else {
            first.start = seq.next();
        }
        Some(seq)
    }

    /// Smallest pending sequence number, if any
    pub fn first(&self) -> Option<SeqNumber> {
        self.ranges.first().map(|r| r.start)
    }

    /// Replace the whole list with the given ranges
    pub fn replace<I>(&mut self, ranges: I)
    where
        I: IntoIterator<Item = LossRange>,
    {
        self.ranges.clear();
        for range in ranges {
            self.insert_range(range);
        }
    }

    /// Snapshot of all loss ranges
    pub fn ranges(&self) -> Vec<LossRange> {
        self.ranges.clone()
    }

    /// Total number of lost packets
    pub fn len(&self) -> usize {
        self.ranges.iter().map(LossRange::len).sum()
    }

    /// Check if the loss list is empty
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Clear all losses
    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Check if a sequence number is in the loss list
    pub fn contains(&self, seq: SeqNumber) -> bool {
        self.ranges.iter().any(|r| r.contains(seq))
    }
}

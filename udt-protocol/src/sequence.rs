//! Sequence Number Handling
//!
//! UDT data packets carry 31-bit sequence numbers (bit 31 of the first header
//! word is the control flag). All ordering between sequence numbers is
//! circular: a number that is ahead by less than half the sequence space
//! compares greater, even after the counter has wrapped to zero.
//!
//! `SeqNumber` does not implement `PartialOrd`/`Ord`; raw integer ordering is
//! wrong across the wrap boundary. Use [`SeqNumber::cmp_circular`] or the
//! `lt`/`le`/`gt`/`ge` helpers instead.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

/// Maximum sequence number value (31-bit: 0x7FFFFFFF)
pub const MAX_SEQ_NUMBER: u32 = 0x7FFF_FFFF;

/// Size of the sequence space (M = 2^31)
const SEQ_SPACE: i64 = (MAX_SEQ_NUMBER as i64) + 1;

/// Half of the sequence space; numbers further apart are never compared
const HALF_SPACE: i64 = SEQ_SPACE / 2;

/// Sequence number with 31-bit wraparound semantics
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct SeqNumber(u32);

impl SeqNumber {
    /// Create a new sequence number
    ///
    /// # Panics
    /// Panics if value exceeds MAX_SEQ_NUMBER
    pub fn new(value: u32) -> Self {
        assert!(
            value <= MAX_SEQ_NUMBER,
            "Sequence number {} exceeds maximum {}",
            value,
            MAX_SEQ_NUMBER
        );
        SeqNumber(value)
    }

    /// Create a sequence number, masking the value to 31 bits
    #[inline]
    pub fn new_unchecked(value: u32) -> Self {
        SeqNumber(value & MAX_SEQ_NUMBER)
    }

    /// Create a sequence number, or `None` if the value needs more than 31 bits
    pub fn try_from_raw(value: u32) -> Option<Self> {
        (value <= MAX_SEQ_NUMBER).then_some(SeqNumber(value))
    }

    /// Get the raw sequence number value
    #[inline]
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// Increment the sequence number by 1
    #[inline]
    pub fn increment(&mut self) {
        self.0 = (self.0 + 1) & MAX_SEQ_NUMBER;
    }

    /// Get the next sequence number
    #[inline]
    pub fn next(self) -> Self {
        SeqNumber((self.0 + 1) & MAX_SEQ_NUMBER)
    }

    /// Get the previous sequence number
    #[inline]
    pub fn prev(self) -> Self {
        SeqNumber(self.0.wrapping_sub(1) & MAX_SEQ_NUMBER)
    }

    /// Signed distance from this sequence number to `other`
    ///
    /// Positive values mean `other` is ahead of `self`, negative values mean
    /// it is behind. The raw difference is folded into `(-M/2, M/2]`.
    pub fn distance_to(self, other: SeqNumber) -> i32 {
        let mut diff = other.0 as i64 - self.0 as i64;

        if diff > HALF_SPACE {
            diff -= SEQ_SPACE;
        } else if diff <= -HALF_SPACE {
            diff += SEQ_SPACE;
        }

        diff as i32
    }

    /// Circular comparison of two sequence numbers
    #[inline]
    pub fn cmp_circular(self, other: SeqNumber) -> Ordering {
        match self.distance_to(other) {
            0 => Ordering::Equal,
            d if d > 0 => Ordering::Less,
            _ => Ordering::Greater,
        }
    }

    /// Check if this sequence number is less than another (accounting for wraparound)
    #[inline]
    pub fn lt(self, other: SeqNumber) -> bool {
        self.distance_to(other) > 0
    }

    /// Check if this sequence number is less than or equal to another
    #[inline]
    pub fn le(self, other: SeqNumber) -> bool {
        self.distance_to(other) >= 0
    }

    /// Check if this sequence number is greater than another
    #[inline]
    pub fn gt(self, other: SeqNumber) -> bool {
        self.distance_to(other) < 0
    }

    /// Check if this sequence number is greater than or equal to another
    #[inline]
    pub fn ge(self, other: SeqNumber) -> bool {
        self.distance_to(other) <= 0
    }

    /// The circularly smaller of two sequence numbers
    #[inline]
    pub fn min_circular(self, other: SeqNumber) -> SeqNumber {
        if self.le(other) {
            self
        } else {
            other
        }
    }

    /// The circularly larger of two sequence numbers
    #[inline]
    pub fn max_circular(self, other: SeqNumber) -> SeqNumber {
        if self.ge(other) {
            self
        } else {
            other
        }
    }
}

impl fmt::Debug for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNumber({})", self.0)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SeqNumber {
    fn from(value: u32) -> Self {
        SeqNumber::new_unchecked(value)
    }
}

impl From<SeqNumber> for u32 {
    fn from(seq: SeqNumber) -> u32 {
        seq.0
    }
}

impl Add<u32> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: u32) -> SeqNumber {
        SeqNumber::new_unchecked(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for SeqNumber {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl Sub<u32> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: u32) -> SeqNumber {
        SeqNumber::new_unchecked(self.0.wrapping_sub(rhs))
    }
}

impl SubAssign<u32> for SeqNumber {
    fn sub_assign(&mut self, rhs: u32) {
        *self = *self - rhs;
    }
}

impl Sub for SeqNumber {
    type Output = i32;

    /// Signed circular distance `self - rhs`
    fn sub(self, rhs: SeqNumber) -> i32 {
        rhs.distance_to(self)
    }
}

/// Issuing counter for sequence numbers
///
/// A single writer (the send queue's orchestrator thread) calls
/// [`SeqCounter::issue`]; any other thread may read [`SeqCounter::last_issued`]
/// for statistics without taking a lock.
#[derive(Debug)]
pub struct SeqCounter {
    next: AtomicU32,
}

impl SeqCounter {
    /// Create a counter whose first issued number is `first`
    pub fn new(first: SeqNumber) -> Self {
        SeqCounter {
            next: AtomicU32::new(first.as_raw()),
        }
    }

    /// Return the current number and advance by one (mod M)
    ///
    /// Must only be called from one thread at a time.
    pub fn issue(&self) -> SeqNumber {
        let seq = SeqNumber(self.next.load(AtomicOrdering::Relaxed));
        self.next.store(seq.next().as_raw(), AtomicOrdering::Release);
        seq
    }

    /// The next number [`issue`](Self::issue) will return
    pub fn peek_next(&self) -> SeqNumber {
        SeqNumber(self.next.load(AtomicOrdering::Acquire))
    }

    /// The most recently issued number
    ///
    /// Before anything has been issued this is the number preceding the
    /// first one.
    pub fn last_issued(&self) -> SeqNumber {
        self.peek_next().prev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let seq = SeqNumber::new(100);
        assert_eq!(seq.as_raw(), 100);
    }

    #[test]
    #[should_panic]
    fn test_new_overflow() {
        SeqNumber::new(MAX_SEQ_NUMBER + 1);
    }

    #[test]
    fn test_new_unchecked() {
        let seq = SeqNumber::new_unchecked(MAX_SEQ_NUMBER + 100);
        assert_eq!(seq.as_raw(), 99);
        assert_eq!(SeqNumber::try_from_raw(MAX_SEQ_NUMBER + 1), None);
        assert_eq!(SeqNumber::try_from_raw(7), Some(SeqNumber::new(7)));
    }

    #[test]
    fn test_increment_wraparound() {
        let mut seq = SeqNumber::new(MAX_SEQ_NUMBER);
        seq.increment();
        assert_eq!(seq.as_raw(), 0);
        assert_eq!(SeqNumber::new(0).prev().as_raw(), MAX_SEQ_NUMBER);
    }

    #[test]
    fn test_distance_simple() {
        let a = SeqNumber::new(100);
        let b = SeqNumber::new(200);
        assert_eq!(a.distance_to(b), 100);
        assert_eq!(b.distance_to(a), -100);
    }

    #[test]
    fn test_distance_wraparound() {
        let a = SeqNumber::new(MAX_SEQ_NUMBER - 10);
        let b = SeqNumber::new(10);
        assert_eq!(a.distance_to(b), 21);
        assert_eq!(b.distance_to(a), -21);
    }

    #[test]
    fn test_comparison() {
        let a = SeqNumber::new(100);
        let b = SeqNumber::new(200);

        assert!(a.lt(b));
        assert!(a.le(b));
        assert!(b.gt(a));
        assert!(b.ge(a));
        assert!(a.le(a));
        assert!(a.ge(a));
        assert_eq!(a.cmp_circular(b), Ordering::Less);
        assert_eq!(b.cmp_circular(a), Ordering::Greater);
        assert_eq!(a.cmp_circular(a), Ordering::Equal);
    }

    #[test]
    fn test_comparison_wraparound() {
        let a = SeqNumber::new(MAX_SEQ_NUMBER - 10);
        let b = SeqNumber::new(10);

        assert!(a.lt(b));
        assert!(b.gt(a));
        assert_eq!(a.max_circular(b), b);
        assert_eq!(b.min_circular(a), a);
    }

    #[test]
    fn test_add_sub_wraparound() {
        assert_eq!((SeqNumber::new(MAX_SEQ_NUMBER - 10) + 20).as_raw(), 9);
        assert_eq!((SeqNumber::new(10) - 20).as_raw(), MAX_SEQ_NUMBER - 9);
        assert_eq!(SeqNumber::new(5) - SeqNumber::new(MAX_SEQ_NUMBER), 6);
    }

    #[test]
    fn test_counter_issue() {
        let counter = SeqCounter::new(SeqNumber::new(MAX_SEQ_NUMBER - 1));
        assert_eq!(counter.last_issued(), SeqNumber::new(MAX_SEQ_NUMBER - 2));

        assert_eq!(counter.issue(), SeqNumber::new(MAX_SEQ_NUMBER - 1));
        assert_eq!(counter.issue(), SeqNumber::new(MAX_SEQ_NUMBER));
        assert_eq!(counter.issue(), SeqNumber::new(0));
        assert_eq!(counter.last_issued(), SeqNumber::new(0));
        assert_eq!(counter.peek_next(), SeqNumber::new(1));
    }
}

//! Send queue events, state and statistics

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use udt_io::SocketError;
use udt_protocol::SeqNumber;

/// Notification emitted by the send queue
#[derive(Debug)]
pub enum SendQueueEvent {
    /// A new data packet left the socket
    PacketSent {
        seq: SeqNumber,
        /// Full datagram size (header + payload)
        wire_size: usize,
        payload_size: usize,
    },
    /// A lost packet was sent again from the ledger
    PacketRetransmitted { seq: SeqNumber },
    /// The flow window stayed full past the inactivity timeout
    QueueInactive,
    /// The socket refused a datagram; the packet stays eligible for retransmission
    SendFailed { seq: SeqNumber, error: SocketError },
}

impl SendQueueEvent {
    /// Per-packet progress notifications may be shed when the owner lags;
    /// inactivity and failures are always delivered
    pub fn is_progress(&self) -> bool {
        matches!(
            self,
            SendQueueEvent::PacketSent { .. } | SendQueueEvent::PacketRetransmitted { .. }
        )
    }
}

/// What the orchestrator is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SendQueueState {
    /// Nothing to send
    Idle = 0,
    /// Transmitting or waiting on the pacing gate
    Sending = 1,
    /// Backlog pending but the flow window is full
    WindowFull = 2,
    /// Window has stayed full past the inactivity timeout
    Inactive = 3,
    /// Stopped; terminal
    Stopped = 4,
}

impl SendQueueState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SendQueueState::Idle,
            1 => SendQueueState::Sending,
            2 => SendQueueState::WindowFull,
            3 => SendQueueState::Inactive,
            _ => SendQueueState::Stopped,
        }
    }
}

/// Lock-free cell holding a [`SendQueueState`]
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: SendQueueState) -> Self {
        StateCell(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> SendQueueState {
        SendQueueState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store a new state unless the queue has already stopped
    pub(crate) fn set(&self, state: SendQueueState) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != SendQueueState::Stopped as u8).then_some(state as u8)
            });
    }

    /// Leave the window-full states once there is room again
    pub(crate) fn clear_window_full(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let full = current == SendQueueState::WindowFull as u8
                    || current == SendQueueState::Inactive as u8;
                full.then_some(SendQueueState::Sending as u8)
            });
    }

    pub(crate) fn stop(&self) {
        self.0
            .store(SendQueueState::Stopped as u8, Ordering::Release);
    }
}

/// Running counters
///
/// ACK and NAK counts are bumped from caller threads, the rest by the
/// orchestrator.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) packets_sent: AtomicU64,
    pub(crate) bytes_sent: AtomicU64,
    pub(crate) payload_bytes_sent: AtomicU64,
    pub(crate) packets_retransmitted: AtomicU64,
    pub(crate) bytes_retransmitted: AtomicU64,
    pub(crate) send_failures: AtomicU64,
    pub(crate) acks_received: AtomicU64,
    pub(crate) naks_received: AtomicU64,
    pub(crate) inactive_episodes: AtomicU64,
    pub(crate) events_dropped: AtomicU64,
}

impl Counters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Point-in-time snapshot of send queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendQueueStats {
    /// New data packets sent
    pub packets_sent: u64,
    /// Wire bytes of new data packets
    pub bytes_sent: u64,
    /// Payload bytes of new data packets
    pub payload_bytes_sent: u64,
    /// Retransmissions sent
    pub packets_retransmitted: u64,
    /// Wire bytes of retransmissions
    pub bytes_retransmitted: u64,
    /// Datagrams the socket refused
    pub send_failures: u64,
    /// ACKs that advanced the acknowledged point
    pub acks_received: u64,
    /// Loss reports applied
    pub naks_received: u64,
    /// Times the inactivity signal fired
    pub inactive_episodes: u64,
    /// Progress events discarded because nobody drained the channel
    pub events_dropped: u64,
    /// Packets waiting for their first transmission
    pub backlog: usize,
    /// Sent packets awaiting acknowledgement
    pub in_flight: usize,
    /// Sequence numbers waiting for retransmission
    pub pending_retransmissions: usize,
}

impl SendQueueStats {
    pub(crate) fn from_counters(counters: &Counters) -> Self {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        SendQueueStats {
            packets_sent: load(&counters.packets_sent),
            bytes_sent: load(&counters.bytes_sent),
            payload_bytes_sent: load(&counters.payload_bytes_sent),
            packets_retransmitted: load(&counters.packets_retransmitted),
            bytes_retransmitted: load(&counters.bytes_retransmitted),
            send_failures: load(&counters.send_failures),
            acks_received: load(&counters.acks_received),
            naks_received: load(&counters.naks_received),
            inactive_episodes: load(&counters.inactive_episodes),
            events_dropped: load(&counters.events_dropped),
            ..Default::default()
        }
    }

    /// Fraction of transmissions that were retransmissions
    pub fn retransmission_rate(&self) -> f64 {
        let total = self.packets_sent + self.packets_retransmitted;
        if total == 0 {
            0.0
        } else {
            self.packets_retransmitted as f64 / total as f64
        }
    }
}

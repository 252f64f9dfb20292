//! Reliable send queue
//!
//! One orchestrator thread per queue drives every transmission. Each pass it
//! prefers a pending retransmission, then a new packet from the backlog,
//! subject to the flow window and the pacing gate. ACK, NAK and tuning calls
//! arrive from other threads and only touch shared state plus a wake-up flag.
//!
//! Lock order is ledger before loss list. The orchestrator never holds two
//! locks at once and never holds one across a socket write.

use crate::backlog::{Backlog, Outgoing, PacketList};
use crate::events::{Counters, SendQueueEvent, SendQueueState, SendQueueStats, StateCell};
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use udt_io::{DatagramSocket, PacingGate, SocketError, Timestamp};
use udt_protocol::packet::MAX_PAYLOAD_SIZE;
use udt_protocol::{
    ControlError, ControlEvent, ControlPacket, DataPacket, LossList, LossRange, NakInfo,
    PacketError, SentPacketLedger, SeqCounter, SeqNumber,
};

/// Default flow window (packets in flight)
pub const DEFAULT_FLOW_WINDOW: u32 = 8192;

/// Default time the window may stay full before the queue reports inactivity
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of buffered progress events
pub const DEFAULT_EVENT_CAPACITY: usize = 4096;

/// Send queue errors
#[derive(Error, Debug)]
pub enum SendQueueError {
    #[error("Send queue is stopped")]
    Stopped,

    #[error("Packet list is empty")]
    EmptyPacketList,

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Failed to spawn send thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Send queue configuration
#[derive(Debug, Clone)]
pub struct SendQueueConfig {
    /// First sequence number to issue
    pub initial_seq: SeqNumber,
    /// Peer socket ID written into every data packet header
    pub dest_socket_id: u32,
    /// Maximum packets in flight
    pub flow_window: u32,
    /// Minimum spacing between new-packet transmissions (zero = unpaced)
    pub send_period: Duration,
    /// How long a full window may persist before `QueueInactive`
    pub inactivity_timeout: Duration,
    /// Largest payload accepted per packet
    pub max_payload_size: usize,
    /// Progress events buffered before new ones are dropped
    pub event_capacity: usize,
}

impl Default for SendQueueConfig {
    fn default() -> Self {
        SendQueueConfig {
            initial_seq: SeqNumber::new(0),
            dest_socket_id: 0,
            flow_window: DEFAULT_FLOW_WINDOW,
            send_period: Duration::ZERO,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            max_payload_size: MAX_PAYLOAD_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// State shared between the handle and the orchestrator thread
struct Shared {
    socket: Arc<dyn DatagramSocket>,
    destination: SocketAddr,
    dest_socket_id: u32,
    max_payload_size: usize,
    inactivity_timeout: Duration,
    start: Timestamp,

    backlog: Mutex<Backlog>,
    sent: RwLock<SentPacketLedger>,
    naks: Mutex<LossList>,

    /// Set by every mutator; cleared by the orchestrator when it wakes
    wake_pending: Mutex<bool>,
    wake_cond: Condvar,

    running: AtomicBool,
    state: StateCell,
    sequence: SeqCounter,
    /// Highest acknowledged sequence number; only written under the ledger lock
    last_ack: AtomicU32,
    flow_window: AtomicU32,
    pacing: PacingGate,

    counters: Counters,
    events: Sender<SendQueueEvent>,
    event_capacity: usize,
}

/// Per-thread bookkeeping for one window-full episode
#[derive(Debug, Default)]
struct Saturation {
    since: Option<Instant>,
    signalled: bool,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn flow_window(&self) -> usize {
        self.flow_window.load(Ordering::Relaxed) as usize
    }

    fn last_ack(&self) -> SeqNumber {
        SeqNumber::new_unchecked(self.last_ack.load(Ordering::Acquire))
    }

    /// Queue an event for the owner
    ///
    /// Only progress events are capped; inactivity and send failures are
    /// bounded by the flow window and loss reports, so they always go out.
    fn emit(&self, event: SendQueueEvent) {
        if event.is_progress() && self.events.len() >= self.event_capacity {
            Counters::bump(&self.counters.events_dropped, 1);
            tracing::trace!("Event channel full, dropping {:?}", event);
            return;
        }
        // Only fails once every receiver is gone
        let _ = self.events.send(event);
    }

    fn wake(&self) {
        let mut pending = self.wake_pending.lock();
        *pending = true;
        self.wake_cond.notify_one();
    }

    /// Block until woken, stopped, or `deadline` passes
    fn wait(&self, deadline: Option<Instant>) {
        let mut pending = self.wake_pending.lock();
        while !*pending && self.is_running() {
            match deadline {
                Some(at) => {
                    if self.wake_cond.wait_until(&mut pending, at).timed_out() {
                        break;
                    }
                }
                None => self.wake_cond.wait(&mut pending),
            }
        }
        *pending = false;
    }

    fn run(&self) {
        tracing::info!("Send queue to {} started", self.destination);
        let mut saturation = Saturation::default();

        while self.is_running() {
            if self.maybe_resend_packet() {
                continue;
            }

            if self.backlog.lock().is_empty() {
                saturation = Saturation::default();
                self.state.set(SendQueueState::Idle);
                self.wait(None);
                continue;
            }

            let in_flight = self.sent.read().len();
            if in_flight >= self.flow_window() {
                self.window_full(&mut saturation);
                continue;
            }
            saturation = Saturation::default();

            self.state.set(SendQueueState::Sending);
            match self.pacing.try_acquire(Instant::now()) {
                Ok(()) => self.send_new_packet(),
                Err(reopens_at) => self.wait(Some(reopens_at)),
            }
        }

        self.state.stop();
        tracing::info!("Send queue to {} stopped", self.destination);
    }

    /// Wait out a full flow window, signalling inactivity once per episode
    fn window_full(&self, saturation: &mut Saturation) {
        let now = Instant::now();
        let since = *saturation.since.get_or_insert(now);

        if saturation.signalled {
            self.state.set(SendQueueState::Inactive);
            self.wait(None);
            return;
        }

        let deadline = since + self.inactivity_timeout;
        if now >= deadline {
            saturation.signalled = true;
            Counters::bump(&self.counters.inactive_episodes, 1);
            tracing::warn!(
                "No acknowledgement from {} for {:?} with a full window",
                self.destination,
                now - since
            );
            self.emit(SendQueueEvent::QueueInactive);
            self.state.set(SendQueueState::Inactive);
            return;
        }

        self.state.set(SendQueueState::WindowFull);
        self.wait(Some(deadline));
    }

    /// Retransmit the lowest lost packet still in the ledger
    ///
    /// Returns false if nothing was retransmitted.
    fn maybe_resend_packet(&self) -> bool {
        loop {
            let popped = self.naks.lock().pop_smallest();
            let Some(seq) = popped else {
                return false;
            };

            let taken = self.sent.write().take(seq);
            let wire = match taken {
                Ok(wire) => wire,
                Err(e) => {
                    tracing::debug!("Skipping retransmission: {}", e);
                    continue;
                }
            };

            self.state.set(SendQueueState::Sending);
            match self.socket.send_to(&wire, self.destination) {
                Ok(_) => {
                    Counters::bump(&self.counters.packets_retransmitted, 1);
                    Counters::bump(&self.counters.bytes_retransmitted, wire.len() as u64);
                    tracing::debug!("Retransmitted packet {}", seq);
                    self.emit(SendQueueEvent::PacketRetransmitted { seq });
                }
                Err(error) => self.send_failed(seq, error),
            }
            return true;
        }
    }

    /// Assign a sequence number to the next backlog packet and send it
    fn send_new_packet(&self) {
        let popped = self.backlog.lock().pop_front();
        let Some(pending) = popped else {
            return;
        };

        let payload_size = pending.payload.len();
        // Issued and recorded under the ledger lock so an ACK racing the
        // send either rejects the number or finds it
        let (seq, wire) = {
            let mut sent = self.sent.write();
            let seq = self.sequence.issue();
            let timestamp = Timestamp::now().as_packet_timestamp(self.start);
            let wire = DataPacket::new(
                seq,
                pending.msg,
                timestamp,
                self.dest_socket_id,
                pending.payload,
            )
            .to_bytes()
            .freeze();
            sent.record(seq, wire.clone(), payload_size);
            (seq, wire)
        };
        let wire_size = wire.len();

        match self.socket.send_to(&wire, self.destination) {
            Ok(_) => {
                Counters::bump(&self.counters.packets_sent, 1);
                Counters::bump(&self.counters.bytes_sent, wire_size as u64);
                Counters::bump(&self.counters.payload_bytes_sent, payload_size as u64);
                tracing::trace!("Sent packet {} ({} bytes)", seq, wire_size);
                self.emit(SendQueueEvent::PacketSent {
                    seq,
                    wire_size,
                    payload_size,
                });
            }
            Err(error) => self.send_failed(seq, error),
        }
    }

    fn send_failed(&self, seq: SeqNumber, error: SocketError) {
        Counters::bump(&self.counters.send_failures, 1);
        tracing::warn!("Failed to send packet {}: {}", seq, error);
        self.emit(SendQueueEvent::SendFailed { seq, error });
    }

    fn ack(&self, seq: SeqNumber) {
        {
            let mut sent = self.sent.write();
            if seq.le(self.last_ack()) {
                tracing::trace!("Ignoring stale ACK {}", seq);
                return;
            }
            if seq.gt(self.sequence.last_issued()) {
                tracing::debug!("Ignoring ACK {} for a packet never sent", seq);
                return;
            }

            self.last_ack.store(seq.as_raw(), Ordering::Release);
            let released = sent.acknowledge_up_to(seq);
            self.naks.lock().remove_up_to(seq);
            Counters::bump(&self.counters.acks_received, 1);
            tracing::trace!("ACK {} released {} packets", seq, released);

            if sent.len() < self.flow_window() {
                self.state.clear_window_full();
            }
        }
        self.wake();
    }

    /// Merge one loss report into the loss list as a single update
    fn nak(&self, ranges: Vec<LossRange>) {
        {
            let sent = self.sent.read();
            let mut clipped = ranges.iter().filter_map(|&range| sent.clip(range)).peekable();
            if clipped.peek().is_none() {
                tracing::debug!(
                    "Ignoring NAK of {} ranges outside the unacknowledged window",
                    ranges.len()
                );
                return;
            }
            let mut naks = self.naks.lock();
            for range in clipped {
                naks.insert_range(range);
            }
            Counters::bump(&self.counters.naks_received, 1);
        }
        self.wake();
    }

    fn override_naks(&self, ranges: Vec<LossRange>) {
        {
            let sent = self.sent.read();
            let mut naks = self.naks.lock();
            naks.replace(ranges.into_iter().filter_map(|range| sent.clip(range)));
            Counters::bump(&self.counters.naks_received, 1);
            tracing::debug!("Loss list replaced, {} packets pending", naks.len());
        }
        self.wake();
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            tracing::debug!("Stopping send queue to {}", self.destination);
        }
        self.state.stop();
        self.wake();
    }
}

/// Handle to a running send queue
///
/// Dropping the handle stops the orchestrator thread and waits for it.
pub struct SendQueue {
    shared: Arc<Shared>,
    events: Receiver<SendQueueEvent>,
    thread: Option<JoinHandle<()>>,
}

impl SendQueue {
    /// Start a send queue transmitting to `destination` through `socket`
    pub fn start(
        socket: Arc<dyn DatagramSocket>,
        destination: SocketAddr,
        config: SendQueueConfig,
    ) -> Result<Self, SendQueueError> {
        let (tx, rx) = channel::unbounded();

        let shared = Arc::new(Shared {
            socket,
            destination,
            dest_socket_id: config.dest_socket_id,
            max_payload_size: config.max_payload_size,
            inactivity_timeout: config.inactivity_timeout,
            start: Timestamp::now(),
            backlog: Mutex::new(Backlog::new()),
            sent: RwLock::new(SentPacketLedger::new()),
            naks: Mutex::new(LossList::new()),
            wake_pending: Mutex::new(false),
            wake_cond: Condvar::new(),
            running: AtomicBool::new(true),
            state: StateCell::new(SendQueueState::Idle),
            sequence: SeqCounter::new(config.initial_seq),
            last_ack: AtomicU32::new(config.initial_seq.prev().as_raw()),
            flow_window: AtomicU32::new(config.flow_window),
            pacing: PacingGate::new(config.send_period),
            counters: Counters::default(),
            events: tx,
            event_capacity: config.event_capacity.max(1),
        });

        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(format!("udt-send-{}", destination))
            .spawn(move || worker.run())?;

        Ok(SendQueue {
            shared,
            events: rx,
            thread: Some(thread),
        })
    }

    fn enqueue(&self, outgoing: Outgoing) -> Result<u32, SendQueueError> {
        if !self.shared.is_running() {
            return Err(SendQueueError::Stopped);
        }
        outgoing.validate(self.shared.max_payload_size)?;

        let message = self.shared.backlog.lock().push(outgoing);
        self.shared.wake();
        Ok(message)
    }

    /// Queue a single-packet message, returning its message number
    pub fn queue_packet(&self, payload: Bytes) -> Result<u32, SendQueueError> {
        self.enqueue(Outgoing::Packet(payload))
    }

    /// Queue a multi-packet message as one unit, returning its message number
    pub fn queue_packet_list(&self, list: PacketList) -> Result<u32, SendQueueError> {
        if list.is_empty() {
            return Err(SendQueueError::EmptyPacketList);
        }
        self.enqueue(Outgoing::List(list))
    }

    /// Cumulatively acknowledge every packet up to and including `seq`
    ///
    /// Stale or duplicate acknowledgements are ignored.
    pub fn ack(&self, seq: SeqNumber) {
        self.shared.ack(seq);
    }

    /// Report the inclusive range `start..=end` as lost
    ///
    /// Numbers no longer held in the ledger are dropped from the report.
    pub fn nak(&self, start: SeqNumber, end: SeqNumber) {
        self.shared.nak(vec![LossRange::new(start, end)]);
    }

    /// Replace the loss list with the given ranges
    pub fn override_nak_list(&self, ranges: Vec<LossRange>) {
        self.shared.override_naks(ranges);
    }

    /// Replace the loss list from a serialized NAK control packet
    pub fn override_nak_list_from_packet(
        &self,
        packet: &ControlPacket,
    ) -> Result<(), SendQueueError> {
        let nak = NakInfo::from_packet(packet)?;
        self.shared.override_naks(nak.loss_ranges);
        Ok(())
    }

    /// Apply a decoded control event from the peer
    pub fn handle_control(&self, event: ControlEvent) {
        match event {
            ControlEvent::Ack(info) => self.ack(info.ack_seq),
            ControlEvent::Nak(ranges) => self.shared.nak(ranges),
            ControlEvent::FullNak(ranges) => self.override_nak_list(ranges),
            ControlEvent::Other(control_type) => {
                tracing::trace!("Ignoring {:?} control packet", control_type);
            }
        }
    }

    /// Stop the queue; idempotent
    ///
    /// Packets still in the backlog are abandoned.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        !self.shared.is_running()
    }

    /// Last sequence number assigned to a packet
    ///
    /// Before the first send this is the number preceding the initial one.
    pub fn current_sequence_number(&self) -> SeqNumber {
        self.shared.sequence.last_issued()
    }

    /// Highest cumulatively acknowledged sequence number
    pub fn last_acknowledged(&self) -> SeqNumber {
        self.shared.last_ack()
    }

    /// Change the flow window; takes effect on the next orchestrator pass
    pub fn set_flow_window_size(&self, packets: u32) {
        self.shared.flow_window.store(packets, Ordering::Relaxed);
        self.shared.wake();
    }

    pub fn flow_window_size(&self) -> u32 {
        self.shared.flow_window.load(Ordering::Relaxed)
    }

    /// Change the pacing period for new packets
    pub fn set_packet_send_period(&self, period: Duration) {
        self.shared.pacing.set_period(period);
        self.shared.wake();
    }

    pub fn packet_send_period(&self) -> Duration {
        self.shared.pacing.period()
    }

    pub fn state(&self) -> SendQueueState {
        self.shared.state.get()
    }

    pub fn destination(&self) -> SocketAddr {
        self.shared.destination
    }

    /// Packets waiting for their first transmission
    pub fn backlog_len(&self) -> usize {
        self.shared.backlog.lock().len()
    }

    /// Sent packets awaiting acknowledgement
    pub fn in_flight(&self) -> usize {
        self.shared.sent.read().len()
    }

    /// Sequence numbers waiting for retransmission
    pub fn loss_list_len(&self) -> usize {
        self.shared.naks.lock().len()
    }

    /// Receiver for queue events
    ///
    /// All clones share one channel; each event goes to one receiver.
    pub fn events(&self) -> Receiver<SendQueueEvent> {
        self.events.clone()
    }

    /// Snapshot of counters and queue depths
    pub fn stats(&self) -> SendQueueStats {
        SendQueueStats {
            backlog: self.backlog_len(),
            in_flight: self.in_flight(),
            pending_retransmissions: self.loss_list_len(),
            ..SendQueueStats::from_counters(&self.shared.counters)
        }
    }
}

impl Drop for SendQueue {
    fn drop(&mut self) {
        self.shared.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Send thread for {} panicked", self.shared.destination);
            }
        }
    }
}

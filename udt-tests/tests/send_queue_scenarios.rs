//! Send queue behaviour tests
//!
//! Drive a running queue through an in-memory socket and check ordering,
//! flow control, pacing and inactivity reporting.

mod common;

use bytes::Bytes;
use common::*;
use crossbeam::channel::Receiver;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use udt::{
    PacketList, SendQueueConfig, SendQueueError, SendQueueEvent, SendQueueState,
    DEFAULT_EVENT_CAPACITY, DEFAULT_FLOW_WINDOW,
};
use udt_protocol::packet::MAX_PAYLOAD_SIZE;
use udt_protocol::sequence::MAX_SEQ_NUMBER;
use udt_protocol::{ControlEvent, DataPacket, LossRange, NakInfo, PacketBoundary, SeqNumber};

/// Wait for the next `QueueInactive`, skipping other events
fn next_inactive(events: &Receiver<SendQueueEvent>, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(SendQueueEvent::QueueInactive) => return true,
            Ok(_) => continue,
            Err(_) => return false,
        }
    }
}

#[test]
fn test_retransmission_precedes_new_packets() {
    let (queue, socket) = start_queue(SendQueueConfig::default());

    for tag in 0..4 {
        queue.queue_packet(payload(tag)).unwrap();
    }
    wait_for("initial sends", || socket.count() == 4);

    // Hold back new packets; retransmissions are not paced
    queue.set_packet_send_period(Duration::from_secs(10));
    queue.queue_packet(payload(4)).unwrap();
    queue.queue_packet(payload(5)).unwrap();

    queue.ack(seq(1));
    assert_eq!(queue.in_flight(), 2);
    assert_eq!(queue.last_acknowledged(), seq(1));

    queue.nak(seq(2), seq(2));
    wait_for("retransmission", || socket.count() == 5);
    settle();

    let captured = socket.captured();
    assert_eq!(captured.len(), 5);
    assert_eq!(captured[4].seq(), 2);
    assert_eq!(captured[4].bytes, captured[2].bytes);
    assert_eq!(queue.backlog_len(), 2);

    queue.set_packet_send_period(Duration::ZERO);
    wait_for("backlog drained", || socket.count() == 7);
    assert_eq!(socket.seqs(), vec![0, 1, 2, 3, 2, 4, 5]);
}

#[test]
fn test_flow_window_limits_in_flight() {
    let (queue, socket) = start_queue(SendQueueConfig {
        flow_window: 2,
        inactivity_timeout: Duration::from_secs(60),
        ..Default::default()
    });

    for tag in 0..5 {
        queue.queue_packet(payload(tag)).unwrap();
    }
    wait_for("window full", || queue.state() == SendQueueState::WindowFull);
    settle();

    assert_eq!(socket.count(), 2);
    assert_eq!(queue.in_flight(), 2);
    assert_eq!(queue.backlog_len(), 3);

    queue.ack(seq(0));
    wait_for("one more send", || socket.count() == 3);
    settle();
    assert_eq!(socket.count(), 3);
    assert_eq!(queue.backlog_len(), 2);

    queue.set_flow_window_size(16);
    wait_for("window widened", || socket.count() == 5);
    wait_for("idle", || queue.state() == SendQueueState::Idle);
}

#[test]
fn test_pacing_spaces_new_packets() {
    let period = Duration::from_millis(10);
    let (queue, socket) = start_queue(SendQueueConfig {
        send_period: period,
        ..Default::default()
    });

    for tag in 0..5 {
        queue.queue_packet(payload(tag)).unwrap();
    }
    wait_for("paced sends", || socket.count() == 5);

    let captured = socket.captured();
    for pair in captured.windows(2) {
        let gap = pair[1].at - pair[0].at;
        assert!(gap >= Duration::from_millis(9), "sends only {:?} apart", gap);
    }
    assert_eq!(queue.packet_send_period(), period);
}

#[test]
fn test_retransmission_bypasses_pacing() {
    let period = Duration::from_millis(200);
    let (queue, socket) = start_queue(SendQueueConfig {
        send_period: period,
        ..Default::default()
    });

    queue.queue_packet(payload(0)).unwrap();
    wait_for("first send", || socket.count() == 1);

    queue.queue_packet(payload(1)).unwrap();
    queue.nak(seq(0), seq(0));
    wait_for("retransmission and second send", || socket.count() == 3);

    let captured = socket.captured();
    assert_eq!(captured[1].seq(), 0);
    assert!(captured[1].at - captured[0].at < Duration::from_millis(100));
    assert_eq!(captured[2].seq(), 1);
    assert!(captured[2].at - captured[0].at >= Duration::from_millis(190));
}

#[test]
fn test_inactivity_fires_once_per_episode() {
    let (queue, socket) = start_queue(SendQueueConfig {
        flow_window: 2,
        inactivity_timeout: Duration::from_millis(100),
        ..Default::default()
    });
    let events = queue.events();

    for tag in 0..5 {
        queue.queue_packet(payload(tag)).unwrap();
    }

    assert!(next_inactive(&events, Duration::from_secs(5)));
    assert_eq!(queue.state(), SendQueueState::Inactive);
    assert!(!next_inactive(&events, Duration::from_millis(300)));
    assert_eq!(queue.stats().inactive_episodes, 1);

    // Clearing the window ends the episode; the next saturation starts another
    queue.ack(seq(1));
    wait_for("refill", || socket.count() == 4);
    assert!(next_inactive(&events, Duration::from_secs(5)));
    assert_eq!(queue.stats().inactive_episodes, 2);
    assert_eq!(queue.backlog_len(), 1);
}

#[test]
fn test_inactivity_survives_undrained_progress_events() {
    let (queue, socket) = start_queue(SendQueueConfig {
        inactivity_timeout: Duration::from_millis(100),
        ..Default::default()
    });
    let events = queue.events();

    for _ in 0..=DEFAULT_FLOW_WINDOW {
        queue.queue_packet(Bytes::from_static(b"x")).unwrap();
    }
    wait_for("inactivity", || queue.state() == SendQueueState::Inactive);
    assert_eq!(socket.count(), DEFAULT_FLOW_WINDOW as usize);

    let drained: Vec<SendQueueEvent> = events.try_iter().collect();
    let inactive = drained
        .iter()
        .filter(|event| matches!(event, SendQueueEvent::QueueInactive))
        .count();
    let progress = drained.iter().filter(|event| event.is_progress()).count();

    assert_eq!(inactive, 1);
    assert_eq!(progress, DEFAULT_EVENT_CAPACITY);
    let stats = queue.stats();
    assert_eq!(stats.inactive_episodes, 1);
    assert_eq!(
        stats.events_dropped,
        (DEFAULT_FLOW_WINDOW as usize - DEFAULT_EVENT_CAPACITY) as u64
    );
}

#[test]
fn test_send_failures_survive_undrained_progress_events() {
    let (queue, socket) = start_queue(SendQueueConfig {
        event_capacity: 2,
        ..Default::default()
    });
    let events = queue.events();

    for tag in 0..4 {
        queue.queue_packet(payload(tag)).unwrap();
    }
    wait_for("sends", || socket.count() == 4);

    socket.set_failing(true);
    queue.queue_packet(payload(4)).unwrap();
    wait_for("failure", || queue.stats().send_failures == 1);

    let drained: Vec<SendQueueEvent> = events.try_iter().collect();
    assert_eq!(drained.len(), 3);
    assert!(matches!(
        drained.last(),
        Some(SendQueueEvent::SendFailed { seq: failed, .. }) if *failed == seq(4)
    ));
    assert_eq!(queue.stats().events_dropped, 2);
}

#[test]
fn test_multi_range_nak_applied_as_one_report() {
    let (queue, socket) = start_queue(SendQueueConfig::default());
    for tag in 0..8 {
        queue.queue_packet(payload(tag)).unwrap();
    }
    wait_for("sends", || socket.count() == 8);
    queue.ack(seq(0));

    queue.handle_control(ControlEvent::Nak(vec![
        LossRange::single(seq(0)),
        LossRange::new(seq(2), seq(3)),
        LossRange::single(seq(6)),
        LossRange::new(seq(20), seq(30)),
    ]));
    wait_for("retransmissions", || socket.count() == 11);
    settle();

    assert_eq!(&socket.seqs()[8..], &[2, 3, 6]);
    assert_eq!(queue.stats().naks_received, 1);
}

#[test]
fn test_nak_while_inactive_still_retransmits() {
    let (queue, socket) = start_queue(SendQueueConfig {
        flow_window: 1,
        inactivity_timeout: Duration::from_millis(50),
        ..Default::default()
    });
    let events = queue.events();

    queue.queue_packet(payload(0)).unwrap();
    queue.queue_packet(payload(1)).unwrap();
    assert!(next_inactive(&events, Duration::from_secs(5)));

    queue.nak(seq(0), seq(0));
    wait_for("retransmission", || socket.count() == 2);
    assert_eq!(socket.seqs(), vec![0, 0]);
}

#[test]
fn test_ack_is_idempotent() {
    let (queue, socket) = start_queue(SendQueueConfig::default());
    for tag in 0..6 {
        queue.queue_packet(payload(tag)).unwrap();
    }
    wait_for("sends", || socket.count() == 6);

    queue.ack(seq(3));
    let once = (queue.in_flight(), queue.loss_list_len(), queue.last_acknowledged());
    queue.ack(seq(3));
    let twice = (queue.in_flight(), queue.loss_list_len(), queue.last_acknowledged());

    assert_eq!(once, twice);
    assert_eq!(once.0, 2);
    assert_eq!(queue.stats().acks_received, 1);

    // Going backwards is ignored too
    queue.ack(seq(2));
    assert_eq!(queue.in_flight(), 2);
}

#[test]
fn test_nak_for_acknowledged_packets_ignored() {
    let (queue, socket) = start_queue(SendQueueConfig::default());
    for tag in 0..4 {
        queue.queue_packet(payload(tag)).unwrap();
    }
    wait_for("sends", || socket.count() == 4);
    queue.ack(seq(2));

    queue.nak(seq(0), seq(3));
    wait_for("retransmission", || socket.count() == 5);
    settle();

    assert_eq!(socket.seqs(), vec![0, 1, 2, 3, 3]);
}

#[test]
fn test_full_nak_replaces_loss_list() {
    let (queue, socket) = start_queue(SendQueueConfig::default());
    for tag in 0..5 {
        queue.queue_packet(payload(tag)).unwrap();
    }
    wait_for("sends", || socket.count() == 5);

    let report = NakInfo::new(vec![
        LossRange::single(seq(1)),
        LossRange::new(seq(3), seq(9)),
    ]);
    queue
        .override_nak_list_from_packet(&report.to_packet(true, 0, 0))
        .unwrap();
    wait_for("retransmissions", || socket.count() == 8);
    settle();

    assert_eq!(&socket.seqs()[5..], &[1, 3, 4]);
}

#[test]
fn test_override_rejects_non_nak_packet() {
    let (queue, _socket) = start_queue(SendQueueConfig::default());
    let ack = udt_protocol::AckInfo::new(seq(0)).to_packet(1, 0, 0);

    assert!(matches!(
        queue.override_nak_list_from_packet(&ack),
        Err(SendQueueError::Control(_))
    ));
    assert_eq!(queue.loss_list_len(), 0);
}

#[test]
fn test_sequence_wraps_at_boundary() {
    let (queue, socket) = start_queue(SendQueueConfig {
        initial_seq: SeqNumber::new(MAX_SEQ_NUMBER - 1),
        ..Default::default()
    });
    assert_eq!(queue.current_sequence_number(), seq(MAX_SEQ_NUMBER - 2));

    for tag in 0..4 {
        queue.queue_packet(payload(tag)).unwrap();
    }
    wait_for("sends", || socket.count() == 4);
    assert_eq!(socket.seqs(), vec![MAX_SEQ_NUMBER - 1, MAX_SEQ_NUMBER, 0, 1]);
    assert_eq!(queue.current_sequence_number(), seq(1));

    queue.ack(seq(0));
    assert_eq!(queue.in_flight(), 1);

    queue.nak(seq(MAX_SEQ_NUMBER), seq(1));
    wait_for("retransmission", || socket.count() == 5);
    assert_eq!(socket.seqs()[4], 1);
}

#[test]
fn test_messages_are_not_interleaved() {
    let (queue, socket) = start_queue(SendQueueConfig::default());
    let queue = Arc::new(queue);

    let producers: Vec<_> = (0..4u8)
        .map(|producer| {
            let queue = queue.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    let message = Bytes::from(vec![producer; 50]);
                    let list = PacketList::from_message(message, 10, true);
                    queue.queue_packet_list(list).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    wait_for("all fragments", || socket.count() == 200);

    let mut positions: HashMap<u32, Vec<usize>> = HashMap::new();
    for (index, captured) in socket.captured().iter().enumerate() {
        let packet = DataPacket::from_bytes(&captured.bytes).unwrap();
        let msg = packet.msg_number();
        let fragments = positions.entry(msg.seq).or_default();

        let expected = match fragments.len() {
            0 => PacketBoundary::First,
            4 => PacketBoundary::Last,
            _ => PacketBoundary::Subsequent,
        };
        assert_eq!(msg.boundary, expected);
        fragments.push(index);
    }

    assert_eq!(positions.len(), 40);
    for indices in positions.values() {
        assert_eq!(indices.len(), 5);
        assert_eq!(indices[4] - indices[0], 4, "fragments interleaved");
    }
}

#[test]
fn test_send_failure_recovered_by_nak() {
    let (queue, socket) = start_queue(SendQueueConfig::default());
    let events = queue.events();

    socket.set_failing(true);
    queue.queue_packet(payload(0)).unwrap();
    match events.recv_timeout(Duration::from_secs(5)).unwrap() {
        SendQueueEvent::SendFailed { seq: failed, error } => {
            assert_eq!(failed, seq(0));
            assert!(!error.is_would_block());
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(queue.in_flight(), 1);
    assert_eq!(socket.count(), 0);

    socket.set_failing(false);
    queue.nak(seq(0), seq(0));
    wait_for("recovery", || socket.count() == 1);
    assert_eq!(socket.seqs(), vec![0]);
    assert_eq!(queue.stats().send_failures, 1);
}

#[test]
fn test_stop_wakes_and_rejects() {
    let (queue, _socket) = start_queue(SendQueueConfig {
        flow_window: 1,
        inactivity_timeout: Duration::from_secs(60),
        ..Default::default()
    });
    queue.queue_packet(payload(0)).unwrap();
    queue.queue_packet(payload(1)).unwrap();
    wait_for("window full", || queue.state() == SendQueueState::WindowFull);

    queue.stop();
    wait_for("stopped", || queue.state() == SendQueueState::Stopped);
    queue.stop();

    assert!(matches!(
        queue.queue_packet(payload(2)),
        Err(SendQueueError::Stopped)
    ));
    // Abandoned, not sent
    assert_eq!(queue.backlog_len(), 1);
}

#[test]
fn test_oversized_payload_rejected() {
    let (queue, socket) = start_queue(SendQueueConfig::default());

    let result = queue.queue_packet(Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]));
    assert!(matches!(result, Err(SendQueueError::Packet(_))));

    queue.queue_packet(Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE])).unwrap();
    wait_for("max-size send", || socket.count() == 1);
    assert_eq!(queue.stats().payload_bytes_sent, MAX_PAYLOAD_SIZE as u64);
}

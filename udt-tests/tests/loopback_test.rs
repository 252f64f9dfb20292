//! End-to-end test over real UDP sockets
//!
//! A send queue streams to a loopback peer that drops one packet, NAKs the
//! gap and ACKs once everything has arrived.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use udt::{DatagramSocket, SendQueue, SendQueueConfig, SendQueueState, UdtSocket};
use udt_protocol::{AckInfo, ControlEvent, ControlPacket, DataPacket, LossRange, NakInfo, SeqNumber};

const PACKETS: u32 = 20;
const DROPPED: u32 = 7;

fn bind_loopback() -> UdtSocket {
    let socket = UdtSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    socket
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    socket
}

/// Forward one control datagram from the peer into the queue
fn deliver_control(sender: &UdtSocket, queue: &SendQueue) {
    let mut buf = [0u8; 2048];
    let (n, _) = sender.recv_from(&mut buf).unwrap();
    let packet = ControlPacket::from_bytes(&buf[..n]).unwrap();
    queue.handle_control(ControlEvent::from_packet(&packet).unwrap());
}

#[test]
fn test_loopback_transfer_with_loss() {
    let sender = Arc::new(bind_loopback());
    let receiver = bind_loopback();
    let receiver_addr = receiver.local_addr().unwrap();
    let sender_addr = sender.local_addr().unwrap();

    let send_socket: Arc<dyn DatagramSocket> = sender.clone();
    let queue = SendQueue::start(
        send_socket,
        receiver_addr,
        SendQueueConfig {
            dest_socket_id: 4242,
            ..Default::default()
        },
    )
    .unwrap();

    for i in 0..PACKETS {
        queue
            .queue_packet(Bytes::from(format!("packet-{:02}", i)))
            .unwrap();
    }

    // Peer side: collect everything, pretending one packet was lost
    let mut received = BTreeMap::new();
    let mut buf = [0u8; 2048];
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut first_copy_of_dropped = true;
    while (received.len() as u32) < PACKETS - 1 {
        assert!(Instant::now() < deadline, "transfer stalled");
        let (n, from) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(from, sender_addr);

        let packet = DataPacket::from_bytes(&buf[..n]).unwrap();
        assert_eq!(packet.header.dest_socket_id, 4242);
        let seq = packet.seq_number().as_raw();
        if seq == DROPPED && first_copy_of_dropped {
            first_copy_of_dropped = false;
            continue;
        }
        received.insert(seq, packet.payload);
    }
    assert!(!received.contains_key(&DROPPED));

    // Report the gap and wait for the retransmission
    let nak = NakInfo::new(vec![LossRange::single(SeqNumber::new(DROPPED))]).to_packet(false, 0, 0);
    receiver.send_to(&nak.to_bytes(), sender_addr).unwrap();
    deliver_control(&sender, &queue);

    let (n, _) = receiver.recv_from(&mut buf).unwrap();
    let retransmitted = DataPacket::from_bytes(&buf[..n]).unwrap();
    assert_eq!(retransmitted.seq_number(), SeqNumber::new(DROPPED));
    received.insert(DROPPED, retransmitted.payload);

    for (seq, payload) in &received {
        assert_eq!(payload.as_ref(), format!("packet-{:02}", seq).as_bytes());
    }

    // Cumulative ACK for everything
    let ack = AckInfo::new(SeqNumber::new(PACKETS - 1)).to_packet(1, 0, 0);
    receiver.send_to(&ack.to_bytes(), sender_addr).unwrap();
    deliver_control(&sender, &queue);

    assert_eq!(queue.in_flight(), 0);
    assert_eq!(queue.last_acknowledged(), SeqNumber::new(PACKETS - 1));

    let stats = queue.stats();
    assert_eq!(stats.packets_sent, PACKETS as u64);
    assert_eq!(stats.packets_retransmitted, 1);
    assert_eq!(stats.send_failures, 0);

    queue.stop();
    let deadline = Instant::now() + Duration::from_secs(5);
    while queue.state() != SendQueueState::Stopped {
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(1));
    }
}

//! Shared fixtures for send queue tests

#![allow(dead_code)]

use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use udt::{SendQueue, SendQueueConfig};
use udt_io::{DatagramSocket, SocketError};
use udt_protocol::{DataPacket, SeqNumber};

/// One datagram captured by [`RecordingSocket`]
#[derive(Debug, Clone)]
pub struct Captured {
    pub at: Instant,
    pub bytes: Bytes,
}

impl Captured {
    pub fn seq(&self) -> u32 {
        DataPacket::from_bytes(&self.bytes)
            .expect("captured datagram is a data packet")
            .seq_number()
            .as_raw()
    }
}

/// In-memory socket recording every datagram handed to it
#[derive(Default)]
pub struct RecordingSocket {
    sent: Mutex<Vec<Captured>>,
    fail: AtomicBool,
}

impl RecordingSocket {
    pub fn captured(&self) -> Vec<Captured> {
        self.sent.lock().clone()
    }

    pub fn seqs(&self) -> Vec<u32> {
        self.sent.lock().iter().map(Captured::seq).collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Make every following send fail until cleared
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl DatagramSocket for RecordingSocket {
    fn send_to(&self, buf: &[u8], _target: SocketAddr) -> Result<usize, SocketError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SocketError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "network unreachable",
            )));
        }
        self.sent.lock().push(Captured {
            at: Instant::now(),
            bytes: Bytes::copy_from_slice(buf),
        });
        Ok(buf.len())
    }
}

pub fn destination() -> SocketAddr {
    "127.0.0.1:9000".parse().unwrap()
}

pub fn start_queue(config: SendQueueConfig) -> (SendQueue, Arc<RecordingSocket>) {
    let socket = Arc::new(RecordingSocket::default());
    let queue = SendQueue::start(socket.clone(), destination(), config).unwrap();
    (queue, socket)
}

pub fn seq(n: u32) -> SeqNumber {
    SeqNumber::new(n)
}

pub fn payload(tag: u8) -> Bytes {
    Bytes::from(vec![tag; 64])
}

/// Poll `condition` until it holds, panicking after five seconds
pub fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

/// Give the orchestrator time to act on anything it could act on
pub fn settle() {
    thread::sleep(Duration::from_millis(50));
}

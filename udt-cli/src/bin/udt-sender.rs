//! UDT Sender - reliable stream sender
//!
//! Reads from stdin or a file and pushes it through a send queue, feeding the
//! peer's ACK and NAK packets back so lost packets are retransmitted.

use bytes::Bytes;
use clap::Parser;
use crossbeam::channel::Receiver;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::net::{Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use udt::io::{Timer, UdtSocket};
use udt::protocol::{ControlEvent, Packet};
use udt::{DatagramSocket, SendQueue, SendQueueEvent};
use udt_cli::{display_compact_stats, display_queue_stats, format_bytes, Config, SenderConfig};

/// How long the control thread blocks in `recv_from`
const CONTROL_POLL: Duration = Duration::from_millis(100);

/// Sleep while the backlog is full or the tail is draining
const IDLE_POLL: Duration = Duration::from_millis(1);

/// Kernel send buffer requested for the data socket
const SEND_BUFFER_SIZE: usize = 4 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "udt-sender")]
#[command(about = "UDT reliable stream sender", long_about = None)]
struct Args {
    /// Configuration file (TOML); flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print an example configuration and exit
    #[arg(long)]
    example_config: bool,

    /// Destination address (host:port)
    #[arg(short, long)]
    destination: Option<SocketAddr>,

    /// Local bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Input source: file path or '-' for stdin
    #[arg(short, long)]
    input: Option<String>,

    /// Payload bytes per packet
    #[arg(long)]
    payload_size: Option<usize>,

    /// Maximum packets in flight
    #[arg(long)]
    flow_window: Option<u32>,

    /// Microseconds between new packets (0 = unpaced)
    #[arg(long)]
    send_period_us: Option<u64>,

    /// Seconds with a full window and no ACK before giving up
    #[arg(long)]
    inactivity_timeout: Option<u64>,

    /// Statistics interval in seconds (0 disables)
    #[arg(long)]
    stats: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Merge the config file (if any) with command-line overrides
    fn sender_config(&self) -> anyhow::Result<SenderConfig> {
        let mut config = match (&self.config, self.destination) {
            (Some(path), _) => Config::from_file(path)?
                .sender
                .ok_or_else(|| anyhow::anyhow!("{} has no [sender] section", path.display()))?,
            (None, Some(destination)) => SenderConfig::new(destination),
            (None, None) => anyhow::bail!("--destination is required without --config"),
        };

        if let Some(destination) = self.destination {
            config.destination = destination;
        }
        if let Some(bind) = self.bind {
            config.bind = Some(bind);
        }
        if let Some(input) = &self.input {
            config.input = input.clone();
        }
        if let Some(size) = self.payload_size {
            config.payload_size = size;
        }
        if let Some(window) = self.flow_window {
            config.flow_window = window;
        }
        if let Some(period) = self.send_period_us {
            config.send_period_us = period;
        }
        if let Some(timeout) = self.inactivity_timeout {
            config.inactivity_timeout_secs = timeout;
        }
        if let Some(stats) = self.stats {
            config.stats_interval_secs = stats;
        }

        config.validate()?;
        Ok(config)
    }
}

fn default_bind(destination: SocketAddr) -> SocketAddr {
    match destination {
        SocketAddr::V4(addr) if addr.ip().is_loopback() => SocketAddr::from(([127, 0, 0, 1], 0)),
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(addr) if addr.ip().is_loopback() => SocketAddr::from((Ipv6Addr::LOCALHOST, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

fn open_input(input: &str) -> anyhow::Result<Box<dyn Read>> {
    if input == "-" {
        tracing::info!("Reading from stdin");
        Ok(Box::new(io::stdin().lock()))
    } else {
        tracing::info!("Reading from file: {}", input);
        let file = File::open(input)
            .map_err(|e| anyhow::anyhow!("Failed to open input '{}': {}", input, e))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Fill `buf` from `reader`, short only at end of input
fn read_chunk(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Feed inbound control packets from the peer into the queue
fn receive_control(socket: &UdtSocket, queue: &SendQueue, peer: SocketAddr, running: &AtomicBool) {
    let mut buffer = vec![0u8; 2048];

    while running.load(Ordering::Relaxed) {
        let (n, from) = match socket.recv_from(&mut buffer) {
            Ok(result) => result,
            Err(e) if e.is_would_block() => continue,
            Err(e) => {
                tracing::error!("Receive error: {}", e);
                thread::sleep(CONTROL_POLL);
                continue;
            }
        };

        if from != peer {
            tracing::debug!("Ignoring {} bytes from unknown peer {}", n, from);
            continue;
        }

        match Packet::from_bytes(&buffer[..n]) {
            Ok(Packet::Control(packet)) => match ControlEvent::from_packet(&packet) {
                Ok(event) => queue.handle_control(event),
                Err(e) => tracing::warn!("Malformed control packet: {}", e),
            },
            Ok(Packet::Data(_)) => tracing::debug!("Ignoring data packet from {}", from),
            Err(e) => tracing::warn!("Failed to parse packet: {}", e),
        }
    }
}

/// Drain queue events; fails once the peer has gone quiet
fn check_events(events: &Receiver<SendQueueEvent>) -> anyhow::Result<()> {
    for event in events.try_iter() {
        match event {
            SendQueueEvent::QueueInactive => {
                anyhow::bail!("Peer stopped acknowledging with a full window")
            }
            SendQueueEvent::PacketRetransmitted { seq } => {
                tracing::trace!("Retransmitted {}", seq)
            }
            SendQueueEvent::SendFailed { .. } | SendQueueEvent::PacketSent { .. } => {}
        }
    }
    Ok(())
}

fn stream(
    queue: &SendQueue,
    config: &SenderConfig,
    reader: &mut dyn Read,
    start: Instant,
) -> anyhow::Result<()> {
    let events = queue.events();
    let mut buffer = vec![0u8; config.payload_size];
    let mut stats_timer = Timer::new(config.stats_interval());
    let backlog_limit = config.flow_window as usize;
    let mut eof = false;

    loop {
        check_events(&events)?;

        if config.stats_interval_secs > 0 && stats_timer.try_fire() {
            display_compact_stats(&queue.stats(), start.elapsed());
        }

        if eof {
            if queue.backlog_len() == 0 && queue.in_flight() == 0 {
                return Ok(());
            }
            thread::sleep(IDLE_POLL);
            continue;
        }

        if queue.backlog_len() >= backlog_limit {
            thread::sleep(IDLE_POLL);
            continue;
        }

        let n = read_chunk(reader, &mut buffer)?;
        if n == 0 {
            tracing::info!("End of input reached, waiting for acknowledgements");
            eof = true;
            continue;
        }
        queue.queue_packet(Bytes::copy_from_slice(&buffer[..n]))?;
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.example_config {
        print!("{}", toml::to_string_pretty(&Config::example_sender())?);
        return Ok(());
    }

    udt_cli::init_logging(args.verbose);
    let config = args.sender_config()?;

    tracing::info!("UDT Sender starting...");

    let socket = Arc::new(UdtSocket::bind(
        config.bind.unwrap_or_else(|| default_bind(config.destination)),
    )?);
    socket.set_read_timeout(Some(CONTROL_POLL))?;
    socket.set_send_buffer_size(SEND_BUFFER_SIZE)?;
    tracing::info!(
        "Sender bound to {} for {} (send buffer {})",
        socket.local_addr()?,
        config.destination,
        format_bytes(socket.send_buffer_size()? as u64)
    );

    let send_socket: Arc<dyn DatagramSocket> = socket.clone();
    let queue = Arc::new(SendQueue::start(
        send_socket,
        config.destination,
        config.send_queue_config()?,
    )?);

    let running = Arc::new(AtomicBool::new(true));
    let control = {
        let socket = socket.clone();
        let queue = queue.clone();
        let running = running.clone();
        let peer = config.destination;
        thread::Builder::new()
            .name("udt-control".to_string())
            .spawn(move || receive_control(&socket, &queue, peer, &running))?
    };

    let start = Instant::now();
    let mut reader = open_input(&config.input)?;
    let result = stream(&queue, &config, &mut *reader, start);

    running.store(false, Ordering::Relaxed);
    queue.stop();
    if control.join().is_err() {
        tracing::error!("Control thread panicked");
    }

    display_queue_stats(&queue.stats(), queue.state(), start.elapsed());
    result
}

//! UDT Sink - minimal receiving peer
//!
//! Writes received payloads in sequence order to stdout or a file, and
//! reports progress back to the sender with cumulative ACKs and NAKs.

use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use udt::io::{Timer, Timestamp, UdtSocket};
use udt::protocol::{AckInfo, NakInfo, Packet, SeqNumber};
use udt::DatagramSocket;
use udt_cli::{format_bytes, Config, Reassembler, SinkConfig};

#[derive(Parser, Debug)]
#[command(name = "udt-sink")]
#[command(about = "UDT test receiver", long_about = None)]
struct Args {
    /// Configuration file (TOML); flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print an example configuration and exit
    #[arg(long)]
    example_config: bool,

    /// Listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Output file (use '-' for stdout)
    #[arg(short, long)]
    output: Option<String>,

    /// Milliseconds between cumulative ACKs
    #[arg(long)]
    ack_interval_ms: Option<u64>,

    /// First sequence number the sender uses
    #[arg(long)]
    initial_seq: Option<u32>,

    /// Statistics interval in seconds (0 disables)
    #[arg(long)]
    stats: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn sink_config(&self) -> anyhow::Result<SinkConfig> {
        let mut config = match (&self.config, self.listen) {
            (Some(path), _) => Config::from_file(path)?
                .sink
                .ok_or_else(|| anyhow::anyhow!("{} has no [sink] section", path.display()))?,
            (None, Some(listen)) => Config::example_sink()
                .sink
                .map(|sink| SinkConfig { listen, ..sink })
                .ok_or_else(|| anyhow::anyhow!("no default sink configuration"))?,
            (None, None) => anyhow::bail!("--listen is required without --config"),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if let Some(interval) = self.ack_interval_ms {
            config.ack_interval_ms = interval;
        }
        if let Some(seq) = self.initial_seq {
            config.initial_seq = seq;
        }
        if let Some(stats) = self.stats {
            config.stats_interval_secs = stats;
        }

        if config.ack_interval_ms == 0 {
            anyhow::bail!("ack_interval_ms must be at least 1");
        }
        Ok(config)
    }
}

fn open_output(output: &str) -> anyhow::Result<Box<dyn Write>> {
    if output == "-" {
        tracing::info!("Writing to stdout");
        Ok(Box::new(BufWriter::new(io::stdout())))
    } else {
        tracing::info!("Writing to file: {}", output);
        let file = File::create(output)
            .map_err(|e| anyhow::anyhow!("Failed to create file '{}': {}", output, e))?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Receive-side progress shared by the main loop helpers
struct Sink {
    socket: UdtSocket,
    reassembler: Reassembler,
    peer: Option<SocketAddr>,
    start: Timestamp,
    last_acked: SeqNumber,
    ack_number: u16,
    total_bytes: u64,
    packet_count: u64,
    duplicates: u64,
}

impl Sink {
    fn send_control(&self, bytes: &[u8]) {
        let Some(peer) = self.peer else {
            return;
        };
        if let Err(e) = self.socket.send_to(bytes, peer) {
            tracing::warn!("Failed to send control packet to {}: {}", peer, e);
        }
    }

    /// Send a cumulative ACK if delivery advanced; otherwise re-report
    /// every open gap as a full loss list
    fn report(&mut self) {
        let timestamp = Timestamp::now().as_packet_timestamp(self.start);
        let ack_point = self.reassembler.ack_point();

        if ack_point != self.last_acked {
            self.ack_number = self.ack_number.wrapping_add(1);
            let packet = AckInfo::new(ack_point).to_packet(self.ack_number, timestamp, 0);
            self.send_control(&packet.to_bytes());
            self.last_acked = ack_point;
            tracing::trace!("ACK {}", ack_point);
            return;
        }

        let missing = self.reassembler.missing();
        if !missing.is_empty() {
            tracing::debug!("Stalled at {}, reporting {} loss ranges", ack_point, missing.len());
            let packet = NakInfo::new(missing).to_packet(true, timestamp, 0);
            self.send_control(&packet.to_bytes());
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.example_config {
        print!("{}", toml::to_string_pretty(&Config::example_sink())?);
        return Ok(());
    }

    udt_cli::init_logging(args.verbose);
    let config = args.sink_config()?;
    let initial_seq = SeqNumber::try_from_raw(config.initial_seq)
        .ok_or_else(|| anyhow::anyhow!("initial_seq exceeds 31 bits"))?;

    tracing::info!("UDT Sink starting...");

    let socket = UdtSocket::bind(config.listen)?;
    socket.set_read_timeout(Some(config.ack_interval()))?;
    tracing::info!("Listening on: {}", socket.local_addr()?);

    let mut writer = open_output(&config.output)?;
    let mut sink = Sink {
        socket,
        reassembler: Reassembler::new(initial_seq),
        peer: None,
        start: Timestamp::now(),
        last_acked: initial_seq.prev(),
        ack_number: 0,
        total_bytes: 0,
        packet_count: 0,
        duplicates: 0,
    };

    let mut ack_timer = Timer::new(config.ack_interval());
    let mut stats_timer = Timer::new(config.stats_interval());
    let mut buffer = vec![0u8; 2048];
    let start_time = Instant::now();

    tracing::info!("Ready to receive packets...");

    loop {
        if ack_timer.try_fire() {
            sink.report();
            writer.flush()?;
        }

        if config.stats_interval_secs > 0 && stats_timer.try_fire() {
            let elapsed = start_time.elapsed().as_secs_f64();
            tracing::info!(
                "Received {} packets ({}), {} duplicates, {} waiting on gaps, {:.2} Mbps",
                sink.packet_count,
                format_bytes(sink.total_bytes),
                sink.duplicates,
                sink.reassembler.buffered_len(),
                (sink.total_bytes as f64 * 8.0) / (elapsed * 1_000_000.0)
            );
        }

        let (n, from) = match sink.socket.recv_from(&mut buffer) {
            Ok(result) => result,
            Err(e) if e.is_would_block() => continue,
            Err(e) => {
                tracing::error!("Receive error: {}", e);
                continue;
            }
        };

        let packet = match Packet::from_bytes(&buffer[..n]) {
            Ok(Packet::Data(packet)) => packet,
            Ok(Packet::Control(packet)) => {
                tracing::debug!("Ignoring {:?} control packet", packet.control_type());
                continue;
            }
            Err(e) => {
                tracing::warn!("Failed to parse packet from {}: {}", from, e);
                continue;
            }
        };

        if sink.peer != Some(from) {
            tracing::info!("Receiving from {}", from);
            sink.peer = Some(from);
        }

        let delivery = sink
            .reassembler
            .accept(packet.seq_number(), packet.payload);
        if delivery.duplicate {
            sink.duplicates += 1;
            continue;
        }
        sink.packet_count += 1;

        if let Some(gap) = delivery.gap {
            tracing::debug!("Gap {}..={}", gap.start, gap.end);
            let timestamp = Timestamp::now().as_packet_timestamp(sink.start);
            let nak = NakInfo::new(vec![gap]).to_packet(false, timestamp, 0);
            sink.send_control(&nak.to_bytes());
        }

        for payload in delivery.ready {
            writer.write_all(&payload)?;
            sink.total_bytes += payload.len() as u64;
        }
    }
}

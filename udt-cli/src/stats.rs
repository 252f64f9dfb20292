//! Statistics display and formatting

use udt::{SendQueueState, SendQueueStats};
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format bandwidth in human-readable form
pub fn format_bandwidth(bps: u64) -> String {
    const KBPS: u64 = 1000;
    const MBPS: u64 = KBPS * 1000;
    const GBPS: u64 = MBPS * 1000;

    if bps >= GBPS {
        format!("{:.2} Gbps", bps as f64 / GBPS as f64)
    } else if bps >= MBPS {
        format!("{:.2} Mbps", bps as f64 / MBPS as f64)
    } else if bps >= KBPS {
        format!("{:.2} Kbps", bps as f64 / KBPS as f64)
    } else {
        format!("{} bps", bps)
    }
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Average throughput in bits per second
pub fn throughput_bps(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 * 8.0 / secs) as u64
    } else {
        0
    }
}

/// Display send queue statistics
pub fn display_queue_stats(stats: &SendQueueStats, state: SendQueueState, uptime: Duration) {
    eprintln!("\n┌─────────────────────────────────────────────────────────────┐");
    eprintln!("│ SEND QUEUE STATISTICS                                       │");
    eprintln!("├─────────────────────────────────────────────────────────────┤");
    eprintln!("│ State:  {:?}", state);
    eprintln!("│ Uptime: {}", format_duration(uptime));
    eprintln!("├─────────────────────────────────────────────────────────────┤");
    eprintln!(
        "│ Packets:  {} sent / {} retransmitted ({:.2}%)",
        stats.packets_sent,
        stats.packets_retransmitted,
        stats.retransmission_rate() * 100.0
    );
    eprintln!(
        "│ Bytes:    {} payload / {} on the wire",
        format_bytes(stats.payload_bytes_sent),
        format_bytes(stats.bytes_sent + stats.bytes_retransmitted)
    );
    eprintln!(
        "│ Rate:     {}",
        format_bandwidth(throughput_bps(stats.payload_bytes_sent, uptime))
    );
    eprintln!(
        "│ Queues:   {} backlog / {} in flight / {} lost",
        stats.backlog, stats.in_flight, stats.pending_retransmissions
    );
    eprintln!(
        "│ Control:  {} ACKs / {} NAKs",
        stats.acks_received, stats.naks_received
    );
    if stats.send_failures > 0 || stats.inactive_episodes > 0 {
        eprintln!(
            "│ Problems: {} send failures / {} inactive episodes",
            stats.send_failures, stats.inactive_episodes
        );
    }
    eprintln!("└─────────────────────────────────────────────────────────────┘");
}

/// Display compact stats on one line (for continuous updates)
pub fn display_compact_stats(stats: &SendQueueStats, uptime: Duration) {
    eprint!(
        "\r[{:8}] Sent: {} | Rate: {} | Packets: {} | Retx: {} | In flight: {}         ",
        format_duration(uptime),
        format_bytes(stats.payload_bytes_sent),
        format_bandwidth(throughput_bps(stats.payload_bytes_sent, uptime)),
        stats.packets_sent,
        stats.packets_retransmitted,
        stats.in_flight
    );

    use std::io::Write;
    let _ = std::io::stderr().flush();
}

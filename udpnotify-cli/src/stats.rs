//! Statistics display and formatting

use std::net::SocketAddr;
use udpnotify::protocol::RttEstimator;
use udpnotify::ConnectionStats;

/// One direction of traffic: datagram count and payload volume
pub fn format_traffic(packets: u64, bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} datagrams, {} B", packets, bytes)
    } else {
        format!("{} datagrams, {:.1} KiB", packets, bytes as f64 / 1024.0)
    }
}

/// Format an RTT given in seconds
pub fn format_rtt(seconds: f64) -> String {
    if seconds >= 1.0 {
        format!("{:.2}s", seconds)
    } else if seconds >= 0.001 {
        format!("{:.2}ms", seconds * 1_000.0)
    } else {
        format!("{:.0}µs", seconds * 1_000_000.0)
    }
}

/// Share of settled notify packets reported lost, in percent
pub fn loss_percent(stats: &ConnectionStats) -> f64 {
    let settled = stats.notify_delivered + stats.notify_lost;
    if settled == 0 {
        0.0
    } else {
        stats.notify_lost as f64 * 100.0 / settled as f64
    }
}

/// Display per-connection statistics
pub fn display_connection_stats(remote: SocketAddr, stats: &ConnectionStats, rtt: &RttEstimator) {
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ CONNECTION {:<48} │", remote);
    println!("├─────────────────────────────────────────────────────────────┤");
    println!(
        "│ Sent:     {}",
        format_traffic(stats.packets_sent, stats.bytes_sent)
    );
    println!(
        "│ Received: {}",
        format_traffic(stats.packets_received, stats.bytes_received)
    );
    println!(
        "│ Notify:   {} sent / {} delivered / {} lost ({:.1}%) / {} stale",
        stats.notify_sent,
        stats.notify_delivered,
        stats.notify_lost,
        loss_percent(stats),
        stats.notify_stale
    );
    if rtt.sample_count() > 0 {
        println!(
            "│ RTT:      {} latest / {} smoothed / {} var",
            format_rtt(rtt.latest()),
            format_rtt(rtt.srtt()),
            format_rtt(rtt.rtt_var())
        );
    } else {
        println!("│ RTT:      N/A");
    }
    println!("└─────────────────────────────────────────────────────────────┘");
}

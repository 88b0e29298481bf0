//! Statistics display and formatting

use gamestream_protocol::CounterSnapshot;
use std::io::{self, Write};
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

/// Format a loss ratio as a percentage
pub fn format_loss(rate: f64) -> String {
    format!("{:.2}%", rate * 100.0)
}

/// Frames per second over an interval
pub fn frame_rate(frames: u64, interval: Duration) -> f64 {
    let secs = interval.as_secs_f64();
    if secs > 0.0 {
        frames as f64 / secs
    } else {
        0.0
    }
}

/// One-line summary of a stream's counters
pub fn summarize(name: &str, delta: &CounterSnapshot, interval: Duration) -> String {
    format!(
        "{}: {} pkts, loss {}, {:.1} fps, {} dropped",
        name,
        delta.packets_received,
        format_loss(delta.loss_rate()),
        frame_rate(delta.frames_completed, interval),
        delta.frames_dropped
    )
}

/// Display compact stats on one line (for continuous updates)
pub fn display_compact_stats(
    video: &CounterSnapshot,
    audio: &CounterSnapshot,
    written: u64,
    elapsed: Duration,
) {
    print!(
        "\r[{:8}] Frames: {} ({} dropped) | Video loss: {} | Audio loss: {} | Written: {}         ",
        format_duration(elapsed),
        video.frames_completed,
        video.frames_dropped,
        format_loss(video.loss_rate()),
        format_loss(audio.loss_rate()),
        format_bytes(written)
    );
    let _ = io::stdout().flush();
}

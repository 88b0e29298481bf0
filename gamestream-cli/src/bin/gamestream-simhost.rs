//! Game Stream Simulated Host
//!
//! Serves a synthetic H.264 video stream and a dummy audio stream to one
//! receiver, optionally dropping video datagrams to exercise loss recovery.

use clap::Parser;
use gamestream::{DEFAULT_AUDIO_PORT, DEFAULT_VIDEO_PORT};
use gamestream_cli::{synthetic_frame, DropPattern, SimulatedHost};
use gamestream_protocol::HostGeneration;
use std::net::{IpAddr, SocketAddr};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "gamestream-simhost")]
#[command(about = "Simulated game stream host", long_about = None)]
struct Args {
    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Video port
    #[arg(long, default_value_t = DEFAULT_VIDEO_PORT)]
    video_port: u16,

    /// Audio port
    #[arg(long, default_value_t = DEFAULT_AUDIO_PORT)]
    audio_port: u16,

    /// Frames per second
    #[arg(long, default_value = "60")]
    fps: u32,

    /// Frames to send (0 sends forever)
    #[arg(short, long, default_value = "600")]
    frames: u32,

    /// Sync frame interval in frames
    #[arg(long, default_value = "120")]
    gop: u32,

    /// Slice bytes per frame
    #[arg(long, default_value = "8000")]
    frame_size: usize,

    /// Video payload bytes per packet
    #[arg(long, default_value = "1024")]
    packet_size: usize,

    /// Host generation (legacy, gen5, gen7)
    #[arg(long, default_value = "gen7")]
    generation: String,

    /// Drop every Nth video datagram (0 disables)
    #[arg(long, default_value = "0")]
    drop_every: u64,

    /// Seconds to wait for the receiver's keep-alives
    #[arg(long, default_value = "30")]
    wait: u64,
}

fn parse_generation(generation: &str) -> anyhow::Result<HostGeneration> {
    match generation {
        "legacy" => Ok(HostGeneration::Legacy),
        "gen5" => Ok(HostGeneration::Gen5),
        "gen7" => Ok(HostGeneration::Gen7),
        _ => anyhow::bail!("Invalid host generation: {}", generation),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    if args.fps == 0 || args.gop == 0 {
        anyhow::bail!("--fps and --gop must be non-zero");
    }

    let generation = parse_generation(&args.generation)?;
    let mut host = SimulatedHost::bind(
        SocketAddr::new(args.bind, args.video_port),
        SocketAddr::new(args.bind, args.audio_port),
        args.packet_size,
        generation,
    )?
    .with_drops(DropPattern::every(args.drop_every));

    tracing::info!("Waiting for receiver...");
    if !host.wait_for_client(Duration::from_secs(args.wait))? {
        anyhow::bail!("No keep-alive from a receiver within {}s", args.wait);
    }

    let frame_interval = Duration::from_secs(1) / args.fps;
    let audio_payload = [0xFCu8; 40];
    let start = Instant::now();
    let mut frame_index = 1u32;

    loop {
        if args.frames > 0 && frame_index > args.frames {
            break;
        }

        let sync = (frame_index - 1) % args.gop == 0;
        let frame = synthetic_frame(frame_index, sync, args.frame_size);
        host.send_frame(frame_index, &frame)?;
        host.send_audio(frame_index.wrapping_mul(480), &audio_payload)?;

        if frame_index % args.fps == 0 {
            let stats = host.stats();
            tracing::info!(
                "Sent {} frames: {} video packets ({} dropped), {} audio packets",
                frame_index,
                stats.video_sent,
                stats.video_dropped,
                stats.audio_sent
            );
        }

        // Pace against the start time so send jitter does not accumulate
        let due = start + frame_interval * frame_index;
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
        frame_index = frame_index.wrapping_add(1);
    }

    let stats = host.stats();
    tracing::info!(
        "Finished: {} video packets ({} dropped), {} audio packets",
        stats.video_sent,
        stats.video_dropped,
        stats.audio_sent
    );
    Ok(())
}

//! Game Stream Receiver
//!
//! Receives a host's video and audio streams and writes the video as an
//! Annex-B elementary stream to stdout or a file.

use clap::Parser;
use gamestream::{Capabilities, Collaborators, StreamSession};
use gamestream_cli::{
    display_compact_stats, summarize, AnnexBWriter, Codec, CountingAudioDecoder, LogListener,
    LoggingControl, ReceiverFileConfig,
};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gamestream-receiver")]
#[command(about = "Game stream video and audio receiver", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write an example configuration file and exit
    #[arg(long)]
    generate_config: Option<PathBuf>,

    /// Host address
    #[arg(long)]
    host: Option<IpAddr>,

    /// Host video port
    #[arg(long)]
    video_port: Option<u16>,

    /// Host audio port
    #[arg(long)]
    audio_port: Option<u16>,

    /// Video codec (h264, h265)
    #[arg(long)]
    codec: Option<String>,

    /// Output file (use '-' for stdout)
    #[arg(short, long)]
    output: Option<String>,

    /// Decode on the receive threads
    #[arg(long)]
    direct_submit: bool,

    /// Use reference frame invalidation instead of full resyncs
    #[arg(long)]
    rfi: bool,

    /// Stop after this many seconds (0 runs until the stream fails)
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// Statistics interval in seconds (0 disables)
    #[arg(long)]
    stats: Option<u64>,

    /// Show a continuously updated status line
    #[arg(long)]
    compact: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_codec(codec: &str) -> anyhow::Result<Codec> {
    match codec {
        "h264" => Ok(Codec::H264),
        "h265" | "hevc" => Ok(Codec::H265),
        _ => anyhow::bail!("Invalid codec: {}", codec),
    }
}

fn load_config(args: &Args) -> anyhow::Result<ReceiverFileConfig> {
    let mut config = match &args.config {
        Some(path) => ReceiverFileConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load '{}': {}", path.display(), e))?,
        None => {
            let host = args
                .host
                .ok_or_else(|| anyhow::anyhow!("--host is required without --config"))?;
            ReceiverFileConfig {
                host,
                output: "-".to_string(),
                ..ReceiverFileConfig::example()
            }
        }
    };

    // Command line overrides the file
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.video_port {
        config.video_port = port;
    }
    if let Some(port) = args.audio_port {
        config.audio_port = port;
    }
    if let Some(codec) = &args.codec {
        config.codec = parse_codec(codec)?;
    }
    if let Some(output) = &args.output {
        config.output = output.clone();
    }
    if let Some(stats) = args.stats {
        config.stats_interval_secs = stats;
    }
    config.direct_submit |= args.direct_submit;
    config.reference_frame_invalidation |= args.rfi;

    config.validate()?;
    Ok(config)
}

fn open_output(output: &str) -> anyhow::Result<Box<dyn Write + Send>> {
    if output == "-" {
        tracing::info!("Writing to stdout");
        Ok(Box::new(io::stdout()))
    } else {
        tracing::info!("Writing to file: {}", output);
        let file = File::create(output)
            .map_err(|e| anyhow::anyhow!("Failed to create file '{}': {}", output, e))?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    if let Some(path) = &args.generate_config {
        ReceiverFileConfig::example().to_file(path)?;
        tracing::info!("Wrote example configuration to {}", path.display());
        return Ok(());
    }

    let config = load_config(&args)?;
    tracing::info!("Game stream receiver starting...");
    tracing::info!("Host: {} ({:?})", config.host, config.codec);

    let mut video_caps = Capabilities::empty();
    let mut audio_caps = Capabilities::empty();
    if config.direct_submit {
        video_caps = video_caps | Capabilities::DIRECT_SUBMIT;
        audio_caps = audio_caps | Capabilities::DIRECT_SUBMIT;
    }
    if config.reference_frame_invalidation {
        video_caps = video_caps | Capabilities::REFERENCE_FRAME_INVALIDATION;
    }

    let writer = AnnexBWriter::new(open_output(&config.output)?, video_caps);
    let written = writer.counter();
    let audio = CountingAudioDecoder::new(audio_caps);
    let (audio_payloads, audio_concealments) = audio.counts();
    let control = Arc::new(LoggingControl::default());
    let listener = Arc::new(LogListener::default());

    let mut session = StreamSession::start(
        config.stream_config(),
        Collaborators {
            video_decoder: Box::new(writer),
            audio_decoder: Box::new(audio),
            control: control.clone(),
            listener: listener.clone(),
        },
    )?;
    tracing::info!(
        "Receiving on video {} / audio {}",
        session.local_video_addr(),
        session.local_audio_addr()
    );

    let start = Instant::now();
    let run_for = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let stats_interval = config.stats_interval();
    let mut last_stats = Instant::now();
    let mut last_video = session.video_stats();
    let mut last_audio = session.audio_stats();

    while session.is_running() {
        if run_for.is_some_and(|limit| start.elapsed() >= limit) {
            break;
        }
        thread::sleep(Duration::from_millis(100));

        if !stats_interval.is_zero() && last_stats.elapsed() >= stats_interval {
            let interval = last_stats.elapsed();
            last_stats = Instant::now();
            let video = session.video_stats();
            let audio = session.audio_stats();

            if args.compact {
                display_compact_stats(&video, &audio, written.bytes(), start.elapsed());
            } else {
                tracing::info!("{}", summarize("video", &video.since(&last_video), interval));
                tracing::info!("{}", summarize("audio", &audio.since(&last_audio), interval));
            }
            last_video = video;
            last_audio = audio;
        }
    }

    session.stop();

    tracing::info!(
        "Done: {} units ({} bytes), {} resync points, audio {} payloads / {} concealed, {} resyncs / {} invalidations requested",
        written.units(),
        written.bytes(),
        written.sync_frames(),
        audio_payloads.load(Ordering::Relaxed),
        audio_concealments.load(Ordering::Relaxed),
        control.resyncs(),
        control.invalidations()
    );

    if listener.terminated() {
        anyhow::bail!("stream terminated by a transport failure");
    }
    Ok(())
}

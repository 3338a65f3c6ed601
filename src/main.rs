use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod remux;

/// Copy the audio and video streams of a media file into another container.
#[derive(Parser, Debug)]
#[command(name = "lite-remux", version)]
struct Args {
    /// Input media file.
    input: PathBuf,

    /// Output file. Required unless --info is given.
    output: Option<PathBuf>,

    /// Output muxer short name (e.g. "mp4", "mpegts"); inferred from the output extension by default.
    #[arg(short, long)]
    format: Option<String>,

    /// Print stream information and exit.
    #[arg(long)]
    info: bool,

    /// Only copy the best video stream.
    #[arg(long)]
    video_only: bool,

    /// Use the muxer's interleaving queue.
    #[arg(long)]
    interleaved: bool,
}

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_bridge", log::LevelFilter::Info)
        .filter_module("lite_remux", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();
    ffmpeg_bridge::init().context("ffmpeg init")?;

    if args.info {
        let info = ffmpeg_bridge::inspect(&args.input)
            .with_context(|| format!("inspect {}", args.input.display()))?;
        print!("{}", info);
        return Ok(());
    }

    let output = args
        .output
        .clone()
        .context("an output file is required unless --info is given")?;
    let job = remux::RemuxJob {
        input: args.input,
        output,
        format: args.format,
        video_only: args.video_only,
        interleaved: args.interleaved,
    };

    let cancel = CancellationToken::new();
    let handle_cancel = cancel.clone();
    let mut handle = tokio::task::spawn_blocking(move || remux::run(&job, &handle_cancel));

    let stats = loop {
        tokio::select! {
            res = &mut handle => break res.context("remux task")??,
            _ = tokio::signal::ctrl_c() => {
                log::warn!("interrupted, finishing the output");
                cancel.cancel();
            },
        }
    };

    log::info!(
        "copied {} packets ({} bytes) across {} streams{}",
        stats.packets,
        stats.bytes,
        stats.streams,
        if stats.cancelled { ", interrupted" } else { "" }
    );
    Ok(())
}

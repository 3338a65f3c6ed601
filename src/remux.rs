use std::path::PathBuf;

use anyhow::Context;
use ffmpeg_bridge::{InputContext, OutputContext, media, release};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RemuxJob {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Muxer short name; inferred from the output extension when unset.
    pub format: Option<String>,
    pub video_only: bool,
    pub interleaved: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RemuxStats {
    pub streams: usize,
    pub packets: u64,
    pub bytes: u64,
    pub cancelled: bool,
}

/// Copies the selected streams of `job.input` into `job.output` without
/// re-encoding. Blocking; checks `cancel` between packets.
pub fn run(job: &RemuxJob, cancel: &CancellationToken) -> anyhow::Result<RemuxStats> {
    let mut input = InputContext::open(&job.input)
        .with_context(|| format!("open input {}", job.input.display()))?;

    let mut output = match &job.format {
        Some(name) => OutputContext::with_format_name(&job.output.to_string_lossy(), name),
        None => OutputContext::new(job.output.as_path()),
    }
    .with_context(|| format!("create output {}", job.output.display()))?;
    output.set_interleaved(job.interleaved);

    // input stream index -> output stream index
    let mut mapping: Vec<Option<usize>> = vec![None; input.nb_streams()];
    let selected: Vec<usize> = if job.video_only {
        vec![input.best_stream(media::Type::Video)?.index()]
    } else {
        input
            .streams()
            .filter(|s| matches!(s.medium(), media::Type::Video | media::Type::Audio))
            .map(|s| s.index())
            .collect()
    };
    for index in selected {
        let source = input
            .stream(index)
            .with_context(|| format!("input stream {}", index))?;
        let target = output.add_stream_from(&source)?.index();
        log::info!(
            "mapping stream {} ({:?} {:?}) to {}",
            index,
            source.medium(),
            source.codec_id(),
            target
        );
        mapping[index] = Some(target);
    }
    let mut stats = RemuxStats {
        streams: mapping.iter().flatten().count(),
        ..Default::default()
    };
    if stats.streams == 0 {
        anyhow::bail!("{} has no audio or video stream", job.input.display());
    }

    output.write_header().context("write header")?;

    while let Some(mut packet) = input.next_packet() {
        if cancel.is_cancelled() {
            stats.cancelled = true;
            release(&mut packet);
            break;
        }
        let Some(target) = mapping.get(packet.stream_index()).copied().flatten() else {
            continue;
        };
        packet.set_stream_index(target);
        stats.bytes += packet.size() as u64;
        output.write_packet(&mut packet)?;
        release(&mut packet);
        stats.packets += 1;
    }
    if let Some(e) = input.take_error() {
        output.close_and_release();
        return Err(e).context("read input");
    }

    output.write_trailer().context("write trailer")?;
    output.close_and_release();
    input.close_and_release();
    Ok(stats)
}

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ffmpeg_next::{Dictionary, Rational, codec, format::Pixel};

pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 200;
pub const FRAMES: i64 = 50;

/// A two second MPEG-1 clip in mp4, moov first so it can be read without seeking.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub input: PathBuf,
}

impl Fixture {
    pub fn new() -> anyhow::Result<Self> {
        let _ = env_logger::builder().is_test(true).try_init();
        ffmpeg_bridge::init()?;
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("sample.mp4");
        write_sample(&input)?;
        Ok(Self { dir, input })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn write_sample(path: &Path) -> anyhow::Result<()> {
    let codec = ffmpeg_next::encoder::find(codec::Id::MPEG1VIDEO)
        .ok_or_else(|| anyhow::anyhow!("mpeg1video encoder not available"))?;
    let mut octx = ffmpeg_next::format::output(&path)?;
    let global_header = octx
        .format()
        .flags()
        .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER);

    let time_base = Rational::new(1, 25);
    let mut encoder = codec::context::Context::new_with_codec(codec)
        .encoder()
        .video()?;
    encoder.set_width(WIDTH);
    encoder.set_height(HEIGHT);
    encoder.set_format(Pixel::YUV420P);
    encoder.set_time_base(time_base);
    encoder.set_frame_rate(Some(Rational::new(25, 1)));
    encoder.set_gop(10);
    if global_header {
        encoder.set_flags(codec::Flags::GLOBAL_HEADER);
    }
    let mut encoder = encoder.open()?;

    {
        let mut ost = octx.add_stream(codec)?;
        ost.set_parameters(&encoder);
        ost.set_time_base(time_base);
    }
    let mut opts = Dictionary::new();
    opts.set("movflags", "faststart");
    octx.write_header_with(opts)?;
    let ost_time_base = octx
        .stream(0)
        .ok_or_else(|| anyhow::anyhow!("fixture stream missing"))?
        .time_base();

    let mut frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, WIDTH, HEIGHT);
    for i in 0..FRAMES {
        for plane in 0..3 {
            let shade = ((i * 5 + plane as i64 * 40) % 255) as u8;
            frame.data_mut(plane).fill(shade);
        }
        frame.set_pts(Some(i));
        encoder.send_frame(&frame)?;
        drain(&mut encoder, &mut octx, time_base, ost_time_base)?;
    }
    encoder.send_eof()?;
    drain(&mut encoder, &mut octx, time_base, ost_time_base)?;
    octx.write_trailer()?;
    Ok(())
}

fn drain(
    encoder: &mut ffmpeg_next::encoder::Video,
    octx: &mut ffmpeg_next::format::context::Output,
    from: Rational,
    to: Rational,
) -> anyhow::Result<()> {
    let mut packet = ffmpeg_next::Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(0);
        packet.rescale_ts(from, to);
        packet.write_interleaved(octx)?;
    }
    Ok(())
}

/// Shared sink for a custom writer.
#[derive(Clone, Default)]
pub struct Sink(pub Arc<Mutex<Vec<u8>>>);

impl Sink {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl std::io::Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| std::io::Error::other("sink poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

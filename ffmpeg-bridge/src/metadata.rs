//! A summary of an open input, printed as `[STREAM]`/`[FORMAT]` sections of
//! `key=value` lines.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use ffmpeg_next::{Rational, codec, media};

use crate::{error::Result, input::InputContext, stream::Stream};

#[derive(Debug, Clone)]
pub struct FormatInfo {
    pub format_name: String,
    pub duration: Option<Duration>,
    /// Bits per second, when the demuxer knows it.
    pub bit_rate: Option<i64>,
    pub nb_streams: usize,
}

/// Parameters that only exist for one kind of stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamLayout {
    Video {
        width: u32,
        height: u32,
        avg_frame_rate: Rational,
    },
    Audio {
        sample_rate: u32,
        channels: u32,
    },
    Other,
}

#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    pub medium: media::Type,
    pub codec: codec::Id,
    pub time_base: Rational,
    /// In `time_base` units.
    pub duration_ts: Option<i64>,
    pub layout: StreamLayout,
}

impl StreamInfo {
    pub fn codec_type(&self) -> &'static str {
        match self.medium {
            media::Type::Video => "video",
            media::Type::Audio => "audio",
            media::Type::Subtitle => "subtitle",
            media::Type::Data => "data",
            media::Type::Attachment => "attachment",
            media::Type::Unknown => "unknown",
        }
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }
}

impl From<&Stream<'_>> for StreamInfo {
    fn from(stream: &Stream<'_>) -> Self {
        let layout = match stream.medium() {
            media::Type::Video => StreamLayout::Video {
                width: stream.width(),
                height: stream.height(),
                avg_frame_rate: stream.rate(),
            },
            media::Type::Audio => StreamLayout::Audio {
                sample_rate: stream.sample_rate(),
                channels: stream.channels(),
            },
            _ => StreamLayout::Other,
        };
        Self {
            index: stream.index(),
            medium: stream.medium(),
            codec: stream.codec_id(),
            time_base: stream.time_base(),
            duration_ts: stream.duration(),
            layout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub format: FormatInfo,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    pub fn from_input(input: &InputContext) -> Self {
        let streams: Vec<StreamInfo> = input.streams().map(|s| StreamInfo::from(&s)).collect();
        let bit_rate = input.bit_rate();
        Self {
            format: FormatInfo {
                format_name: input.format_name().to_string(),
                duration: input.duration(),
                bit_rate: (bit_rate > 0).then_some(bit_rate),
                nb_streams: streams.len(),
            },
            streams,
        }
    }
}

/// `key=value`, with `N/A` for unknown values.
fn field(f: &mut fmt::Formatter<'_>, key: &str, value: Option<impl fmt::Display>) -> fmt::Result {
    match value {
        Some(value) => writeln!(f, "{}={}", key, value),
        None => writeln!(f, "{}=N/A", key),
    }
}

fn ratio(r: Rational) -> String {
    format!("{}/{}", r.numerator(), r.denominator())
}

impl fmt::Display for FormatInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[FORMAT]")?;
        writeln!(f, "format_name={}", self.format_name)?;
        writeln!(f, "nb_streams={}", self.nb_streams)?;
        field(f, "duration", self.duration.map(|d| format!("{:.6}", d.as_secs_f64())))?;
        field(f, "bit_rate", self.bit_rate)?;
        writeln!(f, "[/FORMAT]")
    }
}

impl fmt::Display for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[STREAM]")?;
        writeln!(f, "index={}", self.index)?;
        writeln!(f, "codec_name={}", self.codec_name())?;
        writeln!(f, "codec_type={}", self.codec_type())?;
        match self.layout {
            StreamLayout::Video {
                width,
                height,
                avg_frame_rate,
            } => {
                writeln!(f, "width={}", width)?;
                writeln!(f, "height={}", height)?;
                writeln!(f, "avg_frame_rate={}", ratio(avg_frame_rate))?;
            }
            StreamLayout::Audio {
                sample_rate,
                channels,
            } => {
                writeln!(f, "sample_rate={}", sample_rate)?;
                writeln!(f, "channels={}", channels)?;
            }
            StreamLayout::Other => {}
        }
        writeln!(f, "time_base={}", ratio(self.time_base))?;
        field(f, "duration_ts", self.duration_ts)?;
        writeln!(f, "[/STREAM]")
    }
}

/// Streams first, then the container.
impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stream in &self.streams {
            write!(f, "{}", stream)?;
        }
        write!(f, "{}", self.format)
    }
}

/// Opens `path`, summarizes it and closes it again.
pub fn inspect(path: impl AsRef<Path>) -> Result<MediaInfo> {
    let mut input = InputContext::open(path)?;
    let info = MediaInfo::from_input(&input);
    input.close_and_release();
    Ok(info)
}

//! Resource-safe access to FFmpeg's format layer: demuxing, muxing, stream
//! setup and custom byte I/O, with every native object released exactly once.

pub mod codec;
pub mod config;
pub mod error;
pub mod format;
pub mod handle;
pub mod input;
pub mod io;
pub mod metadata;
pub mod output;
pub mod packet;
pub mod stream;

pub use codec::{CodecContext, find_decoder, find_encoder, find_encoder_by_name};
pub use error::{Error, Result};
pub use format::{InputFormat, OutputFormat};
pub use handle::{HandleKind, RegistrySnapshot, Release, registry, release};
pub use input::{InputContext, InputState, Packets};
pub use io::{IoBridge, IoBridgeBuilder};
pub use metadata::{MediaInfo, inspect};
pub use output::{OutputContext, OutputState, OutputTarget};
pub use packet::Packet;
pub use stream::{Stream, StreamMut};

pub use ffmpeg_next::{Codec, Rational, codec::Flags as CodecFlags, codec::Id as CodecId, media};

/// Registers FFmpeg components and applies the configured native log level.
/// Safe to call more than once.
pub fn init() -> Result<()> {
    ffmpeg_next::init()?;
    ffmpeg_next::util::log::set_level(config::config().ffmpeg_log_level());
    Ok(())
}

use thiserror::Error;

use crate::handle::HandleKind;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to allocate native {0}")]
    Allocation(HandleKind),

    #[error("output format is not initialized. Unable to allocate context")]
    FormatResolution,

    #[error("input format not found: {0}")]
    InputFormatNotFound(String),

    #[error("failed to open input {url:?}: {source}")]
    Open {
        url: String,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("codec not found: {0}")]
    CodecNotFound(String),

    #[error("no {0:?} stream found")]
    NoStream(ffmpeg_next::media::Type),

    #[error("header write error: {0}")]
    HeaderWrite(String),

    #[error("failed to allocate a new stream")]
    StreamAlloc,

    #[error("io bridge error: {0}")]
    IoBridge(String),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("{0} has already been released")]
    Released(HandleKind),

    #[error("read error: {0}")]
    Read(#[source] ffmpeg_next::Error),

    #[error("write error: {0}")]
    Write(#[source] ffmpeg_next::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("ffmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Maps a negative FFmpeg return code to an error, passing non-negative codes through.
pub(crate) fn check(ret: std::ffi::c_int) -> std::result::Result<std::ffi::c_int, ffmpeg_next::Error> {
    if ret < 0 {
        Err(ffmpeg_next::Error::from(ret))
    } else {
        Ok(ret)
    }
}

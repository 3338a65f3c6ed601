use std::ffi::CString;
use std::iter::FusedIterator;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::time::Duration;

use ffmpeg_next::{Dictionary, ffi, media};

use crate::{
    error::{Error, Result, check},
    format::InputFormat,
    handle::{HandleKind, NativeHandle, Release},
    io::{IoBridge, IoDirection},
    packet::Packet,
    stream::Stream,
};

unsafe fn free_format_ctx(ptr: NonNull<ffi::AVFormatContext>) {
    unsafe { ffi::avformat_free_context(ptr.as_ptr()) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    Unopened,
    Opened,
    Closed,
}

/// A demuxing format context.
///
/// Not safe to drive from several threads at once; every cursor operation
/// takes `&mut self`.
pub struct InputContext {
    handle: NativeHandle<ffi::AVFormatContext>,
    io: Option<IoBridge>,
    forced_format: Option<InputFormat>,
    options: Option<Dictionary<'static>>,
    url: String,
    state: InputState,
    eof: bool,
    error: Option<Error>,
}

impl InputContext {
    /// An empty, unopened context.
    pub fn new() -> Result<Self> {
        let ptr = unsafe { ffi::avformat_alloc_context() };
        Ok(Self {
            handle: NativeHandle::owned(ptr, HandleKind::FormatCtx, free_format_ctx)?,
            io: None,
            forced_format: None,
            options: None,
            url: String::new(),
            state: InputState::Unopened,
            eof: false,
            error: None,
        })
    }

    /// Opens `path`, probing its format and streams.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut ctx = Self::new()?;
        ctx.open_input(&path.as_ref().to_string_lossy())?;
        Ok(ctx)
    }

    /// Opens `path` with a forced demuxer instead of format detection.
    /// An unknown demuxer name fails like an unreadable source.
    pub fn open_with_format(path: impl AsRef<Path>, format_name: &str) -> Result<Self> {
        let url = path.as_ref().to_string_lossy();
        let mut ctx = Self::new()?;
        if let Err(e) = ctx.set_input_format(format_name) {
            log::warn!("{}", e);
            return Err(Error::Open {
                url: url.into_owned(),
                source: ffmpeg_next::Error::DemuxerNotFound,
            });
        }
        ctx.open_input(&url)?;
        Ok(ctx)
    }

    /// Opens media served by a custom reader. The demuxer must be named: there
    /// is no file name to guess it from.
    pub fn open_with_io(io: IoBridge, format_name: &str) -> Result<Self> {
        let mut ctx = Self::new()?;
        ctx.set_input_format(format_name)?;
        ctx.set_io(io)?;
        ctx.open_input("")?;
        Ok(ctx)
    }

    pub fn state(&self) -> InputState {
        self.state
    }

    fn ensure_unopened(&self, what: &'static str) -> Result<()> {
        match self.state {
            InputState::Unopened => Ok(()),
            InputState::Opened => Err(Error::InvalidState(what)),
            InputState::Closed => Err(Error::InvalidState("input context is closed")),
        }
    }

    /// Forces the demuxer, e.g. "mov" or "mpegts".
    pub fn set_input_format(&mut self, name: &str) -> Result<&mut Self> {
        self.ensure_unopened("input format must be set before opening")?;
        self.forced_format = Some(InputFormat::find(name)?);
        Ok(self)
    }

    /// Demuxer option passed to the open call.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<&mut Self> {
        self.ensure_unopened("options must be set before opening")?;
        self.options
            .get_or_insert_with(Dictionary::new)
            .set(key, value);
        Ok(self)
    }

    /// Installs a custom reader. Only allowed before the context is opened.
    pub fn set_io(&mut self, mut io: IoBridge) -> Result<&mut Self> {
        if self.state != InputState::Unopened {
            return Err(Error::IoBridge(
                "io bridge must be installed before the input is opened".into(),
            ));
        }
        if self.io.is_some() {
            return Err(Error::IoBridge("io bridge already installed".into()));
        }
        let ptr = self.handle.as_ptr()?;
        let pb = io.attach(IoDirection::Read)?;
        unsafe {
            (*ptr).pb = pb;
            (*ptr).flags |= ffi::AVFMT_FLAG_CUSTOM_IO as i32;
        }
        self.io = Some(io);
        Ok(self)
    }

    /// Opens the configured context. `url` is ignored by a custom reader and may be empty.
    pub fn open_input(&mut self, url: &str) -> Result<()> {
        self.ensure_unopened("input is already opened")?;
        if self.io.is_some() && self.forced_format.is_none() {
            return Err(Error::IoBridge(
                "custom input requires an explicit input format".into(),
            ));
        }

        let curl =
            CString::new(url).map_err(|e| Error::InvalidArgument(format!("{:?}: {}", url, e)))?;
        let fmt = self.forced_format.map_or(ptr::null(), |f| f.as_ptr());
        let mut ptr = self.handle.as_ptr()?;
        let mut opts = match self.options.take() {
            Some(opts) => unsafe { opts.disown() },
            None => ptr::null_mut(),
        };

        let ret = unsafe { ffi::avformat_open_input(&mut ptr, curl.as_ptr(), fmt, &mut opts) };
        // unconsumed options
        drop(unsafe { Dictionary::own(opts) });

        if let Err(source) = check(ret) {
            // avformat_open_input frees the context on failure
            self.handle.forget();
            self.state = InputState::Closed;
            if let Some(mut io) = self.io.take() {
                let bridge_error = io.take_error();
                io.release();
                if let Some(e) = bridge_error {
                    return Err(e);
                }
            }
            return Err(Error::Open {
                url: url.to_string(),
                source,
            });
        }

        self.url = url.to_string();
        self.state = InputState::Opened;

        let ret = unsafe { ffi::avformat_find_stream_info(ptr, ptr::null_mut()) };
        if let Err(source) = check(ret) {
            self.close_and_release();
            return Err(Error::Open {
                url: url.to_string(),
                source,
            });
        }

        log::info!(
            "opened input {:?}: format {}, {} streams",
            url,
            self.format_name(),
            self.nb_streams()
        );
        Ok(())
    }

    fn raw(&self) -> Option<&ffi::AVFormatContext> {
        self.handle.as_ptr().ok().map(|ptr| unsafe { &*ptr })
    }

    pub fn format_name(&self) -> &str {
        self.forced_format
            .as_ref()
            .map(|f| f.name())
            .or_else(|| {
                let raw = self.raw()?;
                if raw.iformat.is_null() {
                    return None;
                }
                let name = unsafe { std::ffi::CStr::from_ptr((*raw.iformat).name) };
                name.to_str().ok()
            })
            .unwrap_or_default()
    }

    pub fn nb_streams(&self) -> usize {
        self.raw().map_or(0, |raw| raw.nb_streams as usize)
    }

    pub fn stream(&self, index: usize) -> Option<Stream<'_>> {
        let raw = self.raw()?;
        if index >= raw.nb_streams as usize {
            return None;
        }
        let ptr = unsafe { *raw.streams.add(index) };
        Stream::wrap(ptr).ok()
    }

    pub fn streams(&self) -> impl Iterator<Item = Stream<'_>> + '_ {
        (0..self.nb_streams()).filter_map(move |i| self.stream(i))
    }

    /// The stream FFmpeg ranks best for `medium`.
    pub fn best_stream(&self, medium: media::Type) -> Result<Stream<'_>> {
        if self.state != InputState::Opened {
            return Err(Error::InvalidState("input is not opened"));
        }
        let ptr = self.handle.as_ptr()?;
        let index =
            unsafe { ffi::av_find_best_stream(ptr, medium.into(), -1, -1, ptr::null_mut(), 0) };
        if index < 0 {
            return Err(Error::NoStream(medium));
        }
        self.stream(index as usize).ok_or(Error::NoStream(medium))
    }

    /// Container duration, if known.
    pub fn duration(&self) -> Option<Duration> {
        let d = self.raw()?.duration;
        if d == ffi::AV_NOPTS_VALUE || d <= 0 {
            None
        } else {
            Some(Duration::from_micros(d as u64))
        }
    }

    pub fn bit_rate(&self) -> i64 {
        self.raw().map_or(0, |raw| raw.bit_rate)
    }

    /// Prints FFmpeg's description of the input to stderr.
    pub fn dump(&self) {
        if self.state != InputState::Opened {
            return;
        }
        let Ok(ptr) = self.handle.as_ptr() else {
            return;
        };
        let url = CString::new(self.url.as_str()).unwrap_or_default();
        unsafe { ffi::av_dump_format(ptr, 0, url.as_ptr(), 0) };
    }

    /// Pulls one packet from the demuxer.
    ///
    /// `Ok(None)` is end of stream. Blocks until the demuxer produces a packet.
    pub fn read_packet(&mut self) -> Result<Option<Packet>> {
        if self.state != InputState::Opened {
            return Err(Error::InvalidState("input is not opened"));
        }
        if self.eof {
            return Ok(None);
        }
        let ptr = self.handle.as_ptr()?;
        let mut packet = Packet::alloc()?;

        loop {
            let ret = unsafe { ffi::av_read_frame(ptr, packet.as_mut_ptr()?) };
            match check(ret) {
                Ok(_) if packet.is_empty() => {
                    log::trace!("skipping empty packet");
                    unsafe { ffi::av_packet_unref(packet.as_mut_ptr()?) };
                }
                Ok(_) => break,
                Err(e) => {
                    self.eof = true;
                    if let Some(bridge_error) = self.io.as_mut().and_then(IoBridge::take_error) {
                        return Err(bridge_error);
                    }
                    return match e {
                        ffmpeg_next::Error::Eof => Ok(None),
                        e => Err(Error::Read(e)),
                    };
                }
            }
        }

        if let Some(stream) = self.stream(packet.stream_index()) {
            packet.set_time_base(stream.time_base());
        }
        Ok(Some(packet))
    }

    /// Pull-one access to the demux cursor. A read failure ends the sequence
    /// and is kept for [`last_error`](Self::last_error).
    pub fn next_packet(&mut self) -> Option<Packet> {
        match self.read_packet() {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("reading {:?} failed: {}", self.url, e);
                self.eof = true;
                self.error = Some(e);
                None
            }
        }
    }

    /// Iterator over the same cursor as [`next_packet`](Self::next_packet).
    pub fn packets(&mut self) -> Packets<'_> {
        Packets { ctx: self }
    }

    /// The error that ended packet iteration, if it did not end at end of stream.
    pub fn last_error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    /// Seeks to `timestamp` (in the stream's time base, or microseconds when
    /// `stream` is `None`) at or before the requested position.
    pub fn seek(&mut self, stream: Option<usize>, timestamp: i64) -> Result<()> {
        if self.state != InputState::Opened {
            return Err(Error::InvalidState("input is not opened"));
        }
        let ptr = self.handle.as_ptr()?;
        let index = stream.map_or(-1, |i| i as i32);
        check(unsafe {
            ffi::av_seek_frame(ptr, index, timestamp, ffi::AVSEEK_FLAG_BACKWARD as i32)
        })?;
        self.eof = false;
        self.error = None;
        Ok(())
    }

    /// Closes the input and frees everything it owns. Safe on an unopened
    /// context and safe to repeat.
    pub fn close_and_release(&mut self) {
        match self.state {
            InputState::Opened => {
                if let Ok(mut ptr) = self.handle.as_ptr() {
                    unsafe { ffi::avformat_close_input(&mut ptr) };
                    self.handle.forget();
                    log::debug!("closed input {:?}", self.url);
                }
            }
            InputState::Unopened | InputState::Closed => self.handle.release(),
        }
        if let Some(mut io) = self.io.take() {
            io.release();
        }
        self.options = None;
        self.state = InputState::Closed;
    }
}

impl Release for InputContext {
    fn release(&mut self) {
        self.close_and_release();
    }
}

impl Drop for InputContext {
    fn drop(&mut self) {
        if self.state != InputState::Closed {
            self.close_and_release();
        }
    }
}

impl std::fmt::Debug for InputContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputContext")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("format", &self.format_name())
            .field("custom_io", &self.io.is_some())
            .finish()
    }
}

/// Single-pass iterator over an input's packets.
pub struct Packets<'ctx> {
    ctx: &'ctx mut InputContext,
}

impl Iterator for Packets<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Self::Item> {
        self.ctx.next_packet()
    }
}

impl FusedIterator for Packets<'_> {}

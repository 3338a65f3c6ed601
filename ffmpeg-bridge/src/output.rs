use std::ffi::CString;
use std::path::Path;
use std::ptr::{self, NonNull};

use ffmpeg_next::{Codec, Dictionary, codec::Flags, ffi, media};

use crate::{
    codec::CodecContext,
    error::{Error, Result, check},
    format::OutputFormat,
    handle::{HandleKind, NativeHandle, Release},
    io::{IoBridge, IoDirection},
    packet::Packet,
    stream::{Stream, StreamMut, StreamSetup},
};

unsafe fn free_format_ctx(ptr: NonNull<ffi::AVFormatContext>) {
    unsafe { ffi::avformat_free_context(ptr.as_ptr()) };
}

/// What an output context is created for.
#[derive(Debug, Clone)]
pub enum OutputTarget {
    /// A file; the muxer is inferred from its extension.
    Path(String),
    /// An explicitly resolved muxer. `filename` may be empty with custom I/O.
    Format {
        format: OutputFormat,
        filename: String,
    },
}

impl From<&str> for OutputTarget {
    fn from(path: &str) -> Self {
        OutputTarget::Path(path.to_string())
    }
}

impl From<String> for OutputTarget {
    fn from(path: String) -> Self {
        OutputTarget::Path(path)
    }
}

impl From<&Path> for OutputTarget {
    fn from(path: &Path) -> Self {
        OutputTarget::Path(path.to_string_lossy().into_owned())
    }
}

impl From<OutputFormat> for OutputTarget {
    fn from(format: OutputFormat) -> Self {
        OutputTarget::Format {
            format,
            filename: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    HeaderPending,
    HeaderWritten,
    /// The trailer write has run, successfully or not; only closing is allowed.
    TrailerWritten,
    /// Header write was attempted and failed; only closing is allowed.
    Failed,
    Closed,
}

/// A muxing format context.
pub struct OutputContext {
    handle: NativeHandle<ffi::AVFormatContext>,
    format: OutputFormat,
    io: Option<IoBridge>,
    filename: String,
    setups: Vec<StreamSetup>,
    options: Option<Dictionary<'static>>,
    state: OutputState,
    interleaved: bool,
    owns_pb: bool,
}

impl OutputContext {
    /// Creates an output for a path (muxer from the extension) or an explicit format.
    pub fn new(target: impl Into<OutputTarget>) -> Result<Self> {
        let (format, filename) = match target.into() {
            OutputTarget::Path(path) => (OutputFormat::by_filename(&path)?, path),
            OutputTarget::Format { format, filename } => (format, filename),
        };
        Self::alloc(format, filename)
    }

    /// Creates an output for the muxer called `format_name`.
    pub fn with_format_name(filename: &str, format_name: &str) -> Result<Self> {
        let format = OutputFormat::by_name(format_name)?;
        Self::alloc(format, filename.to_string())
    }

    /// Creates an output for the muxer registered for `mime_type`.
    pub fn with_mime_type(filename: &str, mime_type: &str) -> Result<Self> {
        let format = OutputFormat::by_mime_type(mime_type)?;
        Self::alloc(format, filename.to_string())
    }

    fn alloc(format: OutputFormat, filename: String) -> Result<Self> {
        let cfilename = CString::new(filename.as_str())
            .map_err(|e| Error::InvalidArgument(format!("{:?}: {}", filename, e)))?;
        let mut ptr: *mut ffi::AVFormatContext = ptr::null_mut();
        let ret = unsafe {
            ffi::avformat_alloc_output_context2(
                &mut ptr,
                format.as_ptr(),
                ptr::null(),
                if filename.is_empty() {
                    ptr::null()
                } else {
                    cfilename.as_ptr()
                },
            )
        };
        if ret < 0 || ptr.is_null() {
            return Err(Error::FormatResolution);
        }
        let handle = NativeHandle::owned(ptr, HandleKind::FormatCtx, free_format_ctx)?;
        log::debug!("created output {:?} with muxer {}", filename, format.name());
        Ok(Self {
            handle,
            format,
            io: None,
            filename,
            setups: Vec::new(),
            options: None,
            state: OutputState::HeaderPending,
            interleaved: false,
            owns_pb: false,
        })
    }

    pub fn state(&self) -> OutputState {
        self.state
    }

    pub fn format(&self) -> OutputFormat {
        OutputFormat::from_ptr(self.raw().map_or(ptr::null(), |raw| raw.oformat))
            .unwrap_or(self.format)
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The muxer wants codec parameter sets in the header: codec contexts
    /// attached to this output need `Flags::GLOBAL_HEADER`.
    pub fn is_global_header(&self) -> bool {
        self.format().is_global_header()
    }

    pub fn is_no_file(&self) -> bool {
        self.format().is_no_file()
    }

    /// Use `av_interleaved_write_frame` instead of `av_write_frame`.
    pub fn set_interleaved(&mut self, interleaved: bool) -> &mut Self {
        self.interleaved = interleaved;
        self
    }

    /// Muxer option passed to the header write.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<&mut Self> {
        self.ensure_pending("options must be set before the header is written")?;
        self.options
            .get_or_insert_with(Dictionary::new)
            .set(key, value);
        Ok(self)
    }

    fn ensure_pending(&self, what: &'static str) -> Result<()> {
        match self.state {
            OutputState::HeaderPending => Ok(()),
            OutputState::Closed => Err(Error::InvalidState("output context is closed")),
            _ => Err(Error::InvalidState(what)),
        }
    }

    fn raw(&self) -> Option<&ffi::AVFormatContext> {
        self.handle.as_ptr().ok().map(|ptr| unsafe { &*ptr })
    }

    /// Installs a custom writer. Only allowed before the header is written.
    pub fn set_io(&mut self, mut io: IoBridge) -> Result<&mut Self> {
        if self.state != OutputState::HeaderPending {
            return Err(Error::IoBridge(
                "io bridge must be installed before the header is written".into(),
            ));
        }
        if self.io.is_some() {
            return Err(Error::IoBridge("io bridge already installed".into()));
        }
        let ptr = self.handle.as_ptr()?;
        let pb = io.attach(IoDirection::Write)?;
        unsafe {
            (*ptr).pb = pb;
            (*ptr).flags |= ffi::AVFMT_FLAG_CUSTOM_IO as i32;
        }
        self.io = Some(io);
        Ok(self)
    }

    pub fn nb_streams(&self) -> usize {
        self.raw().map_or(0, |raw| raw.nb_streams as usize)
    }

    fn stream_ptr(&self, index: usize) -> Option<*mut ffi::AVStream> {
        let raw = self.raw()?;
        if index >= raw.nb_streams as usize {
            return None;
        }
        Some(unsafe { *raw.streams.add(index) })
    }

    pub fn stream(&self, index: usize) -> Option<Stream<'_>> {
        Stream::wrap(self.stream_ptr(index)?).ok()
    }

    pub fn stream_mut(&mut self, index: usize) -> Option<StreamMut<'_>> {
        if self.state != OutputState::HeaderPending {
            return None;
        }
        let ptr = self.stream_ptr(index)?;
        StreamMut::new(ptr, self.setups.get_mut(index)?).ok()
    }

    fn alloc_stream(&mut self, codec: *const ffi::AVCodec) -> Result<usize> {
        self.ensure_pending("streams must be added before the header is written")?;
        let ptr = self.handle.as_ptr()?;
        let stream = unsafe { ffi::avformat_new_stream(ptr, codec) };
        if stream.is_null() {
            return Err(Error::StreamAlloc);
        }
        self.setups.push(StreamSetup::default());
        Ok(self.setups.len() - 1)
    }

    /// Adds a stream for `codec`. It still needs a codec context
    /// (`StreamMut::set_codec_ctx`) before the header can be written.
    pub fn new_stream(&mut self, codec: &Codec) -> Result<StreamMut<'_>> {
        let index = self.alloc_stream(unsafe { codec.as_ptr() })?;
        self.stream_mut(index).ok_or(Error::StreamAlloc)
    }

    /// Adds a stream configured from `cc`, setting the global header flag on
    /// `cc` when this muxer needs it. The parameters are copied.
    pub fn add_stream_with_codec_ctx(&mut self, cc: &mut CodecContext) -> Result<StreamMut<'_>> {
        let codec = unsafe { (*cc.as_ptr()?).codec };
        if self.is_global_header() {
            cc.set_flags(Flags::GLOBAL_HEADER)?;
        }
        let index = self.alloc_stream(codec)?;
        let mut stream = self.stream_mut(index).ok_or(Error::StreamAlloc)?;
        stream.set_codec_ctx(cc)?;
        Ok(stream)
    }

    /// Adds a stream copying the parameters of a demuxed stream.
    pub fn add_stream_from(&mut self, source: &Stream<'_>) -> Result<StreamMut<'_>> {
        let index = self.alloc_stream(ptr::null())?;
        let mut stream = self.stream_mut(index).ok_or(Error::StreamAlloc)?;
        stream.copy_parameters(source)?;
        Ok(stream)
    }

    fn validate_streams(&self) -> Result<()> {
        if self.setups.is_empty() {
            return Err(Error::HeaderWrite("output has no streams".into()));
        }
        let global_header = self.is_global_header();
        for (index, setup) in self.setups.iter().enumerate() {
            let stream = self
                .stream(index)
                .ok_or_else(|| Error::HeaderWrite(format!("stream {} is missing", index)))?;
            if !setup.configured {
                return Err(Error::HeaderWrite(format!(
                    "stream {} has no codec context",
                    index
                )));
            }
            let tb = stream.time_base();
            if tb.numerator() <= 0 || tb.denominator() <= 0 {
                return Err(Error::HeaderWrite(format!(
                    "stream {} has no time base",
                    index
                )));
            }
            if stream.medium() == media::Type::Video && (stream.width() == 0 || stream.height() == 0)
            {
                return Err(Error::HeaderWrite(format!(
                    "stream {} has no dimensions",
                    index
                )));
            }
            if global_header && !setup.global_header {
                return Err(Error::HeaderWrite(format!(
                    "stream {} needs the global header flag for {}",
                    index,
                    self.format().name()
                )));
            }
        }
        Ok(())
    }

    /// Writes the container header. Valid once, after every stream is configured.
    pub fn write_header(&mut self) -> Result<()> {
        match self.state {
            OutputState::HeaderPending => {}
            OutputState::HeaderWritten => {
                return Err(Error::HeaderWrite("header has already been written".into()));
            }
            OutputState::Failed => {
                return Err(Error::HeaderWrite("a previous header write failed".into()));
            }
            OutputState::TrailerWritten => {
                return Err(Error::HeaderWrite("trailer has already been written".into()));
            }
            OutputState::Closed => return Err(Error::InvalidState("output context is closed")),
        }
        self.validate_streams()?;

        let ptr = self.handle.as_ptr()?;
        if self.io.is_none() && !self.is_no_file() {
            let url = CString::new(self.filename.as_str())
                .map_err(|e| Error::InvalidArgument(e.to_string()))?;
            let ret = unsafe {
                ffi::avio_open(&mut (*ptr).pb, url.as_ptr(), ffi::AVIO_FLAG_WRITE as i32)
            };
            if let Err(e) = check(ret) {
                self.state = OutputState::Failed;
                return Err(Error::HeaderWrite(format!(
                    "could not open {:?}: {}",
                    self.filename, e
                )));
            }
            self.owns_pb = true;
        }

        let mut opts = match self.options.take() {
            Some(opts) => unsafe { opts.disown() },
            None => ptr::null_mut(),
        };
        let ret = unsafe { ffi::avformat_write_header(ptr, &mut opts) };
        drop(unsafe { Dictionary::own(opts) });

        if let Err(e) = check(ret) {
            self.state = OutputState::Failed;
            if let Some(bridge_error) = self.io.as_mut().and_then(IoBridge::take_error) {
                return Err(Error::HeaderWrite(bridge_error.to_string()));
            }
            return Err(Error::HeaderWrite(e.to_string()));
        }

        self.state = OutputState::HeaderWritten;
        log::info!(
            "header written to {:?} ({}, {} streams)",
            self.filename,
            self.format().name(),
            self.nb_streams()
        );
        Ok(())
    }

    /// Muxes `packet` into the stream named by its stream index. Timestamps are
    /// rescaled in place to the output stream's time base; the caller keeps
    /// the packet and releases it.
    pub fn write_packet(&mut self, packet: &mut Packet) -> Result<()> {
        if self.state != OutputState::HeaderWritten {
            return Err(Error::InvalidState("header has not been written"));
        }
        let index = packet.stream_index();
        let time_base = self
            .stream(index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| Error::InvalidArgument(format!("output has no stream {}", index)))?;
        packet.rescale_to(time_base);

        let ptr = self.handle.as_ptr()?;
        let ret = if self.interleaved {
            // the interleaver takes the reference, hand it a clone
            let mut owned = packet.try_clone()?;
            unsafe { ffi::av_interleaved_write_frame(ptr, owned.as_mut_ptr()?) }
        } else {
            unsafe { ffi::av_write_frame(ptr, packet.as_mut_ptr()?) }
        };

        check(ret).map(|_| ()).map_err(|e| {
            match self.io.as_mut().and_then(IoBridge::take_error) {
                Some(bridge_error) => bridge_error,
                None => Error::Write(e),
            }
        })
    }

    /// Pushes buffered muxer output through to the file or write callback.
    pub fn flush(&mut self) -> Result<()> {
        if self.state != OutputState::HeaderWritten {
            return Err(Error::InvalidState("header has not been written"));
        }
        let ptr = self.handle.as_ptr()?;
        if self.interleaved {
            check(unsafe { ffi::av_interleaved_write_frame(ptr, ptr::null_mut()) })?;
        } else {
            check(unsafe { ffi::av_write_frame(ptr, ptr::null_mut()) })?;
        }
        if let Some(io) = self.io.as_mut() {
            io.flush();
        }
        Ok(())
    }

    /// The last custom writer failure, if any.
    pub fn io_error(&self) -> Option<&str> {
        self.io.as_ref().and_then(IoBridge::last_error)
    }

    /// Finishes the container and flushes it to the file or write callback.
    /// Runs at most once; a failure is returned and not retried on close.
    pub fn write_trailer(&mut self) -> Result<()> {
        match self.state {
            OutputState::HeaderWritten => {}
            OutputState::TrailerWritten => {
                return Err(Error::InvalidState("trailer has already been written"));
            }
            OutputState::Closed => return Err(Error::InvalidState("output context is closed")),
            _ => return Err(Error::InvalidState("header has not been written")),
        }
        let ptr = self.handle.as_ptr()?;
        self.state = OutputState::TrailerWritten;

        // also flushes pb and reports its error
        let ret = unsafe { ffi::av_write_trailer(ptr) };
        if let Some(io) = self.io.as_mut() {
            io.flush();
            if let Some(bridge_error) = io.take_error() {
                log::warn!("writing trailer to {:?} failed: {}", self.filename, bridge_error);
                return Err(bridge_error);
            }
        }
        check(ret).map_err(|e| {
            log::warn!("writing trailer to {:?} failed: {}", self.filename, e);
            Error::Write(e)
        })?;
        log::debug!("trailer written to {:?}", self.filename);
        Ok(())
    }

    /// Writes the trailer if the header was written and the trailer was not,
    /// then frees the context, any file it opened and the io bridge. Safe to
    /// repeat. Use `write_trailer` first to see trailer failures.
    pub fn close_and_release(&mut self) {
        if self.state == OutputState::HeaderWritten {
            if let Err(e) = self.write_trailer() {
                log::warn!("closing {:?} without a complete trailer: {}", self.filename, e);
            }
        }
        if let Ok(ptr) = self.handle.as_ptr() {
            unsafe {
                if self.owns_pb {
                    ffi::avio_closep(&mut (*ptr).pb);
                    self.owns_pb = false;
                } else {
                    (*ptr).pb = ptr::null_mut();
                }
            }
        }
        self.handle.release();
        if let Some(mut io) = self.io.take() {
            io.release();
        }
        self.options = None;
        self.setups.clear();
        if self.state != OutputState::Closed {
            log::debug!("closed output {:?}", self.filename);
        }
        self.state = OutputState::Closed;
    }
}

impl Release for OutputContext {
    fn release(&mut self) {
        self.close_and_release();
    }
}

impl Drop for OutputContext {
    fn drop(&mut self) {
        if self.state != OutputState::Closed {
            self.close_and_release();
        }
    }
}

impl std::fmt::Debug for OutputContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputContext")
            .field("filename", &self.filename)
            .field("format", &self.format.name())
            .field("state", &self.state)
            .field("streams", &self.setups.len())
            .field("custom_io", &self.io.is_some())
            .finish()
    }
}

use std::marker::PhantomData;
use std::ops::Deref;

use ffmpeg_next::{Rational, ffi, media};

use crate::{
    codec::CodecContext,
    error::{Result, check},
    handle::{HandleKind, NativeHandle, Release},
};

/// A stream inside an open format context. The context owns the native
/// stream; this borrow cannot outlive it.
pub struct Stream<'ctx> {
    handle: NativeHandle<ffi::AVStream>,
    _ctx: PhantomData<&'ctx ()>,
}

impl<'ctx> Stream<'ctx> {
    pub(crate) fn wrap(ptr: *mut ffi::AVStream) -> Result<Self> {
        Ok(Self {
            handle: NativeHandle::borrowed(ptr, HandleKind::Stream)?,
            _ctx: PhantomData,
        })
    }

    pub(crate) fn as_ptr(&self) -> *mut ffi::AVStream {
        // borrowed handles are never released
        self.handle.as_ptr().unwrap_or(std::ptr::null_mut())
    }

    fn raw(&self) -> &ffi::AVStream {
        unsafe { &*self.as_ptr() }
    }

    pub(crate) fn parameters_ptr(&self) -> *mut ffi::AVCodecParameters {
        self.raw().codecpar
    }

    fn parameters(&self) -> &ffi::AVCodecParameters {
        unsafe { &*self.raw().codecpar }
    }

    pub fn index(&self) -> usize {
        self.raw().index as usize
    }

    pub fn id(&self) -> i32 {
        self.raw().id
    }

    pub fn time_base(&self) -> Rational {
        self.raw().time_base.into()
    }

    pub fn rate(&self) -> Rational {
        self.raw().avg_frame_rate.into()
    }

    pub fn medium(&self) -> media::Type {
        self.parameters().codec_type.into()
    }

    pub fn codec_id(&self) -> ffmpeg_next::codec::Id {
        self.parameters().codec_id.into()
    }

    pub fn is_video(&self) -> bool {
        self.medium() == media::Type::Video
    }

    pub fn is_audio(&self) -> bool {
        self.medium() == media::Type::Audio
    }

    pub fn width(&self) -> u32 {
        self.parameters().width.max(0) as u32
    }

    pub fn height(&self) -> u32 {
        self.parameters().height.max(0) as u32
    }

    pub fn sample_rate(&self) -> u32 {
        self.parameters().sample_rate.max(0) as u32
    }

    pub fn channels(&self) -> u32 {
        self.parameters().ch_layout.nb_channels.max(0) as u32
    }

    /// Duration in `time_base` units, `None` if unknown.
    pub fn duration(&self) -> Option<i64> {
        let d = self.raw().duration;
        if d == ffi::AV_NOPTS_VALUE || d < 0 {
            None
        } else {
            Some(d)
        }
    }

    /// A new codec context carrying a copy of this stream's parameters and time base.
    pub fn codec_ctx(&self) -> Result<CodecContext> {
        CodecContext::from_parameters(self.parameters_ptr(), self.time_base())
    }
}

impl Release for Stream<'_> {
    /// Streams belong to their format context; this only logs.
    fn release(&mut self) {
        self.handle.release();
    }
}

impl std::fmt::Debug for Stream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("index", &self.index())
            .field("medium", &self.medium())
            .field("codec_id", &self.codec_id())
            .field("time_base", &self.time_base())
            .finish()
    }
}

/// Bookkeeping the output context keeps per stream until the header is written.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct StreamSetup {
    pub(crate) configured: bool,
    pub(crate) global_header: bool,
}

/// A stream of an output context that can still be configured.
pub struct StreamMut<'ctx> {
    stream: Stream<'ctx>,
    setup: &'ctx mut StreamSetup,
}

impl<'ctx> StreamMut<'ctx> {
    pub(crate) fn new(ptr: *mut ffi::AVStream, setup: &'ctx mut StreamSetup) -> Result<Self> {
        Ok(Self {
            stream: Stream::wrap(ptr)?,
            setup,
        })
    }

    pub fn set_time_base(&mut self, time_base: impl Into<Rational>) {
        let time_base: Rational = time_base.into();
        unsafe { (*self.stream.as_ptr()).time_base = time_base.into() };
    }

    /// Copies the codec parameters and time base of `cc` into this stream.
    pub fn set_codec_ctx(&mut self, cc: &CodecContext) -> Result<()> {
        let ctx = cc.as_ptr()?;
        let par = self.stream.parameters_ptr();
        unsafe {
            check(ffi::avcodec_parameters_from_context(par, ctx))?;
            (*par).codec_tag = 0;
        }
        self.set_time_base(cc.time_base()?);
        self.setup.configured = true;
        self.setup.global_header = cc.has_global_header()?;
        log::debug!(
            "stream {} configured from codec context {:?}",
            self.stream.index(),
            cc
        );
        Ok(())
    }

    /// Copies parameters of a demuxed stream, for remuxing without re-encoding.
    pub fn copy_parameters(&mut self, source: &Stream<'_>) -> Result<()> {
        let par = self.stream.parameters_ptr();
        unsafe {
            check(ffi::avcodec_parameters_copy(par, source.parameters_ptr()))?;
            (*par).codec_tag = 0;
        }
        self.set_time_base(source.time_base());
        self.setup.configured = true;
        // parameter sets already travel in the copied extradata
        self.setup.global_header = true;
        Ok(())
    }
}

impl<'ctx> Deref for StreamMut<'ctx> {
    type Target = Stream<'ctx>;

    fn deref(&self) -> &Self::Target {
        &self.stream
    }
}

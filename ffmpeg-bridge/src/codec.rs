use std::ptr::{self, NonNull};

use ffmpeg_next::{Codec, Rational, codec::Flags, ffi, format::Pixel, media};

use crate::{
    error::{Error, Result, check},
    handle::{HandleKind, NativeHandle, Release},
};

pub fn find_encoder(id: ffmpeg_next::codec::Id) -> Result<Codec> {
    ffmpeg_next::encoder::find(id).ok_or_else(|| Error::CodecNotFound(format!("{:?}", id)))
}

pub fn find_encoder_by_name(name: &str) -> Result<Codec> {
    ffmpeg_next::encoder::find_by_name(name).ok_or_else(|| Error::CodecNotFound(name.to_string()))
}

pub fn find_decoder(id: ffmpeg_next::codec::Id) -> Result<Codec> {
    ffmpeg_next::decoder::find(id).ok_or_else(|| Error::CodecNotFound(format!("{:?}", id)))
}

unsafe fn free_codec_ctx(ptr: NonNull<ffi::AVCodecContext>) {
    let mut ptr = ptr.as_ptr();
    unsafe { ffi::avcodec_free_context(&mut ptr) };
}

/// Encode/decode parameters held in an owned `AVCodecContext`.
///
/// Attaching a context to a stream copies its parameters; the context itself
/// stays with the caller and is released independently.
pub struct CodecContext {
    handle: NativeHandle<ffi::AVCodecContext>,
}

impl CodecContext {
    pub fn new(codec: &Codec) -> Result<Self> {
        Self::alloc(unsafe { codec.as_ptr() })
    }

    fn alloc(codec: *const ffi::AVCodec) -> Result<Self> {
        let ptr = unsafe { ffi::avcodec_alloc_context3(codec) };
        Ok(Self {
            handle: NativeHandle::owned(ptr, HandleKind::CodecCtx, free_codec_ctx)?,
        })
    }

    /// Builds a context from stream parameters, as found on a demuxed stream.
    pub(crate) fn from_parameters(
        params: *const ffi::AVCodecParameters,
        time_base: Rational,
    ) -> Result<Self> {
        let ctx = Self::alloc(ptr::null())?;
        let ptr = ctx.handle.as_ptr()?;
        unsafe {
            check(ffi::avcodec_parameters_to_context(ptr, params))?;
            (*ptr).time_base = time_base.into();
        }
        Ok(ctx)
    }

    pub(crate) fn as_ptr(&self) -> Result<*mut ffi::AVCodecContext> {
        self.handle.as_ptr()
    }

    fn raw(&self) -> Result<&ffi::AVCodecContext> {
        Ok(unsafe { &*self.handle.as_ptr()? })
    }

    fn raw_mut(&mut self) -> Result<&mut ffi::AVCodecContext> {
        Ok(unsafe { &mut *self.handle.as_ptr()? })
    }

    pub fn set_time_base(&mut self, time_base: impl Into<Rational>) -> Result<&mut Self> {
        let time_base: Rational = time_base.into();
        self.raw_mut()?.time_base = time_base.into();
        Ok(self)
    }

    pub fn time_base(&self) -> Result<Rational> {
        Ok(self.raw()?.time_base.into())
    }

    pub fn set_dimensions(&mut self, width: u32, height: u32) -> Result<&mut Self> {
        let raw = self.raw_mut()?;
        raw.width = width as i32;
        raw.height = height as i32;
        Ok(self)
    }

    /// `None` until both width and height are set.
    pub fn dimensions(&self) -> Result<Option<(u32, u32)>> {
        let raw = self.raw()?;
        if raw.width > 0 && raw.height > 0 {
            Ok(Some((raw.width as u32, raw.height as u32)))
        } else {
            Ok(None)
        }
    }

    pub fn set_pixel_format(&mut self, format: Pixel) -> Result<&mut Self> {
        self.raw_mut()?.pix_fmt = format.into();
        Ok(self)
    }

    pub fn pixel_format(&self) -> Result<Pixel> {
        Ok(self.raw()?.pix_fmt.into())
    }

    pub fn set_bit_rate(&mut self, bit_rate: i64) -> Result<&mut Self> {
        self.raw_mut()?.bit_rate = bit_rate;
        Ok(self)
    }

    /// Adds `flags` to the ones already set.
    pub fn set_flags(&mut self, flags: Flags) -> Result<&mut Self> {
        let raw = self.raw_mut()?;
        raw.flags |= flags.bits() as i32;
        Ok(self)
    }

    pub fn flags(&self) -> Result<Flags> {
        Ok(Flags::from_bits_truncate(self.raw()?.flags as _))
    }

    pub fn has_global_header(&self) -> Result<bool> {
        Ok(self.flags()?.contains(Flags::GLOBAL_HEADER))
    }

    pub fn codec_id(&self) -> Result<ffmpeg_next::codec::Id> {
        Ok(self.raw()?.codec_id.into())
    }

    pub fn medium(&self) -> Result<media::Type> {
        Ok(self.raw()?.codec_type.into())
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }
}

impl Release for CodecContext {
    fn release(&mut self) {
        self.handle.release();
    }
}

impl std::fmt::Debug for CodecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecContext")
            .field("codec_id", &self.codec_id().ok())
            .field("time_base", &self.time_base().ok())
            .field("dimensions", &self.dimensions().ok().flatten())
            .finish()
    }
}

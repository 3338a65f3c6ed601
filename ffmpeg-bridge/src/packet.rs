use std::ptr::NonNull;

use bytes::Bytes;
use ffmpeg_next::{Rational, ffi};

use crate::{
    error::Result,
    handle::{HandleKind, NativeHandle, Release},
};

unsafe fn free_packet(ptr: NonNull<ffi::AVPacket>) {
    let mut ptr = ptr.as_ptr();
    unsafe { ffi::av_packet_free(&mut ptr) };
}

/// One demuxed (or to-be-muxed) unit of stream data.
///
/// Each packet owns its native buffer. Release it (or drop it) before pulling
/// the next one in long-running loops. A released packet reports itself as empty.
pub struct Packet {
    handle: NativeHandle<ffi::AVPacket>,
    time_base: Rational,
}

impl Packet {
    pub(crate) fn alloc() -> Result<Self> {
        let ptr = unsafe { ffi::av_packet_alloc() };
        Ok(Self {
            handle: NativeHandle::owned(ptr, HandleKind::Packet, free_packet)?,
            time_base: Rational::new(0, 1),
        })
    }

    /// A packet holding a copy of `data`, e.g. for muxing externally produced frames.
    pub fn copy_from_slice(data: &[u8]) -> Result<Self> {
        let packet = Self::alloc()?;
        let ptr = packet.handle.as_ptr()?;
        unsafe {
            crate::error::check(ffi::av_new_packet(ptr, data.len() as i32))?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), (*ptr).data, data.len());
        }
        Ok(packet)
    }

    /// A new packet referencing the same data.
    pub fn try_clone(&self) -> Result<Self> {
        let ptr = unsafe { ffi::av_packet_clone(self.handle.as_ptr()?) };
        Ok(Self {
            handle: NativeHandle::owned(ptr, HandleKind::Packet, free_packet)?,
            time_base: self.time_base,
        })
    }

    pub(crate) fn as_mut_ptr(&mut self) -> Result<*mut ffi::AVPacket> {
        self.handle.as_ptr()
    }

    fn raw(&self) -> Option<&ffi::AVPacket> {
        self.handle.as_ptr().ok().map(|ptr| unsafe { &*ptr })
    }

    fn raw_mut(&mut self) -> Option<&mut ffi::AVPacket> {
        self.handle.as_ptr().ok().map(|ptr| unsafe { &mut *ptr })
    }

    pub fn size(&self) -> usize {
        self.raw().map_or(0, |p| p.size.max(0) as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn pts(&self) -> Option<i64> {
        self.raw()
            .map(|p| p.pts)
            .filter(|pts| *pts != ffi::AV_NOPTS_VALUE)
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        if let Some(p) = self.raw_mut() {
            p.pts = pts.unwrap_or(ffi::AV_NOPTS_VALUE);
        }
    }

    pub fn dts(&self) -> Option<i64> {
        self.raw()
            .map(|p| p.dts)
            .filter(|dts| *dts != ffi::AV_NOPTS_VALUE)
    }

    pub fn set_dts(&mut self, dts: Option<i64>) {
        if let Some(p) = self.raw_mut() {
            p.dts = dts.unwrap_or(ffi::AV_NOPTS_VALUE);
        }
    }

    pub fn duration(&self) -> i64 {
        self.raw().map_or(0, |p| p.duration)
    }

    pub fn set_duration(&mut self, duration: i64) {
        if let Some(p) = self.raw_mut() {
            p.duration = duration;
        }
    }

    pub fn stream_index(&self) -> usize {
        self.raw().map_or(0, |p| p.stream_index.max(0) as usize)
    }

    pub fn set_stream_index(&mut self, index: usize) {
        if let Some(p) = self.raw_mut() {
            p.stream_index = index as i32;
        }
    }

    /// Byte offset in the source, if known.
    pub fn position(&self) -> Option<i64> {
        self.raw().map(|p| p.pos).filter(|pos| *pos >= 0)
    }

    pub fn is_key(&self) -> bool {
        self.raw()
            .is_some_and(|p| p.flags & ffi::AV_PKT_FLAG_KEY as i32 != 0)
    }

    /// Copy of the payload.
    pub fn data(&self) -> Bytes {
        match self.raw() {
            Some(p) if !p.data.is_null() && p.size > 0 => {
                let slice = unsafe { std::slice::from_raw_parts(p.data, p.size as usize) };
                Bytes::copy_from_slice(slice)
            }
            _ => Bytes::new(),
        }
    }

    /// Time base of the stream this packet was read from.
    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn set_time_base(&mut self, time_base: Rational) {
        self.time_base = time_base;
    }

    /// Converts timestamps from the packet's time base to `dst` and adopts it.
    pub(crate) fn rescale_to(&mut self, dst: Rational) {
        let src = self.time_base;
        if src.numerator() > 0 && src.denominator() > 0 && src != dst {
            if let Ok(ptr) = self.handle.as_ptr() {
                unsafe { ffi::av_packet_rescale_ts(ptr, src.into(), dst.into()) };
            }
        }
        self.time_base = dst;
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }
}

impl Release for Packet {
    fn release(&mut self) {
        self.handle.release();
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("stream_index", &self.stream_index())
            .field("size", &self.size())
            .field("pts", &self.pts())
            .field("dts", &self.dts())
            .finish()
    }
}

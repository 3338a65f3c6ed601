//! Custom I/O: caller-supplied read/write closures in place of FFmpeg's file I/O.
//!
//! FFmpeg calls back into this module through two `extern "C"` trampolines
//! registered once per [`IoBridge`]. Data crosses the boundary by copy: a read
//! callback returns owned [`Bytes`] that are copied into FFmpeg's buffer, and a
//! write callback receives a slice valid only for the duration of the call.
//! Errors and panics raised by a callback are caught, kept on the bridge and
//! reported to FFmpeg as an I/O error.

use std::ffi::{c_int, c_void};
use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;

use bytes::Bytes;
use ffmpeg_next::ffi;

use crate::{
    config::config,
    error::{Error, Result},
    handle::{HandleKind, NativeHandle, Release},
};

/// Given the number of bytes FFmpeg asks for, returns at most that many.
/// An empty result means end of data.
pub type ReadFn = Box<dyn FnMut(usize) -> io::Result<Bytes> + Send>;

/// Receives the bytes FFmpeg flushes, in order.
pub type WriteFn = Box<dyn FnMut(&[u8]) -> io::Result<()> + Send>;

const AVERROR_EIO: c_int = -(ffmpeg_next::util::error::EIO as c_int);

struct Callbacks {
    read: Option<ReadFn>,
    write: Option<WriteFn>,
    /// Set after an empty or short read; no further reads reach the callback.
    exhausted: bool,
    poisoned: bool,
    error: Option<String>,
    bytes_read: u64,
    bytes_written: u64,
}

impl Callbacks {
    fn fail(&mut self, message: String) -> c_int {
        log::warn!("io bridge callback failed: {}", message);
        self.error = Some(message);
        AVERROR_EIO
    }

    fn on_read(&mut self, buf: &mut [u8]) -> c_int {
        if self.poisoned {
            return AVERROR_EIO;
        }
        if self.exhausted {
            return ffi::AVERROR_EOF;
        }
        let Some(read) = self.read.as_mut() else {
            return self.fail("read requested on a bridge without a read callback".into());
        };

        let wanted = buf.len();
        let bytes = match panic::catch_unwind(AssertUnwindSafe(|| read(wanted))) {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return self.fail(format!("read callback: {}", e)),
            Err(_) => {
                self.poisoned = true;
                return self.fail("read callback panicked".into());
            }
        };

        if bytes.len() > wanted {
            return self.fail(format!(
                "read callback returned {} bytes, {} requested",
                bytes.len(),
                wanted
            ));
        }
        if bytes.is_empty() {
            self.exhausted = true;
            return ffi::AVERROR_EOF;
        }
        if bytes.len() < wanted {
            log::trace!("short read ({} of {}), end of data", bytes.len(), wanted);
            self.exhausted = true;
        }

        buf[..bytes.len()].copy_from_slice(&bytes);
        self.bytes_read += bytes.len() as u64;
        bytes.len() as c_int
    }

    fn on_write(&mut self, buf: &[u8]) -> c_int {
        if self.poisoned {
            return AVERROR_EIO;
        }
        let Some(write) = self.write.as_mut() else {
            return self.fail("write requested on a bridge without a write callback".into());
        };

        match panic::catch_unwind(AssertUnwindSafe(|| write(buf))) {
            Ok(Ok(())) => {
                self.bytes_written += buf.len() as u64;
                buf.len() as c_int
            }
            Ok(Err(e)) => self.fail(format!("write callback: {}", e)),
            Err(_) => {
                self.poisoned = true;
                self.fail("write callback panicked".into())
            }
        }
    }
}

type ReadPacketFn = unsafe extern "C" fn(*mut c_void, *mut u8, c_int) -> c_int;
type WritePacketFn = unsafe extern "C" fn(*mut c_void, *const u8, c_int) -> c_int;

unsafe extern "C" fn read_packet(opaque: *mut c_void, buf: *mut u8, buf_size: c_int) -> c_int {
    if opaque.is_null() || buf.is_null() || buf_size <= 0 {
        return ffi::AVERROR_EOF;
    }
    let callbacks = unsafe { &mut *(opaque as *mut Callbacks) };
    let buf = unsafe { std::slice::from_raw_parts_mut(buf, buf_size as usize) };
    callbacks.on_read(buf)
}

unsafe extern "C" fn write_packet(opaque: *mut c_void, buf: *const u8, buf_size: c_int) -> c_int {
    if opaque.is_null() {
        return AVERROR_EIO;
    }
    let callbacks = unsafe { &mut *(opaque as *mut Callbacks) };
    if buf.is_null() || buf_size <= 0 {
        return 0;
    }
    let buf = unsafe { std::slice::from_raw_parts(buf, buf_size as usize) };
    callbacks.on_write(buf)
}

unsafe fn free_io_ctx(ptr: NonNull<ffi::AVIOContext>) {
    let mut ctx = ptr.as_ptr();
    unsafe {
        // FFmpeg may have swapped the buffer, so free the one it holds now.
        ffi::av_freep(&mut (*ctx).buffer as *mut *mut u8 as *mut c_void);
        ffi::avio_context_free(&mut ctx);
    }
}

/// Which way bytes flow through an installed bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IoDirection {
    /// FFmpeg pulls bytes from the read callback (demuxing).
    Read,
    /// FFmpeg pushes bytes to the write callback (muxing).
    Write,
}

/// Routes a format context's byte I/O through caller closures.
///
/// Install it with `InputContext::set_io` before opening, or
/// `OutputContext::set_io` before writing the header. The native context is
/// only allocated on install, in the direction of the context it serves.
pub struct IoBridge {
    handle: Option<NativeHandle<ffi::AVIOContext>>,
    callbacks: Option<NonNull<Callbacks>>,
    buffer_size: usize,
}

// The callbacks are `Send`; the native context is only touched by its owner.
unsafe impl Send for IoBridge {}

pub struct IoBridgeBuilder {
    buffer_size: usize,
    read: Option<ReadFn>,
    write: Option<WriteFn>,
}

impl IoBridgeBuilder {
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn reader<F>(mut self, read: F) -> Self
    where
        F: FnMut(usize) -> io::Result<Bytes> + Send + 'static,
    {
        self.read = Some(Box::new(read));
        self
    }

    pub fn writer<F>(mut self, write: F) -> Self
    where
        F: FnMut(&[u8]) -> io::Result<()> + Send + 'static,
    {
        self.write = Some(Box::new(write));
        self
    }

    pub fn build(self) -> Result<IoBridge> {
        if self.read.is_none() && self.write.is_none() {
            return Err(Error::IoBridge(
                "a read or a write callback is required".into(),
            ));
        }
        if self.buffer_size == 0 || self.buffer_size > i32::MAX as usize {
            return Err(Error::IoBridge(format!(
                "invalid buffer size {}",
                self.buffer_size
            )));
        }
        let callbacks = Box::new(Callbacks {
            read: self.read,
            write: self.write,
            exhausted: false,
            poisoned: false,
            error: None,
            bytes_read: 0,
            bytes_written: 0,
        });
        Ok(IoBridge {
            handle: None,
            callbacks: Some(NonNull::from(Box::leak(callbacks))),
            buffer_size: self.buffer_size,
        })
    }
}

impl IoBridge {
    pub fn builder() -> IoBridgeBuilder {
        IoBridgeBuilder {
            buffer_size: config().io_buffer_size(),
            read: None,
            write: None,
        }
    }

    /// A read-only bridge over any `Read`. Requests are filled completely
    /// unless the reader reaches its end.
    pub fn from_reader<R: Read + Send + 'static>(mut reader: R) -> Result<Self> {
        Self::builder()
            .reader(move |size| {
                let mut buf = vec![0u8; size];
                let mut filled = 0;
                while filled < size {
                    match reader.read(&mut buf[filled..]) {
                        Ok(0) => break,
                        Ok(n) => filled += n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
                buf.truncate(filled);
                Ok(Bytes::from(buf))
            })
            .build()
    }

    /// A write-only bridge appending everything to `writer`.
    pub fn from_writer<W: Write + Send + 'static>(mut writer: W) -> Result<Self> {
        Self::builder()
            .writer(move |buf| writer.write_all(buf))
            .build()
    }

    /// Allocates the native context for `direction` and returns it for the
    /// owning format context's `pb`. A bridge is installed at most once.
    pub(crate) fn attach(&mut self, direction: IoDirection) -> Result<*mut ffi::AVIOContext> {
        let Some(callbacks) = self.callbacks else {
            return Err(Error::Released(HandleKind::IoCtx));
        };
        if self.handle.is_some() {
            return Err(Error::IoBridge("io bridge already installed".into()));
        }
        let (write_flag, read_fn, write_fn): (c_int, Option<ReadPacketFn>, Option<WritePacketFn>) =
            match direction {
                IoDirection::Read if self.can_read() => (0, Some(read_packet), None),
                IoDirection::Write if self.can_write() => (1, None, Some(write_packet)),
                IoDirection::Read => {
                    return Err(Error::IoBridge(
                        "input io bridge needs a read callback".into(),
                    ));
                }
                IoDirection::Write => {
                    return Err(Error::IoBridge(
                        "output io bridge needs a write callback".into(),
                    ));
                }
            };

        let buffer = unsafe { ffi::av_malloc(self.buffer_size) } as *mut u8;
        if buffer.is_null() {
            return Err(Error::Allocation(HandleKind::IoCtx));
        }
        let ctx = unsafe {
            ffi::avio_alloc_context(
                buffer,
                self.buffer_size as c_int,
                write_flag,
                callbacks.as_ptr() as *mut c_void,
                read_fn,
                write_fn,
                None,
            )
        };
        if ctx.is_null() {
            unsafe { ffi::av_free(buffer as *mut c_void) };
            return Err(Error::Allocation(HandleKind::IoCtx));
        }

        let handle = NativeHandle::owned(ctx, HandleKind::IoCtx, free_io_ctx)?;
        log::debug!(
            "io bridge attached for {:?}: buffer {} bytes",
            direction,
            self.buffer_size
        );
        self.handle = Some(handle);
        Ok(ctx)
    }

    pub(crate) fn as_ptr(&self) -> Result<*mut ffi::AVIOContext> {
        match &self.handle {
            Some(handle) => handle.as_ptr(),
            None if self.is_released() => Err(Error::Released(HandleKind::IoCtx)),
            None => Err(Error::InvalidState("io bridge is not installed")),
        }
    }

    fn callbacks(&self) -> Option<&Callbacks> {
        self.callbacks.map(|c| unsafe { &*c.as_ptr() })
    }

    fn callbacks_mut(&mut self) -> Option<&mut Callbacks> {
        self.callbacks.map(|c| unsafe { &mut *c.as_ptr() })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn can_read(&self) -> bool {
        self.callbacks().is_some_and(|c| c.read.is_some())
    }

    pub fn can_write(&self) -> bool {
        self.callbacks().is_some_and(|c| c.write.is_some())
    }

    pub fn bytes_read(&self) -> u64 {
        self.callbacks().map_or(0, |c| c.bytes_read)
    }

    pub fn bytes_written(&self) -> u64 {
        self.callbacks().map_or(0, |c| c.bytes_written)
    }

    /// The last callback failure, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.callbacks().and_then(|c| c.error.as_deref())
    }

    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.callbacks_mut()
            .and_then(|c| c.error.take())
            .map(Error::IoBridge)
    }

    /// Pushes buffered output to the write callback.
    pub(crate) fn flush(&mut self) {
        if let Ok(ctx) = self.as_ptr() {
            unsafe { ffi::avio_flush(ctx) };
        }
    }

    pub fn is_released(&self) -> bool {
        self.callbacks.is_none()
    }
}

impl Release for IoBridge {
    fn release(&mut self) {
        // the native context refers to the callbacks, free it first
        if let Some(mut handle) = self.handle.take() {
            handle.release();
        }
        match self.callbacks.take() {
            Some(callbacks) => drop(unsafe { Box::from_raw(callbacks.as_ptr()) }),
            None => log::debug!("ignoring release of already released io bridge"),
        }
    }
}

impl Drop for IoBridge {
    fn drop(&mut self) {
        if self.handle.is_some() || self.callbacks.is_some() {
            self.release();
        }
    }
}

impl std::fmt::Debug for IoBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoBridge")
            .field("buffer_size", &self.buffer_size)
            .field("can_read", &self.can_read())
            .field("can_write", &self.can_write())
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
#[path = "io_test.rs"]
mod io_test;

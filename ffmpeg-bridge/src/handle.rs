//! Native handle ownership and release accounting.
//!
//! Every FFmpeg object this crate touches is held through a [`NativeHandle`].
//! Owned handles are counted by the process-wide [`ResourceRegistry`] and freed
//! exactly once, either by an explicit [`release`] or on drop. Borrowed handles
//! (streams living inside a format context) are never freed here.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    FormatCtx,
    CodecCtx,
    Stream,
    Packet,
    IoCtx,
}

impl HandleKind {
    pub const ALL: [HandleKind; 5] = [
        HandleKind::FormatCtx,
        HandleKind::CodecCtx,
        HandleKind::Stream,
        HandleKind::Packet,
        HandleKind::IoCtx,
    ];

    fn slot(self) -> usize {
        match self {
            HandleKind::FormatCtx => 0,
            HandleKind::CodecCtx => 1,
            HandleKind::Stream => 2,
            HandleKind::Packet => 3,
            HandleKind::IoCtx => 4,
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleKind::FormatCtx => "format context",
            HandleKind::CodecCtx => "codec context",
            HandleKind::Stream => "stream",
            HandleKind::Packet => "packet",
            HandleKind::IoCtx => "io context",
        };
        f.write_str(name)
    }
}

/// Counters of owned handles per kind.
pub struct ResourceRegistry {
    acquired: [AtomicUsize; 5],
    released: [AtomicUsize; 5],
    ignored: AtomicUsize,
}

/// Point-in-time copy of the registry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistrySnapshot {
    pub acquired: [usize; 5],
    pub released: [usize; 5],
    /// Release calls that found nothing to free.
    pub ignored: usize,
}

impl RegistrySnapshot {
    pub fn live(&self, kind: HandleKind) -> usize {
        let i = kind.slot();
        self.acquired[i].saturating_sub(self.released[i])
    }

    pub fn total_live(&self) -> usize {
        HandleKind::ALL.iter().map(|k| self.live(*k)).sum()
    }
}

impl ResourceRegistry {
    const fn new() -> Self {
        Self {
            acquired: [const { AtomicUsize::new(0) }; 5],
            released: [const { AtomicUsize::new(0) }; 5],
            ignored: AtomicUsize::new(0),
        }
    }

    fn on_acquire(&self, kind: HandleKind) {
        self.acquired[kind.slot()].fetch_add(1, Ordering::Relaxed);
    }

    fn on_release(&self, kind: HandleKind) {
        self.released[kind.slot()].fetch_add(1, Ordering::Relaxed);
    }

    fn on_ignored(&self, kind: HandleKind) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
        log::debug!("ignoring release of already released {}", kind);
    }

    /// Number of owned handles of `kind` acquired and not yet released.
    pub fn live(&self, kind: HandleKind) -> usize {
        self.snapshot().live(kind)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut snap = RegistrySnapshot::default();
        for kind in HandleKind::ALL {
            let i = kind.slot();
            snap.acquired[i] = self.acquired[i].load(Ordering::Relaxed);
            snap.released[i] = self.released[i].load(Ordering::Relaxed);
        }
        snap.ignored = self.ignored.load(Ordering::Relaxed);
        snap
    }
}

pub fn registry() -> &'static ResourceRegistry {
    static REGISTRY: ResourceRegistry = ResourceRegistry::new();
    &REGISTRY
}

/// Frees the native object behind a pointer. Implemented per handle kind.
pub(crate) type FreeFn<T> = unsafe fn(NonNull<T>);

/// A pointer to an FFmpeg object with its kind and ownership.
///
/// The pointer is only reachable through `as_ptr`, which fails once the handle
/// has been released.
pub struct NativeHandle<T> {
    ptr: Option<NonNull<T>>,
    kind: HandleKind,
    owned: bool,
    free: Option<FreeFn<T>>,
    _marker: PhantomData<*mut T>,
}

// Handles are moved between threads together with their context; FFmpeg
// objects are not tied to the thread that created them.
unsafe impl<T> Send for NativeHandle<T> {}

impl<T> NativeHandle<T> {
    /// Takes ownership of `ptr`; `free` runs exactly once on release.
    pub(crate) fn owned(ptr: *mut T, kind: HandleKind, free: FreeFn<T>) -> Result<Self> {
        let ptr = NonNull::new(ptr).ok_or(Error::Allocation(kind))?;
        registry().on_acquire(kind);
        log::debug!("acquired {} {:p}", kind, ptr);
        Ok(Self {
            ptr: Some(ptr),
            kind,
            owned: true,
            free: Some(free),
            _marker: PhantomData,
        })
    }

    /// Wraps a pointer owned by some other native object.
    pub(crate) fn borrowed(ptr: *mut T, kind: HandleKind) -> Result<Self> {
        let ptr = NonNull::new(ptr).ok_or(Error::Allocation(kind))?;
        Ok(Self {
            ptr: Some(ptr),
            kind,
            owned: false,
            free: None,
            _marker: PhantomData,
        })
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn is_released(&self) -> bool {
        self.ptr.is_none()
    }

    pub(crate) fn as_ptr(&self) -> Result<*mut T> {
        self.ptr.map(NonNull::as_ptr).ok_or(Error::Released(self.kind))
    }

    /// Hands the pointer back without freeing it. Used when a native call has
    /// already freed or adopted the object.
    pub(crate) fn forget(&mut self) {
        if self.ptr.take().is_some() && self.owned {
            registry().on_release(self.kind);
        }
    }

    /// Frees the object if owned. Safe to call any number of times.
    pub(crate) fn release(&mut self) {
        if !self.owned {
            log::trace!("ignoring release of borrowed {}", self.kind);
            return;
        }
        match self.ptr.take() {
            Some(ptr) => {
                log::debug!("releasing {} {:p}", self.kind, ptr);
                if let Some(free) = self.free {
                    unsafe { free(ptr) };
                }
                registry().on_release(self.kind);
            }
            None => registry().on_ignored(self.kind),
        }
    }
}

impl<T> fmt::Debug for NativeHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("kind", &self.kind)
            .field("owned", &self.owned)
            .field("released", &self.is_released())
            .finish()
    }
}

impl<T> Drop for NativeHandle<T> {
    fn drop(&mut self) {
        if self.owned && self.ptr.is_some() {
            self.release();
        }
    }
}

/// Explicit, idempotent release of a native resource.
pub trait Release {
    fn release(&mut self);
}

/// Releases `resource`. A second call on the same resource is a no-op.
pub fn release<R: Release + ?Sized>(resource: &mut R) {
    resource.release();
}

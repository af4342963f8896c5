//! Byte allocators
//!
//! Storages obtain and release their bytes through an [`Allocator`]. The
//! crate ships a zeroing CPU allocator, a data-less meta allocator and a
//! counting decorator; device backends plug in their own.

use once_cell::sync::Lazy;
use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

use super::device::Device;

/// Alignment of CPU allocations (one cache line)
pub const CPU_ALIGNMENT: usize = 64;

/// Allocation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("out of memory allocating {nbytes} bytes on {device}")]
    OutOfMemory { nbytes: usize, device: Device },

    #[error("allocation of {nbytes} bytes exceeds layout limits")]
    LayoutOverflow { nbytes: usize },
}

/// A byte allocator for one device.
///
/// `allocate` returns zero-initialised memory of exactly `nbytes`; a request
/// for zero bytes may return a dangling pointer. `free` receives the same
/// pointer and length.
pub trait Allocator: Send + Sync {
    fn name(&self) -> &str;

    fn device(&self) -> Device;

    fn allocate(&self, nbytes: usize) -> Result<NonNull<u8>, AllocError>;

    fn free(&self, ptr: NonNull<u8>, nbytes: usize);
}

/// Shared handle to an allocator
pub type AllocatorRef = Arc<dyn Allocator>;

/// True if both handles name the same allocator instance
pub fn same_allocator(a: &AllocatorRef, b: &AllocatorRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const u8,
        Arc::as_ptr(b) as *const u8,
    )
}

impl fmt::Debug for dyn Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Allocator({} on {})", self.name(), self.device())
    }
}

/// Heap allocator for host memory
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuAllocator;

impl CpuAllocator {
    fn layout(nbytes: usize) -> Result<Layout, AllocError> {
        Layout::from_size_align(nbytes, CPU_ALIGNMENT)
            .map_err(|_| AllocError::LayoutOverflow { nbytes })
    }
}

impl Allocator for CpuAllocator {
    fn name(&self) -> &str {
        "cpu"
    }

    fn device(&self) -> Device {
        Device::CPU
    }

    fn allocate(&self, nbytes: usize) -> Result<NonNull<u8>, AllocError> {
        if nbytes == 0 {
            return Ok(NonNull::dangling());
        }
        let layout = Self::layout(nbytes)?;
        // SAFETY: layout has a non-zero size
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        log::trace!("cpu allocate {} bytes at {:p}", nbytes, ptr);
        NonNull::new(ptr).ok_or(AllocError::OutOfMemory {
            nbytes,
            device: Device::CPU,
        })
    }

    fn free(&self, ptr: NonNull<u8>, nbytes: usize) {
        if nbytes == 0 {
            return;
        }
        if let Ok(layout) = Self::layout(nbytes) {
            log::trace!("cpu free {} bytes at {:p}", nbytes, ptr);
            // SAFETY: ptr came from allocate() with the same layout
            unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

static CPU_ALLOCATOR: Lazy<AllocatorRef> = Lazy::new(|| Arc::new(CpuAllocator));

/// The process-wide default CPU allocator
pub fn cpu_allocator() -> AllocatorRef {
    Arc::clone(&CPU_ALLOCATOR)
}

/// Allocator for the meta device: sizes are recorded, no bytes exist
#[derive(Debug, Default, Clone, Copy)]
pub struct MetaAllocator;

impl Allocator for MetaAllocator {
    fn name(&self) -> &str {
        "meta"
    }

    fn device(&self) -> Device {
        Device::META
    }

    fn allocate(&self, _nbytes: usize) -> Result<NonNull<u8>, AllocError> {
        Ok(NonNull::dangling())
    }

    fn free(&self, _ptr: NonNull<u8>, _nbytes: usize) {}
}

/// Decorator counting allocations and frees of an inner allocator
pub struct TrackingAllocator {
    inner: AllocatorRef,
    allocations: AtomicUsize,
    frees: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl TrackingAllocator {
    pub fn new(inner: AllocatorRef) -> Arc<Self> {
        Arc::new(Self {
            inner,
            allocations: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
        })
    }

    /// Tracking wrapper around the default CPU allocator
    pub fn cpu() -> Arc<Self> {
        Self::new(cpu_allocator())
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Acquire)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::Acquire)
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Acquire)
    }

    /// Allocations not yet freed
    pub fn outstanding(&self) -> usize {
        self.allocations() - self.frees()
    }
}

impl Allocator for TrackingAllocator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn device(&self) -> Device {
        self.inner.device()
    }

    fn allocate(&self, nbytes: usize) -> Result<NonNull<u8>, AllocError> {
        let ptr = self.inner.allocate(nbytes)?;
        self.allocations.fetch_add(1, Ordering::AcqRel);
        self.live_bytes.fetch_add(nbytes, Ordering::AcqRel);
        Ok(ptr)
    }

    fn free(&self, ptr: NonNull<u8>, nbytes: usize) {
        self.inner.free(ptr, nbytes);
        self.frees.fetch_add(1, Ordering::AcqRel);
        self.live_bytes.fetch_sub(nbytes, Ordering::AcqRel);
    }
}

impl fmt::Debug for TrackingAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingAllocator")
            .field("inner", &self.inner.name())
            .field("allocations", &self.allocations())
            .field("frees", &self.frees())
            .field("live_bytes", &self.live_bytes())
            .finish()
    }
}

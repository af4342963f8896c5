//! Native storage resource
//!
//! `Storage` is a strong handle to a `StorageImpl`; the handle count is the
//! resource's reference count and may be changed from any thread. The bytes
//! are released exactly when the last handle drops, either back to the
//! allocator or, for a view, by dropping the parent handle the view holds.

use std::fmt;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use super::allocator::{AllocError, AllocatorRef};
use super::device::Device;
use super::slot::WrapperSlot;
use super::{StorageError, StorageResult};

/// Who releases the bytes behind a [`DataPtr`]
enum DataContext {
    /// Returned to the allocator on drop
    Allocated(AllocatorRef),
    /// Borrowed from a parent storage kept alive by this handle
    View(Storage),
}

/// Pointer to a storage's bytes plus the action that releases them
pub struct DataPtr {
    ptr: NonNull<u8>,
    nbytes: usize,
    device: Device,
    context: DataContext,
}

impl DataPtr {
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

impl Drop for DataPtr {
    fn drop(&mut self) {
        // A view's parent handle is released when `context` drops
        if let DataContext::Allocated(allocator) = &self.context {
            allocator.free(self.ptr, self.nbytes);
        }
    }
}

// Safety: the pointer is owned by the allocator context or kept valid by the
// parent handle. Bytes are only touched through `Storage::cells`, which views
// them as atomics.
unsafe impl Send for DataPtr {}
unsafe impl Sync for DataPtr {}

/// The native resource: bytes, metadata and the wrapper slot
pub struct StorageImpl {
    slot: WrapperSlot,
    data: DataPtr,
    nbytes: usize,
    allocator: AllocatorRef,
    resizable: bool,
}

/// Strong, reference-counted handle to a [`StorageImpl`]
#[derive(Clone)]
pub struct Storage(Arc<StorageImpl>);

impl Storage {
    /// Allocate a resizable storage on the allocator's own device
    pub fn new(nbytes: usize, allocator: AllocatorRef) -> Result<Self, AllocError> {
        let device = allocator.device();
        Self::allocate(nbytes, allocator, device, true)
    }

    /// Allocate `nbytes` zeroed bytes tagged with `device`
    pub fn allocate(
        nbytes: usize,
        allocator: AllocatorRef,
        device: Device,
        resizable: bool,
    ) -> Result<Self, AllocError> {
        let ptr = allocator.allocate(nbytes)?;
        let data = DataPtr {
            ptr,
            nbytes,
            device,
            context: DataContext::Allocated(Arc::clone(&allocator)),
        };
        Ok(Self(Arc::new(StorageImpl {
            slot: WrapperSlot::new(),
            data,
            nbytes,
            allocator,
            resizable,
        })))
    }

    /// Allocate a storage holding a copy of `bytes`
    pub fn from_bytes(bytes: &[u8], allocator: AllocatorRef) -> Result<Self, AllocError> {
        let storage = Self::new(bytes.len(), allocator)?;
        storage.copy_from(bytes);
        Ok(storage)
    }

    /// Zero-copy view of `parent` over `[offset, offset + len)`.
    ///
    /// The view is never resizable and holds a parent handle for its whole
    /// lifetime.
    pub fn view(parent: &Storage, offset: usize, len: usize) -> StorageResult<Self> {
        let stop = offset.checked_add(len).unwrap_or(usize::MAX);
        if stop > parent.nbytes() {
            return Err(StorageError::InvalidRange {
                start: offset,
                stop,
                length: parent.nbytes(),
            });
        }
        let ptr = if parent.has_data() {
            // SAFETY: offset + len is within the parent's allocation
            unsafe { NonNull::new_unchecked(parent.0.data.ptr.as_ptr().add(offset)) }
        } else {
            NonNull::dangling()
        };
        let data = DataPtr {
            ptr,
            nbytes: len,
            device: parent.device(),
            context: DataContext::View(parent.clone()),
        };
        Ok(Self(Arc::new(StorageImpl {
            slot: WrapperSlot::new(),
            data,
            nbytes: len,
            allocator: Arc::clone(&parent.0.allocator),
            resizable: false,
        })))
    }

    pub fn nbytes(&self) -> usize {
        self.0.nbytes
    }

    pub fn device(&self) -> Device {
        self.0.data.device
    }

    pub fn allocator(&self) -> &AllocatorRef {
        &self.0.allocator
    }

    pub fn is_resizable(&self) -> bool {
        self.0.resizable
    }

    /// Parent storage if this is a view
    pub fn view_base(&self) -> Option<&Storage> {
        match &self.0.data.context {
            DataContext::View(parent) => Some(parent),
            DataContext::Allocated(_) => None,
        }
    }

    /// Number of strong handles, including this one
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn downgrade(&self) -> WeakStorage {
        WeakStorage(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(a: &Storage, b: &Storage) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Opaque identity of the underlying resource
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn data_ptr(&self) -> *const u8 {
        self.0.data.as_ptr()
    }

    /// Whether the storage has addressable bytes
    pub fn has_data(&self) -> bool {
        self.device().kind.has_data()
    }

    /// The slot recording this storage's wrapper
    pub fn slot(&self) -> &WrapperSlot {
        &self.0.slot
    }

    /// The bytes as atomic cells; empty for storages without data.
    ///
    /// Holders on other threads may read while the heap thread writes, so
    /// every byte access goes through these cells.
    fn cells(&self) -> &[AtomicU8] {
        if !self.has_data() || self.nbytes() == 0 {
            return &[];
        }
        // SAFETY: AtomicU8 has the size and alignment of u8, the allocation
        // spans nbytes bytes and outlives the borrow of `self`
        unsafe {
            std::slice::from_raw_parts(
                self.0.data.ptr.as_ptr() as *const AtomicU8,
                self.nbytes(),
            )
        }
    }

    pub fn read(&self, index: usize) -> Option<u8> {
        self.cells().get(index).map(|b| b.load(Ordering::Relaxed))
    }

    pub(crate) fn write(&self, index: usize, value: u8) -> bool {
        match self.cells().get(index) {
            Some(b) => {
                b.store(value, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Set every byte in `range` to `value`; the range is clamped to the storage
    pub(crate) fn fill(&self, range: Range<usize>, value: u8) {
        let cells = self.cells();
        let end = range.end.min(cells.len());
        if range.start >= end {
            return;
        }
        for b in &cells[range.start..end] {
            b.store(value, Ordering::Relaxed);
        }
    }

    /// Overwrite the leading bytes with `bytes`, truncated to the storage size
    pub(crate) fn copy_from(&self, bytes: &[u8]) {
        for (b, &value) in self.cells().iter().zip(bytes) {
            b.store(value, Ordering::Relaxed);
        }
    }

    /// Snapshot of the bytes; empty for storages without data
    pub fn to_vec(&self) -> Vec<u8> {
        self.cells()
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("nbytes", &self.nbytes())
            .field("device", &self.device())
            .field("resizable", &self.is_resizable())
            .field("use_count", &self.use_count())
            .field("view", &self.view_base().is_some())
            .finish()
    }
}

/// Non-owning handle; does not keep the resource alive
#[derive(Clone)]
pub struct WeakStorage(Weak<StorageImpl>);

impl WeakStorage {
    pub fn upgrade(&self) -> Option<Storage> {
        self.0.upgrade().map(Storage)
    }

    pub fn is_dangling(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl fmt::Debug for WeakStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakStorage(strong={})", self.0.strong_count())
    }
}

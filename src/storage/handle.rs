//! The wrapper's handle on its storage

use crate::host::{Heap, ObjectId, Payload};

use super::resource::{Storage, WeakStorage};
use super::{StorageError, StorageResult};

/// How a wrapper refers to its storage.
///
/// `Owned` holds a strong handle. `Borrowed` is used while the storage owns
/// the wrapper (a preserved wrapper); the strong claim then runs the other
/// way and the wrapper must not keep the storage alive.
pub enum StorageHandle {
    Owned(Storage),
    Borrowed(WeakStorage),
}

impl StorageHandle {
    pub fn is_borrowed(&self) -> bool {
        matches!(self, StorageHandle::Borrowed(_))
    }

    /// A strong handle to the storage, if it is still alive
    pub fn storage(&self) -> Option<Storage> {
        match self {
            StorageHandle::Owned(storage) => Some(storage.clone()),
            StorageHandle::Borrowed(weak) => weak.upgrade(),
        }
    }
}

/// Which side currently holds the strong claim of a wrapper/storage pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The wrapper owns the storage (handle is `Owned`)
    WrapperOwnsStorage,
    /// The storage owns the wrapper (handle is `Borrowed`, slot flag set)
    StorageOwnsWrapper,
}

impl Heap {
    pub(crate) fn storage_handle(&self, id: ObjectId) -> StorageResult<&StorageHandle> {
        match &self.object(id)?.payload {
            Payload::Storage(handle) => Ok(handle),
            Payload::Plain => Err(StorageError::NullResource),
        }
    }

    /// Replace the object's handle, returning the old one
    pub(crate) fn replace_storage_handle(
        &mut self,
        id: ObjectId,
        handle: StorageHandle,
    ) -> StorageResult<StorageHandle> {
        match &mut self.object_mut(id)?.payload {
            Payload::Storage(current) => Ok(std::mem::replace(current, handle)),
            Payload::Plain => Err(StorageError::NullResource),
        }
    }

    /// Detach the handle for destruction, leaving a plain object behind
    pub(crate) fn take_storage_handle(&mut self, id: ObjectId) -> StorageResult<StorageHandle> {
        match std::mem::replace(&mut self.object_mut(id)?.payload, Payload::Plain) {
            Payload::Storage(handle) => Ok(handle),
            Payload::Plain => Err(StorageError::NullResource),
        }
    }

    /// Strong handle to the storage wrapped by `id`
    pub fn unpack_storage(&self, id: ObjectId) -> StorageResult<Storage> {
        self.storage_handle(id)?
            .storage()
            .ok_or(StorageError::NullResource)
    }

    /// True if `id` is a storage wrapper
    pub fn is_storage(&self, id: ObjectId) -> bool {
        self.storage_handle(id).is_ok()
    }
}

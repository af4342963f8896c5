//! Wrapper creation and lookup
//!
//! A storage surfaces to the host through at most one wrapper per heap. The
//! slot remembers that wrapper; `wrap()` hands it back (reclaiming it from a
//! dormant state if needed) and only allocates when none is live.

use crate::host::{Heap, HostType, ObjectId, Payload};

use super::bridge::StorageBridge;
use super::handle::StorageHandle;
use super::resource::Storage;
use super::slot::{OriginTag, SlotLookup};
use super::{StorageError, StorageResult};

impl StorageBridge {
    /// Return the canonical wrapper for `storage`, creating one if needed.
    ///
    /// The caller's storage handle is consumed: it either becomes the owned
    /// handle of a new or reclaimed wrapper, or is dropped when the wrapper
    /// already owns a handle of its own.
    pub fn wrap(&self, heap: &mut Heap, storage: Storage) -> StorageResult<ObjectId> {
        if heap.is_hermetic() {
            return Ok(heap.alloc_with(self.default_class(), owned(storage)));
        }

        match storage.slot().check_wrapper(heap.shared())? {
            SlotLookup::Live(obj) => {
                if storage.slot().owns_wrapper() {
                    // Dormant wrapper: the slot's reference moves to the caller
                    let old = heap.replace_storage_handle(obj, StorageHandle::Owned(storage.clone()))?;
                    storage.slot().set_owns_wrapper(false);
                    debug_assert!(old.is_borrowed());
                    log::debug!("reclaimed dormant wrapper {}", obj);
                } else {
                    heap.incref(obj)?;
                }
                Ok(obj)
            }
            SlotLookup::Vacant => {
                let ty = self.default_class().clone();
                self.new_with_storage(heap, &ty, storage, OriginTag::TaggedByHost, false)
            }
            SlotLookup::Untagged => {
                let status = if storage.use_count() <= 1 {
                    OriginTag::Uninitialized
                } else {
                    OriginTag::MaybeUninitialized
                };
                let ty = self.default_class().clone();
                self.new_with_storage(heap, &ty, storage, status, false)
            }
        }
    }

    /// Create a wrapper of a specific type for `storage`.
    ///
    /// If the storage already has a live wrapper it is reused only when
    /// `allow_preexisting` is set and its type is `ty` or a subtype of it.
    pub fn new_with_storage(
        &self,
        heap: &mut Heap,
        ty: &HostType,
        storage: Storage,
        status: OriginTag,
        allow_preexisting: bool,
    ) -> StorageResult<ObjectId> {
        self.check_storage_type(ty)?;

        if heap.is_hermetic() {
            return Ok(heap.alloc_with(ty, owned(storage)));
        }

        if let SlotLookup::Live(existing) = storage.slot().check_wrapper(heap.shared())? {
            let existing_ty = heap.type_of(existing)?;
            if !allow_preexisting || !existing_ty.is_subtype(ty) {
                return Err(StorageError::AlreadyWrapped {
                    requested: ty.name().to_string(),
                    existing: existing_ty.name().to_string(),
                });
            }
            return self.wrap(heap, storage);
        }

        let slot_owner = storage.clone();
        let obj = heap.alloc_with(ty, owned(storage));
        if let Err(e) = slot_owner.slot().bind(heap.shared(), obj, status) {
            drop(slot_owner);
            heap.decref(obj)?;
            return Err(e);
        }
        log::debug!("bound new {} wrapper {} ({:?})", ty, obj, status);
        Ok(obj)
    }
}

fn owned(storage: Storage) -> Payload {
    Payload::Storage(StorageHandle::Owned(storage))
}

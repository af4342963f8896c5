//! Wrapper preservation
//!
//! When a wrapper's host count reaches zero while other native holders still
//! reference its storage, the wrapper is kept alive in a dormant state
//! instead of being destroyed, so a later `wrap()` of the same storage
//! returns the same object.

use crate::host::{Heap, ObjectId};

use super::handle::StorageHandle;
use super::slot::SlotLookup;
use super::StorageResult;

/// Hand the wrapper's strong claim over to its storage.
///
/// Returns true if the wrapper was preserved; dealloc must then stop.
pub(crate) fn try_preserve(heap: &mut Heap, obj: ObjectId) -> bool {
    match preserve(heap, obj) {
        Ok(preserved) => preserved,
        Err(e) => {
            log::warn!("could not preserve wrapper {}: {}", obj, e);
            false
        }
    }
}

fn preserve(heap: &mut Heap, obj: ObjectId) -> StorageResult<bool> {
    let weak = match heap.storage_handle(obj)? {
        StorageHandle::Owned(storage) => {
            let registered = storage.slot().check_wrapper(heap.shared())? == SlotLookup::Live(obj);
            if !registered || storage.use_count() <= 1 {
                return Ok(false);
            }
            // Set before the wrapper lets go of the storage, so a racing last
            // release elsewhere queues the wrapper instead of orphaning it.
            storage.slot().set_owns_wrapper(true);
            storage.downgrade()
        }
        StorageHandle::Borrowed(_) => return Ok(false),
    };

    heap.incref(obj)?;
    let old = heap.replace_storage_handle(obj, StorageHandle::Borrowed(weak))?;
    drop(old);
    log::debug!("preserved wrapper {} for remaining native holders", obj);
    Ok(true)
}

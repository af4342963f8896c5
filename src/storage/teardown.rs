//! Wrapper teardown
//!
//! `subclass_dealloc` is installed as the dealloc function of every storage
//! wrapper type. It runs when a wrapper's host count reaches zero and either
//! preserves the wrapper, stops because a hook resurrected it, or destroys
//! it stage by stage. A resurrected object restarts from the top on its
//! next dealloc.

use crate::host::{DeallocOutcome, Finalization, Heap, ObjectId};

use super::handle::StorageHandle;
use super::preserve::try_preserve;
use super::StorageResult;

/// Dealloc function for storage wrapper types
pub fn subclass_dealloc(heap: &mut Heap, obj: ObjectId) -> DeallocOutcome {
    match run(heap, obj) {
        Ok(outcome) => outcome,
        Err(e) => {
            log::warn!("teardown of storage wrapper {} failed: {}", obj, e);
            if heap.is_alive(obj) {
                if let Err(e) = heap.free_object(obj) {
                    log::warn!("could not free wrapper {}: {}", obj, e);
                }
            }
            DeallocOutcome::Destroyed
        }
    }
}

fn run(heap: &mut Heap, obj: ObjectId) -> StorageResult<DeallocOutcome> {
    if try_preserve(heap, obj) {
        return Ok(DeallocOutcome::Preserved);
    }

    let ty = heap.type_of(obj)?;
    if ty.is_gc() {
        heap.untrack(obj)?;
    }

    let mut ran_hook = false;
    if ty.finalizer().is_some() {
        heap.track(obj)?;
        ran_hook = true;
        if heap.call_finalizer_from_dealloc(obj)? == Finalization::Resurrected {
            return Ok(DeallocOutcome::Resurrected);
        }
        heap.untrack(obj)?;
    }

    if ty.supports_weakrefs() {
        heap.clear_weakrefs(obj)?;
    }

    if ty.legacy_del().is_some() {
        heap.track(obj)?;
        ran_hook = true;
        if heap.call_legacy_del(obj)? == Finalization::Resurrected {
            return Ok(DeallocOutcome::Resurrected);
        }
        heap.untrack(obj)?;
    }

    // Weak references created by a hook must not call back into a
    // half-destroyed object
    if ran_hook && ty.supports_weakrefs() {
        heap.clear_weakrefs_silently(obj)?;
    }

    // Per-level slots, concrete type up to but excluding the base
    let mut level = ty.clone();
    while let Some(base) = level.base().cloned() {
        heap.clear_slots(obj, &level)?;
        level = base;
    }

    if ty.has_dict() {
        heap.clear_dict(obj)?;
    }

    let handle = heap.take_storage_handle(obj)?;
    if let Some(storage) = handle.storage() {
        storage.slot().unbind(heap.shared(), obj);
    }
    if let StorageHandle::Owned(storage) = &handle {
        log::trace!("wrapper {} releasing storage (use_count {})", obj, storage.use_count());
    }
    drop(handle);

    drop(ty);
    heap.free_object(obj)?;
    Ok(DeallocOutcome::Destroyed)
}

//! Zero-copy slices of a wrapped storage

use crate::host::{Heap, ObjectId};

use super::bridge::StorageBridge;
use super::resource::Storage;
use super::slot::OriginTag;
use super::{StorageError, StorageResult};

impl StorageBridge {
    /// Wrap a view of bytes `[start, stop)` of the storage behind `obj`.
    ///
    /// The view is wrapped with `obj`'s concrete type and keeps the parent
    /// storage alive for as long as it lives.
    pub fn slice(
        &self,
        heap: &mut Heap,
        obj: ObjectId,
        start: usize,
        stop: usize,
    ) -> StorageResult<ObjectId> {
        let parent = heap.unpack_storage(obj)?;
        if start > stop || stop > parent.nbytes() {
            return Err(StorageError::InvalidRange {
                start,
                stop,
                length: parent.nbytes(),
            });
        }
        let view = Storage::view(&parent, start, stop - start)?;
        drop(parent);

        let ty = heap.type_of(obj)?;
        self.new_with_storage(heap, &ty, view, OriginTag::Uninitialized, false)
    }
}

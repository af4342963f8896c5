//! Weak references
//!
//! A weak reference observes an object without keeping it alive. Clearing
//! during teardown either invokes callbacks (the normal path) or drops them
//! silently (for references created while a finalizer ran).

use std::fmt;
use std::sync::Arc;

use super::{Heap, HostError, HostResult, ObjectId};

/// Callback invoked when a weak reference's target is cleared.
pub type WeakCallback = Arc<dyn Fn(&mut Heap, WeakRefId) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WeakRefId(pub(super) u64);

impl fmt::Display for WeakRefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "weakref#{}", self.0)
    }
}

pub(crate) struct WeakRefEntry {
    target: Option<ObjectId>,
    callback: Option<WeakCallback>,
}

impl Heap {
    /// Create a weak reference to `target`
    pub fn new_weakref(
        &mut self,
        target: ObjectId,
        callback: Option<WeakCallback>,
    ) -> HostResult<WeakRefId> {
        let obj = self.object(target)?;
        if !obj.ty.supports_weakrefs() {
            return Err(HostError::WeakRefUnsupported {
                type_name: obj.ty.name().to_string(),
            });
        }
        let id = WeakRefId(self.next_weakref);
        self.next_weakref += 1;
        self.weakrefs.insert(
            id,
            WeakRefEntry {
                target: Some(target),
                callback,
            },
        );
        self.object_mut(target)?.weakrefs.push(id);
        Ok(id)
    }

    /// Borrowed view of the referent, `None` once cleared
    pub fn weakref_target(&self, weakref: WeakRefId) -> HostResult<Option<ObjectId>> {
        self.weakrefs
            .get(&weakref)
            .map(|e| e.target)
            .ok_or(HostError::DeadWeakRef(weakref))
    }

    /// Upgrade to a strong reference
    pub fn upgrade_weakref(&mut self, weakref: WeakRefId) -> HostResult<Option<ObjectId>> {
        match self.weakref_target(weakref)? {
            Some(target) => {
                self.incref(target)?;
                Ok(Some(target))
            }
            None => Ok(None),
        }
    }

    /// Number of weak references currently pointing at `target`
    pub fn weakref_count(&self, target: ObjectId) -> HostResult<usize> {
        Ok(self.object(target)?.weakrefs.len())
    }

    /// Discard a weak reference object
    pub fn drop_weakref(&mut self, weakref: WeakRefId) -> HostResult<()> {
        let entry = self
            .weakrefs
            .remove(&weakref)
            .ok_or(HostError::DeadWeakRef(weakref))?;
        if let Some(target) = entry.target {
            if let Ok(obj) = self.object_mut(target) {
                obj.weakrefs.retain(|w| *w != weakref);
            }
        }
        Ok(())
    }

    /// Clear every weak reference to `target`, then run their callbacks
    pub fn clear_weakrefs(&mut self, target: ObjectId) -> HostResult<()> {
        let callbacks: Vec<(WeakRefId, WeakCallback)> = self
            .detach_weakrefs(target)?
            .into_iter()
            .filter_map(|(id, cb)| cb.map(|cb| (id, cb)))
            .collect();
        for (id, callback) in callbacks {
            callback(self, id);
        }
        Ok(())
    }

    /// Clear every weak reference to `target` without running callbacks
    pub fn clear_weakrefs_silently(&mut self, target: ObjectId) -> HostResult<()> {
        self.detach_weakrefs(target).map(drop)
    }

    fn detach_weakrefs(
        &mut self,
        target: ObjectId,
    ) -> HostResult<Vec<(WeakRefId, Option<WeakCallback>)>> {
        let ids = std::mem::take(&mut self.object_mut(target)?.weakrefs);
        let mut detached = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.weakrefs.get_mut(&id) {
                entry.target = None;
                detached.push((id, entry.callback.take()));
            }
        }
        Ok(detached)
    }
}

//! Per-resource wrapper slot
//!
//! Records the (at most one) live wrapper of a resource, which heap tagged
//! the resource, and whether the resource currently owns its wrapper.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::host::{HeapShared, ObjectId};

use super::{StorageError, StorageResult};

/// What is known about a slot's tagging when a wrapper is bound.
///
/// As slot state, `Uninitialized` is the only non-terminal value; once a heap
/// binds a wrapper the tag becomes `TaggedByHost` (definitely fresh) or
/// `MaybeUninitialized` (another holder could have raced) and stays there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OriginTag {
    Uninitialized,
    TaggedByHost,
    MaybeUninitialized,
}

/// Result of looking a resource's wrapper up from a heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotLookup {
    /// No heap has tagged the resource
    Untagged,
    /// Tagged by this heap, no live wrapper
    Vacant,
    Live(ObjectId),
}

#[derive(Default)]
struct SlotState {
    owner: Option<Arc<HeapShared>>,
    wrapper: Option<ObjectId>,
    owns_wrapper: bool,
    origin_tag: Option<OriginTag>,
    bind_status: Option<OriginTag>,
}

/// The wrapper slot attached to every storage
pub struct WrapperSlot {
    state: Mutex<SlotState>,
}

impl WrapperSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::default()),
        }
    }

    /// Look up the wrapper visible to `host`
    pub fn check_wrapper(&self, host: &HeapShared) -> StorageResult<SlotLookup> {
        let state = self.state.lock();
        match &state.owner {
            None => Ok(SlotLookup::Untagged),
            Some(owner) if owner.id() != host.id() => Err(StorageError::ForeignHost {
                owner: owner.id(),
                requester: host.id(),
            }),
            Some(_) => Ok(state
                .wrapper
                .map(SlotLookup::Live)
                .unwrap_or(SlotLookup::Vacant)),
        }
    }

    /// Bind `wrapper` as the resource's wrapper on `host`.
    ///
    /// The slot must not already reference a live wrapper.
    pub(crate) fn bind(
        &self,
        host: &Arc<HeapShared>,
        wrapper: ObjectId,
        status: OriginTag,
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        match state.owner.as_ref().map(|o| o.id()) {
            Some(owner) if owner != host.id() => {
                return Err(StorageError::ForeignHost {
                    owner,
                    requester: host.id(),
                })
            }
            Some(_) => {}
            None => {
                state.owner = Some(Arc::clone(host));
                state.origin_tag = Some(match status {
                    OriginTag::MaybeUninitialized => OriginTag::MaybeUninitialized,
                    OriginTag::Uninitialized | OriginTag::TaggedByHost => OriginTag::TaggedByHost,
                });
            }
        }
        debug_assert!(state.wrapper.is_none(), "slot already holds a wrapper");
        debug_assert!(!state.owns_wrapper);
        state.wrapper = Some(wrapper);
        state.bind_status = Some(status);
        Ok(())
    }

    /// Forget `wrapper` if the slot still references it; the tag is kept
    pub(crate) fn unbind(&self, host: &HeapShared, wrapper: ObjectId) -> bool {
        let mut state = self.state.lock();
        let ours = state.owner.as_ref().map(|o| o.id()) == Some(host.id());
        if ours && state.wrapper == Some(wrapper) {
            state.wrapper = None;
            state.owns_wrapper = false;
            true
        } else {
            false
        }
    }

    /// True while the resource holds the strong claim on its wrapper
    pub fn owns_wrapper(&self) -> bool {
        self.state.lock().owns_wrapper
    }

    pub(crate) fn set_owns_wrapper(&self, owns: bool) {
        self.state.lock().owns_wrapper = owns;
    }

    pub fn origin_tag(&self) -> OriginTag {
        self.state.lock().origin_tag.unwrap_or(OriginTag::Uninitialized)
    }

    /// Status supplied when the current wrapper was bound, for diagnostics
    pub fn bind_status(&self) -> Option<OriginTag> {
        self.state.lock().bind_status
    }
}

impl Drop for WrapperSlot {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.owns_wrapper {
            return;
        }
        // The resource held the wrapper's last host reference; hand it back
        // to the heap, which drops it from inside its exclusion domain.
        if let (Some(owner), Some(wrapper)) = (&state.owner, state.wrapper) {
            log::debug!("resource released dormant wrapper {} to heap {}", wrapper, owner.id());
            owner.defer_release(wrapper);
        }
    }
}

impl fmt::Debug for WrapperSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WrapperSlot")
            .field("owner", &state.owner.as_ref().map(|o| o.id()))
            .field("wrapper", &state.wrapper)
            .field("owns_wrapper", &state.owns_wrapper)
            .field("origin_tag", &state.origin_tag)
            .finish()
    }
}

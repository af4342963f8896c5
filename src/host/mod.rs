//! Host object model
//!
//! A minimal managed runtime that storage wrappers live in. It has the parts
//! of a host object system the storage bridge must interoperate with:
//!
//! - **Reference counts**: explicit `incref`/`decref`; reaching zero runs the
//!   type's dealloc function
//! - **Cyclic-GC tracking**: a per-object tracked flag toggled by dealloc code
//! - **Weak references**: cleared (with or without callbacks) during teardown
//! - **Finalizers**: run at most once per object; legacy destructors run on
//!   every dealloc attempt; both may resurrect the object
//! - **Slots and dict**: per-level instance slots and an attribute dictionary
//!
//! All mutation goes through `&mut Heap`, which plays the role of the host's
//! global exclusion domain. Native code that needs to give up a host
//! reference from outside that domain pushes onto the heap's release queue;
//! the heap drops those references in [`Heap::drain_pending`].

mod types;
mod weakref;

pub use types::{DeallocFn, DeallocOutcome, Hook, HostType, SlotDescriptor, TypeBuilder};
pub use weakref::{WeakCallback, WeakRefId};

use crossbeam::queue::SegQueue;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::storage::handle::StorageHandle;
use weakref::WeakRefEntry;

/// Errors raised by host object operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("object {0} is not alive")]
    DeadObject(ObjectId),

    #[error("'{type_name}' object has no attribute dictionary")]
    NoDict { type_name: String },

    #[error("'{type_name}' object has no slot '{slot}'")]
    NoSuchSlot { type_name: String, slot: String },

    #[error("cannot create weak reference to '{type_name}' object")]
    WeakRefUnsupported { type_name: String },

    #[error("weak reference {0} does not exist")]
    DeadWeakRef(WeakRefId),
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Identity of a host object. Never reused within a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Raw numeric identity
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A host-level value.
///
/// `Object` entries stored in a dict, slot or global hold a strong reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Object(ObjectId),
}

impl Value {
    /// Name of the value's kind as reported in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Object(_) => "object",
        }
    }

    fn collect_objects(&self, out: &mut Vec<ObjectId>) {
        match self {
            Value::Object(id) => out.push(*id),
            Value::List(items) => items.iter().for_each(|v| v.collect_objects(out)),
            _ => {}
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::Object(v)
    }
}

/// Native payload carried by an object.
pub(crate) enum Payload {
    Plain,
    Storage(StorageHandle),
}

pub(crate) struct HostObject {
    pub(crate) ty: HostType,
    refcnt: usize,
    tracked: bool,
    finalized: bool,
    dict: Option<HashMap<String, Value>>,
    slots: Vec<Option<Value>>,
    pub(crate) weakrefs: Vec<WeakRefId>,
    pub(crate) payload: Payload,
}

/// Heap state shared with native code that may run on other threads.
#[derive(Debug)]
pub struct HeapShared {
    id: u64,
    pending: SegQueue<ObjectId>,
}

impl HeapShared {
    /// Identity of the owning heap
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a host reference to be dropped at the next safe point
    pub(crate) fn defer_release(&self, obj: ObjectId) {
        self.pending.push(obj);
    }

    /// Number of queued releases not yet drained
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

static NEXT_HEAP_ID: AtomicU64 = AtomicU64::new(1);

/// Counters describing what happened to deallocated objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub allocated: u64,
    pub destroyed: u64,
    pub preserved: u64,
    pub resurrected: u64,
    pub deferred_releases: u64,
}

/// Outcome of running a finalizer or legacy destructor from dealloc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalization {
    Completed,
    Resurrected,
}

/// The host object heap.
pub struct Heap {
    shared: Arc<HeapShared>,
    objects: HashMap<ObjectId, HostObject>,
    weakrefs: HashMap<WeakRefId, WeakRefEntry>,
    globals: HashMap<String, Value>,
    next_object: u64,
    next_weakref: u64,
    hermetic: bool,
    stats: HeapStats,
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self {
            shared: Arc::new(HeapShared {
                id: NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed),
                pending: SegQueue::new(),
            }),
            objects: HashMap::new(),
            weakrefs: HashMap::new(),
            globals: HashMap::new(),
            next_object: 1,
            next_weakref: 1,
            hermetic: false,
            stats: HeapStats::default(),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn shared(&self) -> &Arc<HeapShared> {
        &self.shared
    }

    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    /// Number of objects currently alive
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    // =========================================================================
    // Allocation and reference counting
    // =========================================================================

    /// Allocate a plain object of `ty` with a reference count of one
    pub fn alloc(&mut self, ty: &HostType) -> ObjectId {
        self.alloc_with(ty, Payload::Plain)
    }

    pub(crate) fn alloc_with(&mut self, ty: &HostType, payload: Payload) -> ObjectId {
        let id = ObjectId(self.next_object);
        self.next_object += 1;
        let object = HostObject {
            ty: ty.clone(),
            refcnt: 1,
            tracked: ty.is_gc(),
            finalized: false,
            dict: None,
            slots: vec![None; ty.slot_count()],
            weakrefs: Vec::new(),
            payload,
        };
        self.objects.insert(id, object);
        self.stats.allocated += 1;
        id
    }

    pub(crate) fn object(&self, id: ObjectId) -> HostResult<&HostObject> {
        self.objects.get(&id).ok_or(HostError::DeadObject(id))
    }

    pub(crate) fn object_mut(&mut self, id: ObjectId) -> HostResult<&mut HostObject> {
        self.objects.get_mut(&id).ok_or(HostError::DeadObject(id))
    }

    pub fn is_alive(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn refcount(&self, id: ObjectId) -> Option<usize> {
        self.objects.get(&id).map(|o| o.refcnt)
    }

    pub fn type_of(&self, id: ObjectId) -> HostResult<HostType> {
        Ok(self.object(id)?.ty.clone())
    }

    pub fn incref(&mut self, id: ObjectId) -> HostResult<()> {
        self.object_mut(id)?.refcnt += 1;
        Ok(())
    }

    /// Drop one reference; the type's dealloc runs when the count hits zero
    pub fn decref(&mut self, id: ObjectId) -> HostResult<()> {
        let obj = self.object_mut(id)?;
        obj.refcnt = obj.refcnt.saturating_sub(1);
        if obj.refcnt == 0 {
            let dealloc = obj.ty.dealloc();
            match dealloc(self, id) {
                DeallocOutcome::Destroyed => self.stats.destroyed += 1,
                DeallocOutcome::Preserved => self.stats.preserved += 1,
                DeallocOutcome::Resurrected => self.stats.resurrected += 1,
            }
        }
        Ok(())
    }

    /// Drop the references held by `value`
    pub fn release(&mut self, value: Value) -> HostResult<()> {
        let mut ids = Vec::new();
        value.collect_objects(&mut ids);
        for id in ids {
            self.decref(id)?;
        }
        Ok(())
    }

    fn retain(&mut self, value: &Value) -> HostResult<()> {
        let mut ids = Vec::new();
        value.collect_objects(&mut ids);
        // Validate before touching any count
        for id in &ids {
            self.object(*id)?;
        }
        for id in ids {
            self.incref(id)?;
        }
        Ok(())
    }

    /// Remove the object and drop its type reference
    pub(crate) fn free_object(&mut self, id: ObjectId) -> HostResult<()> {
        self.objects
            .remove(&id)
            .map(drop)
            .ok_or(HostError::DeadObject(id))
    }

    /// Drop every host reference native code released since the last call.
    ///
    /// Returns the number of references dropped.
    pub fn drain_pending(&mut self) -> usize {
        let mut drained = 0;
        while let Some(id) = self.shared.pending.pop() {
            drained += 1;
            self.stats.deferred_releases += 1;
            if let Err(e) = self.decref(id) {
                log::warn!("deferred release of {} failed: {}", id, e);
            }
        }
        drained
    }

    // =========================================================================
    // GC tracking
    // =========================================================================

    pub fn is_tracked(&self, id: ObjectId) -> HostResult<bool> {
        Ok(self.object(id)?.tracked)
    }

    pub fn track(&mut self, id: ObjectId) -> HostResult<()> {
        self.object_mut(id)?.tracked = true;
        Ok(())
    }

    pub fn untrack(&mut self, id: ObjectId) -> HostResult<()> {
        self.object_mut(id)?.tracked = false;
        Ok(())
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    /// Run the type's finalizer from dealloc context.
    ///
    /// The object is revived with a temporary count of one for the call; any
    /// count left afterwards means the finalizer resurrected it. A finalizer
    /// runs at most once per object.
    pub fn call_finalizer_from_dealloc(&mut self, id: ObjectId) -> HostResult<Finalization> {
        let obj = self.object_mut(id)?;
        let hook = if obj.finalized {
            None
        } else {
            obj.finalized = true;
            obj.ty.finalizer().cloned()
        };
        self.run_revived(id, hook)
    }

    /// Run the type's legacy destructor from dealloc context.
    pub fn call_legacy_del(&mut self, id: ObjectId) -> HostResult<Finalization> {
        let hook = self.object(id)?.ty.legacy_del().cloned();
        self.run_revived(id, hook)
    }

    fn run_revived(&mut self, id: ObjectId, hook: Option<Hook>) -> HostResult<Finalization> {
        self.object_mut(id)?.refcnt = 1;
        if let Some(hook) = hook {
            hook(self, id);
        }
        let obj = self.object_mut(id)?;
        obj.refcnt -= 1;
        if obj.refcnt > 0 {
            log::debug!("object {} resurrected with {} references", id, obj.refcnt);
            Ok(Finalization::Resurrected)
        } else {
            Ok(Finalization::Completed)
        }
    }

    // =========================================================================
    // Attributes, slots and globals
    // =========================================================================

    /// Set an attribute in the object's dict; the dict takes a reference
    pub fn set_attr(&mut self, id: ObjectId, name: &str, value: Value) -> HostResult<()> {
        let obj = self.object(id)?;
        if !obj.ty.has_dict() {
            return Err(HostError::NoDict {
                type_name: obj.ty.name().to_string(),
            });
        }
        self.retain(&value)?;
        let old = self
            .object_mut(id)?
            .dict
            .get_or_insert_with(HashMap::new)
            .insert(name.to_string(), value);
        if let Some(old) = old {
            self.release(old)?;
        }
        Ok(())
    }

    /// Borrowed view of an attribute
    pub fn get_attr(&self, id: ObjectId, name: &str) -> HostResult<Option<Value>> {
        let obj = self.object(id)?;
        Ok(obj.dict.as_ref().and_then(|d| d.get(name).cloned()))
    }

    /// Drop the object's dict and every reference it held
    pub fn clear_dict(&mut self, id: ObjectId) -> HostResult<()> {
        if let Some(dict) = self.object_mut(id)?.dict.take() {
            for (_, value) in dict {
                self.release(value)?;
            }
        }
        Ok(())
    }

    pub fn set_slot(&mut self, id: ObjectId, name: &str, value: Value) -> HostResult<()> {
        let obj = self.object(id)?;
        let offset = obj
            .ty
            .find_slot(name)
            .map(|d| d.offset)
            .ok_or_else(|| HostError::NoSuchSlot {
                type_name: obj.ty.name().to_string(),
                slot: name.to_string(),
            })?;
        self.retain(&value)?;
        let old = self.object_mut(id)?.slots[offset].replace(value);
        if let Some(old) = old {
            self.release(old)?;
        }
        Ok(())
    }

    pub fn get_slot(&self, id: ObjectId, name: &str) -> HostResult<Option<Value>> {
        let obj = self.object(id)?;
        let desc = obj.ty.find_slot(name).ok_or_else(|| HostError::NoSuchSlot {
            type_name: obj.ty.name().to_string(),
            slot: name.to_string(),
        })?;
        Ok(obj.slots[desc.offset].clone())
    }

    /// Clear the slots declared by one level of the object's type chain
    pub fn clear_slots(&mut self, id: ObjectId, level: &HostType) -> HostResult<()> {
        let mut released = Vec::new();
        let obj = self.object_mut(id)?;
        for desc in level.slots() {
            if let Some(value) = obj.slots.get_mut(desc.offset).and_then(Option::take) {
                released.push(value);
            }
        }
        for value in released {
            self.release(value)?;
        }
        Ok(())
    }

    /// Bind a module-level name; the binding takes a reference
    pub fn set_global(&mut self, name: &str, value: Value) -> HostResult<()> {
        self.retain(&value)?;
        if let Some(old) = self.globals.insert(name.to_string(), value) {
            self.release(old)?;
        }
        Ok(())
    }

    /// Unbind a module-level name, handing its reference to the caller
    pub fn take_global(&mut self, name: &str) -> Option<Value> {
        self.globals.remove(name)
    }

    /// Describe a value's type for diagnostics, resolving object types
    pub fn describe(&self, value: &Value) -> String {
        match value {
            Value::Object(id) => match self.objects.get(id) {
                Some(obj) => obj.ty.name().to_string(),
                None => "object".to_string(),
            },
            other => other.kind_name().to_string(),
        }
    }

    // =========================================================================
    // Hermetic mode
    // =========================================================================

    /// Run `f` with wrappers created outside the per-resource registry
    pub fn with_hermetic<R>(&mut self, f: impl FnOnce(&mut Heap) -> R) -> R {
        let prev = std::mem::replace(&mut self.hermetic, true);
        let result = f(self);
        self.hermetic = prev;
        result
    }

    pub fn is_hermetic(&self) -> bool {
        self.hermetic
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("id", &self.shared.id)
            .field("objects", &self.objects.len())
            .field("weakrefs", &self.weakrefs.len())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Dealloc for objects without a native payload.
pub fn plain_dealloc(heap: &mut Heap, id: ObjectId) -> DeallocOutcome {
    let result = (|| -> HostResult<()> {
        let ty = heap.type_of(id)?;
        heap.untrack(id)?;
        if ty.supports_weakrefs() {
            heap.clear_weakrefs(id)?;
        }
        let mut level = Some(ty.clone());
        while let Some(t) = level {
            heap.clear_slots(id, &t)?;
            level = t.base().cloned();
        }
        heap.clear_dict(id)?;
        heap.free_object(id)
    })();
    if let Err(e) = result {
        log::warn!("dealloc of {} failed: {}", id, e);
    }
    DeallocOutcome::Destroyed
}

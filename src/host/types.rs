//! Host type objects
//!
//! A type carries the behaviour flags teardown consults (GC participation,
//! dict, weak references), the per-level slot descriptors computed when the
//! type is built, optional finalizer hooks and the dealloc function.

use std::fmt;
use std::sync::Arc;

use super::{plain_dealloc, Heap, ObjectId};

/// Finalizer or legacy destructor hook.
pub type Hook = Arc<dyn Fn(&mut Heap, ObjectId) + Send + Sync>;

/// Function run when an object's reference count reaches zero.
pub type DeallocFn = fn(&mut Heap, ObjectId) -> DeallocOutcome;

/// What a dealloc call did with the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeallocOutcome {
    /// Kept alive, now referenced from native code
    Preserved,
    /// A hook created a new reference; teardown stopped
    Resurrected,
    /// Memory released
    Destroyed,
}

/// One instance slot declared by a type level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDescriptor {
    pub name: String,
    /// Index into the object's flat slot storage
    pub offset: usize,
}

struct TypeObject {
    name: String,
    base: Option<HostType>,
    gc: bool,
    dict: bool,
    weakrefs: bool,
    slots: Vec<SlotDescriptor>,
    slot_count: usize,
    finalizer: Option<Hook>,
    legacy_del: Option<Hook>,
    dealloc: DeallocFn,
}

/// A host type. Cloning shares the same type object.
#[derive(Clone)]
pub struct HostType(Arc<TypeObject>);

impl HostType {
    pub fn builder(name: impl Into<String>) -> TypeBuilder {
        TypeBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn base(&self) -> Option<&HostType> {
        self.0.base.as_ref()
    }

    pub fn is_gc(&self) -> bool {
        self.0.gc
    }

    pub fn has_dict(&self) -> bool {
        self.0.dict
    }

    pub fn supports_weakrefs(&self) -> bool {
        self.0.weakrefs
    }

    /// Slots declared by this level only
    pub fn slots(&self) -> &[SlotDescriptor] {
        &self.0.slots
    }

    /// Total slots across this level and its bases
    pub fn slot_count(&self) -> usize {
        self.0.slot_count
    }

    pub fn finalizer(&self) -> Option<&Hook> {
        self.0.finalizer.as_ref()
    }

    pub fn legacy_del(&self) -> Option<&Hook> {
        self.0.legacy_del.as_ref()
    }

    pub fn dealloc(&self) -> DeallocFn {
        self.0.dealloc
    }

    pub fn ptr_eq(&self, other: &HostType) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// True if `self` is `other` or derives from it
    pub fn is_subtype(&self, other: &HostType) -> bool {
        let mut current = Some(self);
        while let Some(t) = current {
            if t.ptr_eq(other) {
                return true;
            }
            current = t.base();
        }
        false
    }

    /// Look up a slot by name, searching this level then its bases
    pub fn find_slot(&self, name: &str) -> Option<&SlotDescriptor> {
        let mut current = Some(self);
        while let Some(t) = current {
            if let Some(desc) = t.0.slots.iter().find(|d| d.name == name) {
                return Some(desc);
            }
            current = t.base();
        }
        None
    }

    /// Number of live handles to this type object
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl PartialEq for HostType {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for HostType {}

impl fmt::Debug for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostType")
            .field("name", &self.0.name)
            .field("base", &self.base().map(|b| b.name().to_string()))
            .field("gc", &self.0.gc)
            .field("dict", &self.0.dict)
            .field("weakrefs", &self.0.weakrefs)
            .field("slots", &self.0.slots)
            .finish()
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

/// Builder for [`HostType`].
///
/// Flags, hooks and dealloc are inherited from the base unless set here; a
/// level can add a dict or weak reference support but never remove it.
pub struct TypeBuilder {
    name: String,
    base: Option<HostType>,
    gc: bool,
    dict: bool,
    weakrefs: bool,
    slots: Vec<String>,
    finalizer: Option<Hook>,
    legacy_del: Option<Hook>,
    dealloc: Option<DeallocFn>,
}

impl TypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            gc: false,
            dict: false,
            weakrefs: false,
            slots: Vec::new(),
            finalizer: None,
            legacy_del: None,
            dealloc: None,
        }
    }

    pub fn base(mut self, base: &HostType) -> Self {
        self.base = Some(base.clone());
        self
    }

    pub fn gc(mut self, gc: bool) -> Self {
        self.gc = gc;
        self
    }

    pub fn dict(mut self, dict: bool) -> Self {
        self.dict = dict;
        self
    }

    pub fn weakrefs(mut self, weakrefs: bool) -> Self {
        self.weakrefs = weakrefs;
        self
    }

    /// Declare instance slots for this level
    pub fn slots<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.slots.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn finalizer(mut self, hook: impl Fn(&mut Heap, ObjectId) + Send + Sync + 'static) -> Self {
        self.finalizer = Some(Arc::new(hook));
        self
    }

    pub fn legacy_del(mut self, hook: impl Fn(&mut Heap, ObjectId) + Send + Sync + 'static) -> Self {
        self.legacy_del = Some(Arc::new(hook));
        self
    }

    pub fn dealloc(mut self, dealloc: DeallocFn) -> Self {
        self.dealloc = Some(dealloc);
        self
    }

    pub fn build(self) -> HostType {
        let base = self.base.as_ref();
        let inherited = |f: fn(&HostType) -> bool| base.map(f).unwrap_or(false);
        let first_offset = base.map(HostType::slot_count).unwrap_or(0);

        let slots: Vec<SlotDescriptor> = self
            .slots
            .into_iter()
            .enumerate()
            .map(|(i, name)| SlotDescriptor {
                name,
                offset: first_offset + i,
            })
            .collect();
        let slot_count = first_offset + slots.len();

        HostType(Arc::new(TypeObject {
            gc: self.gc || inherited(HostType::is_gc),
            dict: self.dict || inherited(HostType::has_dict),
            weakrefs: self.weakrefs || inherited(HostType::supports_weakrefs),
            finalizer: self
                .finalizer
                .or_else(|| base.and_then(|b| b.finalizer().cloned())),
            legacy_del: self
                .legacy_del
                .or_else(|| base.and_then(|b| b.legacy_del().cloned())),
            dealloc: self
                .dealloc
                .or_else(|| base.map(HostType::dealloc))
                .unwrap_or(plain_dealloc),
            name: self.name,
            base: self.base,
            slots,
            slot_count,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_offsets_follow_base() {
        let root = HostType::builder("Root").slots(["a", "b"]).build();
        let child = HostType::builder("Child").base(&root).slots(["c"]).build();

        assert_eq!(child.slot_count(), 3);
        assert_eq!(child.slots()[0].offset, 2);
        assert_eq!(child.find_slot("a").unwrap().offset, 0);
        assert!(child.find_slot("missing").is_none());
    }

    #[test]
    fn test_subtype_chain() {
        let root = HostType::builder("Root").build();
        let mid = HostType::builder("Mid").base(&root).build();
        let leaf = HostType::builder("Leaf").base(&mid).build();
        let other = HostType::builder("Other").build();

        assert!(leaf.is_subtype(&root));
        assert!(leaf.is_subtype(&leaf));
        assert!(!root.is_subtype(&leaf));
        assert!(!leaf.is_subtype(&other));
    }

    #[test]
    fn test_flags_inherited() {
        let root = HostType::builder("Root").dict(true).build();
        let child = HostType::builder("Child").base(&root).weakrefs(true).build();
        assert!(child.has_dict());
        assert!(child.supports_weakrefs());
        assert!(!child.is_gc());
    }
}

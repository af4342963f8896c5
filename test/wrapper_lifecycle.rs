//! Integration Tests for Wrapper Lifecycle
//!
//! Tests the wrap / preserve / reclaim hand-off between host wrappers and
//! native storages:
//! - Singleton wrapper identity
//! - Ownership exclusivity across transitions
//! - Preservation and destruction decisions
//! - Dormant wrappers released by their storage
//! - Hermetic wrappers

use storage_bridge::host::Heap;
use storage_bridge::storage::{
    cpu_allocator, OriginTag, Ownership, SlotLookup, Storage, StorageBridge, StorageError,
    TrackingAllocator,
};
use storage_bridge::{ObjectId, Value};

fn assert_exclusive(bridge: &StorageBridge, heap: &Heap, obj: ObjectId, storage: &Storage) {
    match bridge.ownership(heap, obj).unwrap() {
        Ownership::WrapperOwnsStorage => assert!(!storage.slot().owns_wrapper()),
        Ownership::StorageOwnsWrapper => assert!(storage.slot().owns_wrapper()),
    }
}

// =============================================================================
// Identity
// =============================================================================

#[test]
fn test_repeated_wrap_returns_same_object() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let storage = Storage::new(16, cpu_allocator()).unwrap();

    let first = bridge.wrap(&mut heap, storage.clone()).unwrap();
    for _ in 0..5 {
        assert_eq!(bridge.wrap(&mut heap, storage.clone()).unwrap(), first);
    }
    assert_eq!(heap.live_objects(), 1);
    assert_eq!(heap.refcount(first), Some(6));
    assert_eq!(
        storage.slot().check_wrapper(heap.shared()).unwrap(),
        SlotLookup::Live(first)
    );
}

#[test]
fn test_cdata_matches_storage_identity() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let storage = Storage::new(4, cpu_allocator()).unwrap();
    let obj = bridge.wrap(&mut heap, storage.clone()).unwrap();

    assert_eq!(bridge.cdata(&heap, obj).unwrap(), storage.identity());
}

// =============================================================================
// Ownership hand-off
// =============================================================================

#[test]
fn test_ownership_exclusive_through_transitions() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let storage = Storage::new(8, cpu_allocator()).unwrap();

    let obj = bridge.wrap(&mut heap, storage.clone()).unwrap();
    assert_eq!(bridge.ownership(&heap, obj).unwrap(), Ownership::WrapperOwnsStorage);
    assert_exclusive(&bridge, &heap, obj, &storage);

    // Host count hits zero while `storage` is still held: preserve
    heap.decref(obj).unwrap();
    assert_eq!(bridge.ownership(&heap, obj).unwrap(), Ownership::StorageOwnsWrapper);
    assert_exclusive(&bridge, &heap, obj, &storage);

    // Reclaim flips the claim back without an extra reference
    let again = bridge.wrap(&mut heap, storage.clone()).unwrap();
    assert_eq!(again, obj);
    assert_eq!(heap.refcount(obj), Some(1));
    assert_eq!(bridge.ownership(&heap, obj).unwrap(), Ownership::WrapperOwnsStorage);
    assert_exclusive(&bridge, &heap, obj, &storage);

    // Live, not dormant: plain incref
    bridge.wrap(&mut heap, storage.clone()).unwrap();
    assert_eq!(heap.refcount(obj), Some(2));
    heap.decref(obj).unwrap();
    heap.decref(obj).unwrap();
    assert_eq!(bridge.ownership(&heap, obj).unwrap(), Ownership::StorageOwnsWrapper);
    assert_exclusive(&bridge, &heap, obj, &storage);
    assert_eq!(heap.stats().preserved, 2);
}

#[test]
fn test_preserved_wrapper_keeps_its_state() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let storage = Storage::new(8, cpu_allocator()).unwrap();

    let obj = bridge.wrap(&mut heap, storage.clone()).unwrap();
    heap.set_attr(obj, "label", Value::from("weights")).unwrap();
    heap.decref(obj).unwrap();

    let again = bridge.wrap(&mut heap, storage).unwrap();
    assert_eq!(again, obj);
    assert_eq!(
        heap.get_attr(again, "label").unwrap(),
        Some(Value::from("weights"))
    );
}

#[test]
fn test_sole_holder_destroys_wrapper_and_storage() {
    let tracking = TrackingAllocator::cpu();
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();

    let obj = bridge
        .wrap(&mut heap, Storage::new(32, tracking.clone()).unwrap())
        .unwrap();
    assert_eq!(tracking.outstanding(), 1);

    heap.decref(obj).unwrap();
    assert!(!heap.is_alive(obj));
    assert_eq!(tracking.outstanding(), 0);
    assert_eq!(tracking.live_bytes(), 0);
    assert_eq!(heap.stats().destroyed, 1);
    assert_eq!(heap.stats().preserved, 0);
}

#[test]
fn test_dormant_wrapper_released_with_storage() {
    let tracking = TrackingAllocator::cpu();
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let storage = Storage::new(8, tracking.clone()).unwrap();

    let obj = bridge.wrap(&mut heap, storage.clone()).unwrap();
    heap.decref(obj).unwrap();
    assert!(heap.is_alive(obj));

    drop(storage);
    assert_eq!(tracking.frees(), 1);
    assert_eq!(heap.shared().pending_len(), 1);
    assert!(heap.is_alive(obj));

    assert_eq!(heap.drain_pending(), 1);
    assert!(!heap.is_alive(obj));
    assert_eq!(heap.stats().destroyed, 1);
    assert_eq!(heap.stats().deferred_releases, 1);
}

#[test]
fn test_dormant_wrapper_reachable_through_weakref() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let storage = Storage::from_bytes(&[7, 8], cpu_allocator()).unwrap();

    let obj = bridge.wrap(&mut heap, storage.clone()).unwrap();
    let weak = heap.new_weakref(obj, None).unwrap();
    heap.decref(obj).unwrap();

    // Dormant wrapper still resolves its storage through the borrowed handle
    assert_eq!(heap.weakref_target(weak).unwrap(), Some(obj));
    assert_eq!(heap.unpack_storage(obj).unwrap().to_vec(), vec![7, 8]);

    drop(storage);
    heap.drain_pending();
    assert_eq!(heap.weakref_target(weak).unwrap(), None);
}

// =============================================================================
// Typed wrappers
// =============================================================================

#[test]
fn test_preexisting_wrapper_reused_for_supertype() {
    let bridge = StorageBridge::default();
    let special = bridge.subclass("Special").build();
    let mut heap = Heap::new();
    let storage = Storage::new(2, cpu_allocator()).unwrap();

    let obj = bridge
        .new_with_storage(&mut heap, &special, storage.clone(), OriginTag::Uninitialized, false)
        .unwrap();
    let base = bridge.base_type().clone();
    let reused = bridge
        .new_with_storage(&mut heap, &base, storage.clone(), OriginTag::Uninitialized, true)
        .unwrap();
    assert_eq!(reused, obj);
    assert_eq!(heap.type_of(reused).unwrap().name(), "Special");

    // A different concrete type is refused even with reuse allowed
    let default_class = bridge.default_class().clone();
    assert!(matches!(
        bridge.new_with_storage(&mut heap, &default_class, storage, OriginTag::Uninitialized, true),
        Err(StorageError::AlreadyWrapped { .. })
    ));
}

// =============================================================================
// Hermetic mode
// =============================================================================

#[test]
fn test_hermetic_wrappers_are_not_registered() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let storage = Storage::new(4, cpu_allocator()).unwrap();

    let (a, b) = heap.with_hermetic(|h| {
        (
            bridge.wrap(h, storage.clone()).unwrap(),
            bridge.wrap(h, storage.clone()).unwrap(),
        )
    });
    assert_ne!(a, b);
    assert_eq!(heap.type_of(a).unwrap(), *bridge.default_class());
    assert_eq!(
        storage.slot().check_wrapper(heap.shared()).unwrap(),
        SlotLookup::Untagged
    );
    assert_eq!(storage.slot().origin_tag(), OriginTag::Uninitialized);

    // Never preserved, even though `storage` is still held
    heap.decref(a).unwrap();
    heap.decref(b).unwrap();
    assert!(!heap.is_alive(a));
    assert!(!heap.is_alive(b));
    assert_eq!(storage.use_count(), 1);
}

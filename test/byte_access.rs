//! Integration Tests for Construction and Byte Access
//!
//! Tests storages as seen from host code:
//! - Constructor overloads and allocator resolution
//! - Indexed reads and writes
//! - Slice views and aliasing
//! - Device handling

use storage_bridge::host::{Heap, Value};
use storage_bridge::storage::{
    ConstructorArgs, Device, DeviceType, Item, Overload, SliceSpec, StorageBridge, StorageError,
    TrackingAllocator,
};
use storage_bridge::{AllocatorRef, BridgeConfig, ObjectId};

fn bytes(heap: &Heap, obj: ObjectId) -> Vec<u8> {
    heap.unpack_storage(obj).unwrap().to_vec()
}

fn build(bridge: &StorageBridge, heap: &mut Heap, args: ConstructorArgs) -> Result<ObjectId, StorageError> {
    let ty = bridge.default_class().clone();
    bridge.construct(heap, &ty, args)
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn test_construct_from_sequence() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let obj = build(&bridge, &mut heap, ConstructorArgs::from_sequence([10i64, 20, 255, 0])).unwrap();

    assert_eq!(bridge.len(&heap, obj).unwrap(), 4);
    assert_eq!(bytes(&heap, obj), vec![10, 20, 255, 0]);
    assert!(heap.unpack_storage(obj).unwrap().is_resizable());
}

#[test]
fn test_construct_rejects_bad_element_atomically() {
    let tracking = TrackingAllocator::cpu();
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();

    let args = ConstructorArgs {
        overload: Overload::Sequence(vec![Value::Int(10), Value::from("x"), Value::Int(3)]),
        allocator: Some(tracking.clone()),
        device: None,
    };
    assert_eq!(
        build(&bridge, &mut heap, args),
        Err(StorageError::InvalidElementType {
            index: 1,
            actual_type: "string".to_string(),
        })
    );
    assert_eq!(tracking.allocations(), 0);
    assert_eq!(heap.live_objects(), 0);
}

#[test]
fn test_construct_reports_object_element_type() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let other = build(&bridge, &mut heap, ConstructorArgs::sized(1)).unwrap();

    let args = ConstructorArgs::from_sequence([Value::Int(1), Value::Object(other)]);
    assert_eq!(
        build(&bridge, &mut heap, args),
        Err(StorageError::InvalidElementType {
            index: 1,
            actual_type: "UntypedStorage".to_string(),
        })
    );
    assert_eq!(
        build(&bridge, &mut heap, ConstructorArgs::from_sequence([1i64, 300])),
        Err(StorageError::InvalidElementType {
            index: 1,
            actual_type: "int".to_string(),
        })
    );
}

#[test]
fn test_construct_overloads() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();

    let empty = build(&bridge, &mut heap, ConstructorArgs::empty()).unwrap();
    assert_eq!(bridge.len(&heap, empty).unwrap(), 0);

    let sized = build(&bridge, &mut heap, ConstructorArgs::sized(6)).unwrap();
    assert_eq!(bytes(&heap, sized), vec![0; 6]);

    let positional = Overload::from_positional(&[Value::List(vec![Value::Bool(true), Value::Int(2)])]).unwrap();
    let args = ConstructorArgs {
        overload: positional,
        ..ConstructorArgs::default()
    };
    let seq = build(&bridge, &mut heap, args).unwrap();
    assert_eq!(bytes(&heap, seq), vec![1, 2]);
}

#[test]
fn test_allocator_and_device_are_exclusive() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let tracking: AllocatorRef = TrackingAllocator::cpu();

    let args = ConstructorArgs::sized(4)
        .with_allocator(tracking)
        .with_device(Device::CPU);
    assert_eq!(
        build(&bridge, &mut heap, args),
        Err(StorageError::ConflictingAllocatorSpec)
    );
}

#[test]
fn test_explicit_allocator_used() {
    let tracking = TrackingAllocator::cpu();
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();

    let obj = build(
        &bridge,
        &mut heap,
        ConstructorArgs::sized(10).with_allocator(tracking.clone()),
    )
    .unwrap();
    assert_eq!(tracking.live_bytes(), 10);
    heap.decref(obj).unwrap();
    assert_eq!(tracking.live_bytes(), 0);
}

#[test]
fn test_unsupported_device() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let cuda = Device::new(DeviceType::Cuda, Some(1));

    assert_eq!(
        build(&bridge, &mut heap, ConstructorArgs::sized(4).with_device(cuda)),
        Err(StorageError::UnsupportedDevice { device: cuda })
    );

    // Registering a backend makes the device resolvable
    let backend = TrackingAllocator::cpu();
    bridge.devices().register(DeviceType::Cuda, backend.clone());
    let obj = build(&bridge, &mut heap, ConstructorArgs::sized(4).with_device(cuda)).unwrap();
    assert_eq!(bridge.device(&heap, obj).unwrap(), cuda);
    assert_eq!(backend.allocations(), 1);
}

#[test]
fn test_configured_default_device() {
    let config = BridgeConfig::from_toml_str("[allocation]\ndefault_device = \"meta\"\n").unwrap();
    let bridge = StorageBridge::new(&config);
    let mut heap = Heap::new();

    let obj = build(&bridge, &mut heap, ConstructorArgs::sized(3)).unwrap();
    assert_eq!(bridge.device(&heap, obj).unwrap(), Device::META);
}

// =============================================================================
// Indexing
// =============================================================================

#[test]
fn test_get_with_negative_index() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let obj = build(&bridge, &mut heap, ConstructorArgs::from_sequence([1i64, 2, 3, 4, 5])).unwrap();

    assert_eq!(bridge.get(&mut heap, obj, -1i64).unwrap(), Item::Byte(5));
    assert_eq!(bridge.get(&mut heap, obj, 0i64).unwrap().to_value(), Value::Int(1));
    assert_eq!(
        bridge.get(&mut heap, obj, 5i64),
        Err(StorageError::IndexOutOfRange { index: 5, length: 5 })
    );
    assert_eq!(
        bridge.get(&mut heap, obj, -6i64),
        Err(StorageError::IndexOutOfRange { index: -6, length: 5 })
    );
}

#[test]
fn test_set_slice_fills_range() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let obj = build(&bridge, &mut heap, ConstructorArgs::from_sequence([1i64, 2, 3, 4, 5])).unwrap();

    bridge
        .set(&mut heap, obj, SliceSpec::new(1, 3), &Value::Int(9))
        .unwrap();
    assert_eq!(bytes(&heap, obj), vec![1, 9, 9, 4, 5]);

    bridge.set(&mut heap, obj, -1i64, &Value::Bool(false)).unwrap();
    assert_eq!(bytes(&heap, obj), vec![1, 9, 9, 4, 0]);

    bridge.set(&mut heap, obj, SliceSpec::full(), &Value::Int(7)).unwrap();
    assert_eq!(bytes(&heap, obj), vec![7; 5]);
}

#[test]
fn test_set_rejects_bad_values() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let obj = build(&bridge, &mut heap, ConstructorArgs::sized(2)).unwrap();

    assert_eq!(
        bridge.set(&mut heap, obj, 0i64, &Value::Int(256)),
        Err(StorageError::ByteOutOfRange { value: 256 })
    );
    assert_eq!(
        bridge.set(&mut heap, obj, 0i64, &Value::Float(1.5)),
        Err(StorageError::InvalidValueType {
            actual_type: "float".to_string()
        })
    );
    assert_eq!(
        bridge.set(&mut heap, obj, 2i64, &Value::Int(1)),
        Err(StorageError::IndexOutOfRange { index: 2, length: 2 })
    );
    // A bad value is reported before a bad index
    assert_eq!(
        bridge.set(&mut heap, obj, 2i64, &Value::Str("x".into())),
        Err(StorageError::InvalidValueType {
            actual_type: "string".to_string()
        })
    );
    assert_eq!(
        bridge.set(&mut heap, obj, SliceSpec::full().with_step(2), &Value::Int(300)),
        Err(StorageError::ByteOutOfRange { value: 300 })
    );
    assert_eq!(bytes(&heap, obj), vec![0, 0]);
}

#[test]
fn test_step_other_than_one_rejected() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let obj = build(&bridge, &mut heap, ConstructorArgs::sized(4)).unwrap();

    assert_eq!(
        bridge.get(&mut heap, obj, SliceSpec::full().with_step(2)),
        Err(StorageError::UnsupportedStep { step: 2 })
    );
    assert_eq!(
        bridge.set(&mut heap, obj, SliceSpec::full().with_step(-1), &Value::Int(1)),
        Err(StorageError::UnsupportedStep { step: -1 })
    );
}

// =============================================================================
// Slices
// =============================================================================

#[test]
fn test_slice_aliases_parent() {
    let tracking = TrackingAllocator::cpu();
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let parent = build(
        &bridge,
        &mut heap,
        ConstructorArgs::from_sequence([0i64, 1, 2, 3, 4, 5]).with_allocator(tracking.clone()),
    )
    .unwrap();

    let view = bridge
        .get(&mut heap, parent, SliceSpec::new(2, 5))
        .unwrap()
        .as_view()
        .unwrap();
    assert_eq!(bytes(&heap, view), vec![2, 3, 4]);
    assert_eq!(heap.unpack_storage(parent).unwrap().use_count(), 3);

    bridge.set(&mut heap, parent, 3i64, &Value::Int(42)).unwrap();
    assert_eq!(bridge.get(&mut heap, view, 1i64).unwrap(), Item::Byte(42));

    bridge.set(&mut heap, view, 0i64, &Value::Int(99)).unwrap();
    assert_eq!(bridge.get(&mut heap, parent, 2i64).unwrap(), Item::Byte(99));

    // Destroying the view gives back exactly its parent reference
    let parent_storage = heap.unpack_storage(parent).unwrap();
    assert_eq!(parent_storage.use_count(), 3);
    heap.decref(view).unwrap();
    assert_eq!(parent_storage.use_count(), 2);
    drop(parent_storage);

    heap.decref(parent).unwrap();
    assert_eq!(tracking.frees(), 1);
}

#[test]
fn test_slice_outlives_parent_wrapper() {
    let tracking = TrackingAllocator::cpu();
    let bridge = StorageBridge::default();
    let special = bridge.subclass("Special").build();
    let mut heap = Heap::new();
    let parent = bridge
        .construct(
            &mut heap,
            &special,
            ConstructorArgs::from_sequence([5i64, 6, 7]).with_allocator(tracking.clone()),
        )
        .unwrap();

    let view = bridge.slice(&mut heap, parent, 1, 3).unwrap();
    assert_eq!(heap.type_of(view).unwrap(), special);

    heap.decref(parent).unwrap();
    assert_eq!(tracking.frees(), 0);
    assert_eq!(bytes(&heap, view), vec![6, 7]);

    heap.decref(view).unwrap();
    heap.drain_pending();
    assert_eq!(tracking.frees(), 1);
    assert_eq!(heap.live_objects(), 0);
}

// =============================================================================
// Devices
// =============================================================================

#[test]
fn test_meta_storage_has_no_bytes() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let obj = build(&bridge, &mut heap, ConstructorArgs::sized(8).with_device(Device::META)).unwrap();

    assert_eq!(bridge.len(&heap, obj).unwrap(), 8);
    assert_eq!(bridge.device(&heap, obj).unwrap().to_string(), "meta");
    assert_eq!(
        bridge.get(&mut heap, obj, 0i64),
        Err(StorageError::NoData { device: Device::META })
    );
    assert_eq!(
        bridge.set(&mut heap, obj, 0i64, &Value::Int(1)),
        Err(StorageError::NoData { device: Device::META })
    );

    // Views of meta storages are still metadata-only
    let view = bridge.slice(&mut heap, obj, 2, 6).unwrap();
    assert_eq!(bridge.len(&heap, view).unwrap(), 4);
    assert_eq!(bridge.device(&heap, view).unwrap(), Device::META);
}

#[test]
fn test_non_storage_object_rejected() {
    let bridge = StorageBridge::default();
    let mut heap = Heap::new();
    let plain = storage_bridge::HostType::builder("Plain").build();
    let obj = heap.alloc(&plain);

    assert_eq!(bridge.len(&heap, obj), Err(StorageError::NullResource));
    assert_eq!(
        bridge.get(&mut heap, obj, 0i64),
        Err(StorageError::NullResource)
    );
}

//! storage-bridge - Ownership Arbitration for Refcounted Byte Storages
//!
//! Connects an intrusively reference-counted native byte buffer ([`Storage`])
//! to wrapper objects living in a managed host runtime ([`Heap`]). The two
//! sides keep independent reference counts; the bridge decides at every
//! hand-off which side holds the strong claim.
//!
//! # Features
//!
//! - **Singleton wrappers**: a storage surfaces through at most one live wrapper
//! - **Preservation**: a wrapper whose host count reaches zero while native
//!   holders remain goes dormant instead of dying, and keeps its identity
//! - **Checkpointed teardown**: finalizers and legacy destructors may resurrect
//!   the wrapper; teardown stops and restarts on the next attempt
//! - **Zero-copy slices**: views alias their parent and keep it alive
//! - **Cross-thread holders**: storages are cloned and dropped from any thread;
//!   dormant wrappers released off-thread are queued back to their heap
//!
//! # Example
//!
//! ```rust
//! use storage_bridge::{ConstructorArgs, Heap, SliceSpec, StorageBridge};
//!
//! let bridge = StorageBridge::default();
//! let mut heap = Heap::new();
//! let ty = bridge.default_class().clone();
//!
//! let obj = bridge
//!     .construct(&mut heap, &ty, ConstructorArgs::from_sequence([1i64, 2, 3, 4, 5]))
//!     .unwrap();
//! assert_eq!(bridge.get(&mut heap, obj, -1i64).unwrap().as_byte(), Some(5));
//!
//! bridge
//!     .set(&mut heap, obj, SliceSpec::new(1, 3), &9i64.into())
//!     .unwrap();
//! assert_eq!(heap.unpack_storage(obj).unwrap().to_vec(), vec![1, 9, 9, 4, 5]);
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────┐
//! │ host::Heap           │        │ storage::Storage     │
//! │  wrapper object      │ Owned  │  StorageImpl         │
//! │  refcnt, weakrefs,   │───────▶│   WrapperSlot ───┐   │
//! │  slots, dict         │◀─ ─ ─ ─│   DataPtr        │   │
//! └──────────┬───────────┘Borrowed└──────────────────┼───┘
//!            │                                       │
//!            │ drain_pending()    release queue      │
//!            └──────────────◀────────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod host;
pub mod storage;

// Re-export commonly used types
pub use config::{BridgeConfig, ConfigError, ConfigResult};
pub use host::{
    DeallocOutcome, Finalization, Heap, HeapStats, HostError, HostResult, HostType, ObjectId,
    TypeBuilder, Value, WeakRefId,
};
pub use storage::{
    cpu_allocator, Allocator, AllocatorRef, ConstructorArgs, Device, DeviceRegistry, DeviceType,
    Index, Item, OriginTag, Overload, Ownership, SliceSpec, Storage, StorageBridge, StorageError,
    StorageResult, TrackingAllocator, WeakStorage,
};

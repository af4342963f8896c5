//! Storage bridge
//!
//! Connects natively refcounted byte storages to host wrapper objects.
//!
//! # Ownership hand-off
//!
//! ```text
//!            wrap() / reclaim                     preservation
//!   ┌─────────────────────────────┐      ┌─────────────────────────────┐
//!   │ wrapper ──Owned──▶ storage  │ ◀──▶ │ storage ──slot──▶ wrapper   │
//!   │ slot: wrapper, !owns        │      │ handle: Borrowed, owns      │
//!   └─────────────────────────────┘      └─────────────────────────────┘
//! ```
//!
//! A wrapper whose host count drops to zero while other native holders
//! remain is preserved: the storage takes the strong claim and the wrapper
//! goes dormant. The next `wrap()` of the storage flips the claim back and
//! returns the same object. When the storage itself dies first, the dormant
//! wrapper's last host reference is queued on its heap and dropped at the
//! next [`Heap::drain_pending`](crate::host::Heap::drain_pending).

pub mod access;
pub mod allocator;
pub mod bridge;
pub mod construct;
pub mod device;
pub mod handle;
mod preserve;
pub mod resource;
mod slice;
pub mod slot;
pub mod teardown;
mod wrap;

pub use access::{decode_byte, encode_byte, normalize_index, ByteConversion, Index, Item, SliceSpec};
pub use allocator::{
    cpu_allocator, same_allocator, AllocError, Allocator, AllocatorRef, CpuAllocator,
    MetaAllocator, TrackingAllocator,
};
pub use bridge::StorageBridge;
pub use construct::{ConstructorArgs, Overload};
pub use device::{Device, DeviceRegistry, DeviceType};
pub use handle::{Ownership, StorageHandle};
pub use resource::{DataPtr, Storage, StorageImpl, WeakStorage};
pub use slot::{OriginTag, SlotLookup, WrapperSlot};
pub use teardown::subclass_dealloc;

use thiserror::Error;

use crate::host::HostError;

/// Errors raised by storage bridge operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error(
        "creating a new '{requested}' but the storage is already associated \
         with a wrapper of type '{existing}'"
    )]
    AlreadyWrapped { requested: String, existing: String },

    #[error("index {index} out of range for storage of size {length}")]
    IndexOutOfRange { index: i64, length: usize },

    #[error("trying to slice with a step of {step}, but only a step of 1 is supported")]
    UnsupportedStep { step: i64 },

    #[error(
        "tried to construct a storage from a sequence, but item {index} \
         was of type {actual_type} instead of int"
    )]
    InvalidElementType { index: usize, actual_type: String },

    #[error("only one or neither of 'allocator' or 'device' can be given, but not both")]
    ConflictingAllocatorSpec,

    #[error("storage device not recognized: {device}")]
    UnsupportedDevice { device: Device },

    #[error("got a null storage")]
    NullResource,

    #[error("invalid byte range [{start}, {stop}) for storage of size {length}")]
    InvalidRange {
        start: usize,
        stop: usize,
        length: usize,
    },

    #[error("can only set storage content with int values, but got {actual_type}")]
    InvalidValueType { actual_type: String },

    #[error("value {value} does not fit in a byte")]
    ByteOutOfRange { value: i64 },

    #[error("storage on device {device} has no data")]
    NoData { device: Device },

    #[error("negative storage size {size}")]
    NegativeSize { size: i64 },

    #[error("cannot directly construct {name}; subclass it and then construct that")]
    AbstractBaseType { name: String },

    #[error("type '{name}' does not inherit from the storage base type")]
    NotAStorageType { name: String },

    #[error("storage is tagged by heap {owner} and cannot be used from heap {requester}")]
    ForeignHost { owner: u64, requester: u64 },

    #[error("invalid constructor arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Host(#[from] HostError),
}

/// Result type for storage bridge operations.
pub type StorageResult<T> = Result<T, StorageError>;

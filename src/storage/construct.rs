//! Storage construction from host arguments
//!
//! Three argument shapes are accepted: nothing (an empty storage), a size,
//! or a sequence of byte values. Placement is chosen by an explicit
//! allocator or a device, never both.

use std::fmt;
use std::sync::Arc;

use crate::host::{Heap, HostType, ObjectId, Value};

use super::access::decode_byte;
use super::allocator::AllocatorRef;
use super::bridge::StorageBridge;
use super::device::Device;
use super::resource::Storage;
use super::slot::OriginTag;
use super::{StorageError, StorageResult};

/// Positional constructor arguments, resolved by shape
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Overload {
    #[default]
    Empty,
    Size(i64),
    Sequence(Vec<Value>),
}

impl Overload {
    /// Resolve positional arguments: none, one int, or one list
    pub fn from_positional(args: &[Value]) -> StorageResult<Self> {
        match args {
            [] => Ok(Overload::Empty),
            [Value::Int(size)] => Ok(Overload::Size(*size)),
            [Value::List(items)] => Ok(Overload::Sequence(items.clone())),
            [other] => Err(StorageError::InvalidArguments(format!(
                "expected a size or a sequence, got {}",
                other.kind_name()
            ))),
            _ => Err(StorageError::InvalidArguments(format!(
                "expected at most 1 positional argument, got {}",
                args.len()
            ))),
        }
    }
}

#[derive(Clone, Default)]
pub struct ConstructorArgs {
    pub overload: Overload,
    pub allocator: Option<AllocatorRef>,
    pub device: Option<Device>,
}

impl ConstructorArgs {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn sized(size: i64) -> Self {
        Self {
            overload: Overload::Size(size),
            ..Self::default()
        }
    }

    pub fn from_sequence<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            overload: Overload::Sequence(items.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_allocator(mut self, allocator: AllocatorRef) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }
}

impl fmt::Debug for ConstructorArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructorArgs")
            .field("overload", &self.overload)
            .field("allocator", &self.allocator.as_ref().map(|a| a.name()))
            .field("device", &self.device)
            .finish()
    }
}

impl StorageBridge {
    /// Construct a new storage and its wrapper of type `ty`.
    ///
    /// Sequence elements are all decoded before anything is allocated, so a
    /// bad element leaves nothing behind.
    pub fn construct(
        &self,
        heap: &mut Heap,
        ty: &HostType,
        args: ConstructorArgs,
    ) -> StorageResult<ObjectId> {
        if ty.ptr_eq(self.base_type()) {
            return Err(StorageError::AbstractBaseType {
                name: ty.name().to_string(),
            });
        }
        self.check_storage_type(ty)?;

        let (allocator, device) = self.resolve_allocator(args.allocator.as_ref(), args.device)?;
        let storage = match &args.overload {
            Overload::Empty => Storage::allocate(0, allocator, device, true)?,
            Overload::Size(size) => {
                let nbytes = usize::try_from(*size)
                    .map_err(|_| StorageError::NegativeSize { size: *size })?;
                Storage::allocate(nbytes, allocator, device, true)?
            }
            Overload::Sequence(items) => {
                let bytes = decode_sequence(heap, items)?;
                let storage = Storage::allocate(bytes.len(), allocator, device, true)?;
                storage.copy_from(&bytes);
                storage
            }
        };
        log::trace!("constructed {} byte storage on {}", storage.nbytes(), device);

        self.new_with_storage(heap, ty, storage, OriginTag::Uninitialized, false)
    }

    /// Pick the allocator and device for a new storage
    pub fn resolve_allocator(
        &self,
        allocator: Option<&AllocatorRef>,
        device: Option<Device>,
    ) -> StorageResult<(AllocatorRef, Device)> {
        match (allocator, device) {
            (Some(_), Some(_)) => Err(StorageError::ConflictingAllocatorSpec),
            (Some(allocator), None) => Ok((Arc::clone(allocator), allocator.device())),
            (None, Some(device)) => Ok((self.devices().resolve(device)?, device)),
            (None, None) => {
                let device = self.default_device();
                Ok((self.devices().resolve(device)?, device))
            }
        }
    }
}

fn decode_sequence(heap: &Heap, items: &[Value]) -> StorageResult<Vec<u8>> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            // Out-of-range ints are reported like any other unconvertible element
            decode_byte(item).map_err(|_| StorageError::InvalidElementType {
                index,
                actual_type: heap.describe(item),
            })
        })
        .collect()
}

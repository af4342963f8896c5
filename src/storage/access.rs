//! Byte-level access to wrapped storages
//!
//! Integer indices address single bytes and accept negative values counted
//! from the end. Slice indices produce zero-copy views on read and fill a
//! range on write; only a step of 1 is supported.

use crate::host::{Heap, ObjectId, Value};

use super::bridge::StorageBridge;
use super::device::Device;
use super::resource::Storage;
use super::{StorageError, StorageResult};

/// A slice index with optional bounds, like a host `start:stop:step`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceSpec {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl SliceSpec {
    pub fn new(start: i64, stop: i64) -> Self {
        Self {
            start: Some(start),
            stop: Some(stop),
            step: None,
        }
    }

    /// The whole storage (`[:]`)
    pub fn full() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    /// Resolve to a clamped `[start, stop)` byte range for `len` bytes
    pub fn indices(&self, len: usize) -> StorageResult<(usize, usize)> {
        let step = self.step.unwrap_or(1);
        if step != 1 {
            return Err(StorageError::UnsupportedStep { step });
        }
        let n = len as i64;
        let clamp = |v: i64| -> usize {
            if v < 0 {
                (v + n).max(0) as usize
            } else {
                v.min(n) as usize
            }
        };
        let start = self.start.map(clamp).unwrap_or(0);
        let stop = self.stop.map(clamp).unwrap_or(len);
        Ok((start, stop.max(start)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    Int(i64),
    Slice(SliceSpec),
}

impl From<i64> for Index {
    fn from(i: i64) -> Self {
        Index::Int(i)
    }
}

impl From<SliceSpec> for Index {
    fn from(s: SliceSpec) -> Self {
        Index::Slice(s)
    }
}

/// Result of a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Item {
    Byte(u8),
    /// New wrapper over a view of the storage
    View(ObjectId),
}

impl Item {
    pub fn as_byte(&self) -> Option<u8> {
        match self {
            Item::Byte(b) => Some(*b),
            Item::View(_) => None,
        }
    }

    pub fn as_view(&self) -> Option<ObjectId> {
        match self {
            Item::View(id) => Some(*id),
            Item::Byte(_) => None,
        }
    }

    /// Host value for the item
    pub fn to_value(&self) -> Value {
        match self {
            Item::Byte(b) => encode_byte(*b),
            Item::View(id) => Value::Object(*id),
        }
    }
}

/// Why a host value is not a byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteConversion {
    WrongType,
    OutOfRange(i64),
}

/// Convert a host value to a byte; accepts ints in `0..=255` and bools
pub fn decode_byte(value: &Value) -> Result<u8, ByteConversion> {
    match value {
        Value::Bool(b) => Ok(u8::from(*b)),
        Value::Int(v) => u8::try_from(*v).map_err(|_| ByteConversion::OutOfRange(*v)),
        _ => Err(ByteConversion::WrongType),
    }
}

pub fn encode_byte(byte: u8) -> Value {
    Value::Int(i64::from(byte))
}

fn require_data(storage: &Storage) -> StorageResult<()> {
    if storage.has_data() {
        Ok(())
    } else {
        Err(StorageError::NoData {
            device: storage.device(),
        })
    }
}

impl StorageBridge {
    /// Read a byte, or wrap a view for a slice index
    pub fn get(&self, heap: &mut Heap, obj: ObjectId, index: impl Into<Index>) -> StorageResult<Item> {
        let storage = heap.unpack_storage(obj)?;
        match index.into() {
            Index::Int(i) => {
                let at = normalize_index(i, storage.nbytes())?;
                require_data(&storage)?;
                storage
                    .read(at)
                    .map(Item::Byte)
                    .ok_or(StorageError::IndexOutOfRange {
                        index: i,
                        length: storage.nbytes(),
                    })
            }
            Index::Slice(spec) => {
                let (start, stop) = spec.indices(storage.nbytes())?;
                drop(storage);
                self.slice(heap, obj, start, stop).map(Item::View)
            }
        }
    }

    /// Write a byte, or fill every byte of a slice
    pub fn set(
        &self,
        heap: &mut Heap,
        obj: ObjectId,
        index: impl Into<Index>,
        value: &Value,
    ) -> StorageResult<()> {
        let storage = heap.unpack_storage(obj)?;
        let byte = decode_byte(value).map_err(|e| match e {
            ByteConversion::WrongType => StorageError::InvalidValueType {
                actual_type: heap.describe(value),
            },
            ByteConversion::OutOfRange(value) => StorageError::ByteOutOfRange { value },
        })?;
        let range = match index.into() {
            Index::Int(i) => {
                let at = normalize_index(i, storage.nbytes())?;
                at..at + 1
            }
            Index::Slice(spec) => {
                let (start, stop) = spec.indices(storage.nbytes())?;
                start..stop
            }
        };
        require_data(&storage)?;
        storage.fill(range, byte);
        Ok(())
    }

    /// Size in bytes
    pub fn len(&self, heap: &Heap, obj: ObjectId) -> StorageResult<usize> {
        Ok(heap.unpack_storage(obj)?.nbytes())
    }

    pub fn device(&self, heap: &Heap, obj: ObjectId) -> StorageResult<Device> {
        Ok(heap.unpack_storage(obj)?.device())
    }

    /// Opaque identity of the underlying storage, for diagnostics only
    pub fn cdata(&self, heap: &Heap, obj: ObjectId) -> StorageResult<usize> {
        Ok(heap.unpack_storage(obj)?.identity())
    }
}

/// Map a possibly negative index onto `0..len`
pub fn normalize_index(index: i64, len: usize) -> StorageResult<usize> {
    let n = len as i64;
    let at = if index < 0 { index + n } else { index };
    if at < 0 || at >= n {
        return Err(StorageError::IndexOutOfRange { index, length: len });
    }
    Ok(at as usize)
}

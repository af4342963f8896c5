//! The storage bridge
//!
//! Holds the process-wide pieces resolved once at startup: the abstract base
//! wrapper type, the default concrete class and the device registry. Every
//! protocol entry point is a method on [`StorageBridge`].

use std::fmt;

use crate::config::BridgeConfig;
use crate::host::{Heap, HostType, ObjectId, TypeBuilder};

use super::device::{Device, DeviceRegistry};
use super::handle::{Ownership, StorageHandle};
use super::teardown::subclass_dealloc;
use super::{StorageError, StorageResult};

pub struct StorageBridge {
    base: HostType,
    default_class: HostType,
    devices: DeviceRegistry,
    default_device: Device,
}

impl StorageBridge {
    /// Create a bridge with the built-in device backends
    pub fn new(config: &BridgeConfig) -> Self {
        Self::with_devices(config, DeviceRegistry::with_defaults())
    }

    pub fn with_devices(config: &BridgeConfig, devices: DeviceRegistry) -> Self {
        let base = HostType::builder(config.types.base_name.as_str())
            .dealloc(subclass_dealloc)
            .build();
        let default_class = HostType::builder(config.types.default_class.as_str())
            .base(&base)
            .gc(config.types.gc)
            .dict(config.types.dict)
            .weakrefs(config.types.weakrefs)
            .dealloc(subclass_dealloc)
            .build();
        Self {
            base,
            default_class,
            devices,
            default_device: config.allocation.default_device,
        }
    }

    /// The abstract base all wrapper types derive from
    pub fn base_type(&self) -> &HostType {
        &self.base
    }

    /// Concrete class used by `wrap()`
    pub fn default_class(&self) -> &HostType {
        &self.default_class
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn default_device(&self) -> Device {
        self.default_device
    }

    /// Start a wrapper subclass of the base type with teardown installed
    pub fn subclass(&self, name: impl Into<String>) -> TypeBuilder {
        TypeBuilder::new(name).base(&self.base).dealloc(subclass_dealloc)
    }

    /// Start a subclass of an existing wrapper type
    pub fn subclass_of(&self, parent: &HostType, name: impl Into<String>) -> StorageResult<TypeBuilder> {
        self.check_storage_type(parent)?;
        Ok(TypeBuilder::new(name).base(parent).dealloc(subclass_dealloc))
    }

    pub(crate) fn check_storage_type(&self, ty: &HostType) -> StorageResult<()> {
        if ty.is_subtype(&self.base) {
            Ok(())
        } else {
            Err(StorageError::NotAStorageType {
                name: ty.name().to_string(),
            })
        }
    }

    /// Report which side holds the strong claim for wrapper `obj`
    pub fn ownership(&self, heap: &Heap, obj: ObjectId) -> StorageResult<Ownership> {
        match heap.storage_handle(obj)? {
            StorageHandle::Owned(storage) => {
                debug_assert!(!storage.slot().owns_wrapper());
                Ok(Ownership::WrapperOwnsStorage)
            }
            StorageHandle::Borrowed(weak) => {
                let storage = weak.upgrade().ok_or(StorageError::NullResource)?;
                debug_assert!(storage.slot().owns_wrapper());
                Ok(Ownership::StorageOwnsWrapper)
            }
        }
    }
}

impl Default for StorageBridge {
    fn default() -> Self {
        Self::new(&BridgeConfig::default())
    }
}

impl fmt::Debug for StorageBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageBridge")
            .field("base", &self.base.name())
            .field("default_class", &self.default_class.name())
            .field("devices", &self.devices)
            .field("default_device", &self.default_device)
            .finish()
    }
}

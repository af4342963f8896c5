//! Devices and the device → allocator registry

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::allocator::{cpu_allocator, AllocatorRef, MetaAllocator};
use super::{StorageError, StorageResult};

/// Kind of backend a storage's bytes live on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Cpu,
    Cuda,
    Mps,
    Xpu,
    /// Shape-only device; storages on it carry no bytes
    Meta,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Cpu => "cpu",
            DeviceType::Cuda => "cuda",
            DeviceType::Mps => "mps",
            DeviceType::Xpu => "xpu",
            DeviceType::Meta => "meta",
        }
    }

    /// Whether storages on this device have addressable bytes
    pub fn has_data(&self) -> bool {
        !matches!(self, DeviceType::Meta)
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(DeviceType::Cpu),
            "cuda" => Ok(DeviceType::Cuda),
            "mps" => Ok(DeviceType::Mps),
            "xpu" => Ok(DeviceType::Xpu),
            "meta" => Ok(DeviceType::Meta),
            _ => Err(format!("unknown device type '{}'", s)),
        }
    }
}

/// A device, optionally with an index (`cuda:1`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Device {
    pub kind: DeviceType,
    pub index: Option<u16>,
}

impl Device {
    pub const CPU: Device = Device {
        kind: DeviceType::Cpu,
        index: None,
    };

    pub const META: Device = Device {
        kind: DeviceType::Meta,
        index: None,
    };

    pub fn new(kind: DeviceType, index: Option<u16>) -> Self {
        Self { kind, index }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}:{}", self.kind.as_str(), i),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, index) = match s.split_once(':') {
            Some((kind, index)) => {
                let index = index
                    .parse::<u16>()
                    .map_err(|_| format!("invalid device index in '{}'", s))?;
                (kind, Some(index))
            }
            None => (s, None),
        };
        let kind = kind.trim().parse::<DeviceType>()?;
        Ok(Device { kind, index })
    }
}

impl TryFrom<String> for Device {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Device> for String {
    fn from(d: Device) -> Self {
        d.to_string()
    }
}

/// Pluggable device → allocator lookup.
///
/// Backends register their default allocator per device type. CPU and meta
/// are available out of the box; accelerator types resolve only once a
/// backend registers them.
pub struct DeviceRegistry {
    allocators: RwLock<HashMap<DeviceType, AllocatorRef>>,
}

impl DeviceRegistry {
    /// Registry with no backends
    pub fn empty() -> Self {
        Self {
            allocators: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the CPU and meta backends
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        registry.register(DeviceType::Cpu, cpu_allocator());
        registry.register(DeviceType::Meta, Arc::new(MetaAllocator));
        registry
    }

    /// Install the default allocator for a device type, returning the previous one
    pub fn register(&self, kind: DeviceType, allocator: AllocatorRef) -> Option<AllocatorRef> {
        self.allocators.write().insert(kind, allocator)
    }

    pub fn unregister(&self, kind: DeviceType) -> Option<AllocatorRef> {
        self.allocators.write().remove(&kind)
    }

    /// Resolve the default allocator for `device`
    pub fn resolve(&self, device: Device) -> StorageResult<AllocatorRef> {
        self.allocators
            .read()
            .get(&device.kind)
            .cloned()
            .ok_or(StorageError::UnsupportedDevice { device })
    }

    pub fn is_registered(&self, kind: DeviceType) -> bool {
        self.allocators.read().contains_key(&kind)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&'static str> =
            self.allocators.read().keys().map(DeviceType::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("DeviceRegistry").field("devices", &kinds).finish()
    }
}

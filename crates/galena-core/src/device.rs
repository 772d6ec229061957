//! Device kinds and the device descriptor registry.
//!
//! Device kinds are a closed tagged variant rather than an open trait
//! hierarchy: the runtime knows exactly which memory spaces exist and
//! carries a capability entry (allocator capacity, instruction-set
//! attributes) per kind. The registry is an explicit handle passed into
//! compile, artifact load, and VM construction — never an implicit global.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// A category of compute/memory resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceKind {
    /// The host CPU and its memory.
    Host,
    /// The vector-extension accelerator, presented as a separate memory
    /// space with its own allocator and instruction stream.
    Accel,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Host => write!(f, "host"),
            DeviceKind::Accel => write!(f, "accel"),
        }
    }
}

/// Identity of a concrete device: (kind, index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    pub kind: DeviceKind,
    pub index: usize,
}

impl DeviceId {
    pub fn new(kind: DeviceKind, index: usize) -> Self {
        Self { kind, index }
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.index)
    }
}

/// Opaque handle returned by [`DeviceRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceKindId(usize);

impl DeviceKindId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Capability entry for a registered device kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCaps {
    /// Bytes of device memory the allocator may hand out.
    pub memory_bytes: u64,

    /// Instruction-set attributes (e.g. vector length), free-form.
    pub attrs: BTreeMap<String, String>,
}

impl DeviceCaps {
    pub fn new(memory_bytes: u64) -> Self {
        Self {
            memory_bytes,
            attrs: BTreeMap::new(),
        }
    }

    /// Set an instruction-set attribute, chaining.
    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attrs.insert(key.to_string(), value.to_string());
        self
    }
}

/// Registry of device kinds available to the current process.
///
/// Append-only: kinds are registered at startup and resolved by the
/// compiler (parameter placement checks) and the VM (descriptor
/// construction). Cloning shares the underlying table.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    entries: Arc<RwLock<Vec<(DeviceKind, DeviceCaps)>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device kind with its capabilities.
    ///
    /// Registering the same kind twice is idempotent when the capabilities
    /// match; a conflicting re-registration fails with
    /// [`Error::DeviceKindConflict`].
    pub fn register(&self, kind: DeviceKind, caps: DeviceCaps) -> Result<DeviceKindId> {
        let mut entries = self.entries.write().expect("device registry poisoned");

        if let Some(pos) = entries.iter().position(|(k, _)| *k == kind) {
            if entries[pos].1 == caps {
                return Ok(DeviceKindId(pos));
            }
            return Err(Error::DeviceKindConflict(kind));
        }

        entries.push((kind, caps));
        Ok(DeviceKindId(entries.len() - 1))
    }

    /// Resolve a kind to its capability entry.
    pub fn resolve(&self, kind: DeviceKind) -> Result<DeviceCaps> {
        let entries = self.entries.read().expect("device registry poisoned");
        entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, caps)| caps.clone())
            .ok_or(Error::UnknownDeviceKind(kind))
    }

    /// Check whether a kind has been registered.
    pub fn contains(&self, kind: DeviceKind) -> bool {
        let entries = self.entries.read().expect("device registry poisoned");
        entries.iter().any(|(k, _)| *k == kind)
    }

    /// All registered kinds, in registration order.
    pub fn kinds(&self) -> Vec<DeviceKind> {
        let entries = self.entries.read().expect("device registry poisoned");
        entries.iter().map(|(k, _)| *k).collect()
    }
}

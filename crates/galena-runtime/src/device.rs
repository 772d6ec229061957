//! Runtime device descriptors.

use crate::error::{Result, RuntimeError};
use crate::pool::MemoryPool;
use crate::stream::DeviceStream;
use galena_core::{DeviceCaps, DeviceId, DeviceKind, DeviceRegistry};
use std::sync::Arc;

/// A live device: identity, allocator, and instruction stream.
///
/// Descriptors are constructed when a VM becomes ready and torn down with
/// it. The VM guarantees at most one descriptor per (kind, index) pair.
#[derive(Debug)]
pub struct DeviceDescriptor {
    id: DeviceId,
    caps: DeviceCaps,
    pool: MemoryPool,
    stream: DeviceStream,
}

impl DeviceDescriptor {
    /// Instantiate a device of a registered kind.
    ///
    /// Fails with [`RuntimeError::DeviceUnavailable`] when the kind has not
    /// been registered on this host.
    pub fn create(
        registry: &DeviceRegistry,
        kind: DeviceKind,
        index: usize,
    ) -> Result<Arc<Self>> {
        let caps = registry
            .resolve(kind)
            .map_err(|_| RuntimeError::DeviceUnavailable(kind))?;
        let pool = MemoryPool::new(kind, caps.memory_bytes);

        Ok(Arc::new(Self {
            id: DeviceId::new(kind, index),
            caps,
            pool,
            stream: DeviceStream::new(),
        }))
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn kind(&self) -> DeviceKind {
        self.id.kind
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    pub fn pool(&self) -> &MemoryPool {
        &self.pool
    }

    pub fn stream(&self) -> &DeviceStream {
        &self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_registered_kind() {
        let registry = DeviceRegistry::new();
        registry
            .register(DeviceKind::Host, DeviceCaps::new(4096))
            .unwrap();

        let device = DeviceDescriptor::create(&registry, DeviceKind::Host, 0).unwrap();
        assert_eq!(device.id(), DeviceId::new(DeviceKind::Host, 0));
        assert_eq!(device.pool().capacity(), 4096);
    }

    #[test]
    fn test_unregistered_kind_unavailable() {
        let registry = DeviceRegistry::new();
        match DeviceDescriptor::create(&registry, DeviceKind::Accel, 0) {
            Err(RuntimeError::DeviceUnavailable(DeviceKind::Accel)) => {}
            other => panic!("expected DeviceUnavailable, got {:?}", other),
        }
    }
}

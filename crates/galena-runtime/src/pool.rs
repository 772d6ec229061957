//! Per-device memory pools.
//!
//! Each device descriptor owns one pool. Allocation is capacity-checked
//! against the capability entry the device kind was registered with, and
//! serialized through a mutex so concurrent invocations can allocate
//! safely. Freed allocations return their bytes to the pool on drop.

use crate::error::{Result, RuntimeError};
use galena_core::DeviceKind;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct PoolState {
    kind: DeviceKind,
    capacity: u64,
    used: Mutex<u64>,
}

/// Memory pool for one device.
#[derive(Debug, Clone)]
pub struct MemoryPool {
    state: Arc<PoolState>,
}

impl MemoryPool {
    pub fn new(kind: DeviceKind, capacity: u64) -> Self {
        Self {
            state: Arc::new(PoolState {
                kind,
                capacity,
                used: Mutex::new(0),
            }),
        }
    }

    /// Allocate a zeroed region of `size` bytes.
    pub fn allocate(&self, size: u64) -> Result<Allocation> {
        {
            let mut used = self.state.used.lock().expect("pool lock poisoned");
            let available = self.state.capacity - *used;
            if size > available {
                return Err(RuntimeError::OutOfDeviceMemory {
                    kind: self.state.kind,
                    requested: size,
                    available,
                });
            }
            *used += size;
        }

        // Word-backed storage keeps every allocation aligned for typed
        // reinterpretation of the element data.
        let words = (size as usize + 7) / 8;
        Ok(Allocation {
            words: vec![0u64; words],
            len: size as usize,
            state: Arc::clone(&self.state),
        })
    }

    /// Bytes currently handed out.
    pub fn used(&self) -> u64 {
        *self.state.used.lock().expect("pool lock poisoned")
    }

    pub fn capacity(&self) -> u64 {
        self.state.capacity
    }
}

/// A region of device memory. Returns its bytes to the pool when dropped.
#[derive(Debug)]
pub struct Allocation {
    words: Vec<u64>,
    len: usize,
    state: Arc<PoolState>,
}

impl Allocation {
    pub fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.len]
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        let mut used = self.state.used.lock().expect("pool lock poisoned");
        *used -= self.len as u64;
    }
}

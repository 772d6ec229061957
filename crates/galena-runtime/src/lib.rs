//! Runtime for compiled galena artifacts.
//!
//! Hosts the device layer (descriptors, memory pools, instruction streams),
//! tensor buffers with explicit cross-device transfer, the kernel
//! interpreter, and the virtual machine that walks execution plans.

pub mod buffer;
pub mod device;
pub mod error;
mod kernel;
pub mod pool;
pub mod stream;
pub mod vm;

pub use buffer::{Element, TensorBuffer};
pub use device::DeviceDescriptor;
pub use error::{Result, RuntimeError};
pub use pool::{Allocation, MemoryPool};
pub use stream::DeviceStream;
pub use vm::{VirtualMachine, VmState};

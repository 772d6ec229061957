//! Error types for the runtime crate.

use galena_core::{DataType, DeviceKind, Shape, ValueId};
use thiserror::Error;

/// Runtime errors, from buffer allocation through VM execution.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A device allocator could not satisfy an allocation request.
    #[error("out of memory on device '{kind}': requested {requested} bytes, {available} available")]
    OutOfDeviceMemory {
        kind: DeviceKind,
        requested: u64,
        available: u64,
    },

    /// A buffer was accessed from the wrong device outside `copy_to`.
    #[error("device mismatch: buffer resides on '{actual}', access expects '{expected}'")]
    DeviceMismatch {
        expected: DeviceKind,
        actual: DeviceKind,
    },

    /// A view was requested with a different total element count.
    #[error("shape size mismatch: buffer holds {actual} elements, view wants {expected}")]
    ShapeSizeMismatch { expected: usize, actual: usize },

    /// A buffer was read back as a different element type than it holds.
    #[error("dtype mismatch: buffer holds {actual}, caller expects {expected}")]
    DtypeMismatch {
        expected: DataType,
        actual: DataType,
    },

    /// A device kind required by the artifact cannot be instantiated.
    #[error("device kind '{0}' is unavailable on this host")]
    DeviceUnavailable(DeviceKind),

    /// A caller-supplied input buffer is on the wrong device.
    #[error("input {value} declared on '{expected}' but supplied buffer resides on '{actual}'")]
    InputDeviceMismatch {
        value: ValueId,
        expected: DeviceKind,
        actual: DeviceKind,
    },

    /// A caller-supplied input buffer does not match the entry's declared
    /// dtype/shape signature.
    #[error(
        "input {value} declared as {expected_dtype} {expected_shape}, \
         supplied buffer is {actual_dtype} {actual_shape}"
    )]
    InputSignatureMismatch {
        value: ValueId,
        expected_dtype: DataType,
        expected_shape: Shape,
        actual_dtype: DataType,
        actual_shape: Shape,
    },

    /// An entry function was invoked with the wrong number of inputs.
    #[error("entry '{entry}' takes {expected} inputs, {actual} supplied")]
    InputArityMismatch {
        entry: String,
        expected: usize,
        actual: usize,
    },

    /// A kernel invocation or transfer failed during execution.
    #[error("execution failed at {value} ({op}): {message}")]
    ExecutionFailure {
        value: ValueId,
        op: String,
        message: String,
    },

    /// The artifact is malformed or inconsistent with the VM's state.
    #[error("artifact load error: {0}")]
    ArtifactLoad(String),

    /// No entry function with the given name exists in the artifact.
    #[error("unknown entry function '{0}'")]
    UnknownEntry(String),

    /// The VM is not in a state that permits the operation.
    #[error("invalid VM state: {0}")]
    InvalidState(String),

    /// Error from core registry or artifact handling.
    #[error(transparent)]
    Core(#[from] galena_core::Error),
}

/// Specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

//! Error types for the compiler crate.

use galena_core::{DeviceKind, OpKind};
use thiserror::Error;

/// Compilation errors. Any of these aborts the whole artifact — there are
/// no partial artifacts.
#[derive(Debug, Error)]
pub enum CompileError {
    /// An operation has no lowering rule for its partition's target.
    #[error("unsupported operation '{op}' for device '{device}': {message}")]
    UnsupportedOperation {
        op: OpKind,
        device: DeviceKind,
        message: String,
    },

    /// A device placement tag has no corresponding target specification.
    #[error("no target specification covers device placement '{0}'")]
    TargetMismatch(DeviceKind),

    /// Error from core registry or graph handling.
    #[error(transparent)]
    Core(#[from] galena_core::Error),
}

/// Specialized Result type for compilation.
pub type Result<T> = std::result::Result<T, CompileError>;

//! Core types for the Galena heterogeneous execution engine.
//!
//! This crate provides the foundational abstractions the compiler and
//! runtime crates depend on:
//! - Device kinds and the descriptor registry (`device`)
//! - The single-assignment dataflow program (`program`)
//! - Compilation target descriptions (`target`)
//! - Execution plan, kernel, and artifact types (`plan`, `artifact`)

pub mod artifact;
pub mod device;
pub mod ops;
pub mod plan;
pub mod program;
pub mod target;
pub mod types;

pub use artifact::{Artifact, ARTIFACT_VERSION};
pub use device::{DeviceCaps, DeviceId, DeviceKind, DeviceKindId, DeviceRegistry};
pub use ops::OpKind;
pub use plan::{
    BinOp, ExecutionPlan, Kernel, KernelBlob, KernelInstr, KernelRef, Operand, ParamEntry,
    PlanStep, ValueInfo,
};
pub use program::{Program, ProgramBuilder, Value, ValueId, ValueRole};
pub use target::TargetSpec;
pub use types::{DataType, Shape};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for registry, graph, and artifact operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A device kind was resolved before being registered.
    #[error("unknown device kind '{0}'")]
    UnknownDeviceKind(DeviceKind),

    /// A device kind was re-registered with different capabilities.
    #[error("conflicting re-registration of device kind '{0}'")]
    DeviceKindConflict(DeviceKind),

    /// Graph validation failed; carries the offending edge.
    #[error("invalid graph at {value} (input {input:?}): {message}")]
    GraphValidation {
        value: ValueId,
        input: Option<ValueId>,
        message: String,
    },

    /// Artifact could not be persisted or loaded.
    #[error("artifact load error: {0}")]
    ArtifactLoad(String),
}

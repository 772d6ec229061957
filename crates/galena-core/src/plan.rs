//! Execution plan and compiled kernel types.
//!
//! The plan is the compiler's output and the VM's input: an ordered list of
//! steps over a finalized program, with kernels lowered into per-device
//! instruction programs. Everything here is serializable — the plan is the
//! body of the persisted artifact.

use crate::device::DeviceKind;
use crate::ops::OpKind;
use crate::program::ValueId;
use crate::types::{DataType, Shape};
use serde::{Deserialize, Serialize};

/// Element-wise binary operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Mul,
}

/// One lowered kernel instruction.
///
/// Kernels are shape-specialized at lowering time; `lanes` carries the
/// vector-lane hint taken from the target's instruction-set attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelInstr {
    /// (m, k) x (k, n) -> (m, n), f32.
    MatMul {
        m: usize,
        k: usize,
        n: usize,
        lanes: usize,
    },

    /// Element-wise binary op over `len` f32 elements.
    Binary { op: BinOp, len: usize, lanes: usize },

    /// Element-wise max(x, 0) over `len` f32 elements.
    Relu { len: usize },

    /// Raw byte copy of `len` bytes.
    Copy { len: usize },
}

/// A compiled kernel: a named instruction program with a positional
/// argument contract (inputs first, output last), looked up by name the
/// way functions are keyed inside a loadable module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kernel {
    pub name: String,
    pub instrs: Vec<KernelInstr>,
}

/// All kernels lowered for one device partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelBlob {
    pub device: DeviceKind,
    pub kernels: Vec<Kernel>,
}

/// Reference to a kernel inside an artifact's blob table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelRef {
    pub blob: usize,
    pub kernel: usize,
}

/// A step argument: either a runtime value or an embedded parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Value(ValueId),
    Param(usize),
}

/// One entry of the ordered execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStep {
    /// Invoke a compiled kernel; the result is recorded under `value`.
    KernelCall {
        value: ValueId,
        op: OpKind,
        kernel: KernelRef,
        inputs: Vec<Operand>,
    },

    /// Copy `input` from `src` to `value`'s declared device. Transfers are
    /// interpreted by the VM, never lowered into device instructions.
    Transfer {
        value: ValueId,
        input: Operand,
        src: DeviceKind,
    },
}

impl PlanStep {
    /// The value this step produces.
    pub fn value(&self) -> ValueId {
        match self {
            PlanStep::KernelCall { value, .. } | PlanStep::Transfer { value, .. } => *value,
        }
    }
}

/// Static metadata for one program value, indexed by [`ValueId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub name: String,
    pub dtype: DataType,
    pub shape: Shape,
    pub device: DeviceKind,
}

/// The ordered execution plan for one entry function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Steps in stable topological order.
    pub steps: Vec<PlanStep>,

    /// Metadata for every program value.
    pub values: Vec<ValueInfo>,

    /// Caller-bound inputs, in declaration order.
    pub inputs: Vec<ValueId>,

    /// Declared outputs, in declaration order.
    pub outputs: Vec<ValueId>,
}

impl ExecutionPlan {
    pub fn value_info(&self, id: ValueId) -> &ValueInfo {
        &self.values[id.index()]
    }
}

/// An embedded constant parameter, bound into a per-device memory image
/// at compile time and staged once at VM load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamEntry {
    /// The program value this parameter realizes.
    pub value: ValueId,
    pub name: String,
    pub dtype: DataType,
    pub shape: Shape,
    pub device: DeviceKind,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_value() {
        let step = PlanStep::Transfer {
            value: ValueId(3),
            input: Operand::Value(ValueId(1)),
            src: DeviceKind::Host,
        };
        assert_eq!(step.value(), ValueId(3));
    }

    #[test]
    fn test_kernel_instr_roundtrip() {
        let instr = KernelInstr::MatMul {
            m: 2,
            k: 3,
            n: 4,
            lanes: 4,
        };
        let bytes = bincode::serialize(&instr).unwrap();
        let back: KernelInstr = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, instr);
    }
}

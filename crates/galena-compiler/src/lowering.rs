//! Lowering rules: from operations to kernel instruction programs.
//!
//! Each rule emits shape-specialized instructions for one operation,
//! using the target's instruction-set attributes (vector length) as
//! lowering hints. Rules are looked up through a registry so the set is
//! extensible without touching the compile driver.

use crate::error::{CompileError, Result};
use galena_core::{BinOp, DataType, DeviceKind, KernelInstr, OpKind, Shape, TargetSpec};
use std::collections::HashMap;

/// Vector lanes for 32-bit elements implied by a target's `vlen`
/// attribute (vector register width in bits).
fn lanes_for(target: &TargetSpec) -> usize {
    (target.attr_usize("vlen", 32) / 32).max(1)
}

/// A lowering rule for one operation kind.
pub trait Lowering: Send + Sync {
    /// The operation this rule lowers.
    fn op(&self) -> OpKind;

    /// Emit the instruction program for one concrete operation instance.
    fn emit(
        &self,
        inputs: &[&Shape],
        output: &Shape,
        dtype: DataType,
        target: &TargetSpec,
    ) -> Result<Vec<KernelInstr>>;
}

fn require_f32(op: OpKind, dtype: DataType, device: DeviceKind) -> Result<()> {
    if dtype != DataType::F32 {
        return Err(CompileError::UnsupportedOperation {
            op,
            device,
            message: format!("no {} lowering for dtype {}", op, dtype),
        });
    }
    Ok(())
}

struct MatMulLowering;

impl Lowering for MatMulLowering {
    fn op(&self) -> OpKind {
        OpKind::MatMul
    }

    fn emit(
        &self,
        inputs: &[&Shape],
        _output: &Shape,
        dtype: DataType,
        target: &TargetSpec,
    ) -> Result<Vec<KernelInstr>> {
        require_f32(OpKind::MatMul, dtype, target.kind)?;
        let (m, k) = (inputs[0].dims()[0], inputs[0].dims()[1]);
        let n = inputs[1].dims()[1];
        Ok(vec![KernelInstr::MatMul {
            m,
            k,
            n,
            lanes: lanes_for(target),
        }])
    }
}

struct BinaryLowering(BinOp);

impl Lowering for BinaryLowering {
    fn op(&self) -> OpKind {
        match self.0 {
            BinOp::Add => OpKind::Add,
            BinOp::Mul => OpKind::Mul,
        }
    }

    fn emit(
        &self,
        _inputs: &[&Shape],
        output: &Shape,
        dtype: DataType,
        target: &TargetSpec,
    ) -> Result<Vec<KernelInstr>> {
        require_f32(self.op(), dtype, target.kind)?;
        Ok(vec![KernelInstr::Binary {
            op: self.0,
            len: output.elem_count(),
            lanes: lanes_for(target),
        }])
    }
}

struct ReluLowering;

impl Lowering for ReluLowering {
    fn op(&self) -> OpKind {
        OpKind::Relu
    }

    fn emit(
        &self,
        _inputs: &[&Shape],
        output: &Shape,
        dtype: DataType,
        target: &TargetSpec,
    ) -> Result<Vec<KernelInstr>> {
        require_f32(OpKind::Relu, dtype, target.kind)?;
        Ok(vec![KernelInstr::Relu {
            len: output.elem_count(),
        }])
    }
}

struct IdentityLowering;

impl Lowering for IdentityLowering {
    fn op(&self) -> OpKind {
        OpKind::Identity
    }

    fn emit(
        &self,
        _inputs: &[&Shape],
        output: &Shape,
        dtype: DataType,
        _target: &TargetSpec,
    ) -> Result<Vec<KernelInstr>> {
        Ok(vec![KernelInstr::Copy {
            len: output.byte_size(dtype),
        }])
    }
}

/// Registry of lowering rules, keyed by operation kind.
pub struct LoweringRegistry {
    rules: HashMap<OpKind, Box<dyn Lowering>>,
}

impl LoweringRegistry {
    /// An empty registry with no rules.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// A registry with all built-in rules.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(MatMulLowering);
        registry.register(BinaryLowering(BinOp::Add));
        registry.register(BinaryLowering(BinOp::Mul));
        registry.register(ReluLowering);
        registry.register(IdentityLowering);
        registry
    }

    /// Register a rule, chaining.
    pub fn register<L: Lowering + 'static>(&mut self, rule: L) -> &mut Self {
        self.rules.insert(rule.op(), Box::new(rule));
        self
    }

    /// Look up the rule for an operation.
    pub fn get(&self, op: OpKind) -> Option<&dyn Lowering> {
        self.rules.get(&op).map(|rule| rule.as_ref())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for LoweringRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rules_registered() {
        let registry = LoweringRegistry::new();
        assert_eq!(registry.len(), 5);
        assert!(registry.get(OpKind::MatMul).is_some());
        assert!(registry.get(OpKind::Relu).is_some());
    }

    #[test]
    fn test_matmul_emit_uses_target_lanes() {
        let registry = LoweringRegistry::new();
        let rule = registry.get(OpKind::MatMul).unwrap();
        let a = Shape::from([2, 3]);
        let b = Shape::from([3, 4]);
        let out = Shape::from([2, 4]);
        let target = TargetSpec::accel().with_attr("vlen", "128");

        let instrs = rule.emit(&[&a, &b], &out, DataType::F32, &target).unwrap();
        assert_eq!(
            instrs,
            vec![KernelInstr::MatMul {
                m: 2,
                k: 3,
                n: 4,
                lanes: 4,
            }]
        );
    }

    #[test]
    fn test_non_f32_matmul_unsupported() {
        let registry = LoweringRegistry::new();
        let rule = registry.get(OpKind::MatMul).unwrap();
        let a = Shape::from([2, 2]);
        let out = Shape::from([2, 2]);

        let result = rule.emit(&[&a, &a], &out, DataType::I32, &TargetSpec::host());
        assert!(matches!(
            result,
            Err(CompileError::UnsupportedOperation { op: OpKind::MatMul, .. })
        ));
    }
}

//! The closed operation set and its shape-inference rules.

use crate::types::Shape;
use serde::{Deserialize, Serialize};

/// Operations a dataflow value may be produced by.
///
/// The set is closed on purpose: lowering rules, shape inference, and the
/// runtime interpreter all match exhaustively over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    /// 2-D matrix multiplication: (m, k) x (k, n) -> (m, n).
    MatMul,
    /// Element-wise addition of two same-shaped tensors.
    Add,
    /// Element-wise multiplication of two same-shaped tensors.
    Mul,
    /// Element-wise max(x, 0).
    Relu,
    /// Pass-through copy.
    Identity,
}

impl OpKind {
    /// Operation name as it appears in plans and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::MatMul => "matmul",
            OpKind::Add => "add",
            OpKind::Mul => "mul",
            OpKind::Relu => "relu",
            OpKind::Identity => "identity",
        }
    }

    /// Number of input values the operation consumes.
    pub fn arity(&self) -> usize {
        match self {
            OpKind::MatMul | OpKind::Add | OpKind::Mul => 2,
            OpKind::Relu | OpKind::Identity => 1,
        }
    }

    /// Infer the output shape from input shapes.
    ///
    /// Returns a human-readable reason on mismatch; the program builder
    /// wraps it into a `GraphValidation` error carrying the offending edge.
    pub fn infer_shape(&self, inputs: &[&Shape]) -> std::result::Result<Shape, String> {
        if inputs.len() != self.arity() {
            return Err(format!(
                "{} expects {} inputs, got {}",
                self.name(),
                self.arity(),
                inputs.len()
            ));
        }

        match self {
            OpKind::MatMul => {
                let (a, b) = (inputs[0], inputs[1]);
                match (a.dims(), b.dims()) {
                    ([m, k], [k2, n]) if k == k2 => Ok(Shape::from([*m, *n])),
                    ([_, k], [k2, _]) => Err(format!(
                        "matmul inner dimensions differ: {} vs {}",
                        k, k2
                    )),
                    _ => Err(format!(
                        "matmul requires 2-D inputs, got {} and {}",
                        a, b
                    )),
                }
            }
            OpKind::Add | OpKind::Mul => {
                if inputs[0] == inputs[1] {
                    Ok(inputs[0].clone())
                } else {
                    Err(format!(
                        "{} requires matching shapes, got {} and {}",
                        self.name(),
                        inputs[0],
                        inputs[1]
                    ))
                }
            }
            OpKind::Relu | OpKind::Identity => Ok(inputs[0].clone()),
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

//! Single-assignment dataflow program representation.
//!
//! A program is a directed acyclic graph of **values**. Each value carries
//! a dtype, a shape, a device placement, and a role: graph input, embedded
//! parameter, operation result, or cross-device transfer. Structure lives
//! in a petgraph `StableGraph`; value metadata lives in a side-table
//! indexed by `ValueId`.
//!
//! `ProgramBuilder::finalize` is the correctness backbone: it is the one
//! place that guarantees no value is consumed across a device boundary
//! without an explicit transfer node, before any compilation proceeds.

use crate::device::DeviceKind;
use crate::ops::OpKind;
use crate::types::{DataType, Shape};
use crate::{Error, Result};
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Unique identifier of a value within one program.
///
/// Ids are assigned in insertion order; the compiler's topological sort
/// breaks ties by id to keep plan output deterministic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ValueId(pub usize);

impl ValueId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// How a value comes into being.
#[derive(Debug, Clone)]
pub enum ValueRole {
    /// Bound by the caller at invocation time.
    Input,

    /// Constant baked in at compile time.
    Parameter { data: Vec<u8> },

    /// Produced by a kernel invocation.
    Op { op: OpKind, inputs: Vec<ValueId> },

    /// Produced by copying another value to this value's device.
    Transfer { input: ValueId },
}

/// A value in the dataflow graph.
#[derive(Debug, Clone)]
pub struct Value {
    /// Name (inputs and parameters are caller-named, derived values are
    /// named after their producing operation).
    pub name: String,

    pub dtype: DataType,

    /// Declared or inferred shape. `None` until `finalize` runs shape
    /// inference; always `Some` in a finalized program.
    pub shape: Option<Shape>,

    /// Device placement tag.
    pub device: DeviceKind,

    pub role: ValueRole,
}

impl Value {
    /// Input values consumed by this value's producer.
    pub fn inputs(&self) -> &[ValueId] {
        match &self.role {
            ValueRole::Op { inputs, .. } => inputs,
            ValueRole::Transfer { input } => std::slice::from_ref(input),
            ValueRole::Input | ValueRole::Parameter { .. } => &[],
        }
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self.role, ValueRole::Transfer { .. })
    }
}

// ────────────────────────────── ProgramBuilder ──────────────────────────────

/// Builds a [`Program`] value by value.
///
/// Construction never fails; all validation is deferred to [`finalize`]
/// so violations are reported in one place.
///
/// [`finalize`]: ProgramBuilder::finalize
#[derive(Default)]
pub struct ProgramBuilder {
    graph: StableGraph<ValueId, ()>,
    nodes: Vec<NodeIndex>,
    values: Vec<Value>,
    inputs: Vec<ValueId>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, value: Value) -> ValueId {
        let id = ValueId(self.values.len());
        let node = self.graph.add_node(id);
        for &input in value.inputs() {
            if let Some(&producer) = self.nodes.get(input.index()) {
                self.graph.add_edge(producer, node, ());
            }
        }
        self.nodes.push(node);
        self.values.push(value);
        id
    }

    /// Declare a graph input bound by the caller at invocation time.
    pub fn add_input(
        &mut self,
        name: &str,
        dtype: DataType,
        shape: Shape,
        device: DeviceKind,
    ) -> ValueId {
        let id = self.push(Value {
            name: name.to_string(),
            dtype,
            shape: Some(shape),
            device,
            role: ValueRole::Input,
        });
        self.inputs.push(id);
        id
    }

    /// Declare an embedded constant parameter.
    pub fn add_parameter(
        &mut self,
        name: &str,
        dtype: DataType,
        shape: Shape,
        device: DeviceKind,
        data: Vec<u8>,
    ) -> ValueId {
        self.push(Value {
            name: name.to_string(),
            dtype,
            shape: Some(shape),
            device,
            role: ValueRole::Parameter { data },
        })
    }

    /// Add an operation value placed on `device`.
    ///
    /// The output shape is inferred during `finalize`.
    pub fn add_value(&mut self, op: OpKind, inputs: &[ValueId], device: DeviceKind) -> ValueId {
        let name = format!("{}.{}", op.name(), self.values.len());
        self.push(Value {
            name,
            dtype: DataType::F32,
            shape: None,
            device,
            role: ValueRole::Op {
                op,
                inputs: inputs.to_vec(),
            },
        })
    }

    /// Add an explicit transfer of `input` to `target_device`.
    pub fn add_transfer(&mut self, input: ValueId, target_device: DeviceKind) -> ValueId {
        let name = format!("transfer.{}", self.values.len());
        self.push(Value {
            name,
            dtype: DataType::F32,
            shape: None,
            device: target_device,
            role: ValueRole::Transfer { input },
        })
    }

    /// Validate the graph and produce an immutable [`Program`].
    ///
    /// The validation pass checks, in order:
    /// 1. the graph is acyclic;
    /// 2. every consumer's device matches its producer's device, unless the
    ///    consumer is a transfer node;
    /// 3. shapes and dtypes are consistent with each operation's inference
    ///    rule;
    /// 4. every declared output exists and is reachable from an input or
    ///    parameter.
    pub fn finalize(mut self, outputs: Vec<ValueId>) -> Result<Program> {
        // (1) acyclicity, via petgraph; the offending node names the edge
        if let Err(cycle) = petgraph::algo::toposort(&self.graph, None) {
            let value = self.graph[cycle.node_id()];
            return Err(Error::GraphValidation {
                value,
                input: None,
                message: "graph contains a cycle".to_string(),
            });
        }

        let order = self.stable_topo_order()?;

        for &id in &order {
            // split borrow: read inputs before mutating the value's shape
            let value = self.values[id.index()].clone();

            for &input in value.inputs() {
                if input.index() >= self.values.len() {
                    return Err(Error::GraphValidation {
                        value: id,
                        input: Some(input),
                        message: "input value does not exist".to_string(),
                    });
                }
            }

            match &value.role {
                ValueRole::Input | ValueRole::Parameter { .. } => {
                    let shape = value.shape.as_ref().expect("declared shape");
                    if shape.dims().iter().any(|&d| d == 0) {
                        return Err(Error::GraphValidation {
                            value: id,
                            input: None,
                            message: format!("shape {} has a zero dimension", shape),
                        });
                    }
                }
                ValueRole::Op { op, inputs } => {
                    // (2) no implicit cross-device read
                    for &input in inputs {
                        let producer = &self.values[input.index()];
                        if producer.device != value.device {
                            return Err(Error::GraphValidation {
                                value: id,
                                input: Some(input),
                                message: format!(
                                    "{} on {} consumes {} placed on {} without a transfer",
                                    op, value.device, input, producer.device
                                ),
                            });
                        }
                    }

                    // (3) shape and dtype inference
                    let shapes: Vec<&Shape> = inputs
                        .iter()
                        .map(|v| {
                            self.values[v.index()]
                                .shape
                                .as_ref()
                                .expect("inputs precede consumers in topological order")
                        })
                        .collect();
                    let inferred =
                        op.infer_shape(&shapes).map_err(|message| Error::GraphValidation {
                            value: id,
                            input: inputs.first().copied(),
                            message,
                        })?;

                    let dtype = self.values[inputs[0].index()].dtype;
                    for &input in inputs {
                        let other = self.values[input.index()].dtype;
                        if other != dtype {
                            return Err(Error::GraphValidation {
                                value: id,
                                input: Some(input),
                                message: format!(
                                    "mixed input dtypes {} and {}",
                                    dtype, other
                                ),
                            });
                        }
                    }

                    let slot = &mut self.values[id.index()];
                    slot.shape = Some(inferred);
                    slot.dtype = dtype;
                }
                ValueRole::Transfer { input } => {
                    let producer = self.values[input.index()].clone();
                    let slot = &mut self.values[id.index()];
                    slot.shape = producer.shape.clone();
                    slot.dtype = producer.dtype;
                }
            }
        }

        // (4) outputs exist and are reachable from an input or parameter
        if outputs.is_empty() {
            return Err(Error::GraphValidation {
                value: ValueId(0),
                input: None,
                message: "program declares no outputs".to_string(),
            });
        }
        for &output in &outputs {
            if output.index() >= self.values.len() {
                return Err(Error::GraphValidation {
                    value: output,
                    input: None,
                    message: "declared output does not exist".to_string(),
                });
            }
            if !self.reaches_source(output) {
                return Err(Error::GraphValidation {
                    value: output,
                    input: None,
                    message: "output is not reachable from any input or parameter".to_string(),
                });
            }
        }

        Ok(Program {
            values: self.values,
            order,
            inputs: self.inputs,
            outputs,
        })
    }

    /// Deterministic Kahn's algorithm: among ready values, the smallest id
    /// (insertion order) goes first.
    fn stable_topo_order(&self) -> Result<Vec<ValueId>> {
        let n = self.values.len();
        let mut indegree = vec![0usize; n];
        let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (i, value) in self.values.iter().enumerate() {
            for input in value.inputs() {
                if input.index() >= n {
                    return Err(Error::GraphValidation {
                        value: ValueId(i),
                        input: Some(*input),
                        message: "input value does not exist".to_string(),
                    });
                }
                indegree[i] += 1;
                consumers[input.index()].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(&next) = ready.iter().next() {
            ready.remove(&next);
            order.push(ValueId(next));
            for &consumer in &consumers[next] {
                indegree[consumer] -= 1;
                if indegree[consumer] == 0 {
                    ready.insert(consumer);
                }
            }
        }

        if order.len() != n {
            // unreachable after the petgraph cycle check, kept as a guard
            let stuck = indegree
                .iter()
                .position(|&d| d > 0)
                .map(ValueId)
                .unwrap_or(ValueId(0));
            return Err(Error::GraphValidation {
                value: stuck,
                input: None,
                message: "graph contains a cycle".to_string(),
            });
        }

        Ok(order)
    }

    /// Walk producer edges backwards until an input or parameter is found.
    fn reaches_source(&self, from: ValueId) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.values.len()];

        while let Some(id) = stack.pop() {
            if seen[id.index()] {
                continue;
            }
            seen[id.index()] = true;

            let value = &self.values[id.index()];
            match value.role {
                ValueRole::Input | ValueRole::Parameter { .. } => return true,
                _ => stack.extend(value.inputs().iter().copied()),
            }
        }

        false
    }
}

// ──────────────────────────────── Program ────────────────────────────────

/// An immutable, validated dataflow program.
///
/// Constructed once by [`ProgramBuilder::finalize`]; consumed repeatedly by
/// the compiler and, through the compiled artifact, by the VM.
#[derive(Debug, Clone)]
pub struct Program {
    values: Vec<Value>,
    order: Vec<ValueId>,

    /// Caller-bound input values, in declaration order.
    pub inputs: Vec<ValueId>,

    /// Declared outputs, in declaration order.
    pub outputs: Vec<ValueId>,
}

impl Program {
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    /// Shape of a value. Always resolved in a finalized program.
    pub fn shape(&self, id: ValueId) -> &Shape {
        self.values[id.index()]
            .shape
            .as_ref()
            .expect("finalized program has resolved shapes")
    }

    pub fn dtype(&self, id: ValueId) -> DataType {
        self.values[id.index()].dtype
    }

    pub fn device(&self, id: ValueId) -> DeviceKind {
        self.values[id.index()].device
    }

    /// Values in stable topological order (ties broken by insertion order).
    pub fn topological_order(&self) -> &[ValueId] {
        &self.order
    }

    /// Every device placement tag present in the program.
    pub fn placements(&self) -> BTreeSet<DeviceKind> {
        self.values.iter().map(|v| v.device).collect()
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }
}

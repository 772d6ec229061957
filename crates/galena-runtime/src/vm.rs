//! The virtual machine: artifact loading and plan execution.
//!
//! Lifecycle is `Unloaded -> Loaded -> Ready -> Running -> (Ready | Faulted)`.
//! [`VirtualMachine::load`] validates the artifact (`Loaded`); [`prepare`]
//! instantiates one device descriptor per referenced kind and stages the
//! embedded parameter table into device memory (`Ready`). Each `invoke`
//! walks the entry's plan in order, then materializes outputs atomically.
//! A step failure leaves the VM `Faulted`; [`reset`] returns it to `Ready`
//! so the caller can retry with fresh inputs.
//!
//! [`prepare`]: VirtualMachine::prepare
//! [`reset`]: VirtualMachine::reset

use crate::buffer::TensorBuffer;
use crate::device::DeviceDescriptor;
use crate::error::{Result, RuntimeError};
use crate::kernel;
use galena_core::{
    Artifact, DeviceKind, DeviceRegistry, ExecutionPlan, Operand, PlanStep, ValueId,
};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// VM lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Unloaded,
    Loaded,
    Ready,
    Running,
    Faulted,
}

/// A virtual machine bound to one loaded artifact.
///
/// Kernel blobs and staged parameters are read-only after [`prepare`];
/// every invocation allocates its own value buffers. Callers wanting
/// concurrent invocations run one VM per thread over a shared artifact.
///
/// [`prepare`]: VirtualMachine::prepare
#[derive(Debug)]
pub struct VirtualMachine {
    artifact: Arc<Artifact>,
    devices: BTreeMap<DeviceKind, Arc<DeviceDescriptor>>,
    params: Vec<TensorBuffer>,
    state: VmState,
}

impl VirtualMachine {
    /// Load an artifact into a fresh VM. The artifact is checked for
    /// internal consistency and rejected wholesale when malformed.
    pub fn load(artifact: Artifact) -> Result<Self> {
        artifact.validate()?;

        tracing::info!(
            entries = artifact.entries.len(),
            blobs = artifact.blobs.len(),
            params = artifact.params.len(),
            "artifact loaded"
        );

        Ok(Self {
            artifact: Arc::new(artifact),
            devices: BTreeMap::new(),
            params: Vec::new(),
            state: VmState::Loaded,
        })
    }

    /// Load an artifact from a file.
    pub fn load_file(path: &Path) -> Result<Self> {
        Self::load(Artifact::load(path)?)
    }

    /// Instantiate devices and stage parameters; `Loaded -> Ready`.
    ///
    /// Every device kind the artifact references must be registered. The
    /// availability check runs up front, so an unavailable kind leaves no
    /// descriptors behind.
    pub fn prepare(&mut self, registry: &DeviceRegistry) -> Result<()> {
        if self.state != VmState::Loaded {
            return Err(RuntimeError::InvalidState(format!(
                "prepare requires Loaded, VM is {:?}",
                self.state
            )));
        }

        let kinds = self.artifact.device_kinds();
        for kind in &kinds {
            if !registry.contains(*kind) {
                return Err(RuntimeError::DeviceUnavailable(*kind));
            }
        }

        let mut devices = BTreeMap::new();
        for kind in kinds {
            devices.insert(kind, DeviceDescriptor::create(registry, kind, 0)?);
        }

        // Parameters are staged once; invocations share them read-only.
        let mut params = Vec::with_capacity(self.artifact.params.len());
        for entry in &self.artifact.params {
            let expected = entry.shape.byte_size(entry.dtype);
            if entry.data.len() != expected {
                return Err(RuntimeError::ArtifactLoad(format!(
                    "parameter '{}' carries {} bytes, shape {} needs {}",
                    entry.name,
                    entry.data.len(),
                    entry.shape,
                    expected
                )));
            }
            let device = &devices[&entry.device];
            params.push(TensorBuffer::from_bytes(
                device,
                &entry.data,
                entry.shape.clone(),
                entry.dtype,
            )?);
        }

        self.devices = devices;
        self.params = params;
        self.state = VmState::Ready;
        Ok(())
    }

    /// Invoke an entry function; `Ready -> Running -> (Ready | Faulted)`.
    ///
    /// Inputs are checked against the entry's declared placements before
    /// any allocation; a mismatch is rejected without touching device
    /// memory. On success, outputs are returned in declared order and all
    /// intermediate buffers are released.
    pub fn invoke(&mut self, entry: &str, inputs: Vec<TensorBuffer>) -> Result<Vec<TensorBuffer>> {
        if self.state != VmState::Ready {
            return Err(RuntimeError::InvalidState(format!(
                "invoke requires Ready, VM is {:?}",
                self.state
            )));
        }

        let artifact = Arc::clone(&self.artifact);
        let plan = artifact
            .entries
            .get(entry)
            .ok_or_else(|| RuntimeError::UnknownEntry(entry.to_string()))?;

        if inputs.len() != plan.inputs.len() {
            return Err(RuntimeError::InputArityMismatch {
                entry: entry.to_string(),
                expected: plan.inputs.len(),
                actual: inputs.len(),
            });
        }
        for (id, buffer) in plan.inputs.iter().zip(&inputs) {
            let declared = plan.value_info(*id);
            if buffer.device().kind != declared.device {
                return Err(RuntimeError::InputDeviceMismatch {
                    value: *id,
                    expected: declared.device,
                    actual: buffer.device().kind,
                });
            }
            if buffer.dtype() != declared.dtype || buffer.shape() != &declared.shape {
                return Err(RuntimeError::InputSignatureMismatch {
                    value: *id,
                    expected_dtype: declared.dtype,
                    expected_shape: declared.shape.clone(),
                    actual_dtype: buffer.dtype(),
                    actual_shape: buffer.shape().clone(),
                });
            }
        }

        tracing::debug!(entry, steps = plan.steps.len(), "invocation started");

        self.state = VmState::Running;
        match self.run_plan(plan, inputs) {
            Ok(outputs) => {
                self.state = VmState::Ready;
                Ok(outputs)
            }
            Err(e) => {
                self.state = VmState::Faulted;
                Err(e)
            }
        }
    }

    /// Acknowledge a fault; `Faulted -> Ready`.
    pub fn reset(&mut self) -> Result<()> {
        if self.state != VmState::Faulted {
            return Err(RuntimeError::InvalidState(format!(
                "reset requires Faulted, VM is {:?}",
                self.state
            )));
        }
        self.state = VmState::Ready;
        Ok(())
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    /// Descriptor for a referenced device kind, once `Ready`.
    pub fn device(&self, kind: DeviceKind) -> Option<&Arc<DeviceDescriptor>> {
        self.devices.get(&kind)
    }

    fn run_plan(&self, plan: &ExecutionPlan, inputs: Vec<TensorBuffer>) -> Result<Vec<TensorBuffer>> {
        let mut slots: HashMap<ValueId, TensorBuffer> = HashMap::new();
        for (id, buffer) in plan.inputs.iter().zip(inputs) {
            slots.insert(*id, buffer);
        }
        // Staged parameters resolve like any other produced value.
        for (entry, buffer) in self.artifact.params.iter().zip(&self.params) {
            slots.insert(entry.value, buffer.clone());
        }

        for step in &plan.steps {
            match step {
                PlanStep::KernelCall {
                    value,
                    op,
                    kernel: kernel_ref,
                    inputs,
                } => {
                    let info = plan.value_info(*value);
                    let device = &self.devices[&info.device];
                    let args = inputs
                        .iter()
                        .map(|operand| self.resolve(&slots, *operand, *value, op.name()))
                        .collect::<Result<Vec<_>>>()?;

                    let compiled =
                        &self.artifact.blobs[kernel_ref.blob].kernels[kernel_ref.kernel];
                    device.stream().submit();
                    let result =
                        kernel::execute(compiled, device, *value, &args, &info.shape, info.dtype);
                    device.stream().complete();
                    slots.insert(*value, result?);
                }
                PlanStep::Transfer { value, input, src } => {
                    let info = plan.value_info(*value);
                    let source = self.resolve(&slots, *input, *value, "transfer")?;
                    // Fence: the producer on the source device must have
                    // finished before the copy reads its bytes.
                    self.devices[src].stream().wait_idle();

                    let destination = &self.devices[&info.device];
                    destination.stream().submit();
                    let copied = source.copy_to(destination);
                    destination.stream().complete();
                    slots.insert(*value, copied?);
                }
            }
        }

        // Outputs materialize only after the last step; dropping the slot
        // table releases every intermediate.
        let outputs = plan
            .outputs
            .iter()
            .map(|id| {
                slots.get(id).cloned().ok_or_else(|| {
                    RuntimeError::ExecutionFailure {
                        value: *id,
                        op: "output".to_string(),
                        message: "declared output was never produced".to_string(),
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(outputs)
    }

    fn resolve<'a>(
        &'a self,
        slots: &'a HashMap<ValueId, TensorBuffer>,
        operand: Operand,
        consumer: ValueId,
        op: &str,
    ) -> Result<&'a TensorBuffer> {
        match operand {
            Operand::Value(id) => slots.get(&id).ok_or_else(|| RuntimeError::ExecutionFailure {
                value: consumer,
                op: op.to_string(),
                message: format!("argument {} not yet produced", id),
            }),
            Operand::Param(index) => {
                self.params
                    .get(index)
                    .ok_or_else(|| RuntimeError::ExecutionFailure {
                        value: consumer,
                        op: op.to_string(),
                        message: format!("parameter index {} out of range", index),
                    })
            }
        }
    }
}

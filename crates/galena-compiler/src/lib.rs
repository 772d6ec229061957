//! Artifact compiler for Galena.
//!
//! Takes a finalized dataflow [`Program`] and a set of [`TargetSpec`]s and
//! produces a loadable [`Artifact`]:
//! 1. partition the program's operations by device placement;
//! 2. lower each partition's operations into one kernel blob, specialized
//!    by the matching target's instruction-set attributes;
//! 3. synthesize plan-level transfer steps for transfer nodes (transfers
//!    are interpreted by the VM, never compiled into device code);
//! 4. bind embedded parameters into per-device memory images;
//! 5. emit the ordered execution plan via the program's stable topological
//!    order, so identical inputs always compile to identical plans.

pub mod error;
pub mod lowering;

pub use error::{CompileError, Result};
pub use lowering::{Lowering, LoweringRegistry};

use galena_core::{
    Artifact, DeviceKind, DeviceRegistry, ExecutionPlan, Kernel, KernelBlob, KernelRef, Operand,
    ParamEntry, PlanStep, Program, Shape, TargetSpec, ValueId, ValueInfo, ValueRole,
    ARTIFACT_VERSION,
};
use std::collections::{BTreeMap, HashMap};

/// Default entry-function name.
pub const ENTRY_MAIN: &str = "main";

/// Compile a program against target specifications into an artifact.
///
/// Every device kind referenced by a target must already be registered in
/// `devices`; every placement tag in the program must be covered by a
/// target (an accelerator target's attached host target counts for host
/// placements). Compilation is all-or-nothing: no partial artifacts.
pub fn compile(
    program: &Program,
    targets: &[TargetSpec],
    lowerings: &LoweringRegistry,
    devices: &DeviceRegistry,
) -> Result<Artifact> {
    // Flatten targets: attached host targets cover host placements when no
    // explicit host target is given.
    let mut target_map: BTreeMap<DeviceKind, &TargetSpec> = BTreeMap::new();
    for target in targets {
        target_map.entry(target.kind).or_insert(target);
        if let Some(host) = &target.host {
            target_map.entry(host.kind).or_insert(host);
        }
    }

    for kind in target_map.keys() {
        devices.resolve(*kind)?;
    }
    for placement in program.placements() {
        if !target_map.contains_key(&placement) {
            return Err(CompileError::TargetMismatch(placement));
        }
    }

    let mut params: Vec<ParamEntry> = Vec::new();
    let mut param_index: HashMap<ValueId, usize> = HashMap::new();
    let mut kernels: BTreeMap<DeviceKind, Vec<Kernel>> = BTreeMap::new();
    // (value, op, device, index into that device's kernel list, operands)
    let mut raw_steps: Vec<RawStep> = Vec::new();

    let operand_of = |id: ValueId, param_index: &HashMap<ValueId, usize>| -> Operand {
        match param_index.get(&id) {
            Some(&index) => Operand::Param(index),
            None => Operand::Value(id),
        }
    };

    for &id in program.topological_order() {
        let value = program.value(id);
        match &value.role {
            ValueRole::Input => {}
            ValueRole::Parameter { data } => {
                param_index.insert(id, params.len());
                params.push(ParamEntry {
                    value: id,
                    name: value.name.clone(),
                    dtype: value.dtype,
                    shape: program.shape(id).clone(),
                    device: value.device,
                    data: data.clone(),
                });
            }
            ValueRole::Op { op, inputs } => {
                let target = target_map[&value.device];
                let rule = lowerings
                    .get(*op)
                    .ok_or_else(|| CompileError::UnsupportedOperation {
                        op: *op,
                        device: value.device,
                        message: "no lowering rule registered".to_string(),
                    })?;

                let input_shapes: Vec<&Shape> =
                    inputs.iter().map(|&i| program.shape(i)).collect();
                let instrs =
                    rule.emit(&input_shapes, program.shape(id), value.dtype, target)?;

                let partition = kernels.entry(value.device).or_default();
                let kernel = partition.len();
                partition.push(Kernel {
                    name: value.name.clone(),
                    instrs,
                });

                raw_steps.push(RawStep::Call {
                    value: id,
                    op: *op,
                    device: value.device,
                    kernel,
                    inputs: inputs
                        .iter()
                        .map(|&i| operand_of(i, &param_index))
                        .collect(),
                });
            }
            ValueRole::Transfer { input } => {
                raw_steps.push(RawStep::Transfer {
                    value: id,
                    input: operand_of(*input, &param_index),
                    src: program.device(*input),
                });
            }
        }
    }

    // Blob order follows DeviceKind ordering; stable across runs.
    let blobs: Vec<KernelBlob> = kernels
        .into_iter()
        .map(|(device, kernels)| KernelBlob { device, kernels })
        .collect();
    let blob_index: BTreeMap<DeviceKind, usize> = blobs
        .iter()
        .enumerate()
        .map(|(i, blob)| (blob.device, i))
        .collect();

    let steps = raw_steps
        .into_iter()
        .map(|raw| match raw {
            RawStep::Call {
                value,
                op,
                device,
                kernel,
                inputs,
            } => PlanStep::KernelCall {
                value,
                op,
                kernel: KernelRef {
                    blob: blob_index[&device],
                    kernel,
                },
                inputs,
            },
            RawStep::Transfer { value, input, src } => PlanStep::Transfer { value, input, src },
        })
        .collect();

    let values = (0..program.value_count())
        .map(|i| {
            let id = ValueId(i);
            let value = program.value(id);
            ValueInfo {
                name: value.name.clone(),
                dtype: value.dtype,
                shape: program.shape(id).clone(),
                device: value.device,
            }
        })
        .collect();

    let plan = ExecutionPlan {
        steps,
        values,
        inputs: program.inputs.clone(),
        outputs: program.outputs.clone(),
    };

    tracing::debug!(
        values = program.value_count(),
        blobs = blobs.len(),
        params = params.len(),
        "compiled program into artifact"
    );

    Ok(Artifact {
        version: ARTIFACT_VERSION,
        entries: BTreeMap::from([(ENTRY_MAIN.to_string(), plan)]),
        blobs,
        params,
    })
}

enum RawStep {
    Call {
        value: ValueId,
        op: galena_core::OpKind,
        device: DeviceKind,
        kernel: usize,
        inputs: Vec<Operand>,
    },
    Transfer {
        value: ValueId,
        input: Operand,
        src: DeviceKind,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use galena_core::{DataType, DeviceCaps, OpKind, ProgramBuilder};

    fn registry() -> DeviceRegistry {
        let devices = DeviceRegistry::new();
        devices
            .register(DeviceKind::Host, DeviceCaps::new(1 << 20))
            .unwrap();
        devices
            .register(DeviceKind::Accel, DeviceCaps::new(1 << 20))
            .unwrap();
        devices
    }

    fn two_device_program() -> Program {
        let mut builder = ProgramBuilder::new();
        let x = builder.add_input("x", DataType::F32, Shape::from([2, 2]), DeviceKind::Host);
        let relu = builder.add_value(OpKind::Relu, &[x], DeviceKind::Host);
        let moved = builder.add_transfer(relu, DeviceKind::Accel);
        let doubled = builder.add_value(OpKind::Add, &[moved, moved], DeviceKind::Accel);
        builder.finalize(vec![doubled]).unwrap()
    }

    #[test]
    fn test_partitions_one_blob_per_device() {
        let program = two_device_program();
        let artifact = compile(
            &program,
            &[TargetSpec::accel().with_attr("vlen", "128")],
            &LoweringRegistry::new(),
            &registry(),
        )
        .unwrap();

        assert_eq!(artifact.blobs.len(), 2);
        assert_eq!(artifact.blobs[0].device, DeviceKind::Host);
        assert_eq!(artifact.blobs[1].device, DeviceKind::Accel);
        assert_eq!(artifact.blobs[0].kernels.len(), 1);
        assert_eq!(artifact.blobs[1].kernels.len(), 1);
    }

    #[test]
    fn test_transfer_not_lowered_to_device_code() {
        let program = two_device_program();
        let artifact = compile(
            &program,
            &[TargetSpec::accel()],
            &LoweringRegistry::new(),
            &registry(),
        )
        .unwrap();

        let plan = &artifact.entries[ENTRY_MAIN];
        let transfers = plan
            .steps
            .iter()
            .filter(|s| matches!(s, PlanStep::Transfer { .. }))
            .count();
        assert_eq!(transfers, 1);
        // both blobs hold exactly the two real kernels, nothing for the copy
        let kernel_count: usize = artifact.blobs.iter().map(|b| b.kernels.len()).sum();
        assert_eq!(kernel_count, 2);
    }

    #[test]
    fn test_missing_target_is_mismatch() {
        let program = two_device_program();
        let result = compile(
            &program,
            &[TargetSpec::host()],
            &LoweringRegistry::new(),
            &registry(),
        );
        assert!(matches!(
            result,
            Err(CompileError::TargetMismatch(DeviceKind::Accel))
        ));
    }

    #[test]
    fn test_missing_lowering_rule_is_unsupported() {
        let program = two_device_program();
        let result = compile(
            &program,
            &[TargetSpec::accel()],
            &LoweringRegistry::empty(),
            &registry(),
        );
        assert!(matches!(
            result,
            Err(CompileError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_unregistered_target_kind_rejected() {
        let program = two_device_program();
        let devices = DeviceRegistry::new();
        devices
            .register(DeviceKind::Host, DeviceCaps::new(1 << 20))
            .unwrap();

        let result = compile(
            &program,
            &[TargetSpec::accel()],
            &LoweringRegistry::new(),
            &devices,
        );
        assert!(matches!(
            result,
            Err(CompileError::Core(galena_core::Error::UnknownDeviceKind(
                DeviceKind::Accel
            )))
        ));
    }

    #[test]
    fn test_parameters_bound_into_table() {
        let weights: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0]
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect();

        let mut builder = ProgramBuilder::new();
        let x = builder.add_input("x", DataType::F32, Shape::from([2, 2]), DeviceKind::Host);
        let w = builder.add_parameter(
            "w",
            DataType::F32,
            Shape::from([2, 2]),
            DeviceKind::Host,
            weights.clone(),
        );
        let y = builder.add_value(OpKind::MatMul, &[x, w], DeviceKind::Host);
        let program = builder.finalize(vec![y]).unwrap();

        let artifact = compile(
            &program,
            &[TargetSpec::host()],
            &LoweringRegistry::new(),
            &registry(),
        )
        .unwrap();

        assert_eq!(artifact.params.len(), 1);
        assert_eq!(artifact.params[0].name, "w");
        assert_eq!(artifact.params[0].data, weights);

        // the matmul step references the parameter table, not a value
        let plan = &artifact.entries[ENTRY_MAIN];
        match &plan.steps[0] {
            PlanStep::KernelCall { inputs, .. } => {
                assert_eq!(inputs[1], Operand::Param(0));
            }
            other => panic!("expected KernelCall, got {:?}", other),
        }
    }

    #[test]
    fn test_deterministic_plans() {
        let devices = registry();
        let lowerings = LoweringRegistry::new();
        let targets = [TargetSpec::accel().with_attr("vlen", "256")];

        let first = compile(&two_device_program(), &targets, &lowerings, &devices).unwrap();
        let second = compile(&two_device_program(), &targets, &lowerings, &devices).unwrap();
        assert_eq!(first.entries[ENTRY_MAIN].steps, second.entries[ENTRY_MAIN].steps);
        assert_eq!(first.blobs, second.blobs);
    }
}

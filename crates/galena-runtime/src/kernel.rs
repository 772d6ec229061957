//! Kernel blob interpretation.
//!
//! A compiled kernel is an instruction program with a positional argument
//! contract: inputs first, the single output last, keyed by the value the
//! step produces. The interpreter here plays the role of the loaded device
//! code; it runs entirely inside the owning device's memory space, so
//! every argument must already reside on that device.

use crate::buffer::TensorBuffer;
use crate::device::DeviceDescriptor;
use crate::error::{Result, RuntimeError};
use crate::pool::Allocation;
use galena_core::{BinOp, DataType, Kernel, KernelInstr, Shape, ValueId};

fn failure(value: ValueId, kernel: &Kernel, message: String) -> RuntimeError {
    RuntimeError::ExecutionFailure {
        value,
        op: kernel.name.clone(),
        message,
    }
}

/// Execute one kernel, producing the buffer for `value`.
pub(crate) fn execute(
    kernel: &Kernel,
    device: &DeviceDescriptor,
    value: ValueId,
    inputs: &[&TensorBuffer],
    out_shape: &Shape,
    out_dtype: DataType,
) -> Result<TensorBuffer> {
    for input in inputs {
        if input.device().kind != device.kind() {
            return Err(RuntimeError::DeviceMismatch {
                expected: device.kind(),
                actual: input.device().kind,
            });
        }
    }

    let mut out = device
        .pool()
        .allocate(out_shape.byte_size(out_dtype) as u64)?;

    for instr in &kernel.instrs {
        match instr {
            KernelInstr::MatMul { m, k, n, lanes } => {
                let a = f32_arg(kernel, value, inputs, 0, m * k)?;
                let b = f32_arg(kernel, value, inputs, 1, k * n)?;
                let c = f32_out(kernel, value, &mut out)?;
                if c.len() != m * n {
                    return Err(failure(
                        value,
                        kernel,
                        format!("output holds {} elements, matmul writes {}", c.len(), m * n),
                    ));
                }

                let lanes = (*lanes).max(1);
                for i in 0..*m {
                    // columns in lane-sized strips, the shape the vector
                    // unit consumes
                    for j0 in (0..*n).step_by(lanes) {
                        let j1 = (j0 + lanes).min(*n);
                        for j in j0..j1 {
                            let mut acc = 0.0f32;
                            for p in 0..*k {
                                acc += a[i * k + p] * b[p * n + j];
                            }
                            c[i * n + j] = acc;
                        }
                    }
                }
            }
            KernelInstr::Binary { op, len, lanes: _ } => {
                let a = f32_arg(kernel, value, inputs, 0, *len)?;
                let b = f32_arg(kernel, value, inputs, 1, *len)?;
                let c = f32_out(kernel, value, &mut out)?;
                if c.len() != *len {
                    return Err(failure(
                        value,
                        kernel,
                        format!("output holds {} elements, kernel writes {}", c.len(), len),
                    ));
                }
                for i in 0..*len {
                    c[i] = match op {
                        BinOp::Add => a[i] + b[i],
                        BinOp::Mul => a[i] * b[i],
                    };
                }
            }
            KernelInstr::Relu { len } => {
                let a = f32_arg(kernel, value, inputs, 0, *len)?;
                let c = f32_out(kernel, value, &mut out)?;
                if c.len() != *len {
                    return Err(failure(
                        value,
                        kernel,
                        format!("output holds {} elements, kernel writes {}", c.len(), len),
                    ));
                }
                for i in 0..*len {
                    c[i] = a[i].max(0.0);
                }
            }
            KernelInstr::Copy { len } => {
                let input = inputs.first().ok_or_else(|| {
                    failure(value, kernel, "copy expects one argument".to_string())
                })?;
                if input.bytes().len() != *len || out.bytes().len() != *len {
                    return Err(failure(
                        value,
                        kernel,
                        format!(
                            "copy of {} bytes, argument holds {}",
                            len,
                            input.bytes().len()
                        ),
                    ));
                }
                out.bytes_mut().copy_from_slice(input.bytes());
            }
        }
    }

    Ok(TensorBuffer::from_alloc(
        out_dtype,
        out_shape.clone(),
        device.id(),
        out,
    ))
}

/// View the output allocation as f32 storage.
fn f32_out<'a>(
    kernel: &Kernel,
    value: ValueId,
    out: &'a mut Allocation,
) -> Result<&'a mut [f32]> {
    bytemuck::try_cast_slice_mut(out.bytes_mut())
        .map_err(|_| failure(value, kernel, "output is not f32-sized".to_string()))
}

/// Fetch a positional f32 argument, checking its element count.
fn f32_arg<'a>(
    kernel: &Kernel,
    value: ValueId,
    inputs: &[&'a TensorBuffer],
    index: usize,
    expected: usize,
) -> Result<&'a [f32]> {
    let buffer = inputs.get(index).ok_or_else(|| {
        failure(
            value,
            kernel,
            format!("missing positional argument {}", index),
        )
    })?;
    let slice: &[f32] = bytemuck::try_cast_slice(buffer.bytes()).map_err(|_| {
        failure(
            value,
            kernel,
            format!("argument {} does not hold f32 data", index),
        )
    })?;
    if slice.len() != expected {
        return Err(failure(
            value,
            kernel,
            format!(
                "argument {} holds {} elements, kernel expects {}",
                index,
                slice.len(),
                expected
            ),
        ));
    }
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use galena_core::{DataType, DeviceCaps, DeviceKind, DeviceRegistry};
    use std::sync::Arc;

    fn host() -> Arc<DeviceDescriptor> {
        let registry = DeviceRegistry::new();
        registry
            .register(DeviceKind::Host, DeviceCaps::new(1 << 16))
            .unwrap();
        DeviceDescriptor::create(&registry, DeviceKind::Host, 0).unwrap()
    }

    #[test]
    fn test_matmul_kernel() {
        let host = host();
        let a = TensorBuffer::from_vec(&host, vec![1.0f32, 2.0, 3.0, 4.0], Shape::from([2, 2]))
            .unwrap();
        let b = TensorBuffer::from_vec(&host, vec![5.0f32, 6.0, 7.0, 8.0], Shape::from([2, 2]))
            .unwrap();

        let kernel = Kernel {
            name: "matmul.0".to_string(),
            instrs: vec![KernelInstr::MatMul {
                m: 2,
                k: 2,
                n: 2,
                lanes: 4,
            }],
        };

        let out = execute(
            &kernel,
            &host,
            ValueId(2),
            &[&a, &b],
            &Shape::from([2, 2]),
            DataType::F32,
        )
        .unwrap();
        assert_eq!(out.to_vec::<f32>().unwrap(), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_relu_kernel() {
        let host = host();
        let x =
            TensorBuffer::from_vec(&host, vec![-1.0f32, 2.0, -3.0, 4.0], Shape::from([4]))
                .unwrap();

        let kernel = Kernel {
            name: "relu.1".to_string(),
            instrs: vec![KernelInstr::Relu { len: 4 }],
        };

        let out = execute(
            &kernel,
            &host,
            ValueId(1),
            &[&x],
            &Shape::from([4]),
            DataType::F32,
        )
        .unwrap();
        assert_eq!(out.to_vec::<f32>().unwrap(), vec![0.0, 2.0, 0.0, 4.0]);
    }

    #[test]
    fn test_non_f32_argument_is_execution_failure() {
        let host = host();
        let x = TensorBuffer::from_vec(&host, vec![1u8, 2, 3], Shape::from([3])).unwrap();

        let kernel = Kernel {
            name: "relu.1".to_string(),
            instrs: vec![KernelInstr::Relu { len: 3 }],
        };

        // 3 bytes cannot be viewed as f32 elements; no panic, typed error.
        let result = execute(
            &kernel,
            &host,
            ValueId(1),
            &[&x],
            &Shape::from([3]),
            DataType::U8,
        );
        assert!(matches!(
            result,
            Err(RuntimeError::ExecutionFailure { value: ValueId(1), .. })
        ));
    }

    #[test]
    fn test_argument_size_checked() {
        let host = host();
        let x = TensorBuffer::from_vec(&host, vec![1.0f32, 2.0], Shape::from([2])).unwrap();

        let kernel = Kernel {
            name: "relu.1".to_string(),
            instrs: vec![KernelInstr::Relu { len: 8 }],
        };

        let result = execute(
            &kernel,
            &host,
            ValueId(1),
            &[&x],
            &Shape::from([8]),
            DataType::F32,
        );
        assert!(matches!(
            result,
            Err(RuntimeError::ExecutionFailure { value: ValueId(1), .. })
        ));
    }
}

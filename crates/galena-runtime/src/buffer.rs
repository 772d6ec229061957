//! Device-resident tensor buffers.
//!
//! A `TensorBuffer` is a typed, shaped, immutable block of data owned by
//! one device. Cross-device data movement happens only through
//! [`TensorBuffer::copy_to`]; reading device memory from the host outside
//! that path fails with `DeviceMismatch`, which is what keeps the graph's
//! no-implicit-cross-device-read invariant honest at run time.

use crate::device::DeviceDescriptor;
use crate::error::{Result, RuntimeError};
use crate::pool::Allocation;
use bytemuck::Pod;
use galena_core::{DataType, DeviceId, DeviceKind, Shape};
use std::sync::Arc;

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for u8 {}
}

/// Rust element types that correspond to a [`DataType`].
///
/// Sealed: the set mirrors the closed `DataType` enum, so uploading an
/// unsupported element type is a compile error rather than a mislabeled
/// buffer.
pub trait Element: Pod + sealed::Sealed {
    const DTYPE: DataType;
}

impl Element for f32 {
    const DTYPE: DataType = DataType::F32;
}

impl Element for i32 {
    const DTYPE: DataType = DataType::I32;
}

impl Element for i64 {
    const DTYPE: DataType = DataType::I64;
}

impl Element for u8 {
    const DTYPE: DataType = DataType::U8;
}

/// A device-resident, typed, shaped block of data.
///
/// Cloning shares the underlying allocation; the data itself is immutable
/// once the buffer is constructed.
#[derive(Debug, Clone)]
pub struct TensorBuffer {
    dtype: DataType,
    shape: Shape,
    device: DeviceId,
    alloc: Arc<Allocation>,
}

impl TensorBuffer {
    /// Wrap a filled allocation. Producers (kernels, transfers, uploads)
    /// hand their allocation over here, freezing it.
    pub(crate) fn from_alloc(
        dtype: DataType,
        shape: Shape,
        device: DeviceId,
        alloc: Allocation,
    ) -> Self {
        Self {
            dtype,
            shape,
            device,
            alloc: Arc::new(alloc),
        }
    }

    /// Allocate a zeroed buffer on a device.
    pub fn allocate(device: &DeviceDescriptor, shape: Shape, dtype: DataType) -> Result<Self> {
        let alloc = device.pool().allocate(shape.byte_size(dtype) as u64)?;
        Ok(Self::from_alloc(dtype, shape, device.id(), alloc))
    }

    /// Upload a typed vector into a fresh buffer on a device.
    pub fn from_vec<T: Element>(
        device: &DeviceDescriptor,
        data: Vec<T>,
        shape: Shape,
    ) -> Result<Self> {
        let dtype = T::DTYPE;
        let expected = shape.elem_count();
        if data.len() != expected {
            return Err(RuntimeError::ShapeSizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        let mut alloc = device.pool().allocate(shape.byte_size(dtype) as u64)?;
        alloc.bytes_mut().copy_from_slice(bytemuck::cast_slice(&data));
        Ok(Self::from_alloc(dtype, shape, device.id(), alloc))
    }

    /// Upload raw bytes into a fresh buffer on a device.
    pub fn from_bytes(
        device: &DeviceDescriptor,
        data: &[u8],
        shape: Shape,
        dtype: DataType,
    ) -> Result<Self> {
        let expected = shape.byte_size(dtype);
        if data.len() != expected {
            return Err(RuntimeError::ShapeSizeMismatch {
                expected,
                actual: data.len() / dtype.size().max(1),
            });
        }

        let mut alloc = device.pool().allocate(expected as u64)?;
        alloc.bytes_mut().copy_from_slice(data);
        Ok(Self::from_alloc(dtype, shape, device.id(), alloc))
    }

    /// Copy this buffer to another device.
    ///
    /// The transfer primitive: allocates a destination buffer on the target
    /// device and performs the copy through a host staging buffer when
    /// neither endpoint shares a memory space. The result never aliases the
    /// source.
    pub fn copy_to(&self, device: &DeviceDescriptor) -> Result<Self> {
        // Staging hop; for host endpoints this is the direct copy itself.
        let staged: Vec<u8> = self.alloc.bytes().to_vec();

        let mut alloc = device.pool().allocate(staged.len() as u64)?;
        alloc.bytes_mut().copy_from_slice(&staged);
        Ok(Self::from_alloc(
            self.dtype,
            self.shape.clone(),
            device.id(),
            alloc,
        ))
    }

    /// Reinterpret the buffer under a different shape with the same total
    /// element count. Shares the underlying data.
    pub fn view_as(&self, shape: Shape) -> Result<Self> {
        if shape.elem_count() != self.shape.elem_count() {
            return Err(RuntimeError::ShapeSizeMismatch {
                expected: shape.elem_count(),
                actual: self.shape.elem_count(),
            });
        }

        Ok(Self {
            dtype: self.dtype,
            shape,
            device: self.device,
            alloc: Arc::clone(&self.alloc),
        })
    }

    /// Read the buffer back as a typed vector. Host buffers only; device
    /// data must be transferred with `copy_to` first, and the element type
    /// must match the buffer's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if self.device.kind != DeviceKind::Host {
            return Err(RuntimeError::DeviceMismatch {
                expected: DeviceKind::Host,
                actual: self.device.kind,
            });
        }
        if self.dtype != T::DTYPE {
            return Err(RuntimeError::DtypeMismatch {
                expected: T::DTYPE,
                actual: self.dtype,
            });
        }
        Ok(bytemuck::cast_slice(self.alloc.bytes()).to_vec())
    }

    /// Raw bytes, for device-side consumers (kernels, transfers).
    pub(crate) fn bytes(&self) -> &[u8] {
        self.alloc.bytes()
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn len(&self) -> usize {
        self.shape.elem_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galena_core::{DeviceCaps, DeviceRegistry};

    fn devices() -> (Arc<DeviceDescriptor>, Arc<DeviceDescriptor>) {
        let registry = DeviceRegistry::new();
        registry
            .register(DeviceKind::Host, DeviceCaps::new(1 << 16))
            .unwrap();
        registry
            .register(DeviceKind::Accel, DeviceCaps::new(1 << 16))
            .unwrap();
        (
            DeviceDescriptor::create(&registry, DeviceKind::Host, 0).unwrap(),
            DeviceDescriptor::create(&registry, DeviceKind::Accel, 0).unwrap(),
        )
    }

    #[test]
    fn test_from_vec_to_vec() {
        let (host, _) = devices();
        let buffer =
            TensorBuffer::from_vec(&host, vec![1.0f32, 2.0, 3.0, 4.0], Shape::from([2, 2]))
                .unwrap();

        assert_eq!(buffer.dtype(), DataType::F32);
        assert_eq!(buffer.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_upload_dtype_follows_element_type() {
        let (host, _) = devices();
        let ints = TensorBuffer::from_vec(&host, vec![1i32, -2], Shape::from([2])).unwrap();
        assert_eq!(ints.dtype(), DataType::I32);

        let bytes = TensorBuffer::from_vec(&host, vec![1u8, 2, 3], Shape::from([3])).unwrap();
        assert_eq!(bytes.dtype(), DataType::U8);
        assert_eq!(bytes.to_vec::<u8>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_read_back_as_wrong_dtype_rejected() {
        let (host, _) = devices();
        let buffer =
            TensorBuffer::from_vec(&host, vec![1.0f32, 2.0], Shape::from([2])).unwrap();

        match buffer.to_vec::<i32>() {
            Err(RuntimeError::DtypeMismatch {
                expected: DataType::I32,
                actual: DataType::F32,
            }) => {}
            other => panic!("expected DtypeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_copy_roundtrip_is_identical() {
        let (host, accel) = devices();
        let data = vec![1.5f32, -2.25, 0.0, f32::MIN_POSITIVE];
        let original = TensorBuffer::from_vec(&host, data.clone(), Shape::from([4])).unwrap();

        let on_accel = original.copy_to(&accel).unwrap();
        assert_eq!(on_accel.device().kind, DeviceKind::Accel);

        let back = on_accel.copy_to(&host).unwrap();
        assert_eq!(back.to_vec::<f32>().unwrap(), data);
    }

    #[test]
    fn test_device_read_outside_copy_rejected() {
        let (host, accel) = devices();
        let buffer = TensorBuffer::from_vec(&host, vec![1.0f32], Shape::from([1]))
            .unwrap()
            .copy_to(&accel)
            .unwrap();

        match buffer.to_vec::<f32>() {
            Err(RuntimeError::DeviceMismatch {
                expected: DeviceKind::Host,
                actual: DeviceKind::Accel,
            }) => {}
            other => panic!("expected DeviceMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_view_as_checks_element_count() {
        let (host, _) = devices();
        let buffer =
            TensorBuffer::from_vec(&host, vec![0.0f32; 6], Shape::from([2, 3])).unwrap();

        let viewed = buffer.view_as(Shape::from([3, 2])).unwrap();
        assert_eq!(viewed.shape(), &Shape::from([3, 2]));

        assert!(matches!(
            buffer.view_as(Shape::from([4, 2])),
            Err(RuntimeError::ShapeSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_copy_does_not_alias() {
        let (host, accel) = devices();
        let original = TensorBuffer::from_vec(&host, vec![7.0f32], Shape::from([1])).unwrap();
        let copied = original.copy_to(&accel).unwrap();

        // separate allocations on separate pools
        assert_eq!(host.pool().used(), 4);
        assert_eq!(accel.pool().used(), 4);
        drop(copied);
        assert_eq!(accel.pool().used(), 0);
        assert_eq!(original.to_vec::<f32>().unwrap(), vec![7.0]);
    }

    #[test]
    fn test_allocation_failure() {
        let registry = DeviceRegistry::new();
        registry
            .register(DeviceKind::Host, DeviceCaps::new(8))
            .unwrap();
        let host = DeviceDescriptor::create(&registry, DeviceKind::Host, 0).unwrap();

        let result = TensorBuffer::allocate(&host, Shape::from([16]), DataType::F32);
        assert!(matches!(
            result,
            Err(RuntimeError::OutOfDeviceMemory { .. })
        ));
    }
}

//! Element types and static tensor shapes.

use serde::{Deserialize, Serialize};

/// Fixed-width element type of a tensor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    F32,
    I32,
    I64,
    U8,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::I64 => 8,
            DataType::U8 => 1,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::F32 => "f32",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::U8 => "u8",
        };
        write!(f, "{}", name)
    }
}

/// A static tensor shape: an ordered sequence of positive dimensions.
///
/// All shapes in a finalized program are static; shape inference at
/// `finalize` rejects anything it cannot resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(pub Vec<usize>);

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// Dimensions as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product()
    }

    /// Total size in bytes for the given element type.
    pub fn byte_size(&self, dtype: DataType) -> usize {
        self.elem_count() * dtype.size()
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape(dims.to_vec())
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elem_count_and_bytes() {
        let shape = Shape::from([2, 3, 4]);
        assert_eq!(shape.elem_count(), 24);
        assert_eq!(shape.byte_size(DataType::F32), 96);
        assert_eq!(shape.byte_size(DataType::U8), 24);
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::from([2, 5]).to_string(), "(2, 5)");
        assert_eq!(DataType::F32.to_string(), "f32");
    }
}

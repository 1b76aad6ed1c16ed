//! Host tensors passed into and out of operator dispatch
//!
//! A [`Tensor`] is a dense, row-major buffer with a shape and a typed element
//! store. Only the element type, the shape and the raw values are exposed;
//! the numeric kernels live with the operators.

use crate::error::{GraphError, GraphResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::Bool,
        DataType::Int32,
        DataType::Int64,
        DataType::Float32,
        DataType::Float64,
    ];

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64)
    }

    /// Bytes per element
    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::Bool => 1,
            DataType::Int32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Float64 => 8,
        }
    }

    /// Stable tag for compact encodings
    pub fn tag(self) -> u8 {
        match self {
            DataType::Bool => 0,
            DataType::Int32 => 1,
            DataType::Int64 => 2,
            DataType::Float32 => 3,
            DataType::Float64 => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|dt| dt.tag() == tag)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "bool",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        };
        f.write_str(name)
    }
}

/// Typed element storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    Bool(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl TensorData {
    fn zeros(dtype: DataType, len: usize) -> Self {
        match dtype {
            DataType::Bool => TensorData::Bool(vec![false; len]),
            DataType::Int32 => TensorData::Int32(vec![0; len]),
            DataType::Int64 => TensorData::Int64(vec![0; len]),
            DataType::Float32 => TensorData::Float32(vec![0.0; len]),
            DataType::Float64 => TensorData::Float64(vec![0.0; len]),
        }
    }

    fn len(&self) -> usize {
        match self {
            TensorData::Bool(v) => v.len(),
            TensorData::Int32(v) => v.len(),
            TensorData::Int64(v) => v.len(),
            TensorData::Float32(v) => v.len(),
            TensorData::Float64(v) => v.len(),
        }
    }

    fn dtype(&self) -> DataType {
        match self {
            TensorData::Bool(_) => DataType::Bool,
            TensorData::Int32(_) => DataType::Int32,
            TensorData::Int64(_) => DataType::Int64,
            TensorData::Float32(_) => DataType::Float32,
            TensorData::Float64(_) => DataType::Float64,
        }
    }
}

/// Scalar types that can back a tensor
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DataType;
    fn wrap(values: Vec<Self>) -> TensorData;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DataType = DataType::$variant;
            fn wrap(values: Vec<Self>) -> TensorData {
                TensorData::$variant(values)
            }
        }
    };
}

impl_element!(bool, Bool);
impl_element!(i32, Int32);
impl_element!(i64, Int64);
impl_element!(f32, Float32);
impl_element!(f64, Float64);

/// Number of elements described by a shape, or `None` when it overflows `usize`
pub fn checked_element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// Number of elements described by a shape (rank 0 holds one element).
///
/// Saturates at `usize::MAX`; constructors reject such shapes.
pub fn element_count(shape: &[usize]) -> usize {
    checked_element_count(shape).unwrap_or(usize::MAX)
}

fn shape_overflow(shape: &[usize]) -> GraphError {
    GraphError::invalid_argument(format!("shape {:?} has too many elements", shape))
}

/// Dense host tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: TensorData,
}

impl Tensor {
    /// Build a tensor, checking that the buffer matches the shape
    pub fn new(shape: Vec<usize>, data: TensorData) -> GraphResult<Self> {
        let expected = checked_element_count(&shape).ok_or_else(|| shape_overflow(&shape))?;
        if data.len() != expected {
            return Err(GraphError::invalid_argument(format!(
                "shape {:?} needs {} elements, buffer holds {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Re-check the shape invariant on a tensor that arrived off the wire
    pub fn validate(&self) -> GraphResult<()> {
        let expected =
            checked_element_count(&self.shape).ok_or_else(|| shape_overflow(&self.shape))?;
        if self.data.len() != expected {
            return Err(GraphError::invalid_argument(format!(
                "tensor {} carries {} elements, shape needs {}",
                self,
                self.data.len(),
                expected
            )));
        }
        Ok(())
    }

    pub fn from_vec<T: Element>(shape: Vec<usize>, values: Vec<T>) -> GraphResult<Self> {
        Self::new(shape, T::wrap(values))
    }

    /// 1-D tensor holding `values`
    pub fn vector<T: Element>(values: Vec<T>) -> Self {
        Self {
            shape: vec![values.len()],
            data: T::wrap(values),
        }
    }

    /// Rank-0 tensor
    pub fn scalar<T: Element>(value: T) -> Self {
        Self {
            shape: Vec::new(),
            data: T::wrap(vec![value]),
        }
    }

    pub fn zeros(dtype: DataType, shape: Vec<usize>) -> Self {
        let len = element_count(&shape);
        Self {
            shape,
            data: TensorData::zeros(dtype, len),
        }
    }

    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::Float32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.data {
            TensorData::Float64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.data {
            TensorData::Int32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            TensorData::Int64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<&[bool]> {
        match &self.data {
            TensorData::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Element values widened to f64 (booleans become 0.0 / 1.0)
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match &self.data {
            TensorData::Bool(v) => v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect(),
            TensorData::Int32(v) => v.iter().map(|&x| x as f64).collect(),
            TensorData::Int64(v) => v.iter().map(|&x| x as f64).collect(),
            TensorData::Float32(v) => v.iter().map(|&x| x as f64).collect(),
            TensorData::Float64(v) => v.clone(),
        }
    }

    /// Integer element values widened to i64, `None` for other types
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        match &self.data {
            TensorData::Int32(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            TensorData::Int64(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Overwrite every element of an integer tensor from i64 values.
    ///
    /// Fails when a value does not fit an int32 tensor.
    pub fn fill_from_i64(&mut self, values: &[i64]) -> GraphResult<()> {
        if values.len() != self.len() {
            return Err(GraphError::invalid_argument(format!(
                "cannot write {} values into a tensor of {} elements",
                values.len(),
                self.len()
            )));
        }
        match &mut self.data {
            TensorData::Int32(v) => {
                for (d, &s) in v.iter_mut().zip(values) {
                    *d = i32::try_from(s).map_err(|_| {
                        GraphError::invalid_argument(format!("{} does not fit int32", s))
                    })?;
                }
            }
            TensorData::Int64(v) => v.copy_from_slice(values),
            _ => {
                return Err(GraphError::invalid_argument(format!(
                    "cannot write integers into a {} tensor",
                    self.data.dtype()
                )))
            }
        }
        Ok(())
    }

    /// Overwrite every element from f64 values, narrowing to this tensor's type.
    ///
    /// The dtype and shape are left untouched.
    pub fn fill_from_f64(&mut self, values: &[f64]) -> GraphResult<()> {
        if values.len() != self.len() {
            return Err(GraphError::invalid_argument(format!(
                "cannot write {} values into a tensor of {} elements",
                values.len(),
                self.len()
            )));
        }
        match &mut self.data {
            TensorData::Bool(v) => v.iter_mut().zip(values).for_each(|(d, &s)| *d = s != 0.0),
            TensorData::Int32(v) => v.iter_mut().zip(values).for_each(|(d, &s)| *d = s as i32),
            TensorData::Int64(v) => v.iter_mut().zip(values).for_each(|(d, &s)| *d = s as i64),
            TensorData::Float32(v) => v.iter_mut().zip(values).for_each(|(d, &s)| *d = s as f32),
            TensorData::Float64(v) => v.copy_from_slice(values),
        }
        Ok(())
    }

    /// Copy the elements of `src` into this tensor without changing its shape.
    ///
    /// Both tensors must have the same dtype and element count.
    pub fn copy_elements_from(&mut self, src: &Tensor) -> GraphResult<()> {
        if src.dtype() != self.dtype() || src.len() != self.len() {
            return Err(GraphError::invalid_argument(format!(
                "cannot copy {} x{} into {} x{}",
                src.dtype(),
                src.len(),
                self.dtype(),
                self.len()
            )));
        }
        self.data = src.data.clone();
        Ok(())
    }

    /// True when every element is non-zero / true
    pub fn all_truthy(&self) -> bool {
        match &self.data {
            TensorData::Bool(v) => v.iter().all(|&b| b),
            TensorData::Int32(v) => v.iter().all(|&x| x != 0),
            TensorData::Int64(v) => v.iter().all(|&x| x != 0),
            TensorData::Float32(v) => v.iter().all(|&x| x != 0.0),
            TensorData::Float64(v) => v.iter().all(|&x| x != 0.0),
        }
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.dtype(), self.shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_must_match_buffer() {
        assert!(Tensor::from_vec(vec![2, 2], vec![1.0f32, 2.0, 3.0]).is_err());
        let t = Tensor::from_vec(vec![2, 2], vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(t.dtype(), DataType::Float32);
        assert_eq!(t.rank(), 2);
    }

    #[test]
    fn test_scalar_has_one_element() {
        let t = Tensor::scalar(false);
        assert_eq!(t.len(), 1);
        assert_eq!(t.rank(), 0);
        assert!(!t.all_truthy());
    }

    #[test]
    fn test_fill_narrows_to_own_dtype() {
        let mut t = Tensor::zeros(DataType::Int32, vec![3]);
        t.fill_from_f64(&[1.9, -2.2, 3.0]).unwrap();
        assert_eq!(t.as_i32(), Some(&[1, -2, 3][..]));
        assert_eq!(t.dtype(), DataType::Int32);
    }

    #[test]
    fn test_overflowing_shape_is_rejected() {
        let huge = vec![1usize << 63, 2];
        assert_eq!(checked_element_count(&huge), None);
        assert_eq!(element_count(&huge), usize::MAX);
        assert!(matches!(
            Tensor::from_vec(huge.clone(), Vec::<f32>::new()),
            Err(GraphError::InvalidArgument(_))
        ));

        let decoded = Tensor {
            shape: huge,
            data: TensorData::Float32(Vec::new()),
        };
        assert!(matches!(decoded.validate(), Err(GraphError::InvalidArgument(_))));
    }

    #[test]
    fn test_integer_fill_checks_range() {
        let mut t = Tensor::zeros(DataType::Int32, vec![2]);
        t.fill_from_i64(&[7, -7]).unwrap();
        assert_eq!(t.as_i32(), Some(&[7, -7][..]));
        assert!(t.fill_from_i64(&[i64::from(i32::MAX) + 1, 0]).is_err());

        let wide = Tensor::vector(vec![i64::MAX]);
        assert_eq!(wide.to_i64_vec(), Some(vec![i64::MAX]));
        assert_eq!(Tensor::scalar(1.0f32).to_i64_vec(), None);
    }

    #[test]
    fn test_tag_lookup() {
        for dt in DataType::ALL {
            assert_eq!(DataType::from_tag(dt.tag()), Some(dt));
        }
        assert_eq!(DataType::from_tag(42), None);
    }
}

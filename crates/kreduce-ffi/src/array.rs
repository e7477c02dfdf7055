//! Host-side typed arrays passed to kernels.

use kreduce_core::DType;

use crate::error::{InvokeError, Result};

/// Element storage of a [`TypedArray`].
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::F32(v) => v.len(),
            ArrayData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::F32(_) => DType::Float32,
            ArrayData::F64(_) => DType::Float64,
        }
    }
}

/// A dense numeric array with an explicit shape and element strides.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedArray {
    data: ArrayData,
    shape: Vec<usize>,
    strides: Vec<usize>,
}

impl TypedArray {
    /// Row-major array over `data`.
    pub fn new(data: ArrayData, shape: &[usize]) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(InvokeError::InvalidArray {
                detail: format!(
                    "shape {shape:?} needs {expected} elements, data has {}",
                    data.len()
                ),
            });
        }
        Ok(TypedArray {
            data,
            shape: shape.to_vec(),
            strides: row_major_strides(shape),
        })
    }

    pub fn from_f32(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        Self::new(ArrayData::F32(data), shape)
    }

    pub fn from_f64(data: Vec<f64>, shape: &[usize]) -> Result<Self> {
        Self::new(ArrayData::F64(data), shape)
    }

    /// Zero-filled row-major array. Float16 has no host representation.
    pub fn zeros(dtype: DType, shape: &[usize]) -> Result<Self> {
        let len = shape.iter().product();
        let data = match dtype {
            DType::Float32 => ArrayData::F32(vec![0.0; len]),
            DType::Float64 => ArrayData::F64(vec![0.0; len]),
            DType::Float16 => return Err(InvokeError::UnsupportedDType { dtype }),
        };
        Self::new(data, shape)
    }

    /// Reinterpret the array with explicit element strides, e.g. a transposed
    /// view. Every addressed element must lie inside the data.
    pub fn with_strides(self, shape: &[usize], strides: &[usize]) -> Result<Self> {
        if shape.len() != strides.len() {
            return Err(InvokeError::InvalidArray {
                detail: format!(
                    "shape has rank {} but {} strides were given",
                    shape.len(),
                    strides.len()
                ),
            });
        }
        if shape.iter().all(|&d| d > 0) {
            let last = shape
                .iter()
                .zip(strides)
                .try_fold(0usize, |acc, (d, s)| (d - 1).checked_mul(*s)?.checked_add(acc))
                .ok_or_else(|| InvokeError::InvalidArray {
                    detail: format!("strides {strides:?} overflow for shape {shape:?}"),
                })?;
            if last >= self.data.len() {
                return Err(InvokeError::InvalidArray {
                    detail: format!(
                        "strides {strides:?} address element {last} of {}",
                        self.data.len()
                    ),
                });
            }
        }
        Ok(TypedArray {
            data: self.data,
            shape: shape.to_vec(),
            strides: strides.to_vec(),
        })
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Whether the array is laid out as a flat row-major buffer.
    /// Strides of unit-extent axes are irrelevant and ignored.
    pub fn is_contiguous(&self) -> bool {
        let expected = row_major_strides(&self.shape);
        self.data.len() == self.len()
            && self
                .shape
                .iter()
                .zip(self.strides.iter().zip(&expected))
                .all(|(&d, (s, e))| d <= 1 || s == e)
    }

    /// Elements as `T`, if the array holds that type.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::view(&self.data)
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> Option<&mut [T]> {
        T::view_mut(&mut self.data)
    }

    /// Copy of the elements widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match &self.data {
            ArrayData::F32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ArrayData::F64(v) => v.clone(),
        }
    }
}

fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Element types with a host representation.
pub trait Element: Copy + Default + Send + Sync + 'static {
    const DTYPE: DType;

    fn view(data: &ArrayData) -> Option<&[Self]>;
    fn view_mut(data: &mut ArrayData) -> Option<&mut [Self]>;
    /// Cast a caller scalar to the native element type.
    fn from_f64(value: f64) -> Self;
}

impl Element for f32 {
    const DTYPE: DType = DType::Float32;

    fn view(data: &ArrayData) -> Option<&[Self]> {
        match data {
            ArrayData::F32(v) => Some(v),
            ArrayData::F64(_) => None,
        }
    }

    fn view_mut(data: &mut ArrayData) -> Option<&mut [Self]> {
        match data {
            ArrayData::F32(v) => Some(v),
            ArrayData::F64(_) => None,
        }
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::Float64;

    fn view(data: &ArrayData) -> Option<&[Self]> {
        match data {
            ArrayData::F64(v) => Some(v),
            ArrayData::F32(_) => None,
        }
    }

    fn view_mut(data: &mut ArrayData) -> Option<&mut [Self]> {
        match data {
            ArrayData::F64(v) => Some(v),
            ArrayData::F32(_) => None,
        }
    }

    fn from_f64(value: f64) -> Self {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_checks_element_count() {
        assert!(TypedArray::from_f32(vec![0.0; 6], &[2, 3]).is_ok());
        let err = TypedArray::from_f32(vec![0.0; 5], &[2, 3]).unwrap_err();
        assert!(matches!(err, InvokeError::InvalidArray { .. }));
    }

    #[test]
    fn row_major_is_contiguous() {
        let a = TypedArray::from_f64(vec![0.0; 24], &[2, 3, 4]).unwrap();
        assert_eq!(a.strides(), &[12, 4, 1]);
        assert!(a.is_contiguous());
        assert_eq!(a.rank(), 3);
        assert_eq!(a.dtype(), DType::Float64);
    }

    #[test]
    fn transposed_view_is_not_contiguous() {
        let a = TypedArray::from_f32(vec![0.0; 6], &[2, 3])
            .unwrap()
            .with_strides(&[3, 2], &[1, 3])
            .unwrap();
        assert_eq!(a.shape(), &[3, 2]);
        assert!(!a.is_contiguous());
    }

    #[test]
    fn unit_axes_ignore_stride() {
        let a = TypedArray::from_f32(vec![0.0; 3], &[1, 3])
            .unwrap()
            .with_strides(&[1, 3], &[99, 1])
            .unwrap();
        assert!(a.is_contiguous());
    }

    #[test]
    fn strides_out_of_bounds_rejected() {
        let err = TypedArray::from_f32(vec![0.0; 6], &[2, 3])
            .unwrap()
            .with_strides(&[2, 3], &[4, 1])
            .unwrap_err();
        assert!(matches!(err, InvokeError::InvalidArray { .. }));
    }

    #[test]
    fn overflowing_strides_rejected() {
        let err = TypedArray::from_f32(vec![0.0; 6], &[2, 3])
            .unwrap()
            .with_strides(&[3, 2], &[usize::MAX, 1])
            .unwrap_err();
        match err {
            InvokeError::InvalidArray { detail } => assert!(detail.contains("overflow"), "{detail}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zeros_and_views() {
        let mut a = TypedArray::zeros(DType::Float32, &[4]).unwrap();
        assert!(a.as_slice::<f64>().is_none());
        a.as_mut_slice::<f32>().unwrap()[2] = 1.5;
        assert_eq!(a.to_f64_vec(), vec![0.0, 0.0, 1.5, 0.0]);

        let err = TypedArray::zeros(DType::Float16, &[4]).unwrap_err();
        assert!(matches!(err, InvokeError::UnsupportedDType { .. }));
    }
}

//! Dense row-major tensor container.
//!
//! One tensor type serves both arithmetic domains: `Tensor<i64>` carries the
//! fixed-point pipeline, `Tensor<f64>` carries the real-valued reference path
//! and the two boundary conversions. Conversions between the domains are
//! explicit ([`Tensor::to_fixed`], [`Tensor::to_real`]); nothing rescales
//! implicitly.

use std::ops::{Add, AddAssign, Mul, Sub};

use crate::error::NetError;

/// Closed set of element types the pipeline computes over
pub trait Element:
    Copy
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + AddAssign
{
    /// Additive identity, also the ReLU clamp floor
    const ZERO: Self;
}

impl Element for i64 {
    const ZERO: i64 = 0;
}

impl Element for f64 {
    const ZERO: f64 = 0.0;
}

/// N-dimensional tensor with flattened row-major storage
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    /// Shape of the tensor
    shape: Vec<usize>,
    /// Flattened data in row-major order
    data: Vec<T>,
}

impl<T: Element> Tensor<T> {
    /// Create a tensor from a shape and flattened row-major data.
    ///
    /// # Errors
    /// Returns an error if the shape is empty, contains a zero dimension, or
    /// disagrees with the data length.
    pub fn from_vec(shape: Vec<usize>, data: Vec<T>) -> Result<Self, NetError> {
        if shape.is_empty() {
            return Err(NetError::InvalidShape {
                reason: "shape cannot be empty".to_string(),
            });
        }
        if shape.contains(&0) {
            return Err(NetError::InvalidShape {
                reason: "shape dimensions cannot be zero".to_string(),
            });
        }
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(NetError::DataShapeMismatch {
                expected,
                found: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Create a zero-filled tensor of the given shape
    pub fn zeros(shape: Vec<usize>) -> Result<Self, NetError> {
        Self::filled(shape, T::ZERO)
    }

    /// Create a tensor of the given shape with every element set to `value`
    pub fn filled(shape: Vec<usize>, value: T) -> Result<Self, NetError> {
        let len: usize = shape.iter().product();
        Self::from_vec(shape, vec![value; len])
    }

    /// Shape of the tensor
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Total number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor holds no elements (never true for a valid tensor)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flattened row-major data
    #[must_use]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Mutable access to the flattened data
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Reinterpret the data under a new shape with the same element count.
    ///
    /// # Errors
    /// Returns an error if the new shape is invalid or changes the length.
    pub fn reshape(self, shape: Vec<usize>) -> Result<Self, NetError> {
        Self::from_vec(shape, self.data)
    }

    /// Apply `f` to every element, producing a tensor of the same shape
    #[must_use]
    pub fn map<U: Element>(&self, f: impl Fn(T) -> U) -> Tensor<U> {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }
}

impl Tensor<f64> {
    /// Convert integral real values into the fixed-point domain.
    ///
    /// The values are expected to already be integral (the product of a
    /// `round` or `trunc` step); the cast discards nothing.
    #[must_use]
    pub fn to_fixed(&self) -> Tensor<i64> {
        self.map(|v| v as i64)
    }
}

impl Tensor<i64> {
    /// Widen fixed-point values into `f64` without rescaling
    #[must_use]
    pub fn to_real(&self) -> Tensor<f64> {
        self.map(|v| v as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_validates_length() {
        let result = Tensor::from_vec(vec![2, 3], vec![1.0; 5]);
        assert_eq!(
            result,
            Err(NetError::DataShapeMismatch {
                expected: 6,
                found: 5
            })
        );
    }

    #[test]
    fn from_vec_rejects_empty_shape() {
        let result = Tensor::from_vec(vec![], vec![1.0, 2.0]);
        assert!(matches!(result, Err(NetError::InvalidShape { .. })));
    }

    #[test]
    fn from_vec_rejects_zero_dimension() {
        let result = Tensor::<i64>::from_vec(vec![2, 0], vec![]);
        assert!(matches!(result, Err(NetError::InvalidShape { .. })));
    }

    #[test]
    fn zeros_and_shape() {
        let t = Tensor::<i64>::zeros(vec![2, 3, 4]).unwrap();
        assert_eq!(t.shape(), &[2, 3, 4]);
        assert_eq!(t.len(), 24);
        assert!(t.data().iter().all(|&v| v == 0));
    }

    #[test]
    fn reshape_preserves_data() {
        let t = Tensor::from_vec(vec![2, 3], vec![1, 2, 3, 4, 5, 6]).unwrap();
        let r = t.reshape(vec![3, 2]).unwrap();
        assert_eq!(r.shape(), &[3, 2]);
        assert_eq!(r.data(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn reshape_rejects_length_change() {
        let t = Tensor::from_vec(vec![2, 3], vec![0i64; 6]).unwrap();
        assert!(t.reshape(vec![2, 2]).is_err());
    }

    #[test]
    fn domain_conversions_are_exact() {
        let real = Tensor::from_vec(vec![4], vec![1.0, -2.0, 0.0, 1048576.0]).unwrap();
        let fixed = real.to_fixed();
        assert_eq!(fixed.data(), &[1, -2, 0, 1048576]);
        assert_eq!(fixed.to_real().data(), real.data());
    }
}

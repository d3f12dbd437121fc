//! Element types supported by the estimators.
//!
//! Every routine in this crate is generic over a [`Scalar`], which is implemented
//! for `f32` and `f64` only. The [`DType`] tag is the runtime counterpart used by
//! configuration layers (e.g. the `estimate` binary) that pick a precision by name.

use crate::error::{ErrorKind, SpectralError};
use faer::traits::RealField;
use num_traits::{Float, NumAssign};
use std::{fmt, iter::Sum, str::FromStr};

/// Runtime tag for the floating-point element type of an operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => f.write_str("f32"),
            DType::F64 => f.write_str("f64"),
        }
    }
}

impl FromStr for DType {
    type Err = SpectralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "f32" | "float32" | "single" => Ok(DType::F32),
            "f64" | "float64" | "double" => Ok(DType::F64),
            other => Err(ErrorKind::InvalidConfiguration(format!(
                "unsupported dtype '{other}': only 32- or 64-bit floating point is supported"
            ))
            .into()),
        }
    }
}

/// A real floating-point element type usable by `faer` and by generic float code.
///
/// `faer`'s [`RealField`] provides the dense kernels (products, QR, symmetric
/// eigendecomposition) while [`num_traits::Float`] provides scalar arithmetic.
pub trait Scalar:
    RealField + Float + NumAssign + Sum + Send + Sync + fmt::Debug + fmt::Display + 'static
{
    /// The runtime tag of this type.
    const DTYPE: DType;

    /// Lossy conversion from `f64` (rounds for `f32`).
    fn cast(value: f64) -> Self;

    /// Lossless widening to `f64`.
    fn widen(self) -> f64;

    /// Converts a count (sample size, dimension) into this type.
    #[inline]
    fn from_count(count: usize) -> Self {
        Self::cast(count as f64)
    }
}

impl Scalar for f32 {
    const DTYPE: DType = DType::F32;

    #[inline]
    fn cast(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn widen(self) -> f64 {
        self as f64
    }
}

impl Scalar for f64 {
    const DTYPE: DType = DType::F64;

    #[inline]
    fn cast(value: f64) -> Self {
        value
    }

    #[inline]
    fn widen(self) -> f64 {
        self
    }
}

//! Spectrum of the Lanczos tridiagonal model and its Gauss quadrature rule.
//!
//! For a starting vector `x`, the spectral measure of `A` seen from `x` is
//! approximated by a discrete measure supported on the Ritz values (the
//! eigenvalues `theta_i` of `T_k`), with weights given by the squared first
//! components of the eigenvectors of `T_k` (Golub-Welsch):
//!
//! $$ x^T f(A) x \approx \|x\|^2 \sum_i \tau_i f(\theta_i) $$
//!
//! The rule is exact for polynomials of degree up to `2k - 1`.

use super::LanczosDecomposition;
use crate::{
    error::{ErrorKind, SpectralError},
    scalar::Scalar,
};
use faer::{Mat, MatRef, Side};

/// All eigenpairs of a symmetric tridiagonal matrix `T_k`.
#[derive(Debug, Clone)]
pub struct TridiagonalSpectrum<T> {
    /// Eigenvalues in ascending order.
    pub eigenvalues: Vec<T>,
    /// Orthonormal eigenvectors, one per column, matching `eigenvalues`.
    pub eigenvectors: Mat<T>,
}

impl<T: Scalar> TridiagonalSpectrum<T> {
    /// Computes the eigendecomposition of `tridiag(alphas, offdiagonal)`.
    ///
    /// `offdiagonal` must have length `alphas.len() - 1`.
    pub fn from_coefficients(alphas: &[T], offdiagonal: &[T]) -> Result<Self, SpectralError> {
        let k = alphas.len();
        if offdiagonal.len() + 1 != k.max(1) {
            return Err(ErrorKind::InvalidConfiguration(format!(
                "tridiagonal of size {k} needs {} off-diagonal entries, got {}",
                k.saturating_sub(1),
                offdiagonal.len()
            ))
            .into());
        }
        let t_k = Mat::from_fn(k, k, |i, j| {
            if i == j {
                alphas[i]
            } else if i + 1 == j {
                offdiagonal[i]
            } else if j + 1 == i {
                offdiagonal[j]
            } else {
                T::zero()
            }
        });
        Self::from_dense(t_k.as_ref())
    }

    /// Computes the spectrum of the tridiagonal model produced by a Lanczos run.
    pub fn from_decomposition(decomposition: &LanczosDecomposition<T>) -> Result<Self, SpectralError> {
        Self::from_coefficients(&decomposition.alphas, decomposition.offdiagonal())
    }

    fn from_dense(t_k: MatRef<'_, T>) -> Result<Self, SpectralError> {
        let k = t_k.nrows();
        if k == 0 {
            return Ok(Self {
                eigenvalues: Vec::new(),
                eigenvectors: Mat::zeros(0, 0),
            });
        }
        let evd = t_k
            .self_adjoint_eigen(Side::Lower)
            .map_err(ErrorKind::EvdError)?;
        let eigenvalues = evd.S();
        Ok(Self {
            eigenvalues: (0..k).map(|i| eigenvalues[i]).collect(),
            eigenvectors: evd.U().to_owned(),
        })
    }

    pub fn len(&self) -> usize {
        self.eigenvalues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eigenvalues.is_empty()
    }

    /// The Golub-Welsch rule: nodes are the eigenvalues, weights the squared
    /// first eigenvector components.
    pub fn quadrature(&self) -> QuadratureRule<T> {
        let weights = (0..self.len())
            .map(|i| {
                let first = self.eigenvectors[(0, i)];
                first * first
            })
            .collect();
        QuadratureRule {
            nodes: self.eigenvalues.clone(),
            weights,
        }
    }
}

/// Gauss quadrature nodes and non-negative weights summing to one.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureRule<T> {
    pub nodes: Vec<T>,
    pub weights: Vec<T>,
}

impl<T: Scalar> QuadratureRule<T> {
    pub fn from_decomposition(decomposition: &LanczosDecomposition<T>) -> Result<Self, SpectralError> {
        Ok(TridiagonalSpectrum::from_decomposition(decomposition)?.quadrature())
    }

    /// Evaluates `sum_i w_i f(theta_i)`.
    pub fn integrate(&self, f: impl Fn(T) -> T) -> T {
        self.nodes
            .iter()
            .zip(&self.weights)
            .map(|(&node, &weight)| weight * f(node))
            .sum()
    }
}

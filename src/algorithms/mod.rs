//! Krylov-subspace building blocks.
//!
//! [`lanczos`] runs the symmetric Lanczos recurrence and produces a
//! [`LanczosDecomposition`], the tridiagonal model `T_k` of the operator
//! restricted to the Krylov subspace. [`quadrature`] turns that model into its
//! spectrum and the associated Gauss quadrature rule.

pub mod lanczos;
pub mod quadrature;

use crate::scalar::Scalar;
use faer::{Mat, MatMut, MatRef};
use num_traits::Float;

/// The scalar output of the Lanczos recurrence, defining `T_k`.
///
/// `alphas` holds the diagonal. `betas` has the same length `k`; its first
/// entry is always zero and `betas[1..]` is the off-diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct LanczosDecomposition<T> {
    /// The diagonal of `T_k`.
    pub alphas: Vec<T>,
    /// `[0, beta_1, ..., beta_{k-1}]`.
    pub betas: Vec<T>,
    /// The achieved degree `k`, at most the requested degree.
    pub steps_taken: usize,
    /// The norm of the starting vector.
    pub b_norm: T,
    /// `beta_k`, the norm of the residual left after the last step.
    pub residual_norm: T,
    /// `true` when the recurrence stopped early on an invariant subspace.
    pub breakdown: bool,
}

impl<T: Scalar> LanczosDecomposition<T> {
    /// The off-diagonal `beta_1, ..., beta_{k-1}` of `T_k`.
    pub fn offdiagonal(&self) -> &[T] {
        self.betas.get(1..).unwrap_or(&[])
    }

    /// Assembles the dense symmetric `k x k` tridiagonal matrix `T_k`.
    pub fn tridiagonal(&self) -> Mat<T> {
        let k = self.steps_taken;
        let mut t_k = Mat::<T>::zeros(k, k);
        for (i, &alpha) in self.alphas.iter().enumerate() {
            t_k[(i, i)] = alpha;
        }
        for (i, &beta) in self.offdiagonal().iter().enumerate() {
            t_k[(i, i + 1)] = beta;
            t_k[(i + 1, i)] = beta;
        }
        t_k
    }
}

/// The decomposition together with the retained orthonormal basis `Q_k`.
#[derive(Debug, Clone)]
pub struct LanczosOutput<T> {
    pub decomposition: LanczosDecomposition<T>,
    /// The `n x k` basis, or `None` when the ring buffer wrapped around.
    pub basis: Option<Mat<T>>,
}

#[inline]
pub(crate) fn column_dot<T: Scalar>(a: MatRef<'_, T>, ja: usize, b: MatRef<'_, T>, jb: usize) -> T {
    (0..a.nrows()).map(|i| a[(i, ja)] * b[(i, jb)]).sum()
}

#[inline]
pub(crate) fn column_norm<T: Scalar>(a: MatRef<'_, T>, j: usize) -> T {
    Float::sqrt(column_dot(a, j, a, j))
}

/// `y[:, jy] -= coeff * x[:, jx]`
#[inline]
pub(crate) fn column_sub_scaled<T: Scalar>(
    mut y: MatMut<'_, T>,
    jy: usize,
    coeff: T,
    x: MatRef<'_, T>,
    jx: usize,
) {
    for i in 0..y.nrows() {
        y[(i, jy)] -= coeff * x[(i, jx)];
    }
}

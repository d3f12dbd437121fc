//! XDiag: a one-shot sketching diagonal estimator.
//!
//! With a sketch `N` of `k = m / 2` isotropic columns, XDiag combines the
//! exact diagonal of the low-rank projection `Q Q^T A` (where `Q` is an
//! orthonormal basis of `A N`) with an exchangeable Girard-Hutchinson
//! correction of the residual `(I - Q Q^T) A`, using every sketch column both
//! to build the projection and, left out in turn, to debias it. The cost is
//! exactly `m` products with `A` or `A^T` and there is no convergence loop.
//!
//! The sketch is factored with column pivoting first. When it is numerically
//! rank deficient (always the case once it spans the range of a low-rank `A`),
//! the leave-one-out projections all coincide with `Q Q^T`, the correction
//! vanishes, and the estimate reduces to `diag(Q Q^T A)`: exact up to rounding
//! for symmetric `A`, at a cost of `k + rank` products.

use crate::{
    error::{ErrorKind, SpectralError},
    matrix::{LinearOperator, validate_square},
    random::{Distribution, IsotropicSource},
    scalar::Scalar,
};
use faer::{Mat, MatRef, Par, linalg::triangular_solve::solve_upper_triangular_in_place};
use log::debug;
use num_traits::Float;

/// Configuration of an XDiag run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XDiagOptions {
    /// Budget of operator products. Rounded up to an even number, capped at `2n`.
    pub matvecs: usize,
    pub distribution: Distribution,
    pub seed: Option<u64>,
}

impl Default for XDiagOptions {
    fn default() -> Self {
        Self {
            matvecs: 20,
            distribution: Distribution::Sphere,
            seed: None,
        }
    }
}

impl XDiagOptions {
    pub fn new(matvecs: usize) -> Self {
        Self {
            matvecs,
            ..Self::default()
        }
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// The diagonal estimate and the number of operator products spent on it
/// (`m` for a full-rank sketch, fewer when the sketch is rank deficient).
#[derive(Debug, Clone, PartialEq)]
pub struct XDiagEstimate<T> {
    pub diagonal: Vec<T>,
    pub num_matvecs: usize,
}

/// Row-wise inner products: `out[i] = sum_j a[i, j] * b[i, j]`.
fn row_dots<T: Scalar>(a: MatRef<'_, T>, b: MatRef<'_, T>) -> Vec<T> {
    (0..a.nrows())
        .map(|i| (0..a.ncols()).map(|j| a[(i, j)] * b[(i, j)]).sum())
        .collect()
}

/// Estimates `diag(A)` with `options.matvecs` products.
///
/// Fails with `InvalidOperator` for a non-square or empty operator and with
/// `InvalidConfiguration` for a zero budget.
pub fn xdiag<T, O>(operator: &O, options: &XDiagOptions) -> Result<XDiagEstimate<T>, SpectralError>
where
    T: Scalar,
    O: LinearOperator<T> + ?Sized,
{
    let n = validate_square::<T, O>(operator)?;
    if n == 0 {
        return Err(ErrorKind::InvalidOperator("XDiag needs a non-empty operator".to_string()).into());
    }
    let m = (options.matvecs + options.matvecs % 2).min(2 * n);
    let k = m / 2;
    if k == 0 {
        return Err(ErrorKind::InvalidConfiguration(
            "XDiag needs a budget of at least one product".to_string(),
        )
        .into());
    }
    let mut source = IsotropicSource::new(options.distribution, options.seed);
    let sketch = source.draw_matrix::<T>(n, k);
    let y = operator.apply(sketch.as_ref());

    // The column-pivoted factorization reveals the numerical rank of the sketch:
    // its diagonal is non-increasing in magnitude, so everything past the first
    // entry below `sqrt(eps) * |R_00|` is rounding noise.
    let pivoted = y.col_piv_qr();
    let rank = numerical_rank(pivoted.thin_R());
    debug!("XDiag with {m} products ({k} sketch columns, numerical rank {rank}) on dimension {n}");

    if rank < k {
        // Dropping any single sketch column leaves the span unchanged, so every
        // leave-one-out projection equals Q Q^T and every correction term
        // vanishes. The estimate is the diagonal of Q Q^T A, which is exact
        // when the sketch spans range(A).
        let basis = pivoted.compute_thin_Q();
        let q = basis.as_ref().get(.., 0..rank);
        let z = operator.apply_transpose(q);
        return Ok(XDiagEstimate {
            diagonal: row_dots(q, z.as_ref()),
            num_matvecs: k + rank,
        });
    }

    // Full rank: Y = A N = Q R, Z = A^T Q, T = Z^T N. R is well conditioned
    // enough to invert, which the rank check above guarantees.
    let qr = y.qr();
    let q = qr.compute_thin_Q();
    let r = qr.thin_R();
    let z = operator.apply_transpose(q.as_ref());
    let t = z.transpose() * sketch.as_ref();

    // Column j of S is row j of R^{-1}, scaled to unit length. Q S_j is then the
    // direction of y_j that is orthogonal to the other sketch columns.
    let mut r_inv = Mat::<T>::identity(k, k);
    solve_upper_triangular_in_place(r, r_inv.as_mut(), Par::Seq);
    let mut s = Mat::<T>::zeros(k, k);
    for j in 0..k {
        let norm = Float::sqrt((0..k).map(|l| r_inv[(j, l)] * r_inv[(j, l)]).sum::<T>());
        for l in 0..k {
            s[(l, j)] = r_inv[(j, l)] / norm;
        }
    }

    let qs = &q * &s;
    let zs = &z * &s;
    let qt = &q * &t;
    let st: Vec<T> = (0..k)
        .map(|j| (0..k).map(|l| s[(l, j)] * t[(l, j)]).sum())
        .collect();
    let qsst = Mat::from_fn(n, k, |i, j| qs[(i, j)] * st[j]);

    // The projected part diag(Q Q^T A) is exact; the four remaining terms are
    // the exchangeable Girard-Hutchinson correction of the residual, averaged
    // over the k leave-one-out projections.
    let d_qz = row_dots(q.as_ref(), z.as_ref());
    let d_qssz = row_dots(qs.as_ref(), zs.as_ref());
    let d_ny = row_dots(sketch.as_ref(), y.as_ref());
    let d_nqt = row_dots(sketch.as_ref(), qt.as_ref());
    let d_nqsst = row_dots(sketch.as_ref(), qsst.as_ref());

    let inv_k = T::one() / T::from_count(k);
    let diagonal = (0..n)
        .map(|i| d_qz[i] + (d_ny[i] - d_qssz[i] - d_nqt[i] + d_nqsst[i]) * inv_k)
        .collect();

    Ok(XDiagEstimate {
        diagonal,
        num_matvecs: 2 * k,
    })
}

/// Number of diagonal entries of a column-pivoted `R` above `sqrt(eps) * |R_00|`.
fn numerical_rank<T: Scalar>(r: MatRef<'_, T>) -> usize {
    let k = r.nrows().min(r.ncols());
    if k == 0 {
        return 0;
    }
    let lead = Float::abs(r[(0, 0)]);
    if !(lead > T::zero()) {
        return 0;
    }
    let cutoff = Float::sqrt(<T as Float>::epsilon()) * lead;
    (0..k)
        .take_while(|&i| Float::abs(r[(i, i)]) > cutoff)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};
    use rand_distr::{Distribution as _, StandardNormal};

    fn low_rank(n: usize, rank: usize, seed: u64) -> Mat<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let m: Mat<f64> = Mat::from_fn(n, rank, |_, _| StandardNormal.sample(&mut rng));
        &m * m.transpose()
    }

    fn assert_close(estimate: &[f64], a: &Mat<f64>, tol: f64) {
        for (i, value) in estimate.iter().enumerate() {
            assert!(value.is_finite(), "entry {i} is not finite: {value}");
            assert!(
                (value - a[(i, i)]).abs() < tol * (1.0 + a[(i, i)].abs()),
                "entry {i}: {value} vs {}",
                a[(i, i)]
            );
        }
    }

    #[test]
    fn test_budget_is_rounded_and_capped() {
        let a = Mat::from_fn(6, 6, |i, j| {
            if i == j {
                3.0 + i as f64
            } else if i.abs_diff(j) == 1 {
                0.5
            } else {
                0.0
            }
        });
        let estimate = xdiag(&a, &XDiagOptions::new(5).with_seed(0)).unwrap();
        assert_eq!(estimate.num_matvecs, 6);
        assert!(estimate.diagonal.iter().all(|x| x.is_finite()));
        let estimate = xdiag(&a, &XDiagOptions::new(100).with_seed(0)).unwrap();
        assert_eq!(estimate.num_matvecs, 12);
        assert_eq!(estimate.diagonal.len(), 6);
        assert!(estimate.diagonal.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_exact_when_sketch_spans_range() {
        let a = low_rank(30, 3, 7);
        for distribution in [Distribution::Sphere, Distribution::Normal, Distribution::Rademacher] {
            let options = XDiagOptions::new(10).with_seed(11).with_distribution(distribution);
            let estimate = xdiag(&a, &options).unwrap();
            assert_close(&estimate.diagonal, &a, 1e-8);
        }
    }

    #[test]
    fn test_wide_sketches_of_low_rank_operators_stay_exact() {
        let a = low_rank(30, 3, 7);
        for m in [8, 12, 20, 30, 40, 60] {
            let estimate = xdiag(&a, &XDiagOptions::new(m).with_seed(11)).unwrap();
            assert_close(&estimate.diagonal, &a, 1e-8);
            assert_eq!(estimate.num_matvecs, m / 2 + 3);
        }
    }

    #[test]
    fn test_zero_operator_gives_zero_diagonal() {
        let zero = Mat::<f64>::zeros(5, 5);
        let estimate = xdiag(&zero, &XDiagOptions::new(4).with_seed(1)).unwrap();
        assert_eq!(estimate.diagonal, vec![0.0; 5]);
        assert_eq!(estimate.num_matvecs, 2);
    }

    #[test]
    fn test_invalid_inputs() {
        let empty = Mat::<f64>::zeros(0, 0);
        let err = xdiag(&empty, &XDiagOptions::new(4)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidOperator(_)));

        let a = low_rank(4, 2, 3);
        let err = xdiag(&a, &XDiagOptions::new(0)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidConfiguration(_)));
    }
}

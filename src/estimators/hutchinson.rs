//! Girard-Hutchinson estimators.
//!
//! For isotropic probes `v` (`E[v v^T] = I`), `v^T A v` is an unbiased sample of
//! `tr(A)` and `v ⊙ A v` one of `diag(A)`. Both estimators are self-normalized:
//! the accumulated numerator is divided by the accumulated `v^T v` (resp.
//! `v ⊙ v`), which removes the distribution's scale and, for Rademacher
//! probes, the variance contributed by the diagonal.

use super::{
    Estimate, HutchinsonOptions, ProgressCallback, Sample, into_scalar, into_vec, monte_carlo,
};
use crate::{
    algorithms::column_dot,
    error::SpectralError,
    matrix::{LinearOperator, validate_square},
    scalar::Scalar,
};
use faer::Mat;

/// Estimates `tr(A)`.
///
/// # Arguments
/// * `operator`: A square symmetric operator. An empty operator yields `0`
///   with status [`Empty`](super::EstimatorStatus::Empty).
/// * `options`: Sampling budget, distribution, seed and stopping rule.
/// * `callback`: Optional observer called after every probe.
///
/// Fails with `InvalidOperator` if a probe's image contains NaN or infinite
/// entries, as a [`MatrixFunction`](crate::MatrixFunction) produces for
/// columns it could not evaluate.
///
/// # Example
///
/// ```
/// use faer::Mat;
/// use stochastic_lanczos::estimators::{HutchinsonOptions, hutchinson};
///
/// let a = Mat::<f64>::from_fn(50, 50, |i, j| if i == j { 1.0 + i as f64 } else { 0.0 });
/// let options = HutchinsonOptions::new().with_seed(0).with_maxiter(10);
/// let result = hutchinson::trace(&a, &options, None).unwrap();
/// // Rademacher probes are exact on diagonal matrices.
/// assert!((result.estimate - 1275.0).abs() < 1e-9);
/// ```
pub fn trace<T, O>(
    operator: &O,
    options: &HutchinsonOptions,
    callback: Option<ProgressCallback<'_, T>>,
) -> Result<Estimate<T>, SpectralError>
where
    T: Scalar,
    O: LinearOperator<T> + Sync + ?Sized,
{
    let n = validate_square::<T, O>(operator)?;
    let run = monte_carlo(
        n,
        1,
        T::from_count(n),
        options,
        || (),
        |_, probe| -> Result<Sample<T>, SpectralError> {
            let image = operator.apply(probe);
            let numer = column_dot(probe, 0, image.as_ref(), 0);
            let denom = column_dot(probe, 0, probe, 0);
            Ok((Mat::from_fn(1, 1, |_, _| numer), Mat::from_fn(1, 1, |_, _| denom)))
        },
        callback,
    )?;
    Ok(into_scalar(run))
}

/// Estimates `diag(A)`, returned as a vector of length `n`.
///
/// Non-finite samples are rejected as in [`trace`].
pub fn diag<T, O>(
    operator: &O,
    options: &HutchinsonOptions,
    callback: Option<ProgressCallback<'_, T>>,
) -> Result<Estimate<Vec<T>>, SpectralError>
where
    T: Scalar,
    O: LinearOperator<T> + Sync + ?Sized,
{
    let n = validate_square::<T, O>(operator)?;
    let run = monte_carlo(
        n,
        n,
        T::one(),
        options,
        || (),
        |_, probe| -> Result<Sample<T>, SpectralError> {
            let image = operator.apply(probe);
            Ok((
                Mat::from_fn(n, 1, |i, _| probe[(i, 0)] * image[(i, 0)]),
                Mat::from_fn(n, 1, |i, _| probe[(i, 0)] * probe[(i, 0)]),
            ))
        },
        callback,
    )?;
    Ok(into_vec(run))
}

//! Stochastic Lanczos quadrature.
//!
//! Estimates `tr(f(A))` by combining Girard-Hutchinson sampling with the Gauss
//! quadrature rule of one Lanczos run per probe: every probe `v` contributes
//! `v^T f(A) v ≈ ‖v‖^2 Σ τ_i f(θ_i)`. Each worker owns a
//! [`LanczosWorkspace`](crate::algorithms::lanczos::LanczosWorkspace), which
//! is cleared before every run.

use super::{Estimate, HutchinsonOptions, ProgressCallback, Sample, into_scalar, monte_carlo};
use crate::{
    algorithms::column_dot,
    error::SpectralError,
    matrix::LinearOperator,
    matrix_function::MatrixFunction,
    scalar::Scalar,
};
use faer::Mat;

/// Estimates `tr(f(A))` for the function and Krylov settings of `function`.
///
/// # Example
///
/// ```
/// use faer::Mat;
/// use stochastic_lanczos::{
///     estimators::{HutchinsonOptions, slq},
///     matrix_function::{BuiltinFunction, MatrixFunction},
/// };
///
/// let a = Mat::<f64>::from_fn(30, 30, |i, j| if i == j { 1.0 + i as f64 / 10.0 } else { 0.0 });
/// let log_a = MatrixFunction::new(&a, BuiltinFunction::Log, 15).unwrap();
/// let options = HutchinsonOptions::new().with_seed(4).with_maxiter(50);
/// let logdet = slq::trace(&log_a, &options, None).unwrap();
/// let exact: f64 = (0..30).map(|i| (1.0 + i as f64 / 10.0).ln()).sum();
/// assert!((logdet.estimate - exact).abs() < 1e-6 * exact);
/// ```
pub fn trace<T, O>(
    function: &MatrixFunction<'_, T, O>,
    options: &HutchinsonOptions,
    callback: Option<ProgressCallback<'_, T>>,
) -> Result<Estimate<T>, SpectralError>
where
    T: Scalar,
    O: LinearOperator<T> + Sync + ?Sized,
{
    let n = LinearOperator::nrows(function);
    let run = monte_carlo(
        n,
        1,
        T::from_count(n),
        options,
        || function.new_workspace(),
        |workspace, probe| -> Result<Sample<T>, SpectralError> {
            let numer = function.quad_with(probe, workspace)?;
            let denom = column_dot(probe, 0, probe, 0);
            Ok((Mat::from_fn(1, 1, |_, _| numer), Mat::from_fn(1, 1, |_, _| denom)))
        },
        callback,
    )?;
    Ok(into_scalar(run))
}

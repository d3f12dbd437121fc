//! Randomized estimators of traces and diagonals.
//!
//! - [`hutchinson`]: Girard-Hutchinson trace and diagonal estimators of any
//!   [`LinearOperator`](crate::matrix::LinearOperator), including a
//!   [`MatrixFunction`](crate::matrix_function::MatrixFunction).
//! - [`slq`]: stochastic Lanczos quadrature for `tr(f(A))`.
//! - [`xdiag`]: the one-shot sketching diagonal estimator.
//!
//! The iterative estimators share one Monte-Carlo loop. Probe `i` is drawn
//! from its own sub-stream `derive_seed(seed, i)`, so the sequence of samples,
//! and therefore the result, does not depend on the number of worker threads.

pub mod convergence;
pub mod hutchinson;
pub mod slq;
pub mod xdiag;

use self::convergence::ConvergenceMode;
use crate::{
    error::{ErrorKind, SpectralError},
    random::{Distribution, IsotropicSource, derive_seed, random_seed},
    scalar::Scalar,
};
use faer::{Mat, MatRef};
use log::{debug, trace};
use rayon::prelude::*;

/// Sampling configuration shared by the iterative estimators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HutchinsonOptions {
    /// Maximum number of probe vectors.
    pub maxiter: usize,
    pub distribution: Distribution,
    /// Base seed; `None` draws a fresh one for every call.
    pub seed: Option<u64>,
    pub convergence: ConvergenceMode,
    /// Worker threads. `1` samples on the calling thread.
    pub num_threads: usize,
    /// Record every intermediate estimate in [`Estimate::history`].
    pub full: bool,
}

impl Default for HutchinsonOptions {
    fn default() -> Self {
        Self {
            maxiter: 200,
            distribution: Distribution::Rademacher,
            seed: None,
            convergence: ConvergenceMode::default(),
            num_threads: 1,
            full: false,
        }
    }
}

impl HutchinsonOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_maxiter(mut self, maxiter: usize) -> Self {
        self.maxiter = maxiter;
        self
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_convergence(mut self, convergence: ConvergenceMode) -> Self {
        self.convergence = convergence;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_full(mut self, full: bool) -> Self {
        self.full = full;
        self
    }

    fn validate(&self) -> Result<(), SpectralError> {
        if self.maxiter == 0 {
            return Err(ErrorKind::InvalidConfiguration("maxiter must be positive".to_string()).into());
        }
        if self.num_threads == 0 {
            return Err(
                ErrorKind::InvalidConfiguration("num_threads must be positive".to_string()).into(),
            );
        }
        Ok(())
    }
}

/// Where an estimator stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorStatus {
    /// More samples are being drawn.
    Sampling,
    /// The convergence criterion was met.
    Converged,
    /// `maxiter` samples were drawn without meeting the criterion.
    BudgetExhausted,
    /// The operator has dimension zero; nothing was sampled.
    Empty,
}

/// The result of an iterative estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate<E> {
    pub estimate: E,
    pub status: EstimatorStatus,
    /// Number of probe vectors consumed.
    pub num_samples: usize,
    /// Every intermediate estimate, when [`HutchinsonOptions::full`] is set.
    pub history: Vec<E>,
}

impl<E> Estimate<E> {
    pub fn converged(&self) -> bool {
        self.status == EstimatorStatus::Converged
    }

    fn map<F, R>(self, f: F) -> Estimate<R>
    where
        F: Fn(E) -> R,
    {
        Estimate {
            estimate: f(self.estimate),
            status: self.status,
            num_samples: self.num_samples,
            history: self.history.into_iter().map(f).collect(),
        }
    }
}

/// The partial state passed to a progress callback after every sample.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a, T> {
    /// Number of samples drawn so far (1-based).
    pub iteration: usize,
    /// Current estimate as a column: `1 x 1` for traces, `n x 1` for diagonals.
    pub estimate: MatRef<'a, T>,
    pub status: EstimatorStatus,
}

/// A caller-supplied observer of the sampling loop.
pub type ProgressCallback<'c, T> = &'c mut dyn FnMut(&Progress<'_, T>);

/// One probe's contribution: the numerator and denominator increments.
type Sample<T> = (Mat<T>, Mat<T>);

/// The shared self-normalized Monte-Carlo loop.
///
/// `sample` maps an `n x 1` probe to `(numerator, denominator)` increments of
/// length `len`; `init` builds the per-worker scratch state it needs. The
/// estimate after `m` samples is `scale * sum(numerator) / sum(denominator)`
/// entrywise, and the criterion is fed the raw numerator increments.
pub(crate) fn monte_carlo<T, W, I, S>(
    n: usize,
    len: usize,
    scale: T,
    options: &HutchinsonOptions,
    init: I,
    sample: S,
    mut callback: Option<ProgressCallback<'_, T>>,
) -> Result<Estimate<Mat<T>>, SpectralError>
where
    T: Scalar,
    I: Fn() -> W + Sync + Send,
    S: Fn(&mut W, MatRef<'_, T>) -> Result<Sample<T>, SpectralError> + Sync + Send,
{
    options.validate()?;
    if n == 0 {
        debug!("empty operator, returning a zero estimate");
        return Ok(Estimate {
            estimate: Mat::zeros(len, 1),
            status: EstimatorStatus::Empty,
            num_samples: 0,
            history: Vec::new(),
        });
    }

    let base_seed = options.seed.unwrap_or_else(random_seed);
    let distribution = options.distribution;
    let draw = |index: usize| {
        IsotropicSource::new(distribution, Some(derive_seed(base_seed, index as u64))).draw::<T>(n)
    };
    let run_sample = |state: &mut W, index: usize| sample(state, draw(index).as_ref());

    let pool = if options.num_threads > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.num_threads)
            .build()
            .map_err(|e| ErrorKind::InvalidConfiguration(format!("cannot build thread pool: {e}")))?;
        Some(pool)
    } else {
        None
    };
    let mut local_state = None;

    let mut criterion = options.convergence.criterion::<T>(len, options.maxiter)?;
    let mut numerator = Mat::<T>::zeros(len, 1);
    let mut denominator = Mat::<T>::zeros(len, 1);
    let mut estimate = Mat::<T>::zeros(len, 1);
    let mut history = Vec::new();
    let mut count = 0;
    let mut status = EstimatorStatus::BudgetExhausted;

    'sampling: while count < options.maxiter {
        let end = (count + options.num_threads).min(options.maxiter);
        let batch: Vec<Sample<T>> = match &pool {
            Some(pool) => pool.install(|| {
                (count..end)
                    .into_par_iter()
                    .map_init(&init, |state, index| run_sample(state, index))
                    .collect::<Result<Vec<_>, _>>()
            })?,
            None => {
                let state = local_state.get_or_insert_with(&init);
                (count..end)
                    .map(|index| run_sample(state, index))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        // Samples are merged in probe order; the surplus of a batch that
        // overshoots convergence is discarded.
        for (numer, denom) in batch {
            count += 1;
            // NaN or infinite samples are rejected.
            if (0..len).any(|i| !numer[(i, 0)].widen().is_finite()) {
                return Err(ErrorKind::InvalidOperator(format!(
                    "sample {count} produced a non-finite value"
                ))
                .into());
            }
            for i in 0..len {
                numerator[(i, 0)] += numer[(i, 0)];
                denominator[(i, 0)] += denom[(i, 0)];
                estimate[(i, 0)] = if denominator[(i, 0)] == T::zero() {
                    T::zero()
                } else {
                    scale * numerator[(i, 0)] / denominator[(i, 0)]
                };
            }
            criterion.update(numer.as_ref());
            if options.full {
                history.push(estimate.clone());
            }
            let converged = criterion.converged();
            trace!("sample {count}: converged = {converged}");

            if let Some(cb) = callback.as_deref_mut() {
                let current = if converged {
                    EstimatorStatus::Converged
                } else if count == options.maxiter {
                    EstimatorStatus::BudgetExhausted
                } else {
                    EstimatorStatus::Sampling
                };
                cb(&Progress {
                    iteration: count,
                    estimate: estimate.as_ref(),
                    status: current,
                });
            }
            if converged {
                status = EstimatorStatus::Converged;
                break 'sampling;
            }
        }
    }

    debug!("sampling finished after {count} probes with status {status:?}");
    Ok(Estimate {
        estimate,
        status,
        num_samples: count,
        history,
    })
}

/// Collapses a `1 x 1` estimate into a scalar.
fn into_scalar<T: Scalar>(estimate: Estimate<Mat<T>>) -> Estimate<T> {
    estimate.map(|m| m[(0, 0)])
}

/// Collapses an `n x 1` estimate into a vector.
fn into_vec<T: Scalar>(estimate: Estimate<Mat<T>>) -> Estimate<Vec<T>> {
    estimate.map(|m| (0..m.nrows()).map(|i| m[(i, 0)]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_sample(
        _: &mut (),
        probe: MatRef<'_, f64>,
    ) -> Result<Sample<f64>, SpectralError> {
        let ones = Mat::from_fn(1, 1, |_, _| 2.0 * probe.nrows() as f64);
        Ok((ones.clone(), Mat::from_fn(1, 1, |_, _| probe.nrows() as f64)))
    }

    #[test]
    fn test_count_mode_draws_exactly_maxiter_samples() {
        let options = HutchinsonOptions::new()
            .with_maxiter(7)
            .with_seed(1)
            .with_convergence(ConvergenceMode::Count)
            .with_full(true);
        let mut seen = Vec::new();
        let mut callback = |p: &Progress<'_, f64>| seen.push((p.iteration, p.status));
        let run = monte_carlo(4, 1, 1.0, &options, || (), constant_sample, Some(&mut callback))
            .unwrap();
        assert_eq!(run.num_samples, 7);
        assert_eq!(run.status, EstimatorStatus::Converged);
        assert_eq!(run.history.len(), 7);
        assert_eq!(run.estimate[(0, 0)], 2.0);
        assert_eq!(seen.len(), 7);
        assert_eq!(seen[0], (1, EstimatorStatus::Sampling));
        assert_eq!(seen[6], (7, EstimatorStatus::Converged));
    }

    #[test]
    fn test_empty_operator_short_circuits() {
        let options = HutchinsonOptions::new().with_seed(3);
        let run = monte_carlo(0, 1, 1.0, &options, || (), constant_sample, None).unwrap();
        assert_eq!(run.status, EstimatorStatus::Empty);
        assert_eq!(run.num_samples, 0);
        assert_eq!(run.estimate[(0, 0)], 0.0);
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let options = HutchinsonOptions::new().with_maxiter(0);
        let err = monte_carlo(3, 1, 1.0, &options, || (), constant_sample, None).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidConfiguration(_)));
    }

    #[test]
    fn test_non_finite_sample_is_an_error() {
        let options = HutchinsonOptions::new()
            .with_seed(2)
            .with_maxiter(10)
            .with_convergence(ConvergenceMode::Count);
        let nan_on_third = |seen: &mut usize, _: MatRef<'_, f64>| -> Result<Sample<f64>, SpectralError> {
            *seen += 1;
            let value = if *seen == 3 { f64::NAN } else { 1.0 };
            Ok((Mat::from_fn(1, 1, |_, _| value), Mat::from_fn(1, 1, |_, _| 1.0)))
        };
        let err = monte_carlo(4, 1, 1.0, &options, || 0usize, nan_on_third, None).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::InvalidOperator("sample 3 produced a non-finite value".to_string())
        );
    }

    #[test]
    fn test_constant_samples_converge_after_two() {
        let options = HutchinsonOptions::new().with_seed(9).with_num_threads(3);
        let run = monte_carlo(5, 1, 1.0, &options, || (), constant_sample, None).unwrap();
        assert_eq!(run.status, EstimatorStatus::Converged);
        assert_eq!(run.num_samples, 2);
    }
}

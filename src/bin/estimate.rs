//! Command-line driver for the randomized estimators.
//!
//! Builds a dense symmetric test operator `A = Q diag(λ) Q^T` with a known,
//! linearly spaced spectrum and a random orthogonal `Q`, runs one estimator on
//! it, and reports the estimate against the exact answer. With `--output`, the
//! running estimate after every probe is streamed to a CSV file.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use faer::{Mat, MatRef};
use serde::Serialize;
use std::{fs::File, path::PathBuf, time::Instant};
use stochastic_lanczos::{
    BuiltinFunction, ConvergenceMode, DType, Distribution, EstimatorStatus, HutchinsonOptions,
    IsotropicSource, MatrixFunction, Progress, Scalar, XDiagOptions, hutchinson, slq, xdiag,
};

/// The quantity to estimate.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum Kind {
    /// `tr(A)` with Girard-Hutchinson.
    Trace,
    /// `diag(A)` with Girard-Hutchinson.
    Diag,
    /// `tr(f(A))` with stochastic Lanczos quadrature.
    Slq,
    /// `diag(A)` with the XDiag sketch.
    Xdiag,
}

/// The stopping rule of the iterative estimators.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum StoppingRule {
    Count,
    Confidence,
}

#[derive(Parser, Debug)]
#[clap(
    name = "estimate",
    about = "Runs a randomized trace or diagonal estimator on a synthetic symmetric operator."
)]
struct EstimateArgs {
    #[clap(long, value_enum, default_value_t = Kind::Trace)]
    kind: Kind,
    /// Element type: f32 or f64.
    #[clap(long, default_value = "f64")]
    dtype: DType,
    /// Dimension of the test operator.
    #[clap(long, default_value_t = 200)]
    n: usize,
    /// Smallest eigenvalue of the test operator.
    #[clap(long, default_value_t = 1.0)]
    min_eig: f64,
    /// Largest eigenvalue of the test operator.
    #[clap(long, default_value_t = 100.0)]
    max_eig: f64,
    /// Spectral function for `slq`: identity, abs, sqrt, log, inv, exp or numrank[:threshold].
    #[clap(long, default_value = "log")]
    function: BuiltinFunction,
    /// Krylov degree for `slq`.
    #[clap(long, default_value_t = 20)]
    degree: usize,
    /// Re-orthogonalization depth for `slq`.
    #[clap(long, default_value_t = 0)]
    orth: usize,
    /// Probe distribution: rademacher, normal or sphere.
    #[clap(long, default_value = "rademacher")]
    distribution: Distribution,
    /// Sampling budget (operator products for `xdiag`).
    #[clap(long, default_value_t = 200)]
    maxiter: usize,
    #[clap(long, value_enum, default_value_t = StoppingRule::Confidence)]
    convergence: StoppingRule,
    #[clap(long, default_value_t = 0.95)]
    confidence: f64,
    #[clap(long, default_value_t = 0.0)]
    atol: f64,
    #[clap(long, default_value_t = 0.01)]
    rtol: f64,
    #[clap(long, default_value_t = 1)]
    threads: usize,
    /// Seed for the probes and for the test operator.
    #[clap(long, default_value_t = 42)]
    seed: u64,
    /// Optional CSV file receiving the running estimate after every probe.
    #[clap(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

/// One row of the convergence trace.
#[derive(Debug, Serialize)]
struct ProgressRecord {
    iteration: usize,
    estimate: f64,
    relative_error: f64,
    status: String,
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    let args = EstimateArgs::parse();
    log::info!("Starting estimator run with parameters: {:?}", &args);

    match args.dtype {
        DType::F32 => run::<f32>(&args),
        DType::F64 => run::<f64>(&args),
    }
}

/// Builds `Q diag(λ) Q^T` and returns it with its eigenvalues.
fn test_operator<T: Scalar>(args: &EstimateArgs) -> (Mat<T>, Vec<T>) {
    let n = args.n;
    let step = if n > 1 {
        (args.max_eig - args.min_eig) / (n - 1) as f64
    } else {
        0.0
    };
    let eigs: Vec<T> = (0..n)
        .map(|i| T::cast(args.min_eig + step * i as f64))
        .collect();

    let mut source = IsotropicSource::new(Distribution::Normal, Some(args.seed ^ 0x5eed));
    let gaussian = source.draw_matrix::<T>(n, n);
    let q = gaussian.qr().compute_thin_Q();
    let scaled = Mat::from_fn(n, n, |i, j| q[(i, j)] * eigs[j]);
    (&scaled * q.transpose(), eigs)
}

fn relative_error(estimate: f64, exact: f64) -> f64 {
    if exact == 0.0 {
        estimate.abs()
    } else {
        (estimate - exact).abs() / exact.abs()
    }
}

fn diagonal_error<T: Scalar>(estimate: MatRef<'_, T>, exact: &[f64]) -> f64 {
    let (num, den) = exact
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, &d)| {
            let diff = estimate[(i, 0)].widen() - d;
            (num + diff * diff, den + d * d)
        });
    if den == 0.0 {
        num.sqrt()
    } else {
        (num / den).sqrt()
    }
}

fn run<T: Scalar>(args: &EstimateArgs) -> Result<()> {
    let (a, eigs) = test_operator::<T>(args);
    let exact_diag: Vec<f64> = (0..args.n).map(|i| a[(i, i)].widen()).collect();

    let convergence = match args.convergence {
        StoppingRule::Count => ConvergenceMode::Count,
        StoppingRule::Confidence => ConvergenceMode::Confidence {
            confidence: args.confidence,
            atol: args.atol,
            rtol: args.rtol,
        },
    };
    let options = HutchinsonOptions::new()
        .with_maxiter(args.maxiter)
        .with_distribution(args.distribution)
        .with_seed(args.seed)
        .with_convergence(convergence)
        .with_num_threads(args.threads);

    let mut writer = match &args.output {
        Some(path) => Some(csv::Writer::from_writer(
            File::create(path).with_context(|| format!("Failed to create output file: {path:?}"))?,
        )),
        None => None,
    };
    let mut write_error = None;
    let mut record = |row: ProgressRecord| {
        if let Some(w) = writer.as_mut() {
            if let Err(e) = w.serialize(row) {
                write_error.get_or_insert(e);
            }
        }
    };

    let start = Instant::now();
    let (estimate, exact, num_samples, status) = match args.kind {
        Kind::Trace | Kind::Slq => {
            let f_a = MatrixFunction::new(&a, args.function, args.degree)?.with_orth(args.orth);
            let exact: f64 = match args.kind {
                Kind::Trace => eigs.iter().map(|x| x.widen()).sum(),
                _ => eigs.iter().map(|&x| f_a.eval(x).widen()).sum(),
            };
            let mut callback = |p: &Progress<'_, T>| {
                let value = p.estimate[(0, 0)].widen();
                record(ProgressRecord {
                    iteration: p.iteration,
                    estimate: value,
                    relative_error: relative_error(value, exact),
                    status: format!("{:?}", p.status),
                });
            };
            let result = if args.kind == Kind::Trace {
                hutchinson::trace(&a, &options, Some(&mut callback))?
            } else {
                slq::trace(&f_a, &options, Some(&mut callback))?
            };
            (result.estimate.widen(), exact, result.num_samples, result.status)
        }
        Kind::Diag => {
            let mut callback = |p: &Progress<'_, T>| {
                let err = diagonal_error(p.estimate, &exact_diag);
                record(ProgressRecord {
                    iteration: p.iteration,
                    estimate: err,
                    relative_error: err,
                    status: format!("{:?}", p.status),
                });
            };
            let result = hutchinson::diag(&a, &options, Some(&mut callback))?;
            let column = Mat::from_fn(args.n, 1, |i, _| result.estimate[i]);
            let err = diagonal_error(column.as_ref(), &exact_diag);
            (err, 0.0, result.num_samples, result.status)
        }
        Kind::Xdiag => {
            let xdiag_options = XDiagOptions::new(args.maxiter)
                .with_distribution(args.distribution)
                .with_seed(args.seed);
            let result = xdiag(&a, &xdiag_options)?;
            let column = Mat::from_fn(args.n, 1, |i, _| result.diagonal[i]);
            let err = diagonal_error(column.as_ref(), &exact_diag);
            record(ProgressRecord {
                iteration: result.num_matvecs,
                estimate: err,
                relative_error: err,
                status: format!("{:?}", EstimatorStatus::Converged),
            });
            (err, 0.0, result.num_matvecs, EstimatorStatus::Converged)
        }
    };
    let elapsed = start.elapsed();

    if let Some(e) = write_error {
        return Err(e).context("Failed to write progress record");
    }
    if let Some(mut w) = writer {
        w.flush().context("Failed to flush output file")?;
    }

    match args.kind {
        Kind::Trace | Kind::Slq => log::info!(
            "{:?} ({}): estimate {estimate:.6e}, exact {exact:.6e}, relative error {:.3e}",
            args.kind,
            T::DTYPE,
            relative_error(estimate, exact)
        ),
        Kind::Diag | Kind::Xdiag => log::info!(
            "{:?} ({}): relative l2 error of the diagonal {estimate:.3e}",
            args.kind,
            T::DTYPE
        ),
    }
    log::info!(
        "{num_samples} samples, status {status:?}, {:.3}s",
        elapsed.as_secs_f64()
    );
    Ok(())
}

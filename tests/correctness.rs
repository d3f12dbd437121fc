//! Integration test suite for the Krylov building blocks and the randomized estimators.
//!
//! # Test Methodology
//!
//! Every check compares an approximation against a ground truth that is known in closed
//! form or computed by a dense eigendecomposition:
//! 1.  **Construct a Test Problem:** either a diagonal operator, for which `f(A)` is `f`
//!     applied to the diagonal, or a Gram matrix `A = M M^T` with a controlled rank.
//! 2.  **Compute the Ground Truth:** `f(A) b`, `tr(A)`, `diag(A)` or the extreme eigenvalues
//!     are computed directly from the construction.
//! 3.  **Run the Method:** a Lanczos run, a matrix function, or an estimator.
//! 4.  **Verify Accuracy:** the error is asserted to lie within a tolerance that reflects
//!     whether the method is exact (polynomials of low degree, invariant subspaces, low
//!     rank sketches) or approximate.

use anyhow::{Result, anyhow, ensure};
use faer::{
    Mat, MatRef, Side,
    sparse::{SparseColMat, Triplet},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution as _, StandardNormal};
use stochastic_lanczos::{
    BuiltinFunction, ConvergenceMode, Distribution, EstimatorStatus, HutchinsonOptions,
    IsotropicSource, LanczosOptions, LanczosWorkspace, MatrixFunction, SpectralFunction,
    TridiagonalSpectrum, XDiagOptions, hutchinson, lanczos, lanczos_recurrence, slq, xdiag,
};

/// A tolerance for the relative error against the ground truth for non-polynomial functions.
///
/// The Krylov approximation of `f(A) b` is only as good as the best polynomial of degree
/// `k-1` approximating `f` on the spectrum of `A`, so a small error remains.
const APPROX_TOLERANCE: f64 = 1e-3;

/// A tighter tolerance for polynomial functions where the method should be nearly exact.
///
/// If `f` is a polynomial of degree `d < k`, then `f(A) b` lies in `K_k(A, b)` and the
/// Lanczos approximation reproduces it up to rounding.
const EXACT_TOLERANCE: f64 = 1e-10;

/// Creates a test problem with a diagonal sparse matrix and a random vector `b`.
///
/// The eigenvalues are `1, 2, ..., n`, so `f(A) b` is simply `f(λ_i) b_i` componentwise.
/// A random `b` touches every eigenspace, which keeps the Krylov subspace rich.
fn create_diagonal_problem(n: usize) -> (SparseColMat<usize, f64>, Mat<f64>, Vec<f64>) {
    let mut triplets = Vec::with_capacity(n);
    let mut eigs = Vec::with_capacity(n);

    for i in 0..n {
        let val = (i + 1) as f64;
        triplets.push(Triplet {
            row: i,
            col: i,
            val,
        });
        eigs.push(val);
    }
    let a = SparseColMat::try_new_from_triplets(n, n, &triplets).unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    let b = Mat::from_fn(n, 1, |_, _| rng.random());

    (a, b, eigs)
}

/// A random `n x r` Gaussian factor `M`, returned with the Gram matrix `M M^T`.
fn gram_problem(n: usize, rank: usize, seed: u64) -> (Mat<f64>, Mat<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let m = Mat::from_fn(n, rank, |_, _| StandardNormal.sample(&mut rng));
    let a = &m * m.transpose();
    (m, a)
}

fn gaussian_vector(n: usize, seed: u64) -> Mat<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Mat::from_fn(n, 1, |_, _| StandardNormal.sample(&mut rng))
}

fn dense_eigenvalues(a: MatRef<'_, f64>) -> Result<Vec<f64>> {
    let evd = a
        .self_adjoint_eigen(Side::Lower)
        .map_err(|e| anyhow!("EVD failed: {:?}", e))?;
    let s = evd.S();
    Ok((0..a.nrows()).map(|i| s[i]).collect())
}

fn extremes(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// A macro to generate the boilerplate for each matrix-function accuracy test.
///
/// 1. Build the diagonal problem with `n = 100` and use Krylov degree `k = 30`.
/// 2. Compute the analytical ground truth `x_true = f(A) b`.
/// 3. Approximate `f(A) b` with a fully re-orthogonalized [`MatrixFunction`].
/// 4. Check the relative error, and that the quadratic form agrees with `b^T x_true`.
macro_rules! generate_correctness_test {
    ($test_name:ident, $function:expr, $f:expr, $tolerance:expr, $error_msg_prefix:expr) => {
        #[test]
        fn $test_name() -> Result<()> {
            let n = 100;
            let k = 30;
            let (a, b, eigs) = create_diagonal_problem(n);

            let mut x_true = Mat::<f64>::zeros(n, 1);
            for (i, &eig) in eigs.iter().enumerate() {
                x_true[(i, 0)] = $f(eig) * b[(i, 0)];
            }

            let f_a = MatrixFunction::new(&a, $function, k)?.with_orth(k);
            let x_k = f_a.apply(b.as_ref())?;

            let rel_err = (&x_k - &x_true).norm_l2() / x_true.norm_l2();
            ensure!(
                rel_err < $tolerance,
                "{} error too high: {}",
                $error_msg_prefix,
                rel_err
            );

            let quad_true: f64 = (0..n).map(|i| b[(i, 0)] * x_true[(i, 0)]).sum();
            let quad_k = f_a.quad(b.as_ref())?;
            let quad_err = (quad_k - quad_true).abs() / quad_true.abs();
            ensure!(
                quad_err < $tolerance,
                "{} quadratic form error too high: {}",
                $error_msg_prefix,
                quad_err
            );

            Ok(())
        }
    };
}

// Linear system solve via f(z) = 1/z.
generate_correctness_test!(
    test_linear_solve,
    BuiltinFunction::Inv,
    |z: f64| 1.0 / z,
    APPROX_TOLERANCE,
    "Linear solve"
);

// Matrix exponential, a transcendental function.
generate_correctness_test!(
    test_matrix_exp,
    BuiltinFunction::Exp,
    |z: f64| z.exp(),
    APPROX_TOLERANCE,
    "Matrix exponential"
);

// Matrix square, a polynomial for which the result is nearly exact.
generate_correctness_test!(
    test_matrix_square,
    SpectralFunction::user(|z: f64| z * z),
    |z: f64| z.powi(2),
    EXACT_TOLERANCE,
    "Matrix square"
);

#[test]
fn test_ritz_values_match_extreme_eigenvalues() -> Result<()> {
    let n = 10;
    let (_, gram) = gram_problem(n, n, 3);
    let a = Mat::from_fn(n, n, |i, j| gram[(i, j)] + if i == j { 1.0 } else { 0.0 });
    let v0 = gaussian_vector(n, 4);

    let output = lanczos(&a, v0.as_ref(), &LanczosOptions::new(n).with_orth(n))?;
    let spectrum = TridiagonalSpectrum::from_decomposition(&output.decomposition)?;
    let (ritz_min, ritz_max) = extremes(&spectrum.eigenvalues);
    let (eig_min, eig_max) = extremes(&dense_eigenvalues(a.as_ref())?);

    ensure!(
        (ritz_max - eig_max).abs() < 1e-8 * eig_max,
        "largest Ritz value {ritz_max} differs from {eig_max}"
    );
    ensure!(
        (ritz_min - eig_min).abs() < 1e-8 * eig_max,
        "smallest Ritz value {ritz_min} differs from {eig_min}"
    );

    let q = output.basis.ok_or_else(|| anyhow!("basis was not retained"))?;
    let gram_q = q.transpose() * q.as_ref();
    let identity = Mat::<f64>::identity(q.ncols(), q.ncols());
    let loss = (&gram_q - &identity).norm_l2();
    ensure!(loss < 1e-8, "loss of orthogonality too high: {loss}");
    Ok(())
}

#[test]
fn test_identity_function_reproduces_the_operator() -> Result<()> {
    let (a, b, eigs) = create_diagonal_problem(50);
    let f_a = MatrixFunction::new(&a, BuiltinFunction::Identity, 5)?;
    let x_k = f_a.apply(b.as_ref())?;
    let x_true = Mat::from_fn(50, 1, |i, _| eigs[i] * b[(i, 0)]);
    let rel_err = (&x_k - &x_true).norm_l2() / x_true.norm_l2();
    ensure!(rel_err < EXACT_TOLERANCE, "f(t) = t error too high: {rel_err}");
    Ok(())
}

#[test]
fn test_quadratic_form_of_low_degree_polynomials_is_exact() -> Result<()> {
    let n = 25;
    let (_, a) = gram_problem(n, n, 8);
    let x = gaussian_vector(n, 9);
    let ax = &a * &x;
    let expected_linear: f64 = (0..n).map(|i| x[(i, 0)] * ax[(i, 0)]).sum();
    let expected_square = ax.norm_l2().powi(2);

    let linear = MatrixFunction::new(&a, BuiltinFunction::Identity, 8)?.with_orth(8);
    let square = MatrixFunction::new(&a, SpectralFunction::user(|t: f64| t * t), 8)?.with_orth(8);
    let got_linear = linear.quad(x.as_ref())?;
    let got_square = square.quad(x.as_ref())?;

    ensure!(
        (got_linear - expected_linear).abs() < EXACT_TOLERANCE * expected_linear.abs(),
        "x^T A x: {got_linear} vs {expected_linear}"
    );
    ensure!(
        (got_square - expected_square).abs() < EXACT_TOLERANCE * expected_square,
        "x^T A^2 x: {got_square} vs {expected_square}"
    );
    Ok(())
}

#[test]
fn test_seeded_sources_and_estimators_are_deterministic() -> Result<()> {
    for distribution in [Distribution::Rademacher, Distribution::Normal, Distribution::Sphere] {
        let first = IsotropicSource::new(distribution, Some(99)).draw_matrix::<f64>(12, 3);
        let second = IsotropicSource::new(distribution, Some(99)).draw_matrix::<f64>(12, 3);
        ensure!(first == second, "{distribution} draws differ for the same seed");
    }

    let (a, _, _) = create_diagonal_problem(40);
    let options = HutchinsonOptions::new()
        .with_seed(2024)
        .with_maxiter(30)
        .with_distribution(Distribution::Normal);
    let first = hutchinson::trace(&a, &options, None)?;
    let second = hutchinson::trace(&a, &options, None)?;
    ensure!(first == second, "trace estimates differ for the same seed");
    Ok(())
}

#[test]
fn test_single_probe_trace_is_unbiased() -> Result<()> {
    let n = 20;
    let a = Mat::<f64>::from_fn(n, n, |i, j| {
        if i == j {
            4.0
        } else if i.abs_diff(j) == 1 {
            -1.0
        } else {
            0.0
        }
    });
    let exact = 4.0 * n as f64;
    let trials = 500;

    for distribution in [Distribution::Rademacher, Distribution::Normal, Distribution::Sphere] {
        let mut total = 0.0;
        for seed in 0..trials {
            let options = HutchinsonOptions::new()
                .with_seed(seed)
                .with_maxiter(1)
                .with_distribution(distribution)
                .with_convergence(ConvergenceMode::Count);
            total += hutchinson::trace(&a, &options, None)?.estimate;
        }
        let mean = total / trials as f64;
        ensure!(
            (mean - exact).abs() < 2.5,
            "{distribution}: mean of single-probe estimates {mean} is far from {exact}"
        );
    }
    Ok(())
}

#[test]
fn test_xdiag_is_exact_for_low_rank_operators() -> Result<()> {
    let n = 40;
    let rank = 4;
    let (_, a) = gram_problem(n, rank, 21);
    // Sweep from the smallest sketch that spans range(A) up to the full budget 2n.
    for m in [10, 12, 20, 40, 60, 80] {
        for distribution in [Distribution::Sphere, Distribution::Normal, Distribution::Rademacher] {
            let options = XDiagOptions::new(m)
                .with_seed(5)
                .with_distribution(distribution);
            let estimate = xdiag(&a, &options)?;
            ensure!(
                estimate.num_matvecs == m / 2 + rank,
                "m = {m}: unexpected product count {}",
                estimate.num_matvecs
            );
            for i in 0..n {
                let value = estimate.diagonal[i];
                ensure!(value.is_finite(), "{distribution}, m = {m}: entry {i} is {value}");
                let err = (value - a[(i, i)]).abs();
                ensure!(
                    err < 1e-8 * (1.0 + a[(i, i)].abs()),
                    "{distribution}, m = {m}: entry {i} off by {err}"
                );
            }
        }
    }
    Ok(())
}

#[test]
fn test_xdiag_of_the_zero_operator() -> Result<()> {
    let zero = Mat::<f64>::zeros(5, 5);
    for m in [2, 4, 10] {
        let estimate = xdiag(&zero, &XDiagOptions::new(m).with_seed(3))?;
        ensure!(
            estimate.diagonal.iter().all(|&x| x == 0.0),
            "m = {m}: expected zeros, got {:?}",
            estimate.diagonal
        );
    }
    Ok(())
}

#[test]
fn test_breakdown_on_an_invariant_subspace() -> Result<()> {
    let n = 30;
    let rank = 5;
    let (m, a) = gram_problem(n, rank, 13);
    let c = gaussian_vector(rank, 14);
    let x = &m * &c;

    let options = LanczosOptions::new(20).with_orth(20);
    let output = lanczos(&a, x.as_ref(), &options)?;
    let decomposition = &output.decomposition;
    ensure!(decomposition.breakdown, "no breakdown detected");
    ensure!(
        decomposition.steps_taken == rank,
        "expected {rank} steps, took {}",
        decomposition.steps_taken
    );

    // The Krylov subspace is invariant, so the quadrature of t is exact.
    let ax = &a * &x;
    let expected: f64 = (0..n).map(|i| x[(i, 0)] * ax[(i, 0)]).sum();
    let f_a = MatrixFunction::new(&a, BuiltinFunction::Identity, 20)?.with_orth(20);
    let got = f_a.quad(x.as_ref())?;
    ensure!(
        (got - expected).abs() < 1e-8 * expected.abs(),
        "quadrature after breakdown: {got} vs {expected}"
    );
    Ok(())
}

#[test]
fn test_reused_workspace_matches_a_fresh_one() -> Result<()> {
    let (a, b, _) = create_diagonal_problem(60);
    let other = gaussian_vector(60, 77);
    let options = LanczosOptions::new(12).with_orth(3).with_ncv(4);

    let mut reused = LanczosWorkspace::new(60, 4);
    lanczos_recurrence(&a, other.as_ref(), &options, &mut reused)?;
    ensure!(!reused.is_clear(), "workspace should hold the previous basis");
    let second = lanczos_recurrence(&a, b.as_ref(), &options, &mut reused)?;

    let mut fresh = LanczosWorkspace::new(60, 4);
    let expected = lanczos_recurrence(&a, b.as_ref(), &options, &mut fresh)?;
    ensure!(second == expected, "stale basis vectors leaked into the run");
    Ok(())
}

#[test]
fn test_slq_log_determinant() -> Result<()> {
    let (a, _, eigs) = create_diagonal_problem(100);
    let log_a = MatrixFunction::new(&a, BuiltinFunction::Log, 30)?;
    let options = HutchinsonOptions::new()
        .with_seed(7)
        .with_maxiter(100)
        .with_num_threads(2);
    let result = slq::trace(&log_a, &options, None)?;
    let exact: f64 = eigs.iter().map(|x| x.ln()).sum();
    ensure!(result.status != EstimatorStatus::Empty, "unexpected empty status");
    ensure!(
        (result.estimate - exact).abs() < 1e-3 * exact,
        "log det estimate {} vs {exact}",
        result.estimate
    );
    Ok(())
}

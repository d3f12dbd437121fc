//! Randomized Lanczos estimators for symmetric linear operators.
//!
//! This crate estimates spectral quantities of a large symmetric operator `A`
//! that is only available through its action `v -> A v`: the trace `tr(A)`,
//! the diagonal `diag(A)`, the action of a matrix function `f(A) x`, the
//! quadratic form `x^T f(A) x`, and through these `tr(f(A))` and `diag(f(A))`.
//!
//! Built on the [`faer`] linear algebra framework, every routine is generic over
//! the element type (`f32` or `f64`, see [`scalar::Scalar`]) and over the
//! operator representation (see [`matrix::LinearOperator`]): dense `faer`
//! matrices, sparse `SparseColMat`s, diagonals and closures all plug in.
//!
//! ## Building blocks
//!
//! **Lanczos process** ([`algorithms::lanczos`]): the three-term recurrence
//! with selective re-orthogonalization, storing the Krylov basis in a
//! caller-owned ring buffer.
//!
//! **Tridiagonal spectrum** ([`algorithms::quadrature`]): eigenpairs of `T_k`
//! and the Gauss quadrature rule derived from them (Golub-Welsch).
//!
//! **Matrix functions** ([`matrix_function`]): `f(A) x` and `x^T f(A) x` from a
//! single Lanczos run.
//!
//! **Estimators** ([`estimators`]): Girard-Hutchinson trace and diagonal
//! estimators with confidence-interval stopping and optional parallel
//! sampling, stochastic Lanczos quadrature, and the XDiag sketching estimator.
//!
//! ## Example Usage
//!
//! Estimating `log det(A) = tr(log(A))` of a sparse operator, and checking the
//! action of `A^{-1}` against the exact solution:
//!
//! ```rust
//! use faer::{Mat, sparse::{SparseColMat, Triplet}};
//! use stochastic_lanczos::{
//!     BuiltinFunction, HutchinsonOptions, MatrixFunction, slq,
//! };
//!
//! // A diagonal SPD operator with known spectrum 1, 2, ..., 100.
//! let n = 100;
//! let triplets: Vec<_> = (0..n)
//!     .map(|i| Triplet { row: i, col: i, val: (i + 1) as f64 })
//!     .collect();
//! let a = SparseColMat::try_new_from_triplets(n, n, &triplets).unwrap();
//!
//! // tr(log(A)) with stochastic Lanczos quadrature.
//! let log_a = MatrixFunction::new(&a, BuiltinFunction::Log, 30).unwrap();
//! let options = HutchinsonOptions::new().with_seed(42).with_maxiter(20);
//! let logdet = slq::trace(&log_a, &options, None).unwrap();
//! let exact: f64 = (1..=n).map(|i| (i as f64).ln()).sum();
//! assert!((logdet.estimate - exact).abs() < 1e-3 * exact);
//!
//! // f(A) x with f(t) = 1 / t, i.e. the solution of A y = x.
//! let inv_a = MatrixFunction::new(&a, BuiltinFunction::Inv, 100)
//!     .unwrap()
//!     .with_orth(100);
//! let x = Mat::from_fn(n, 1, |i, _| (i + 1) as f64);
//! let y = inv_a.apply(x.as_ref()).unwrap();
//! assert!((0..n).all(|i| (y[(i, 0)] - 1.0).abs() < 1e-8));
//! ```

pub mod algorithms;
pub mod error;
pub mod estimators;
pub mod matrix;
pub mod matrix_function;
pub mod random;
pub mod scalar;

pub use algorithms::{
    LanczosDecomposition, LanczosOutput,
    lanczos::{LanczosOptions, LanczosWorkspace, lanczos, lanczos_recurrence},
    quadrature::{QuadratureRule, TridiagonalSpectrum},
};
pub use error::{ErrorKind, SpectralError};
pub use estimators::{
    Estimate, EstimatorStatus, HutchinsonOptions, Progress, ProgressCallback,
    convergence::{ConfidenceCriterion, ConvergenceCriterion, ConvergenceMode, CountCriterion},
    hutchinson, slq,
    xdiag::{XDiagEstimate, XDiagOptions, xdiag},
};
pub use matrix::{DiagonalOperator, FnOperator, LinearOperator};
pub use matrix_function::{BuiltinFunction, MatrixFunction, SpectralFunction};
pub use random::{Distribution, IsotropicSource};
pub use scalar::{DType, Scalar};

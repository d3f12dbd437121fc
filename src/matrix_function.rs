//! Lanczos approximation of matrix functions.
//!
//! A [`MatrixFunction`] wraps a symmetric operator `A` and a scalar function
//! `f` and exposes two operations built on the same Lanczos machinery:
//!
//! - [`MatrixFunction::apply`]: the action `f(A) x ≈ ‖x‖ Q_k Y f(Θ) Y^T e_1`,
//!   where `T_k = Y Θ Y^T` is the eigendecomposition of the tridiagonal model
//!   and `Q_k` the retained Krylov basis;
//! - [`MatrixFunction::quad`]: the quadratic form `x^T f(A) x` through the
//!   Gauss quadrature rule of `T_k`, which needs no basis beyond the
//!   re-orthogonalization window.
//!
//! `MatrixFunction` is itself a [`LinearOperator`], so the randomized trace and
//! diagonal estimators can be pointed at `f(A)` directly.

use crate::{
    algorithms::{
        lanczos::{LanczosOptions, LanczosWorkspace, lanczos_recurrence},
        quadrature::TridiagonalSpectrum,
    },
    error::{ErrorKind, SpectralError},
    matrix::{LinearOperator, validate_square},
    scalar::Scalar,
};
use faer::{Mat, MatRef};
use log::{error, warn};
use num_traits::Float;
use std::{fmt, str::FromStr, sync::Arc};

/// Spectral functions with a built-in implementation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BuiltinFunction {
    Identity,
    Abs,
    Sqrt,
    Log,
    Inv,
    Exp,
    /// Step function counting eigenvalues with `|lambda| > threshold`.
    Numrank { threshold: f64 },
}

impl FromStr for BuiltinFunction {
    type Err = SpectralError;

    /// Parses a function name. `numrank` accepts an optional threshold as
    /// `numrank:<value>` (default `1e-6`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        let (name, arg) = match lowered.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (lowered.as_str(), None),
        };
        let function = match name {
            "identity" | "id" => BuiltinFunction::Identity,
            "abs" => BuiltinFunction::Abs,
            "sqrt" => BuiltinFunction::Sqrt,
            "log" => BuiltinFunction::Log,
            "inv" | "inverse" => BuiltinFunction::Inv,
            "exp" => BuiltinFunction::Exp,
            "numrank" => {
                let threshold = match arg {
                    Some(value) => value.parse::<f64>().map_err(|_| {
                        ErrorKind::InvalidConfiguration(format!(
                            "invalid numrank threshold '{value}'"
                        ))
                    })?,
                    None => 1e-6,
                };
                return Ok(BuiltinFunction::Numrank { threshold });
            }
            other => {
                return Err(ErrorKind::InvalidConfiguration(format!(
                    "unknown matrix function '{other}', expected one of \
                     identity, abs, sqrt, log, inv, exp, numrank"
                ))
                .into());
            }
        };
        match arg {
            Some(_) => Err(ErrorKind::InvalidConfiguration(format!(
                "matrix function '{name}' takes no parameter"
            ))
            .into()),
            None => Ok(function),
        }
    }
}

impl fmt::Display for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuiltinFunction::Identity => f.write_str("identity"),
            BuiltinFunction::Abs => f.write_str("abs"),
            BuiltinFunction::Sqrt => f.write_str("sqrt"),
            BuiltinFunction::Log => f.write_str("log"),
            BuiltinFunction::Inv => f.write_str("inv"),
            BuiltinFunction::Exp => f.write_str("exp"),
            BuiltinFunction::Numrank { threshold } => write!(f, "numrank:{threshold}"),
        }
    }
}

type ScalarFn<T> = Arc<dyn Fn(T) -> T + Send + Sync>;

/// The function applied to the Ritz values: a built-in or a user closure.
#[derive(Clone)]
pub enum SpectralFunction<T> {
    BuiltIn(BuiltinFunction),
    User(ScalarFn<T>),
}

impl<T: Scalar> SpectralFunction<T> {
    pub fn user(f: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        SpectralFunction::User(Arc::new(f))
    }

    fn resolve(&self) -> ScalarFn<T> {
        match self {
            SpectralFunction::User(f) => Arc::clone(f),
            SpectralFunction::BuiltIn(builtin) => match *builtin {
                BuiltinFunction::Identity => Arc::new(|x: T| x),
                BuiltinFunction::Abs => Arc::new(|x: T| Float::abs(x)),
                BuiltinFunction::Sqrt => Arc::new(|x: T| Float::sqrt(x)),
                BuiltinFunction::Log => Arc::new(|x: T| Float::ln(x)),
                BuiltinFunction::Inv => Arc::new(|x: T| T::one() / x),
                BuiltinFunction::Exp => Arc::new(|x: T| Float::exp(x)),
                BuiltinFunction::Numrank { threshold } => {
                    let threshold = T::cast(threshold);
                    Arc::new(move |x: T| {
                        if Float::abs(x) > threshold {
                            T::one()
                        } else {
                            T::zero()
                        }
                    })
                }
            },
        }
    }
}

impl<T> From<BuiltinFunction> for SpectralFunction<T> {
    fn from(builtin: BuiltinFunction) -> Self {
        SpectralFunction::BuiltIn(builtin)
    }
}

impl<T> fmt::Debug for SpectralFunction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpectralFunction::BuiltIn(builtin) => write!(f, "BuiltIn({builtin})"),
            SpectralFunction::User(_) => f.write_str("User(..)"),
        }
    }
}

/// The operator `v -> f(A) v`, approximated with a degree-`k` Krylov expansion.
pub struct MatrixFunction<'a, T, O: ?Sized> {
    operator: &'a O,
    function: SpectralFunction<T>,
    eval: ScalarFn<T>,
    options: LanczosOptions<T>,
    basis_capacity: Option<usize>,
    dim: usize,
}

impl<T: fmt::Debug, O: ?Sized> fmt::Debug for MatrixFunction<'_, T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatrixFunction")
            .field("function", &self.function)
            .field("options", &self.options)
            .field("basis_capacity", &self.basis_capacity)
            .field("dim", &self.dim)
            .finish_non_exhaustive()
    }
}

impl<'a, T, O> MatrixFunction<'a, T, O>
where
    T: Scalar,
    O: LinearOperator<T> + ?Sized,
{
    /// Wraps `operator` with `function` and Krylov degree `degree`.
    ///
    /// Fails with `InvalidOperator` for a non-square or empty operator and
    /// with `InvalidConfiguration` for a degree below 2 unless the operator is
    /// one-dimensional. A degree above the dimension is clamped to it.
    pub fn new(
        operator: &'a O,
        function: impl Into<SpectralFunction<T>>,
        degree: usize,
    ) -> Result<Self, SpectralError> {
        let dim = validate_square::<T, O>(operator)?;
        if dim == 0 {
            return Err(ErrorKind::InvalidOperator(
                "matrix functions of an empty operator are undefined".to_string(),
            )
            .into());
        }
        // Clamp once here so every later run does not warn again.
        let resolved = LanczosOptions::<T>::new(degree).resolve(dim)?;
        let options = LanczosOptions::new(resolved.degree);
        let function = function.into();
        let eval = function.resolve();
        Ok(Self {
            operator,
            function,
            eval,
            options,
            basis_capacity: None,
            dim,
        })
    }

    /// Sets the re-orthogonalization depth, clamped to the Krylov degree.
    pub fn with_orth(mut self, orth: usize) -> Self {
        if orth > self.options.degree {
            warn!(
                "orth ({orth}) exceeds the Krylov degree ({}), clamping",
                self.options.degree
            );
        }
        self.options.orth = orth.min(self.options.degree);
        self
    }

    pub fn with_rtol(mut self, rtol: T) -> Self {
        self.options.rtol = Some(rtol);
        self
    }

    /// Sets the number of basis vectors allocated by [`new_workspace`](Self::new_workspace).
    pub fn with_basis_capacity(mut self, capacity: usize) -> Self {
        self.basis_capacity = Some(capacity);
        self
    }

    pub fn function(&self) -> &SpectralFunction<T> {
        &self.function
    }

    pub fn options(&self) -> &LanczosOptions<T> {
        &self.options
    }

    /// Evaluates the scalar function at `x`.
    pub fn eval(&self, x: T) -> T {
        (self.eval)(x)
    }

    /// Allocates a workspace sized by the basis capacity (the degree by default).
    pub fn new_workspace(&self) -> LanczosWorkspace<T> {
        let capacity = self
            .basis_capacity
            .unwrap_or_else(|| self.options.degree.min(self.dim));
        LanczosWorkspace::new(self.dim, capacity)
    }

    /// Approximates `f(A) x` for an `n x 1` vector `x`.
    pub fn apply(&self, x: MatRef<'_, T>) -> Result<Mat<T>, SpectralError> {
        let mut workspace = self.new_workspace();
        self.apply_with(x, &mut workspace)
    }

    /// Like [`apply`](Self::apply), reusing `workspace`.
    ///
    /// The workspace grows to the Krylov degree if needed, since the whole
    /// basis is required for the reconstruction, and is cleared before use.
    pub fn apply_with(
        &self,
        x: MatRef<'_, T>,
        workspace: &mut LanczosWorkspace<T>,
    ) -> Result<Mat<T>, SpectralError> {
        self.check_vector(x)?;
        if is_zero(x) {
            return Ok(Mat::zeros(self.dim, 1));
        }
        workspace.ensure_capacity(self.options.degree.min(self.dim));

        let decomposition = lanczos_recurrence(self.operator, x, &self.options, workspace)?;
        let k = decomposition.steps_taken;
        let spectrum = TridiagonalSpectrum::from_decomposition(&decomposition)?;
        let basis = workspace
            .krylov_basis(k)
            .ok_or(ErrorKind::InsufficientWorkspace {
                capacity: workspace.capacity(),
                required: k,
            })?;

        // c = f(Theta) Y^T e_1, then z = Y c.
        let y = spectrum.eigenvectors.as_ref();
        let coeffs: Vec<T> = (0..k)
            .map(|i| self.eval(spectrum.eigenvalues[i]) * y[(0, i)])
            .collect();
        let z = Mat::from_fn(k, 1, |r, _| {
            (0..k).map(|i| y[(r, i)] * coeffs[i]).sum::<T>() * decomposition.b_norm
        });
        Ok(basis * z.as_ref())
    }

    /// Approximates the quadratic form `x^T f(A) x`.
    pub fn quad(&self, x: MatRef<'_, T>) -> Result<T, SpectralError> {
        let mut workspace = self.new_workspace();
        self.quad_with(x, &mut workspace)
    }

    /// Like [`quad`](Self::quad), reusing `workspace`.
    ///
    /// Fails with `InsufficientWorkspace` if the workspace holds fewer vectors
    /// than the re-orthogonalization depth.
    pub fn quad_with(
        &self,
        x: MatRef<'_, T>,
        workspace: &mut LanczosWorkspace<T>,
    ) -> Result<T, SpectralError> {
        self.check_vector(x)?;
        if is_zero(x) {
            return Ok(T::zero());
        }
        let decomposition = lanczos_recurrence(self.operator, x, &self.options, workspace)?;
        let rule = TridiagonalSpectrum::from_decomposition(&decomposition)?.quadrature();
        let scale = decomposition.b_norm * decomposition.b_norm;
        Ok(scale * rule.integrate(|theta| self.eval(theta)))
    }

    fn check_vector(&self, x: MatRef<'_, T>) -> Result<(), SpectralError> {
        if x.nrows() != self.dim || x.ncols() != 1 {
            return Err(ErrorKind::DimensionMismatch {
                operator_cols: self.dim,
                vector_rows: x.nrows(),
            }
            .into());
        }
        Ok(())
    }
}

fn is_zero<T: Scalar>(x: MatRef<'_, T>) -> bool {
    (0..x.nrows()).all(|i| x[(i, 0)] == T::zero())
}

impl<T, O> LinearOperator<T> for MatrixFunction<'_, T, O>
where
    T: Scalar,
    O: LinearOperator<T> + ?Sized,
{
    fn nrows(&self) -> usize {
        self.dim
    }

    fn ncols(&self) -> usize {
        self.dim
    }

    /// Applies `f(A)` column by column, each with its own workspace. A column
    /// whose evaluation fails is reported through the log and filled with NaN,
    /// which the Hutchinson estimators then reject as a non-finite sample.
    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        assert_eq!(
            self.dim,
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match vector rows ({}).",
            self.dim,
            rhs.nrows()
        );
        let mut out = Mat::<T>::zeros(self.dim, rhs.ncols());
        for j in 0..rhs.ncols() {
            let mut workspace = self.new_workspace();
            match self.apply_with(rhs.get(.., j..j + 1), &mut workspace) {
                Ok(column) => out.as_mut().get_mut(.., j..j + 1).copy_from(column.as_ref()),
                Err(e) => {
                    error!("matrix function evaluation failed on column {j}: {e}");
                    for i in 0..self.dim {
                        out[(i, j)] = T::nan();
                    }
                }
            }
        }
        out
    }
}

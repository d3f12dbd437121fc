//! Symmetric Lanczos tridiagonalization with selective re-orthogonalization.
//!
//! The recurrence builds an orthonormal basis `Q_k` of the Krylov subspace
//! `K_k(A, v0)` in which `A` reduces to the tridiagonal matrix `T_k`:
//!
//! $$ A Q_k = Q_k T_k + \beta_k q_k e_k^T $$
//!
//! Basis vectors live in a [`LanczosWorkspace`], a ring buffer of `ncv`
//! columns owned by the caller. Each new vector is orthogonalized against the
//! two previous ones (the mandatory three-term recurrence) and then, if
//! `orth > 0`, against the last `orth` vectors still held in the buffer.
//! With `orth = degree` and `ncv >= degree` the basis stays orthonormal to
//! machine precision, at a cost of `O(k^2 n)` extra flops.
//!
//! Early termination on an invariant subspace is a valid outcome: the returned
//! decomposition is shorter than requested and has `breakdown == true`.

use super::{
    LanczosDecomposition, LanczosOutput, column_dot, column_norm, column_sub_scaled,
};
use crate::{
    error::{ErrorKind, SpectralError},
    matrix::{LinearOperator, validate_square},
    scalar::Scalar,
};
use faer::{Mat, MatRef};
use log::{debug, warn};
use num_traits::Float;

/// Configuration of a single Lanczos run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LanczosOptions<T> {
    /// Requested number of Krylov steps, at least 2. Clamped to `n`.
    pub degree: usize,
    /// Relative breakdown tolerance. `None` selects `sqrt(eps)` of `T`.
    pub rtol: Option<T>,
    /// Re-orthogonalization depth, `0..=degree`. Larger values are clamped.
    pub orth: usize,
    /// Number of basis columns to allocate. `None` keeps the whole basis.
    pub ncv: Option<usize>,
}

impl<T: Scalar> Default for LanczosOptions<T> {
    fn default() -> Self {
        Self {
            degree: 20,
            rtol: None,
            orth: 0,
            ncv: None,
        }
    }
}

impl<T: Scalar> LanczosOptions<T> {
    pub fn new(degree: usize) -> Self {
        Self {
            degree,
            ..Self::default()
        }
    }

    pub fn with_rtol(mut self, rtol: T) -> Self {
        self.rtol = Some(rtol);
        self
    }

    pub fn with_orth(mut self, orth: usize) -> Self {
        self.orth = orth;
        self
    }

    pub fn with_ncv(mut self, ncv: usize) -> Self {
        self.ncv = Some(ncv);
        self
    }

    /// Validates the options against an operator of dimension `n`.
    pub(crate) fn resolve(&self, n: usize) -> Result<ResolvedOptions<T>, SpectralError> {
        // A degree below 2 is only meaningful when it already spans the whole
        // space, i.e. for a one-dimensional operator.
        if self.degree < 2 && self.degree < n {
            return Err(ErrorKind::InvalidConfiguration(format!(
                "Lanczos degree must be at least 2, got {}",
                self.degree
            ))
            .into());
        }
        let rtol = match self.rtol {
            Some(rtol) if !(rtol.widen() >= 0.0) => {
                return Err(ErrorKind::InvalidConfiguration(format!(
                    "residual tolerance must be non-negative, got {rtol}"
                ))
                .into());
            }
            Some(rtol) => rtol,
            None => Float::sqrt(<T as Float>::epsilon()),
        };

        let mut degree = self.degree;
        if degree > n {
            warn!("Lanczos degree {degree} exceeds the operator dimension {n}; using {n}");
            degree = n;
        }
        let mut orth = self.orth;
        if orth > degree {
            warn!("re-orthogonalization depth {orth} exceeds the degree {degree}; using {degree}");
            orth = degree;
        }
        let ncv = self.ncv.unwrap_or(degree).max(2);

        Ok(ResolvedOptions {
            degree,
            orth,
            rtol,
            ncv,
        })
    }
}

/// Options after validation and clamping.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedOptions<T> {
    pub degree: usize,
    pub orth: usize,
    pub rtol: T,
    pub ncv: usize,
}

/// Caller-owned storage for the Krylov basis.
///
/// The buffer holds `capacity` columns of length `n`, used cyclically. A
/// workspace is never shared between concurrent runs; reusing it for another
/// run first re-zeroes every entry.
#[derive(Debug, Clone)]
pub struct LanczosWorkspace<T> {
    basis: Mat<T>,
}

impl<T: Scalar> LanczosWorkspace<T> {
    /// Allocates a zeroed workspace for dimension `n` with `ncv` columns (at least 2).
    pub fn new(n: usize, ncv: usize) -> Self {
        Self {
            basis: Mat::zeros(n, ncv.max(2)),
        }
    }

    /// Number of basis vectors the buffer holds.
    pub fn capacity(&self) -> usize {
        self.basis.ncols()
    }

    /// Length of each basis vector.
    pub fn dim(&self) -> usize {
        self.basis.nrows()
    }

    /// Sets every entry of the buffer to zero.
    pub fn clear(&mut self) {
        let (nrows, ncols) = (self.basis.nrows(), self.basis.ncols());
        for j in 0..ncols {
            for i in 0..nrows {
                self.basis[(i, j)] = T::zero();
            }
        }
    }

    /// Returns `true` if every entry is exactly zero.
    pub fn is_clear(&self) -> bool {
        let basis = self.basis.as_ref();
        (0..basis.ncols()).all(|j| (0..basis.nrows()).all(|i| basis[(i, j)] == T::zero()))
    }

    /// Grows the buffer to hold at least `ncv` columns. Existing content is discarded.
    pub fn ensure_capacity(&mut self, ncv: usize) {
        if ncv > self.capacity() {
            self.basis = Mat::zeros(self.dim(), ncv);
        }
    }

    /// The first `steps` basis vectors, if they are all still in the buffer.
    pub fn krylov_basis(&self, steps: usize) -> Option<MatRef<'_, T>> {
        (steps <= self.capacity()).then(|| self.basis.as_ref().get(.., 0..steps))
    }
}

/// Runs the Lanczos recurrence from `v0`, storing basis vectors in `workspace`.
///
/// # Arguments
/// * `operator`: A square symmetric [`LinearOperator`].
/// * `v0`: The `n x 1` starting vector. It is normalized internally; its norm
///   is reported as [`LanczosDecomposition::b_norm`].
/// * `options`: Degree, tolerance and re-orthogonalization depth.
/// * `workspace`: Basis storage of dimension `n`. It is cleared before use and
///   must hold at least `orth` vectors.
///
/// # Returns
/// The tridiagonal model on success. Fails with `InvalidConfiguration` for a
/// degree below 2 or a zero starting vector, with `InsufficientWorkspace` if
/// the workspace is smaller than the re-orthogonalization depth.
pub fn lanczos_recurrence<T, O>(
    operator: &O,
    v0: MatRef<'_, T>,
    options: &LanczosOptions<T>,
    workspace: &mut LanczosWorkspace<T>,
) -> Result<LanczosDecomposition<T>, SpectralError>
where
    T: Scalar,
    O: LinearOperator<T> + ?Sized,
{
    let n = validate_square::<T, O>(operator)?;
    if n == 0 {
        return Err(ErrorKind::InvalidOperator("operator is empty".to_string()).into());
    }
    if v0.nrows() != n || v0.ncols() != 1 {
        return Err(ErrorKind::DimensionMismatch {
            operator_cols: n,
            vector_rows: v0.nrows(),
        }
        .into());
    }
    if workspace.dim() != n {
        return Err(ErrorKind::InvalidConfiguration(format!(
            "workspace dimension {} does not match operator dimension {n}",
            workspace.dim()
        ))
        .into());
    }
    let opts = options.resolve(n)?;
    if workspace.capacity() < opts.orth {
        return Err(ErrorKind::InsufficientWorkspace {
            capacity: workspace.capacity(),
            required: opts.orth,
        }
        .into());
    }

    let b_norm = column_norm(v0, 0);
    if !(b_norm.widen() > 0.0) || !b_norm.widen().is_finite() {
        return Err(ErrorKind::InvalidConfiguration(
            "starting vector must be non-zero and finite".to_string(),
        )
        .into());
    }

    workspace.clear();
    let ncv = workspace.capacity();
    let basis = &mut workspace.basis;
    for i in 0..n {
        basis[(i, 0)] = v0[(i, 0)] / b_norm;
    }

    let mut alphas = Vec::with_capacity(opts.degree);
    let mut betas = Vec::with_capacity(opts.degree);
    betas.push(T::zero());
    let mut residual_norm = T::zero();
    let mut breakdown = false;

    for j in 0..opts.degree {
        let curr = j % ncv;
        let prev = (j + ncv - 1) % ncv;

        // w = A q_j. Its norm before any projection is the scale the
        // breakdown test compares against.
        let mut w = operator.apply(basis.as_ref().get(.., curr..curr + 1));
        let w_norm = column_norm(w.as_ref(), 0);

        // Three-term recurrence: w <- w - alpha_j q_j - beta_j q_{j-1}.

        let alpha = column_dot(basis.as_ref(), curr, w.as_ref(), 0);
        alphas.push(alpha);
        column_sub_scaled(w.as_mut(), 0, alpha, basis.as_ref(), curr);
        if j > 0 {
            column_sub_scaled(w.as_mut(), 0, betas[j], basis.as_ref(), prev);
        }

        // Project out the most recent vectors still held in the ring buffer.
        let depth = opts.orth.min(j + 1).min(ncv);
        for back in 0..depth {
            let idx = (curr + ncv - back) % ncv;
            let proj = column_dot(basis.as_ref(), idx, w.as_ref(), 0);
            column_sub_scaled(w.as_mut(), 0, proj, basis.as_ref(), idx);
        }

        let beta = column_norm(w.as_ref(), 0);
        // An invariant subspace is reported even on the last requested step.
        if beta <= opts.rtol * w_norm {
            debug!(
                "Lanczos breakdown after {} steps: residual {beta} below {} * {w_norm}",
                j + 1,
                opts.rtol
            );
            residual_norm = beta;
            breakdown = true;
            break;
        }
        if j + 1 == opts.degree {
            residual_norm = beta;
            break;
        }

        // q_{j+1} = w / beta_{j+1} overwrites the oldest slot of the ring.
        betas.push(beta);
        let next = (j + 1) % ncv;
        for i in 0..n {
            basis[(i, next)] = w[(i, 0)] / beta;
        }
    }

    let steps_taken = alphas.len();
    Ok(LanczosDecomposition {
        alphas,
        betas,
        steps_taken,
        b_norm,
        residual_norm,
        breakdown,
    })
}

/// Runs the Lanczos process and returns the tridiagonal model with its basis.
///
/// Allocates a fresh workspace of `options.ncv` columns (the full degree by
/// default). The basis is `None` only if a smaller `ncv` made it wrap around.
pub fn lanczos<T, O>(
    operator: &O,
    v0: MatRef<'_, T>,
    options: &LanczosOptions<T>,
) -> Result<LanczosOutput<T>, SpectralError>
where
    T: Scalar,
    O: LinearOperator<T> + ?Sized,
{
    let n = validate_square::<T, O>(operator)?;
    let ncv = options.resolve(n)?.ncv;
    let mut workspace = LanczosWorkspace::new(n, ncv);
    let decomposition = lanczos_recurrence(operator, v0, options, &mut workspace)?;
    let basis = workspace
        .krylov_basis(decomposition.steps_taken)
        .map(|q| q.to_owned());
    Ok(LanczosOutput {
        decomposition,
        basis,
    })
}

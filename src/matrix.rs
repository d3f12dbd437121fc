//! This module defines the core abstraction for linear operators.
//!
//! The Lanczos process and the randomized estimators never look at individual
//! matrix entries: their only interaction with the operator is the product
//! `A * V` for a block of vectors `V`. Any object that can perform this action,
//! a dense matrix, a sparse matrix, a diagonal, or a user closure, can
//! therefore be plugged into every algorithm of the crate.
//!
//! The concrete representation is selected at construction time through the
//! [`LinearOperator`] implementation; the algorithms are generic over it and never
//! inspect the operator's type at runtime.
//!
//! Operators are assumed to be symmetric. The transposed product
//! ([`LinearOperator::apply_transpose`]) defaults to the plain product and is
//! only used by the sketching diagonal estimator.

use crate::{
    error::{ErrorKind, SpectralError},
    scalar::{DType, Scalar},
};
use faer::{
    Mat, MatMut, MatRef, Par,
    dyn_stack::{MemBuffer, MemStack},
    sparse::SparseColMat,
};

/// Represents a linear operator that can be applied to a vector (or a block of vectors).
///
/// # Type Parameters
///
/// *   `T`: The element type, `f32` or `f64` (see [`Scalar`]).
///
/// # Example
///
/// ```
/// use faer::mat;
/// use stochastic_lanczos::matrix::LinearOperator;
///
/// let a = mat![[2.0, -1.0], [-1.0, 2.0]];
/// let x = mat![[1.0], [1.0]];
/// let y = a.apply(x.as_ref());
/// assert_eq!(y, mat![[1.0], [1.0]]);
/// assert_eq!(LinearOperator::<f64>::shape(&a), (2, 2));
/// ```
pub trait LinearOperator<T: Scalar> {
    /// Returns the number of rows of the operator.
    fn nrows(&self) -> usize;

    /// Returns the number of columns of the operator.
    fn ncols(&self) -> usize;

    /// Applies the operator to every column of `rhs` and returns `A * rhs`.
    ///
    /// # Panics
    ///
    /// Implementations panic if `rhs.nrows()` differs from [`ncols`](Self::ncols).
    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T>;

    /// Applies the transposed operator, `A^T * rhs`.
    ///
    /// The default forwards to [`apply`](Self::apply), which is exact for the
    /// symmetric operators this crate is designed for.
    fn apply_transpose(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        self.apply(rhs)
    }

    /// Returns `(nrows, ncols)`.
    fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    /// Returns the element type tag.
    fn dtype(&self) -> DType {
        T::DTYPE
    }
}

/// Checks that `operator` is square and returns its dimension.
///
/// This is the eager validation performed by every entry point before any
/// sampling or Krylov step takes place.
pub fn validate_square<T, O>(operator: &O) -> Result<usize, SpectralError>
where
    T: Scalar,
    O: LinearOperator<T> + ?Sized,
{
    let (nrows, ncols) = operator.shape();
    if nrows != ncols {
        return Err(ErrorKind::InvalidOperator(format!(
            "operator must be square, got shape ({nrows}, {ncols})"
        ))
        .into());
    }
    Ok(nrows)
}

#[inline]
fn assert_compatible(ncols: usize, rhs_rows: usize) {
    assert_eq!(
        ncols, rhs_rows,
        "Dimension mismatch: operator columns ({ncols}) do not match vector rows ({rhs_rows}).",
    );
}

impl<T: Scalar> LinearOperator<T> for MatRef<'_, T> {
    #[inline]
    fn nrows(&self) -> usize {
        MatRef::nrows(self)
    }

    #[inline]
    fn ncols(&self) -> usize {
        MatRef::ncols(self)
    }

    #[inline]
    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        assert_compatible(MatRef::ncols(self), rhs.nrows());
        *self * rhs
    }

    #[inline]
    fn apply_transpose(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        assert_compatible(MatRef::nrows(self), rhs.nrows());
        self.transpose() * rhs
    }
}

impl<T: Scalar> LinearOperator<T> for Mat<T> {
    #[inline]
    fn nrows(&self) -> usize {
        Mat::nrows(self)
    }

    #[inline]
    fn ncols(&self) -> usize {
        Mat::ncols(self)
    }

    #[inline]
    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        self.as_ref().apply(rhs)
    }

    #[inline]
    fn apply_transpose(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        self.as_ref().apply_transpose(rhs)
    }
}

/// Sparse operators go through `faer`'s matrix-free `LinOp` interface, which
/// needs a scratch stack sized for the number of right-hand sides.
impl<T: Scalar> LinearOperator<T> for SparseColMat<usize, T> {
    #[inline]
    fn nrows(&self) -> usize {
        self.as_ref().nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.as_ref().ncols()
    }

    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        use faer::matrix_free::LinOp;

        let op = self.as_ref();
        assert_compatible(op.ncols(), rhs.nrows());
        let mut out = Mat::<T>::zeros(op.nrows(), rhs.ncols());
        let mut mem = MemBuffer::new(op.apply_scratch(rhs.ncols(), Par::Seq));
        let stack = MemStack::new(&mut mem);
        op.apply(out.as_mut(), rhs, Par::Seq, stack);
        out
    }
}

/// A diagonal operator `A = diag(d)`, applied in `O(n)` per column.
#[derive(Clone, Debug)]
pub struct DiagonalOperator<T> {
    diagonal: Vec<T>,
}

impl<T: Scalar> DiagonalOperator<T> {
    pub fn new(diagonal: Vec<T>) -> Self {
        Self { diagonal }
    }

    pub fn diagonal(&self) -> &[T] {
        &self.diagonal
    }
}

impl<T: Scalar> LinearOperator<T> for DiagonalOperator<T> {
    fn nrows(&self) -> usize {
        self.diagonal.len()
    }

    fn ncols(&self) -> usize {
        self.diagonal.len()
    }

    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        assert_compatible(self.diagonal.len(), rhs.nrows());
        Mat::from_fn(rhs.nrows(), rhs.ncols(), |i, j| self.diagonal[i] * rhs[(i, j)])
    }
}

/// An operator defined only by its action on a single column.
///
/// The closure receives one input column (`n x 1`) and writes `A x` into the
/// provided output column, which is zero-initialized.
pub struct FnOperator<F> {
    dim: usize,
    matvec: F,
}

impl<F> FnOperator<F> {
    pub fn new(dim: usize, matvec: F) -> Self {
        Self { dim, matvec }
    }
}

impl<T, F> LinearOperator<T> for FnOperator<F>
where
    T: Scalar,
    F: Fn(MatRef<'_, T>, MatMut<'_, T>),
{
    fn nrows(&self) -> usize {
        self.dim
    }

    fn ncols(&self) -> usize {
        self.dim
    }

    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        assert_compatible(self.dim, rhs.nrows());
        let mut out = Mat::<T>::zeros(self.dim, rhs.ncols());
        for j in 0..rhs.ncols() {
            (self.matvec)(rhs.get(.., j..j + 1), out.as_mut().get_mut(.., j..j + 1));
        }
        out
    }
}

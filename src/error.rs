//! This module defines the custom error types for the library.
//!
//! All failure conditions of the Lanczos process, the quadrature rules and the
//! randomized estimators are collected in a single enum, [`ErrorKind`], wrapped
//! by the public [`SpectralError`].
//!
//! Early termination of the Lanczos recurrence on an invariant subspace is
//! *not* an error: it is reported through
//! [`LanczosDecomposition::breakdown`](crate::algorithms::LanczosDecomposition::breakdown).
//!
//! [`faer::linalg::evd::EvdError`] does not implement [`std::error::Error`], so
//! it is carried as a plain payload and formatted with `Debug`.
use thiserror::Error;

/// Represents all possible errors raised by the estimators in this crate.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct SpectralError(#[from] ErrorKind);

impl SpectralError {
    /// Returns the kind of failure, for callers that need to branch on it.
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }
}

/// The distinct kinds of errors.
#[derive(Error, Debug, PartialEq)]
pub enum ErrorKind {
    /// The operator is not square, or is empty where a non-empty operator is required.
    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    /// A configuration value is out of range or names an unknown option.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Indicates that the dimensions of the operator and the input vector are
    /// incompatible for a matrix-vector product.
    #[error(
        "Dimension mismatch: operator has {operator_cols} columns but vector has {vector_rows} rows."
    )]
    DimensionMismatch {
        operator_cols: usize,
        vector_rows: usize,
    },

    /// The Krylov basis buffer cannot hold the vectors needed for re-orthogonalization.
    #[error(
        "Insufficient workspace: basis holds {capacity} vectors but {required} are required."
    )]
    InsufficientWorkspace { capacity: usize, required: usize },

    /// Wraps an error originating from [`faer`]'s eigendecomposition module.
    #[error("Eigendecomposition of the tridiagonal matrix T_k failed: {0:?}")]
    EvdError(faer::linalg::evd::EvdError),
}

impl PartialEq for SpectralError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

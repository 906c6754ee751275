//! Forward-mode automatic differentiation over blocks of sparse Jacobians.
//!
//! An [`AutoDiffBlock`] pairs a value vector with one Jacobian block per primary-variable
//! block. Jacobian blocks are [`AdMatrix`] values that keep track of their structure (zero,
//! identity, diagonal or general sparse), so that elementwise arithmetic stays cheap.

mod block;
mod helpers;
mod matrix;

pub use block::AutoDiffBlock;
pub use helpers::*;
pub use matrix::{diagonal_csr, AdMatrix, Shape};

pub use nalgebra_sparse::csr::CsrMatrix;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Dimension mismatch in {op}: lhs is {lhs:?}, rhs is {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: (usize, usize),
        rhs: (usize, usize),
    },

    #[error("Division by zero at element {index}")]
    DivisionByZero { index: usize },

    #[error("Expressions have incompatible block patterns ({lhs} vs {rhs} blocks)")]
    BlockPattern { lhs: usize, rhs: usize },

    #[error("Index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Invalid sparse structure: {0}")]
    SparseFormat(String),
}

impl From<nalgebra_sparse::SparseFormatError> for Error {
    fn from(e: nalgebra_sparse::SparseFormatError) -> Self {
        Error::SparseFormat(e.to_string())
    }
}

impl Error {
    pub(crate) fn shape(op: &'static str, lhs: (usize, usize), rhs: (usize, usize)) -> Self {
        Error::ShapeMismatch { op, lhs, rhs }
    }
}

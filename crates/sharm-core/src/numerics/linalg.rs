//! Dense least-squares solver used by the least-squares analysis.

use faer::Mat;
use faer::linalg::solvers::SolveLstsq;

pub type DenseMatrix = Mat<f64>;

/// Diagonal entries of `R` below this fraction of the largest one mark the
/// design matrix as rank deficient.
const RANK_TOLERANCE: f64 = 1.0e-12;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LstsqError {
    #[error("least squares requires a non-empty matrix")]
    EmptyMatrix,
    #[error("least squares requires at least as many rows as columns, got {rows}x{cols}")]
    Underdetermined { rows: usize, cols: usize },
    #[error("design matrix is rank deficient at column {column}")]
    RankDeficient { column: usize },
    #[error("right-hand side length mismatch: expected {expected}, got {actual}")]
    RhsLengthMismatch { expected: usize, actual: usize },
}

impl From<LstsqError> for crate::domain::HarmError {
    fn from(error: LstsqError) -> Self {
        crate::domain::HarmError::invalid_argument("INPUT.LSQ_SYSTEM", error.to_string())
    }
}

/// Solves `min ||A x - b||` with a Householder QR factorization of `A`.
pub fn solve_least_squares(design: &DenseMatrix, rhs: &[f64]) -> Result<Vec<f64>, LstsqError> {
    let (rows, cols) = (design.nrows(), design.ncols());
    if rows == 0 || cols == 0 {
        return Err(LstsqError::EmptyMatrix);
    }
    if rows < cols {
        return Err(LstsqError::Underdetermined { rows, cols });
    }
    if rhs.len() != rows {
        return Err(LstsqError::RhsLengthMismatch {
            expected: rows,
            actual: rhs.len(),
        });
    }

    let qr = design.qr();
    let r = qr.thin_R();
    let largest = (0..cols).map(|k| r.get(k, k).abs()).fold(0.0, f64::max);
    if let Some(column) = (0..cols).find(|&k| r.get(k, k).abs() <= RANK_TOLERANCE * largest) {
        return Err(LstsqError::RankDeficient { column });
    }

    let mut solution = DenseMatrix::from_fn(rows, 1, |i, _| rhs[i]);
    qr.solve_lstsq_in_place(&mut solution);
    Ok((0..cols).map(|k| solution[(k, 0)]).collect())
}

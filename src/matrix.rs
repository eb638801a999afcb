//! Matrix storage shared by the covariance and operator providers.
//!
//! A [`StoredMatrix`] is either a dense nalgebra matrix or a CSR sparse matrix. The representation is
//! chosen at configuration time and carried as a runtime flag, so the BLUE engine can pick its
//! computational path without knowing the concrete provider types. Sparse products are those of
//! nalgebra-sparse.

use std::borrow::Cow;

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;

use crate::error::{check_dimension, AssimilationError, Result};
use crate::models::{BackgroundCovariance, Representation};

#[derive(Debug, Clone, PartialEq)]
pub enum StoredMatrix {
    Dense(DMatrix<f64>),
    Sparse(CsrMatrix<f64>),
}

impl StoredMatrix {
    /// Stores `dense` with the requested representation.
    pub fn from_dense(dense: DMatrix<f64>, representation: Representation) -> Self {
        match representation {
            Representation::Dense => StoredMatrix::Dense(dense),
            Representation::Sparse => StoredMatrix::Sparse(CsrMatrix::from(&dense)),
        }
    }

    /// Builds a matrix from its rows. All rows must have the same length.
    pub fn from_rows(rows: &[Vec<f64>], representation: Representation) -> Result<Self> {
        let nrows = rows.len();
        let ncols = rows.first().map_or(0, |r| r.len());
        if let Some(bad) = rows.iter().find(|r| r.len() != ncols) {
            return Err(AssimilationError::DimensionMismatch {
                component: "StoredMatrix",
                what: "row length",
                expected: ncols,
                got: bad.len(),
            });
        }
        let dense = DMatrix::from_fn(nrows, ncols, |i, j| rows[i][j]);
        Ok(Self::from_dense(dense, representation))
    }

    /// n x n diagonal matrix with a constant diagonal.
    pub fn diagonal(n: usize, value: f64, representation: Representation) -> Self {
        match representation {
            Representation::Dense => StoredMatrix::Dense(DMatrix::from_diagonal_element(n, n, value)),
            Representation::Sparse => StoredMatrix::Sparse(sparse_diagonal(n, value)),
        }
    }

    pub fn nrows(&self) -> usize {
        match self {
            StoredMatrix::Dense(m) => m.nrows(),
            StoredMatrix::Sparse(m) => m.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            StoredMatrix::Dense(m) => m.ncols(),
            StoredMatrix::Sparse(m) => m.ncols(),
        }
    }

    pub fn representation(&self) -> Representation {
        match self {
            StoredMatrix::Dense(_) => Representation::Dense,
            StoredMatrix::Sparse(_) => Representation::Sparse,
        }
    }

    pub fn is_sparse(&self) -> bool {
        self.representation() == Representation::Sparse
    }

    /// Entry (i, j). Entries outside the sparsity pattern are zero.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        match self {
            StoredMatrix::Dense(m) => m[(i, j)],
            StoredMatrix::Sparse(m) => m.get_entry(i, j).map_or(0., |e| e.into_value()),
        }
    }

    /// Row `i` as a dense vector.
    pub fn row(&self, i: usize) -> DVector<f64> {
        match self {
            StoredMatrix::Dense(m) => m.row(i).transpose(),
            StoredMatrix::Sparse(m) => {
                let mut row = DVector::zeros(m.ncols());
                let sparse_row = m.row(i);
                for (&j, &v) in sparse_row.col_indices().iter().zip(sparse_row.values()) {
                    row[j] = v;
                }
                row
            }
        }
    }

    /// Matrix-vector product.
    pub fn mul_vector(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        check_dimension("StoredMatrix", "product vector length", self.ncols(), x.nrows())?;
        Ok(match self {
            StoredMatrix::Dense(m) => m * x,
            StoredMatrix::Sparse(m) => m * x,
        })
    }

    /// The matrix in CSR form, borrowed when already sparse.
    pub fn to_csr(&self) -> Cow<'_, CsrMatrix<f64>> {
        match self {
            StoredMatrix::Dense(m) => Cow::Owned(CsrMatrix::from(m)),
            StoredMatrix::Sparse(m) => Cow::Borrowed(m),
        }
    }

    /// The matrix in dense form, borrowed when already dense.
    pub fn to_dense(&self) -> Cow<'_, DMatrix<f64>> {
        match self {
            StoredMatrix::Dense(m) => Cow::Borrowed(m),
            StoredMatrix::Sparse(m) => Cow::Owned(DMatrix::from(m)),
        }
    }
}

/// A stored matrix used directly as the background error covariance.
impl BackgroundCovariance for StoredMatrix {
    fn background_error_covariance_row(&self, row: usize) -> DVector<f64> {
        self.row(row)
    }

    fn background_error_variance(&self) -> Option<&StoredMatrix> {
        Some(self)
    }

    fn is_error_sparse(&self) -> bool {
        self.is_sparse()
    }
}

/// Sparse diagonal matrix with every diagonal entry stored, zeros included.
pub fn sparse_diagonal(n: usize, value: f64) -> CsrMatrix<f64> {
    let mut diagonal = CsrMatrix::identity(n);
    diagonal.values_mut().iter_mut().for_each(|v| *v = value);
    diagonal
}

/// Balgovind correlation between two points at distance `d` for the length scale `scale`.
///
/// (1 + d/L) exp(-d/L)
pub fn balgovind(d: f64, scale: f64) -> f64 {
    let r = d / scale;
    (1. + r) * (-r).exp()
}

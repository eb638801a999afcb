//! Direct solvers for the innovation system (HBH' + R) x = d.
//!
//! A [`LinearSolver`] factors a square matrix once and solves against the factorisation in place.
//! Factorisations live for a single analysis and are never cached.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CscMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};

use crate::error::{check_dimension, AssimilationError, Result};
use crate::linalg::rcond::{check_rcond, rcond_cholesky};

/// Minimum allowable reciprocal condition number for PD matrix factorisations.
pub const LIMIT_PD: f64 = f64::EPSILON;

pub trait LinearSolver {
    type Factorization;

    /// Factors a square symmetric positive definite matrix.
    fn factor(&self, matrix: &CsrMatrix<f64>) -> Result<Self::Factorization>;

    /// Overwrites the columns of `rhs` with the solutions of the factored system.
    fn solve(&self, factorization: &Self::Factorization, rhs: &mut DMatrix<f64>) -> Result<()>;
}

/// Solver backend of the sparse computational path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverBackend {
    /// Sparse Cholesky factorisation of the CSC matrix.
    #[default]
    SparseCholesky,
    /// Dense Cholesky factorisation, for small systems.
    DenseCholesky,
}

impl SolverBackend {
    /// Factors `matrix` and solves in place against `rhs`.
    pub fn factor_and_solve(
        self,
        rcond_limit: f64,
        matrix: &CsrMatrix<f64>,
        rhs: &mut DVector<f64>,
    ) -> Result<()> {
        let mut columns = DMatrix::from_column_slice(rhs.nrows(), 1, rhs.as_slice());
        self.factor_and_solve_columns(rcond_limit, matrix, &mut columns)?;
        rhs.copy_from(&columns.column(0));
        Ok(())
    }

    /// Factors `matrix` once and solves in place against every column of `rhs`.
    pub fn factor_and_solve_columns(
        self,
        rcond_limit: f64,
        matrix: &CsrMatrix<f64>,
        rhs: &mut DMatrix<f64>,
    ) -> Result<()> {
        match self {
            SolverBackend::SparseCholesky => solve_with(&SparseCholesky { rcond_limit }, matrix, rhs),
            SolverBackend::DenseCholesky => solve_with(&DenseCholesky { rcond_limit }, matrix, rhs),
        }
    }
}

fn solve_with<S: LinearSolver>(solver: &S, matrix: &CsrMatrix<f64>, rhs: &mut DMatrix<f64>) -> Result<()> {
    let factorization = solver.factor(matrix)?;
    solver.solve(&factorization, rhs)
}

fn check_square(component: &'static str, matrix: &CsrMatrix<f64>) -> Result<()> {
    check_dimension(component, "square matrix columns", matrix.nrows(), matrix.ncols())
}

/// Sparse LL' factorisation.
#[derive(Debug, Clone, Copy)]
pub struct SparseCholesky {
    pub rcond_limit: f64,
}

impl Default for SparseCholesky {
    fn default() -> Self {
        SparseCholesky { rcond_limit: LIMIT_PD }
    }
}

impl LinearSolver for SparseCholesky {
    type Factorization = CscCholesky<f64>;

    fn factor(&self, matrix: &CsrMatrix<f64>) -> Result<CscCholesky<f64>> {
        check_square("SparseCholesky", matrix)?;
        let csc = CscMatrix::from(matrix);
        let factor = CscCholesky::factor(&csc).map_err(|e| {
            AssimilationError::numerical("SparseCholesky", format!("(HBH' + R) cannot be factorised: {:?}", e))
        })?;

        // Entries missing from the pattern of L are zero pivots
        let mut diagonal = DVector::zeros(matrix.nrows());
        for (i, j, v) in factor.l().triplet_iter() {
            if i == j {
                diagonal[i] = *v;
            }
        }
        check_rcond(rcond_cholesky(&diagonal), self.rcond_limit).map_err(|rcond| {
            AssimilationError::numerical("SparseCholesky", format!("(HBH' + R) not PD, rcond {:e}", rcond))
        })?;

        Ok(factor)
    }

    fn solve(&self, factorization: &CscCholesky<f64>, rhs: &mut DMatrix<f64>) -> Result<()> {
        check_dimension("SparseCholesky", "right-hand side", factorization.l().nrows(), rhs.nrows())?;
        factorization.solve_mut(rhs);
        Ok(())
    }
}

/// Dense LL' factorisation of the (converted) sparse matrix.
#[derive(Debug, Clone, Copy)]
pub struct DenseCholesky {
    pub rcond_limit: f64,
}

impl Default for DenseCholesky {
    fn default() -> Self {
        DenseCholesky { rcond_limit: LIMIT_PD }
    }
}

impl LinearSolver for DenseCholesky {
    type Factorization = Cholesky<f64, Dyn>;

    fn factor(&self, matrix: &CsrMatrix<f64>) -> Result<Cholesky<f64, Dyn>> {
        check_square("DenseCholesky", matrix)?;
        cholesky_checked("DenseCholesky", DMatrix::from(matrix), self.rcond_limit)
    }

    fn solve(&self, factorization: &Cholesky<f64, Dyn>, rhs: &mut DMatrix<f64>) -> Result<()> {
        check_dimension("DenseCholesky", "right-hand side", factorization.l_dirty().nrows(), rhs.nrows())?;
        factorization.solve_mut(rhs);
        Ok(())
    }
}

/// Cholesky factor of a dense SPD matrix, rejecting singular or badly conditioned matrices.
pub fn cholesky_checked(component: &'static str, matrix: DMatrix<f64>, rcond_limit: f64) -> Result<Cholesky<f64, Dyn>> {
    let factor = matrix
        .cholesky()
        .ok_or_else(|| AssimilationError::numerical(component, "(HBH' + R) not PD"))?;
    check_rcond(rcond_cholesky(&factor.l_dirty().diagonal()), rcond_limit).map_err(|rcond| {
        AssimilationError::numerical(component, format!("(HBH' + R) not PD, rcond {:e}", rcond))
    })?;
    Ok(factor)
}

/// Explicit inverse of a dense SPD matrix.
pub fn inverse_spd(component: &'static str, matrix: DMatrix<f64>, rcond_limit: f64) -> Result<DMatrix<f64>> {
    Ok(cholesky_checked(component, matrix, rcond_limit)?.inverse())
}

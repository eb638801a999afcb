#![allow(non_snake_case)]

//! Best Linear Unbiased Estimator (BLUE) analysis.
//!
//! Given the background state x_b, computes the analysis
//!
//! x_a = x_b + B H' (H B H' + R)^-1 (y - H x_b)
//!
//! in place. Two interchangeable computational paths produce the same analysis up to rounding:
//!
//! * dense ("vector"): HBH' is accumulated one row of B at a time, so peak memory is
//!   O(N_state + N_obs²). (HBH' + R) is inverted explicitly. Only rows and entries of B, H and R are needed.
//! * sparse ("matrix"): B, H and R must be materialized. BH' and HBH' are sparse products and
//!   (HBH' + R) is factored by a direct [`SolverBackend`].
//!
//! All intermediate matrices are local to one call: B, H, R and N_obs may change between cycles.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{check_dimension, AssimilationError, Result};
use crate::linalg::solver::{inverse_spd, SolverBackend, LIMIT_PD};
use crate::matrix::{sparse_diagonal, StoredMatrix};
use crate::models::{BackgroundCovariance, ObservationOperator};

const COMPONENT: &str = "BlueEngine";

/// Configured BLUE computation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlueComputation {
    /// Dense path, always.
    #[default]
    Vector,
    /// Sparse path, always. Fails when B, H or R is not materialized.
    Matrix,
    /// Sparse path when B, H and R are all sparse and materialized, dense path otherwise.
    Auto,
}

/// Computational path taken by one analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BluePath {
    Dense,
    Sparse,
}

/// Gain of one analysis, with the innovation covariance it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Gain {
    /// K = BH' (HBH' + R)^-1, N_state x N_obs.
    pub K: DMatrix<f64>,
    /// S = HBH' + R
    pub S: DMatrix<f64>,
    pub path: BluePath,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlueEngine {
    pub computation: BlueComputation,
    /// Factorisation used by the sparse path.
    pub solver: SolverBackend,
    /// Minimum reciprocal condition number accepted for (HBH' + R).
    pub rcond_limit: f64,
}

impl Default for BlueEngine {
    fn default() -> Self {
        BlueEngine::new(BlueComputation::default(), SolverBackend::default())
    }
}

impl BlueEngine {
    pub fn new(computation: BlueComputation, solver: SolverBackend) -> Self {
        BlueEngine {
            computation,
            solver,
            rcond_limit: LIMIT_PD,
        }
    }

    /// Chooses the computational path for the given collaborators.
    ///
    /// An explicit `Matrix` computation never falls back: a missing materialized matrix is a
    /// capability error. Mixed sparse/dense storage is allowed but only diagnosed.
    pub fn select_path(
        &self,
        background: &dyn BackgroundCovariance,
        observation: &dyn ObservationOperator,
    ) -> Result<BluePath> {
        let all_sparse =
            background.is_error_sparse() && observation.is_operator_sparse() && observation.is_error_sparse();
        let any_sparse =
            background.is_error_sparse() || observation.is_operator_sparse() || observation.is_error_sparse();

        match self.computation {
            BlueComputation::Vector => Ok(BluePath::Dense),
            BlueComputation::Matrix => {
                check_materialized(background, observation)?;
                if !all_sparse {
                    warn!(
                        "BLUE matrix computation with mixed storage (B sparse: {}, H sparse: {}, R sparse: {}); \
                         dense matrices are converted to sparse form",
                        background.is_error_sparse(),
                        observation.is_operator_sparse(),
                        observation.is_error_sparse()
                    );
                }
                Ok(BluePath::Sparse)
            }
            BlueComputation::Auto => {
                if all_sparse && check_materialized(background, observation).is_ok() {
                    Ok(BluePath::Sparse)
                } else {
                    if any_sparse {
                        warn!(
                            "At least one sparse matrix is used but not all of B, H and R are sparse and \
                             materialized; the analysis uses dense operations"
                        );
                    }
                    Ok(BluePath::Dense)
                }
            }
        }
    }

    /// Computes the innovation from `state` and applies the analysis to `state` in place.
    pub fn analyze(
        &self,
        state: &mut DVector<f64>,
        background: &dyn BackgroundCovariance,
        observation: &dyn ObservationOperator,
    ) -> Result<BluePath> {
        let innovation = observation.innovation(state)?;
        self.analyze_innovation(state, &innovation, background, observation)
    }

    /// Applies the analysis for a precomputed innovation to `state` in place.
    ///
    /// Returns the path taken. N_obs must be positive.
    pub fn analyze_innovation(
        &self,
        state: &mut DVector<f64>,
        innovation: &DVector<f64>,
        background: &dyn BackgroundCovariance,
        observation: &dyn ObservationOperator,
    ) -> Result<BluePath> {
        let Nobservation = observation.nobservation();
        if Nobservation == 0 {
            return Err(AssimilationError::EmptyObservation);
        }
        check_dimension(COMPONENT, "innovation", Nobservation, innovation.nrows())?;

        let path = self.select_path(background, observation)?;
        debug!(
            "BLUE analysis: {} state variables, {} observations, {:?} path",
            state.nrows(),
            Nobservation,
            path
        );
        match path {
            BluePath::Dense => self.analyze_dense(state, innovation, background, observation)?,
            BluePath::Sparse => self.analyze_sparse(state, innovation, background, observation)?,
        }
        Ok(path)
    }

    /// Dense computation: rows of B and H, entries of R.
    pub fn analyze_dense(
        &self,
        state: &mut DVector<f64>,
        innovation: &DVector<f64>,
        background: &dyn BackgroundCovariance,
        observation: &dyn ObservationOperator,
    ) -> Result<()> {
        let Nstate = state.nrows();
        let Nobservation = observation.nobservation();
        check_dimension(COMPONENT, "innovation", Nobservation, innovation.nrows())?;

        let HBHR_inv = self.innovation_covariance_inverse(background, observation, Nstate)?;
        let HBHR_inv_innovation = HBHR_inv * innovation;

        // x += BH' (HBH' + R)^-1 d, one row of BH' at a time.
        // Rows of B are fetched again rather than kept, so memory stays O(N_state + N_obs²).
        for r in 0..Nstate {
            let BHt_r = BHt_row(background, observation, r, Nstate)?;
            state[r] += BHt_r.dot(&HBHR_inv_innovation);
        }
        Ok(())
    }

    /// Sparse computation: materialized B, H and R, factorisation of (HBH' + R).
    pub fn analyze_sparse(
        &self,
        state: &mut DVector<f64>,
        innovation: &DVector<f64>,
        background: &dyn BackgroundCovariance,
        observation: &dyn ObservationOperator,
    ) -> Result<()> {
        let Nobservation = observation.nobservation();
        check_dimension(COMPONENT, "innovation", Nobservation, innovation.nrows())?;
        let (BHt, S) = sparse_products(background, observation, state.nrows())?;

        // x = (HBH' + R)^-1 d
        let mut x = innovation.clone();
        self.solver.factor_and_solve(self.rcond_limit, &S, &mut x)?;

        *state += &BHt * &x;
        Ok(())
    }

    /// Kalman gain K = BH' (HBH' + R)^-1 on the selected computational path.
    ///
    /// The returned S is the innovation covariance the gain was built from.
    pub fn gain(
        &self,
        background: &dyn BackgroundCovariance,
        observation: &dyn ObservationOperator,
        Nstate: usize,
    ) -> Result<Gain> {
        let Nobservation = observation.nobservation();
        if Nobservation == 0 {
            return Err(AssimilationError::EmptyObservation);
        }
        let path = self.select_path(background, observation)?;
        debug!("Gain: {} state variables, {} observations, {:?} path", Nstate, Nobservation, path);

        let (K, S) = match path {
            BluePath::Dense => {
                let mut BHt = DMatrix::zeros(Nstate, Nobservation);
                let mut S = DMatrix::zeros(Nobservation, Nobservation);
                for j in 0..Nstate {
                    let row = BHt_row(background, observation, j, Nstate)?;
                    accumulate_HBHt(&mut S, observation, j, &row);
                    BHt.set_row(j, &row.transpose());
                }
                add_observation_error(&mut S, observation);

                let S_inv = inverse_spd(COMPONENT, S.clone(), self.rcond_limit)?;
                (BHt * S_inv, S)
            }
            BluePath::Sparse => {
                let (BHt, S) = sparse_products(background, observation, Nstate)?;

                // S K' = H B, as B and S are symmetric
                let mut Kt = DMatrix::from(&BHt.transpose());
                self.solver.factor_and_solve_columns(self.rcond_limit, &S, &mut Kt)?;
                (Kt.transpose(), DMatrix::from(&S))
            }
        };
        Ok(Gain { K, S, path })
    }

    /// (HBH' + R)^-1, accumulating HBH' one row of BH' at a time.
    fn innovation_covariance_inverse(
        &self,
        background: &dyn BackgroundCovariance,
        observation: &dyn ObservationOperator,
        Nstate: usize,
    ) -> Result<DMatrix<f64>> {
        let Nobservation = observation.nobservation();
        let mut HBHR = DMatrix::zeros(Nobservation, Nobservation);

        for j in 0..Nstate {
            let row = BHt_row(background, observation, j, Nstate)?;
            accumulate_HBHt(&mut HBHR, observation, j, &row);
        }
        add_observation_error(&mut HBHR, observation);

        inverse_spd(COMPONENT, HBHR, self.rcond_limit)
    }
}

/// HBH' += H(:, j) BH'(j, :)
fn accumulate_HBHt(HBHt: &mut DMatrix<f64>, observation: &dyn ObservationOperator, j: usize, row: &DVector<f64>) {
    for r in 0..HBHt.nrows() {
        let H_entry = observation.tangent_operator(r, j);
        if H_entry != 0. {
            for c in 0..HBHt.ncols() {
                HBHt[(r, c)] += H_entry * row[c];
            }
        }
    }
}

fn add_observation_error(S: &mut DMatrix<f64>, observation: &dyn ObservationOperator) {
    for r in 0..S.nrows() {
        for c in 0..S.ncols() {
            S[(r, c)] += observation.observation_error_covariance(r, c);
        }
    }
}

/// BH' and HBH' + R from the materialized matrices, in CSR form.
fn sparse_products(
    background: &dyn BackgroundCovariance,
    observation: &dyn ObservationOperator,
    Nstate: usize,
) -> Result<(CsrMatrix<f64>, CsrMatrix<f64>)> {
    let Nobservation = observation.nobservation();
    let (B, H, R) = check_materialized(background, observation)?;

    check_dimension(COMPONENT, "rows of B", Nstate, B.nrows())?;
    check_dimension(COMPONENT, "columns of B", Nstate, B.ncols())?;
    check_dimension(COMPONENT, "rows of H", Nobservation, H.nrows())?;
    check_dimension(COMPONENT, "columns of H", Nstate, H.ncols())?;
    check_dimension(COMPONENT, "rows of R", Nobservation, R.nrows())?;
    check_dimension(COMPONENT, "columns of R", Nobservation, R.ncols())?;

    let B = B.to_csr();
    let H = H.to_csr();
    let R = R.to_csr();

    let BHt = &*B * &H.transpose();
    let HBHt = &*H * &BHt;
    // HBH' + R, the diagonal kept structurally present for the factorisation
    let S = &(&HBHt + &*R) + &sparse_diagonal(Nobservation, 0.);
    Ok((BHt, S))
}

/// Row `r` of BH'.
fn BHt_row(
    background: &dyn BackgroundCovariance,
    observation: &dyn ObservationOperator,
    r: usize,
    Nstate: usize,
) -> Result<DVector<f64>> {
    let B_row = background.background_error_covariance_row(r);
    check_dimension(COMPONENT, "background error covariance row", Nstate, B_row.nrows())?;

    let Nobservation = observation.nobservation();
    let mut row = DVector::zeros(Nobservation);
    for c in 0..Nobservation {
        let H_row = observation.tangent_operator_row(c);
        check_dimension(COMPONENT, "tangent operator row", Nstate, H_row.nrows())?;
        row[c] = B_row.dot(&H_row);
    }
    Ok(row)
}

type Materialized<'a> = (&'a StoredMatrix, &'a StoredMatrix, &'a StoredMatrix);

fn check_materialized<'a>(
    background: &'a dyn BackgroundCovariance,
    observation: &'a dyn ObservationOperator,
) -> Result<Materialized<'a>> {
    let B = background
        .background_error_variance()
        .ok_or(AssimilationError::CapabilityMismatch {
            component: "BLUE matrix computation",
            capability: "a materialized background error covariance matrix B",
        })?;
    let H = observation
        .tangent_operator_matrix()
        .ok_or(AssimilationError::CapabilityMismatch {
            component: "BLUE matrix computation",
            capability: "a materialized tangent observation operator matrix H",
        })?;
    let R = observation
        .observation_error_variance()
        .ok_or(AssimilationError::CapabilityMismatch {
            component: "BLUE matrix computation",
            capability: "a materialized observation error covariance matrix R",
        })?;
    Ok((B, H, R))
}

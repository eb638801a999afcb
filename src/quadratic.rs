#![allow(non_snake_case)]

//! Quadratic toy model.
//!
//! Each state component evolves as
//!
//! dx_i/dt = x' Q_i x + (L x)_i + b_i
//!
//! and is integrated with an explicit Euler scheme. Every term is optional. The background error
//! covariance is a Balgovind correlation scaled by a variance, or diagonal without a length scale.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{check_dimension, AssimilationError, Result};
use crate::matrix::{balgovind, StoredMatrix};
use crate::models::{BackgroundCovariance, Model, Representation, TangentLinearModel};

const NAME: &str = "QuadraticModel";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundConfig {
    pub variance: f64,
    /// Balgovind length scale, in grid points. Diagonal covariance when absent.
    #[serde(default)]
    pub balgovind_scale: Option<f64>,
    #[serde(default)]
    pub storage: Representation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelErrorConfig {
    pub variance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuadraticModelConfig {
    /// Initial state.
    pub state: Vec<f64>,
    pub delta_t: f64,
    pub final_time: f64,
    /// One N x N matrix Q_i per component.
    #[serde(default)]
    pub quadratic: Option<Vec<Vec<Vec<f64>>>>,
    /// N x N matrix L, by rows.
    #[serde(default)]
    pub linear: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub constant: Option<Vec<f64>>,
    pub background: BackgroundConfig,
    #[serde(default)]
    pub model_error: Option<ModelErrorConfig>,
}

impl QuadraticModelConfig {
    pub fn validate(&self) -> Result<()> {
        let Nstate = self.state.len();
        if Nstate == 0 {
            return Err(AssimilationError::configuration(NAME, "the initial state is empty"));
        }
        if !(self.delta_t > 0.) {
            return Err(AssimilationError::configuration(NAME, "delta_t must be positive"));
        }
        if !(self.final_time >= 0.) {
            return Err(AssimilationError::configuration(NAME, "final_time must be non-negative"));
        }
        if !(self.background.variance > 0.) {
            return Err(AssimilationError::configuration(NAME, "background variance must be positive"));
        }
        if let Some(scale) = self.background.balgovind_scale {
            if !(scale > 0.) {
                return Err(AssimilationError::configuration(NAME, "balgovind_scale must be positive"));
            }
        }
        if let Some(model_error) = &self.model_error {
            if !(model_error.variance >= 0.) {
                return Err(AssimilationError::configuration(NAME, "model error variance must be non-negative"));
            }
        }

        if let Some(quadratic) = &self.quadratic {
            check_dimension(NAME, "number of quadratic terms", Nstate, quadratic.len())?;
            for Q in quadratic {
                check_square(Q, Nstate, "quadratic term")?;
            }
        }
        if let Some(linear) = &self.linear {
            check_square(linear, Nstate, "linear term")?;
        }
        if let Some(constant) = &self.constant {
            check_dimension(NAME, "constant term", Nstate, constant.len())?;
        }
        Ok(())
    }
}

fn check_square(rows: &[Vec<f64>], n: usize, what: &'static str) -> Result<()> {
    check_dimension(NAME, what, n, rows.len())?;
    for row in rows {
        check_dimension(NAME, what, n, row.len())?;
    }
    Ok(())
}

fn to_matrix(rows: &[Vec<f64>]) -> DMatrix<f64> {
    let ncols = rows.first().map_or(0, |r| r.len());
    DMatrix::from_fn(rows.len(), ncols, |i, j| rows[i][j])
}

#[derive(Debug, Clone)]
pub struct QuadraticModel {
    x: DVector<f64>,
    /// Q_i + Q_i', for the tangent linear model.
    quadratic: Option<Vec<(DMatrix<f64>, DMatrix<f64>)>>,
    linear: Option<DMatrix<f64>>,
    constant: Option<DVector<f64>>,
    delta_t: f64,
    step: usize,
    final_step: usize,
    background: StoredMatrix,
    model_error: Option<DMatrix<f64>>,
}

impl QuadraticModel {
    pub fn new(config: &QuadraticModelConfig) -> Result<Self> {
        config.validate()?;
        let Nstate = config.state.len();

        let quadratic = config.quadratic.as_ref().map(|terms| {
            terms
                .iter()
                .map(|Q| {
                    let Q = to_matrix(Q);
                    let Q_sym = &Q + Q.transpose();
                    (Q, Q_sym)
                })
                .collect()
        });

        let variance = config.background.variance;
        let background = match config.background.balgovind_scale {
            Some(scale) => {
                let B = DMatrix::from_fn(Nstate, Nstate, |i, j| {
                    variance * balgovind((i as f64 - j as f64).abs(), scale)
                });
                StoredMatrix::from_dense(B, config.background.storage)
            }
            None => StoredMatrix::diagonal(Nstate, variance, config.background.storage),
        };

        Ok(QuadraticModel {
            x: DVector::from_vec(config.state.clone()),
            quadratic,
            linear: config.linear.as_deref().map(to_matrix),
            constant: config.constant.clone().map(DVector::from_vec),
            delta_t: config.delta_t,
            step: 0,
            final_step: (config.final_time / config.delta_t).round() as usize,
            background,
            model_error: config
                .model_error
                .as_ref()
                .map(|e| DMatrix::from_diagonal_element(Nstate, Nstate, e.variance)),
        })
    }

    pub fn delta_t(&self) -> f64 {
        self.delta_t
    }

    pub fn final_step(&self) -> usize {
        self.final_step
    }

    /// dx/dt at `x`.
    pub fn derivative(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut dx = DVector::zeros(x.nrows());
        if let Some(quadratic) = &self.quadratic {
            for (i, (Q, _)) in quadratic.iter().enumerate() {
                dx[i] += x.dot(&(Q * x));
            }
        }
        if let Some(L) = &self.linear {
            dx += L * x;
        }
        if let Some(b) = &self.constant {
            dx += b;
        }
        dx
    }
}

impl BackgroundCovariance for QuadraticModel {
    fn background_error_covariance_row(&self, row: usize) -> DVector<f64> {
        self.background.row(row)
    }

    fn background_error_variance(&self) -> Option<&StoredMatrix> {
        Some(&self.background)
    }

    fn is_error_sparse(&self) -> bool {
        self.background.is_sparse()
    }
}

impl Model for QuadraticModel {
    fn nstate(&self) -> usize {
        self.x.nrows()
    }

    fn state(&self) -> &DVector<f64> {
        &self.x
    }

    fn set_state(&mut self, state: &DVector<f64>) -> Result<()> {
        check_dimension(NAME, "state", self.x.nrows(), state.nrows())?;
        self.x.copy_from(state);
        Ok(())
    }

    fn forward(&mut self) -> Result<()> {
        let dx = self.derivative(&self.x);
        self.x.axpy(self.delta_t, &dx, 1.);
        self.step += 1;
        Ok(())
    }

    fn has_finished(&self) -> bool {
        self.step >= self.final_step
    }

    fn time(&self) -> f64 {
        self.step as f64 * self.delta_t
    }

    fn step(&self) -> usize {
        self.step
    }

    fn name(&self) -> &'static str {
        NAME
    }
}

impl TangentLinearModel for QuadraticModel {
    /// dx + delta_t J dx, with J_i. = x' (Q_i + Q_i') + L_i.
    fn apply_tangent_linear(&self, increment: &DVector<f64>) -> DVector<f64> {
        let mut J_increment = DVector::zeros(self.x.nrows());
        if let Some(quadratic) = &self.quadratic {
            for (i, (_, Q_sym)) in quadratic.iter().enumerate() {
                J_increment[i] += (Q_sym * &self.x).dot(increment);
            }
        }
        if let Some(L) = &self.linear {
            J_increment += L * increment;
        }
        let mut result = increment.clone();
        result.axpy(self.delta_t, &J_increment, 1.);
        result
    }

    fn model_error_variance(&self) -> Option<DMatrix<f64>> {
        self.model_error.clone()
    }
}

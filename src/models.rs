//! Data assimilation models.
//!
//! The forward model and the observation manager are external collaborators. Their capabilities are
//! defined here as traits so the BLUE engine and the drivers can be composed at runtime with any
//! conforming model / observation manager pair.
//!
//! State vectors, rows and innovations are dynamically sized `DVector<f64>`: the number of observations
//! may change at every step.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::matrix::StoredMatrix;

/// Storage representation of a covariance or operator matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Representation {
    #[default]
    Dense,
    Sparse,
}

/// Background error covariance B.
///
/// B is symmetric positive semi-definite, N_state x N_state.
pub trait BackgroundCovariance {
    /// Row `row` of B.
    fn background_error_covariance_row(&self, row: usize) -> DVector<f64>;

    /// B as a materialized matrix, when available. Required by the sparse computational path.
    fn background_error_variance(&self) -> Option<&StoredMatrix>;

    /// Is B stored sparse?
    fn is_error_sparse(&self) -> bool;
}

/// Tangent observation operator H, observation error covariance R and innovation.
pub trait ObservationOperator {
    /// Number of observations N_obs at the current time. May be zero.
    fn nobservation(&self) -> usize;

    /// Innovation y - H(x) for the state `state`.
    fn innovation(&self, state: &DVector<f64>) -> Result<DVector<f64>>;

    /// Row `row` of H.
    fn tangent_operator_row(&self, row: usize) -> DVector<f64>;

    /// Entry (i, j) of H.
    fn tangent_operator(&self, i: usize, j: usize) -> f64;

    /// H as a materialized matrix, when available.
    fn tangent_operator_matrix(&self) -> Option<&StoredMatrix>;

    /// Entry (i, j) of R.
    fn observation_error_covariance(&self, i: usize, j: usize) -> f64;

    /// R as a materialized matrix, when available.
    fn observation_error_variance(&self) -> Option<&StoredMatrix>;

    fn is_operator_sparse(&self) -> bool;

    fn is_error_sparse(&self) -> bool;

    /// Is R available as an explicit matrix?
    fn has_error_matrix(&self) -> bool {
        self.observation_error_variance().is_some()
    }
}

/// A forward model: owns the state vector and advances it one step at a time.
pub trait Model: BackgroundCovariance {
    /// Dimension of the state, fixed for the lifetime of the model.
    fn nstate(&self) -> usize;

    fn state(&self) -> &DVector<f64>;

    /// Overwrites the state. The dimension must be `nstate()`.
    fn set_state(&mut self, state: &DVector<f64>) -> Result<()>;

    /// Prepares the next step (e.g. boundary conditions).
    fn initialize_step(&mut self) -> Result<()> {
        Ok(())
    }

    /// Advances the model one time step.
    fn forward(&mut self) -> Result<()>;

    /// True once the configured final step is reached.
    fn has_finished(&self) -> bool;

    /// Current simulation time.
    fn time(&self) -> f64;

    /// Current step index, starting at 0.
    fn step(&self) -> usize;

    fn name(&self) -> &'static str;
}

/// A model with a tangent linear operator, for extended Kalman filtering.
pub trait TangentLinearModel: Model {
    /// Applies the tangent linear model, linearised at the current state, to `increment`.
    fn apply_tangent_linear(&self, increment: &DVector<f64>) -> DVector<f64>;

    /// Model error covariance Q added at each forecast, if any.
    fn model_error_variance(&self) -> Option<DMatrix<f64>> {
        None
    }
}

/// An observation manager: refreshes observation availability for the model's current time.
pub trait ObservationManager: ObservationOperator {
    /// Loads the observations available at the model's current step.
    fn load_observation(&mut self, model: &dyn Model) -> Result<()>;

    /// Were observations available at the last `load_observation`?
    fn has_observation(&self) -> bool;

    /// Dimension of the state space the operator applies to.
    fn state_dimension(&self) -> usize;

    fn name(&self) -> &'static str;
}

//! Models and observation managers with explicit matrices, shared by the integration tests.
//!
//! [`LinearModel`] evolves its state with x = M x and carries its background error covariance as a
//! [`StoredMatrix`]. [`MatrixObservations`] observes y through an explicit H and R, at a chosen set of
//! steps, and counts how often the analysis reads it.

#![allow(non_snake_case)]
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use nalgebra::{DMatrix, DVector};

use blue_estimate::events::{CycleEvent, EventKind, LifecycleTag, Listener, Recipient};
use blue_estimate::matrix::StoredMatrix;
use blue_estimate::models::{
    BackgroundCovariance, Model, ObservationManager, ObservationOperator, Representation, TangentLinearModel,
};
use blue_estimate::Result;

pub struct LinearModel {
    pub x: DVector<f64>,
    pub B: StoredMatrix,
    pub M: DMatrix<f64>,
    pub Q: Option<DMatrix<f64>>,
    pub step: usize,
    pub final_step: usize,
}

impl LinearModel {
    /// Identity dynamics.
    pub fn stationary(x: &[f64], B: StoredMatrix, final_step: usize) -> Self {
        let n = x.len();
        LinearModel {
            x: DVector::from_row_slice(x),
            B,
            M: DMatrix::identity(n, n),
            Q: None,
            step: 0,
            final_step,
        }
    }
}

impl BackgroundCovariance for LinearModel {
    fn background_error_covariance_row(&self, row: usize) -> DVector<f64> {
        self.B.row(row)
    }

    fn background_error_variance(&self) -> Option<&StoredMatrix> {
        Some(&self.B)
    }

    fn is_error_sparse(&self) -> bool {
        self.B.is_sparse()
    }
}

impl Model for LinearModel {
    fn nstate(&self) -> usize {
        self.x.nrows()
    }

    fn state(&self) -> &DVector<f64> {
        &self.x
    }

    fn set_state(&mut self, state: &DVector<f64>) -> Result<()> {
        self.x.copy_from(state);
        Ok(())
    }

    fn forward(&mut self) -> Result<()> {
        self.x = &self.M * &self.x;
        self.step += 1;
        Ok(())
    }

    fn has_finished(&self) -> bool {
        self.step >= self.final_step
    }

    fn time(&self) -> f64 {
        self.step as f64
    }

    fn step(&self) -> usize {
        self.step
    }

    fn name(&self) -> &'static str {
        "LinearModel"
    }
}

impl TangentLinearModel for LinearModel {
    fn apply_tangent_linear(&self, increment: &DVector<f64>) -> DVector<f64> {
        &self.M * increment
    }

    fn model_error_variance(&self) -> Option<DMatrix<f64>> {
        self.Q.clone()
    }
}

pub struct MatrixObservations {
    pub y: DVector<f64>,
    pub H: StoredMatrix,
    pub R: StoredMatrix,
    /// Is R exposed as a materialized matrix?
    pub R_materialized: bool,
    /// Steps with observations. Every step when `None`.
    pub observed_steps: Option<Vec<usize>>,
    pub available: bool,
    /// Reads of the innovation, H or R by the analysis.
    pub reads: Cell<usize>,
    pub loads: usize,
}

impl MatrixObservations {
    pub fn new(y: &[f64], H: StoredMatrix, R: StoredMatrix) -> Self {
        MatrixObservations {
            y: DVector::from_row_slice(y),
            H,
            R,
            R_materialized: true,
            observed_steps: None,
            available: true,
            reads: Cell::new(0),
            loads: 0,
        }
    }

    pub fn at_steps(mut self, steps: &[usize]) -> Self {
        self.observed_steps = Some(steps.to_vec());
        self
    }

    pub fn without_error_matrix(mut self) -> Self {
        self.R_materialized = false;
        self
    }

    fn read(&self) {
        self.reads.set(self.reads.get() + 1);
    }
}

impl ObservationOperator for MatrixObservations {
    fn nobservation(&self) -> usize {
        self.y.nrows()
    }

    fn innovation(&self, state: &DVector<f64>) -> Result<DVector<f64>> {
        self.read();
        Ok(&self.y - self.H.mul_vector(state)?)
    }

    fn tangent_operator_row(&self, row: usize) -> DVector<f64> {
        self.read();
        self.H.row(row)
    }

    fn tangent_operator(&self, i: usize, j: usize) -> f64 {
        self.read();
        self.H.get(i, j)
    }

    fn tangent_operator_matrix(&self) -> Option<&StoredMatrix> {
        self.read();
        Some(&self.H)
    }

    fn observation_error_covariance(&self, i: usize, j: usize) -> f64 {
        self.read();
        self.R.get(i, j)
    }

    fn observation_error_variance(&self) -> Option<&StoredMatrix> {
        self.read();
        if self.R_materialized {
            Some(&self.R)
        } else {
            None
        }
    }

    fn is_operator_sparse(&self) -> bool {
        self.H.is_sparse()
    }

    fn is_error_sparse(&self) -> bool {
        self.R.is_sparse()
    }
}

impl ObservationManager for MatrixObservations {
    fn load_observation(&mut self, model: &dyn Model) -> Result<()> {
        self.loads += 1;
        self.available = match &self.observed_steps {
            Some(steps) => steps.contains(&model.step()),
            None => true,
        };
        Ok(())
    }

    fn has_observation(&self) -> bool {
        self.available
    }

    fn state_dimension(&self) -> usize {
        self.H.ncols()
    }

    fn name(&self) -> &'static str {
        "MatrixObservations"
    }
}

pub fn stored(rows: &[&[f64]], representation: Representation) -> StoredMatrix {
    let rows: Vec<Vec<f64>> = rows.iter().map(|r| r.to_vec()).collect();
    StoredMatrix::from_rows(&rows, representation).expect("consistent rows")
}

/// A unique path in the temporary directory.
pub fn temp_path(name: &str) -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("blue_estimate_{}_{}", std::process::id(), name));
    let _ = std::fs::remove_file(&path);
    path
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub recipient: Recipient,
    pub kind: EventKind,
    pub step: usize,
    pub state: DVector<f64>,
}

/// Listener keeping every event. Clones share the same log.
#[derive(Clone, Default)]
pub struct Recorder {
    pub events: Rc<RefCell<Vec<Recorded>>>,
}

impl Recorder {
    pub fn kinds(&self) -> Vec<(Recipient, EventKind, usize)> {
        self.events.borrow().iter().map(|e| (e.recipient, e.kind, e.step)).collect()
    }

    pub fn lifecycle(&self) -> Vec<(Recipient, LifecycleTag, usize)> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e.kind {
                EventKind::Lifecycle(tag) => Some((e.recipient, tag, e.step)),
                _ => None,
            })
            .collect()
    }
}

impl Listener for Recorder {
    fn notify(&mut self, event: &CycleEvent<'_>) -> Result<()> {
        self.events.borrow_mut().push(Recorded {
            recipient: event.recipient,
            kind: event.kind,
            step: event.step,
            state: event.state.clone(),
        });
        Ok(())
    }
}

#![allow(non_snake_case)]

//! Extended Kalman filter.
//!
//! The state error covariance P is carried by the driver, initialized from the model's background
//! error covariance. The forecast propagates it with the tangent linear model,
//! P = M P M' + Q. The analysis computes the gain K once, on the configured computational path
//! with B = P, corrects the state with K d and updates P -= K (HPH' + R) K'.

use log::{debug, info};
use nalgebra::{DMatrix, DVector};

use crate::config::{AssimilationConfig, DisplayConfig};
use crate::error::{check_dimension, Result};
use crate::estimators::blue::BlueEngine;
use crate::events::{EventKind, LifecycleTag, Listener, Notifier, Recipient, Stage};
use crate::matrix::StoredMatrix;
use crate::methods::{require_phase, CyclePhase};
use crate::models::{ObservationManager, Representation, TangentLinearModel};

const NAME: &str = "ExtendedKalmanFilter";

pub struct ExtendedKalmanFilter<M: TangentLinearModel, O: ObservationManager> {
    model: M,
    observation_manager: O,
    engine: BlueEngine,
    analyze_first_step: bool,
    display: DisplayConfig,
    notifier: Notifier,
    phase: CyclePhase,
    iteration: usize,
    analyses: usize,
    /// State error covariance.
    P: DMatrix<f64>,
}

impl<M: TangentLinearModel, O: ObservationManager> ExtendedKalmanFilter<M, O> {
    pub fn new(
        model: M,
        observation_manager: O,
        assimilation: &AssimilationConfig,
        display: &DisplayConfig,
    ) -> Result<Self> {
        let Nstate = model.nstate();
        check_dimension(NAME, "observation operator columns", Nstate, observation_manager.state_dimension())?;

        let mut P = DMatrix::zeros(Nstate, Nstate);
        for r in 0..Nstate {
            let row = model.background_error_covariance_row(r);
            check_dimension(NAME, "background error covariance row", Nstate, row.nrows())?;
            P.set_row(r, &row.transpose());
        }

        Ok(ExtendedKalmanFilter {
            model,
            observation_manager,
            engine: assimilation.engine(),
            analyze_first_step: assimilation.analyze_first_step,
            display: *display,
            notifier: Notifier::new(),
            phase: CyclePhase::Uninitialized,
            iteration: 0,
            analyses: 0,
            P,
        })
    }

    pub fn add_listener(&mut self, listener: Box<dyn Listener>) {
        self.notifier.add(listener);
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn observation_manager(&self) -> &O {
        &self.observation_manager
    }

    /// Current state error covariance.
    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.P
    }

    pub fn phase(&self) -> CyclePhase {
        if self.phase != CyclePhase::Uninitialized && self.model.has_finished() {
            CyclePhase::Finished
        } else {
            self.phase
        }
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn analysis_count(&self) -> usize {
        self.analyses
    }

    pub fn initialize(&mut self) -> Result<()> {
        require_phase("initialize", self.phase, &[CyclePhase::Uninitialized])?;
        self.send(Recipient::All, EventKind::Begin(Stage::Initialize))?;
        if self.analyze_first_step {
            self.analyze_current()?;
        }
        self.send(Recipient::Model, EventKind::Lifecycle(LifecycleTag::InitialCondition))?;
        self.send(Recipient::All, EventKind::End(Stage::Initialize))?;
        self.phase = CyclePhase::Initialized;
        Ok(())
    }

    pub fn initialize_step(&mut self) -> Result<()> {
        require_phase(
            "initialize_step",
            self.phase(),
            &[CyclePhase::Initialized, CyclePhase::Forecast, CyclePhase::Analyzed],
        )?;
        self.send(Recipient::All, EventKind::Begin(Stage::InitializeStep))?;
        if self.display.show_time {
            info!("Current step: {} (time {})", self.model.step(), self.model.time());
        }
        self.model.initialize_step()?;
        self.send(Recipient::All, EventKind::End(Stage::InitializeStep))?;
        self.phase = CyclePhase::StepReady;
        Ok(())
    }

    pub fn forward(&mut self) -> Result<()> {
        require_phase("forward", self.phase, &[CyclePhase::StepReady])?;
        self.send(Recipient::All, EventKind::Begin(Stage::Forward))?;

        // Linearised at the state before the forecast
        self.propagate_covariance()?;
        self.model.forward()?;
        self.iteration += 1;
        if self.display.show_iteration {
            info!("Performing iteration {}", self.iteration);
        }

        self.send(Recipient::Model, EventKind::Lifecycle(LifecycleTag::Forecast))?;
        self.send(Recipient::ObservationManager, EventKind::Lifecycle(LifecycleTag::Forecast))?;
        self.send(Recipient::All, EventKind::End(Stage::Forward))?;
        self.phase = CyclePhase::Forecast;
        Ok(())
    }

    pub fn analyze(&mut self) -> Result<bool> {
        require_phase("analyze", self.phase, &[CyclePhase::Forecast])?;
        self.send(Recipient::All, EventKind::Begin(Stage::Analyze))?;
        let analyzed = self.analyze_current()?;
        if analyzed {
            self.send(Recipient::Model, EventKind::Lifecycle(LifecycleTag::Analysis))?;
            self.send(Recipient::ObservationManager, EventKind::Lifecycle(LifecycleTag::Analysis))?;
        }
        self.send(Recipient::All, EventKind::End(Stage::Analyze))?;
        self.phase = CyclePhase::Analyzed;
        Ok(analyzed)
    }

    pub fn has_finished(&self) -> bool {
        self.model.has_finished()
    }

    pub fn run(&mut self) -> Result<()> {
        self.initialize()?;
        while !self.has_finished() {
            self.initialize_step()?;
            self.forward()?;
            self.analyze()?;
        }
        Ok(())
    }

    /// P = M P M' + Q
    fn propagate_covariance(&mut self) -> Result<()> {
        let Nstate = self.model.nstate();
        let mut M = DMatrix::zeros(Nstate, Nstate);
        let mut unit = DVector::zeros(Nstate);
        for j in 0..Nstate {
            unit[j] = 1.;
            let column = self.model.apply_tangent_linear(&unit);
            check_dimension(NAME, "tangent linear model output", Nstate, column.nrows())?;
            M.set_column(j, &column);
            unit[j] = 0.;
        }

        self.P.quadform_tr(1., &M, &self.P.clone(), 0.);
        if let Some(Q) = self.model.model_error_variance() {
            check_dimension(NAME, "model error covariance rows", Nstate, Q.nrows())?;
            check_dimension(NAME, "model error covariance columns", Nstate, Q.ncols())?;
            self.P += Q;
        }
        Ok(())
    }

    fn analyze_current(&mut self) -> Result<bool> {
        self.observation_manager.load_observation(&self.model)?;
        let Nobservation = self.observation_manager.nobservation();
        if !self.observation_manager.has_observation() || Nobservation == 0 {
            debug!("No observation at step {}", self.model.step());
            return Ok(false);
        }
        if self.display.show_time {
            info!("Performing EKF analysis at time step [{}]", self.model.time());
        }
        let Nstate = self.model.nstate();
        let representation = if self.model.is_error_sparse() {
            Representation::Sparse
        } else {
            Representation::Dense
        };
        let background = StoredMatrix::from_dense(self.P.clone(), representation);
        let observation = &self.observation_manager;

        // Gain from the forecast covariance, before the state is corrected
        let gain = self.engine.gain(&background, observation, Nstate)?;

        let mut state = self.model.state().clone();
        let innovation = observation.innovation(&state)?;
        check_dimension(NAME, "innovation", Nobservation, innovation.nrows())?;
        state += &gain.K * &innovation;
        self.model.set_state(&state)?;

        // P -= K (HPH' + R) K'
        self.P.quadform_tr(-1., &gain.K, &gain.S, 1.);

        self.analyses += 1;
        Ok(true)
    }

    fn send(&mut self, recipient: Recipient, kind: EventKind) -> Result<()> {
        self.notifier.send(NAME, recipient, kind, &self.model)
    }
}

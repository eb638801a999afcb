//! Optimal interpolation: forecast with the model, then correct the state with a BLUE analysis
//! whenever observations are available.

use log::{debug, info};

use crate::config::{AssimilationConfig, DisplayConfig};
use crate::error::{check_dimension, Result};
use crate::estimators::blue::BlueEngine;
use crate::events::{EventKind, LifecycleTag, Listener, Notifier, Recipient, Stage};
use crate::methods::{require_phase, CyclePhase};
use crate::models::{Model, ObservationManager};

const NAME: &str = "OptimalInterpolation";

pub struct OptimalInterpolation<M: Model, O: ObservationManager> {
    model: M,
    observation_manager: O,
    engine: BlueEngine,
    analyze_first_step: bool,
    display: DisplayConfig,
    notifier: Notifier,
    phase: CyclePhase,
    iteration: usize,
    analyses: usize,
}

impl<M: Model, O: ObservationManager> OptimalInterpolation<M, O> {
    /// Builds the driver. The observation operator must apply to the model state space.
    pub fn new(
        model: M,
        observation_manager: O,
        assimilation: &AssimilationConfig,
        display: &DisplayConfig,
    ) -> Result<Self> {
        check_dimension(
            NAME,
            "observation operator columns",
            model.nstate(),
            observation_manager.state_dimension(),
        )?;
        Ok(OptimalInterpolation {
            model,
            observation_manager,
            engine: assimilation.engine(),
            analyze_first_step: assimilation.analyze_first_step,
            display: *display,
            notifier: Notifier::new(),
            phase: CyclePhase::Uninitialized,
            iteration: 0,
            analyses: 0,
        })
    }

    /// Replaces the BLUE engine, e.g. to tune the condition limit.
    pub fn with_engine(mut self, engine: BlueEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn add_listener(&mut self, listener: Box<dyn Listener>) {
        self.notifier.add(listener);
    }

    pub fn engine(&self) -> &BlueEngine {
        &self.engine
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn observation_manager(&self) -> &O {
        &self.observation_manager
    }

    pub fn into_parts(self) -> (M, O) {
        (self.model, self.observation_manager)
    }

    pub fn phase(&self) -> CyclePhase {
        if self.phase != CyclePhase::Uninitialized && self.model.has_finished() {
            CyclePhase::Finished
        } else {
            self.phase
        }
    }

    /// Number of completed forecasts.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Number of analyses that actually corrected the state.
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

    /// Corrects the forecast when observations are available.
    ///
    /// Returns false, leaving the state untouched, when there is no observation at this step.
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

    /// Runs the whole cycle: initialization, then forecast / analysis until the model has finished.
    pub fn run(&mut self) -> Result<()> {
        self.initialize()?;
        while !self.has_finished() {
            self.initialize_step()?;
            self.forward()?;
            self.analyze()?;
        }
        Ok(())
    }

    fn analyze_current(&mut self) -> Result<bool> {
        self.observation_manager.load_observation(&self.model)?;
        if !self.observation_manager.has_observation() || self.observation_manager.nobservation() == 0 {
            debug!("No observation at step {}", self.model.step());
            return Ok(false);
        }
        if self.display.show_time {
            info!("Performing optimal interpolation at time step [{}]", self.model.time());
        }

        let mut state = self.model.state().clone();
        let path = self
            .engine
            .analyze(&mut state, &self.model, &self.observation_manager)?;
        self.model.set_state(&state)?;
        self.analyses += 1;
        debug!("Analysis {} done on the {:?} path", self.analyses, path);
        Ok(true)
    }

    fn send(&mut self, recipient: Recipient, kind: EventKind) -> Result<()> {
        self.notifier.send(NAME, recipient, kind, &self.model)
    }
}

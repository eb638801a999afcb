//! Model-only driver, used for reference ("truth") runs.

use log::info;

use crate::config::DisplayConfig;
use crate::error::Result;
use crate::events::{EventKind, LifecycleTag, Listener, Notifier, Recipient, Stage};
use crate::methods::{require_phase, CyclePhase};
use crate::models::Model;

const NAME: &str = "ForwardDriver";

pub struct ForwardDriver<M: Model> {
    model: M,
    display: DisplayConfig,
    notifier: Notifier,
    phase: CyclePhase,
    iteration: usize,
    /// Times of the initial condition and of every forecast.
    times: Vec<f64>,
}

impl<M: Model> ForwardDriver<M> {
    pub fn new(model: M, display: &DisplayConfig) -> Self {
        ForwardDriver {
            model,
            display: *display,
            notifier: Notifier::new(),
            phase: CyclePhase::Uninitialized,
            iteration: 0,
            times: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Box<dyn Listener>) {
        self.notifier.add(listener);
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
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

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn initialize(&mut self) -> Result<()> {
        require_phase("initialize", self.phase, &[CyclePhase::Uninitialized])?;
        self.send(Recipient::All, EventKind::Begin(Stage::Initialize))?;
        self.times.push(self.model.time());
        self.send(Recipient::Model, EventKind::Lifecycle(LifecycleTag::InitialCondition))?;
        self.send(Recipient::All, EventKind::End(Stage::Initialize))?;
        self.phase = CyclePhase::Initialized;
        Ok(())
    }

    pub fn initialize_step(&mut self) -> Result<()> {
        require_phase(
            "initialize_step",
            self.phase(),
            &[CyclePhase::Initialized, CyclePhase::Forecast],
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
        self.times.push(self.model.time());
        if self.display.show_iteration {
            info!("Performing iteration {}", self.iteration);
        }
        self.send(Recipient::Model, EventKind::Lifecycle(LifecycleTag::Forecast))?;
        self.send(Recipient::All, EventKind::End(Stage::Forward))?;
        self.phase = CyclePhase::Forecast;
        Ok(())
    }

    pub fn has_finished(&self) -> bool {
        self.model.has_finished()
    }

    pub fn run(&mut self) -> Result<()> {
        self.initialize()?;
        while !self.has_finished() {
            self.initialize_step()?;
            self.forward()?;
        }
        Ok(())
    }

    fn send(&mut self, recipient: Recipient, kind: EventKind) -> Result<()> {
        self.notifier.send(NAME, recipient, kind, &self.model)
    }
}

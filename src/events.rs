//! Lifecycle notifications.
//!
//! Drivers hold an ordered list of [`Listener`]s and notify them, in registration order, with a
//! [`CycleEvent`]: a recipient, an event kind and the model's step, time and state. Listeners are
//! the extension point for output saving; they do not take part in the estimation.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Model;

/// Intended recipient of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recipient {
    All,
    Model,
    ObservationManager,
}

/// Driver operation delimited by `Begin` / `End` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Initialize,
    InitializeStep,
    Forward,
    Analyze,
}

/// Lifecycle tag of a model state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleTag {
    InitialCondition,
    Forecast,
    Analysis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Begin(Stage),
    End(Stage),
    Lifecycle(LifecycleTag),
}

#[derive(Debug, Clone, Copy)]
pub struct CycleEvent<'a> {
    /// Name of the notifying driver.
    pub driver: &'static str,
    pub recipient: Recipient,
    pub kind: EventKind,
    pub step: usize,
    pub time: f64,
    pub state: &'a DVector<f64>,
}

impl CycleEvent<'_> {
    /// The lifecycle tag, for lifecycle events.
    pub fn tag(&self) -> Option<LifecycleTag> {
        match self.kind {
            EventKind::Lifecycle(tag) => Some(tag),
            _ => None,
        }
    }
}

pub trait Listener {
    fn notify(&mut self, event: &CycleEvent<'_>) -> Result<()>;
}

impl<F> Listener for F
where
    F: FnMut(&CycleEvent<'_>) -> Result<()>,
{
    fn notify(&mut self, event: &CycleEvent<'_>) -> Result<()> {
        self(event)
    }
}

/// Ordered listener registry owned by a driver.
#[derive(Default)]
pub struct Notifier {
    listeners: Vec<Box<dyn Listener>>,
}

impl Notifier {
    pub fn new() -> Self {
        Notifier::default()
    }

    pub fn add(&mut self, listener: Box<dyn Listener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Notifies every listener. The first listener error stops the notification and is returned.
    pub fn send(
        &mut self,
        driver: &'static str,
        recipient: Recipient,
        kind: EventKind,
        model: &dyn Model,
    ) -> Result<()> {
        if self.listeners.is_empty() {
            return Ok(());
        }
        let event = CycleEvent {
            driver,
            recipient,
            kind,
            step: model.step(),
            time: model.time(),
            state: model.state(),
        };
        for listener in self.listeners.iter_mut() {
            listener.notify(&event)?;
        }
        Ok(())
    }
}

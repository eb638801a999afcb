//! Drivers: forward simulation, optimal interpolation and extended Kalman filtering.
//!
//! A driver owns a model and (except the forward driver) an observation manager, and is advanced by
//! the caller's loop:
//!
//! ```text
//! initialize()
//! while !has_finished() {
//!     initialize_step(); forward(); analyze();
//! }
//! ```

pub mod extended_kalman;
pub mod forward;
pub mod optimal_interpolation;

use crate::error::{AssimilationError, Result};

/// Driver state machine.
///
/// `Uninitialized -> Initialized -> {StepReady -> Forecast -> Analyzed}* -> Finished`.
/// `Finished` is reported once the model reaches its final step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Uninitialized,
    Initialized,
    /// The step is initialized, the forecast is pending.
    StepReady,
    /// The forecast is done, the analysis is pending.
    Forecast,
    Analyzed,
    Finished,
}

pub(crate) fn require_phase(operation: &'static str, phase: CyclePhase, allowed: &[CyclePhase]) -> Result<()> {
    if allowed.contains(&phase) {
        Ok(())
    } else {
        Err(AssimilationError::InvalidPhase { operation, phase })
    }
}

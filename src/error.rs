//! Errors raised by the assimilation engine and its drivers.
//!
//! Every failure is fatal for the run: errors propagate through the drivers to the caller
//! which is expected to terminate. Each variant names the failing component and the violated precondition.

use std::path::PathBuf;

use thiserror::Error;

use crate::methods::CyclePhase;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AssimilationError>;

#[derive(Debug, Error)]
pub enum AssimilationError {
    /// Malformed or inconsistent configuration, detected at construction.
    #[error("configuration error in {component}: {reason}")]
    Configuration {
        component: &'static str,
        reason: String,
    },

    /// Inconsistent vector or matrix dimensions.
    #[error("dimension mismatch in {component} ({what}): expected {expected}, got {got}")]
    DimensionMismatch {
        component: &'static str,
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// A computation path needs a representation the collaborator cannot provide.
    #[error("{component} requires {capability}, which is not available")]
    CapabilityMismatch {
        component: &'static str,
        capability: &'static str,
    },

    /// Singular or non positive definite system, or a failed factorisation.
    #[error("numerical failure in {component}: {reason}")]
    Numerical {
        component: &'static str,
        reason: String,
    },

    #[error("I/O error on \"{path}\": {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Observation or operator data present but unusable (truncated, wrong length).
    #[error("malformed data in \"{path}\": {reason}")]
    ObservationFormat { path: PathBuf, reason: String },

    #[error("invalid configuration file \"{path}\": {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{operation} cannot be called while the driver is {phase:?}")]
    InvalidPhase {
        operation: &'static str,
        phase: CyclePhase,
    },

    /// The analysis was requested with no observation.
    #[error("BLUE analysis requested without any observation")]
    EmptyObservation,

    #[error("unable to acquire lock file \"{path}\" after {attempts} attempts")]
    LockTimeout { path: PathBuf, attempts: usize },
}

impl AssimilationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AssimilationError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn configuration(component: &'static str, reason: impl Into<String>) -> Self {
        AssimilationError::Configuration {
            component,
            reason: reason.into(),
        }
    }

    pub(crate) fn numerical(component: &'static str, reason: impl Into<String>) -> Self {
        AssimilationError::Numerical {
            component,
            reason: reason.into(),
        }
    }

    /// True for the configuration class of errors (raised before any step runs).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AssimilationError::Configuration { .. }
                | AssimilationError::DimensionMismatch { .. }
                | AssimilationError::Parse { .. }
        )
    }
}

/// Checks that a dimension matches its expected value.
pub(crate) fn check_dimension(
    component: &'static str,
    what: &'static str,
    expected: usize,
    got: usize,
) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(AssimilationError::DimensionMismatch {
            component,
            what,
            expected,
            got,
        })
    }
}

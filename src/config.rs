//! Run configuration, loaded from JSON.
//!
//! ```json
//! {
//!   "display": { "show_iteration": false, "show_time": true },
//!   "data_assimilation": {
//!     "method": "optimal_interpolation",
//!     "analyze_first_step": false,
//!     "blue_computation": "vector",
//!     "linear_solver": "sparse_cholesky"
//!   },
//!   "model": {
//!     "state": [1.0, 0.5],
//!     "delta_t": 0.01,
//!     "final_time": 1.0,
//!     "linear": [[-0.1, 0.0], [0.0, -0.2]],
//!     "background": { "variance": 1.0, "balgovind_scale": 1.0, "storage": "dense" }
//!   },
//!   "observation": {
//!     "file": "truth.bin",
//!     "kind": "state",
//!     "period": 1,
//!     "nskip": 1,
//!     "error": { "variance": 0.1 },
//!     "operator": { "definition": { "diagonal": 1.0 } }
//!   },
//!   "output": { "file": "analysis.bin", "tags": ["analysis"] }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AssimilationError, Result};
use crate::estimators::blue::{BlueComputation, BlueEngine};
use crate::linalg::solver::SolverBackend;
use crate::observation::ObservationConfig;
use crate::output::OutputConfig;
use crate::quadratic::QuadraticModelConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub show_iteration: bool,
    pub show_time: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Forward,
    #[default]
    OptimalInterpolation,
    ExtendedKalmanFilter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssimilationConfig {
    pub method: Method,
    /// Analyze the initial condition before the first forecast.
    pub analyze_first_step: bool,
    pub blue_computation: BlueComputation,
    pub linear_solver: SolverBackend,
}

impl AssimilationConfig {
    pub fn engine(&self) -> BlueEngine {
        BlueEngine::new(self.blue_computation, self.linear_solver)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub data_assimilation: AssimilationConfig,
    pub model: QuadraticModelConfig,
    #[serde(default)]
    pub observation: Option<ObservationConfig>,
    #[serde(default)]
    pub output: Option<OutputConfig>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| AssimilationError::io(path, e))?;
        Self::parse(&text, path)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Self::parse(text, Path::new("<string>"))
    }

    fn parse(text: &str, path: &Path) -> Result<Self> {
        let config: Config = serde_json::from_str(text).map_err(|source| AssimilationError::Parse {
            path: PathBuf::from(path),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        if let Some(observation) = &self.observation {
            observation.validate()?;
        }
        if let Some(output) = &self.output {
            output.validate()?;
        }
        match self.data_assimilation.method {
            Method::OptimalInterpolation | Method::ExtendedKalmanFilter if self.observation.is_none() => Err(
                AssimilationError::configuration("data_assimilation", "the method requires an \"observation\" section"),
            ),
            _ => Ok(()),
        }
    }
}

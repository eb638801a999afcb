//! Saving model states to a record file.
//!
//! [`OutputSaver`] is a [`Listener`]: it appends the model state, in the observation record format,
//! for the selected lifecycle tags. A forward run saving forecasts therefore produces an observation
//! file of kind `state`. The saved state may be perturbed with Gaussian noise, to build synthetic
//! observations for twin experiments.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{AssimilationError, Result};
use crate::events::{CycleEvent, LifecycleTag, Listener, Recipient};
use crate::lock::{LockFile, LockOptions};
use crate::observation::write_record;
use crate::perturbation::GaussianPerturbation;

const NAME: &str = "OutputSaver";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerturbationConfig {
    pub variance: f64,
    #[serde(default)]
    pub seed: u64,
}

fn default_tags() -> Vec<LifecycleTag> {
    vec![LifecycleTag::InitialCondition, LifecycleTag::Forecast]
}

fn one() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub file: PathBuf,
    #[serde(default = "default_tags")]
    pub tags: Vec<LifecycleTag>,
    /// Only steps multiple of `period` are saved.
    #[serde(default = "one")]
    pub period: usize,
    /// Guard every write with `<file>.lock`.
    #[serde(default)]
    pub lock: bool,
    #[serde(default)]
    pub perturbation: Option<PerturbationConfig>,
}

impl OutputConfig {
    pub fn validate(&self) -> Result<()> {
        if self.period == 0 {
            return Err(AssimilationError::configuration(NAME, "period must be positive"));
        }
        if let Some(perturbation) = &self.perturbation {
            if !(perturbation.variance >= 0.) {
                return Err(AssimilationError::configuration(NAME, "perturbation variance must be non-negative"));
            }
        }
        Ok(())
    }
}

/// Path of the lock guarding `path`.
pub fn lock_path(path: &Path) -> PathBuf {
    let mut lock: OsString = path.as_os_str().to_owned();
    lock.push(".lock");
    PathBuf::from(lock)
}

pub struct OutputSaver {
    path: PathBuf,
    tags: Vec<LifecycleTag>,
    period: usize,
    lock: Option<LockOptions>,
    perturbation: Option<(GaussianPerturbation, StdRng)>,
    records: usize,
}

impl OutputSaver {
    /// Saver truncating `path`.
    pub fn new(path: impl Into<PathBuf>, tags: &[LifecycleTag]) -> Result<Self> {
        let path = path.into();
        File::create(&path).map_err(|e| AssimilationError::io(&path, e))?;
        Ok(OutputSaver {
            path,
            tags: tags.to_vec(),
            period: 1,
            lock: None,
            perturbation: None,
            records: 0,
        })
    }

    pub fn from_config(config: &OutputConfig, nstate: usize) -> Result<Self> {
        config.validate()?;
        let mut saver = OutputSaver::new(&config.file, &config.tags)?.with_period(config.period);
        if config.lock {
            saver = saver.with_lock(LockOptions::default());
        }
        if let Some(perturbation) = &config.perturbation {
            saver = saver.with_perturbation(
                GaussianPerturbation::isotropic(nstate, perturbation.variance)?,
                perturbation.seed,
            );
        }
        Ok(saver)
    }

    pub fn with_period(mut self, period: usize) -> Self {
        self.period = period.max(1);
        self
    }

    pub fn with_lock(mut self, options: LockOptions) -> Self {
        self.lock = Some(options);
        self
    }

    /// Perturbs every saved state, with a generator seeded by `seed`.
    pub fn with_perturbation(mut self, perturbation: GaussianPerturbation, seed: u64) -> Self {
        self.perturbation = Some((perturbation, StdRng::seed_from_u64(seed)));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_written(&self) -> usize {
        self.records
    }

    /// Appends one record.
    pub fn save(&mut self, values: &[f64]) -> Result<()> {
        let lock = match self.lock {
            Some(options) => Some(LockFile::acquire(lock_path(&self.path), options)?),
            None => None,
        };

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| AssimilationError::io(&self.path, e))?;
        let mut writer = BufWriter::new(file);
        write_record(&mut writer, values)
            .and_then(|_| writer.flush())
            .map_err(|e| AssimilationError::io(&self.path, e))?;
        self.records += 1;

        if let Some(lock) = lock {
            lock.release()?;
        }
        Ok(())
    }
}

impl Listener for OutputSaver {
    fn notify(&mut self, event: &CycleEvent<'_>) -> Result<()> {
        if event.recipient != Recipient::Model || event.step % self.period != 0 {
            return Ok(());
        }
        match event.tag() {
            Some(tag) if self.tags.contains(&tag) => {
                let mut state = event.state.clone();
                if let Some((perturbation, rng)) = &mut self.perturbation {
                    perturbation.perturb(&mut state, rng)?;
                }
                self.save(state.as_slice())
            }
            _ => Ok(()),
        }
    }
}

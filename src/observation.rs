#![allow(non_snake_case)]

//! Linear observation manager.
//!
//! Observations are available every `period * nskip` steps. At an observation step, the record
//! `step / (period * nskip)` is read from an [`ObservationStore`]. Records of kind `state` hold a
//! full model state and are mapped through H; records of kind `observation` are used as is.
//!
//! # Record format
//!
//! A record is a little-endian `i32` length followed by that many little-endian `f64` values.
//! Records are stored back to back, so record `k` of length `n` starts at byte `k * (4 + 8 n)`.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{check_dimension, AssimilationError, Result};
use crate::matrix::StoredMatrix;
use crate::models::{Model, ObservationManager, ObservationOperator, Representation};

const NAME: &str = "LinearObservationManager";

const HEADER_SIZE: usize = std::mem::size_of::<i32>();
const VALUE_SIZE: usize = std::mem::size_of::<f64>();

/// Byte size of one record of `length` values.
pub fn record_size(length: usize) -> usize {
    HEADER_SIZE + length * VALUE_SIZE
}

/// Writes one record.
pub fn write_record<W: Write>(writer: &mut W, values: &[f64]) -> io::Result<()> {
    let length = i32::try_from(values.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "record too long"))?;
    writer.write_all(&length.to_le_bytes())?;
    for v in values {
        writer.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

/// Reads one record of `expected` values. `path` only labels errors.
pub fn read_record<R: Read>(reader: &mut R, path: &Path, expected: usize) -> Result<DVector<f64>> {
    let mut header = [0u8; HEADER_SIZE];
    read_exact(reader, &mut header, path, "record header")?;
    let length = i32::from_le_bytes(header);
    if usize::try_from(length).map_or(true, |l| l != expected) {
        return Err(AssimilationError::ObservationFormat {
            path: path.to_path_buf(),
            reason: format!("record length is {}, expected {}", length, expected),
        });
    }

    let mut bytes = vec![0u8; expected * VALUE_SIZE];
    read_exact(reader, &mut bytes, path, "record values")?;
    let values = bytes.chunks_exact(VALUE_SIZE).map(|chunk| {
        let mut value = [0u8; VALUE_SIZE];
        value.copy_from_slice(chunk);
        f64::from_le_bytes(value)
    });
    Ok(DVector::from_iterator(expected, values))
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], path: &Path, what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => AssimilationError::ObservationFormat {
            path: path.to_path_buf(),
            reason: format!("truncated {}", what),
        },
        _ => AssimilationError::io(path, e),
    })
}

/// Source of observation records.
pub trait ObservationStore {
    /// Record `index`, which must hold `length` values.
    fn read_record(&self, index: usize, length: usize) -> Result<DVector<f64>>;
}

/// Records read from a binary file.
#[derive(Debug, Clone)]
pub struct BinaryObservationFile {
    path: PathBuf,
}

impl BinaryObservationFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        BinaryObservationFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ObservationStore for BinaryObservationFile {
    fn read_record(&self, index: usize, length: usize) -> Result<DVector<f64>> {
        let file = File::open(&self.path).map_err(|e| AssimilationError::io(&self.path, e))?;
        let mut reader = BufReader::new(file);
        let position = (index * record_size(length)) as u64;
        reader
            .seek(SeekFrom::Start(position))
            .map_err(|e| AssimilationError::io(&self.path, e))?;
        read_record(&mut reader, &self.path, length)
    }
}

/// Records held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryObservations {
    records: Vec<DVector<f64>>,
}

impl MemoryObservations {
    pub fn new(records: Vec<DVector<f64>>) -> Self {
        MemoryObservations { records }
    }

    pub fn push(&mut self, record: DVector<f64>) {
        self.records.push(record);
    }
}

impl ObservationStore for MemoryObservations {
    fn read_record(&self, index: usize, length: usize) -> Result<DVector<f64>> {
        let record = self.records.get(index).ok_or_else(|| AssimilationError::ObservationFormat {
            path: PathBuf::from("<memory>"),
            reason: format!("no record {} among {}", index, self.records.len()),
        })?;
        check_dimension("MemoryObservations", "record length", length, record.nrows())?;
        Ok(record.clone())
    }
}

/// Content of the observation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    /// Model states, observed through H.
    #[default]
    State,
    /// Observation vectors.
    Observation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorDefinition {
    /// value * I, with as many observations as state variables.
    Diagonal(f64),
    /// Rows of H.
    Matrix(Vec<Vec<f64>>),
    /// Text file, one row of H per line.
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConfig {
    pub definition: OperatorDefinition,
    #[serde(default)]
    pub storage: Representation,
}

/// How R is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStorage {
    /// Entries only, no materialized matrix.
    #[default]
    Entries,
    Dense,
    Sparse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorConfig {
    pub variance: f64,
    #[serde(default)]
    pub storage: ErrorStorage,
}

fn one() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationConfig {
    pub file: PathBuf,
    #[serde(default)]
    pub kind: ObservationKind,
    #[serde(default = "one")]
    pub period: usize,
    #[serde(default = "one")]
    pub nskip: usize,
    pub error: ErrorConfig,
    pub operator: OperatorConfig,
}

impl ObservationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.period == 0 {
            return Err(AssimilationError::configuration(NAME, "period must be positive"));
        }
        if self.nskip == 0 {
            return Err(AssimilationError::configuration(NAME, "nskip must be positive"));
        }
        if !(self.error.variance > 0.) {
            return Err(AssimilationError::configuration(NAME, "observation error variance must be positive"));
        }
        if let OperatorDefinition::Matrix(rows) = &self.operator.definition {
            if rows.is_empty() {
                return Err(AssimilationError::configuration(NAME, "the operator matrix has no row"));
            }
        }
        Ok(())
    }
}

/// Reads an operator written as text, one row per line.
pub fn read_operator_file(path: &Path) -> Result<Vec<Vec<f64>>> {
    let text = fs::read_to_string(path).map_err(|e| AssimilationError::io(path, e))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.split_whitespace()
                .map(|token| {
                    token.parse::<f64>().map_err(|e| AssimilationError::ObservationFormat {
                        path: path.to_path_buf(),
                        reason: format!("invalid operator entry \"{}\": {}", token, e),
                    })
                })
                .collect()
        })
        .collect()
}

/// Observation manager with a linear, time-independent operator H and a diagonal R.
#[derive(Debug, Clone)]
pub struct LinearObservationManager<S: ObservationStore = BinaryObservationFile> {
    store: S,
    kind: ObservationKind,
    period: usize,
    nskip: usize,
    Nstate: usize,
    operator: StoredMatrix,
    error_variance: f64,
    error_storage: ErrorStorage,
    error: Option<StoredMatrix>,
    observation: DVector<f64>,
    available: bool,
}

impl LinearObservationManager<BinaryObservationFile> {
    /// Manager reading the configured observation file.
    pub fn from_config(config: &ObservationConfig, Nstate: usize) -> Result<Self> {
        LinearObservationManager::new(config, Nstate, BinaryObservationFile::new(&config.file))
    }
}

impl<S: ObservationStore> LinearObservationManager<S> {
    /// Builds H and R. The operator must have `Nstate` columns.
    pub fn new(config: &ObservationConfig, Nstate: usize, store: S) -> Result<Self> {
        config.validate()?;
        let storage = config.operator.storage;
        let operator = match &config.operator.definition {
            OperatorDefinition::Diagonal(value) => StoredMatrix::diagonal(Nstate, *value, storage),
            OperatorDefinition::Matrix(rows) => StoredMatrix::from_rows(rows, storage)?,
            OperatorDefinition::File(path) => StoredMatrix::from_rows(&read_operator_file(path)?, storage)?,
        };
        check_dimension(NAME, "tangent operator columns", Nstate, operator.ncols())?;
        let Nobservation = operator.nrows();
        if Nobservation == 0 {
            return Err(AssimilationError::configuration(NAME, "the tangent operator has no row"));
        }

        let variance = config.error.variance;
        let error = match config.error.storage {
            ErrorStorage::Entries => None,
            ErrorStorage::Dense => Some(StoredMatrix::diagonal(Nobservation, variance, Representation::Dense)),
            ErrorStorage::Sparse => Some(StoredMatrix::diagonal(Nobservation, variance, Representation::Sparse)),
        };

        Ok(LinearObservationManager {
            store,
            kind: config.kind,
            period: config.period,
            nskip: config.nskip,
            Nstate,
            operator,
            error_variance: variance,
            error_storage: config.error.storage,
            error,
            observation: DVector::zeros(Nobservation),
            available: false,
        })
    }

    /// Observations loaded at the last observation step.
    pub fn observation(&self) -> &DVector<f64> {
        &self.observation
    }

    /// H x
    pub fn apply_operator(&self, state: &DVector<f64>) -> Result<DVector<f64>> {
        check_dimension(NAME, "state", self.Nstate, state.nrows())?;
        self.operator.mul_vector(state)
    }

    fn observation_interval(&self) -> usize {
        self.period * self.nskip
    }
}

impl<S: ObservationStore> ObservationOperator for LinearObservationManager<S> {
    fn nobservation(&self) -> usize {
        if self.available {
            self.operator.nrows()
        } else {
            0
        }
    }

    fn innovation(&self, state: &DVector<f64>) -> Result<DVector<f64>> {
        if !self.available {
            return Ok(DVector::zeros(0));
        }
        Ok(&self.observation - self.apply_operator(state)?)
    }

    fn tangent_operator_row(&self, row: usize) -> DVector<f64> {
        self.operator.row(row)
    }

    fn tangent_operator(&self, i: usize, j: usize) -> f64 {
        self.operator.get(i, j)
    }

    fn tangent_operator_matrix(&self) -> Option<&StoredMatrix> {
        Some(&self.operator)
    }

    fn observation_error_covariance(&self, i: usize, j: usize) -> f64 {
        if i == j {
            self.error_variance
        } else {
            0.
        }
    }

    fn observation_error_variance(&self) -> Option<&StoredMatrix> {
        self.error.as_ref()
    }

    fn is_operator_sparse(&self) -> bool {
        self.operator.is_sparse()
    }

    fn is_error_sparse(&self) -> bool {
        self.error_storage == ErrorStorage::Sparse
    }
}

impl<S: ObservationStore> ObservationManager for LinearObservationManager<S> {
    fn load_observation(&mut self, model: &dyn Model) -> Result<()> {
        let step = model.step();
        let interval = self.observation_interval();
        self.available = step % interval == 0;
        if !self.available {
            return Ok(());
        }

        let index = step / interval;
        debug!("Loading observation record {} at step {}", index, step);
        self.observation = match self.kind {
            ObservationKind::State => {
                let state = self.store.read_record(index, self.Nstate)?;
                self.operator.mul_vector(&state)?
            }
            ObservationKind::Observation => self.store.read_record(index, self.operator.nrows())?,
        };
        Ok(())
    }

    fn has_observation(&self) -> bool {
        self.available
    }

    fn state_dimension(&self) -> usize {
        self.Nstate
    }

    fn name(&self) -> &'static str {
        NAME
    }
}

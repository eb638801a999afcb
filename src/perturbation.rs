#![allow(non_snake_case)]

//! Gaussian perturbations N(0, C), sampled as L z with C = L L' and z standard normal.

use nalgebra::{DMatrix, DVector};
use rand_core::RngCore;
use rand_distr::{Distribution, StandardNormal};

use crate::error::{check_dimension, AssimilationError, Result};

const NAME: &str = "GaussianPerturbation";

#[derive(Debug, Clone, PartialEq)]
pub struct GaussianPerturbation {
    /// Lower triangular factor of the covariance.
    L: DMatrix<f64>,
}

impl GaussianPerturbation {
    /// Perturbation with covariance `C`, which must be PD.
    pub fn new(C: &DMatrix<f64>) -> Result<Self> {
        let cholesky = C
            .clone()
            .cholesky()
            .ok_or_else(|| AssimilationError::configuration(NAME, "perturbation covariance not PD"))?;
        Ok(GaussianPerturbation { L: cholesky.unpack() })
    }

    /// Independent perturbations of variance `variance` on `n` variables.
    pub fn isotropic(n: usize, variance: f64) -> Result<Self> {
        if !(variance >= 0.) {
            return Err(AssimilationError::configuration(NAME, "perturbation variance must be non-negative"));
        }
        Ok(GaussianPerturbation {
            L: DMatrix::from_diagonal_element(n, n, variance.sqrt()),
        })
    }

    pub fn dimension(&self) -> usize {
        self.L.nrows()
    }

    pub fn sample<R: RngCore + ?Sized>(&self, rng: &mut R) -> DVector<f64> {
        let z: DVector<f64> = DVector::from_fn(self.dimension(), |_, _| StandardNormal.sample(&mut *rng));
        &self.L * z
    }

    /// Adds a sample to `x`.
    pub fn perturb<R: RngCore + ?Sized>(&self, x: &mut DVector<f64>, rng: &mut R) -> Result<()> {
        check_dimension(NAME, "perturbed vector", self.dimension(), x.nrows())?;
        *x += self.sample(rng);
        Ok(())
    }
}

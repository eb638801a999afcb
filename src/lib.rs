//!
//! BLUE+Estimate, a data assimilation library.
//!
//! Data assimilation combines a dynamical model, which evolves a state vector over discrete time steps, with a stream of noisy
//! observations of that state. Under a Gaussian error assumption, the Best Linear Unbiased Estimator (BLUE) gives the analysis
//!
//! x_a = x_b + B H' (H B H' + R)^-1 (y - H x_b)
//!
//! where x_b is the forecast (background) state, B the background error covariance, H the tangent observation operator,
//! R the observation error covariance and y the observations.
//!
//! The BLUE engine has two interchangeable computational paths. The dense path needs only rows of B and H and entries of R.
//! The sparse path works on materialized sparse matrices and factorises (H B H' + R) with a direct solver.
//!
//! Models and observation managers are represented by the capability traits of [`models`]. Drivers in [`methods`] run the
//! forecast / analysis cycle: forward simulation, optimal interpolation and the extended Kalman filter. They notify registered
//! [`events::Listener`]s at every stage of the cycle, for example to save states with [`output::OutputSaver`].
//!
//! # Licensing
//!
//! The copyright notice is that of the MIT license.
//!
//! Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the "Software"), to deal in the Software without restriction,
//! including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software,
//! and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
//!
//! The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
//!
//! THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//! FITNESS FOR A PARTICULAR PURPOSE AND NON INFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY,
//! WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

pub mod config;
pub mod error;
pub mod estimators;
pub mod events;
pub mod linalg;
pub mod lock;
pub mod matrix;
pub mod methods;
pub mod models;
pub mod observation;
pub mod output;
pub mod perturbation;
pub mod quadratic;

pub use error::{AssimilationError, Result};

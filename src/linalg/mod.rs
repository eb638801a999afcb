//! Linear algebra support: condition estimates and linear solvers.

pub mod rcond;
pub mod solver;

//! State estimators.

pub mod blue;

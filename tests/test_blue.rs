//! Test the BLUE analysis on its dense and sparse computational paths.
//!
//! Both paths are checked against closed-form results and against each other.

#![allow(non_snake_case)]

mod fixtures;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use nalgebra::{DMatrix, DVector};

use blue_estimate::estimators::blue::{BlueComputation, BlueEngine, BluePath};
use blue_estimate::linalg::solver::SolverBackend;
use blue_estimate::matrix::{balgovind, StoredMatrix};
use blue_estimate::models::Representation::{Dense, Sparse};
use blue_estimate::models::Representation;
use blue_estimate::AssimilationError;

use fixtures::{stored, MatrixObservations};

fn engine(computation: BlueComputation) -> BlueEngine {
    BlueEngine::new(computation, SolverBackend::default())
}

/// Scalar scenario: B = 4, H = 1, R = 1, x_b = 0, y = 3.
fn scalar_scenario(representation: Representation) -> (DVector<f64>, StoredMatrix, MatrixObservations) {
    let B = stored(&[&[4.]], representation);
    let obs = MatrixObservations::new(&[3.], stored(&[&[1.]], representation), stored(&[&[1.]], representation));
    (DVector::from_element(1, 0.), B, obs)
}

#[test]
fn scalar_scenario_dense_path() {
    let (mut x, B, obs) = scalar_scenario(Dense);
    let path = engine(BlueComputation::Vector).analyze(&mut x, &B, &obs).unwrap();
    assert_eq!(path, BluePath::Dense);
    assert_relative_eq!(x[0], 2.4, epsilon = 1e-12);
}

#[test]
fn scalar_scenario_sparse_path() {
    let (mut x, B, obs) = scalar_scenario(Sparse);
    let path = engine(BlueComputation::Matrix).analyze(&mut x, &B, &obs).unwrap();
    assert_eq!(path, BluePath::Sparse);
    assert_relative_eq!(x[0], 2.4, epsilon = 1e-12);
}

#[test]
fn scalar_scenario_sparse_path_dense_storage() {
    let (mut x, B, obs) = scalar_scenario(Dense);
    let path = engine(BlueComputation::Matrix).analyze(&mut x, &B, &obs).unwrap();
    assert_eq!(path, BluePath::Sparse);
    assert_relative_eq!(x[0], 2.4, epsilon = 1e-12);
}

/// 6 state variables with Balgovind correlations, 3 observations of averaged pairs.
fn correlated_problem(representation: Representation) -> (DVector<f64>, StoredMatrix, MatrixObservations) {
    let n = 6;
    let B = DMatrix::from_fn(n, n, |i, j| 1.5 * balgovind((i as f64 - j as f64).abs(), 2.));
    let H = stored(
        &[
            &[0.5, 0.5, 0., 0., 0., 0.],
            &[0., 0., 1., 0., 0., 0.],
            &[0., 0., 0., 0.25, 0., 0.75],
        ],
        representation,
    );
    let R = stored(&[&[0.4, 0.1, 0.], &[0.1, 0.3, 0.], &[0., 0., 0.2]], representation);
    let x = DVector::from_row_slice(&[1., -0.5, 0.25, 2., 0., -1.]);
    let obs = MatrixObservations::new(&[0.7, 0.9, -0.3], H, R);
    (x, StoredMatrix::from_dense(B, representation), obs)
}

#[test]
fn dense_and_sparse_paths_agree() {
    let (x, B, obs) = correlated_problem(Sparse);

    let mut x_dense = x.clone();
    engine(BlueComputation::Vector).analyze(&mut x_dense, &B, &obs).unwrap();

    let mut x_sparse = x.clone();
    engine(BlueComputation::Matrix).analyze(&mut x_sparse, &B, &obs).unwrap();

    let mut x_dense_solver = x.clone();
    BlueEngine::new(BlueComputation::Matrix, SolverBackend::DenseCholesky)
        .analyze(&mut x_dense_solver, &B, &obs)
        .unwrap();

    assert_relative_eq!(x_dense, x_sparse, max_relative = 1e-9, epsilon = 1e-12);
    assert_relative_eq!(x_dense, x_dense_solver, max_relative = 1e-9, epsilon = 1e-12);
    assert!((&x_dense - &x).norm() > 0.1, "analysis should move the state");
}

#[test]
fn dense_path_matches_closed_form() {
    let (x, B, obs) = correlated_problem(Dense);
    let B_dense = B.to_dense().into_owned();
    let H = obs.H.to_dense().into_owned();
    let R = obs.R.to_dense().into_owned();

    let S = &H * &B_dense * H.transpose() + R;
    let K = &B_dense * H.transpose() * S.try_inverse().unwrap();
    let expected = &x + K * (&obs.y - &H * &x);

    let mut x_a = x.clone();
    engine(BlueComputation::Vector).analyze(&mut x_a, &B, &obs).unwrap();
    assert_relative_eq!(x_a, expected, max_relative = 1e-9, epsilon = 1e-12);
}

#[test]
fn zero_innovation_leaves_state_unchanged() {
    for computation in [BlueComputation::Vector, BlueComputation::Matrix] {
        let (x, B, mut obs) = correlated_problem(Sparse);
        obs.y = obs.H.mul_vector(&x).unwrap();

        let mut x_a = x.clone();
        engine(computation).analyze(&mut x_a, &B, &obs).unwrap();
        assert_abs_diff_eq!(x_a, x, epsilon = 1e-14);
    }
}

#[test]
fn scalar_observation_gain() {
    let B = stored(&[&[2., 0.5], &[0.5, 1.]], Dense);
    let obs = MatrixObservations::new(&[1.], stored(&[&[1., 1.]], Dense), stored(&[&[0.5]], Dense));

    let gain = engine(BlueComputation::Vector).gain(&B, &obs, 2).unwrap();

    // BH' / (HBH' + R)
    assert_eq!(gain.path, BluePath::Dense);
    assert_eq!(gain.K.shape(), (2, 1));
    assert_relative_eq!(gain.K[(0, 0)], 2.5 / 4.5, epsilon = 1e-12);
    assert_relative_eq!(gain.K[(1, 0)], 1.5 / 4.5, epsilon = 1e-12);
    assert_relative_eq!(gain.S[(0, 0)], 4.5, epsilon = 1e-12);
}

#[test]
fn gain_on_both_paths() {
    let (x, B, obs) = correlated_problem(Sparse);
    let H = obs.H.to_dense().into_owned();
    let R = obs.R.to_dense().into_owned();
    let B_dense = B.to_dense().into_owned();
    let S_expected = &H * &B_dense * H.transpose() + &R;

    let dense = engine(BlueComputation::Vector).gain(&B, &obs, 6).unwrap();
    let sparse = engine(BlueComputation::Matrix).gain(&B, &obs, 6).unwrap();
    assert_eq!(dense.path, BluePath::Dense);
    assert_eq!(sparse.path, BluePath::Sparse);
    assert_relative_eq!(dense.S, S_expected, epsilon = 1e-12);
    assert_relative_eq!(sparse.S, S_expected, epsilon = 1e-12);
    assert_relative_eq!(sparse.K, dense.K, max_relative = 1e-10, epsilon = 1e-12);

    // K d is the analysis increment
    let mut x_a = x.clone();
    engine(BlueComputation::Matrix).analyze(&mut x_a, &B, &obs).unwrap();
    let d = &obs.y - &H * &x;
    assert_relative_eq!(x_a - &x, &sparse.K * d, max_relative = 1e-10, epsilon = 1e-12);
}

#[test]
fn gain_reads_each_row_once() {
    let (_, B, obs) = correlated_problem(Dense);
    engine(BlueComputation::Vector).gain(&B, &obs, 6).unwrap();
    // N_state N_obs rows of H, N_state N_obs entries of H, N_obs² entries of R
    assert_eq!(obs.reads.get(), 6 * 3 + 6 * 3 + 3 * 3);
}

#[test]
fn dense_path_streams_rows() {
    let (mut x, B, obs) = correlated_problem(Dense);
    engine(BlueComputation::Vector).analyze(&mut x, &B, &obs).unwrap();
    // Innovation, then rows of BH' twice: once for HBH' + R, once for the update
    assert_eq!(obs.reads.get(), 1 + (6 * 3 + 6 * 3 + 3 * 3) + 6 * 3);
}

#[test]
fn stored_matrix_product() {
    for representation in [Dense, Sparse] {
        let A = stored(&[&[1., 0., 2.], &[0., 3., 0.]], representation);
        let y = A.mul_vector(&DVector::from_row_slice(&[1., 2., 3.])).unwrap();
        assert_eq!(y.as_slice(), &[7., 6.]);

        let err = A.mul_vector(&DVector::zeros(2)).unwrap_err();
        assert!(matches!(err, AssimilationError::DimensionMismatch { expected: 3, got: 2, .. }));
    }
}

#[test]
fn singular_system_is_a_numerical_error() {
    // HBH' rank deficient and R = 0
    for (computation, representation) in [(BlueComputation::Vector, Dense), (BlueComputation::Matrix, Sparse)] {
        let B = StoredMatrix::diagonal(2, 1., representation);
        let H = stored(&[&[1., 0.], &[1., 0.]], representation);
        let R = StoredMatrix::from_dense(DMatrix::zeros(2, 2), representation);
        let obs = MatrixObservations::new(&[1., 2.], H, R);

        let mut x = DVector::zeros(2);
        let err = engine(computation).analyze(&mut x, &B, &obs).unwrap_err();
        assert!(
            matches!(err, AssimilationError::Numerical { .. }),
            "{:?}: unexpected error {:?}",
            computation,
            err
        );
    }
}

#[test]
fn singular_system_with_dense_solver_backend() {
    let B = StoredMatrix::diagonal(2, 1., Sparse);
    let H = stored(&[&[1., 0.], &[1., 0.]], Sparse);
    let R = StoredMatrix::from_dense(DMatrix::zeros(2, 2), Sparse);
    let obs = MatrixObservations::new(&[1., 2.], H, R);

    let mut x = DVector::zeros(2);
    let err = BlueEngine::new(BlueComputation::Matrix, SolverBackend::DenseCholesky)
        .analyze(&mut x, &B, &obs)
        .unwrap_err();
    assert!(matches!(err, AssimilationError::Numerical { .. }));
}

#[test]
fn matrix_computation_requires_materialized_error_covariance() {
    let (mut x, B, obs) = scalar_scenario(Sparse);
    let obs = obs.without_error_matrix();

    let err = engine(BlueComputation::Matrix).analyze(&mut x, &B, &obs).unwrap_err();
    assert!(matches!(err, AssimilationError::CapabilityMismatch { .. }));
    assert_eq!(x[0], 0.);
}

#[test]
fn auto_selection() {
    let auto = engine(BlueComputation::Auto);

    let (_, B, obs) = scalar_scenario(Sparse);
    assert_eq!(auto.select_path(&B, &obs).unwrap(), BluePath::Sparse);

    // Mixed storage
    let B_dense = stored(&[&[4.]], Dense);
    assert_eq!(auto.select_path(&B_dense, &obs).unwrap(), BluePath::Dense);

    // All sparse, but R not materialized
    let obs = obs.without_error_matrix();
    assert_eq!(auto.select_path(&B, &obs).unwrap(), BluePath::Dense);

    let (mut x, B, obs) = scalar_scenario(Sparse);
    let obs = obs.without_error_matrix();
    assert_eq!(auto.analyze(&mut x, &B, &obs).unwrap(), BluePath::Dense);
    assert_relative_eq!(x[0], 2.4, epsilon = 1e-12);
}

#[test]
fn explicit_modes_do_not_fall_back() {
    let (_, B, obs) = scalar_scenario(Dense);
    assert_eq!(engine(BlueComputation::Vector).select_path(&B, &obs).unwrap(), BluePath::Dense);
    // Mixed or dense storage is converted, not rejected
    assert_eq!(engine(BlueComputation::Matrix).select_path(&B, &obs).unwrap(), BluePath::Sparse);

    let (_, B, obs) = scalar_scenario(Sparse);
    assert_eq!(engine(BlueComputation::Vector).select_path(&B, &obs).unwrap(), BluePath::Dense);
}

#[test]
fn empty_observation_is_rejected() {
    let B = StoredMatrix::diagonal(2, 1., Dense);
    let obs = MatrixObservations::new(
        &[],
        StoredMatrix::Dense(DMatrix::zeros(0, 2)),
        StoredMatrix::Dense(DMatrix::zeros(0, 0)),
    );
    let mut x = DVector::zeros(2);
    let err = engine(BlueComputation::Vector).analyze(&mut x, &B, &obs).unwrap_err();
    assert!(matches!(err, AssimilationError::EmptyObservation));
}

#[test]
fn innovation_dimension_is_checked() {
    let (mut x, B, obs) = scalar_scenario(Dense);
    let innovation = DVector::from_element(2, 1.);
    let err = engine(BlueComputation::Vector)
        .analyze_innovation(&mut x, &innovation, &B, &obs)
        .unwrap_err();
    assert!(matches!(
        err,
        AssimilationError::DimensionMismatch { expected: 1, got: 2, .. }
    ));
}

#[test]
fn operator_dimension_is_checked_on_sparse_path() {
    let B = StoredMatrix::diagonal(3, 1., Sparse);
    let obs = MatrixObservations::new(&[1.], stored(&[&[1., 0.]], Sparse), stored(&[&[1.]], Sparse));
    let mut x = DVector::zeros(3);
    let err = engine(BlueComputation::Matrix).analyze_innovation(&mut x, &DVector::from_element(1, 1.), &B, &obs);
    assert!(matches!(err, Err(AssimilationError::DimensionMismatch { .. })));
}

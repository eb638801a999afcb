//! Test configuration parsing and validation, and a complete twin experiment built from it.

mod fixtures;

use std::fs;

use approx::assert_relative_eq;

use blue_estimate::config::{Config, Method};
use blue_estimate::estimators::blue::BlueComputation;
use blue_estimate::events::LifecycleTag;
use blue_estimate::linalg::solver::SolverBackend;
use blue_estimate::methods::forward::ForwardDriver;
use blue_estimate::methods::optimal_interpolation::OptimalInterpolation;
use blue_estimate::models::{BackgroundCovariance, Model, Representation};
use blue_estimate::observation::{LinearObservationManager, ObservationKind, OperatorDefinition};
use blue_estimate::output::OutputSaver;
use blue_estimate::quadratic::QuadraticModel;
use blue_estimate::AssimilationError;

use fixtures::temp_path;

const MINIMAL: &str = r#"{
    "model": {
        "state": [1.0, 2.0, 3.0],
        "delta_t": 0.1,
        "final_time": 0.5,
        "background": { "variance": 2.0 }
    },
    "data_assimilation": { "method": "forward" }
}"#;

#[test]
fn defaults() {
    let config = Config::from_json_str(MINIMAL).unwrap();
    assert_eq!(config.data_assimilation.method, Method::Forward);
    assert!(!config.data_assimilation.analyze_first_step);
    assert_eq!(config.data_assimilation.blue_computation, BlueComputation::Vector);
    assert_eq!(config.data_assimilation.linear_solver, SolverBackend::SparseCholesky);
    assert!(!config.display.show_iteration);
    assert!(!config.display.show_time);
    assert_eq!(config.model.background.storage, Representation::Dense);
    assert!(config.observation.is_none());
    assert!(config.output.is_none());

    let model = QuadraticModel::new(&config.model).unwrap();
    assert_eq!(model.final_step(), 5);
    assert!(!model.is_error_sparse());
    assert_eq!(model.background_error_covariance_row(1).as_slice(), &[0., 2., 0.]);
}

#[test]
fn full_configuration() {
    let text = r#"{
        "display": { "show_iteration": true, "show_time": true },
        "data_assimilation": {
            "method": "extended_kalman_filter",
            "analyze_first_step": true,
            "blue_computation": "auto",
            "linear_solver": "dense_cholesky"
        },
        "model": {
            "state": [0.0, 0.0],
            "delta_t": 1.0,
            "final_time": 2.0,
            "linear": [[0.0, 1.0], [0.0, 0.0]],
            "background": { "variance": 1.0, "balgovind_scale": 2.0, "storage": "sparse" },
            "model_error": { "variance": 0.1 }
        },
        "observation": {
            "file": "obs.bin",
            "kind": "observation",
            "period": 2,
            "nskip": 3,
            "error": { "variance": 0.5, "storage": "dense" },
            "operator": { "definition": { "matrix": [[1.0, 0.0]] }, "storage": "sparse" }
        },
        "output": {
            "file": "out.bin",
            "tags": ["forecast", "analysis"],
            "lock": true,
            "perturbation": { "variance": 0.01, "seed": 3 }
        }
    }"#;
    let config = Config::from_json_str(text).unwrap();
    assert!(config.display.show_iteration);
    assert_eq!(config.data_assimilation.method, Method::ExtendedKalmanFilter);
    assert_eq!(config.data_assimilation.blue_computation, BlueComputation::Auto);
    assert_eq!(config.data_assimilation.linear_solver, SolverBackend::DenseCholesky);

    let observation = config.observation.as_ref().unwrap();
    assert_eq!(observation.kind, ObservationKind::Observation);
    assert_eq!(observation.period * observation.nskip, 6);
    assert_eq!(observation.operator.definition, OperatorDefinition::Matrix(vec![vec![1.0, 0.0]]));

    let output = config.output.as_ref().unwrap();
    assert_eq!(output.tags, vec![LifecycleTag::Forecast, LifecycleTag::Analysis]);
    assert!(output.lock);
    assert_eq!(output.perturbation.as_ref().unwrap().seed, 3);
}

#[test]
fn invalid_configurations() {
    // Not JSON
    assert!(matches!(Config::from_json_str("{"), Err(AssimilationError::Parse { .. })));

    // Unknown computation mode
    let text = MINIMAL.replace(r#""method": "forward""#, r#""blue_computation": "cholesky""#);
    assert!(matches!(Config::from_json_str(&text), Err(AssimilationError::Parse { .. })));

    // Optimal interpolation without observations
    let text = MINIMAL.replace("forward", "optimal_interpolation");
    let err = Config::from_json_str(&text).unwrap_err();
    assert!(err.is_configuration());

    // Non positive time step
    let text = MINIMAL.replace("0.1", "0.0");
    assert!(Config::from_json_str(&text).unwrap_err().is_configuration());

    // Linear term not sized to the state
    let text = MINIMAL.replace(r#""final_time": 0.5,"#, r#""final_time": 0.5, "linear": [[1.0]],"#);
    assert!(Config::from_json_str(&text).unwrap_err().is_configuration());

    assert!(matches!(
        Config::from_file(temp_path("no_such_config.json")),
        Err(AssimilationError::Io { .. })
    ));
}

/// Truth run saved to file, then optimal interpolation from a wrong initial condition.
#[test]
fn twin_experiment() {
    let truth_path = temp_path("twin_truth.bin");
    let config_path = temp_path("twin_config.json");
    let text = format!(
        r#"{{
            "data_assimilation": {{ "method": "optimal_interpolation", "blue_computation": "matrix" }},
            "model": {{
                "state": [1.0, -1.0, 0.5, 0.0],
                "delta_t": 0.1,
                "final_time": 2.0,
                "linear": [[-0.2, 0.1, 0.0, 0.0], [0.0, -0.2, 0.1, 0.0], [0.0, 0.0, -0.2, 0.1], [0.1, 0.0, 0.0, -0.2]],
                "background": {{ "variance": 1.0, "balgovind_scale": 1.0, "storage": "sparse" }}
            }},
            "observation": {{
                "file": {:?},
                "kind": "state",
                "period": 1,
                "nskip": 1,
                "error": {{ "variance": 0.01, "storage": "sparse" }},
                "operator": {{ "definition": {{ "diagonal": 1.0 }}, "storage": "sparse" }}
            }}
        }}"#,
        truth_path
    );
    fs::write(&config_path, text).unwrap();
    let config = Config::from_file(&config_path).unwrap();

    // Truth
    let truth = QuadraticModel::new(&config.model).unwrap();
    let mut forward = ForwardDriver::new(truth, &config.display);
    let saver = OutputSaver::new(&truth_path, &[LifecycleTag::InitialCondition, LifecycleTag::Forecast]).unwrap();
    forward.add_listener(Box::new(saver));
    forward.run().unwrap();
    let truth_final = forward.model().state().clone();

    // Assimilation from a perturbed initial condition
    let mut model_config = config.model.clone();
    model_config.state = vec![0.0, 0.0, 0.0, 0.0];
    let model = QuadraticModel::new(&model_config).unwrap();
    let observation = LinearObservationManager::from_config(config.observation.as_ref().unwrap(), 4).unwrap();
    let mut oi = OptimalInterpolation::new(model, observation, &config.data_assimilation, &config.display).unwrap();
    oi.run().unwrap();

    assert_eq!(oi.analysis_count(), 20);
    assert_relative_eq!(oi.model().state().clone(), truth_final, epsilon = 0.05);

    fs::remove_file(&truth_path).unwrap();
    fs::remove_file(&config_path).unwrap();
}

//! Runs a data assimilation experiment described by a JSON configuration file.

use std::env;
use std::process;

use log::{error, info};

use blue_estimate::config::{Config, Method};
use blue_estimate::events::Listener;
use blue_estimate::methods::extended_kalman::ExtendedKalmanFilter;
use blue_estimate::methods::forward::ForwardDriver;
use blue_estimate::methods::optimal_interpolation::OptimalInterpolation;
use blue_estimate::models::Model;
use blue_estimate::observation::LinearObservationManager;
use blue_estimate::output::OutputSaver;
use blue_estimate::quadratic::QuadraticModel;
use blue_estimate::{AssimilationError, Result};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        let program = args.first().map_or("blue-assimilate", String::as_str);
        eprintln!("Usage:\n  {} [configuration file]", program);
        process::exit(1);
    }

    if let Err(e) = run(&args[1]) {
        error!("{}", e);
        process::exit(2);
    }
}

fn run(configuration_file: &str) -> Result<()> {
    let config = Config::from_file(configuration_file)?;
    let model = QuadraticModel::new(&config.model)?;
    let nstate = model.nstate();
    let saver = match &config.output {
        Some(output) => Some(Box::new(OutputSaver::from_config(output, nstate)?) as Box<dyn Listener>),
        None => None,
    };

    let method = config.data_assimilation.method;
    info!("Running {:?} with {} state variables", method, nstate);
    match method {
        Method::Forward => {
            let mut driver = ForwardDriver::new(model, &config.display);
            if let Some(saver) = saver {
                driver.add_listener(saver);
            }
            driver.run()?;
            info!("{} iterations", driver.iteration());
        }
        Method::OptimalInterpolation => {
            let observation = observation_manager(&config, nstate)?;
            let mut driver =
                OptimalInterpolation::new(model, observation, &config.data_assimilation, &config.display)?;
            if let Some(saver) = saver {
                driver.add_listener(saver);
            }
            driver.run()?;
            info!("{} iterations, {} analyses", driver.iteration(), driver.analysis_count());
        }
        Method::ExtendedKalmanFilter => {
            let observation = observation_manager(&config, nstate)?;
            let mut driver =
                ExtendedKalmanFilter::new(model, observation, &config.data_assimilation, &config.display)?;
            if let Some(saver) = saver {
                driver.add_listener(saver);
            }
            driver.run()?;
            info!("{} iterations, {} analyses", driver.iteration(), driver.analysis_count());
        }
    }
    Ok(())
}

fn observation_manager(config: &Config, nstate: usize) -> Result<LinearObservationManager> {
    let observation = config.observation.as_ref().ok_or(AssimilationError::Configuration {
        component: "data_assimilation",
        reason: "the method requires an \"observation\" section".to_string(),
    })?;
    LinearObservationManager::from_config(observation, nstate)
}

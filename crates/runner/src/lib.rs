//! Host Runner
//!
//! This crate drives a particle simulation whose force evaluation runs on an
//! accelerator through [`accel::AccelSession`]:
//! - Run configuration loading and validation
//! - Initial lattice, neighbor array and timestep update
//! - The timestep loop and its timing report

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod runner;
pub mod system;

pub use config::{DriverKind, RunConfig};
pub use error::RunError;
pub use runner::{run_loop, RunReport};
pub use system::ParticleSystem;

use accel::{AccelSession, Driver, HostDriver};

/// Run a simulation from a configuration file.
///
/// # Example
/// ```no_run
/// let report = runner::run_from_file("configs/host-md.json")?;
/// println!("{:.3} ms of kernel time", report.kernel_ms());
/// # Ok::<(), runner::RunError>(())
/// ```
pub fn run_from_file(config_path: &str) -> Result<RunReport, RunError> {
    tracing::info!("Loading run configuration: {}", config_path);
    let config = RunConfig::load(config_path)?;
    tracing::info!("Configuration loaded: {}", config.name);
    run(&config)
}

/// Run a simulation on the driver the configuration names.
pub fn run(config: &RunConfig) -> Result<RunReport, RunError> {
    match config.driver {
        DriverKind::Host => {
            tracing::info!("Using emulated host accelerator");
            run_with(HostDriver::default(), config)
        }
        #[cfg(feature = "opencl")]
        DriverKind::Opencl => {
            tracing::info!("Initializing OpenCL");
            run_with(accel::OpenClDriver::new(), config)
        }
        #[cfg(not(feature = "opencl"))]
        DriverKind::Opencl => Err(RunError::DriverUnavailable("opencl")),
    }
}

/// Run a simulation on an explicit driver.
///
/// The session is torn down before this returns, on success and on error.
pub fn run_with<D: Driver>(driver: D, config: &RunConfig) -> Result<RunReport, RunError> {
    config.validate()?;
    let accel_config = config.accel_config();

    let mut session = AccelSession::open(driver, &accel_config)?;
    let mut system = ParticleSystem::lattice(
        accel_config.particle_count,
        config.sites_per_axis(),
        config.lattice_spacing,
        config.box_size,
    );
    tracing::info!(
        "Lattice of {} particles in a box of {}",
        system.len(),
        system.box_size()
    );

    let report = run_loop(&mut session, &mut system, config)?;
    session.teardown();
    Ok(report)
}

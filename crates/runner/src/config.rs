//! Configuration parsing and validation for host-driven runs

use std::fs;

use accel::{AccelConfig, Target};
use serde::{Deserialize, Serialize};

use crate::error::RunError;

/// Which device driver executes the kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// In-process emulated accelerator; needs no device runtime.
    #[default]
    Host,
    /// Installed OpenCL runtime (requires the `opencl` feature).
    Opencl,
}

/// Main run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Human-readable run name
    #[serde(default = "default_name")]
    pub name: String,
    /// Device driver
    #[serde(default)]
    pub driver: DriverKind,
    /// Deployment preset, used when `accel` is absent
    #[serde(default)]
    pub target: Option<Target>,
    /// Full accelerator configuration
    #[serde(default)]
    pub accel: Option<AccelConfig>,
    /// Number of timesteps, one dispatch each
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    /// Timestep
    #[serde(default = "default_dt")]
    pub dt: f32,
    /// Edge length of the periodic box
    #[serde(default = "default_box_size")]
    pub box_size: f32,
    /// Distance between neighbouring lattice sites at t = 0
    #[serde(default = "default_lattice_spacing")]
    pub lattice_spacing: f32,
    /// Log energies every this many iterations (0 = never)
    #[serde(default = "default_report_every")]
    pub report_every: u64,
}

// Default values
fn default_name() -> String {
    "md".to_string()
}

fn default_iterations() -> u64 {
    100
}

fn default_dt() -> f32 {
    1e-4
}

fn default_box_size() -> f32 {
    16.0
}

fn default_lattice_spacing() -> f32 {
    1.0
}

fn default_report_every() -> u64 {
    10
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            driver: DriverKind::default(),
            target: None,
            accel: None,
            iterations: default_iterations(),
            dt: default_dt(),
            box_size: default_box_size(),
            lattice_spacing: default_lattice_spacing(),
            report_every: default_report_every(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self, RunError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| RunError::Config(format!("Failed to read config file {}: {}", path, e)))?;

        let config: RunConfig = serde_json::from_str(&contents)
            .map_err(|e| RunError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Accelerator configuration: `accel` if given, else the `target` preset,
    /// else the default (NVIDIA, source-compiled).
    pub fn accel_config(&self) -> AccelConfig {
        match (&self.accel, self.target) {
            (Some(accel), _) => accel.clone(),
            (None, Some(target)) => target.config(),
            (None, None) => AccelConfig::default(),
        }
    }

    /// Lattice sites per box edge needed to place every particle.
    pub fn sites_per_axis(&self) -> usize {
        let n = self.accel_config().particle_count;
        let mut k = (n as f64).cbrt().round() as usize;
        // An overflowing cube already covers any `usize` count.
        while k.checked_pow(3).is_some_and(|cube| cube < n) {
            k += 1;
        }
        k.max(1)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RunError> {
        if self.accel.is_some() && self.target.is_some() {
            return Err(RunError::Config(
                "Give either 'accel' or 'target', not both".to_string(),
            ));
        }

        if self.iterations == 0 {
            return Err(RunError::Config("iterations must be at least 1".to_string()));
        }

        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(RunError::Config("dt must be positive".to_string()));
        }

        if !(self.box_size.is_finite() && self.box_size > 0.0) {
            return Err(RunError::Config("box_size must be positive".to_string()));
        }

        if !(self.lattice_spacing.is_finite() && self.lattice_spacing > 0.0) {
            return Err(RunError::Config(
                "lattice_spacing must be positive".to_string(),
            ));
        }

        self.accel_config().validate()?;

        // The initial lattice must fit inside the box.
        let extent = self.sites_per_axis() as f32 * self.lattice_spacing;
        if extent > self.box_size {
            return Err(RunError::Config(format!(
                "{} lattice sites of spacing {} do not fit a box of {}",
                self.sites_per_axis(),
                self.lattice_spacing,
                self.box_size
            )));
        }

        Ok(())
    }
}

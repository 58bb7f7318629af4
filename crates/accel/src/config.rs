//! Session configuration.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backend::ProgramBackend;
use crate::driver::DeviceClass;
use crate::error::AccelError;
use crate::particle::DEFAULT_PARTICLE_COUNT;
use crate::resolve::{PlatformSelector, ALTERA_FAMILY, INTEL_VENDOR, NVIDIA_VENDOR};

/// Everything needed to open an accelerator session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccelConfig {
    /// Particles per dispatch; sizes every buffer and the launch.
    #[serde(default = "default_particle_count")]
    pub particle_count: usize,
    /// Platform selection rule.
    #[serde(default)]
    pub platform: PlatformSelector,
    /// Device class taken from the selected platform.
    #[serde(default)]
    pub device_class: DeviceClass,
    /// Source-compiled or binary-preloaded program.
    #[serde(default)]
    pub program: ProgramBackend,
    /// Kernel entry point.
    #[serde(default = "default_kernel_name")]
    pub kernel_name: String,
    /// Options handed to the device compiler.
    #[serde(default)]
    pub build_options: String,
}

fn default_particle_count() -> usize {
    DEFAULT_PARTICLE_COUNT
}

fn default_kernel_name() -> String {
    "md".to_string()
}

impl Default for AccelConfig {
    fn default() -> Self {
        Target::Nvidia.config()
    }
}

/// Deployments the driver ships presets for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// NVIDIA GPU, kernel compiled from source.
    Nvidia,
    /// Intel OpenCL GPU, kernel compiled from source.
    IntelOcl,
    /// Altera FPGA board, precompiled `md.aocx` image.
    Altera,
}

impl Target {
    /// Preset configuration for this deployment.
    pub fn config(self) -> AccelConfig {
        let (platform, device_class, program) = match self {
            Target::Nvidia => (
                PlatformSelector::Vendor(NVIDIA_VENDOR.into()),
                DeviceClass::Gpu,
                ProgramBackend::default(),
            ),
            Target::IntelOcl => (
                PlatformSelector::Vendor(INTEL_VENDOR.into()),
                DeviceClass::Gpu,
                ProgramBackend::default(),
            ),
            Target::Altera => (
                PlatformSelector::BoardFamily(ALTERA_FAMILY.into()),
                DeviceClass::All,
                ProgramBackend::Binary {
                    dir: PathBuf::from("bin"),
                },
            ),
        };
        AccelConfig {
            particle_count: DEFAULT_PARTICLE_COUNT,
            platform,
            device_class,
            program,
            kernel_name: default_kernel_name(),
            build_options: String::new(),
        }
    }
}

impl AccelConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn load(path: &str) -> Result<Self, AccelError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            AccelError::InvalidConfig(format!("Failed to read config file {}: {}", path, e))
        })?;
        let config: AccelConfig = serde_json::from_str(&contents)
            .map_err(|e| AccelError::InvalidConfig(format!("Failed to parse config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Same configuration with a different particle count.
    pub fn with_particle_count(mut self, particle_count: usize) -> Self {
        self.particle_count = particle_count;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), AccelError> {
        if self.particle_count == 0 {
            return Err(AccelError::InvalidConfig(
                "particle_count must be at least 1".to_string(),
            ));
        }
        if self.kernel_name.trim().is_empty() {
            return Err(AccelError::InvalidConfig(
                "kernel_name must not be empty".to_string(),
            ));
        }
        match &self.platform {
            PlatformSelector::Vendor(s) | PlatformSelector::BoardFamily(s) if s.is_empty() => {
                return Err(AccelError::InvalidConfig(
                    "platform selector must not be empty".to_string(),
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

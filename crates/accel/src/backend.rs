//! Where the compute program comes from.
//!
//! GPU deployments compile kernel source at startup; FPGA deployments load a
//! board image compiled offline. The choice is configuration, not a build
//! flag.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::driver::{DeviceInfo, Driver};
use crate::error::AccelError;

/// Default location of the kernel source, relative to the working directory.
pub const DEFAULT_SOURCE_PATH: &str = "device/md.cl";

/// Extension of offline-compiled FPGA board images.
pub const BINARY_EXTENSION: &str = "aocx";

/// Program source selected at configuration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgramBackend {
    /// Read OpenCL C from `path` and compile it for the device.
    Source {
        /// Kernel source file.
        path: PathBuf,
    },
    /// Load a precompiled board image from `dir`.
    Binary {
        /// Directory holding `<kernel>[_<board>].aocx` images.
        dir: PathBuf,
    },
}

impl Default for ProgramBackend {
    fn default() -> Self {
        ProgramBackend::Source {
            path: PathBuf::from(DEFAULT_SOURCE_PATH),
        }
    }
}

impl ProgramBackend {
    /// Create and build the program for `device`.
    ///
    /// The returned program is built; the caller extracts kernels from it.
    /// A program object that fails to build is dropped (released) here.
    pub fn load<D: Driver>(
        &self,
        driver: &D,
        context: &D::Context,
        device: &D::Device,
        device_info: &DeviceInfo,
        kernel_name: &str,
        build_options: &str,
    ) -> Result<D::Program, AccelError> {
        let mut program = match self {
            ProgramBackend::Source { path } => {
                let source = fs::read_to_string(path).map_err(|source| {
                    AccelError::ProgramUnavailable {
                        path: path.clone(),
                        source,
                    }
                })?;
                tracing::info!("Compiling kernel source {:?} ({} bytes)", path, source.len());
                driver.program_from_source(context, &source)?
            }
            ProgramBackend::Binary { dir } => {
                let path = board_binary_path(dir, kernel_name, &device_info.name)?;
                tracing::info!("Using AOCX: {}", path.display());
                let binary = fs::read(&path)
                    .map_err(|source| AccelError::ProgramUnavailable { path, source })?;
                driver.program_from_binary(context, device, &binary)?
            }
        };

        driver.build_program(&mut program, device, build_options)?;
        Ok(program)
    }
}

/// Board name embedded in an FPGA device name.
///
/// FPGA devices report `"<board> : <description>"`; the board is the text
/// before `" :"`, kept as reported. Names without that separator carry no
/// board.
pub fn board_name(device_name: &str) -> Option<&str> {
    device_name
        .find(" :")
        .map(|end| &device_name[..end])
        .filter(|board| !board.is_empty())
}

/// First existing image among `<dir>/<kernel>.aocx` and
/// `<dir>/<kernel>_<board>.aocx`.
pub fn board_binary_path(
    dir: &Path,
    kernel_name: &str,
    device_name: &str,
) -> Result<PathBuf, AccelError> {
    let generic = dir.join(format!("{kernel_name}.{BINARY_EXTENSION}"));
    if generic.is_file() {
        return Ok(generic);
    }
    if let Some(board) = board_name(device_name) {
        let specific = dir.join(format!("{kernel_name}_{board}.{BINARY_EXTENSION}"));
        if specific.is_file() {
            return Ok(specific);
        }
    }
    Err(AccelError::ProgramUnavailable {
        path: generic,
        source: io::Error::new(io::ErrorKind::NotFound, "no board image found"),
    })
}

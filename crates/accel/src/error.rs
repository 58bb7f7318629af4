//! Error type shared by every accelerator operation.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// OpenCL status codes the crate produces or inspects itself.
pub mod codes {
    /// `CL_DEVICE_NOT_FOUND`
    pub const DEVICE_NOT_FOUND: i32 = -1;
    /// `CL_OUT_OF_RESOURCES`
    pub const OUT_OF_RESOURCES: i32 = -5;
    /// `CL_OUT_OF_HOST_MEMORY`
    pub const OUT_OF_HOST_MEMORY: i32 = -6;
    /// `CL_PROFILING_INFO_NOT_AVAILABLE`
    pub const PROFILING_INFO_NOT_AVAILABLE: i32 = -7;
    /// `CL_BUILD_PROGRAM_FAILURE`
    pub const BUILD_PROGRAM_FAILURE: i32 = -11;
    /// `CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST`
    pub const EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: i32 = -14;
    /// `CL_INVALID_VALUE`
    pub const INVALID_VALUE: i32 = -30;
    /// `CL_INVALID_BINARY`
    pub const INVALID_BINARY: i32 = -42;
    /// `CL_INVALID_KERNEL_NAME`
    pub const INVALID_KERNEL_NAME: i32 = -46;
    /// `CL_INVALID_KERNEL_ARGS`
    pub const INVALID_KERNEL_ARGS: i32 = -52;
    /// `CL_INVALID_WORK_GROUP_SIZE`
    pub const INVALID_WORK_GROUP_SIZE: i32 = -54;
    /// `CL_INVALID_BUFFER_SIZE`
    pub const INVALID_BUFFER_SIZE: i32 = -61;
}

/// The device-API call an error came from.
///
/// `Display` produces the phrase used in diagnostics, e.g.
/// `"Failed to create command queue"`.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    QueryPlatforms,
    QueryDevices,
    CreateContext,
    CreateQueue,
    LoadProgram,
    BuildProgram,
    CreateKernel,
    CreateBuffer,
    CreateNearestBuffer,
    CreateEnergyBuffer,
    CreateForceBuffer,
    WriteBuffer,
    TransferNearest,
    SetKernelArg,
    SetNearestArg,
    SetEnergyArg,
    SetForceArg,
    LaunchKernel,
    ReadBuffer,
    ReadEnergy,
    ReadForce,
    WaitForResults,
    QueryProfiling,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Operation::QueryPlatforms => "Failed to query platforms",
            Operation::QueryDevices => "Failed to query devices",
            Operation::CreateContext => "Failed to create context",
            Operation::CreateQueue => "Failed to create command queue",
            Operation::LoadProgram => "Failed to load program",
            Operation::BuildProgram => "Failed to build program",
            Operation::CreateKernel => "Failed to create kernel",
            Operation::CreateBuffer => "Failed to create buffer",
            Operation::CreateNearestBuffer => "Failed to create buffer for nearest",
            Operation::CreateEnergyBuffer => "Failed to create buffer for output_energy",
            Operation::CreateForceBuffer => "Failed to create buffer for output_force",
            Operation::WriteBuffer => "Failed to write buffer",
            Operation::TransferNearest => "Failed to transfer nearest",
            Operation::SetKernelArg => "Failed to set kernel argument",
            Operation::SetNearestArg => "Failed to set argument nearest",
            Operation::SetEnergyArg => "Failed to set argument output_energy",
            Operation::SetForceArg => "Failed to set argument output_force",
            Operation::LaunchKernel => "Failed to launch kernel",
            Operation::ReadBuffer => "Failed to read buffer",
            Operation::ReadEnergy => "Failed to read output_energy",
            Operation::ReadForce => "Failed to read output_force",
            Operation::WaitForResults => "Failed waiting for results",
            Operation::QueryProfiling => "Failed to query kernel profiling info",
        };
        f.write_str(text)
    }
}

/// Every way setup, dispatch or configuration can fail.
#[derive(Debug, Error)]
pub enum AccelError {
    /// No platform matched the configured vendor or board family.
    #[error("Unable to find OpenCL platform matching {wanted} (saw: {seen:?})")]
    PlatformNotFound {
        /// Description of the selector that failed to match.
        wanted: String,
        /// Vendor strings of the platforms that were enumerated.
        seen: Vec<String>,
    },

    /// The matched platform exposes no device of the requested class.
    #[error("No {class} device on platform {platform:?}")]
    DeviceNotFound {
        /// Platform name.
        platform: String,
        /// Requested device class.
        class: String,
    },

    /// Kernel source or binary could not be read from disk.
    #[error("Failed to load kernel from {path:?}: {source}")]
    ProgramUnavailable {
        /// Path that was tried last.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A device-API call returned a non-success status.
    #[error("Error during operation '{op}': {code}")]
    Api {
        /// Failing call.
        op: Operation,
        /// Raw API status code.
        code: i32,
    },

    /// Program compilation failed; carries the compiler log.
    #[error("Error during operation '{op}': {code}\n{log}")]
    Build {
        /// Failing call.
        op: Operation,
        /// Raw API status code.
        code: i32,
        /// Build log reported by the device compiler.
        log: String,
    },

    /// The particle count does not fit a single work-group on this device.
    #[error("{particles} particles exceed the device work-group limit of {max}")]
    WorkGroupTooLarge {
        /// Configured particle count.
        particles: usize,
        /// Device maximum work-group size.
        max: usize,
    },

    /// A host array handed to a dispatch has the wrong length.
    #[error("{array} holds {actual} elements, expected {expected}")]
    LengthMismatch {
        /// Which host array.
        array: &'static str,
        /// Session particle count.
        expected: usize,
        /// Slice length received.
        actual: usize,
    },

    /// A buffer set is already allocated; it is never resized in place.
    #[error("device buffers already allocated for {particles} particles")]
    AlreadyAllocated {
        /// Particle count of the existing set.
        particles: usize,
    },

    /// A ready context was required but setup has not completed.
    #[error("execution context is not ready")]
    NotReady,

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AccelError {
    /// Shorthand for an [`AccelError::Api`] value.
    pub fn api(op: Operation, code: i32) -> Self {
        AccelError::Api { op, code }
    }

    /// Raw device-API status code, when the error carries one.
    pub fn code(&self) -> Option<i32> {
        match self {
            AccelError::Api { code, .. } | AccelError::Build { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The failing device-API call, when the error came from one.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            AccelError::Api { op, .. } | AccelError::Build { op, .. } => Some(*op),
            AccelError::ProgramUnavailable { .. } => Some(Operation::LoadProgram),
            _ => None,
        }
    }

    /// Re-tag an API error with the operation the caller was performing.
    ///
    /// Drivers report the raw call; the session knows which buffer or
    /// argument it was working on.
    pub fn during(self, op: Operation) -> Self {
        match self {
            AccelError::Api { code, .. } => AccelError::Api { op, code },
            AccelError::Build { code, log, .. } => AccelError::Build { op, code, log },
            other => other,
        }
    }
}

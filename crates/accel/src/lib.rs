//! Accelerator dispatch for particle force evaluation
//!
//! This crate offloads the per-timestep energy/force evaluation of a particle
//! simulation to an OpenCL-style compute device (GPU or FPGA). The caller owns
//! the integration loop and the neighbor array; this crate owns the device.
//!
//! # Modules
//! - [`driver`] -- device-API seam, the emulated host driver and (with the
//!   `opencl` feature) the OpenCL driver.
//! - [`resolve`] -- platform/device selection by vendor or board family.
//! - [`backend`] -- source-compiled or binary-preloaded programs.
//! - [`context`] -- context, profiling queue, program and kernel lifecycle.
//! - [`buffers`] -- the three device buffers bound to the kernel.
//! - [`session`] -- [`AccelSession`]: open, dispatch, teardown.
//! - [`profile`] -- accumulated device-side kernel time.
//! - [`reference`] -- host evaluation of the `md` force law.
//!
//! ```no_run
//! use accel::{AccelConfig, AccelSession, Float3, HostArrays, HostDriver};
//!
//! # fn main() -> Result<(), accel::AccelError> {
//! let config = AccelConfig::default().with_particle_count(4);
//! let mut session = AccelSession::open(HostDriver::default(), &config)?;
//! let nearest = vec![Float3::ZERO; 4];
//! let mut out = HostArrays::zeroed(4);
//! session.dispatch(&nearest, &mut out.energy, &mut out.force)?;
//! println!("kernel: {:.3} ms", session.profile().total_ms());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod buffers;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod particle;
pub mod profile;
pub mod reference;
pub mod resolve;
pub mod session;

pub use backend::ProgramBackend;
pub use config::{AccelConfig, Target};
pub use driver::host::HostDriver;
pub use driver::{DeviceClass, DeviceInfo, Driver, PlatformInfo};
pub use error::{AccelError, Operation};
pub use particle::{Float3, HostArrays, DEFAULT_PARTICLE_COUNT};
pub use profile::{DispatchTiming, KernelProfile};
pub use resolve::PlatformSelector;
pub use session::AccelSession;

#[cfg(feature = "opencl")]
pub use driver::opencl::OpenClDriver;

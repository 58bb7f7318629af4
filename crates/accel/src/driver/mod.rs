//! Device-API seam.
//!
//! [`Driver`] is the narrow slice of an OpenCL-style API the dispatch core
//! needs: platform/device discovery, context/queue/program/kernel creation,
//! buffers, event-ordered transfers and launches, and profiling queries.
//! Handles are associated types; dropping a handle releases it.
//!
//! Two implementations exist:
//! - [`host::HostDriver`] -- an in-process emulated accelerator, always built.
//! - `opencl::OpenClDriver` -- real devices through `opencl3`, behind the
//!   `opencl` feature.

pub mod host;

#[cfg(feature = "opencl")]
pub mod opencl;

use serde::{Deserialize, Serialize};

use crate::error::AccelError;

/// Class of device requested from a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// Graphics processor.
    #[default]
    Gpu,
    /// Dedicated accelerator (FPGA boards usually report this).
    Accelerator,
    /// Host CPU exposed as a compute device.
    Cpu,
    /// Any device.
    All,
}

impl DeviceClass {
    /// Whether a device of class `actual` satisfies this request.
    pub fn admits(self, actual: DeviceClass) -> bool {
        self == DeviceClass::All || self == actual
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceClass::Gpu => "GPU",
            DeviceClass::Accelerator => "accelerator",
            DeviceClass::Cpu => "CPU",
            DeviceClass::All => "any",
        };
        f.write_str(name)
    }
}

/// Access mode of a device buffer, from the kernel's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAccess {
    /// Kernel only reads.
    ReadOnly,
    /// Kernel only writes.
    WriteOnly,
    /// Kernel reads and writes.
    ReadWrite,
}

/// Descriptive strings of a platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    /// `CL_PLATFORM_VENDOR`
    pub vendor: String,
    /// `CL_PLATFORM_NAME`
    pub name: String,
}

/// Descriptive data of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device name as reported by the runtime.
    pub name: String,
    /// Device vendor string.
    pub vendor: String,
    /// Class the device reports.
    pub class: DeviceClass,
    /// Largest work-group a single launch may use.
    pub max_work_group_size: usize,
}

/// Device-side start/end timestamps of a finished command, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventTiming {
    /// `CL_PROFILING_COMMAND_START`
    pub start_ns: u64,
    /// `CL_PROFILING_COMMAND_END`
    pub end_ns: u64,
}

impl EventTiming {
    /// `end - start`, clamped at zero for timers that step backwards.
    pub fn elapsed_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

/// Accelerator API used by the dispatch core.
///
/// Every call reports failure through [`AccelError`]; none of them aborts.
/// Enqueue calls return as soon as the command is queued and express
/// ordering only through their `wait` lists.
pub trait Driver {
    /// Platform identifier.
    type Platform;
    /// Device identifier.
    type Device;
    /// Device context.
    type Context;
    /// Command queue.
    type Queue;
    /// Program object.
    type Program;
    /// Kernel object.
    type Kernel;
    /// Device buffer.
    type Buffer;
    /// Completion event of an enqueued command.
    type Event;

    /// Enumerate platforms.
    fn platforms(&self) -> Result<Vec<Self::Platform>, AccelError>;

    /// Vendor and name of a platform.
    fn platform_info(&self, platform: &Self::Platform) -> Result<PlatformInfo, AccelError>;

    /// Devices of `class` on `platform`, in the order the runtime lists them.
    fn devices(
        &self,
        platform: &Self::Platform,
        class: DeviceClass,
    ) -> Result<Vec<Self::Device>, AccelError>;

    /// Name, vendor, class and limits of a device.
    fn device_info(&self, device: &Self::Device) -> Result<DeviceInfo, AccelError>;

    /// Context bound to exactly one device.
    fn create_context(&self, device: &Self::Device) -> Result<Self::Context, AccelError>;

    /// In-order command queue, with device timestamps when `profiling` is set.
    fn create_queue(
        &self,
        context: &Self::Context,
        device: &Self::Device,
        profiling: bool,
    ) -> Result<Self::Queue, AccelError>;

    /// Program object from kernel source text. Not yet built.
    fn program_from_source(
        &self,
        context: &Self::Context,
        source: &str,
    ) -> Result<Self::Program, AccelError>;

    /// Program object from a precompiled device binary. Not yet built.
    fn program_from_binary(
        &self,
        context: &Self::Context,
        device: &Self::Device,
        binary: &[u8],
    ) -> Result<Self::Program, AccelError>;

    /// Compile/link `program` for `device`.
    fn build_program(
        &self,
        program: &mut Self::Program,
        device: &Self::Device,
        options: &str,
    ) -> Result<(), AccelError>;

    /// Kernel entry point `name` of a built program.
    fn create_kernel(&self, program: &Self::Program, name: &str)
        -> Result<Self::Kernel, AccelError>;

    /// Buffer of `size` bytes in `context`.
    fn create_buffer(
        &self,
        context: &Self::Context,
        access: MemAccess,
        size: usize,
    ) -> Result<Self::Buffer, AccelError>;

    /// Bind `buffer` as positional argument `index` of `kernel`.
    fn set_kernel_arg(
        &self,
        kernel: &mut Self::Kernel,
        index: u32,
        buffer: &Self::Buffer,
    ) -> Result<(), AccelError>;

    /// Non-blocking host-to-device copy of `data` into the start of `buffer`.
    ///
    /// # Safety
    /// The device may read `data` until the returned event completes; the
    /// caller must keep it alive and unmodified until then.
    unsafe fn enqueue_write(
        &self,
        queue: &Self::Queue,
        buffer: &mut Self::Buffer,
        data: &[u8],
        wait: &[&Self::Event],
    ) -> Result<Self::Event, AccelError>;

    /// One-dimensional launch of `global` work-items in groups of `local`.
    fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        global: usize,
        local: usize,
        wait: &[&Self::Event],
    ) -> Result<Self::Event, AccelError>;

    /// Non-blocking device-to-host copy from the start of `buffer` into `data`.
    ///
    /// # Safety
    /// The device may write `data` until the returned event completes; the
    /// caller must not read, move or drop it until then.
    unsafe fn enqueue_read(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        data: &mut [u8],
        wait: &[&Self::Event],
    ) -> Result<Self::Event, AccelError>;

    /// Block until every event in `events` is complete.
    ///
    /// Fails if any of them (or anything they depended on) failed.
    fn wait(&self, events: &[&Self::Event]) -> Result<(), AccelError>;

    /// Block until everything submitted to `queue` has finished.
    fn finish(&self, queue: &Self::Queue) -> Result<(), AccelError>;

    /// Device timestamps of a completed event from a profiling queue.
    fn event_timing(&self, event: &Self::Event) -> Result<EventTiming, AccelError>;
}

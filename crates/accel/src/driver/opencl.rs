//! OpenCL driver backed by `opencl3`.
//!
//! Only compiled with the `opencl` feature:
//! ```bash
//! cargo build --features opencl
//! ```
//!
//! Each trait call maps onto one OpenCL entry point. Status codes from
//! `ClError` are carried through unchanged in [`AccelError::Api`].

use std::ptr;

use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context;
use opencl3::device::{
    Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU,
    CL_DEVICE_TYPE_GPU,
};
use opencl3::error_codes::ClError;
use opencl3::event::{wait_for_events, Event};
use opencl3::kernel::Kernel;
use opencl3::memory::{Buffer, ClMem, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY};
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use opencl3::types::{cl_device_type, cl_event, cl_mem, CL_NON_BLOCKING};

use super::{DeviceClass, DeviceInfo, Driver, EventTiming, MemAccess, PlatformInfo};
use crate::error::{codes, AccelError, Operation};

/// Driver for OpenCL runtimes installed on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenClDriver;

impl OpenClDriver {
    /// New driver. No OpenCL call is made until discovery.
    pub fn new() -> Self {
        Self
    }
}

fn api(op: Operation) -> impl Fn(ClError) -> AccelError {
    move |e| AccelError::api(op, e.0)
}

fn device_type(class: DeviceClass) -> cl_device_type {
    match class {
        DeviceClass::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceClass::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
        DeviceClass::Cpu => CL_DEVICE_TYPE_CPU,
        DeviceClass::All => CL_DEVICE_TYPE_ALL,
    }
}

fn device_class(ty: cl_device_type) -> DeviceClass {
    if ty & CL_DEVICE_TYPE_GPU != 0 {
        DeviceClass::Gpu
    } else if ty & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceClass::Accelerator
    } else if ty & CL_DEVICE_TYPE_CPU != 0 {
        DeviceClass::Cpu
    } else {
        DeviceClass::All
    }
}

/// OpenCL info strings are NUL-terminated and sometimes padded.
fn clean(s: String) -> String {
    s.trim_end_matches('\0').trim().to_string()
}

fn raw_events(wait: &[&Event]) -> Vec<cl_event> {
    wait.iter().map(|e| e.get()).collect()
}

impl Driver for OpenClDriver {
    type Platform = Platform;
    type Device = Device;
    type Context = Context;
    type Queue = CommandQueue;
    type Program = Program;
    type Kernel = Kernel;
    type Buffer = Buffer<u8>;
    type Event = Event;

    fn platforms(&self) -> Result<Vec<Platform>, AccelError> {
        get_platforms().map_err(api(Operation::QueryPlatforms))
    }

    fn platform_info(&self, platform: &Platform) -> Result<PlatformInfo, AccelError> {
        Ok(PlatformInfo {
            vendor: clean(platform.vendor().map_err(api(Operation::QueryPlatforms))?),
            name: clean(platform.name().map_err(api(Operation::QueryPlatforms))?),
        })
    }

    fn devices(&self, platform: &Platform, class: DeviceClass) -> Result<Vec<Device>, AccelError> {
        match platform.get_devices(device_type(class)) {
            Ok(ids) => Ok(ids.into_iter().map(Device::new).collect()),
            // An empty class is reported as an error by the runtime.
            Err(ClError(code)) if code == codes::DEVICE_NOT_FOUND => Ok(Vec::new()),
            Err(e) => Err(AccelError::api(Operation::QueryDevices, e.0)),
        }
    }

    fn device_info(&self, device: &Device) -> Result<DeviceInfo, AccelError> {
        let op = api(Operation::QueryDevices);
        Ok(DeviceInfo {
            name: clean(device.name().map_err(&op)?),
            vendor: clean(device.vendor().map_err(&op)?),
            class: device_class(device.dev_type().map_err(&op)?),
            max_work_group_size: device.max_work_group_size().map_err(&op)?,
        })
    }

    fn create_context(&self, device: &Device) -> Result<Context, AccelError> {
        Context::from_device(device).map_err(api(Operation::CreateContext))
    }

    fn create_queue(
        &self,
        context: &Context,
        _device: &Device,
        profiling: bool,
    ) -> Result<CommandQueue, AccelError> {
        let props = if profiling { CL_QUEUE_PROFILING_ENABLE } else { 0 };
        // The context holds exactly one device, which is the queue's device.
        // OpenCL 1.2 entry point: FPGA and macOS runtimes lack the 2.0 one.
        #[allow(deprecated)]
        CommandQueue::create_default(context, props).map_err(api(Operation::CreateQueue))
    }

    fn program_from_source(&self, context: &Context, source: &str) -> Result<Program, AccelError> {
        Program::create_from_source(context, source).map_err(api(Operation::LoadProgram))
    }

    fn program_from_binary(
        &self,
        context: &Context,
        device: &Device,
        binary: &[u8],
    ) -> Result<Program, AccelError> {
        let devices = [device.id()];
        let binaries = [binary];
        unsafe { Program::create_from_binary(context, &devices, &binaries) }
            .map_err(api(Operation::LoadProgram))
    }

    fn build_program(
        &self,
        program: &mut Program,
        device: &Device,
        options: &str,
    ) -> Result<(), AccelError> {
        program
            .build(&[device.id()], options)
            .map_err(|e| AccelError::Build {
                op: Operation::BuildProgram,
                code: e.0,
                log: program.get_build_log(device.id()).unwrap_or_default(),
            })
    }

    fn create_kernel(&self, program: &Program, name: &str) -> Result<Kernel, AccelError> {
        Kernel::create(program, name).map_err(api(Operation::CreateKernel))
    }

    fn create_buffer(
        &self,
        context: &Context,
        access: MemAccess,
        size: usize,
    ) -> Result<Buffer<u8>, AccelError> {
        let flags = match access {
            MemAccess::ReadOnly => CL_MEM_READ_ONLY,
            MemAccess::WriteOnly => CL_MEM_WRITE_ONLY,
            MemAccess::ReadWrite => CL_MEM_READ_WRITE,
        };
        unsafe { Buffer::<u8>::create(context, flags, size, ptr::null_mut()) }
            .map_err(api(Operation::CreateBuffer))
    }

    fn set_kernel_arg(
        &self,
        kernel: &mut Kernel,
        index: u32,
        buffer: &Buffer<u8>,
    ) -> Result<(), AccelError> {
        let mem: cl_mem = buffer.get();
        unsafe { kernel.set_arg(index, &mem) }.map_err(api(Operation::SetKernelArg))
    }

    unsafe fn enqueue_write(
        &self,
        queue: &CommandQueue,
        buffer: &mut Buffer<u8>,
        data: &[u8],
        wait: &[&Event],
    ) -> Result<Event, AccelError> {
        queue
            .enqueue_write_buffer(buffer, CL_NON_BLOCKING, 0, data, &raw_events(wait))
            .map_err(api(Operation::WriteBuffer))
    }

    fn enqueue_kernel(
        &self,
        queue: &CommandQueue,
        kernel: &Kernel,
        global: usize,
        local: usize,
        wait: &[&Event],
    ) -> Result<Event, AccelError> {
        let global_work_size = [global];
        let local_work_size = [local];
        unsafe {
            queue.enqueue_nd_range_kernel(
                kernel.get(),
                1,
                ptr::null(),
                global_work_size.as_ptr(),
                local_work_size.as_ptr(),
                &raw_events(wait),
            )
        }
        .map_err(api(Operation::LaunchKernel))
    }

    unsafe fn enqueue_read(
        &self,
        queue: &CommandQueue,
        buffer: &Buffer<u8>,
        data: &mut [u8],
        wait: &[&Event],
    ) -> Result<Event, AccelError> {
        queue
            .enqueue_read_buffer(buffer, CL_NON_BLOCKING, 0, data, &raw_events(wait))
            .map_err(api(Operation::ReadBuffer))
    }

    fn wait(&self, events: &[&Event]) -> Result<(), AccelError> {
        wait_for_events(&raw_events(events)).map_err(|code| api(Operation::WaitForResults)(ClError(code)))
    }

    fn finish(&self, queue: &CommandQueue) -> Result<(), AccelError> {
        queue.finish().map_err(api(Operation::WaitForResults))
    }

    fn event_timing(&self, event: &Event) -> Result<EventTiming, AccelError> {
        let op = api(Operation::QueryProfiling);
        Ok(EventTiming {
            start_ns: event.profiling_command_start().map_err(&op)?,
            end_ns: event.profiling_command_end().map_err(&op)?,
        })
    }
}

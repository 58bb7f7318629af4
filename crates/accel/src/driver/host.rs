//! In-process emulated accelerator.
//!
//! `HostDriver` implements [`Driver`] without any device runtime. It keeps a
//! configurable platform/device inventory, "compiles" programs by scanning
//! them for `__kernel void <name>(` declarations, and runs registered
//! [`KernelBody`] implementations on the host when a launch is enqueued.
//!
//! Commands execute at enqueue time but honour wait lists exactly: a command
//! waiting on a failed event is skipped and its own event fails with
//! `CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST`. Each executed command is
//! stamped from a virtual device clock so profiling queries are
//! deterministic.
//!
//! Two hooks exist for tests: [`HostDriver::fail_on`] injects a failure into
//! the n-th call of a given kind, and [`Ledger`] counts every object created
//! and released.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{DeviceClass, DeviceInfo, Driver, EventTiming, MemAccess, PlatformInfo};
use crate::error::{codes, AccelError, Operation};
use crate::particle::Float3;
use crate::reference;

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// One emulated platform and the devices it exposes.
#[derive(Debug, Clone)]
pub struct HostPlatform {
    /// Vendor/name strings reported for the platform.
    pub info: PlatformInfo,
    /// Devices in enumeration order.
    pub devices: Vec<DeviceInfo>,
}

impl HostPlatform {
    /// NVIDIA CUDA platform with one GPU.
    pub fn nvidia_gpu() -> Self {
        Self {
            info: PlatformInfo {
                vendor: "NVIDIA Corporation".into(),
                name: "NVIDIA CUDA".into(),
            },
            devices: vec![DeviceInfo {
                name: "Emulated GeForce".into(),
                vendor: "NVIDIA Corporation".into(),
                class: DeviceClass::Gpu,
                max_work_group_size: 1024,
            }],
        }
    }

    /// Intel OpenCL platform exposing a CPU device first and a GPU second.
    pub fn intel_gpu() -> Self {
        Self {
            info: PlatformInfo {
                vendor: "Intel(R) Corporation".into(),
                name: "Intel(R) OpenCL".into(),
            },
            devices: vec![
                DeviceInfo {
                    name: "Emulated Core".into(),
                    vendor: "Intel(R) Corporation".into(),
                    class: DeviceClass::Cpu,
                    max_work_group_size: 8192,
                },
                DeviceInfo {
                    name: "Emulated Iris".into(),
                    vendor: "Intel(R) Corporation".into(),
                    class: DeviceClass::Gpu,
                    max_work_group_size: 256,
                },
            ],
        }
    }

    /// Altera FPGA platform with one board.
    pub fn altera_fpga() -> Self {
        Self {
            info: PlatformInfo {
                vendor: "Altera Corporation".into(),
                name: "Altera SDK for OpenCL".into(),
            },
            devices: vec![DeviceInfo {
                name: "de5net_a7 : Emulated Stratix V".into(),
                vendor: "Altera Corporation".into(),
                class: DeviceClass::Accelerator,
                max_work_group_size: 2048,
            }],
        }
    }
}

/// Virtual cost model for stamping command timestamps.
#[derive(Debug, Clone, Copy)]
pub struct HostCosts {
    /// Device time per transferred byte.
    pub transfer_ns_per_byte: u64,
    /// Fixed device time per kernel launch.
    pub launch_ns: u64,
    /// Device time per work-item.
    pub kernel_ns_per_item: u64,
}

impl Default for HostCosts {
    fn default() -> Self {
        Self {
            transfer_ns_per_byte: 1,
            launch_ns: 5_000,
            kernel_ns_per_item: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Object accounting
// ---------------------------------------------------------------------------

/// Kinds of releasable objects.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Context,
    Queue,
    Program,
    Kernel,
    Buffer,
    Event,
}

/// Creation/release counters for every object the driver hands out.
#[derive(Debug, Default)]
pub struct Ledger {
    counts: Mutex<HashMap<ObjectKind, (usize, usize)>>,
}

impl Ledger {
    fn created(self: &Arc<Self>, kind: ObjectKind) -> Live {
        self.counts.lock().entry(kind).or_default().0 += 1;
        Live {
            ledger: Arc::clone(self),
            kind,
        }
    }

    fn released(&self, kind: ObjectKind) {
        self.counts.lock().entry(kind).or_default().1 += 1;
    }

    /// Objects of `kind` created so far.
    pub fn created_count(&self, kind: ObjectKind) -> usize {
        self.counts.lock().get(&kind).map_or(0, |c| c.0)
    }

    /// Objects of `kind` released so far.
    pub fn released_count(&self, kind: ObjectKind) -> usize {
        self.counts.lock().get(&kind).map_or(0, |c| c.1)
    }

    /// Objects of `kind` still alive.
    pub fn live(&self, kind: ObjectKind) -> usize {
        self.counts
            .lock()
            .get(&kind)
            .map_or(0, |&(created, released)| created.saturating_sub(released))
    }

    /// Objects of any kind still alive.
    pub fn live_total(&self) -> usize {
        self.counts
            .lock()
            .values()
            .map(|&(created, released)| created.saturating_sub(released))
            .sum()
    }

    /// Objects of any kind ever created.
    pub fn created_total(&self) -> usize {
        self.counts.lock().values().map(|c| c.0).sum()
    }

    /// True when no object was ever released more often than it was created.
    pub fn balanced(&self) -> bool {
        self.counts
            .lock()
            .values()
            .all(|&(created, released)| released <= created)
    }
}

/// Guard tying an object's lifetime to the ledger.
#[derive(Debug)]
struct Live {
    ledger: Arc<Ledger>,
    kind: ObjectKind,
}

impl Drop for Live {
    fn drop(&mut self) {
        self.ledger.released(self.kind);
    }
}

// ---------------------------------------------------------------------------
// Kernel bodies
// ---------------------------------------------------------------------------

/// Host implementation of a kernel entry point.
pub trait KernelBody: Send + Sync {
    /// Number of buffer arguments the entry point takes.
    fn arity(&self) -> usize;

    /// Execute `work_items` work-items over the bound argument buffers.
    ///
    /// Returns an API status code on failure.
    fn run(&self, work_items: usize, args: &mut [&mut [u8]]) -> Result<(), i32>;
}

/// The `md` entry point: `(nearest, output_energy, output_force)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MdKernel;

impl KernelBody for MdKernel {
    fn arity(&self) -> usize {
        3
    }

    fn run(&self, work_items: usize, args: &mut [&mut [u8]]) -> Result<(), i32> {
        let vec_bytes = work_items * std::mem::size_of::<Float3>();
        let scalar_bytes = work_items * std::mem::size_of::<f32>();
        if args[0].len() < vec_bytes || args[1].len() < scalar_bytes || args[2].len() < vec_bytes
        {
            return Err(codes::OUT_OF_RESOURCES);
        }

        let nearest: Vec<Float3> = args[0][..vec_bytes]
            .chunks_exact(std::mem::size_of::<Float3>())
            .map(bytemuck::pod_read_unaligned)
            .collect();
        let mut energy = vec![0.0_f32; work_items];
        let mut force = vec![Float3::ZERO; work_items];
        reference::inverse_square_into(&nearest, work_items, &mut energy, &mut force);

        args[1][..scalar_bytes].copy_from_slice(bytemuck::cast_slice(&energy));
        args[2][..vec_bytes].copy_from_slice(bytemuck::cast_slice(&force));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

/// Driver calls that can be made to fail.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostCall {
    Platforms,
    PlatformInfo,
    Devices,
    CreateContext,
    CreateQueue,
    CreateProgram,
    BuildProgram,
    CreateKernel,
    CreateBuffer,
    SetKernelArg,
    EnqueueWrite,
    EnqueueKernel,
    /// The launch is accepted but the kernel fails on the device.
    KernelExecution,
    EnqueueRead,
    Wait,
    Finish,
    Profiling,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    call: HostCall,
    nth: usize,
    code: i32,
}

/// One accepted kernel launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    /// Entry point name.
    pub kernel: String,
    /// Global work size.
    pub global: usize,
    /// Work-group size.
    pub local: usize,
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

type Storage = Arc<Mutex<Vec<u8>>>;

/// Platform index into the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPlatformId(usize);

/// Device position in the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostDeviceId {
    platform: usize,
    device: usize,
}

/// Emulated context.
#[derive(Debug)]
pub struct HostContext {
    device: HostDeviceId,
    _live: Live,
}

/// Emulated in-order queue.
#[derive(Debug)]
pub struct HostQueue {
    device: DeviceInfo,
    profiling: bool,
    _live: Live,
}

/// Emulated program object.
#[derive(Debug)]
pub struct HostProgram {
    declared: Vec<String>,
    built: bool,
    _live: Live,
}

/// Emulated kernel object with its bound arguments.
pub struct HostKernel {
    name: String,
    body: Arc<dyn KernelBody>,
    args: Vec<Option<Storage>>,
    _live: Live,
}

impl std::fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostKernel")
            .field("name", &self.name)
            .field("bound", &self.args.iter().filter(|a| a.is_some()).count())
            .finish_non_exhaustive()
    }
}

/// Emulated device buffer.
#[derive(Debug)]
pub struct HostBuffer {
    access: MemAccess,
    storage: Storage,
    _live: Live,
}

impl HostBuffer {
    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.storage.lock().len()
    }

    /// Access mode the buffer was created with.
    pub fn access(&self) -> MemAccess {
        self.access
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventStatus {
    Complete,
    Failed(i32),
}

/// Completion event of an emulated command.
#[derive(Debug)]
pub struct HostEvent {
    status: EventStatus,
    timing: EventTiming,
    profiled: bool,
    _live: Live,
}

impl HostEvent {
    /// Whether the command completed successfully.
    pub fn is_complete(&self) -> bool {
        self.status == EventStatus::Complete
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

struct Inner {
    platforms: Vec<HostPlatform>,
    bodies: RwLock<HashMap<String, Arc<dyn KernelBody>>>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<HashMap<HostCall, usize>>,
    launches: Mutex<Vec<LaunchRecord>>,
    clock_ns: Mutex<u64>,
    costs: HostCosts,
    ledger: Arc<Ledger>,
}

/// Emulated accelerator driver. Clones share state.
#[derive(Clone)]
pub struct HostDriver {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HostDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDriver")
            .field("platforms", &self.inner.platforms.len())
            .field("clock_ns", &*self.inner.clock_ns.lock())
            .finish_non_exhaustive()
    }
}

impl Default for HostDriver {
    /// NVIDIA, Intel and Altera platforms, in that order.
    fn default() -> Self {
        Self::new(vec![
            HostPlatform::nvidia_gpu(),
            HostPlatform::intel_gpu(),
            HostPlatform::altera_fpga(),
        ])
    }
}

impl HostDriver {
    /// Driver exposing `platforms`, with the `md` kernel registered.
    pub fn new(platforms: Vec<HostPlatform>) -> Self {
        Self::with_costs(platforms, HostCosts::default())
    }

    /// Driver with an explicit cost model.
    pub fn with_costs(platforms: Vec<HostPlatform>, costs: HostCosts) -> Self {
        let mut bodies: HashMap<String, Arc<dyn KernelBody>> = HashMap::new();
        bodies.insert("md".into(), Arc::new(MdKernel));
        Self {
            inner: Arc::new(Inner {
                platforms,
                bodies: RwLock::new(bodies),
                faults: Mutex::new(Vec::new()),
                calls: Mutex::new(HashMap::new()),
                launches: Mutex::new(Vec::new()),
                clock_ns: Mutex::new(0),
                costs,
                ledger: Arc::new(Ledger::default()),
            }),
        }
    }

    /// Register (or replace) the host implementation of entry point `name`.
    pub fn register_kernel(&self, name: &str, body: Arc<dyn KernelBody>) {
        self.inner.bodies.write().insert(name.to_string(), body);
    }

    /// Make the `nth` (0-based) call of kind `call` fail with status `code`.
    pub fn fail_on(&self, call: HostCall, nth: usize, code: i32) -> &Self {
        self.inner.faults.lock().push(Fault { call, nth, code });
        self
    }

    /// Object accounting shared by every clone of this driver.
    pub fn ledger(&self) -> Arc<Ledger> {
        Arc::clone(&self.inner.ledger)
    }

    /// Number of calls of kind `call` made so far.
    pub fn call_count(&self, call: HostCall) -> usize {
        self.inner.calls.lock().get(&call).copied().unwrap_or(0)
    }

    /// Every accepted kernel launch, oldest first.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.inner.launches.lock().clone()
    }

    /// Current virtual device time.
    pub fn clock_ns(&self) -> u64 {
        *self.inner.clock_ns.lock()
    }

    /// Count the call and return the injected status code, if any.
    fn check(&self, call: HostCall) -> Result<(), i32> {
        let nth = {
            let mut calls = self.inner.calls.lock();
            let count = calls.entry(call).or_insert(0);
            let nth = *count;
            *count += 1;
            nth
        };
        let faults = self.inner.faults.lock();
        match faults.iter().find(|f| f.call == call && f.nth == nth) {
            Some(fault) => Err(fault.code),
            None => Ok(()),
        }
    }

    fn live(&self, kind: ObjectKind) -> Live {
        self.inner.ledger.created(kind)
    }

    fn device(&self, id: &HostDeviceId) -> Result<&DeviceInfo, AccelError> {
        self.inner
            .platforms
            .get(id.platform)
            .and_then(|p| p.devices.get(id.device))
            .ok_or_else(|| AccelError::api(Operation::QueryDevices, codes::DEVICE_NOT_FOUND))
    }

    /// Advance the device clock by `cost` and stamp the interval.
    fn stamp(&self, cost: u64) -> EventTiming {
        let mut clock = self.inner.clock_ns.lock();
        let start_ns = *clock;
        *clock += cost;
        EventTiming {
            start_ns,
            end_ns: *clock,
        }
    }

    fn event(&self, status: EventStatus, timing: EventTiming, profiled: bool) -> HostEvent {
        HostEvent {
            status,
            timing,
            profiled,
            _live: self.live(ObjectKind::Event),
        }
    }

    /// Event for a command skipped because a dependency failed.
    fn skipped(&self, profiled: bool) -> HostEvent {
        self.event(
            EventStatus::Failed(codes::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST),
            EventTiming::default(),
            profiled,
        )
    }

    fn transfer_cost(&self, bytes: usize) -> u64 {
        self.inner.costs.transfer_ns_per_byte * bytes as u64
    }
}

fn any_failed(wait: &[&HostEvent]) -> bool {
    wait.iter().any(|e| !e.is_complete())
}

/// Entry points declared as `__kernel void <name>(` (or `kernel void`).
fn declared_kernels(image: &str) -> Vec<String> {
    let tokens: Vec<&str> = image
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .collect();
    let mut names = Vec::new();
    for window in tokens.windows(3) {
        if matches!(window[0], "__kernel" | "kernel") && window[1] == "void" {
            names.push(window[2].to_string());
        }
    }
    names
}

impl Driver for HostDriver {
    type Platform = HostPlatformId;
    type Device = HostDeviceId;
    type Context = HostContext;
    type Queue = HostQueue;
    type Program = HostProgram;
    type Kernel = HostKernel;
    type Buffer = HostBuffer;
    type Event = HostEvent;

    fn platforms(&self) -> Result<Vec<HostPlatformId>, AccelError> {
        self.check(HostCall::Platforms)
            .map_err(|code| AccelError::api(Operation::QueryPlatforms, code))?;
        Ok((0..self.inner.platforms.len()).map(HostPlatformId).collect())
    }

    fn platform_info(&self, platform: &HostPlatformId) -> Result<PlatformInfo, AccelError> {
        self.check(HostCall::PlatformInfo)
            .map_err(|code| AccelError::api(Operation::QueryPlatforms, code))?;
        self.inner
            .platforms
            .get(platform.0)
            .map(|p| p.info.clone())
            .ok_or_else(|| AccelError::api(Operation::QueryPlatforms, codes::INVALID_VALUE))
    }

    fn devices(
        &self,
        platform: &HostPlatformId,
        class: DeviceClass,
    ) -> Result<Vec<HostDeviceId>, AccelError> {
        self.check(HostCall::Devices)
            .map_err(|code| AccelError::api(Operation::QueryDevices, code))?;
        let entry = self
            .inner
            .platforms
            .get(platform.0)
            .ok_or_else(|| AccelError::api(Operation::QueryDevices, codes::INVALID_VALUE))?;
        Ok(entry
            .devices
            .iter()
            .enumerate()
            .filter(|(_, d)| class.admits(d.class))
            .map(|(device, _)| HostDeviceId {
                platform: platform.0,
                device,
            })
            .collect())
    }

    fn device_info(&self, device: &HostDeviceId) -> Result<DeviceInfo, AccelError> {
        self.device(device).cloned()
    }

    fn create_context(&self, device: &HostDeviceId) -> Result<HostContext, AccelError> {
        self.check(HostCall::CreateContext)
            .map_err(|code| AccelError::api(Operation::CreateContext, code))?;
        self.device(device)
            .map_err(|e| e.during(Operation::CreateContext))?;
        Ok(HostContext {
            device: *device,
            _live: self.live(ObjectKind::Context),
        })
    }

    fn create_queue(
        &self,
        context: &HostContext,
        device: &HostDeviceId,
        profiling: bool,
    ) -> Result<HostQueue, AccelError> {
        self.check(HostCall::CreateQueue)
            .map_err(|code| AccelError::api(Operation::CreateQueue, code))?;
        if context.device != *device {
            return Err(AccelError::api(Operation::CreateQueue, codes::INVALID_VALUE));
        }
        Ok(HostQueue {
            device: self.device(device)?.clone(),
            profiling,
            _live: self.live(ObjectKind::Queue),
        })
    }

    fn program_from_source(
        &self,
        _context: &HostContext,
        source: &str,
    ) -> Result<HostProgram, AccelError> {
        self.check(HostCall::CreateProgram)
            .map_err(|code| AccelError::api(Operation::LoadProgram, code))?;
        if source.trim().is_empty() {
            return Err(AccelError::api(Operation::LoadProgram, codes::INVALID_VALUE));
        }
        Ok(HostProgram {
            declared: declared_kernels(source),
            built: false,
            _live: self.live(ObjectKind::Program),
        })
    }

    fn program_from_binary(
        &self,
        context: &HostContext,
        device: &HostDeviceId,
        binary: &[u8],
    ) -> Result<HostProgram, AccelError> {
        self.check(HostCall::CreateProgram)
            .map_err(|code| AccelError::api(Operation::LoadProgram, code))?;
        if binary.is_empty() || context.device != *device {
            return Err(AccelError::api(Operation::LoadProgram, codes::INVALID_BINARY));
        }
        Ok(HostProgram {
            declared: declared_kernels(&String::from_utf8_lossy(binary)),
            built: false,
            _live: self.live(ObjectKind::Program),
        })
    }

    fn build_program(
        &self,
        program: &mut HostProgram,
        _device: &HostDeviceId,
        _options: &str,
    ) -> Result<(), AccelError> {
        self.check(HostCall::BuildProgram).map_err(|code| AccelError::Build {
            op: Operation::BuildProgram,
            code,
            log: "injected build failure".into(),
        })?;
        if program.declared.is_empty() {
            return Err(AccelError::Build {
                op: Operation::BuildProgram,
                code: codes::BUILD_PROGRAM_FAILURE,
                log: "error: no __kernel entry points found".into(),
            });
        }
        program.built = true;
        Ok(())
    }

    fn create_kernel(&self, program: &HostProgram, name: &str) -> Result<HostKernel, AccelError> {
        self.check(HostCall::CreateKernel)
            .map_err(|code| AccelError::api(Operation::CreateKernel, code))?;
        if !program.built {
            return Err(AccelError::api(
                Operation::CreateKernel,
                codes::BUILD_PROGRAM_FAILURE,
            ));
        }
        let body = program
            .declared
            .iter()
            .any(|d| d == name)
            .then(|| self.inner.bodies.read().get(name).cloned())
            .flatten()
            .ok_or_else(|| AccelError::api(Operation::CreateKernel, codes::INVALID_KERNEL_NAME))?;
        Ok(HostKernel {
            name: name.to_string(),
            args: vec![None; body.arity()],
            body,
            _live: self.live(ObjectKind::Kernel),
        })
    }

    fn create_buffer(
        &self,
        _context: &HostContext,
        access: MemAccess,
        size: usize,
    ) -> Result<HostBuffer, AccelError> {
        self.check(HostCall::CreateBuffer)
            .map_err(|code| AccelError::api(Operation::CreateBuffer, code))?;
        if size == 0 {
            return Err(AccelError::api(
                Operation::CreateBuffer,
                codes::INVALID_BUFFER_SIZE,
            ));
        }
        Ok(HostBuffer {
            access,
            storage: Arc::new(Mutex::new(vec![0; size])),
            _live: self.live(ObjectKind::Buffer),
        })
    }

    fn set_kernel_arg(
        &self,
        kernel: &mut HostKernel,
        index: u32,
        buffer: &HostBuffer,
    ) -> Result<(), AccelError> {
        self.check(HostCall::SetKernelArg)
            .map_err(|code| AccelError::api(Operation::SetKernelArg, code))?;
        let slot = kernel
            .args
            .get_mut(index as usize)
            .ok_or_else(|| AccelError::api(Operation::SetKernelArg, codes::INVALID_VALUE))?;
        *slot = Some(Arc::clone(&buffer.storage));
        Ok(())
    }

    unsafe fn enqueue_write(
        &self,
        queue: &HostQueue,
        buffer: &mut HostBuffer,
        data: &[u8],
        wait: &[&HostEvent],
    ) -> Result<HostEvent, AccelError> {
        self.check(HostCall::EnqueueWrite)
            .map_err(|code| AccelError::api(Operation::WriteBuffer, code))?;
        let mut storage = buffer.storage.lock();
        if data.len() > storage.len() {
            return Err(AccelError::api(Operation::WriteBuffer, codes::INVALID_VALUE));
        }
        if any_failed(wait) {
            return Ok(self.skipped(queue.profiling));
        }
        storage[..data.len()].copy_from_slice(data);
        let timing = self.stamp(self.transfer_cost(data.len()));
        Ok(self.event(EventStatus::Complete, timing, queue.profiling))
    }

    fn enqueue_kernel(
        &self,
        queue: &HostQueue,
        kernel: &HostKernel,
        global: usize,
        local: usize,
        wait: &[&HostEvent],
    ) -> Result<HostEvent, AccelError> {
        self.check(HostCall::EnqueueKernel)
            .map_err(|code| AccelError::api(Operation::LaunchKernel, code))?;
        if local == 0 || global % local != 0 || local > queue.device.max_work_group_size {
            return Err(AccelError::api(
                Operation::LaunchKernel,
                codes::INVALID_WORK_GROUP_SIZE,
            ));
        }
        let storages: Vec<Storage> = kernel
            .args
            .iter()
            .cloned()
            .collect::<Option<_>>()
            .ok_or_else(|| AccelError::api(Operation::LaunchKernel, codes::INVALID_KERNEL_ARGS))?;
        // Locking the same storage twice would deadlock; OpenCL forbids the
        // aliasing anyway.
        for (i, a) in storages.iter().enumerate() {
            if storages[..i].iter().any(|b| Arc::ptr_eq(a, b)) {
                return Err(AccelError::api(
                    Operation::LaunchKernel,
                    codes::INVALID_KERNEL_ARGS,
                ));
            }
        }

        self.inner.launches.lock().push(LaunchRecord {
            kernel: kernel.name.clone(),
            global,
            local,
        });

        if any_failed(wait) {
            return Ok(self.skipped(queue.profiling));
        }
        if let Err(code) = self.check(HostCall::KernelExecution) {
            return Ok(self.event(EventStatus::Failed(code), EventTiming::default(), queue.profiling));
        }

        let mut guards: Vec<_> = storages.iter().map(|s| s.lock()).collect();
        let mut views: Vec<&mut [u8]> = guards.iter_mut().map(|g| g.as_mut_slice()).collect();
        let status = match kernel.body.run(global, &mut views) {
            Ok(()) => EventStatus::Complete,
            Err(code) => EventStatus::Failed(code),
        };
        let costs = self.inner.costs;
        let timing = match status {
            EventStatus::Complete => {
                self.stamp(costs.launch_ns + costs.kernel_ns_per_item * global as u64)
            }
            EventStatus::Failed(_) => EventTiming::default(),
        };
        Ok(self.event(status, timing, queue.profiling))
    }

    unsafe fn enqueue_read(
        &self,
        queue: &HostQueue,
        buffer: &HostBuffer,
        data: &mut [u8],
        wait: &[&HostEvent],
    ) -> Result<HostEvent, AccelError> {
        self.check(HostCall::EnqueueRead)
            .map_err(|code| AccelError::api(Operation::ReadBuffer, code))?;
        let storage = buffer.storage.lock();
        if data.len() > storage.len() {
            return Err(AccelError::api(Operation::ReadBuffer, codes::INVALID_VALUE));
        }
        if any_failed(wait) {
            return Ok(self.skipped(queue.profiling));
        }
        data.copy_from_slice(&storage[..data.len()]);
        let timing = self.stamp(self.transfer_cost(data.len()));
        Ok(self.event(EventStatus::Complete, timing, queue.profiling))
    }

    fn wait(&self, events: &[&HostEvent]) -> Result<(), AccelError> {
        self.check(HostCall::Wait)
            .map_err(|code| AccelError::api(Operation::WaitForResults, code))?;
        if any_failed(events) {
            return Err(AccelError::api(
                Operation::WaitForResults,
                codes::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST,
            ));
        }
        Ok(())
    }

    fn finish(&self, _queue: &HostQueue) -> Result<(), AccelError> {
        // Commands complete at enqueue time, so there is nothing to wait for.
        self.check(HostCall::Finish)
            .map_err(|code| AccelError::api(Operation::WaitForResults, code))
    }

    fn event_timing(&self, event: &HostEvent) -> Result<EventTiming, AccelError> {
        self.check(HostCall::Profiling)
            .map_err(|code| AccelError::api(Operation::QueryProfiling, code))?;
        if !event.profiled || !event.is_complete() {
            return Err(AccelError::api(
                Operation::QueryProfiling,
                codes::PROFILING_INFO_NOT_AVAILABLE,
            ));
        }
        Ok(event.timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MD_SOURCE: &str = "__kernel void md(__global const float3 *nearest,\n\
                             __global float *energy, __global float3 *force) {}";

    fn ready(driver: &HostDriver) -> (HostDeviceId, HostContext, HostQueue) {
        let platforms = driver.platforms().unwrap();
        let device = driver.devices(&platforms[0], DeviceClass::Gpu).unwrap()[0];
        let context = driver.create_context(&device).unwrap();
        let queue = driver.create_queue(&context, &device, true).unwrap();
        (device, context, queue)
    }

    #[test]
    fn scans_kernel_declarations() {
        let src = "kernel void a(global float *x) {}\n__kernel  void md (float3 y) {}\nvoid helper() {}";
        assert_eq!(declared_kernels(src), vec!["a".to_string(), "md".to_string()]);
        assert!(declared_kernels("int main() { return 0; }").is_empty());
    }

    #[test]
    fn device_class_filter_keeps_enumeration_order() {
        let driver = HostDriver::default();
        let platforms = driver.platforms().unwrap();
        let intel = &platforms[1];
        assert_eq!(driver.devices(intel, DeviceClass::All).unwrap().len(), 2);
        let gpus = driver.devices(intel, DeviceClass::Gpu).unwrap();
        assert_eq!(gpus.len(), 1);
        assert_eq!(driver.device_info(&gpus[0]).unwrap().name, "Emulated Iris");
    }

    #[test]
    fn build_fails_without_entry_points() {
        let driver = HostDriver::default();
        let (device, context, _queue) = ready(&driver);
        let mut program = driver
            .program_from_source(&context, "int helper(void) { return 1; }")
            .unwrap();
        let err = driver.build_program(&mut program, &device, "").unwrap_err();
        assert_eq!(err.code(), Some(codes::BUILD_PROGRAM_FAILURE));
    }

    #[test]
    fn unknown_entry_point_is_rejected() {
        let driver = HostDriver::default();
        let (device, context, _queue) = ready(&driver);
        let mut program = driver.program_from_source(&context, MD_SOURCE).unwrap();
        driver.build_program(&mut program, &device, "").unwrap();
        let err = driver.create_kernel(&program, "nbody").unwrap_err();
        assert_eq!(err.code(), Some(codes::INVALID_KERNEL_NAME));
        assert!(driver.create_kernel(&program, "md").is_ok());
    }

    #[test]
    fn failed_dependency_propagates_to_dependents() {
        let driver = HostDriver::default();
        driver.fail_on(HostCall::KernelExecution, 0, codes::OUT_OF_RESOURCES);
        let (device, context, queue) = ready(&driver);
        let mut program = driver.program_from_source(&context, MD_SOURCE).unwrap();
        driver.build_program(&mut program, &device, "").unwrap();
        let mut kernel = driver.create_kernel(&program, "md").unwrap();
        let input = driver.create_buffer(&context, MemAccess::ReadOnly, 64).unwrap();
        let energy = driver.create_buffer(&context, MemAccess::WriteOnly, 16).unwrap();
        let force = driver.create_buffer(&context, MemAccess::WriteOnly, 64).unwrap();
        driver.set_kernel_arg(&mut kernel, 0, &input).unwrap();
        driver.set_kernel_arg(&mut kernel, 1, &energy).unwrap();
        driver.set_kernel_arg(&mut kernel, 2, &force).unwrap();

        let launched = driver.enqueue_kernel(&queue, &kernel, 4, 4, &[]).unwrap();
        assert!(!launched.is_complete());

        let mut host = [0u8; 16];
        let read = unsafe { driver.enqueue_read(&queue, &energy, &mut host, &[&launched]) }.unwrap();
        assert!(!read.is_complete());
        let err = driver.wait(&[&read]).unwrap_err();
        assert_eq!(
            err.code(),
            Some(codes::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST)
        );
    }

    #[test]
    fn launch_rejects_oversized_work_group() {
        let driver = HostDriver::new(vec![HostPlatform::intel_gpu()]);
        let (device, context, queue) = ready(&driver);
        let mut program = driver.program_from_source(&context, MD_SOURCE).unwrap();
        driver.build_program(&mut program, &device, "").unwrap();
        let kernel = driver.create_kernel(&program, "md").unwrap();
        // Intel emulated GPU allows 256 work-items per group.
        let err = driver.enqueue_kernel(&queue, &kernel, 512, 512, &[]).unwrap_err();
        assert_eq!(err.code(), Some(codes::INVALID_WORK_GROUP_SIZE));
    }

    #[test]
    fn unbound_arguments_are_rejected() {
        let driver = HostDriver::default();
        let (device, context, queue) = ready(&driver);
        let mut program = driver.program_from_source(&context, MD_SOURCE).unwrap();
        driver.build_program(&mut program, &device, "").unwrap();
        let kernel = driver.create_kernel(&program, "md").unwrap();
        let err = driver.enqueue_kernel(&queue, &kernel, 4, 4, &[]).unwrap_err();
        assert_eq!(err.code(), Some(codes::INVALID_KERNEL_ARGS));
    }

    #[test]
    fn clock_stamps_commands_back_to_back() {
        let driver = HostDriver::default();
        let (_device, context, queue) = ready(&driver);
        let mut buffer = driver.create_buffer(&context, MemAccess::ReadOnly, 32).unwrap();
        let data = [1u8; 32];
        let first = unsafe { driver.enqueue_write(&queue, &mut buffer, &data, &[]) }.unwrap();
        let second =
            unsafe { driver.enqueue_write(&queue, &mut buffer, &data, &[&first]) }.unwrap();
        let t1 = driver.event_timing(&first).unwrap();
        let t2 = driver.event_timing(&second).unwrap();
        assert_eq!(t1.elapsed_ns(), 32);
        assert_eq!(t2.start_ns, t1.end_ns);
        assert_eq!(driver.clock_ns(), 64);
    }

    #[test]
    fn unprofiled_queue_has_no_timestamps() {
        let driver = HostDriver::default();
        let platforms = driver.platforms().unwrap();
        let device = driver.devices(&platforms[0], DeviceClass::Gpu).unwrap()[0];
        let context = driver.create_context(&device).unwrap();
        let queue = driver.create_queue(&context, &device, false).unwrap();
        let mut buffer = driver.create_buffer(&context, MemAccess::ReadOnly, 4).unwrap();
        let event = unsafe { driver.enqueue_write(&queue, &mut buffer, &[0; 4], &[]) }.unwrap();
        let err = driver.event_timing(&event).unwrap_err();
        assert_eq!(err.code(), Some(codes::PROFILING_INFO_NOT_AVAILABLE));
    }

    #[test]
    fn ledger_tracks_drops() {
        let driver = HostDriver::default();
        let ledger = driver.ledger();
        {
            let (_device, context, _queue) = ready(&driver);
            let _buffer = driver.create_buffer(&context, MemAccess::ReadWrite, 8).unwrap();
            assert_eq!(ledger.live_total(), 3);
        }
        assert_eq!(ledger.live_total(), 0);
        assert_eq!(ledger.created_count(ObjectKind::Buffer), 1);
        assert_eq!(ledger.released_count(ObjectKind::Buffer), 1);
        assert!(ledger.balanced());
    }

    #[test]
    fn injected_fault_hits_only_the_nth_call() {
        let driver = HostDriver::default();
        driver.fail_on(HostCall::CreateBuffer, 1, codes::OUT_OF_HOST_MEMORY);
        let (_device, context, _queue) = ready(&driver);
        assert!(driver.create_buffer(&context, MemAccess::ReadOnly, 4).is_ok());
        let err = driver.create_buffer(&context, MemAccess::ReadOnly, 4).unwrap_err();
        assert_eq!(err.code(), Some(codes::OUT_OF_HOST_MEMORY));
        assert!(driver.create_buffer(&context, MemAccess::ReadOnly, 4).is_ok());
        assert_eq!(driver.call_count(HostCall::CreateBuffer), 3);
    }
}

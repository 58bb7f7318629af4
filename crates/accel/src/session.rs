//! One owned accelerator session: resolve, set up, dispatch, tear down.

use crate::buffers::{BufferRefs, DeviceBuffers};
use crate::config::AccelConfig;
use crate::context::{ExecutionContext, ReadyHandles};
use crate::driver::{DeviceInfo, Driver, PlatformInfo};
use crate::error::{AccelError, Operation};
use crate::particle::Float3;
use crate::profile::{DispatchTiming, KernelProfile};
use crate::resolve::resolve;

/// Kernel argument positions, fixed by the `md` signature.
const ARG_NEAREST: u32 = 0;
const ARG_ENERGY: u32 = 1;
const ARG_FORCE: u32 = 2;

/// Everything a simulation needs to offload its force evaluation.
///
/// Created once with [`AccelSession::open`], driven with
/// [`AccelSession::dispatch`] once per timestep, released by
/// [`AccelSession::teardown`] or drop.
pub struct AccelSession<D: Driver> {
    driver: D,
    particles: usize,
    platform_info: Option<PlatformInfo>,
    context: ExecutionContext<D>,
    buffers: DeviceBuffers<D>,
    profile: KernelProfile,
}

/// Events of one dispatch, released when dropped.
struct Submitted<E> {
    write: E,
    kernel: E,
    read_energy: E,
    read_force: E,
}

impl<D: Driver> AccelSession<D> {
    /// Resolve the device, build the program and allocate buffers.
    ///
    /// On error, whatever was created so far is released before returning.
    pub fn open(driver: D, config: &AccelConfig) -> Result<Self, AccelError> {
        config.validate()?;
        let particles = config.particle_count;
        let mut session = Self {
            driver,
            particles,
            platform_info: None,
            context: ExecutionContext::new(),
            buffers: DeviceBuffers::empty(),
            profile: KernelProfile::default(),
        };

        let resolved = resolve(&session.driver, &config.platform, config.device_class)?;
        // The whole system is one work-group; refuse before creating anything.
        let max = resolved.device_info.max_work_group_size;
        if particles > max {
            return Err(AccelError::WorkGroupTooLarge { particles, max });
        }
        session.platform_info = Some(resolved.platform_info.clone());

        session.context.setup(
            &session.driver,
            resolved,
            &config.program,
            &config.kernel_name,
            &config.build_options,
        )?;

        let handles = session.context.ready()?;
        session
            .buffers
            .allocate(&session.driver, handles.context, particles)?;

        tracing::info!("Accelerator session open for {particles} particles");
        Ok(session)
    }

    /// Run the kernel once over `nearest`, filling `energy` and `force`.
    ///
    /// Upload, launch and both read-backs are chained through events; the
    /// host blocks once, on the read-backs. Every slice must hold exactly
    /// [`particle_count`](Self::particle_count) elements.
    pub fn dispatch(
        &mut self,
        nearest: &[Float3],
        energy: &mut [f32],
        force: &mut [Float3],
    ) -> Result<DispatchTiming, AccelError> {
        let n = self.particles;
        check_len("nearest", n, nearest.len())?;
        check_len("energy", n, energy.len())?;
        check_len("force", n, force.len())?;

        let driver = &self.driver;
        let handles = self.context.ready()?;
        let buffers = self.buffers.refs()?;
        let queue = handles.queue;

        // SAFETY: the host slices outlive this call, and every path out of it
        // after the first enqueue either waits on the read-backs or drains
        // the queue.
        let events = match unsafe { submit(driver, handles, buffers, n, nearest, energy, force) } {
            Ok(events) => events,
            Err(e) => {
                drain(driver, queue);
                return Err(e);
            }
        };

        if let Err(e) = driver.wait(&[&events.read_energy, &events.read_force]) {
            drain(driver, queue);
            return Err(e.during(Operation::WaitForResults));
        }

        let kernel_ns = driver
            .event_timing(&events.kernel)
            .map_err(|e| e.during(Operation::QueryProfiling))?
            .elapsed_ns();
        let elapsed = |event: &D::Event| driver.event_timing(event).ok().map(|t| t.elapsed_ns());
        let upload_ns = elapsed(&events.write);
        let readback_ns = elapsed(&events.read_energy)
            .zip(elapsed(&events.read_force))
            .map(|(e, f)| e + f);
        drop(events);

        self.profile.record(kernel_ns);
        tracing::debug!(
            dispatch = self.profile.dispatches(),
            kernel_ns,
            "dispatch complete"
        );

        Ok(DispatchTiming {
            kernel_ns,
            upload_ns,
            readback_ns,
        })
    }

    /// Release kernel, queue, buffers, program and context, in that order.
    ///
    /// Only objects that exist are released; calling it again does nothing.
    pub fn teardown(&mut self) {
        let released = self.context.release_commands()
            + self.buffers.release()
            + self.context.teardown();
        self.platform_info = None;
        if released > 0 {
            tracing::info!(
                "Accelerator session closed after {} dispatch(es), {released} object(s) released",
                self.profile.dispatches()
            );
        }
    }

    /// Tear down and hand back the accumulated kernel time.
    pub fn close(mut self) -> KernelProfile {
        self.teardown();
        self.profile
    }

    /// Whether the session can still dispatch.
    pub fn is_open(&self) -> bool {
        self.context.is_ready() && self.buffers.live_buffers() == 3
    }

    /// Particles per dispatch.
    pub fn particle_count(&self) -> usize {
        self.particles
    }

    /// Device kernel time accumulated so far.
    pub fn profile(&self) -> &KernelProfile {
        &self.profile
    }

    /// The bound device, while the session is open.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.context.device_info()
    }

    /// The selected platform, while the session is open.
    pub fn platform_info(&self) -> Option<&PlatformInfo> {
        self.platform_info.as_ref()
    }

    /// Driver the session runs on.
    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl<D: Driver> Drop for AccelSession<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn check_len(array: &'static str, expected: usize, actual: usize) -> Result<(), AccelError> {
    if expected == actual {
        Ok(())
    } else {
        Err(AccelError::LengthMismatch {
            array,
            expected,
            actual,
        })
    }
}

/// Enqueue upload, argument binding, launch and read-backs.
///
/// # Safety
/// `nearest`, `energy` and `force` are accessed by the device until the
/// returned read events complete. On error, commands enqueued so far may
/// still be running; the caller must drain the queue.
unsafe fn submit<D: Driver>(
    driver: &D,
    handles: ReadyHandles<'_, D>,
    buffers: BufferRefs<'_, D>,
    n: usize,
    nearest: &[Float3],
    energy: &mut [f32],
    force: &mut [Float3],
) -> Result<Submitted<D::Event>, AccelError> {
    let ReadyHandles { queue, kernel, .. } = handles;
    let BufferRefs {
        nearest: nearest_buf,
        energy: energy_buf,
        force: force_buf,
    } = buffers;

    let write = driver
        .enqueue_write(queue, nearest_buf, bytemuck::cast_slice(nearest), &[])
        .map_err(|e| e.during(Operation::TransferNearest))?;

    driver
        .set_kernel_arg(kernel, ARG_NEAREST, nearest_buf)
        .map_err(|e| e.during(Operation::SetNearestArg))?;
    driver
        .set_kernel_arg(kernel, ARG_ENERGY, energy_buf)
        .map_err(|e| e.during(Operation::SetEnergyArg))?;
    driver
        .set_kernel_arg(kernel, ARG_FORCE, force_buf)
        .map_err(|e| e.during(Operation::SetForceArg))?;

    let launched = driver
        .enqueue_kernel(queue, kernel, n, n, &[&write])
        .map_err(|e| e.during(Operation::LaunchKernel))?;

    let read_energy = driver
        .enqueue_read(queue, energy_buf, bytemuck::cast_slice_mut(energy), &[&launched])
        .map_err(|e| e.during(Operation::ReadEnergy))?;
    let read_force = driver
        .enqueue_read(queue, force_buf, bytemuck::cast_slice_mut(force), &[&launched])
        .map_err(|e| e.during(Operation::ReadForce))?;

    Ok(Submitted {
        write,
        kernel: launched,
        read_energy,
        read_force,
    })
}

/// Block until the queue is idle after a failed dispatch.
fn drain<D: Driver>(driver: &D, queue: &D::Queue) {
    if let Err(e) = driver.finish(queue) {
        tracing::warn!("queue drain after failed dispatch: {e}");
    }
}

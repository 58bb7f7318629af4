//! Device context, command queue, program and kernel of a session.
//!
//! Every handle sits in an `Option` that is filled only after its creating
//! call succeeded, so a failed setup leaves exactly the already-created
//! handles behind for [`ExecutionContext::teardown`] to release.

use crate::backend::ProgramBackend;
use crate::driver::{DeviceInfo, Driver};
use crate::error::{AccelError, Operation};
use crate::resolve::Resolved;

/// Lifecycle of an [`ExecutionContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Setup has not completed (or the context was torn down).
    Uninitialized,
    /// Context, queue, program and kernel all exist.
    Ready,
    /// Kernel and queue released; program and context still held.
    Draining,
}

/// Borrowed handles of a ready context.
pub struct ReadyHandles<'a, D: Driver> {
    /// Device context.
    pub context: &'a D::Context,
    /// Profiling command queue.
    pub queue: &'a D::Queue,
    /// Kernel entry point; mutable for argument binding.
    pub kernel: &'a mut D::Kernel,
}

/// Owner of the context-level device handles.
pub struct ExecutionContext<D: Driver> {
    state: ContextState,
    platform: Option<D::Platform>,
    device: Option<D::Device>,
    device_info: Option<DeviceInfo>,
    context: Option<D::Context>,
    queue: Option<D::Queue>,
    program: Option<D::Program>,
    kernel: Option<D::Kernel>,
}

impl<D: Driver> Default for ExecutionContext<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Driver> ExecutionContext<D> {
    /// Context with no handles.
    pub fn new() -> Self {
        Self {
            state: ContextState::Uninitialized,
            platform: None,
            device: None,
            device_info: None,
            context: None,
            queue: None,
            program: None,
            kernel: None,
        }
    }

    /// One-time setup on the resolved device.
    ///
    /// 1. context bound to the device
    /// 2. command queue with profiling enabled
    /// 3. program from `backend`, built with `build_options`
    /// 4. kernel `kernel_name`
    ///
    /// Stops at the first failing step. Handles created before it stay in the
    /// context until [`teardown`](Self::teardown) or drop.
    pub fn setup(
        &mut self,
        driver: &D,
        resolved: Resolved<D>,
        backend: &ProgramBackend,
        kernel_name: &str,
        build_options: &str,
    ) -> Result<(), AccelError> {
        let Resolved {
            platform,
            device,
            device_info,
            ..
        } = resolved;
        self.platform = Some(platform);
        let device = &*self.device.insert(device);
        let device_info = &*self.device_info.insert(device_info);

        let context = &*self.context.insert(
            driver
                .create_context(device)
                .map_err(|e| e.during(Operation::CreateContext))?,
        );

        self.queue = Some(
            driver
                .create_queue(context, device, true)
                .map_err(|e| e.during(Operation::CreateQueue))?,
        );

        let program = &*self.program.insert(backend.load(
            driver,
            context,
            device,
            device_info,
            kernel_name,
            build_options,
        )?);

        self.kernel = Some(
            driver
                .create_kernel(program, kernel_name)
                .map_err(|e| e.during(Operation::CreateKernel))?,
        );

        self.state = ContextState::Ready;
        tracing::info!("Kernel {kernel_name:?} ready on {}", device_info.name);
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Whether setup completed.
    pub fn is_ready(&self) -> bool {
        self.state == ContextState::Ready
    }

    /// Description of the bound device, once resolved.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    /// Handles needed to allocate buffers and dispatch.
    pub fn ready(&mut self) -> Result<ReadyHandles<'_, D>, AccelError> {
        if self.state != ContextState::Ready {
            return Err(AccelError::NotReady);
        }
        match (&self.context, &self.queue, &mut self.kernel) {
            (Some(context), Some(queue), Some(kernel)) => Ok(ReadyHandles {
                context,
                queue,
                kernel,
            }),
            _ => Err(AccelError::NotReady),
        }
    }

    /// Number of device objects currently held.
    pub fn live_handles(&self) -> usize {
        [
            self.context.is_some(),
            self.queue.is_some(),
            self.program.is_some(),
            self.kernel.is_some(),
        ]
        .iter()
        .filter(|&&held| held)
        .count()
    }

    /// Release the kernel and queue only, leaving program and context.
    ///
    /// A ready context moves to `Draining`. Returns how many objects were
    /// released.
    pub fn release_commands(&mut self) -> usize {
        let released = usize::from(self.kernel.is_some()) + usize::from(self.queue.is_some());
        if released > 0 && self.state == ContextState::Uninitialized {
            tracing::warn!("Releasing {released} command object(s) of a partially initialized context");
        }
        drop(self.kernel.take());
        drop(self.queue.take());
        if self.state == ContextState::Ready {
            self.state = ContextState::Draining;
        }
        released
    }

    /// Release every held handle; a no-op when nothing is held.
    ///
    /// Order: kernel, queue, program, context. Returns how many objects were
    /// released.
    pub fn teardown(&mut self) -> usize {
        let released = self.live_handles();
        if released > 0 && self.state == ContextState::Uninitialized {
            tracing::warn!("Releasing {released} handle(s) of a partially initialized context");
        }
        drop(self.kernel.take());
        drop(self.queue.take());
        drop(self.program.take());
        drop(self.context.take());
        self.device_info = None;
        self.device = None;
        self.platform = None;
        self.state = ContextState::Uninitialized;
        released
    }
}

impl<D: Driver> Drop for ExecutionContext<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

//! Device-resident storage for one dispatch.

use std::mem::size_of;

use crate::driver::{Driver, MemAccess};
use crate::error::{AccelError, Operation};
use crate::particle::Float3;

/// The three buffers the `md` kernel is bound to, sized for `N` particles.
///
/// | buffer   | access     | bytes                 |
/// |----------|------------|-----------------------|
/// | nearest  | read-only  | `N * size_of::<Float3>()` |
/// | energy   | write-only | `N * size_of::<f32>()`    |
/// | force    | write-only | `N * size_of::<Float3>()` |
pub struct DeviceBuffers<D: Driver> {
    particles: usize,
    nearest: Option<D::Buffer>,
    energy: Option<D::Buffer>,
    force: Option<D::Buffer>,
}

/// Borrowed buffers of a fully allocated set.
pub struct BufferRefs<'a, D: Driver> {
    /// Neighbor positions uploaded every step.
    pub nearest: &'a mut D::Buffer,
    /// Per-particle energy written by the kernel.
    pub energy: &'a D::Buffer,
    /// Per-particle force written by the kernel.
    pub force: &'a D::Buffer,
}

impl<D: Driver> Default for DeviceBuffers<D> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<D: Driver> DeviceBuffers<D> {
    /// Set holding no buffers.
    pub fn empty() -> Self {
        Self {
            particles: 0,
            nearest: None,
            energy: None,
            force: None,
        }
    }

    /// Allocate all three buffers for `particles` particles.
    ///
    /// Fails with [`AccelError::AlreadyAllocated`] while any buffer is held.
    /// Buffers allocated before a failure stay in the set; drop or
    /// [`release`](Self::release) frees them.
    pub fn allocate(
        &mut self,
        driver: &D,
        context: &D::Context,
        particles: usize,
    ) -> Result<(), AccelError> {
        if self.live_buffers() > 0 {
            return Err(AccelError::AlreadyAllocated {
                particles: self.particles,
            });
        }
        self.particles = particles;

        let vec_bytes = particles * size_of::<Float3>();
        let scalar_bytes = particles * size_of::<f32>();

        self.nearest = Some(
            driver
                .create_buffer(context, MemAccess::ReadOnly, vec_bytes)
                .map_err(|e| e.during(Operation::CreateNearestBuffer))?,
        );
        self.energy = Some(
            driver
                .create_buffer(context, MemAccess::WriteOnly, scalar_bytes)
                .map_err(|e| e.during(Operation::CreateEnergyBuffer))?,
        );
        self.force = Some(
            driver
                .create_buffer(context, MemAccess::WriteOnly, vec_bytes)
                .map_err(|e| e.during(Operation::CreateForceBuffer))?,
        );

        tracing::debug!(
            particles,
            bytes = 2 * vec_bytes + scalar_bytes,
            "device buffers allocated"
        );
        Ok(())
    }

    /// Particle count the buffers were sized for.
    pub fn particles(&self) -> usize {
        self.particles
    }

    /// Number of buffers currently held.
    pub fn live_buffers(&self) -> usize {
        [
            self.nearest.is_some(),
            self.energy.is_some(),
            self.force.is_some(),
        ]
        .iter()
        .filter(|&&held| held)
        .count()
    }

    /// All three buffers, or [`AccelError::NotReady`] if any is missing.
    pub fn refs(&mut self) -> Result<BufferRefs<'_, D>, AccelError> {
        match (&mut self.nearest, &self.energy, &self.force) {
            (Some(nearest), Some(energy), Some(force)) => Ok(BufferRefs {
                nearest,
                energy,
                force,
            }),
            _ => Err(AccelError::NotReady),
        }
    }

    /// Release whatever is held. Safe to call repeatedly.
    pub fn release(&mut self) -> usize {
        let released = self.live_buffers();
        drop(self.nearest.take());
        drop(self.energy.take());
        drop(self.force.take());
        self.particles = 0;
        released
    }
}

impl<D: Driver> Drop for DeviceBuffers<D> {
    fn drop(&mut self) {
        self.release();
    }
}

//! Particle state owned by the host: initial lattice, neighbor array,
//! and the timestep update.
//!
//! All particles have unit mass. The box is periodic for the neighbor array
//! only: positions handed to the device are wrapped into `[0, box_size)`.

use accel::Float3;

/// Positions and velocities of every particle.
#[derive(Debug, Clone)]
pub struct ParticleSystem {
    /// Unwrapped positions
    pub positions: Vec<Float3>,
    /// Velocities
    pub velocities: Vec<Float3>,
    box_size: f32,
}

impl ParticleSystem {
    /// `n` particles at rest on a simple cubic lattice.
    ///
    /// Sites are filled x-fastest, starting half a spacing in from the box
    /// corner, `per_axis` sites per edge.
    pub fn lattice(n: usize, per_axis: usize, spacing: f32, box_size: f32) -> Self {
        let per_axis = per_axis.max(1);
        let positions = (0..n)
            .map(|i| {
                let ix = i % per_axis;
                let iy = (i / per_axis) % per_axis;
                let iz = i / (per_axis * per_axis);
                Float3::new(
                    (ix as f32 + 0.5) * spacing,
                    (iy as f32 + 0.5) * spacing,
                    (iz as f32 + 0.5) * spacing,
                )
            })
            .collect();
        Self {
            positions,
            velocities: vec![Float3::ZERO; n],
            box_size,
        }
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the system is empty.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Periodic box edge length.
    pub fn box_size(&self) -> f32 {
        self.box_size
    }

    /// Write the neighbor array for the next dispatch.
    pub fn fill_nearest(&self, nearest: &mut [Float3]) {
        let l = self.box_size;
        for (dst, p) in nearest.iter_mut().zip(&self.positions) {
            *dst = Float3::new(p.x.rem_euclid(l), p.y.rem_euclid(l), p.z.rem_euclid(l));
        }
    }

    /// Symplectic Euler step: velocities from `force`, then positions.
    pub fn advance(&mut self, force: &[Float3], dt: f32) {
        for ((x, v), &f) in self
            .positions
            .iter_mut()
            .zip(self.velocities.iter_mut())
            .zip(force)
        {
            *v += f * dt;
            *x += *v * dt;
        }
    }

    /// Total kinetic energy, `sum(|v|^2) / 2`.
    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self
            .velocities
            .iter()
            .map(|v| v.length_squared() as f64)
            .sum::<f64>()
    }
}

//! The timestep loop: produce neighbors, dispatch, integrate.

use std::time::Instant;

use accel::{AccelSession, Driver, HostArrays, KernelProfile};

use crate::config::RunConfig;
use crate::error::RunError;
use crate::system::ParticleSystem;

/// Outcome of a finished run.
#[derive(Debug, Clone, Copy)]
pub struct RunReport {
    /// Timesteps executed
    pub iterations: u64,
    /// Wall-clock time of the loop (milliseconds)
    pub wall_ms: f64,
    /// Device kernel time accumulated by the session
    pub profile: KernelProfile,
    /// Potential + kinetic energy at the first step
    pub initial_energy: f64,
    /// Potential + kinetic energy at the last step
    pub final_energy: f64,
}

impl RunReport {
    /// Total device kernel time (milliseconds).
    pub fn kernel_ms(&self) -> f64 {
        self.profile.total_ms()
    }

    /// Device kernel time per timestep (milliseconds).
    pub fn kernel_ms_per_iteration(&self) -> f64 {
        self.profile.per_iteration_ms(self.iterations)
    }

    /// `|E_final - E_initial| / |E_initial|`, zero for a zero-energy system.
    pub fn relative_energy_drift(&self) -> f64 {
        if self.initial_energy == 0.0 {
            0.0
        } else {
            ((self.final_energy - self.initial_energy) / self.initial_energy).abs()
        }
    }
}

/// Run `config.iterations` timesteps of `system` on `session`.
///
/// Each step wraps positions into the neighbor array, dispatches, then
/// advances the system with the returned forces. The first failing dispatch
/// ends the run.
pub fn run_loop<D: Driver>(
    session: &mut AccelSession<D>,
    system: &mut ParticleSystem,
    config: &RunConfig,
) -> Result<RunReport, RunError> {
    let mut arrays = HostArrays::zeroed(system.len());
    let mut initial_energy = 0.0;
    let mut final_energy = 0.0;

    let start = Instant::now();
    for step in 0..config.iterations {
        system.fill_nearest(&mut arrays.nearest);
        session.dispatch(&arrays.nearest, &mut arrays.energy, &mut arrays.force)?;

        // Energies refer to the positions the forces were evaluated at.
        let potential = arrays.total_energy();
        let kinetic = system.kinetic_energy();
        let total = potential + kinetic;
        if step == 0 {
            initial_energy = total;
        }
        final_energy = total;

        if config.report_every > 0 && step % config.report_every == 0 {
            tracing::info!(
                step,
                potential,
                kinetic,
                total,
                kernel_ms = session.profile().last_ns() as f64 / 1_000_000.0,
                "energy"
            );
        }

        system.advance(&arrays.force, config.dt);
    }
    let wall_ms = start.elapsed().as_secs_f64() * 1000.0;

    Ok(RunReport {
        iterations: config.iterations,
        wall_ms,
        profile: *session.profile(),
        initial_energy,
        final_energy,
    })
}

//! CPU reference of the `md` kernel.
//!
//! Pair potential `u(r) = 1/r^2`. For particle `i`, summed over every other
//! particle `j` at non-zero distance:
//!
//! - `energy[i] = 1/2 * sum(1/r^2)` (each pair's energy split between both ends)
//! - `force[i]  = sum(2 * (p_i - p_j) / r^4)`
//!
//! Coincident particles contribute nothing. `device/md.cl` implements the
//! same law for real devices; the host driver's `md` kernel calls into here.

use crate::particle::Float3;

/// Evaluate energy and force for particles `0..work_items` against all of
/// `nearest`.
///
/// `energy` and `force` must hold at least `work_items` elements; entries past
/// that are left untouched.
pub fn inverse_square_into(
    nearest: &[Float3],
    work_items: usize,
    energy: &mut [f32],
    force: &mut [Float3],
) {
    for i in 0..work_items {
        let p_i = nearest[i];
        let mut e = 0.0_f32;
        let mut f = Float3::ZERO;
        for (j, &p_j) in nearest.iter().enumerate() {
            if j == i {
                continue;
            }
            let d = p_i - p_j;
            let r2 = d.length_squared();
            if r2 <= 0.0 {
                continue;
            }
            let inv_r2 = 1.0 / r2;
            e += inv_r2;
            f += d * (2.0 * inv_r2 * inv_r2);
        }
        energy[i] = 0.5 * e;
        force[i] = f;
    }
}

/// Allocate and return `(energy, force)` for every particle of `nearest`.
pub fn inverse_square(nearest: &[Float3]) -> (Vec<f32>, Vec<Float3>) {
    let n = nearest.len();
    let mut energy = vec![0.0; n];
    let mut force = vec![Float3::ZERO; n];
    inverse_square_into(nearest, n, &mut energy, &mut force);
    (energy, force)
}

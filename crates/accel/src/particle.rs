//! Host-side particle arrays exchanged with the device every timestep.

use bytemuck::{Pod, Zeroable};

/// Particle count used when a configuration does not name one.
pub const DEFAULT_PARTICLE_COUNT: usize = 256;

/// Three-component float vector with the memory layout of OpenCL `cl_float3`.
///
/// `cl_float3` occupies 16 bytes (it is a `cl_float4` under the hood), so the
/// fourth lane is padding and is never read by the kernel.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Float3 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
    _pad: f32,
}

impl Float3 {
    /// All components zero.
    pub const ZERO: Float3 = Float3::new(0.0, 0.0, 0.0);

    /// Build a vector from its components.
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z, _pad: 0.0 }
    }

    /// Components as an array.
    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// Squared Euclidean length.
    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }
}

impl From<[f32; 3]> for Float3 {
    fn from(v: [f32; 3]) -> Self {
        Float3::new(v[0], v[1], v[2])
    }
}

impl std::ops::Sub for Float3 {
    type Output = Float3;

    fn sub(self, rhs: Float3) -> Float3 {
        Float3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Add for Float3 {
    type Output = Float3;

    fn add(self, rhs: Float3) -> Float3 {
        Float3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::AddAssign for Float3 {
    fn add_assign(&mut self, rhs: Float3) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

impl std::ops::Mul<f32> for Float3 {
    type Output = Float3;

    fn mul(self, s: f32) -> Float3 {
        Float3::new(self.x * s, self.y * s, self.z * s)
    }
}

/// The three host arrays of one dispatch, all of length N.
///
/// `nearest` is filled by the caller before each dispatch; `energy` and
/// `force` are overwritten by it.
#[derive(Debug, Clone)]
pub struct HostArrays {
    /// Neighbor positions uploaded to the device.
    pub nearest: Vec<Float3>,
    /// Per-particle potential energy read back from the device.
    pub energy: Vec<f32>,
    /// Per-particle force read back from the device.
    pub force: Vec<Float3>,
}

impl HostArrays {
    /// Zeroed arrays for `n` particles.
    pub fn zeroed(n: usize) -> Self {
        Self {
            nearest: vec![Float3::ZERO; n],
            energy: vec![0.0; n],
            force: vec![Float3::ZERO; n],
        }
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.nearest.len()
    }

    /// Whether the arrays hold no particles.
    pub fn is_empty(&self) -> bool {
        self.nearest.is_empty()
    }

    /// Sum of the per-particle energies, accumulated in f64.
    pub fn total_energy(&self) -> f64 {
        self.energy.iter().map(|&e| e as f64).sum()
    }
}

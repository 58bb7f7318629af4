//! OpenCL device vs host reference parity.
//!
//! Gated behind `#[cfg(feature = "opencl")]`. Runs `device/md.cl` on the first
//! OpenCL device of any class and compares against `accel::reference`.
//! Machines without an OpenCL runtime skip the comparison.

#![cfg(feature = "opencl")]

use std::path::Path;

use accel::driver::{DeviceClass, Driver};
use accel::{
    reference, AccelConfig, AccelError, AccelSession, Float3, HostArrays, OpenClDriver,
    PlatformSelector, ProgramBackend,
};

/// Selector for the first platform the runtime lists, if any.
fn first_platform() -> Option<PlatformSelector> {
    let driver = OpenClDriver::new();
    let platforms = driver.platforms().ok()?;
    let info = driver.platform_info(platforms.first()?).ok()?;
    Some(PlatformSelector::Vendor(info.vendor))
}

#[test]
fn device_matches_host_reference() {
    let Some(platform) = first_platform() else {
        eprintln!("no OpenCL platform; skipping");
        return;
    };
    let n = 64;
    let config = AccelConfig {
        platform,
        device_class: DeviceClass::All,
        program: ProgramBackend::Source {
            path: Path::new(env!("CARGO_MANIFEST_DIR")).join("../../device/md.cl"),
        },
        ..AccelConfig::default().with_particle_count(n)
    };

    let mut session = match AccelSession::open(OpenClDriver::new(), &config) {
        Ok(session) => session,
        Err(AccelError::WorkGroupTooLarge { max, .. }) => {
            eprintln!("device work-group limit {max} < {n}; skipping");
            return;
        }
        Err(e) => panic!("OpenCL session failed to open: {e}"),
    };

    let nearest: Vec<Float3> = (0..n)
        .map(|i| {
            let t = i as f32 * 0.61;
            Float3::new(t.cos() * 3.0, t.sin() * 3.0, i as f32 * 0.05)
        })
        .collect();
    let mut out = HostArrays::zeroed(n);
    let timing = session
        .dispatch(&nearest, &mut out.energy, &mut out.force)
        .unwrap();
    assert_eq!(session.profile().total_ns(), timing.kernel_ns);

    let (energy, force) = reference::inverse_square(&nearest);
    for i in 0..n {
        let de = (out.energy[i] - energy[i]).abs();
        assert!(
            de <= 1e-4 * energy[i].abs().max(1.0),
            "energy[{i}]: device {} vs host {}",
            out.energy[i],
            energy[i]
        );
        let df = (out.force[i] - force[i]).length_squared().sqrt();
        let scale = force[i].length_squared().sqrt().max(1.0);
        assert!(
            df <= 1e-4 * scale,
            "force[{i}]: device {:?} vs host {:?}",
            out.force[i],
            force[i]
        );
    }
}

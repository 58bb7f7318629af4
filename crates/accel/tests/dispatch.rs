//! Per-timestep pipeline on the emulated device.
//!
//! Every test runs the shipped `device/md.cl` through the host driver, whose
//! `md` kernel evaluates the same inverse-square law on the host.

use std::path::Path;

use accel::driver::host::{HostCall, HostCosts, HostDriver, HostPlatform, ObjectKind};
use accel::error::codes;
use accel::{AccelConfig, AccelError, AccelSession, Float3, HostArrays, Operation, ProgramBackend};

fn config(particles: usize) -> AccelConfig {
    AccelConfig {
        program: ProgramBackend::Source {
            path: Path::new(env!("CARGO_MANIFEST_DIR")).join("../../device/md.cl"),
        },
        ..AccelConfig::default().with_particle_count(particles)
    }
}

/// Independent double-precision evaluation of u(r) = 1/r^2.
fn expected(points: &[[f64; 3]]) -> (Vec<f64>, Vec<[f64; 3]>) {
    let mut energy = vec![0.0; points.len()];
    let mut force = vec![[0.0; 3]; points.len()];
    for (i, a) in points.iter().enumerate() {
        for (j, b) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            let d = [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
            let r2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
            if r2 == 0.0 {
                continue;
            }
            energy[i] += 0.5 / r2;
            for k in 0..3 {
                force[i][k] += 2.0 * d[k] / (r2 * r2);
            }
        }
    }
    (energy, force)
}

fn to_float3(points: &[[f64; 3]]) -> Vec<Float3> {
    points
        .iter()
        .map(|p| Float3::new(p[0] as f32, p[1] as f32, p[2] as f32))
        .collect()
}

fn assert_close(actual: f32, expected: f64, scale: f64, what: &str) {
    let err = (actual as f64 - expected).abs();
    assert!(
        err <= 1e-5 * scale.max(expected.abs()),
        "{what}: got {actual}, expected {expected} (err {err:.3e})"
    );
}

fn assert_matches(out: &HostArrays, points: &[[f64; 3]]) {
    let (energy, force) = expected(points);
    for i in 0..points.len() {
        assert_close(out.energy[i], energy[i], energy[i], &format!("energy[{i}]"));
        let f = out.force[i].to_array();
        let norm = force[i].iter().map(|c| c * c).sum::<f64>().sqrt();
        for k in 0..3 {
            assert_close(f[k], force[i][k], norm, &format!("force[{i}][{k}]"));
        }
    }
}

const TETRAHEDRON: [[f64; 3]; 4] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [0.0, 2.0, 0.0],
    [0.0, 0.0, 3.0],
];

#[test]
fn four_particle_inverse_square_matches_reference() {
    let mut session = AccelSession::open(HostDriver::default(), &config(4)).unwrap();
    let nearest = to_float3(&TETRAHEDRON);
    let mut out = HostArrays::zeroed(4);

    session
        .dispatch(&nearest, &mut out.energy, &mut out.force)
        .unwrap();

    assert_matches(&out, &TETRAHEDRON);
    // Energy of particle 0: (1/1 + 1/4 + 1/9) / 2
    assert_close(out.energy[0], (1.0 + 0.25 + 1.0 / 9.0) / 2.0, 1.0, "energy[0]");
    // Newton's third law: net force vanishes.
    let net = out.force.iter().fold(Float3::ZERO, |acc, &f| acc + f);
    assert!(net.length_squared() < 1e-10, "net force {net:?} should vanish");
}

#[test]
fn launch_covers_exactly_one_work_group() {
    let driver = HostDriver::default();
    let mut session = AccelSession::open(driver.clone(), &config(16)).unwrap();
    let nearest: Vec<Float3> = (0..16).map(|i| Float3::new(i as f32, 0.0, 0.0)).collect();
    let mut out = HostArrays::zeroed(16);
    session
        .dispatch(&nearest, &mut out.energy, &mut out.force)
        .unwrap();

    let launches = driver.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].kernel, "md");
    assert_eq!(launches[0].global, 16);
    assert_eq!(launches[0].local, 16);
}

#[test]
fn repeated_dispatch_is_bit_identical() {
    let points: Vec<[f64; 3]> = (0..32)
        .map(|i| {
            let t = i as f64 * 0.37;
            [t.cos() * 2.0, t.sin() * 2.0, i as f64 * 0.1]
        })
        .collect();
    let nearest = to_float3(&points);
    let mut session = AccelSession::open(HostDriver::default(), &config(32)).unwrap();

    let mut first = HostArrays::zeroed(32);
    session
        .dispatch(&nearest, &mut first.energy, &mut first.force)
        .unwrap();
    for _ in 0..3 {
        let mut again = HostArrays::zeroed(32);
        session
            .dispatch(&nearest, &mut again.energy, &mut again.force)
            .unwrap();
        for i in 0..32 {
            assert_eq!(again.energy[i].to_bits(), first.energy[i].to_bits());
            assert_eq!(again.force[i], first.force[i]);
        }
    }
}

#[test]
fn sequential_dispatches_never_see_stale_results() {
    let mut session = AccelSession::open(HostDriver::default(), &config(4)).unwrap();
    let mut out = HostArrays::zeroed(4);

    session
        .dispatch(&to_float3(&TETRAHEDRON), &mut out.energy, &mut out.force)
        .unwrap();
    assert_matches(&out, &TETRAHEDRON);

    let stretched: Vec<[f64; 3]> = TETRAHEDRON
        .iter()
        .map(|p| [p[0] * 2.0, p[1] * 2.0, p[2] * 2.0])
        .collect();
    out.energy.fill(f32::NAN);
    out.force.fill(Float3::new(f32::NAN, f32::NAN, f32::NAN));
    session
        .dispatch(&to_float3(&stretched), &mut out.energy, &mut out.force)
        .unwrap();
    assert_matches(&out, &stretched);
}

#[test]
fn profile_accumulates_kernel_time_only() {
    let costs = HostCosts::default();
    let driver = HostDriver::with_costs(vec![HostPlatform::nvidia_gpu()], costs);
    let n = 8;
    let mut session = AccelSession::open(driver, &config(n)).unwrap();
    let nearest: Vec<Float3> = (0..n).map(|i| Float3::new(0.0, i as f32, 0.0)).collect();
    let mut out = HostArrays::zeroed(n);

    let per_kernel = costs.launch_ns + costs.kernel_ns_per_item * n as u64;
    let mut sum = 0;
    for _ in 0..5 {
        let timing = session
            .dispatch(&nearest, &mut out.energy, &mut out.force)
            .unwrap();
        assert_eq!(timing.kernel_ns, per_kernel);
        assert_eq!(timing.upload_ns, Some(costs.transfer_ns_per_byte * 16 * n as u64));
        assert_eq!(timing.readback_ns, Some(costs.transfer_ns_per_byte * 20 * n as u64));
        sum += timing.kernel_ns;
    }

    let profile = session.profile();
    assert_eq!(profile.dispatches(), 5);
    assert_eq!(profile.total_ns(), sum);
    assert_eq!(profile.total_ns(), 5 * per_kernel);
    assert_eq!(profile.last_ns(), per_kernel);
}

#[test]
fn wrong_length_slices_are_rejected_before_device_work() {
    let driver = HostDriver::default();
    let mut session = AccelSession::open(driver.clone(), &config(4)).unwrap();
    let mut out = HostArrays::zeroed(4);

    let short = vec![Float3::ZERO; 3];
    let err = session
        .dispatch(&short, &mut out.energy, &mut out.force)
        .unwrap_err();
    match err {
        AccelError::LengthMismatch {
            array,
            expected,
            actual,
        } => {
            assert_eq!(array, "nearest");
            assert_eq!(expected, 4);
            assert_eq!(actual, 3);
        }
        other => panic!("unexpected error: {other}"),
    }

    let nearest = vec![Float3::ZERO; 4];
    let mut energy = vec![0.0; 5];
    let err = session
        .dispatch(&nearest, &mut energy, &mut out.force)
        .unwrap_err();
    assert!(matches!(err, AccelError::LengthMismatch { array: "energy", .. }));

    assert_eq!(driver.call_count(HostCall::EnqueueWrite), 0);
    assert_eq!(session.profile().dispatches(), 0);
}

#[test]
fn failed_kernel_fails_the_dispatch() {
    let driver = HostDriver::default();
    driver.fail_on(HostCall::KernelExecution, 1, codes::OUT_OF_RESOURCES);
    let mut session = AccelSession::open(driver.clone(), &config(4)).unwrap();
    let nearest = to_float3(&TETRAHEDRON);
    let mut out = HostArrays::zeroed(4);

    session
        .dispatch(&nearest, &mut out.energy, &mut out.force)
        .unwrap();

    out.energy.fill(-1.0);
    let err = session
        .dispatch(&nearest, &mut out.energy, &mut out.force)
        .unwrap_err();
    assert_eq!(err.operation(), Some(Operation::WaitForResults));
    assert_eq!(
        err.code(),
        Some(codes::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST)
    );
    assert_eq!(driver.call_count(HostCall::Finish), 1, "failed wait drains the queue");
    // Read-backs were skipped, so the host arrays were not touched.
    assert!(out.energy.iter().all(|&e| e == -1.0));
    assert_eq!(session.profile().dispatches(), 1);

    // The session stays usable.
    session
        .dispatch(&nearest, &mut out.energy, &mut out.force)
        .unwrap();
    assert_matches(&out, &TETRAHEDRON);
    assert_eq!(session.profile().dispatches(), 2);
}

#[test]
fn failed_read_back_names_the_array() {
    let driver = HostDriver::default();
    driver.fail_on(HostCall::EnqueueRead, 1, codes::OUT_OF_RESOURCES);
    let mut session = AccelSession::open(driver.clone(), &config(4)).unwrap();
    let mut out = HostArrays::zeroed(4);

    let err = session
        .dispatch(&to_float3(&TETRAHEDRON), &mut out.energy, &mut out.force)
        .unwrap_err();
    assert_eq!(err.operation(), Some(Operation::ReadForce));
    assert_eq!(
        err.to_string(),
        "Error during operation 'Failed to read output_force': -5"
    );
    // The energy read-back was already queued against the host slice.
    assert_eq!(driver.call_count(HostCall::Finish), 1);
}

#[test]
fn successful_dispatch_never_drains() {
    let driver = HostDriver::default();
    let mut session = AccelSession::open(driver.clone(), &config(4)).unwrap();
    let mut out = HostArrays::zeroed(4);
    for _ in 0..3 {
        session
            .dispatch(&to_float3(&TETRAHEDRON), &mut out.energy, &mut out.force)
            .unwrap();
    }
    assert_eq!(driver.call_count(HostCall::Finish), 0);
}

#[test]
fn failed_drain_still_reports_the_dispatch_error() {
    let driver = HostDriver::default();
    driver.fail_on(HostCall::EnqueueKernel, 0, codes::OUT_OF_RESOURCES);
    driver.fail_on(HostCall::Finish, 0, codes::OUT_OF_HOST_MEMORY);
    let mut session = AccelSession::open(driver.clone(), &config(4)).unwrap();
    let mut out = HostArrays::zeroed(4);

    let err = session
        .dispatch(&to_float3(&TETRAHEDRON), &mut out.energy, &mut out.force)
        .unwrap_err();
    assert_eq!(err.operation(), Some(Operation::LaunchKernel));
    assert_eq!(err.code(), Some(codes::OUT_OF_RESOURCES));
    assert_eq!(driver.call_count(HostCall::Finish), 1);
}

#[test]
fn dispatch_events_are_released() {
    let driver = HostDriver::default();
    let ledger = driver.ledger();
    let mut session = AccelSession::open(driver, &config(4)).unwrap();
    let mut out = HostArrays::zeroed(4);
    for _ in 0..3 {
        session
            .dispatch(&to_float3(&TETRAHEDRON), &mut out.energy, &mut out.force)
            .unwrap();
        assert_eq!(ledger.live(ObjectKind::Event), 0);
    }
    assert_eq!(ledger.created_count(ObjectKind::Event), 12);
}

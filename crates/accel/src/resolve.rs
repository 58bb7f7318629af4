//! Platform and device discovery.
//!
//! First match wins at both levels: the first platform the selector accepts,
//! then the first device of the requested class on it. No scoring, no load
//! balancing.

use serde::{Deserialize, Serialize};

use crate::driver::{DeviceClass, DeviceInfo, Driver, PlatformInfo};
use crate::error::AccelError;

/// Vendor string of NVIDIA's OpenCL platform.
pub const NVIDIA_VENDOR: &str = "NVIDIA Corporation";
/// Vendor string of Intel's OpenCL platform.
pub const INTEL_VENDOR: &str = "Intel(R) Corporation";
/// Platform-name fragment of Altera FPGA SDK platforms.
pub const ALTERA_FAMILY: &str = "Altera";

/// How a platform is recognised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformSelector {
    /// Vendor string must match exactly.
    Vendor(String),
    /// Platform name must contain this board family, ignoring case.
    BoardFamily(String),
}

impl PlatformSelector {
    /// Whether `info` satisfies the selector.
    pub fn matches(&self, info: &PlatformInfo) -> bool {
        match self {
            PlatformSelector::Vendor(vendor) => info.vendor == *vendor,
            PlatformSelector::BoardFamily(family) => info
                .name
                .to_lowercase()
                .contains(&family.to_lowercase()),
        }
    }
}

impl Default for PlatformSelector {
    fn default() -> Self {
        PlatformSelector::Vendor(NVIDIA_VENDOR.to_string())
    }
}

impl std::fmt::Display for PlatformSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformSelector::Vendor(v) => write!(f, "vendor {v:?}"),
            PlatformSelector::BoardFamily(b) => write!(f, "board family {b:?}"),
        }
    }
}

/// Platform and device chosen for a session.
pub struct Resolved<D: Driver> {
    /// Platform handle.
    pub platform: D::Platform,
    /// Device handle.
    pub device: D::Device,
    /// Strings of the chosen platform.
    pub platform_info: PlatformInfo,
    /// Description of the chosen device.
    pub device_info: DeviceInfo,
}

/// Pick the first matching platform and its first device of `class`.
///
/// Creates no device objects; on failure nothing needs releasing.
pub fn resolve<D: Driver>(
    driver: &D,
    selector: &PlatformSelector,
    class: DeviceClass,
) -> Result<Resolved<D>, AccelError> {
    // A runtime with no platforms installed reports an error rather than an
    // empty list; both mean nothing matched.
    let platforms = driver.platforms().unwrap_or_else(|e| {
        tracing::warn!("platform enumeration failed: {e}");
        Vec::new()
    });

    let mut seen = Vec::with_capacity(platforms.len());
    let mut chosen = None;
    for platform in platforms {
        let info = match driver.platform_info(&platform) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("skipping platform whose info query failed: {e}");
                continue;
            }
        };
        tracing::debug!(vendor = %info.vendor, name = %info.name, "found platform");
        if selector.matches(&info) {
            chosen = Some((platform, info));
            break;
        }
        seen.push(info.vendor);
    }

    let (platform, platform_info) = chosen.ok_or_else(|| AccelError::PlatformNotFound {
        wanted: selector.to_string(),
        seen,
    })?;

    let device = driver
        .devices(&platform, class)?
        .into_iter()
        .next()
        .ok_or_else(|| AccelError::DeviceNotFound {
            platform: platform_info.name.clone(),
            class: class.to_string(),
        })?;
    let device_info = driver.device_info(&device)?;

    tracing::info!(
        "Platform: {} ({}); device: {}",
        platform_info.name,
        platform_info.vendor,
        device_info.name
    );

    Ok(Resolved {
        platform,
        device,
        platform_info,
        device_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::host::{HostCall, HostDriver, HostPlatform};
    use crate::error::codes;

    #[test]
    fn vendor_match_is_exact() {
        let info = PlatformInfo {
            vendor: "NVIDIA Corporation".into(),
            name: "NVIDIA CUDA".into(),
        };
        assert!(PlatformSelector::Vendor("NVIDIA Corporation".into()).matches(&info));
        assert!(!PlatformSelector::Vendor("NVIDIA".into()).matches(&info));
        assert!(!PlatformSelector::Vendor("nvidia corporation".into()).matches(&info));
    }

    #[test]
    fn board_family_matches_name_fragment() {
        let info = PlatformInfo {
            vendor: "Altera Corporation".into(),
            name: "Altera SDK for OpenCL".into(),
        };
        assert!(PlatformSelector::BoardFamily("altera".into()).matches(&info));
        assert!(!PlatformSelector::BoardFamily("Xilinx".into()).matches(&info));
    }

    #[test]
    fn picks_first_matching_platform_and_device() {
        let driver = HostDriver::default();
        let resolved = resolve(
            &driver,
            &PlatformSelector::Vendor(INTEL_VENDOR.into()),
            DeviceClass::Gpu,
        )
        .unwrap();
        assert_eq!(resolved.platform_info.vendor, INTEL_VENDOR);
        assert_eq!(resolved.device_info.name, "Emulated Iris");

        let resolved = resolve(
            &driver,
            &PlatformSelector::BoardFamily(ALTERA_FAMILY.into()),
            DeviceClass::All,
        )
        .unwrap();
        assert_eq!(resolved.device_info.class, DeviceClass::Accelerator);
    }

    #[test]
    fn no_matching_platform_lists_what_was_seen() {
        let driver = HostDriver::new(vec![HostPlatform::intel_gpu()]);
        let err = resolve(
            &driver,
            &PlatformSelector::Vendor(NVIDIA_VENDOR.into()),
            DeviceClass::Gpu,
        )
        .err()
        .unwrap();
        match err {
            AccelError::PlatformNotFound { seen, .. } => {
                assert_eq!(seen, vec![INTEL_VENDOR.to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(driver.ledger().created_total(), 0);
    }

    #[test]
    fn platform_without_requested_class_fails() {
        let driver = HostDriver::new(vec![HostPlatform::altera_fpga()]);
        let err = resolve(
            &driver,
            &PlatformSelector::BoardFamily(ALTERA_FAMILY.into()),
            DeviceClass::Gpu,
        )
        .err()
        .unwrap();
        assert!(matches!(err, AccelError::DeviceNotFound { .. }));
    }

    #[test]
    fn enumeration_failure_reads_as_no_platform() {
        let driver = HostDriver::default();
        driver.fail_on(HostCall::Platforms, 0, codes::OUT_OF_HOST_MEMORY);
        let err = resolve(&driver, &PlatformSelector::default(), DeviceClass::Gpu)
            .err()
            .unwrap();
        assert!(matches!(err, AccelError::PlatformNotFound { .. }));
    }

    #[test]
    fn unreadable_platform_is_skipped() {
        let driver = HostDriver::default();
        driver.fail_on(HostCall::PlatformInfo, 0, codes::OUT_OF_HOST_MEMORY);
        let resolved = resolve(
            &driver,
            &PlatformSelector::Vendor(INTEL_VENDOR.into()),
            DeviceClass::Gpu,
        )
        .unwrap();
        assert_eq!(resolved.platform_info.vendor, INTEL_VENDOR);

        let driver = HostDriver::default();
        driver.fail_on(HostCall::PlatformInfo, 0, codes::OUT_OF_HOST_MEMORY);
        let err = resolve(
            &driver,
            &PlatformSelector::Vendor(NVIDIA_VENDOR.into()),
            DeviceClass::Gpu,
        )
        .err()
        .unwrap();
        match err {
            AccelError::PlatformNotFound { seen, .. } => {
                assert_eq!(seen.len(), 2);
                assert_eq!(seen[0], INTEL_VENDOR);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

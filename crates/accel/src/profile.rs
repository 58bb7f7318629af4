//! Device-side timing accumulated across dispatches.

/// Running total of device-reported kernel execution time.
///
/// Only ever grows; read it after the simulation loop finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelProfile {
    total_ns: u64,
    dispatches: u64,
    last_ns: u64,
}

impl KernelProfile {
    /// Add one dispatch's kernel time.
    pub fn record(&mut self, elapsed_ns: u64) {
        self.total_ns = self.total_ns.saturating_add(elapsed_ns);
        self.dispatches += 1;
        self.last_ns = elapsed_ns;
    }

    /// Sum of all recorded kernel times (nanoseconds).
    pub fn total_ns(&self) -> u64 {
        self.total_ns
    }

    /// Number of recorded dispatches.
    pub fn dispatches(&self) -> u64 {
        self.dispatches
    }

    /// Kernel time of the most recent dispatch (nanoseconds).
    pub fn last_ns(&self) -> u64 {
        self.last_ns
    }

    /// Total kernel time in milliseconds.
    pub fn total_ms(&self) -> f64 {
        self.total_ns as f64 / 1_000_000.0
    }

    /// Mean kernel time per dispatch in milliseconds; zero before the first.
    pub fn mean_ms(&self) -> f64 {
        if self.dispatches == 0 {
            0.0
        } else {
            self.total_ms() / self.dispatches as f64
        }
    }

    /// Mean kernel time per iteration of a loop that ran `iterations` times.
    ///
    /// Matches `mean_ms` when every iteration dispatched exactly once.
    pub fn per_iteration_ms(&self, iterations: u64) -> f64 {
        if iterations == 0 {
            0.0
        } else {
            self.total_ms() / iterations as f64
        }
    }
}

/// Device timings of a single dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchTiming {
    /// Kernel execution time (`end - start` of the launch event).
    pub kernel_ns: u64,
    /// Upload of the neighbor array, when the device reported it.
    pub upload_ns: Option<u64>,
    /// Both read-backs, when the device reported them.
    pub readback_ns: Option<u64>,
}

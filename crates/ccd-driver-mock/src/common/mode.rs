//! Operational modes for the simulated camera.
//!
//! - **Instant**: exposures complete as soon as they are polled, video frames
//!   arrive back to back. Deterministic, for unit tests.
//! - **Realistic**: wall-clock exposure and readout timing, for integration
//!   tests and the host binary.
//! - **Chaos**: realistic timing plus a background rate of transient failures.

/// Operational modes for the simulated camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Hardware-like timing - for integration tests
    Realistic,
    /// Hardware-like timing with random transient failures
    Chaos,
}

impl MockMode {
    /// Whether exposures take wall-clock time.
    pub fn is_timed(self) -> bool {
        !matches!(self, MockMode::Instant)
    }
}

//! Error injection framework for the simulated camera.
//!
//! Scenarios are keyed by [`DeviceIO`](ccd_core::DeviceIO) method name
//! (`"exposure_status"`, `"read_video_frame"`, `"pulse_guide_on"`, ...) and
//! produce [`CaptureError`]s of the kind a real SDK failure would map to.

use super::rng::MockRng;
use ccd_core::CaptureError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Error injection configuration for the simulated camera
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0), `"*"` matches everything
    failure_rates: Arc<HashMap<&'static str, f64>>,
    /// Specific failure scenarios
    scenarios: Arc<Vec<ErrorScenario>>,
    /// RNG for failure decisions
    rng: Arc<MockRng>,
    /// State tracking for scenarios
    state: Arc<Mutex<ErrorState>>,
}

/// Kind of error produced by an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    /// Bus or USB hiccup, retryable.
    Transient,
    /// Bounded wait ran out.
    Timeout,
    /// Device-reported failure, not retryable.
    Hardware,
}

impl InjectedFault {
    fn to_error(self, operation: &'static str) -> CaptureError {
        match self {
            InjectedFault::Transient => {
                CaptureError::transient(operation, format!("injected failure on '{}'", operation))
            }
            InjectedFault::Timeout => CaptureError::ProtocolTimeout {
                operation,
                waited_ms: 0,
            },
            InjectedFault::Hardware => {
                CaptureError::HardwareFailure(format!("injected fault on '{}'", operation))
            }
        }
    }
}

/// Failure pattern injected into device calls.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Fail after N successful operations
    FailAfterN {
        operation: &'static str,
        count: u32,
    },
    /// Fail the next `times` calls of an operation, then recover
    FailNext {
        operation: &'static str,
        times: u32,
        fault: InjectedFault,
    },
    /// Timeout on specific operation
    Timeout { operation: &'static str },
    /// Simulate communication loss
    CommunicationLoss,
    /// Hardware fault with specific code
    HardwareFault { code: u32 },
}

#[derive(Default, Debug)]
struct ErrorState {
    /// Operation counters for FailAfterN and FailNext scenarios
    operation_counts: HashMap<&'static str, u32>,
    /// Whether communication is lost
    communication_lost: bool,
    /// Hardware fault code (0 = no fault)
    hardware_fault_code: u32,
}

impl ErrorConfig {
    /// Create error config with no errors (default)
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Create error config with uniform random transient failures
    pub fn random_failures(rate: f64) -> Self {
        Self::random_failures_seeded(rate, None)
    }

    /// Create error config with uniform random failures and specific seed
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    /// Create error config with a single scenario
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Create error config with multiple scenarios
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Create error config with custom failure rates per operation
    pub fn with_rates(rates: HashMap<&'static str, f64>) -> Self {
        Self::build(rates, Vec::new(), None)
    }

    fn build(
        rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Check if an operation should fail and return the injected error
    pub fn check_operation(&self, operation: &'static str) -> Result<(), CaptureError> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(CaptureError::transient(operation, "communication lost"));
        }
        if state.hardware_fault_code != 0 {
            return Err(CaptureError::HardwareFailure(format!(
                "hardware fault: {}",
                state.hardware_fault_code
            )));
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation => {
                    let current = state.operation_counts.entry(operation).or_insert(0);
                    *current += 1;
                    if *current > *count {
                        return Err(CaptureError::transient(
                            operation,
                            format!("injected failure after {} operations", count),
                        ));
                    }
                }
                ErrorScenario::FailNext {
                    operation: op,
                    times,
                    fault,
                } if *op == operation => {
                    let current = state.operation_counts.entry(operation).or_insert(0);
                    if *current < *times {
                        *current += 1;
                        return Err(fault.to_error(operation));
                    }
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(InjectedFault::Timeout.to_error(operation));
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(CaptureError::transient(operation, "communication lost"));
                }
                ErrorScenario::HardwareFault { code } => {
                    state.hardware_fault_code = *code;
                    return Err(CaptureError::HardwareFailure(format!(
                        "hardware fault: {}",
                        code
                    )));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);

        if self.rng.should_fail(rate) {
            return Err(CaptureError::transient(
                operation,
                format!("random failure on '{}'", operation),
            ));
        }

        Ok(())
    }

    /// Reset error state (clear counters, faults)
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccd_core::ErrorKind;

    #[test]
    fn test_no_errors() {
        let config = ErrorConfig::none();
        for _ in 0..100 {
            assert!(config.check_operation("exposure_status").is_ok());
        }
    }

    #[test]
    fn test_random_failures() {
        let config = ErrorConfig::random_failures_seeded(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| config.check_operation("read_frame").is_err())
            .count();
        assert!(failures > 400 && failures < 600, "Got {} failures", failures);
    }

    #[test]
    fn test_fail_after_n() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "read_frame",
            count: 5,
        });

        for i in 0..5 {
            assert!(
                config.check_operation("read_frame").is_ok(),
                "Operation {} should succeed",
                i + 1
            );
        }
        for i in 5..10 {
            assert!(
                config.check_operation("read_frame").is_err(),
                "Operation {} should fail",
                i + 1
            );
        }
    }

    #[test]
    fn test_fail_next_recovers() {
        let config = ErrorConfig::scenario(ErrorScenario::FailNext {
            operation: "exposure_status",
            times: 2,
            fault: InjectedFault::Transient,
        });

        let first = config.check_operation("exposure_status").unwrap_err();
        assert!(first.is_transient());
        assert!(config.check_operation("exposure_status").is_err());
        assert!(config.check_operation("exposure_status").is_ok());
        assert!(config.check_operation("exposure_status").is_ok());
        assert!(config.check_operation("read_frame").is_ok(), "other operations unaffected");
    }

    #[test]
    fn test_timeout_scenario() {
        let config = ErrorConfig::scenario(ErrorScenario::Timeout {
            operation: "read_video_frame",
        });

        let err = config.check_operation("read_video_frame").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolTimeout);
        assert!(err.is_transient());
    }

    #[test]
    fn test_communication_loss_is_sticky() {
        let config = ErrorConfig::scenario(ErrorScenario::CommunicationLoss);

        let err = config.check_operation("exposure_status").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientIo);
        assert!(config.check_operation("get_control").is_err());
    }

    #[test]
    fn test_hardware_fault() {
        let config = ErrorConfig::scenario(ErrorScenario::HardwareFault { code: 0x42 });

        let err = config.check_operation("start_exposure").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HardwareFailure);
        assert!(err.to_string().contains("66"));
    }

    #[test]
    fn test_reset() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "read_frame",
            count: 2,
        });

        assert!(config.check_operation("read_frame").is_ok());
        assert!(config.check_operation("read_frame").is_ok());
        assert!(config.check_operation("read_frame").is_err());

        config.reset();

        assert!(config.check_operation("read_frame").is_ok());
        assert!(config.check_operation("read_frame").is_ok());
        assert!(config.check_operation("read_frame").is_err());
    }

    #[test]
    fn test_custom_rates() {
        let mut rates = HashMap::new();
        rates.insert("pulse_guide_on", 1.0);
        rates.insert("pulse_guide_off", 0.0);

        let config = ErrorConfig::with_rates(rates);
        for _ in 0..10 {
            assert!(config.check_operation("pulse_guide_on").is_err());
            assert!(config.check_operation("pulse_guide_off").is_ok());
        }
    }
}

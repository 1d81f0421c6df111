//! Sensor cooling loop.
//!
//! The regulator reads the sensor temperature every `poll_divisor` ticks, or
//! every tick while in alert, and tracks convergence toward the requested set point. `Converging` becomes
//! `Converged` once per set point; only a new [`set_setpoint`] call can
//! start converging again.
//!
//! [`set_setpoint`]: TemperatureRegulator::set_setpoint

use ccd_core::{
    CaptureConfig, CaptureError, ControlId, Result, SharedDevice, TemperatureReport,
    TemperatureStatus,
};
use tracing::{debug, info, warn};

/// Regulator tuning.
#[derive(Debug, Clone, Copy)]
pub struct TemperatureSettings {
    /// Distance from the set point that counts as converged, in °C.
    pub threshold_c: f64,
    /// Read the sensor every this many ticks.
    pub poll_divisor: u32,
    /// Without a cooler, set point requests are refused.
    pub has_cooler: bool,
}

impl TemperatureSettings {
    /// Settings taken from the capture configuration.
    pub fn from_config(config: &CaptureConfig, has_cooler: bool) -> Self {
        Self {
            threshold_c: config.temp_threshold_c,
            poll_divisor: config.temp_poll_divisor.max(1),
            has_cooler,
        }
    }
}

/// Last readings and the regulation status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureControlState {
    /// Requested temperature in °C.
    pub setpoint_c: f64,
    /// Last successful sensor reading.
    pub current_c: f64,
    /// Cooler duty in percent, 0 without a cooler.
    pub cooler_power_pct: f64,
    /// Current regulation status.
    pub status: TemperatureStatus,
}

/// Result of a set point request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetpointOutcome {
    /// Already within threshold; the device was not touched.
    AlreadySatisfied,
    /// Cooler engaged; convergence is tracked from ticks.
    Converging,
}

/// Cooling control for one camera, advanced from the tick loop.
pub struct TemperatureRegulator {
    device: SharedDevice,
    settings: TemperatureSettings,
    state: TemperatureControlState,
    /// Status to return to once an alert clears.
    resume_status: TemperatureStatus,
    ticks: u64,
    last_report: Option<TemperatureReport>,
}

impl TemperatureRegulator {
    /// Regulator in `Idle` with no reading yet. Call
    /// [`initialize`](Self::initialize) before the first tick.
    pub fn new(device: SharedDevice, settings: TemperatureSettings) -> Self {
        Self {
            device,
            settings,
            state: TemperatureControlState {
                setpoint_c: 0.0,
                current_c: 0.0,
                cooler_power_pct: 0.0,
                status: TemperatureStatus::Idle,
            },
            resume_status: TemperatureStatus::Idle,
            ticks: 0,
            last_report: None,
        }
    }

    /// Take the first reading. The set point starts at the current temperature.
    pub fn initialize(&mut self) {
        if self.refresh() {
            self.state.setpoint_c = self.state.current_c;
        }
        debug!(current_c = self.state.current_c, "Temperature regulator ready");
    }

    /// Latest readings and status.
    pub fn state(&self) -> &TemperatureControlState {
        &self.state
    }

    /// Current regulation status.
    pub fn status(&self) -> TemperatureStatus {
        self.state.status
    }

    /// Snapshot suitable for publishing.
    pub fn report(&self) -> TemperatureReport {
        TemperatureReport {
            current_c: self.state.current_c,
            setpoint_c: self.state.setpoint_c,
            cooler_power_pct: self.state.cooler_power_pct,
            cooler_active: self.state.cooler_power_pct > 0.0,
            status: self.state.status,
        }
    }

    /// Start cooling toward `setpoint_c`. Within threshold of the current
    /// reading this is a no-op. A failed device write raises an alert and
    /// keeps the new set point.
    pub fn set_setpoint(&mut self, setpoint_c: f64) -> Result<SetpointOutcome> {
        if !self.settings.has_cooler {
            return Err(CaptureError::Unsupported("camera has no cooler".into()));
        }
        if !setpoint_c.is_finite() {
            return Err(CaptureError::configuration(format!(
                "invalid temperature set point {}",
                setpoint_c
            )));
        }
        if (setpoint_c - self.state.current_c).abs() < self.settings.threshold_c {
            debug!(setpoint_c, current_c = self.state.current_c, "Set point already satisfied");
            return Ok(SetpointOutcome::AlreadySatisfied);
        }

        self.state.setpoint_c = setpoint_c;
        self.state.status = TemperatureStatus::Converging;

        let written = self
            .device
            .set_control(ControlId::CoolerOn, 1.0, false)
            .and_then(|()| {
                self.device
                    .set_control(ControlId::TargetTemperature, setpoint_c, false)
            });
        if let Err(e) = written {
            warn!(setpoint_c, error = %e, "Failed to write temperature set point");
            self.enter_alert();
            return Err(e);
        }

        info!(setpoint_c, current_c = self.state.current_c, "Cooling toward set point");
        Ok(SetpointOutcome::Converging)
    }

    /// Switch the cooler on or off without changing the set point.
    pub fn set_cooler(&mut self, on: bool) -> Result<()> {
        if !self.settings.has_cooler {
            return Err(CaptureError::Unsupported("camera has no cooler".into()));
        }
        self.device
            .set_control(ControlId::CoolerOn, if on { 1.0 } else { 0.0 }, false)?;
        if !on && self.state.status != TemperatureStatus::Alert {
            self.state.status = TemperatureStatus::Idle;
        }
        info!(on, "Cooler switched");
        Ok(())
    }

    /// Advance one tick. Returns a report when there is something new to tell.
    pub fn on_tick(&mut self) -> Option<TemperatureReport> {
        // A failed read is retried on the very next tick.
        let due = self.state.status == TemperatureStatus::Alert
            || self.ticks % u64::from(self.settings.poll_divisor) == 0;
        self.ticks += 1;
        if !due {
            return None;
        }

        if self.refresh()
            && self.state.status == TemperatureStatus::Converging
            && (self.state.current_c - self.state.setpoint_c).abs() <= self.settings.threshold_c
        {
            self.state.status = TemperatureStatus::Converged;
            info!(
                current_c = self.state.current_c,
                setpoint_c = self.state.setpoint_c,
                "Temperature converged"
            );
        }
        self.changed_report()
    }

    /// Read temperature and cooler power. Returns false on a read failure.
    fn refresh(&mut self) -> bool {
        let reading = self.device.get_control(ControlId::Temperature).and_then(|t| {
            let power = if self.settings.has_cooler {
                self.device.get_control(ControlId::CoolerPower)?.value
            } else {
                0.0
            };
            Ok((t.value, power))
        });

        match reading {
            Ok((current_c, power)) => {
                self.state.current_c = current_c;
                self.state.cooler_power_pct = power;
                if self.state.status == TemperatureStatus::Alert {
                    info!("Temperature readings recovered");
                    self.state.status = self.resume_status;
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "Temperature read failed");
                self.enter_alert();
                false
            }
        }
    }

    fn enter_alert(&mut self) {
        if self.state.status != TemperatureStatus::Alert {
            self.resume_status = self.state.status;
            self.state.status = TemperatureStatus::Alert;
        }
    }

    fn changed_report(&mut self) -> Option<TemperatureReport> {
        let report = self.report();
        let publish = match &self.last_report {
            None => true,
            Some(last) => {
                last.status != report.status
                    || report.status == TemperatureStatus::Converging
                    || (last.current_c - report.current_c).abs() > self.settings.threshold_c / 10.0
                    || (last.cooler_power_pct - report.cooler_power_pct).abs() >= 1.0
            }
        };
        if publish {
            self.last_report = Some(report);
            Some(report)
        } else {
            None
        }
    }
}

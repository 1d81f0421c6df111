//! ST4 guide pulses, one live pulse per axis.
//!
//! Pulses no longer than a tick are timed inline with a bounded sleep.
//! Longer pulses arm a one-shot timer `guard` before the pulse end; when the
//! tick loop sees it fire, the remaining time is slept off and the pulse is
//! switched off. Issuing a pulse on an axis pre-empts the pulse already
//! running there and reports it finished; the other axis is never touched.

use super::timers::{TimerHandle, TimerQueue};
use ccd_core::{CaptureConfig, CaptureError, GuideAxis, GuideDirection, Result, SharedDevice};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of [`GuidePulseScheduler::pulse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseState {
    /// Pulse already finished and switched off.
    Complete,
    /// Pulse running; completion is reported from a later tick.
    Busy,
}

/// Pulse completion reported from [`GuidePulseScheduler::on_tick`] or
/// [`GuidePulseScheduler::take_preempted`].
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum GuideEvent {
    Complete(GuideAxis),
    Failed { axis: GuideAxis, reason: String },
}

/// Timing and retry knobs for the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct GuideSettings {
    /// Pulses up to this long are timed inline.
    pub tick_period: Duration,
    /// How early the timer fires before the pulse end.
    pub guard: Duration,
    /// Attempts per pulse on/off call when the device reports a transient error.
    pub max_retries: u8,
}

impl GuideSettings {
    /// Derive settings from the capture configuration.
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            tick_period: config.tick_period(),
            guard: config.guide_guard(),
            max_retries: config.max_exposure_retries,
        }
    }
}

#[derive(Debug)]
struct GuidePulse {
    direction: GuideDirection,
    duration_ms: u32,
    started_at: Instant,
    timer: Option<TimerHandle>,
}

impl GuidePulse {
    fn ends_at(&self) -> Instant {
        self.started_at + Duration::from_millis(u64::from(self.duration_ms))
    }
}

/// Retry `call` on transient errors, up to `max_attempts` attempts in total.
pub(crate) fn retry_transient<T>(
    operation: &'static str,
    max_attempts: u8,
    mut call: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 1u8;
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!(operation, attempt, error = %e, "Transient device error, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Per-axis guide pulse timing for one camera.
pub struct GuidePulseScheduler {
    device: SharedDevice,
    settings: GuideSettings,
    timers: TimerQueue<GuideAxis>,
    pulses: [Option<GuidePulse>; 2],
    preempted: Vec<GuideEvent>,
}

impl GuidePulseScheduler {
    /// Scheduler with no pulse running.
    pub fn new(device: SharedDevice, settings: GuideSettings) -> Self {
        Self {
            device,
            settings,
            timers: TimerQueue::new(),
            pulses: [None, None],
            preempted: Vec::new(),
        }
    }

    /// Start a pulse of `ms` milliseconds on `axis`.
    pub fn pulse(&mut self, axis: GuideAxis, direction: GuideDirection, ms: u32) -> Result<PulseState> {
        if direction.axis() != axis {
            return Err(CaptureError::configuration(format!(
                "direction {:?} does not belong to axis {}",
                direction, axis
            )));
        }

        if let Some(event) = self.stop(axis) {
            self.preempted.push(event);
        }

        retry_transient("pulse_guide_on", self.settings.max_retries, || {
            self.device.pulse_guide_on(direction)
        })?;
        let started_at = Instant::now();
        let duration = Duration::from_millis(u64::from(ms));

        if duration <= self.settings.tick_period {
            thread::sleep(duration);
            self.switch_off(direction)?;
            debug!(%axis, ?direction, ms, "Short guide pulse complete");
            return Ok(PulseState::Complete);
        }

        let fire_at = started_at + duration.saturating_sub(self.settings.guard);
        let timer = self.timers.schedule_at(fire_at, axis);
        self.pulses[axis.index()] = Some(GuidePulse {
            direction,
            duration_ms: ms,
            started_at,
            timer: Some(timer),
        });
        debug!(%axis, ?direction, ms, "Guide pulse scheduled");
        Ok(PulseState::Busy)
    }

    /// Finish every pulse whose timer has fired.
    pub fn on_tick(&mut self, now: Instant) -> Vec<GuideEvent> {
        let mut events = Vec::new();
        for axis in self.timers.poll(now) {
            let Some(pulse) = self.pulses[axis.index()].take() else {
                continue;
            };

            let remaining = pulse.ends_at().saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                thread::sleep(remaining.min(self.settings.guard));
            }

            match self.switch_off(pulse.direction) {
                Ok(()) => {
                    debug!(%axis, ms = pulse.duration_ms, "Guide pulse complete");
                    events.push(GuideEvent::Complete(axis));
                }
                Err(e) => {
                    warn!(%axis, error = %e, "Failed to end guide pulse");
                    events.push(GuideEvent::Failed {
                        axis,
                        reason: e.to_string(),
                    });
                }
            }
        }
        events
    }

    /// Outcomes of pulses cut short by a newer pulse on the same axis.
    pub fn take_preempted(&mut self) -> Vec<GuideEvent> {
        std::mem::take(&mut self.preempted)
    }

    /// Switch off every running pulse without reporting it.
    pub fn cancel_all(&mut self) {
        for axis in GuideAxis::ALL {
            self.stop(axis);
        }
        self.preempted.clear();
    }

    /// Whether a timed pulse is running on `axis`.
    pub fn is_busy(&self, axis: GuideAxis) -> bool {
        self.pulses[axis.index()].is_some()
    }

    /// Armed timers on `axis`. Never more than one.
    pub fn pending_timers(&self, axis: GuideAxis) -> usize {
        self.timers.pending_where(|a| *a == axis)
    }

    /// Stop the pulse on `axis`, if any, and say how it ended.
    fn stop(&mut self, axis: GuideAxis) -> Option<GuideEvent> {
        let pulse = self.pulses[axis.index()].take()?;
        drop(pulse.timer);
        let event = match self.switch_off(pulse.direction) {
            Ok(()) => GuideEvent::Complete(axis),
            Err(e) => {
                warn!(%axis, error = %e, "Failed to switch off pre-empted guide pulse");
                GuideEvent::Failed {
                    axis,
                    reason: e.to_string(),
                }
            }
        };
        info!(%axis, direction = ?pulse.direction, "Guide pulse cancelled");
        Some(event)
    }

    fn switch_off(&self, direction: GuideDirection) -> Result<()> {
        retry_transient("pulse_guide_off", self.settings.max_retries, || {
            self.device.pulse_guide_off(direction)
        })
    }
}

impl Drop for GuidePulseScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

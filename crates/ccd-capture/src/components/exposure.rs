//! Single-exposure state machine.
//!
//! Driven from the tick loop. While more than `epsilon` of the exposure is
//! left, a tick only reports progress. Close to the end the controller
//! spin-polls the camera for completion in short sleeps, downloads the
//! frame, and restarts the exposure on transient failures up to the retry
//! limit.

use ccd_core::frame::try_alloc;
use ccd_core::{
    CaptureConfig, CaptureError, ChannelOrder, ExposureStatus, FrameBuffer, FrameKind,
    FrameLayout, Result, SharedDevice,
};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// An accepted exposure. Immutable once accepted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureRequest {
    /// Requested duration, clamped to the camera range on start.
    pub duration_s: f64,
    /// Frame type recorded with the image.
    pub frame_kind: FrameKind,
    /// Dark and bias frames keep the shutter closed.
    pub is_dark_shutter_closed: bool,
}

impl ExposureRequest {
    /// Build a request; the shutter flag follows the frame kind.
    pub fn new(duration_s: f64, frame_kind: FrameKind) -> Self {
        Self {
            duration_s,
            frame_kind,
            is_dark_shutter_closed: frame_kind.shutter_closed(),
        }
    }
}

/// Where the single exposure currently is.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum ExposureState {
    Idle,
    Exposing {
        started_at: Instant,
        request: ExposureRequest,
    },
    PollingCompletion {
        started_at: Instant,
        request: ExposureRequest,
        retries: u8,
    },
    Downloading,
    Complete,
    Failed {
        reason: String,
    },
    Aborted,
}

impl ExposureState {
    /// An exposure is running or being read out.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ExposureState::Exposing { .. }
                | ExposureState::PollingCompletion { .. }
                | ExposureState::Downloading
        )
    }
}

/// Outcome of one tick.
#[derive(Debug)]
#[allow(missing_docs)]
pub enum ExposureEvent {
    Progress { time_left_s: f64 },
    Completed(FrameBuffer),
    Failed { reason: String },
}

/// Timing and retry knobs, taken from [`CaptureConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ExposureSettings {
    /// Remaining time below which completion polling starts.
    pub epsilon_s: f64,
    /// Sleep between status polls.
    pub poll_quantum: Duration,
    /// Polls per spin before it counts as a timeout.
    pub poll_max_iterations: u32,
    /// Attempts per exposure, the first one included.
    pub max_retries: u8,
}

impl ExposureSettings {
    /// Copy the relevant fields out of `config`.
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            epsilon_s: config.exposure_epsilon_s,
            poll_quantum: config.spin_poll_quantum(),
            poll_max_iterations: config.spin_poll_max_iterations,
            max_retries: config.max_exposure_retries,
        }
    }
}

/// Exposure bounds in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureLimits {
    /// Shortest exposure the camera accepts.
    pub min_s: f64,
    /// Longest exposure the camera accepts.
    pub max_s: f64,
}

/// Drives one exposure at a time through start, completion polling and
/// download.
pub struct ExposureController {
    device: SharedDevice,
    settings: ExposureSettings,
    limits: ExposureLimits,
    state: ExposureState,
}

impl ExposureController {
    /// Create an idle controller for `device`.
    pub fn new(device: SharedDevice, settings: ExposureSettings, limits: ExposureLimits) -> Self {
        Self {
            device,
            settings,
            limits,
            state: ExposureState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> &ExposureState {
        &self.state
    }

    /// An exposure is running or downloading.
    pub fn is_busy(&self) -> bool {
        self.state.is_active()
    }

    /// Accepted duration range.
    pub fn limits(&self) -> ExposureLimits {
        self.limits
    }

    /// Restarts spent on the exposure in flight.
    pub fn retries(&self) -> u8 {
        match self.state {
            ExposureState::PollingCompletion { retries, .. } => retries,
            _ => 0,
        }
    }

    /// Seconds left on the running exposure.
    pub fn time_left(&self, now: Instant) -> Option<f64> {
        match &self.state {
            ExposureState::Exposing {
                started_at,
                request,
            }
            | ExposureState::PollingCompletion {
                started_at,
                request,
                ..
            } => Some(request.duration_s - now.saturating_duration_since(*started_at).as_secs_f64()),
            _ => None,
        }
    }

    /// Validate, clamp and start `request` on the device.
    pub fn start(&mut self, request: ExposureRequest) -> Result<()> {
        if self.is_busy() {
            return Err(CaptureError::Busy("exposure already in progress".into()));
        }
        if !request.duration_s.is_finite() || request.duration_s < 0.0 {
            return Err(CaptureError::configuration(format!(
                "invalid exposure duration {}",
                request.duration_s
            )));
        }
        if request.duration_s > self.limits.max_s {
            return Err(CaptureError::configuration(format!(
                "exposure {}s exceeds maximum {}s",
                request.duration_s, self.limits.max_s
            )));
        }

        let mut request = request;
        if request.frame_kind == FrameKind::Bias {
            request.duration_s = self.limits.min_s;
        } else if request.duration_s < self.limits.min_s {
            warn!(
                requested_s = request.duration_s,
                min_s = self.limits.min_s,
                "Exposure shorter than camera minimum, clamping"
            );
            request.duration_s = self.limits.min_s;
        }

        let started_at = self.begin(&request)?;
        self.state = ExposureState::Exposing {
            started_at,
            request,
        };
        info!(
            duration_s = request.duration_s,
            kind = ?request.frame_kind,
            "Exposure started"
        );
        Ok(())
    }

    /// Abort whatever is in flight. The device is always told to abort.
    pub fn abort(&mut self) -> Result<()> {
        let result = self.device.abort_exposure();
        if self.state.is_active() {
            self.state = ExposureState::Aborted;
            info!("Exposure aborted");
        }
        result
    }

    /// Advance the state machine. `layout` describes the frame to download.
    pub fn on_tick(&mut self, now: Instant, layout: &FrameLayout) -> Option<ExposureEvent> {
        let (started_at, request, retries) = match self.state {
            ExposureState::Exposing {
                started_at,
                request,
            } => (started_at, request, 0),
            ExposureState::PollingCompletion {
                started_at,
                request,
                retries,
            } => (started_at, request, retries),
            _ => return None,
        };

        let time_left_s = request.duration_s - now.saturating_duration_since(started_at).as_secs_f64();
        if time_left_s > self.settings.epsilon_s {
            return Some(ExposureEvent::Progress { time_left_s });
        }

        self.state = ExposureState::PollingCompletion {
            started_at,
            request,
            retries,
        };
        self.poll_completion(request, retries, layout)
    }

    fn begin(&self, request: &ExposureRequest) -> Result<Instant> {
        self.device
            .start_exposure(request.duration_s, request.is_dark_shutter_closed)?;
        Ok(Instant::now())
    }

    fn poll_completion(
        &mut self,
        request: ExposureRequest,
        retries: u8,
        layout: &FrameLayout,
    ) -> Option<ExposureEvent> {
        for _ in 0..self.settings.poll_max_iterations {
            match self.device.exposure_status() {
                Ok(ExposureStatus::Success) => return self.download(request, retries, layout),
                Ok(ExposureStatus::Failed) => {
                    return Some(self.fail("camera reported exposure failure".into()))
                }
                Ok(status) => {
                    trace!(?status, "Exposure not ready");
                    thread::sleep(self.settings.poll_quantum);
                }
                Err(e) if e.is_transient() => return self.retry_or_fail(request, retries, e),
                Err(e) => return Some(self.fail(format!("exposure status query failed: {}", e))),
            }
        }

        let waited = self.settings.poll_quantum * self.settings.poll_max_iterations;
        let timeout = CaptureError::ProtocolTimeout {
            operation: "exposure_status",
            waited_ms: waited.as_millis() as u64,
        };
        self.retry_or_fail(request, retries, timeout)
    }

    fn retry_or_fail(
        &mut self,
        request: ExposureRequest,
        retries: u8,
        cause: CaptureError,
    ) -> Option<ExposureEvent> {
        let retries = retries + 1;
        if retries >= self.settings.max_retries {
            if let Err(e) = self.device.abort_exposure() {
                debug!(error = %e, "Abort after retry exhaustion failed");
            }
            return Some(self.fail(format!(
                "exceeded retries ({}/{}): {}",
                retries, self.settings.max_retries, cause
            )));
        }

        warn!(retries, error = %cause, "Exposure failed, restarting");
        match self.begin(&request) {
            Ok(started_at) => {
                self.state = ExposureState::PollingCompletion {
                    started_at,
                    request,
                    retries,
                };
                None
            }
            Err(e) => Some(self.fail(format!("exposure restart failed: {}", e))),
        }
    }

    fn download(
        &mut self,
        request: ExposureRequest,
        retries: u8,
        layout: &FrameLayout,
    ) -> Option<ExposureEvent> {
        self.state = ExposureState::Downloading;

        let read = if layout.channels() == 3 {
            self.read_color(layout)
        } else {
            FrameBuffer::allocate(layout).and_then(|mut frame| {
                self.device.read_frame(frame.payload_mut())?;
                Ok(frame)
            })
        };

        match read {
            Ok(mut frame) => {
                frame.exposure_s = request.duration_s;
                frame.captured_at = Some(Instant::now());
                self.state = ExposureState::Complete;
                info!(
                    width = frame.width,
                    height = frame.height,
                    bytes = frame.payload().len(),
                    "Exposure complete"
                );
                Some(ExposureEvent::Completed(frame))
            }
            Err(e) if e.is_transient() => self.retry_or_fail(request, retries, e),
            Err(e) => Some(self.fail(format!("frame download failed: {}", e))),
        }
    }

    /// The SDK hands color frames over interleaved in B, G, R order; they
    /// land in a temporary buffer and are split into planes.
    fn read_color(&self, layout: &FrameLayout) -> Result<FrameBuffer> {
        let mut interleaved = try_alloc("rgb deinterleave buffer", layout.payload_len())?;
        self.device.read_frame(&mut interleaved)?;
        let mut frame = FrameBuffer::allocate(layout)?;
        frame.deinterleave_from(&interleaved, ChannelOrder::Bgr)?;
        Ok(frame)
    }

    fn fail(&mut self, reason: String) -> ExposureEvent {
        error!(%reason, "Exposure failed");
        self.state = ExposureState::Failed {
            reason: reason.clone(),
        };
        ExposureEvent::Failed { reason }
    }
}

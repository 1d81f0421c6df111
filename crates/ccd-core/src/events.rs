//! Push-style notifications from a capture session to the property layer.

use crate::device::{GuideAxis, PixelFormat};
use crate::frame::{FrameBuffer, StreamFrame};
use parking_lot::Mutex;
use tracing::trace;

/// Cooling loop status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureStatus {
    /// No set point requested yet.
    Idle,
    /// Moving toward the set point.
    Converging,
    /// Within threshold of the set point.
    Converged,
    /// Last device read or write failed.
    Alert,
}

/// Snapshot published by the temperature regulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureReport {
    /// Sensor temperature in °C.
    pub current_c: f64,
    /// Requested temperature in °C.
    pub setpoint_c: f64,
    /// Cooler duty in percent.
    pub cooler_power_pct: f64,
    /// Cooler drawing power.
    pub cooler_active: bool,
    /// Regulation status.
    pub status: TemperatureStatus,
}

/// Everything a session reports to the outside.
#[derive(Debug)]
#[allow(missing_docs)]
pub enum SessionEvent {
    /// Seconds left of the running exposure, once per tick.
    ExposureProgress { time_left_s: f64 },
    /// Downloaded frame.
    ExposureComplete(FrameBuffer),
    ExposureFailed { reason: String },
    ExposureAborted,
    Temperature(TemperatureReport),
    /// Pulse on this axis ended, on schedule or pre-empted.
    GuideComplete(GuideAxis),
    GuideFailed { axis: GuideAxis, reason: String },
    /// Streamed video frame.
    FrameReady(StreamFrame),
    /// Streaming ended without a stop request.
    StreamStopped { reason: String },
    /// The session changed the pixel format.
    FormatChanged(PixelFormat),
}

impl SessionEvent {
    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            SessionEvent::ExposureProgress { .. } => "exposure_progress",
            SessionEvent::ExposureComplete(_) => "exposure_complete",
            SessionEvent::ExposureFailed { .. } => "exposure_failed",
            SessionEvent::ExposureAborted => "exposure_aborted",
            SessionEvent::Temperature(_) => "temperature",
            SessionEvent::GuideComplete(_) => "guide_complete",
            SessionEvent::GuideFailed { .. } => "guide_failed",
            SessionEvent::FrameReady(_) => "frame_ready",
            SessionEvent::StreamStopped { .. } => "stream_stopped",
            SessionEvent::FormatChanged(_) => "format_changed",
        }
    }
}

/// Receiver of session events. Called only from the tick thread.
pub trait EventSink: Send + Sync {
    /// Deliver `event` from the session named `camera`.
    fn publish(&self, camera: &str, event: SessionEvent);
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<(String, SessionEvent)> {
    fn publish(&self, camera: &str, event: SessionEvent) {
        if self.send((camera.to_string(), event)).is_err() {
            trace!(camera, "event receiver dropped");
        }
    }
}

/// In-memory sink that records events in publication order.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<(String, SessionEvent)>>,
}

impl EventLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<(String, SessionEvent)> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Number of events recorded.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// True when nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Labels of recorded events, oldest first.
    pub fn labels(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|(_, e)| e.label()).collect()
    }
}

impl EventSink for EventLog {
    fn publish(&self, camera: &str, event: SessionEvent) {
        self.events.lock().push((camera.to_string(), event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_log_preserves_order() {
        let log = EventLog::new();
        log.publish("cam", SessionEvent::ExposureProgress { time_left_s: 1.0 });
        log.publish("cam", SessionEvent::ExposureAborted);
        assert_eq!(log.labels(), vec!["exposure_progress", "exposure_aborted"]);

        let drained = log.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0, "cam");
        assert!(log.is_empty());
    }

    #[test]
    fn test_channel_sink_tolerates_closed_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<(String, SessionEvent)>();
        tx.publish("cam", SessionEvent::GuideComplete(GuideAxis::WestEast));
        drop(rx);
        tx.publish("cam", SessionEvent::ExposureAborted);
    }
}

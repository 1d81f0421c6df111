//! Per-camera orchestrator.
//!
//! A [`CaptureSession`] owns the exposure controller, the guide scheduler,
//! the temperature regulator and the streaming worker of one camera. The
//! host drives it by calling [`tick`](CaptureSession::tick) on a fixed
//! period and forwards user commands to it; everything the session has to
//! report goes out through its [`EventSink`].

use crate::components::controls::ControlTable;
use crate::components::exposure::{
    ExposureController, ExposureEvent, ExposureLimits, ExposureRequest, ExposureSettings,
    ExposureState,
};
use crate::components::guide::{GuideEvent, GuidePulseScheduler, GuideSettings, PulseState};
use crate::components::temperature::{
    SetpointOutcome, TemperatureControlState, TemperatureRegulator, TemperatureSettings,
};
use crate::components::worker::{
    AcquisitionWorker, CaptureThreadState, StreamSettings, StreamStats,
};
use ccd_core::{
    Binning, CaptureConfig, CaptureError, ControlId, DeviceInfo, EventSink, FrameKind,
    FrameLayout, GuideAxis, GuideDirection, PixelFormat, Result, Roi, SerializedDevice,
    SessionEvent, SharedDevice,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// One connected camera and the components that drive it.
pub struct CaptureSession {
    name: String,
    device: SharedDevice,
    info: DeviceInfo,
    config: CaptureConfig,
    sink: Arc<dyn EventSink>,
    layout: FrameLayout,
    controls: ControlTable,
    exposure: ExposureController,
    guider: GuidePulseScheduler,
    thermal: TemperatureRegulator,
    worker: AcquisitionWorker,
    streaming: bool,
    compression: bool,
    stream_exposure_s: f64,
    connected: bool,
}

impl CaptureSession {
    /// Bring up a session on an opened device and spawn its stream worker.
    pub fn connect(
        name: impl Into<String>,
        device: SharedDevice,
        config: CaptureConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let name = name.into();
        config.validate()?;

        let device = if config.serialize_device_access {
            SerializedDevice::shared(device)
        } else {
            device
        };
        let info = device.info().clone();

        let format = [PixelFormat::Raw16, PixelFormat::Raw8]
            .into_iter()
            .find(|f| info.supports_format(*f))
            .or_else(|| info.supported_formats.first().copied())
            .ok_or_else(|| {
                CaptureError::configuration(format!("{} reports no pixel formats", info.name))
            })?;
        let layout = FrameLayout::new(Roi::full(&info), Binning::NONE, format)
            .with_margin(config.frame_safety_margin);
        layout.validate(&info)?;
        device.set_roi(layout.roi, layout.binning, layout.format)?;

        let controls = ControlTable::load(device.as_ref())?;
        let (min_s, max_s) = controls.exposure_limits(&info);
        let exposure = ExposureController::new(
            device.clone(),
            ExposureSettings::from_config(&config),
            ExposureLimits { min_s, max_s },
        );
        let guider = GuidePulseScheduler::new(device.clone(), GuideSettings::from_config(&config));
        let mut thermal = TemperatureRegulator::new(
            device.clone(),
            TemperatureSettings::from_config(&config, info.has_cooler),
        );
        thermal.initialize();
        let worker = AcquisitionWorker::spawn(&name, device.clone())?;

        info!(
            camera = %name,
            model = %info.name,
            width = info.max_width,
            height = info.max_height,
            %format,
            "Camera connected"
        );

        Ok(Self {
            stream_exposure_s: config.stream_exposure_s,
            name,
            device,
            info,
            config,
            sink,
            layout,
            controls,
            exposure,
            guider,
            thermal,
            worker,
            streaming: false,
            compression: false,
            connected: true,
        })
    }

    /// Unique name given at connect time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Static capabilities reported by the device.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Effective configuration.
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Frame geometry and pixel format currently programmed.
    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// False once [`disconnect`](Self::disconnect) ran.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// True between a successful stream start and stop.
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Whether streamed frames are compressed.
    pub fn compression(&self) -> bool {
        self.compression
    }

    /// Current exposure state.
    pub fn exposure_state(&self) -> &ExposureState {
        self.exposure.state()
    }

    /// Seconds left of the running exposure as of `now`.
    pub fn exposure_time_left(&self, now: Instant) -> Option<f64> {
        self.exposure.time_left(now)
    }

    /// Latest cooling state.
    pub fn temperature(&self) -> &TemperatureControlState {
        self.thermal.state()
    }

    /// User-adjustable controls.
    pub fn controls(&self) -> &ControlTable {
        &self.controls
    }

    /// State of the streaming thread.
    pub fn stream_state(&self) -> CaptureThreadState {
        self.worker.state()
    }

    /// Streaming counters.
    pub fn stream_stats(&self) -> StreamStats {
        self.worker.stats()
    }

    /// Identity of the streaming thread. It never changes while connected.
    pub fn worker_thread_id(&self) -> std::thread::ThreadId {
        self.worker.thread_id()
    }

    /// Whether a timed guide pulse is running on `axis`.
    pub fn guide_busy(&self, axis: GuideAxis) -> bool {
        self.guider.is_busy(axis)
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Start a still exposure. Refused while streaming.
    pub fn start_exposure(&mut self, duration_s: f64, frame_kind: FrameKind) -> Result<()> {
        self.ensure_connected()?;
        if self.streaming {
            return Err(CaptureError::Busy("streaming in progress".into()));
        }
        self.exposure
            .start(ExposureRequest::new(duration_s, frame_kind))
    }

    /// Abort the running exposure, publishing `ExposureAborted` if one was
    /// active.
    pub fn abort(&mut self) -> Result<()> {
        self.ensure_connected()?;
        let was_active = self.exposure.is_busy();
        let result = self.exposure.abort();
        if was_active {
            self.publish(SessionEvent::ExposureAborted);
        }
        result
    }

    /// Request a cooling set point.
    pub fn set_temperature(&mut self, setpoint_c: f64) -> Result<SetpointOutcome> {
        self.ensure_connected()?;
        let before = self.thermal.status();
        let result = self.thermal.set_setpoint(setpoint_c);
        if self.thermal.status() != before {
            self.publish(SessionEvent::Temperature(self.thermal.report()));
        }
        result
    }

    /// Switch the cooler on or off and publish a temperature report.
    pub fn set_cooler(&mut self, on: bool) -> Result<()> {
        self.ensure_connected()?;
        self.thermal.set_cooler(on)?;
        self.publish(SessionEvent::Temperature(self.thermal.report()));
        Ok(())
    }

    /// Pulse the guide port. A pulse already running on `axis` is switched
    /// off and reported complete before the new one starts.
    pub fn guide(
        &mut self,
        axis: GuideAxis,
        direction: GuideDirection,
        ms: u32,
    ) -> Result<PulseState> {
        self.ensure_connected()?;
        if !self.info.has_st4 {
            return Err(CaptureError::Unsupported(format!(
                "{} has no guide port",
                self.info.name
            )));
        }
        let result = self.guider.pulse(axis, direction, ms);
        for event in self.guider.take_preempted() {
            self.publish_guide(event);
        }
        let state = result?;
        if state == PulseState::Complete {
            self.publish(SessionEvent::GuideComplete(axis));
        }
        Ok(state)
    }

    /// Start or stop video streaming. Starting switches to a luma format
    /// first when the current one cannot be streamed.
    pub fn set_streaming(&mut self, enable: bool) -> Result<()> {
        self.ensure_connected()?;
        if enable {
            self.start_streaming()
        } else {
            self.stop_streaming()
        }
    }

    /// Change the region of interest. Refused during an exposure.
    pub fn set_roi(&mut self, roi: Roi) -> Result<()> {
        self.ensure_connected()?;
        self.reconfigure(FrameLayout { roi, ..self.layout })
    }

    /// Change binning. Refused during an exposure.
    pub fn set_binning(&mut self, binning: Binning) -> Result<()> {
        self.ensure_connected()?;
        self.reconfigure(FrameLayout {
            binning,
            ..self.layout
        })
    }

    /// Change the pixel format. Only luma formats are accepted while
    /// streaming.
    pub fn set_pixel_format(&mut self, format: PixelFormat) -> Result<()> {
        self.ensure_connected()?;
        if self.streaming && !format.is_streamable() {
            return Err(CaptureError::configuration(format!(
                "{} cannot be streamed, only luma formats are supported while streaming",
                format
            )));
        }
        if format == self.layout.format {
            return Ok(());
        }
        self.reconfigure(FrameLayout {
            format,
            ..self.layout
        })?;
        self.publish(SessionEvent::FormatChanged(format));
        Ok(())
    }

    /// Compress streamed frames. Applies from the next frame.
    pub fn set_compression(&mut self, enabled: bool) {
        self.compression = enabled;
        if self.streaming {
            self.worker.update_settings(self.stream_settings());
        }
    }

    /// Per-frame exposure used while streaming.
    pub fn set_stream_exposure(&mut self, exposure_s: f64) -> Result<()> {
        self.ensure_connected()?;
        let limits = self.exposure.limits();
        if !(exposure_s > 0.0 && exposure_s <= limits.max_s) {
            return Err(CaptureError::configuration(format!(
                "stream exposure {}s outside 0..={}s",
                exposure_s, limits.max_s
            )));
        }
        self.stream_exposure_s = exposure_s.max(limits.min_s);
        if self.streaming {
            self.device
                .set_control(ControlId::Exposure, self.stream_exposure_s, false)?;
            self.worker.update_settings(self.stream_settings());
        }
        Ok(())
    }

    /// Write a user control through the control table.
    pub fn set_control(&mut self, id: ControlId, value: f64, auto: bool) -> Result<()> {
        self.ensure_connected()?;
        self.controls.set(self.device.as_ref(), id, value, auto)
    }

    /// Re-read user control values from the device, e.g. after the camera
    /// changed a value in automatic mode.
    pub fn refresh_controls(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.controls.refresh(self.device.as_ref())
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Advance every component as of now.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Advance every component as of `now`.
    pub fn tick_at(&mut self, now: Instant) {
        if !self.connected {
            return;
        }

        if let Some(event) = self.exposure.on_tick(now, &self.layout) {
            let event = match event {
                ExposureEvent::Progress { time_left_s } => {
                    SessionEvent::ExposureProgress { time_left_s }
                }
                ExposureEvent::Completed(frame) => SessionEvent::ExposureComplete(frame),
                ExposureEvent::Failed { reason } => SessionEvent::ExposureFailed { reason },
            };
            self.publish(event);
        }

        if let Some(report) = self.thermal.on_tick() {
            self.publish(SessionEvent::Temperature(report));
        }

        for event in self.guider.on_tick(now) {
            self.publish_guide(event);
        }

        if self.streaming {
            self.drain_stream();
        }
    }

    /// Tear down in order: guide pulses, exposure, streaming, worker, then
    /// the device handle. Idempotent.
    pub fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        info!(camera = %self.name, "Disconnecting camera");

        self.guider.cancel_all();
        if self.exposure.is_busy() {
            match self.exposure.abort() {
                Ok(()) => self.publish(SessionEvent::ExposureAborted),
                Err(e) => warn!(camera = %self.name, error = %e, "Abort during disconnect failed"),
            }
        }
        if self.streaming {
            self.streaming = false;
            self.worker.stop();
            if let Err(e) = self.device.stop_video_capture() {
                warn!(camera = %self.name, error = %e, "Failed to stop video during disconnect");
            }
        }
        self.worker.terminate();
        self.connected = false;
        self.device.close()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(CaptureError::NotConnected)
        }
    }

    fn publish(&self, event: SessionEvent) {
        debug!(camera = %self.name, event = event.label(), "Publishing");
        self.sink.publish(&self.name, event);
    }

    fn publish_guide(&self, event: GuideEvent) {
        self.publish(match event {
            GuideEvent::Complete(axis) => SessionEvent::GuideComplete(axis),
            GuideEvent::Failed { axis, reason } => SessionEvent::GuideFailed { axis, reason },
        });
    }

    fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            layout: self.layout,
            exposure_s: self.stream_exposure_s,
            compress: self.compression,
            compression_level: self.config.compression_level,
            queue_depth: self.config.stream_queue_depth,
            max_retries: self.config.max_exposure_retries,
        }
    }

    fn start_streaming(&mut self) -> Result<()> {
        if self.streaming {
            return Ok(());
        }
        if self.exposure.is_busy() {
            return Err(CaptureError::Busy("exposure in progress".into()));
        }

        let previous = self.layout;
        let switched = if self.layout.format.is_streamable() {
            None
        } else {
            let format = self.info.streamable_format().ok_or_else(|| {
                CaptureError::configuration(format!(
                    "{} has no pixel format suitable for streaming",
                    self.info.name
                ))
            })?;
            self.apply_layout(FrameLayout {
                format,
                ..self.layout
            })?;
            info!(camera = %self.name, %format, "Switched pixel format for streaming");
            Some(format)
        };

        if let Err(e) = self.begin_video() {
            if switched.is_some() {
                if let Err(restore) = self.apply_layout(previous) {
                    warn!(
                        camera = %self.name,
                        error = %restore,
                        "Failed to restore pixel format after stream start error"
                    );
                }
            }
            return Err(e);
        }
        if let Some(format) = switched {
            self.publish(SessionEvent::FormatChanged(format));
        }
        self.streaming = true;
        Ok(())
    }

    fn begin_video(&mut self) -> Result<()> {
        self.device
            .set_control(ControlId::Exposure, self.stream_exposure_s, false)?;
        self.device.start_video_capture()?;
        if let Err(e) = self.worker.start(self.stream_settings()) {
            if let Err(stop) = self.device.stop_video_capture() {
                warn!(
                    camera = %self.name,
                    error = %stop,
                    "Failed to stop video after worker error"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        self.worker.stop();
        self.device.stop_video_capture()
    }

    /// Collect frames from the worker and notice if it gave up.
    fn drain_stream(&mut self) {
        for frame in self.worker.take_frames() {
            self.publish(SessionEvent::FrameReady(frame));
        }
        if let Some(reason) = self.worker.take_failure() {
            self.streaming = false;
            if let Err(e) = self.device.stop_video_capture() {
                warn!(
                    camera = %self.name,
                    error = %e,
                    "Failed to stop video after stream failure"
                );
            }
            warn!(camera = %self.name, %reason, "Streaming stopped");
            self.publish(SessionEvent::StreamStopped { reason });
        }
    }

    /// Apply a new layout, pausing the stream around it when streaming.
    fn reconfigure(&mut self, layout: FrameLayout) -> Result<()> {
        if self.exposure.is_busy() {
            return Err(CaptureError::Busy("exposure in progress".into()));
        }
        layout.validate(&self.info)?;
        if !self.streaming {
            return self.apply_layout(layout);
        }

        if let Err(e) = self.restart_stream_with(layout) {
            self.streaming = false;
            self.worker.stop();
            if let Err(stop) = self.device.stop_video_capture() {
                debug!(camera = %self.name, error = %stop, "Video already stopped");
            }
            error!(camera = %self.name, error = %e, "Stream reconfiguration failed");
            self.publish(SessionEvent::StreamStopped {
                reason: e.to_string(),
            });
            return Err(e);
        }
        Ok(())
    }

    fn restart_stream_with(&mut self, layout: FrameLayout) -> Result<()> {
        self.worker.stop();
        self.device.stop_video_capture()?;
        let settle =
            CaptureConfig::video_timeout(self.stream_exposure_s) + self.config.tick_period();
        if !self.worker.wait_for_state(CaptureThreadState::Idle, settle) {
            warn!(camera = %self.name, "Stream worker slow to go idle");
        }
        self.apply_layout(layout)?;
        self.device.start_video_capture()?;
        self.worker.start(self.stream_settings())
    }

    fn apply_layout(&mut self, layout: FrameLayout) -> Result<()> {
        layout.validate(&self.info)?;
        self.device
            .set_roi(layout.roi, layout.binning, layout.format)?;
        self.layout = layout;
        debug!(
            camera = %self.name,
            width = layout.binned_width(),
            height = layout.binned_height(),
            format = %layout.format,
            buffer_len = layout.buffer_len(),
            "Frame layout updated"
        );
        Ok(())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            error!(camera = %self.name, error = %e, "Disconnect on drop failed");
        }
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("name", &self.name)
            .field("layout", &self.layout)
            .field("streaming", &self.streaming)
            .field("connected", &self.connected)
            .finish()
    }
}

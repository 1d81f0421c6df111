//! Simulated cooled astronomy camera.
//!
//! `MockCamera` implements [`DeviceIO`] with enough fidelity to drive the
//! capture core end to end:
//!
//! - exposures that complete immediately (Instant) or on the wall clock
//! - synthetic star-field frames in every supported pixel format
//! - video capture that honors read timeouts and can be stalled
//! - a cooler with exponential temperature drift toward the set point
//! - ST4 guide outputs
//! - error injection through [`ErrorConfig`]
//!
//! Every state-changing call is recorded as a [`DeviceCall`] so tests can
//! assert on the exact sequence the core issued.

use crate::common::{ErrorConfig, MockMode, MockRng};
use crate::pattern::{fill_star_field, PatternGeometry};
use ccd_core::{
    BayerPattern, Binning, CaptureError, ControlCaps, ControlId, ControlValue, DeviceIO,
    DeviceInfo, ExposureStatus, FrameLayout, GuideDirection, PixelFormat, Result, Roi,
};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// =============================================================================
// TemperatureSimulation - exponential drift
// =============================================================================

/// Sensor temperature with exponential drift toward the active set point
#[derive(Debug, Clone)]
pub struct TemperatureSimulation {
    current: f64,
    setpoint: f64,
    ambient: f64,
    drift_rate: f64, // fraction per second
}

impl TemperatureSimulation {
    fn new(ambient: f64) -> Self {
        Self {
            current: ambient,
            setpoint: ambient,
            ambient,
            drift_rate: 0.1,
        }
    }

    fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    /// Update temperature with exponential approach to setpoint
    fn update(&mut self, dt_seconds: f64) {
        let diff = self.setpoint - self.current;
        self.current += diff * (1.0 - (-self.drift_rate * dt_seconds).exp());
    }

    fn current(&self) -> f64 {
        self.current
    }

    /// Cooler duty needed to hold the current gap to ambient.
    fn cooler_power(&self) -> f64 {
        let holding = (self.ambient - self.current).max(0.0) * 2.0;
        let pulling = (self.current - self.setpoint).max(0.0) * 5.0;
        (holding + pulling).clamp(0.0, 100.0)
    }
}

// =============================================================================
// Call recording
// =============================================================================

/// State-changing calls received by the simulated camera, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    StartExposure { duration_s: f64, dark: bool },
    AbortExposure,
    ReadFrame,
    StartVideo,
    StopVideo,
    SetControl { id: ControlId, value: f64, auto: bool },
    PulseOn(GuideDirection),
    PulseOff(GuideDirection),
    SetRoi {
        roi: Roi,
        binning: Binning,
        format: PixelFormat,
    },
    Close,
}

// =============================================================================
// MockCameraBuilder - Builder Pattern
// =============================================================================

/// Builder for MockCamera with advanced configuration
#[derive(Debug, Clone)]
pub struct MockCameraBuilder {
    info: DeviceInfo,
    mode: MockMode,
    error_config: Option<ErrorConfig>,
    initial_temperature: f64,
    video_frame_interval: Option<Duration>,
    readout: Duration,
    seed: Option<u64>,
}

impl MockCameraBuilder {
    /// Mono camera with the given sensor size and every default.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            info: DeviceInfo {
                name: "Mock CCD".to_string(),
                max_width: width,
                max_height: height,
                pixel_size_um: 3.75,
                bit_depth: 12,
                bayer: None,
                has_cooler: true,
                has_st4: true,
                min_exposure_s: 0.000_032,
                max_exposure_s: 3600.0,
                supported_formats: vec![PixelFormat::Raw8, PixelFormat::Raw16, PixelFormat::Luma8],
                supported_bins: vec![1, 2, 4],
            },
            mode: MockMode::Instant,
            error_config: None,
            initial_temperature: 20.0,
            video_frame_interval: None,
            readout: Duration::ZERO,
            seed: None,
        }
    }

    /// Model name reported in `DeviceInfo`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.info.name = name.into();
        self
    }

    /// Sensor size in pixels.
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.info.max_width = width;
        self.info.max_height = height;
        self
    }

    /// Pixel formats the camera claims to support.
    pub fn formats(mut self, formats: Vec<PixelFormat>) -> Self {
        self.info.supported_formats = formats;
        self
    }

    /// Supported symmetric bin factors.
    pub fn bins(mut self, bins: Vec<u32>) -> Self {
        self.info.supported_bins = bins;
        self
    }

    /// One-shot color sensor: adds a Bayer pattern and RGB24 output.
    pub fn color(mut self, bayer: BayerPattern) -> Self {
        self.info.bayer = Some(bayer);
        if !self.info.supported_formats.contains(&PixelFormat::Rgb24) {
            self.info.supported_formats.push(PixelFormat::Rgb24);
        }
        self
    }

    /// Whether the camera has a regulated cooler.
    pub fn cooler(mut self, has_cooler: bool) -> Self {
        self.info.has_cooler = has_cooler;
        self
    }

    /// Whether the camera has a guide port.
    pub fn st4(mut self, has_st4: bool) -> Self {
        self.info.has_st4 = has_st4;
        self
    }

    /// Shortest and longest accepted exposure, in seconds.
    pub fn exposure_range(mut self, min_s: f64, max_s: f64) -> Self {
        self.info.min_exposure_s = min_s;
        self.info.max_exposure_s = max_s;
        self
    }

    /// Timing behaviour. Also picks the default error profile.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the error profile implied by the mode.
    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = Some(config);
        self
    }

    /// Ambient and starting sensor temperature in °C.
    pub fn initial_temperature(mut self, temp: f64) -> Self {
        self.initial_temperature = temp;
        self
    }

    /// Minimum spacing between video frames. Defaults to 5 ms in Instant
    /// mode and 1/30 s otherwise.
    pub fn video_frame_interval(mut self, interval: Duration) -> Self {
        self.video_frame_interval = Some(interval);
        self
    }

    /// Extra time after the exposure before the image is ready (timed modes).
    pub fn readout_delay(mut self, readout: Duration) -> Self {
        self.readout = readout;
        self
    }

    /// Seed the noise generator for repeatable runs.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Finish the camera.
    pub fn build(self) -> MockCamera {
        MockCamera::from_builder(self)
    }

    /// Variant data the built camera will report.
    pub fn build_info(&self) -> DeviceInfo {
        self.info.clone()
    }
}

impl Default for MockCameraBuilder {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

// =============================================================================
// MockCamera
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct ActiveExposure {
    started: Instant,
    duration: Duration,
    dark: bool,
}

#[derive(Debug)]
struct MockState {
    closed: bool,
    exposure: Option<ActiveExposure>,
    status_script: VecDeque<ExposureStatus>,
    frame_number: u64,
    video_running: bool,
    video_stalled: bool,
    last_video_frame: Option<Instant>,
    video_frames: u64,
    roi: Roi,
    binning: Binning,
    format: PixelFormat,
    controls: BTreeMap<ControlId, ControlValue>,
    temperature: TemperatureSimulation,
    last_temperature_update: Instant,
    forced_temperature: Option<f64>,
    target_temperature: f64,
    cooler_on: bool,
    status_queries: u64,
    calls: Vec<DeviceCall>,
}

impl MockState {
    fn layout(&self) -> FrameLayout {
        FrameLayout::new(self.roi, self.binning, self.format)
    }

    fn refresh_temperature(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_temperature_update).as_secs_f64();
        self.temperature.update(dt);
        self.last_temperature_update = now;
    }

    fn fill(&mut self, buf: &mut [u8], dark: bool) -> Result<()> {
        let layout = self.layout();
        let expected = layout.payload_len();
        if buf.len() != expected {
            return Err(CaptureError::configuration(format!(
                "buffer is {} bytes, readout needs {}",
                buf.len(),
                expected
            )));
        }
        self.frame_number += 1;
        let geometry = PatternGeometry {
            width: layout.binned_width(),
            height: layout.binned_height(),
            bytes_per_sample: layout.format.bytes_per_sample(),
            channels: usize::from(layout.channels()),
        };
        fill_star_field(buf, geometry, self.frame_number, dark);
        Ok(())
    }
}

/// Simulated camera implementing [`DeviceIO`].
pub struct MockCamera {
    info: DeviceInfo,
    caps: Vec<ControlCaps>,
    mode: MockMode,
    errors: ErrorConfig,
    rng: MockRng,
    video_interval: Duration,
    readout: Duration,
    state: Mutex<MockState>,
    video_cv: Condvar,
}

fn cap(id: ControlId, min: f64, max: f64, default: f64, writable: bool, auto: bool) -> ControlCaps {
    ControlCaps {
        id,
        description: id.name().to_string(),
        min,
        max,
        default,
        writable,
        auto_supported: auto,
    }
}

impl MockCamera {
    /// Create builder for advanced configuration
    pub fn builder() -> MockCameraBuilder {
        MockCameraBuilder::default()
    }

    /// Create an Instant-mode camera with the given resolution.
    pub fn new(width: u32, height: u32) -> Self {
        MockCameraBuilder::new(width, height).build()
    }

    fn from_builder(builder: MockCameraBuilder) -> Self {
        let info = builder.info;

        let mut caps = vec![
            cap(ControlId::Gain, 0.0, 600.0, 100.0, true, true),
            cap(ControlId::Offset, 0.0, 100.0, 10.0, true, false),
            cap(
                ControlId::Exposure,
                info.min_exposure_s,
                info.max_exposure_s,
                0.01,
                true,
                false,
            ),
            cap(ControlId::Gamma, 1.0, 100.0, 50.0, true, false),
            cap(ControlId::BandwidthOverload, 40.0, 100.0, 50.0, true, true),
            cap(ControlId::HighSpeedMode, 0.0, 1.0, 0.0, true, false),
            cap(ControlId::Flip, 0.0, 3.0, 0.0, true, false),
            cap(ControlId::Temperature, -60.0, 60.0, builder.initial_temperature, false, false),
        ];
        if info.is_color() {
            caps.push(cap(ControlId::WhiteBalanceRed, 1.0, 99.0, 52.0, true, true));
            caps.push(cap(ControlId::WhiteBalanceBlue, 1.0, 99.0, 95.0, true, true));
        }
        if info.has_cooler {
            caps.push(cap(ControlId::TargetTemperature, -40.0, 30.0, 0.0, true, false));
            caps.push(cap(ControlId::CoolerOn, 0.0, 1.0, 0.0, true, false));
            caps.push(cap(ControlId::CoolerPower, 0.0, 100.0, 0.0, false, false));
        }

        let controls = caps
            .iter()
            .map(|c| (c.id, ControlValue::manual(c.default)))
            .collect();

        let errors = match (builder.error_config, builder.mode) {
            (Some(config), _) => config,
            (None, MockMode::Chaos) => ErrorConfig::random_failures_seeded(0.05, builder.seed),
            (None, _) => ErrorConfig::none(),
        };

        let video_interval = builder.video_frame_interval.unwrap_or(match builder.mode {
            MockMode::Instant => Duration::from_millis(5),
            _ => Duration::from_secs_f64(1.0 / 30.0),
        });

        let format = info
            .supported_formats
            .first()
            .copied()
            .unwrap_or(PixelFormat::Raw16);

        let state = MockState {
            closed: false,
            exposure: None,
            status_script: VecDeque::new(),
            frame_number: 0,
            video_running: false,
            video_stalled: false,
            last_video_frame: None,
            video_frames: 0,
            roi: Roi::full(&info),
            binning: Binning::NONE,
            format,
            controls,
            temperature: TemperatureSimulation::new(builder.initial_temperature),
            last_temperature_update: Instant::now(),
            forced_temperature: None,
            target_temperature: builder.initial_temperature,
            cooler_on: false,
            status_queries: 0,
            calls: Vec::new(),
        };

        Self {
            info,
            caps,
            mode: builder.mode,
            errors,
            rng: MockRng::new(builder.seed),
            video_interval,
            readout: builder.readout,
            state: Mutex::new(state),
            video_cv: Condvar::new(),
        }
    }

    /// Calls recorded so far.
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state.lock().calls.clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Recorded calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&DeviceCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Queue statuses returned by the next `exposure_status` calls, ahead of
    /// the simulated exposure clock.
    pub fn script_exposure_status(&self, statuses: impl IntoIterator<Item = ExposureStatus>) {
        self.state.lock().status_script.extend(statuses);
    }

    /// Pin the sensor temperature reading, or release it with `None`.
    pub fn force_temperature(&self, temp: Option<f64>) {
        self.state.lock().forced_temperature = temp;
    }

    /// A stalled camera accepts video reads but never delivers a frame.
    pub fn set_video_stalled(&self, stalled: bool) {
        self.state.lock().video_stalled = stalled;
        self.video_cv.notify_all();
    }

    /// Whether video capture is started.
    pub fn is_video_running(&self) -> bool {
        self.state.lock().video_running
    }

    /// Video frames delivered since connect.
    pub fn video_frames(&self) -> u64 {
        self.state.lock().video_frames
    }

    /// Calls to `exposure_status`, failed ones included.
    pub fn status_queries(&self) -> u64 {
        self.state.lock().status_queries
    }

    /// Whether a still exposure is armed.
    pub fn exposure_in_progress(&self) -> bool {
        self.state.lock().exposure.is_some()
    }

    /// True once `close` was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Cooler switch state.
    pub fn cooler_on(&self) -> bool {
        self.state.lock().cooler_on
    }

    /// Stored value of a plain control. Temperature and cooler readings
    /// are simulated and not stored here.
    pub fn control_value(&self, id: ControlId) -> Option<ControlValue> {
        self.state.lock().controls.get(&id).copied()
    }

    /// Current readout layout as last set through `set_roi`.
    pub fn layout(&self) -> FrameLayout {
        self.state.lock().layout()
    }

    fn ensure_open(state: &MockState) -> Result<()> {
        if state.closed {
            Err(CaptureError::NotConnected)
        } else {
            Ok(())
        }
    }

    fn ensure_st4(&self) -> Result<()> {
        if self.info.has_st4 {
            Ok(())
        } else {
            Err(CaptureError::Unsupported(format!(
                "{} has no ST4 port",
                self.info.name
            )))
        }
    }
}

impl std::fmt::Debug for MockCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCamera")
            .field("name", &self.info.name)
            .field("mode", &self.mode)
            .finish()
    }
}

impl DeviceIO for MockCamera {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn control_caps(&self) -> Result<Vec<ControlCaps>> {
        self.errors.check_operation("control_caps")?;
        Self::ensure_open(&self.state.lock())?;
        Ok(self.caps.clone())
    }

    fn start_exposure(&self, duration_s: f64, dark: bool) -> Result<()> {
        self.errors.check_operation("start_exposure")?;
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.calls.push(DeviceCall::StartExposure { duration_s, dark });
        state.exposure = Some(ActiveExposure {
            started: Instant::now(),
            duration: Duration::from_secs_f64(duration_s.max(0.0)),
            dark,
        });
        debug!(duration_s, dark, "MockCamera: exposure started");
        Ok(())
    }

    fn abort_exposure(&self) -> Result<()> {
        self.errors.check_operation("abort_exposure")?;
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.calls.push(DeviceCall::AbortExposure);
        state.exposure = None;
        state.status_script.clear();
        Ok(())
    }

    fn exposure_status(&self) -> Result<ExposureStatus> {
        self.state.lock().status_queries += 1;
        self.errors.check_operation("exposure_status")?;
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;

        if let Some(status) = state.status_script.pop_front() {
            return Ok(status);
        }
        let status = match state.exposure {
            None => ExposureStatus::Idle,
            Some(_) if !self.mode.is_timed() => ExposureStatus::Success,
            Some(exposure) => {
                if exposure.started.elapsed() >= exposure.duration + self.readout {
                    ExposureStatus::Success
                } else {
                    ExposureStatus::Working
                }
            }
        };
        trace!(?status, "MockCamera: exposure status");
        Ok(status)
    }

    fn read_frame(&self, buf: &mut [u8]) -> Result<()> {
        self.errors.check_operation("read_frame")?;
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        let dark = state
            .exposure
            .map(|e| e.dark)
            .ok_or_else(|| CaptureError::HardwareFailure("no image available".into()))?;
        state.fill(buf, dark)?;
        state.exposure = None;
        state.calls.push(DeviceCall::ReadFrame);
        Ok(())
    }

    fn start_video_capture(&self) -> Result<()> {
        self.errors.check_operation("start_video_capture")?;
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.calls.push(DeviceCall::StartVideo);
        state.video_running = true;
        state.last_video_frame = None;
        self.video_cv.notify_all();
        Ok(())
    }

    fn stop_video_capture(&self) -> Result<()> {
        self.errors.check_operation("stop_video_capture")?;
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.calls.push(DeviceCall::StopVideo);
        state.video_running = false;
        self.video_cv.notify_all();
        Ok(())
    }

    fn read_video_frame(&self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        self.errors.check_operation("read_video_frame")?;
        let deadline = Instant::now() + timeout;
        let timed_out = || CaptureError::ProtocolTimeout {
            operation: "read_video_frame",
            waited_ms: timeout.as_millis() as u64,
        };

        let mut state = self.state.lock();
        let started_running = state.video_running;
        loop {
            Self::ensure_open(&state)?;
            if state.video_running && !state.video_stalled {
                let ready_at = state
                    .last_video_frame
                    .map_or_else(Instant::now, |t| t + self.video_interval);
                if Instant::now() >= ready_at {
                    state.fill(buf, false)?;
                    state.video_frames += 1;
                    state.last_video_frame = Some(Instant::now());
                    return Ok(());
                }
                self.video_cv.wait_until(&mut state, ready_at.min(deadline));
            } else {
                // Stopping capture releases a pending read.
                if started_running && !state.video_running {
                    return Err(timed_out());
                }
                self.video_cv.wait_until(&mut state, deadline);
            }
            if Instant::now() >= deadline {
                return Err(timed_out());
            }
        }
    }

    fn get_control(&self, id: ControlId) -> Result<ControlValue> {
        self.errors.check_operation("get_control")?;
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        match id {
            ControlId::Temperature => {
                state.refresh_temperature();
                let reading = state
                    .forced_temperature
                    .unwrap_or_else(|| state.temperature.current() + self.rng.noise(0.05));
                Ok(ControlValue::manual(reading))
            }
            ControlId::CoolerPower if self.info.has_cooler => {
                state.refresh_temperature();
                let power = if state.cooler_on {
                    state.temperature.cooler_power()
                } else {
                    0.0
                };
                Ok(ControlValue::manual(power))
            }
            ControlId::CoolerOn if self.info.has_cooler => Ok(ControlValue::manual(
                if state.cooler_on { 1.0 } else { 0.0 },
            )),
            _ => state
                .controls
                .get(&id)
                .copied()
                .ok_or_else(|| CaptureError::Unsupported(format!("control {} not present", id))),
        }
    }

    fn set_control(&self, id: ControlId, value: f64, auto: bool) -> Result<()> {
        self.errors.check_operation("set_control")?;
        let caps = self
            .caps
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| CaptureError::Unsupported(format!("control {} not present", id)))?;
        if !caps.writable {
            return Err(CaptureError::configuration(format!("control {} is read-only", id)));
        }
        if value < caps.min || value > caps.max {
            return Err(CaptureError::configuration(format!(
                "{} = {} outside {}..={}",
                id, value, caps.min, caps.max
            )));
        }

        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.calls.push(DeviceCall::SetControl { id, value, auto });
        state.refresh_temperature();
        match id {
            ControlId::TargetTemperature => {
                state.target_temperature = value;
                if state.cooler_on {
                    state.temperature.set_setpoint(value);
                }
            }
            ControlId::CoolerOn => {
                state.cooler_on = value != 0.0;
                let setpoint = if state.cooler_on {
                    state.target_temperature
                } else {
                    state.temperature.ambient
                };
                state.temperature.set_setpoint(setpoint);
            }
            _ => {}
        }
        state.controls.insert(id, ControlValue { value, auto });
        Ok(())
    }

    fn pulse_guide_on(&self, direction: GuideDirection) -> Result<()> {
        self.errors.check_operation("pulse_guide_on")?;
        self.ensure_st4()?;
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.calls.push(DeviceCall::PulseOn(direction));
        Ok(())
    }

    fn pulse_guide_off(&self, direction: GuideDirection) -> Result<()> {
        self.errors.check_operation("pulse_guide_off")?;
        self.ensure_st4()?;
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.calls.push(DeviceCall::PulseOff(direction));
        Ok(())
    }

    fn set_roi(&self, roi: Roi, binning: Binning, format: PixelFormat) -> Result<()> {
        self.errors.check_operation("set_roi")?;
        FrameLayout::new(roi, binning, format).validate(&self.info)?;
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.calls.push(DeviceCall::SetRoi {
            roi,
            binning,
            format,
        });
        state.roi = roi;
        state.binning = binning;
        state.format = format;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(DeviceCall::Close);
        state.closed = true;
        state.video_running = false;
        state.exposure = None;
        self.video_cv.notify_all();
        debug!(name = %self.info.name, "MockCamera: closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ErrorScenario, InjectedFault};
    use std::sync::Arc;

    fn small() -> MockCamera {
        MockCameraBuilder::new(64, 48).build()
    }

    #[test]
    fn test_instant_exposure_cycle() {
        let cam = small();
        assert_eq!(cam.exposure_status().unwrap(), ExposureStatus::Idle);

        cam.start_exposure(1.0, false).unwrap();
        assert_eq!(cam.exposure_status().unwrap(), ExposureStatus::Success);

        let mut buf = vec![0u8; cam.layout().payload_len()];
        cam.read_frame(&mut buf).unwrap();
        assert_eq!(cam.exposure_status().unwrap(), ExposureStatus::Idle);
        assert_eq!(
            cam.calls(),
            vec![
                DeviceCall::StartExposure {
                    duration_s: 1.0,
                    dark: false
                },
                DeviceCall::ReadFrame
            ]
        );
    }

    #[test]
    fn test_realistic_exposure_reports_working() {
        let cam = MockCameraBuilder::new(64, 48)
            .mode(MockMode::Realistic)
            .build();
        cam.start_exposure(0.05, false).unwrap();
        assert_eq!(cam.exposure_status().unwrap(), ExposureStatus::Working);
        std::thread::sleep(Duration::from_millis(70));
        assert_eq!(cam.exposure_status().unwrap(), ExposureStatus::Success);
    }

    #[test]
    fn test_scripted_status_precedes_clock() {
        let cam = small();
        cam.start_exposure(0.1, false).unwrap();
        cam.script_exposure_status([ExposureStatus::Working, ExposureStatus::Failed]);
        assert_eq!(cam.exposure_status().unwrap(), ExposureStatus::Working);
        assert_eq!(cam.exposure_status().unwrap(), ExposureStatus::Failed);
        assert_eq!(cam.exposure_status().unwrap(), ExposureStatus::Success);
    }

    #[test]
    fn test_read_frame_checks_buffer_size() {
        let cam = small();
        cam.start_exposure(0.1, false).unwrap();
        let mut buf = vec![0u8; 10];
        let err = cam.read_frame(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ccd_core::ErrorKind::Configuration);
    }

    #[test]
    fn test_set_roi_validates_and_applies() {
        let cam = small();
        cam.set_roi(Roi::new(0, 0, 32, 24), Binning::new(2, 2), PixelFormat::Raw8)
            .unwrap();
        assert_eq!(cam.layout().payload_len(), 16 * 12);

        let err = cam
            .set_roi(Roi::new(40, 0, 32, 24), Binning::NONE, PixelFormat::Raw8)
            .unwrap_err();
        assert_eq!(err.kind(), ccd_core::ErrorKind::Configuration);
        assert_eq!(cam.layout().payload_len(), 16 * 12, "rejected ROI leaves state");
    }

    #[test]
    fn test_injected_status_failures() {
        let cam = MockCameraBuilder::new(64, 48)
            .error_config(ErrorConfig::scenario(ErrorScenario::FailNext {
                operation: "exposure_status",
                times: 1,
                fault: InjectedFault::Transient,
            }))
            .build();
        cam.start_exposure(0.1, false).unwrap();
        assert!(cam.exposure_status().unwrap_err().is_transient());
        assert_eq!(cam.exposure_status().unwrap(), ExposureStatus::Success);
        assert_eq!(cam.status_queries(), 2);
    }

    #[test]
    fn test_cooler_drives_temperature() {
        let mut sim = TemperatureSimulation::new(20.0);
        sim.set_setpoint(-10.0);
        for _ in 0..100 {
            sim.update(1.0);
        }
        approx::assert_abs_diff_eq!(sim.current(), -10.0, epsilon = 0.01);

        let cam = small();
        cam.set_control(ControlId::TargetTemperature, -10.0, false).unwrap();
        cam.set_control(ControlId::CoolerOn, 1.0, false).unwrap();
        assert!(cam.cooler_on());

        cam.force_temperature(Some(-3.5));
        let reading = cam.get_control(ControlId::Temperature).unwrap();
        approx::assert_relative_eq!(reading.value, -3.5);
    }

    #[test]
    fn test_set_control_range_check() {
        let cam = small();
        let err = cam.set_control(ControlId::Gain, 1000.0, false).unwrap_err();
        assert_eq!(err.kind(), ccd_core::ErrorKind::Configuration);
        let err = cam
            .set_control(ControlId::CoolerPower, 50.0, false)
            .unwrap_err();
        assert_eq!(err.kind(), ccd_core::ErrorKind::Configuration);
        cam.set_control(ControlId::Gain, 200.0, true).unwrap();
        assert_eq!(
            cam.control_value(ControlId::Gain),
            Some(ControlValue {
                value: 200.0,
                auto: true
            })
        );
    }

    #[test]
    fn test_video_read_times_out_when_stalled() {
        let cam = small();
        cam.start_video_capture().unwrap();
        cam.set_video_stalled(true);
        let mut buf = vec![0u8; cam.layout().payload_len()];
        let started = Instant::now();
        let err = cam
            .read_video_frame(&mut buf, Duration::from_millis(50))
            .unwrap_err();
        assert_eq!(err.kind(), ccd_core::ErrorKind::ProtocolTimeout);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_stop_video_releases_blocked_read() {
        let cam = Arc::new(small());
        cam.start_video_capture().unwrap();
        cam.set_video_stalled(true);

        let reader = {
            let cam = cam.clone();
            std::thread::spawn(move || {
                let mut buf = vec![0u8; cam.layout().payload_len()];
                let started = Instant::now();
                let result = cam.read_video_frame(&mut buf, Duration::from_secs(5));
                (result, started.elapsed())
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        cam.stop_video_capture().unwrap();

        let (result, waited) = reader.join().unwrap();
        assert!(result.is_err());
        assert!(waited < Duration::from_secs(1), "read released after {:?}", waited);
    }

    #[test]
    fn test_guide_requires_st4() {
        let cam = MockCameraBuilder::new(64, 48).st4(false).build();
        let err = cam.pulse_guide_on(GuideDirection::North).unwrap_err();
        assert_eq!(err.kind(), ccd_core::ErrorKind::Unsupported);
    }

    #[test]
    fn test_closed_camera_rejects_calls() {
        let cam = small();
        cam.close().unwrap();
        assert!(cam.is_closed());
        assert_eq!(cam.start_exposure(1.0, false).unwrap_err(), CaptureError::NotConnected);
    }
}

//! Device capability consumed by the capture core.
//!
//! [`DeviceIO`] is the only surface through which the core touches hardware.
//! Vendor backends implement it directly; per-backend differences (sensor
//! geometry, available formats, cooler and ST4 presence) travel as
//! [`DeviceInfo`] variant data instead of overridden hooks.

use crate::error::{CaptureError, Result};
use crate::frame::{Binning, Roi};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Exposure status as reported by the camera SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureStatus {
    /// No exposure in progress.
    Idle,
    /// Exposure running or reading out.
    Working,
    /// Image ready for download.
    Success,
    /// The camera reports the exposure as bad.
    Failed,
}

/// Frame type requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Light,
    Dark,
    Bias,
    Flat,
}

impl FrameKind {
    /// Dark and bias frames are taken with the shutter closed.
    pub fn shutter_closed(self) -> bool {
        matches!(self, FrameKind::Dark | FrameKind::Bias)
    }
}

impl std::str::FromStr for FrameKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(FrameKind::Light),
            "dark" => Ok(FrameKind::Dark),
            "bias" => Ok(FrameKind::Bias),
            "flat" => Ok(FrameKind::Flat),
            other => Err(format!("unknown frame kind '{}'", other)),
        }
    }
}

/// Guide axis. Each axis owns at most one live pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GuideAxis {
    /// Declination axis.
    NorthSouth,
    /// Right ascension axis.
    WestEast,
}

impl GuideAxis {
    /// Both axes, in index order.
    pub const ALL: [GuideAxis; 2] = [GuideAxis::NorthSouth, GuideAxis::WestEast];

    /// Stable slot for per-axis tables.
    pub fn index(self) -> usize {
        match self {
            GuideAxis::NorthSouth => 0,
            GuideAxis::WestEast => 1,
        }
    }
}

impl fmt::Display for GuideAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuideAxis::NorthSouth => write!(f, "NS"),
            GuideAxis::WestEast => write!(f, "WE"),
        }
    }
}

/// ST4 guide direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum GuideDirection {
    North,
    South,
    East,
    West,
}

impl GuideDirection {
    /// Axis this direction pulses on.
    pub fn axis(self) -> GuideAxis {
        match self {
            GuideDirection::North | GuideDirection::South => GuideAxis::NorthSouth,
            GuideDirection::East | GuideDirection::West => GuideAxis::WestEast,
        }
    }
}

/// Pixel formats a backend can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit raw sensor data.
    Raw8,
    /// 16-bit raw sensor data.
    Raw16,
    /// 8 bits per channel, three interleaved channels.
    Rgb24,
    /// 16 bits per channel, three interleaved channels.
    Rgb48,
    /// 8-bit luminance.
    Luma8,
}

impl PixelFormat {
    /// Bits per sample of a single channel.
    pub fn bits_per_pixel(self) -> u8 {
        match self {
            PixelFormat::Raw16 | PixelFormat::Rgb48 => 16,
            PixelFormat::Raw8 | PixelFormat::Rgb24 | PixelFormat::Luma8 => 8,
        }
    }

    /// Bytes per sample of a single channel.
    pub fn bytes_per_sample(self) -> usize {
        usize::from(self.bits_per_pixel() / 8)
    }

    /// Interleaved channels per pixel.
    pub fn channels(self) -> u8 {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Rgb48 => 3,
            _ => 1,
        }
    }

    /// Only single-byte monochrome formats can be streamed.
    pub fn is_streamable(self) -> bool {
        matches!(self, PixelFormat::Raw8 | PixelFormat::Luma8)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PixelFormat::Raw8 => "RAW8",
            PixelFormat::Raw16 => "RAW16",
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Rgb48 => "RGB48",
            PixelFormat::Luma8 => "Y8",
        };
        write!(f, "{}", label)
    }
}

/// Bayer mosaic layout of a color sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BayerPattern {
    Rggb,
    Bggr,
    Grbg,
    Gbrg,
}

/// Camera controls addressable through [`DeviceIO::get_control`] and
/// [`DeviceIO::set_control`]. Values are in engineering units (seconds,
/// degrees Celsius, percent); backends do their own scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum ControlId {
    Gain,
    Offset,
    Exposure,
    Gamma,
    WhiteBalanceRed,
    WhiteBalanceBlue,
    BandwidthOverload,
    HighSpeedMode,
    Flip,
    AntiDewHeater,
    Temperature,
    TargetTemperature,
    CoolerOn,
    CoolerPower,
}

impl ControlId {
    /// Short name as the camera SDK spells it.
    pub fn name(self) -> &'static str {
        match self {
            ControlId::Gain => "Gain",
            ControlId::Offset => "Offset",
            ControlId::Exposure => "Exposure",
            ControlId::Gamma => "Gamma",
            ControlId::WhiteBalanceRed => "WB_R",
            ControlId::WhiteBalanceBlue => "WB_B",
            ControlId::BandwidthOverload => "BandWidth",
            ControlId::HighSpeedMode => "HighSpeedMode",
            ControlId::Flip => "Flip",
            ControlId::AntiDewHeater => "AntiDewHeater",
            ControlId::Temperature => "Temperature",
            ControlId::TargetTemperature => "TargetTemp",
            ControlId::CoolerOn => "CoolerOn",
            ControlId::CoolerPower => "CoolerPowerPerc",
        }
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Current value of a control and whether the camera drives it automatically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlValue {
    /// Raw value in the control's unit.
    pub value: f64,
    /// The camera adjusts the value itself.
    pub auto: bool,
}

impl ControlValue {
    /// Value under manual control.
    pub fn manual(value: f64) -> Self {
        Self { value, auto: false }
    }
}

/// Static metadata for one control.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlCaps {
    /// Control identity.
    pub id: ControlId,
    /// Human-readable description.
    pub description: String,
    /// Lowest accepted value.
    pub min: f64,
    /// Highest accepted value.
    pub max: f64,
    /// Value after power-up.
    pub default: f64,
    /// False for read-only sensors such as temperature.
    pub writable: bool,
    /// The control has an automatic mode.
    pub auto_supported: bool,
}

/// Per-backend variant data.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Model name.
    pub name: String,
    /// Sensor width in pixels.
    pub max_width: u32,
    /// Sensor height in pixels.
    pub max_height: u32,
    /// Pixel pitch in micrometres.
    pub pixel_size_um: f64,
    /// ADC bit depth.
    pub bit_depth: u8,
    /// Colour filter layout, `None` for mono sensors.
    pub bayer: Option<BayerPattern>,
    /// The camera has a regulated cooler.
    pub has_cooler: bool,
    /// The camera has an ST4 guide port.
    pub has_st4: bool,
    /// Shortest exposure the camera accepts.
    pub min_exposure_s: f64,
    /// Longest exposure the camera accepts.
    pub max_exposure_s: f64,
    /// Formats the camera can deliver.
    pub supported_formats: Vec<PixelFormat>,
    /// Symmetric bin factors, 1 included.
    pub supported_bins: Vec<u32>,
}

impl DeviceInfo {
    /// True for Bayer sensors.
    pub fn is_color(&self) -> bool {
        self.bayer.is_some()
    }

    /// Whether `format` is in [`supported_formats`](Self::supported_formats).
    pub fn supports_format(&self, format: PixelFormat) -> bool {
        self.supported_formats.contains(&format)
    }

    /// First format usable for streaming, preferring luminance over raw.
    pub fn streamable_format(&self) -> Option<PixelFormat> {
        [PixelFormat::Luma8, PixelFormat::Raw8]
            .into_iter()
            .find(|f| self.supports_format(*f))
    }
}

/// Hardware capability used by the capture core.
///
/// Implementations must be callable from two threads: the tick loop and the
/// streaming worker. Backends whose SDK is not thread-safe are wrapped in
/// [`SerializedDevice`].
pub trait DeviceIO: Send + Sync {
    /// Static capabilities, fixed at open.
    fn info(&self) -> &DeviceInfo;

    /// Every control the camera exposes.
    fn control_caps(&self) -> Result<Vec<ControlCaps>>;

    /// Arm a still exposure. `dark` keeps the shutter closed.
    fn start_exposure(&self, duration_s: f64, dark: bool) -> Result<()>;

    /// Cancel the armed exposure. Harmless when none is armed.
    fn abort_exposure(&self) -> Result<()>;

    /// Non-blocking status query.
    fn exposure_status(&self) -> Result<ExposureStatus>;

    /// Download a completed exposure into `buf` (exactly the payload length).
    fn read_frame(&self, buf: &mut [u8]) -> Result<()>;

    /// Start continuous video capture.
    fn start_video_capture(&self) -> Result<()>;

    /// Stop video. A read blocked in another thread returns within its timeout.
    fn stop_video_capture(&self) -> Result<()>;

    /// Block until a video frame arrives or `timeout` passes. A timeout is
    /// reported as [`CaptureError::ProtocolTimeout`](crate::CaptureError::ProtocolTimeout).
    fn read_video_frame(&self, buf: &mut [u8], timeout: Duration) -> Result<()>;

    /// Current value of a control.
    fn get_control(&self, id: ControlId) -> Result<ControlValue>;

    /// Write a control value, or hand it to the camera with `auto`.
    fn set_control(&self, id: ControlId, value: f64, auto: bool) -> Result<()>;

    /// Start driving the guide port in `direction`.
    fn pulse_guide_on(&self, direction: GuideDirection) -> Result<()>;

    /// Stop driving the guide port in `direction`.
    fn pulse_guide_off(&self, direction: GuideDirection) -> Result<()>;

    /// Program crop, binning and pixel format together.
    fn set_roi(&self, roi: Roi, binning: Binning, format: PixelFormat) -> Result<()>;

    /// Release the handle. Called once, after the streaming worker is joined.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared handle used by the session and its worker thread.
pub type SharedDevice = Arc<dyn DeviceIO>;

/// A camera found during enumeration, before it is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDescriptor {
    /// Backend-specific index used to open the camera.
    pub index: usize,
    /// Model name as reported by the SDK; may repeat across cameras.
    pub model: String,
}

/// Backend entry point: enumerate attached cameras and open them.
pub trait CameraProvider {
    /// Cameras currently attached.
    fn enumerate(&self) -> Result<Vec<CameraDescriptor>>;

    /// Open a camera returned by [`enumerate`](Self::enumerate).
    fn open(&self, descriptor: &CameraDescriptor) -> Result<SharedDevice>;
}

/// Longest a single video read attempt holds the access lock.
pub const VIDEO_READ_SLICE: Duration = Duration::from_millis(5);

/// Serializes every call into a device whose SDK is not thread-safe.
///
/// The access lock is separate from the stream predicate mutex so that the
/// worker never holds both. It is only ever held for one short SDK call:
/// video reads are split into attempts of at most [`VIDEO_READ_SLICE`] and
/// the lock is handed over fairly between attempts, so the tick loop waits
/// at most one slice for it.
pub struct SerializedDevice {
    inner: SharedDevice,
    access: Mutex<()>,
    /// Bumped by `stop_video_capture` to release reads in progress.
    video_stops: AtomicU64,
}

impl SerializedDevice {
    /// Wrap `inner` behind a fresh access lock.
    pub fn new(inner: SharedDevice) -> Self {
        Self {
            inner,
            access: Mutex::new(()),
            video_stops: AtomicU64::new(0),
        }
    }

    /// Wrap `inner` and return it as a shared handle.
    pub fn shared(inner: SharedDevice) -> SharedDevice {
        Arc::new(Self::new(inner))
    }
}

impl DeviceIO for SerializedDevice {
    fn info(&self) -> &DeviceInfo {
        self.inner.info()
    }

    fn control_caps(&self) -> Result<Vec<ControlCaps>> {
        let _access = self.access.lock();
        self.inner.control_caps()
    }

    fn start_exposure(&self, duration_s: f64, dark: bool) -> Result<()> {
        let _access = self.access.lock();
        self.inner.start_exposure(duration_s, dark)
    }

    fn abort_exposure(&self) -> Result<()> {
        let _access = self.access.lock();
        self.inner.abort_exposure()
    }

    fn exposure_status(&self) -> Result<ExposureStatus> {
        let _access = self.access.lock();
        self.inner.exposure_status()
    }

    fn read_frame(&self, buf: &mut [u8]) -> Result<()> {
        let _access = self.access.lock();
        self.inner.read_frame(buf)
    }

    fn start_video_capture(&self) -> Result<()> {
        let _access = self.access.lock();
        self.inner.start_video_capture()
    }

    fn stop_video_capture(&self) -> Result<()> {
        self.video_stops.fetch_add(1, Ordering::AcqRel);
        let _access = self.access.lock();
        self.inner.stop_video_capture()
    }

    fn read_video_frame(&self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let stops = self.video_stops.load(Ordering::Acquire);
        loop {
            let slice = deadline
                .saturating_duration_since(Instant::now())
                .min(VIDEO_READ_SLICE);
            let access = self.access.lock();
            let result = self.inner.read_video_frame(buf, slice);
            MutexGuard::unlock_fair(access);

            match result {
                Err(CaptureError::ProtocolTimeout { .. }) => {
                    let stopped = self.video_stops.load(Ordering::Acquire) != stops;
                    if stopped || Instant::now() >= deadline {
                        return Err(CaptureError::ProtocolTimeout {
                            operation: "read_video_frame",
                            waited_ms: timeout.as_millis() as u64,
                        });
                    }
                }
                other => return other,
            }
        }
    }

    fn get_control(&self, id: ControlId) -> Result<ControlValue> {
        let _access = self.access.lock();
        self.inner.get_control(id)
    }

    fn set_control(&self, id: ControlId, value: f64, auto: bool) -> Result<()> {
        let _access = self.access.lock();
        self.inner.set_control(id, value, auto)
    }

    fn pulse_guide_on(&self, direction: GuideDirection) -> Result<()> {
        let _access = self.access.lock();
        self.inner.pulse_guide_on(direction)
    }

    fn pulse_guide_off(&self, direction: GuideDirection) -> Result<()> {
        let _access = self.access.lock();
        self.inner.pulse_guide_off(direction)
    }

    fn set_roi(&self, roi: Roi, binning: Binning, format: PixelFormat) -> Result<()> {
        let _access = self.access.lock();
        self.inner.set_roi(roi, binning, format)
    }

    fn close(&self) -> Result<()> {
        let _access = self.access.lock();
        self.inner.close()
    }
}

//! Core types for CCD acquisition.
//!
//! This crate holds the vocabulary shared by the capture core, device
//! backends and the driver host:
//!
//! - [`error`]: the [`CaptureError`] taxonomy
//! - [`device`]: the [`DeviceIO`] capability and its value types
//! - [`frame`]: frame geometry and pixel storage
//! - [`config`]: layered [`CaptureConfig`] loading
//! - [`events`]: session notifications and sinks

pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod frame;

pub use config::{CaptureConfig, ConfigError};
pub use device::{
    BayerPattern, CameraDescriptor, CameraProvider, ControlCaps, ControlId, ControlValue,
    DeviceIO, DeviceInfo, ExposureStatus, FrameKind, GuideAxis, GuideDirection, PixelFormat,
    SerializedDevice, SharedDevice,
};
pub use error::{CaptureError, ErrorKind, Result};
pub use events::{EventLog, EventSink, SessionEvent, TemperatureReport, TemperatureStatus};
pub use frame::{
    frame_buffer_size, Binning, ChannelOrder, FrameBuffer, FrameLayout, Roi, StreamFrame,
    DEFAULT_SAFETY_MARGIN,
};

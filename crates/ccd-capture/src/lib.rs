//! Acquisition core for astronomy CCD cameras.
//!
//! One [`CaptureSession`] per connected camera, driven by a periodic tick
//! from the host:
//!
//! - exposures run as a polled state machine inside the tick
//!   ([`components::exposure`])
//! - live video runs on one dedicated thread per camera
//!   ([`components::worker`])
//! - guide pulses use owned, cancellable timers ([`components::guide`])
//! - the cooler is regulated from the tick ([`components::temperature`])
//!
//! [`CameraRegistry`] owns every session of the process.
//!
//! # Example
//!
//! ```rust,ignore
//! use ccd_capture::CameraRegistry;
//! use ccd_core::{CaptureConfig, EventLog};
//! use std::sync::Arc;
//!
//! let config = CaptureConfig::default();
//! let events = Arc::new(EventLog::new());
//! let mut registry = CameraRegistry::discover(&provider, &config, events.clone())?;
//! registry.tick_all();
//! ```

pub mod components;
pub mod registry;
pub mod session;

pub use components::exposure::{ExposureRequest, ExposureState};
pub use components::guide::PulseState;
pub use components::temperature::{SetpointOutcome, TemperatureControlState};
pub use components::worker::{CaptureThreadState, StreamStats};
pub use registry::{unique_name, CameraRegistry};
pub use session::CaptureSession;

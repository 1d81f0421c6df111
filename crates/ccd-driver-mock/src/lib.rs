//! Simulated camera backend.
//!
//! Provides [`MockCamera`], a [`DeviceIO`](ccd_core::DeviceIO)
//! implementation used by tests and by the host binary when no hardware is
//! attached, and [`MockProvider`] to enumerate a set of them.
//!
//! # Example
//!
//! ```rust,ignore
//! use ccd_driver_mock::{MockCamera, MockMode};
//!
//! let camera = MockCamera::builder()
//!     .resolution(1280, 960)
//!     .mode(MockMode::Realistic)
//!     .build();
//! ```

pub mod common;
pub mod mock_camera;
pub mod pattern;
pub mod provider;

pub use common::{ErrorConfig, ErrorScenario, InjectedFault, MockMode, MockRng};
pub use mock_camera::{DeviceCall, MockCamera, MockCameraBuilder, TemperatureSimulation};
pub use provider::MockProvider;

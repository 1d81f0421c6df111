//! Enumeration of simulated cameras for the driver host.

use crate::mock_camera::{MockCamera, MockCameraBuilder};
use ccd_core::{CameraDescriptor, CameraProvider, CaptureError, Result, SharedDevice};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Presents a fixed list of simulated cameras as if they were attached.
#[derive(Debug, Default)]
pub struct MockProvider {
    cameras: Vec<MockCameraBuilder>,
    opened: Mutex<Vec<Arc<MockCamera>>>,
}

impl MockProvider {
    /// One camera per builder, enumerated in order.
    pub fn new(cameras: Vec<MockCameraBuilder>) -> Self {
        Self {
            cameras,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// `count` cameras built from the same template (same model name).
    pub fn identical(count: usize, template: MockCameraBuilder) -> Self {
        Self::new(vec![template; count])
    }

    /// Cameras opened so far, in open order, for inspection.
    pub fn opened(&self) -> Vec<Arc<MockCamera>> {
        self.opened.lock().clone()
    }
}

impl CameraProvider for MockProvider {
    fn enumerate(&self) -> Result<Vec<CameraDescriptor>> {
        Ok(self
            .cameras
            .iter()
            .enumerate()
            .map(|(index, builder)| CameraDescriptor {
                index,
                model: builder.build_info().name,
            })
            .collect())
    }

    fn open(&self, descriptor: &CameraDescriptor) -> Result<SharedDevice> {
        let builder = self.cameras.get(descriptor.index).ok_or_else(|| {
            CaptureError::configuration(format!("no mock camera at index {}", descriptor.index))
        })?;
        let camera = Arc::new(builder.clone().build());
        debug!(index = descriptor.index, model = %descriptor.model, "MockProvider: opened camera");
        self.opened.lock().push(camera.clone());
        Ok(camera)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerate_and_open() {
        let provider = MockProvider::new(vec![
            MockCameraBuilder::new(64, 48).name("ZWO ASI120MM"),
            MockCameraBuilder::new(64, 48).name("Atik 414EX"),
        ]);
        let found = provider.enumerate().unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].model, "Atik 414EX");

        let device = provider.open(&found[1]).unwrap();
        assert_eq!(device.info().name, "Atik 414EX");
        assert_eq!(provider.opened().len(), 1);
    }

    #[test]
    fn test_open_unknown_index() {
        let provider = MockProvider::identical(1, MockCameraBuilder::default());
        let bogus = CameraDescriptor {
            index: 5,
            model: "Mock CCD".into(),
        };
        assert!(provider.open(&bogus).is_err());
    }
}

//! Process-level table of connected cameras.
//!
//! The host builds one registry at startup and drops it (or calls
//! [`CameraRegistry::shutdown`]) at exit; sessions are torn down in
//! discovery order.

use crate::session::CaptureSession;
use ccd_core::{CameraProvider, CaptureConfig, CaptureError, EventSink, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Name for `model` that does not collide with `taken`: the model name
/// itself, then "model 2", "model 3", ...
pub fn unique_name(model: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(model) {
        return model.to_string();
    }
    (2..)
        .map(|n| format!("{} {}", model, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| model.to_string())
}

/// Connected camera sessions, in discovery order.
#[derive(Debug, Default)]
pub struct CameraRegistry {
    sessions: Vec<CaptureSession>,
}

impl CameraRegistry {
    /// Enumerate cameras and connect up to `max_devices` of them. A camera
    /// that fails to open is logged and skipped.
    pub fn discover(
        provider: &dyn CameraProvider,
        config: &CaptureConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let descriptors = provider.enumerate()?;
        if descriptors.len() > config.max_devices {
            warn!(
                found = descriptors.len(),
                max = config.max_devices,
                "More cameras than supported, ignoring the rest"
            );
        }

        let mut registry = Self::default();
        let mut taken = HashSet::new();
        for descriptor in descriptors.iter().take(config.max_devices) {
            let name = unique_name(&descriptor.model, &taken);
            let connected = provider.open(descriptor).and_then(|device| {
                CaptureSession::connect(name.clone(), device, config.clone(), sink.clone())
            });
            match connected {
                Ok(session) => {
                    taken.insert(name);
                    registry.sessions.push(session);
                }
                Err(e) => error!(camera = %name, error = %e, "Failed to connect camera"),
            }
        }

        info!(cameras = registry.sessions.len(), "Camera discovery complete");
        Ok(registry)
    }

    /// Number of connected sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no camera connected.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Session names, in discovery order.
    pub fn names(&self) -> Vec<&str> {
        self.sessions.iter().map(CaptureSession::name).collect()
    }

    /// Session named `name`.
    pub fn get(&self, name: &str) -> Option<&CaptureSession> {
        self.sessions.iter().find(|s| s.name() == name)
    }

    /// Session named `name`, mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut CaptureSession> {
        self.sessions.iter_mut().find(|s| s.name() == name)
    }

    /// All sessions, in discovery order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut CaptureSession> {
        self.sessions.iter_mut()
    }

    /// Tick every session once.
    pub fn tick_all(&mut self) {
        for session in &mut self.sessions {
            session.tick();
        }
    }

    /// Disconnect every session in order. Every session is attempted; the
    /// first error is returned.
    pub fn shutdown(&mut self) -> Result<()> {
        let mut first_error: Option<CaptureError> = None;
        for mut session in self.sessions.drain(..) {
            if let Err(e) = session.disconnect() {
                error!(camera = %session.name(), error = %e, "Disconnect failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for CameraRegistry {
    fn drop(&mut self) {
        if self.sessions.is_empty() {
            return;
        }
        if let Err(e) = self.shutdown() {
            error!(error = %e, "Registry shutdown failed");
        }
    }
}

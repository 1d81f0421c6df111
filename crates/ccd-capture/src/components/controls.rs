//! Camera controls keyed by identity.

use ccd_core::{CaptureError, ControlCaps, ControlId, ControlValue, DeviceIO, DeviceInfo, Result};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Controls driven by the regulator or the exposure controller, not by users.
const MANAGED: [ControlId; 5] = [
    ControlId::Exposure,
    ControlId::Temperature,
    ControlId::TargetTemperature,
    ControlId::CoolerOn,
    ControlId::CoolerPower,
];

/// A user-adjustable control and its last known value.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlEntry {
    /// Range and capabilities reported by the device.
    pub caps: ControlCaps,
    /// Last value read from or written to the device.
    pub value: ControlValue,
}

/// User controls keyed by [`ControlId`], in a stable order.
#[derive(Debug, Clone, Default)]
pub struct ControlTable {
    entries: BTreeMap<ControlId, ControlEntry>,
    exposure: Option<ControlCaps>,
}

impl ControlTable {
    /// Build the table from the device's control list and current values.
    pub fn load(device: &dyn DeviceIO) -> Result<Self> {
        let mut table = Self::default();
        for caps in device.control_caps()? {
            if caps.id == ControlId::Exposure {
                table.exposure = Some(caps);
                continue;
            }
            if MANAGED.contains(&caps.id) {
                continue;
            }
            let value = device.get_control(caps.id).unwrap_or_else(|e| {
                warn!(control = %caps.id, error = %e, "Failed to read control, using default");
                ControlValue::manual(caps.default)
            });
            table.entries.insert(caps.id, ControlEntry { caps, value });
        }
        debug!(controls = table.entries.len(), "Loaded control table");
        Ok(table)
    }

    /// Entry for `id`, if the control is user-adjustable.
    pub fn get(&self, id: ControlId) -> Option<&ControlEntry> {
        self.entries.get(&id)
    }

    /// Controls in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (&ControlId, &ControlEntry)> {
        self.entries.iter()
    }

    /// Number of user controls.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the device exposes no user controls.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exposure bounds in seconds, from the exposure control when present.
    pub fn exposure_limits(&self, info: &DeviceInfo) -> (f64, f64) {
        match &self.exposure {
            Some(caps) => (caps.min, caps.max),
            None => (info.min_exposure_s, info.max_exposure_s),
        }
    }

    /// Validate against the control's caps, then write it to the device.
    /// The cached value only changes once the device accepted it.
    pub fn set(&mut self, device: &dyn DeviceIO, id: ControlId, value: f64, auto: bool) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or_else(|| CaptureError::configuration(format!("control {} is not adjustable", id)))?;
        let caps = &entry.caps;
        if !caps.writable {
            return Err(CaptureError::configuration(format!("control {} is read-only", id)));
        }
        if auto && !caps.auto_supported {
            return Err(CaptureError::configuration(format!(
                "control {} has no automatic mode",
                id
            )));
        }
        if !(caps.min..=caps.max).contains(&value) {
            return Err(CaptureError::configuration(format!(
                "{} = {} outside {}..={}",
                id, value, caps.min, caps.max
            )));
        }

        device.set_control(id, value, auto)?;
        entry.value = ControlValue { value, auto };
        debug!(control = %id, value, auto, "Control updated");
        Ok(())
    }

    /// Re-read every value. Keeps going past failures and returns the last one.
    pub fn refresh(&mut self, device: &dyn DeviceIO) -> Result<()> {
        let mut outcome = Ok(());
        for (id, entry) in self.entries.iter_mut() {
            match device.get_control(*id) {
                Ok(value) => entry.value = value,
                Err(e) => {
                    warn!(control = %id, error = %e, "Control refresh failed");
                    outcome = Err(e);
                }
            }
        }
        outcome
    }
}

//! Audio device enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

/// A capture or render device as shown to the administration layer.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    /// Position in the enumeration, used by the source-switch operation.
    pub index: usize,
    pub name: String,
    pub is_default: bool,
}

/// List capture (input) devices on the default host.
pub fn list_capture_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            if let Ok(name) = device.name() {
                let is_default = default_name.as_ref() == Some(&name);
                devices.push(DeviceInfo { index: devices.len(), name, is_default });
            }
        }
    }
    devices
}

/// List render (output) devices on the default host.
pub fn list_render_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Ok(name) = device.name() {
                let is_default = default_name.as_ref() == Some(&name);
                devices.push(DeviceInfo { index: devices.len(), name, is_default });
            }
        }
    }
    devices
}

/// Find a cpal input device by name.
pub(crate) fn find_input_device(name: &str) -> Option<cpal::Device> {
    let host = cpal::default_host();
    host.input_devices()
        .ok()?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
}

/// Find a cpal output device by name.
pub(crate) fn find_output_device(name: &str) -> Option<cpal::Device> {
    let host = cpal::default_host();
    host.output_devices()
        .ok()?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
}

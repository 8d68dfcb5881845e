//! Audio subsystem module

pub mod device;
pub mod format;
pub mod gain;
pub mod line;

pub use device::{list_capture_devices, list_render_devices, DeviceInfo};
pub use format::AudioFormat;
pub use gain::{apply_gain, capture_policy};
pub use line::{AudioGateway, CaptureLine, CpalGateway, RenderLine};

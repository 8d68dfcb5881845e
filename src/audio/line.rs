//! Capture and render lines over an abstract device gateway
//!
//! The engine never touches cpal directly; it asks an [`AudioGateway`] for
//! lines. `cpal::Stream` is not `Send`, so [`CpalGateway`] builds each
//! stream on a dedicated thread that parks until the line is dropped, and
//! bridges samples to async code through a bounded channel.

use bytes::Bytes;
use cpal::traits::{DeviceTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

use crate::audio::device::{self, DeviceInfo};
use crate::audio::format::AudioFormat;
use crate::error::AudioError;

/// Chunks buffered between a device callback and the engine.
const LINE_CHANNEL_DEPTH: usize = 64;

/// Keeps a device thread alive; stops and joins it on drop.
struct LineGuard {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for LineGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// An open capture line delivering PCM chunks.
pub struct CaptureLine {
    frames: mpsc::Receiver<Bytes>,
    _guard: Option<LineGuard>,
}

impl CaptureLine {
    /// Wrap a raw channel, with no device thread behind it. Used by
    /// in-memory gateways.
    pub fn from_channel(frames: mpsc::Receiver<Bytes>) -> Self {
        Self { frames, _guard: None }
    }

    /// Read the next chunk of captured audio. `None` signals end of
    /// stream: the device went away or the line was closed.
    pub async fn read(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }
}

/// An open render line consuming PCM chunks.
pub struct RenderLine {
    sink: mpsc::Sender<Bytes>,
    _guard: Option<LineGuard>,
}

impl RenderLine {
    /// Wrap a raw channel, with no device thread behind it. Used by
    /// in-memory gateways.
    pub fn from_channel(sink: mpsc::Sender<Bytes>) -> Self {
        Self { sink, _guard: None }
    }

    /// Queue a chunk for playback, waiting when the device is behind.
    pub async fn write(&self, chunk: Bytes) -> Result<(), AudioError> {
        self.sink.send(chunk).await.map_err(|_| AudioError::LineClosed)
    }
}

/// The engine's boundary to audio hardware.
pub trait AudioGateway: Send + Sync {
    fn capture_devices(&self) -> Vec<DeviceInfo>;
    fn render_devices(&self) -> Vec<DeviceInfo>;
    fn open_capture(&self, device: &str, format: &AudioFormat) -> Result<CaptureLine, AudioError>;
    fn open_render(&self, device: &str, format: &AudioFormat) -> Result<RenderLine, AudioError>;
    /// Cheap support probe, used where an unsupported device is skipped
    /// rather than reported.
    fn supports_render(&self, device: &str, format: &AudioFormat) -> bool;
}

/// cpal-backed gateway. Streams are opened as interleaved i16; formats
/// with other bit depths are reported unsupported.
pub struct CpalGateway;

impl CpalGateway {
    pub fn new() -> Self {
        Self
    }

    fn stream_config(format: &AudioFormat) -> Result<cpal::StreamConfig, AudioError> {
        if format.bit_depth != 16 {
            return Err(AudioError::UnsupportedFormat(format!(
                "bit depth {} (cpal gateway streams i16 only)",
                format.bit_depth
            )));
        }
        let frames = format
            .adjusted_buffer_size()
            .ok_or(AudioError::InvalidBufferSize(format.buffer_size, format.frame_size()))?
            / format.frame_size();
        Ok(cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(frames as u32),
        })
    }
}

impl Default for CpalGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioGateway for CpalGateway {
    fn capture_devices(&self) -> Vec<DeviceInfo> {
        device::list_capture_devices()
    }

    fn render_devices(&self) -> Vec<DeviceInfo> {
        device::list_render_devices()
    }

    fn open_capture(&self, device: &str, format: &AudioFormat) -> Result<CaptureLine, AudioError> {
        let config = Self::stream_config(format)?;
        let cpal_device = device::find_input_device(device)
            .ok_or_else(|| AudioError::DeviceNotFound(device.to_string()))?;

        let (tx, rx) = mpsc::channel::<Bytes>(LINE_CHANNEL_DEPTH);
        let running = Arc::new(AtomicBool::new(true));
        let running_in_thread = running.clone();
        let device_name = device.to_string();

        let handle = thread::Builder::new()
            .name(format!("capture-{}", device))
            .spawn(move || {
                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let mut bytes = Vec::with_capacity(data.len() * 2);
                        for sample in data {
                            bytes.extend_from_slice(&sample.to_le_bytes());
                        }
                        // Dropping a chunk on a full queue beats stalling
                        // the device callback.
                        let _ = tx.try_send(Bytes::from(bytes));
                    },
                    move |err| {
                        tracing::warn!(device = %device_name, "capture stream error: {}", err);
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("failed to start capture stream: {}", e);
                            return;
                        }
                        while running_in_thread.load(Ordering::Relaxed) {
                            thread::sleep(std::time::Duration::from_millis(10));
                        }
                        // Stream drops here, closing the channel.
                    }
                    Err(e) => {
                        tracing::error!("failed to build capture stream: {}", e);
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        Ok(CaptureLine {
            frames: rx,
            _guard: Some(LineGuard { running, thread: Some(handle) }),
        })
    }

    fn open_render(&self, device: &str, format: &AudioFormat) -> Result<RenderLine, AudioError> {
        let config = Self::stream_config(format)?;
        let cpal_device = device::find_output_device(device)
            .ok_or_else(|| AudioError::DeviceNotFound(device.to_string()))?;

        let (tx, mut rx) = mpsc::channel::<Bytes>(LINE_CHANNEL_DEPTH);
        let running = Arc::new(AtomicBool::new(true));
        let running_in_thread = running.clone();
        let device_name = device.to_string();

        let handle = thread::Builder::new()
            .name(format!("render-{}", device))
            .spawn(move || {
                // Bytes queued for the output callback but not yet played.
                let mut pending: Vec<u8> = Vec::new();

                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        let needed = data.len() * 2;
                        while pending.len() < needed {
                            match rx.try_recv() {
                                Ok(chunk) => pending.extend_from_slice(&chunk),
                                Err(_) => break,
                            }
                        }
                        for (i, sample) in data.iter_mut().enumerate() {
                            let at = i * 2;
                            *sample = if at + 1 < pending.len() {
                                i16::from_le_bytes([pending[at], pending[at + 1]])
                            } else {
                                0 // underrun: play silence
                            };
                        }
                        let consumed = needed.min(pending.len());
                        pending.drain(..consumed);
                    },
                    move |err| {
                        tracing::warn!(device = %device_name, "render stream error: {}", err);
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("failed to start render stream: {}", e);
                            return;
                        }
                        while running_in_thread.load(Ordering::Relaxed) {
                            thread::sleep(std::time::Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to build render stream: {}", e);
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        Ok(RenderLine {
            sink: tx,
            _guard: Some(LineGuard { running, thread: Some(handle) }),
        })
    }

    fn supports_render(&self, device: &str, format: &AudioFormat) -> bool {
        if format.bit_depth != 16 {
            return false;
        }
        let Some(cpal_device) = device::find_output_device(device) else {
            return false;
        };
        let Ok(configs) = cpal_device.supported_output_configs() else {
            return false;
        };
        let rate = cpal::SampleRate(format.sample_rate);
        configs.into_iter().any(|c| {
            c.channels() == format.channels && rate >= c.min_sample_rate() && rate <= c.max_sample_rate()
        })
    }
}

//! Camera acquisition boundary.
//!
//! This module defines the contract between the texture provider and the
//! platform's media-capture facility:
//! - `MediaDevices`: "give me a user-facing camera at this resolution"
//! - `FrameStream`: a granted stream that must be started before it yields frames
//! - `DeviceLease`: RAII owner of a started stream; dropping it stops the device once
//!
//! Backends:
//! - Synthetic `stub://` devices (always available, used by tests and the preview)
//! - V4L2 devices (feature: camera-v4l2)
//!
//! Every failure is categorized as an `AcquireError` so the provider can map it
//! onto a status without inspecting backend-specific error types.

use thiserror::Error;

pub(crate) mod normalize;
pub mod stub;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

use std::str::FromStr;
use std::sync::Arc;

pub use stub::{StubDevices, StubGate, StubOutcome};
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Devices;

/// Which way the requested camera faces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Facing {
    User,
    Environment,
}

impl Facing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Facing::User => "user",
            Facing::Environment => "environment",
        }
    }
}

impl FromStr for Facing {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Facing::User),
            "environment" => Ok(Facing::Environment),
            other => Err(anyhow::anyhow!(
                "unknown camera facing '{}' (expected user|environment)",
                other
            )),
        }
    }
}

/// What the provider asks the device for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub width: u32,
    pub height: u32,
    pub facing: Facing,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            facing: Facing::User,
        }
    }
}

/// Categorized acquisition failure.
///
/// All variants are recoverable by an explicit retry.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AcquireError {
    /// The user (or the platform on their behalf) refused camera access.
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    /// No compatible device, or the runtime has no capture capability.
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),

    /// Access was granted but the stream never produced a frame.
    #[error("camera stream failed to start: {0}")]
    StreamStartFailed(String),
}

/// One decoded camera frame, normalized to tightly packed RGBA8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl CapturedFrame {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> anyhow::Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(4))
            .ok_or_else(|| anyhow::anyhow!("frame dimensions overflow"))?;
        if width == 0 || height == 0 || rgba.len() != expected {
            return Err(anyhow::anyhow!(
                "RGBA frame length mismatch: {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                rgba.len()
            ));
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }
}

/// A granted camera stream.
///
/// Streams are created, started, read and stopped on the same thread.
pub trait FrameStream {
    /// Begin producing frames.
    fn start(&mut self) -> Result<(), AcquireError>;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> anyhow::Result<CapturedFrame>;

    /// Stop the device. Calling this on a stopped stream must be harmless.
    fn stop(&mut self);
}

/// Platform media-capture facility.
pub trait MediaDevices: Send + Sync {
    /// Negotiate access to a camera matching `constraints`.
    ///
    /// May block for as long as a permission prompt is on screen.
    fn open(&self, constraints: &CaptureConstraints)
        -> Result<Box<dyn FrameStream>, AcquireError>;

    /// Human-readable name for logs.
    fn describe(&self) -> String;
}

/// Scoped ownership of a camera stream.
///
/// The device is stopped exactly once: on the first `stop()` or on drop,
/// whichever comes first.
pub struct DeviceLease {
    stream: Box<dyn FrameStream>,
    stopped: bool,
}

impl DeviceLease {
    pub fn new(stream: Box<dyn FrameStream>) -> Self {
        Self {
            stream,
            stopped: false,
        }
    }

    pub fn start(&mut self) -> Result<(), AcquireError> {
        self.stream.start()
    }

    pub fn next_frame(&mut self) -> anyhow::Result<CapturedFrame> {
        if self.stopped {
            return Err(anyhow::anyhow!("camera stream already stopped"));
        }
        self.stream.next_frame()
    }

    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.stream.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Devices for a runtime without any capture capability.
#[derive(Debug, Default)]
pub struct UnsupportedDevices {
    reason: String,
}

impl UnsupportedDevices {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl MediaDevices for UnsupportedDevices {
    fn open(
        &self,
        _constraints: &CaptureConstraints,
    ) -> Result<Box<dyn FrameStream>, AcquireError> {
        Err(AcquireError::DeviceUnavailable(self.reason.clone()))
    }

    fn describe(&self) -> String {
        format!("unsupported ({})", self.reason)
    }
}

/// Resolve a device string into a capture facility.
///
/// `stub://...` selects a synthetic device; anything else is treated as a
/// V4L2 device node when built with `camera-v4l2`.
pub fn open_devices(device: &str) -> anyhow::Result<Arc<dyn MediaDevices>> {
    if device.starts_with("stub://") {
        return Ok(Arc::new(StubDevices::from_uri(device)?));
    }
    #[cfg(feature = "camera-v4l2")]
    {
        return Ok(Arc::new(V4l2Devices::new(device)));
    }
    #[cfg(not(feature = "camera-v4l2"))]
    {
        log::warn!(
            "capture: {} requested but camera-v4l2 support is not compiled in",
            device
        );
        return Ok(Arc::new(UnsupportedDevices::new(format!(
            "no capture backend for {device}"
        ))));
    }
}

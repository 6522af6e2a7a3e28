//! V4L2 camera devices.
//!
//! `V4l2Devices` negotiates a stream from a local device node (e.g. /dev/video0):
//! - opening the node is the permission gate (EACCES/EPERM means denied)
//! - a missing node, a busy node or an unusable pixel format means unavailable
//! - failing to create the mmap buffer stream means the stream failed to start
//!
//! Frames are normalized to RGBA before they leave this module.

use anyhow::Context;
use ouroboros::self_referencing;
use std::io;

use super::normalize::{normalize_to_rgba, PixelFormat};
use super::{AcquireError, CaptureConstraints, CapturedFrame, FrameStream, MediaDevices};

const BUFFER_COUNT: u32 = 4;
const EBUSY: i32 = 16;

/// Capture facility backed by one V4L2 device node.
#[derive(Clone, Debug)]
pub struct V4l2Devices {
    path: String,
}

impl V4l2Devices {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

fn categorize_open_error(path: &str, err: &io::Error) -> AcquireError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => {
            AcquireError::PermissionDenied(format!("open {}: {}", path, err))
        }
        io::ErrorKind::NotFound => AcquireError::DeviceUnavailable(format!("no device at {}", path)),
        _ if err.raw_os_error() == Some(EBUSY) => {
            AcquireError::DeviceUnavailable(format!("{} is busy", path))
        }
        _ => AcquireError::DeviceUnavailable(format!("open {}: {}", path, err)),
    }
}

impl MediaDevices for V4l2Devices {
    fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn FrameStream>, AcquireError> {
        use v4l::video::Capture;

        // A V4L2 node is one physical camera; the path already picked it.
        log::debug!(
            "V4l2Devices: opening {} for a {}-facing request",
            self.path,
            constraints.facing.as_str()
        );
        let device = v4l::Device::with_path(&self.path)
            .map_err(|err| categorize_open_error(&self.path, &err))?;

        let mut format = device
            .format()
            .map_err(|err| AcquireError::DeviceUnavailable(format!("read format: {}", err)))?;
        format.width = constraints.width;
        format.height = constraints.height;
        format.fourcc = v4l::FourCC::new(b"YUYV");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Devices: failed to set {}x{} on {}: {}",
                    constraints.width,
                    constraints.height,
                    self.path,
                    err
                );
                device.format().map_err(|err| {
                    AcquireError::DeviceUnavailable(format!("read format after set failure: {}", err))
                })?
            }
        };

        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            AcquireError::DeviceUnavailable(format!(
                "{} only offers unsupported pixel format {}",
                self.path, format.fourcc
            ))
        })?;

        log::info!(
            "V4l2Devices: negotiated {} ({}x{} {})",
            self.path,
            format.width,
            format.height,
            format.fourcc
        );
        Ok(Box::new(V4l2Stream {
            path: self.path.clone(),
            width: format.width,
            height: format.height,
            pixel_format,
            device: Some(device),
            state: None,
        }))
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}

#[self_referencing]
struct StreamingDevice {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Stream {
    path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    /// Opened but not yet streaming.
    device: Option<v4l::Device>,
    state: Option<StreamingDevice>,
}

impl FrameStream for V4l2Stream {
    fn start(&mut self) -> Result<(), AcquireError> {
        use v4l::buffer::Type;

        let device = self.device.take().ok_or_else(|| {
            AcquireError::StreamStartFailed(format!("{} already started or stopped", self.path))
        })?;
        let state = StreamingDeviceBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
            },
        }
        .try_build()
        .map_err(|err| AcquireError::StreamStartFailed(format!("{}: {}", self.path, err)))?;
        self.state = Some(state);
        Ok(())
    }

    fn next_frame(&mut self) -> anyhow::Result<CapturedFrame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, pixel_format) = (self.width, self.height, self.pixel_format);
        let state = self.state.as_mut().context("v4l2 stream not started")?;
        let rgba = state.with_mut(|fields| -> anyhow::Result<Vec<u8>> {
            let (buf, meta) = fields.stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_to_rgba(&buf[..used], width, height, pixel_format)
        })?;
        CapturedFrame::new(width, height, rgba)
    }

    fn stop(&mut self) {
        if self.state.take().is_some() || self.device.take().is_some() {
            log::info!("V4l2Devices: stopped {}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_errors_map_onto_acquire_errors() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(
            categorize_open_error("/dev/video0", &denied),
            AcquireError::PermissionDenied(_)
        ));
        let missing = io::Error::from(io::ErrorKind::NotFound);
        assert!(matches!(
            categorize_open_error("/dev/video9", &missing),
            AcquireError::DeviceUnavailable(_)
        ));
        let busy = io::Error::from_raw_os_error(EBUSY);
        assert_eq!(
            categorize_open_error("/dev/video0", &busy),
            AcquireError::DeviceUnavailable("/dev/video0 is busy".to_string())
        );
    }

    #[test]
    fn missing_node_is_unavailable() {
        let devices = V4l2Devices::new("/dev/video-does-not-exist");
        assert!(matches!(
            devices.open(&CaptureConstraints::default()).err(),
            Some(AcquireError::DeviceUnavailable(_))
        ));
    }
}

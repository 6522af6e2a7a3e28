//! Live image source.
//!
//! `ImageSource` is the continuously updating buffer behind a camera texture.
//! The capture pump overwrites it in place; every holder of a clone sees the
//! newest frame. `version` increases with each write so renderers know when
//! to re-upload.

use std::sync::{Arc, PoisonError, RwLock};

use crate::capture::CapturedFrame;

struct ImageBuffer {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
    version: u64,
}

/// Shared handle to the newest decoded camera frame.
#[derive(Clone)]
pub struct ImageSource {
    inner: Arc<RwLock<ImageBuffer>>,
}

/// Borrowed view of the current pixels.
pub struct FrameView<'a> {
    pub width: u32,
    pub height: u32,
    pub rgba: &'a [u8],
    pub version: u64,
}

impl FrameView<'_> {
    /// RGBA texel at (x, y), row 0 being the top of the image.
    pub fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        let x = x.min(self.width - 1) as usize;
        let y = y.min(self.height - 1) as usize;
        let offset = (y * self.width as usize + x) * 4;
        [
            self.rgba[offset],
            self.rgba[offset + 1],
            self.rgba[offset + 2],
            self.rgba[offset + 3],
        ]
    }
}

impl ImageSource {
    /// Seed the source with the stream's first frame.
    pub fn new(first: CapturedFrame) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ImageBuffer {
                width: first.width,
                height: first.height,
                rgba: first.rgba,
                version: 1,
            })),
        }
    }

    /// Replace the pixel contents with a newer frame.
    ///
    /// Cameras may renegotiate their size mid-stream; the buffer follows.
    pub fn write(&self, frame: CapturedFrame) {
        let mut buffer = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        buffer.width = frame.width;
        buffer.height = frame.height;
        buffer.rgba = frame.rgba;
        buffer.version += 1;
    }

    pub fn dimensions(&self) -> (u32, u32) {
        let buffer = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        (buffer.width, buffer.height)
    }

    pub fn version(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .version
    }

    /// Run `f` against the current pixels while holding a read lock.
    pub fn with_pixels<R>(&self, f: impl FnOnce(&FrameView<'_>) -> R) -> R {
        let buffer = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let view = FrameView {
            width: buffer.width,
            height: buffer.height,
            rgba: &buffer.rgba,
            version: buffer.version,
        };
        f(&view)
    }

    /// Whether two handles point at the same live buffer.
    pub fn same_source(&self, other: &ImageSource) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (width, height) = self.dimensions();
        f.debug_struct("ImageSource")
            .field("width", &width)
            .field("height", &height)
            .field("version", &self.version())
            .finish()
    }
}

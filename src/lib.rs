//! Liquid chrome reflections
//!
//! This crate turns the user's live camera feed into an environment map for a
//! reflective "liquid chrome" surface.
//!
//! # Architecture
//!
//! Two components, data flowing one way:
//!
//! 1. **Camera texture provider** (`provider`): negotiates camera access off the
//!    render thread, wraps the live frame buffer as a mirrored, equirectangular,
//!    linearly filtered sRGB texture, and reports status.
//! 2. **Reflective surface presenter** (`presenter`): binds that texture to a
//!    chrome material, or falls back to a configurable static finish while
//!    there is no signal.
//!
//! Failures (permission denied, no device, stream never started) are reported
//! through `CameraStatus`; nothing crosses the component boundary as an error.
//!
//! # Module Structure
//!
//! - `capture`: device acquisition boundary (stub and V4L2 backends)
//! - `frame`: the live image source behind a texture
//! - `texture`: reflection texture handle and its fixed descriptor
//! - `provider`: acquisition lifecycle and status
//! - `presenter`: material binding and fallback policy
//! - `config`: file and environment configuration

pub mod capture;
pub mod config;
pub mod frame;
pub mod presenter;
pub mod provider;
pub mod texture;

pub use capture::{
    open_devices, AcquireError, CaptureConstraints, CapturedFrame, DeviceLease, Facing,
    FrameStream, MediaDevices, StubDevices, StubGate, StubOutcome, UnsupportedDevices,
};
pub use config::ChromeConfig;
pub use frame::ImageSource;
pub use presenter::{
    idle_rotation, status_caption, ChromeMaterial, EnvironmentPreset, FallbackPolicy,
    ReflectionInput, ReflectiveSurfacePresenter, RenderBranch, Rgb, TextureFeed,
};
pub use provider::{CameraStatus, CameraTextureProvider, ProviderStats};
pub use texture::{ReflectionTexture, TextureDescriptor, TextureId, TextureOrientation};

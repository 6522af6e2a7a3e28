//! Reflective surface presenter.
//!
//! The presenter turns whatever the provider currently offers into chrome
//! material parameters for the renderer. It only reads: status, texture
//! handle and revision come through `TextureFeed`, which has no way to stop
//! the camera.
//!
//! Branches:
//! - `Reflecting` while the camera is active: the reflection channel is bound
//!   to the live texture, rebinding whenever the handle changes
//! - `NoSignal` otherwise: a fallback finish chosen by `FallbackPolicy`,
//!   never a metal with nothing to reflect (which renders black)

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

use crate::provider::{CameraStatus, CameraTextureProvider};
use crate::texture::{ReflectionTexture, TextureId};

/// Read-only view of a texture provider.
pub trait TextureFeed {
    fn status(&self) -> CameraStatus;
    fn texture(&self) -> Option<&ReflectionTexture>;
    fn revision(&self) -> u64;
}

impl TextureFeed for CameraTextureProvider {
    fn status(&self) -> CameraStatus {
        CameraTextureProvider::status(self)
    }

    fn texture(&self) -> Option<&ReflectionTexture> {
        CameraTextureProvider::texture(self)
    }

    fn revision(&self) -> u64 {
        CameraTextureProvider::revision(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderBranch {
    NoSignal,
    Reflecting,
}

impl RenderBranch {
    pub fn for_status(status: CameraStatus) -> Self {
        match status {
            CameraStatus::Active => RenderBranch::Reflecting,
            CameraStatus::Idle
            | CameraStatus::Requesting
            | CameraStatus::Denied
            | CameraStatus::Unavailable
            | CameraStatus::Released => RenderBranch::NoSignal,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(0xff, 0xff, 0xff);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn is_black(&self) -> bool {
        self.r == 0 && self.g == 0 && self.b == 0
    }

    /// Linear-space components.
    pub fn to_linear(self) -> [f32; 3] {
        [
            crate::texture::srgb_to_linear(self.r),
            crate::texture::srgb_to_linear(self.g),
            crate::texture::srgb_to_linear(self.b),
        ]
    }
}

impl FromStr for Rgb {
    type Err = anyhow::Error;

    /// Parses `#rrggbb` (the `#` is optional).
    fn from_str(value: &str) -> anyhow::Result<Self> {
        let hex = value.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow!("invalid color '{}' (expected #rrggbb)", value));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16)
                .map_err(|e| anyhow!("invalid color '{}': {}", value, e))
        };
        Ok(Rgb::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Synthetic ambient environments for the fallback finish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvironmentPreset {
    City,
    Studio,
    Sunset,
    Warehouse,
}

impl EnvironmentPreset {
    /// (ground, horizon, sky) colors of the gradient dome.
    fn palette(&self) -> [Rgb; 3] {
        match self {
            EnvironmentPreset::City => [
                Rgb::new(0x3a, 0x3d, 0x44),
                Rgb::new(0xb8, 0xbf, 0xc9),
                Rgb::new(0x7d, 0x9c, 0xc4),
            ],
            EnvironmentPreset::Studio => [
                Rgb::new(0x20, 0x20, 0x22),
                Rgb::new(0xe6, 0xe6, 0xe6),
                Rgb::new(0x9a, 0x9a, 0x9e),
            ],
            EnvironmentPreset::Sunset => [
                Rgb::new(0x2b, 0x1d, 0x2e),
                Rgb::new(0xf2, 0x9e, 0x62),
                Rgb::new(0x5b, 0x4b, 0x8a),
            ],
            EnvironmentPreset::Warehouse => [
                Rgb::new(0x30, 0x2c, 0x27),
                Rgb::new(0xc9, 0xb9, 0x9a),
                Rgb::new(0x6e, 0x6a, 0x63),
            ],
        }
    }

    /// Linear radiance seen along `direction`; a smooth ground-horizon-sky dome.
    pub fn sample(&self, direction: [f32; 3]) -> [f32; 3] {
        let [ground, horizon, sky] = self.palette().map(Rgb::to_linear);
        let [x, y, z] = direction;
        let length = (x * x + y * y + z * z).sqrt();
        let elevation = if length > f32::EPSILON {
            (y / length).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let (from, to, t) = if elevation >= 0.0 {
            (horizon, sky, elevation)
        } else {
            (horizon, ground, -elevation)
        };
        [
            from[0] + (to[0] - from[0]) * t,
            from[1] + (to[1] - from[1]) * t,
            from[2] + (to[2] - from[2]) * t,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentPreset::City => "city",
            EnvironmentPreset::Studio => "studio",
            EnvironmentPreset::Sunset => "sunset",
            EnvironmentPreset::Warehouse => "warehouse",
        }
    }
}

impl FromStr for EnvironmentPreset {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "city" => Ok(EnvironmentPreset::City),
            "studio" => Ok(EnvironmentPreset::Studio),
            "sunset" => Ok(EnvironmentPreset::Sunset),
            "warehouse" => Ok(EnvironmentPreset::Warehouse),
            other => Err(anyhow!("unknown environment preset '{}'", other)),
        }
    }
}

/// What the surface shows while there is no camera signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Brushed metal in a fixed tone, lit only by the scene lights.
    FlatTone { base: Rgb },
    /// Polished chrome reflecting a synthetic environment.
    Environment { preset: EnvironmentPreset },
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        FallbackPolicy::FlatTone {
            base: Rgb::new(0xc0, 0xc0, 0xc8),
        }
    }
}

/// The material's reflection input channel.
#[derive(Clone, Debug)]
pub enum ReflectionInput {
    Camera(ReflectionTexture),
    Environment(EnvironmentPreset),
    None,
}

/// Physically based chrome parameters handed to the renderer.
#[derive(Clone, Debug)]
pub struct ChromeMaterial {
    pub base_color: Rgb,
    pub roughness: f32,
    pub metalness: f32,
    pub clearcoat: f32,
    pub clearcoat_roughness: f32,
    pub reflection_intensity: f32,
    pub reflection: ReflectionInput,
}

impl ChromeMaterial {
    fn reflecting(texture: ReflectionTexture, intensity: f32) -> Self {
        Self {
            base_color: Rgb::WHITE,
            roughness: 0.0,
            metalness: 1.0,
            clearcoat: 1.0,
            clearcoat_roughness: 0.0,
            reflection_intensity: intensity,
            reflection: ReflectionInput::Camera(texture),
        }
    }

    fn fallback(policy: FallbackPolicy, intensity: f32) -> Self {
        match policy {
            FallbackPolicy::FlatTone { base } => Self {
                base_color: base,
                roughness: 0.35,
                metalness: 0.5,
                clearcoat: 1.0,
                clearcoat_roughness: 0.1,
                reflection_intensity: 0.0,
                reflection: ReflectionInput::None,
            },
            FallbackPolicy::Environment { preset } => Self {
                base_color: Rgb::WHITE,
                roughness: 0.05,
                metalness: 1.0,
                clearcoat: 1.0,
                clearcoat_roughness: 0.0,
                reflection_intensity: intensity,
                reflection: ReflectionInput::Environment(preset),
            },
        }
    }

    /// A fully metallic surface with nothing to reflect renders black.
    pub fn is_degenerate(&self) -> bool {
        let reflects = match &self.reflection {
            ReflectionInput::Camera(texture) => !texture.is_disposed(),
            ReflectionInput::Environment(_) => true,
            ReflectionInput::None => false,
        };
        self.base_color.is_black() || (self.metalness >= 1.0 && !reflects)
    }

    pub fn bound_texture(&self) -> Option<TextureId> {
        match &self.reflection {
            ReflectionInput::Camera(texture) => Some(texture.id()),
            _ => None,
        }
    }
}

/// Keeps a chrome material in step with a texture feed.
pub struct ReflectiveSurfacePresenter {
    policy: FallbackPolicy,
    reflection_intensity: f32,
    branch: RenderBranch,
    status: CameraStatus,
    seen_revision: Option<u64>,
    material: ChromeMaterial,
}

impl ReflectiveSurfacePresenter {
    pub fn new(policy: FallbackPolicy, reflection_intensity: f32) -> Self {
        Self {
            policy,
            reflection_intensity,
            branch: RenderBranch::NoSignal,
            status: CameraStatus::Idle,
            seen_revision: None,
            material: ChromeMaterial::fallback(policy, reflection_intensity),
        }
    }

    /// Re-render against the feed if it changed since the last call.
    ///
    /// Returns true when the material was rebuilt or the observed status
    /// (and with it the caption) changed.
    pub fn sync(&mut self, feed: &dyn TextureFeed) -> bool {
        let revision = feed.revision();
        if self.seen_revision == Some(revision) {
            return false;
        }
        self.seen_revision = Some(revision);
        let status = feed.status();
        let status_changed = status != self.status;
        self.status = status;

        let texture = match self.status {
            CameraStatus::Active => feed.texture().filter(|t| !t.is_disposed()),
            _ => None,
        };
        let (branch, material) = match texture {
            Some(texture) => {
                if self.material.bound_texture() == Some(texture.id()) {
                    return status_changed;
                }
                log::debug!("ReflectiveSurfacePresenter: binding {}", texture.id());
                (
                    RenderBranch::Reflecting,
                    ChromeMaterial::reflecting(texture.clone(), self.reflection_intensity),
                )
            }
            None => {
                if self.branch == RenderBranch::NoSignal && self.material.bound_texture().is_none()
                {
                    return status_changed;
                }
                (
                    RenderBranch::NoSignal,
                    ChromeMaterial::fallback(self.policy, self.reflection_intensity),
                )
            }
        };
        if branch != self.branch {
            log::info!(
                "ReflectiveSurfacePresenter: {:?} -> {:?} (camera {})",
                self.branch,
                branch,
                self.status
            );
        }
        self.branch = branch;
        self.material = material;
        true
    }

    pub fn branch(&self) -> RenderBranch {
        self.branch
    }

    pub fn material(&self) -> &ChromeMaterial {
        &self.material
    }

    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    /// Overlay text for the last observed status.
    pub fn caption(&self) -> Option<&'static str> {
        status_caption(self.status)
    }
}

/// Permission feedback shown over the scene, derived from status alone.
pub fn status_caption(status: CameraStatus) -> Option<&'static str> {
    match status {
        CameraStatus::Idle | CameraStatus::Requesting => {
            Some("Waiting for the camera to generate reflections...")
        }
        CameraStatus::Denied => Some("Camera access was denied. Showing a static finish."),
        CameraStatus::Unavailable => Some("No camera available. Showing a static finish."),
        CameraStatus::Active | CameraStatus::Released => None,
    }
}

/// Idle sway of the button, as (x, y) rotation in radians at `elapsed_secs`.
pub fn idle_rotation(elapsed_secs: f32) -> [f32; 2] {
    [
        (elapsed_secs * 0.5).sin() * 0.1,
        (elapsed_secs * 0.3).cos() * 0.1,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CapturedFrame;
    use crate::frame::ImageSource;

    struct FakeFeed {
        status: CameraStatus,
        texture: Option<ReflectionTexture>,
        revision: u64,
    }

    impl FakeFeed {
        fn new() -> Self {
            Self {
                status: CameraStatus::Idle,
                texture: None,
                revision: 0,
            }
        }

        fn set(&mut self, status: CameraStatus) {
            self.texture = (status == CameraStatus::Active).then(texture);
            self.status = status;
            self.revision += 1;
        }
    }

    impl TextureFeed for FakeFeed {
        fn status(&self) -> CameraStatus {
            self.status
        }

        fn texture(&self) -> Option<&ReflectionTexture> {
            self.texture.as_ref()
        }

        fn revision(&self) -> u64 {
            self.revision
        }
    }

    fn texture() -> ReflectionTexture {
        let frame = CapturedFrame::new(1, 1, vec![128, 128, 128, 255]).expect("frame");
        ReflectionTexture::new(ImageSource::new(frame))
    }

    #[test]
    fn every_non_active_status_is_no_signal() {
        for status in [
            CameraStatus::Idle,
            CameraStatus::Requesting,
            CameraStatus::Denied,
            CameraStatus::Unavailable,
            CameraStatus::Released,
        ] {
            assert_eq!(RenderBranch::for_status(status), RenderBranch::NoSignal);
        }
        assert_eq!(
            RenderBranch::for_status(CameraStatus::Active),
            RenderBranch::Reflecting
        );
    }

    #[test]
    fn fallbacks_never_degenerate_to_black() {
        let policies = [
            FallbackPolicy::default(),
            FallbackPolicy::Environment {
                preset: EnvironmentPreset::Studio,
            },
        ];
        for policy in policies {
            let mut presenter = ReflectiveSurfacePresenter::new(policy, 1.2);
            let mut feed = FakeFeed::new();
            feed.set(CameraStatus::Denied);
            presenter.sync(&feed);
            assert_eq!(presenter.branch(), RenderBranch::NoSignal);
            assert!(!presenter.material().is_degenerate());
        }
    }

    #[test]
    fn binds_and_rebinds_the_camera_texture() {
        let mut presenter = ReflectiveSurfacePresenter::new(FallbackPolicy::default(), 1.2);
        let mut feed = FakeFeed::new();

        feed.set(CameraStatus::Active);
        assert!(presenter.sync(&feed));
        let first = feed.texture.as_ref().map(ReflectionTexture::id);
        assert_eq!(presenter.branch(), RenderBranch::Reflecting);
        assert_eq!(presenter.material().bound_texture(), first);
        assert_eq!(presenter.material().metalness, 1.0);
        assert_eq!(presenter.material().reflection_intensity, 1.2);

        // Same revision: nothing to do.
        assert!(!presenter.sync(&feed));

        feed.set(CameraStatus::Active);
        assert!(presenter.sync(&feed));
        let second = feed.texture.as_ref().map(ReflectionTexture::id);
        assert_ne!(first, second);
        assert_eq!(presenter.material().bound_texture(), second);
    }

    #[test]
    fn losing_the_camera_falls_back() {
        let mut presenter = ReflectiveSurfacePresenter::new(
            FallbackPolicy::Environment {
                preset: EnvironmentPreset::City,
            },
            1.0,
        );
        let mut feed = FakeFeed::new();
        feed.set(CameraStatus::Active);
        presenter.sync(&feed);
        feed.set(CameraStatus::Released);
        assert!(presenter.sync(&feed));
        assert_eq!(presenter.branch(), RenderBranch::NoSignal);
        assert!(presenter.material().bound_texture().is_none());
        assert!(matches!(
            presenter.material().reflection,
            ReflectionInput::Environment(EnvironmentPreset::City)
        ));
    }

    #[test]
    fn captions_project_status() {
        let mut presenter = ReflectiveSurfacePresenter::new(FallbackPolicy::default(), 1.2);
        assert!(presenter.caption().is_some());
        let mut feed = FakeFeed::new();
        feed.set(CameraStatus::Active);
        presenter.sync(&feed);
        assert_eq!(presenter.caption(), None);
        assert_eq!(
            status_caption(CameraStatus::Denied),
            Some("Camera access was denied. Showing a static finish.")
        );
    }

    #[test]
    fn environment_dome_brightens_toward_the_horizon() {
        let preset = EnvironmentPreset::Studio;
        let horizon = preset.sample([1.0, 0.0, 0.0]);
        let ground = preset.sample([0.0, -1.0, 0.0]);
        assert!(horizon[0] > ground[0]);
        assert!(preset.sample([0.0, 0.0, 0.0]) == horizon);
    }

    #[test]
    fn colors_parse_from_hex() {
        assert_eq!("#c0c0c8".parse::<Rgb>().unwrap(), Rgb::new(0xc0, 0xc0, 0xc8));
        assert_eq!("FFFFFF".parse::<Rgb>().unwrap(), Rgb::WHITE);
        assert!("#c0c0c".parse::<Rgb>().is_err());
        assert!("#gg0000".parse::<Rgb>().is_err());
        assert_eq!(Rgb::new(1, 2, 255).to_string(), "#0102ff");
    }

    #[test]
    fn idle_rotation_is_a_pure_function_of_time() {
        assert_eq!(idle_rotation(0.0), [0.0, 0.1]);
        assert_eq!(idle_rotation(3.7), idle_rotation(3.7));
        let [x, y] = idle_rotation(10.0);
        assert!(x.abs() <= 0.1 && y.abs() <= 0.1);
    }
}

//! Camera reflection texture.
//!
//! A `ReflectionTexture` is a live view over an `ImageSource`, not a copy.
//! Its `TextureDescriptor` is fixed when the texture is created:
//! - display-referred (sRGB) color encoding
//! - linear min/mag filtering with no mip chain
//! - equirectangular reflection mapping, mirrored horizontally about the
//!   frame's midpoint
//!
//! Only the pixel contents change afterwards. `sample` is the CPU reference
//! for how a renderer is expected to read the texture.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::frame::{FrameView, ImageSource};

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorSpace {
    Srgb,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TexelFormat {
    Rgba8,
}

/// How texture coordinates are derived at sampling time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureMapping {
    /// Mesh UVs.
    Uv,
    /// Reflected view direction projected onto a surrounding sphere.
    EquirectangularReflection,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerSettings {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub generate_mipmaps: bool,
}

/// Mapping plus the UV transform `uv' = (uv - center) * repeat + center`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureOrientation {
    pub mapping: TextureMapping,
    pub center: [f32; 2],
    pub repeat: [f32; 2],
}

impl TextureOrientation {
    pub const MIRRORED_EQUIRECTANGULAR: TextureOrientation = TextureOrientation {
        mapping: TextureMapping::EquirectangularReflection,
        center: [0.5, 0.5],
        repeat: [-1.0, 1.0],
    };

    pub fn is_mirrored(&self) -> bool {
        self.repeat[0] < 0.0
    }

    pub fn transform_uv(&self, uv: [f32; 2]) -> [f32; 2] {
        [
            (uv[0] - self.center[0]) * self.repeat[0] + self.center[0],
            (uv[1] - self.center[1]) * self.repeat[1] + self.center[1],
        ]
    }
}

/// Everything a renderer needs to configure the GPU-side texture.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureDescriptor {
    pub format: TexelFormat,
    pub color_space: ColorSpace,
    pub sampler: SamplerSettings,
    pub orientation: TextureOrientation,
}

impl TextureDescriptor {
    pub const CAMERA_REFLECTION: TextureDescriptor = TextureDescriptor {
        format: TexelFormat::Rgba8,
        color_space: ColorSpace::Srgb,
        sampler: SamplerSettings {
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            generate_mipmaps: false,
        },
        orientation: TextureOrientation::MIRRORED_EQUIRECTANGULAR,
    };
}

/// Process-unique texture identity. A new acquisition always gets a new id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

impl std::fmt::Display for TextureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

/// Handle to the camera environment map.
///
/// Clones share the same pixels and the same disposal flag. Only the provider
/// that created a texture can dispose it.
#[derive(Clone, Debug)]
pub struct ReflectionTexture {
    id: TextureId,
    descriptor: TextureDescriptor,
    source: ImageSource,
    disposed: Arc<AtomicBool>,
}

impl ReflectionTexture {
    pub(crate) fn new(source: ImageSource) -> Self {
        Self {
            id: TextureId(NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed)),
            descriptor: TextureDescriptor::CAMERA_REFLECTION,
            source,
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub fn orientation(&self) -> &TextureOrientation {
        &self.descriptor.orientation
    }

    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    /// Bumps whenever new pixel contents land; renderers re-upload on change.
    pub fn version(&self) -> u64 {
        self.source.version()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.source.dimensions()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Returns true on the call that actually disposed the texture.
    pub(crate) fn dispose(&self) -> bool {
        !self.disposed.swap(true, Ordering::AcqRel)
    }

    /// Linear RGBA at texture coordinate `uv` (v = 1 is the top row),
    /// after the orientation transform.
    pub fn sample_uv(&self, uv: [f32; 2]) -> Option<[f32; 4]> {
        if self.is_disposed() {
            return None;
        }
        let uv = self.descriptor.orientation.transform_uv(uv);
        let descriptor = self.descriptor;
        Some(
            self.source
                .with_pixels(|frame| filter(frame, uv, &descriptor)),
        )
    }

    /// Linear RGBA reflected along `direction` (need not be normalized).
    pub fn sample(&self, direction: [f32; 3]) -> Option<[f32; 4]> {
        let uv = match self.descriptor.orientation.mapping {
            TextureMapping::EquirectangularReflection => equirect_uv(direction)?,
            TextureMapping::Uv => return None,
        };
        self.sample_uv(uv)
    }
}

/// Project a direction onto equirectangular texture coordinates.
///
/// +X maps to u = 0.5, +Z to u = 0.75, straight up to v = 1.
pub fn equirect_uv(direction: [f32; 3]) -> Option<[f32; 2]> {
    let [x, y, z] = direction;
    let length = (x * x + y * y + z * z).sqrt();
    if !length.is_finite() || length <= f32::EPSILON {
        return None;
    }
    let (x, y, z) = (x / length, y / length, z / length);
    let u = z.atan2(x) / (2.0 * PI) + 0.5;
    let v = y.clamp(-1.0, 1.0).asin() / PI + 0.5;
    Some([u, v])
}

/// sRGB transfer function decode for one 8-bit channel.
pub fn srgb_to_linear(value: u8) -> f32 {
    let c = value as f32 / 255.0;
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn decode(texel: [u8; 4], color_space: ColorSpace) -> [f32; 4] {
    let alpha = texel[3] as f32 / 255.0;
    match color_space {
        ColorSpace::Srgb => [
            srgb_to_linear(texel[0]),
            srgb_to_linear(texel[1]),
            srgb_to_linear(texel[2]),
            alpha,
        ],
        ColorSpace::Linear => [
            texel[0] as f32 / 255.0,
            texel[1] as f32 / 255.0,
            texel[2] as f32 / 255.0,
            alpha,
        ],
    }
}

fn filter(frame: &FrameView<'_>, uv: [f32; 2], descriptor: &TextureDescriptor) -> [f32; 4] {
    let max_x = (frame.width - 1) as f32;
    let max_y = (frame.height - 1) as f32;
    let x = (uv[0].clamp(0.0, 1.0) * frame.width as f32 - 0.5).clamp(0.0, max_x);
    let y = ((1.0 - uv[1].clamp(0.0, 1.0)) * frame.height as f32 - 0.5).clamp(0.0, max_y);
    let color_space = descriptor.color_space;

    // No mip chain: minification and magnification share the base level.
    if descriptor.sampler.mag_filter == FilterMode::Nearest {
        return decode(frame.texel(x.round() as u32, y.round() as u32), color_space);
    }

    let (x0, y0) = (x.floor(), y.floor());
    let (tx, ty) = (x - x0, y - y0);
    let (x0, y0) = (x0 as u32, y0 as u32);
    let (x1, y1) = (x0 + 1, y0 + 1);
    let corners = [
        decode(frame.texel(x0, y0), color_space),
        decode(frame.texel(x1, y0), color_space),
        decode(frame.texel(x0, y1), color_space),
        decode(frame.texel(x1, y1), color_space),
    ];
    let mut out = [0.0f32; 4];
    for (channel, value) in out.iter_mut().enumerate() {
        let top = corners[0][channel] * (1.0 - tx) + corners[1][channel] * tx;
        let bottom = corners[2][channel] * (1.0 - tx) + corners[3][channel] * tx;
        *value = top * (1.0 - ty) + bottom * ty;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CapturedFrame;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn red_left_blue_right() -> ReflectionTexture {
        let rgba = [RED, BLUE].concat();
        let frame = CapturedFrame::new(2, 1, rgba).expect("frame");
        ReflectionTexture::new(ImageSource::new(frame))
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn descriptor_is_fixed_regardless_of_resolution() {
        let small = red_left_blue_right();
        let large = ReflectionTexture::new(ImageSource::new(
            CapturedFrame::new(640, 640, vec![0; 640 * 640 * 4]).expect("frame"),
        ));
        assert_eq!(small.descriptor(), large.descriptor());

        let descriptor = large.descriptor();
        assert_eq!(descriptor.color_space, ColorSpace::Srgb);
        assert_eq!(descriptor.sampler.min_filter, FilterMode::Linear);
        assert_eq!(descriptor.sampler.mag_filter, FilterMode::Linear);
        assert!(!descriptor.sampler.generate_mipmaps);
        assert_eq!(
            descriptor.orientation.mapping,
            TextureMapping::EquirectangularReflection
        );
        assert!(descriptor.orientation.is_mirrored());
        assert_eq!(descriptor.orientation.center, [0.5, 0.5]);
    }

    #[test]
    fn mirror_swaps_left_and_right() {
        let texture = red_left_blue_right();
        let left_edge = texture.sample_uv([0.0, 0.5]).expect("live texture");
        let right_edge = texture.sample_uv([1.0, 0.5]).expect("live texture");
        assert!(approx(left_edge[2], 1.0) && approx(left_edge[0], 0.0));
        assert!(approx(right_edge[0], 1.0) && approx(right_edge[2], 0.0));
    }

    #[test]
    fn midpoint_blends_linearly_between_texels() {
        let texture = red_left_blue_right();
        let mid = texture.sample_uv([0.5, 0.5]).expect("live texture");
        assert!(approx(mid[0], 0.5));
        assert!(approx(mid[2], 0.5));
        assert!(approx(mid[3], 1.0));
    }

    #[test]
    fn equirect_projection_of_axes() {
        let uv = equirect_uv([1.0, 0.0, 0.0]).expect("uv");
        assert!(approx(uv[0], 0.5) && approx(uv[1], 0.5));
        let uv = equirect_uv([0.0, 0.0, 2.0]).expect("uv");
        assert!(approx(uv[0], 0.75));
        let uv = equirect_uv([0.0, 3.0, 0.0]).expect("uv");
        assert!(approx(uv[1], 1.0));
        assert!(equirect_uv([0.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn reflections_follow_the_surface_normal() {
        let texture = red_left_blue_right();
        // -X lands on u = 1.0, which the mirror turns into the left (red) texel.
        let sample = texture.sample([-1.0, 0.0, 0.0]).expect("sample");
        assert!(sample[0] > 0.99);
        // +X lands on u = 0.5, halfway between both texels.
        let sample = texture.sample([1.0, 0.0, 0.0]).expect("sample");
        assert!(approx(sample[0], 0.5));
    }

    #[test]
    fn srgb_decode_darkens_midtones() {
        assert!(approx(srgb_to_linear(0), 0.0));
        assert!(approx(srgb_to_linear(255), 1.0));
        assert!((srgb_to_linear(128) - 0.2158).abs() < 1e-3);
    }

    #[test]
    fn disposal_is_shared_and_reported_once() {
        let texture = red_left_blue_right();
        let view = texture.clone();
        assert!(texture.dispose());
        assert!(!texture.dispose());
        assert!(view.is_disposed());
        assert!(view.sample_uv([0.5, 0.5]).is_none());
    }

    #[test]
    fn every_texture_gets_a_new_id() {
        assert_ne!(red_left_blue_right().id(), red_left_blue_right().id());
    }
}

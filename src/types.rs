//! Value types shared across the renderer: geometry, color, blending,
//! pixel formats, and the GPU vertex layouts.

use bytemuck::{Pod, Zeroable};

/// An axis-aligned integer rectangle in pixels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub w: i32,
    /// Height.
    pub h: i32,
}

impl Rect {
    /// Construct a rectangle from position and size.
    #[must_use]
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }
}

/// A floating-point RGBA color, each channel nominally in `[0, 1]`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FColor {
    /// Red.
    pub r: f32,
    /// Green.
    pub g: f32,
    /// Blue.
    pub b: f32,
    /// Alpha.
    pub a: f32,
}

impl FColor {
    /// Opaque white.
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);

    /// Construct a color from its channels.
    #[must_use]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Multiply the color channels (not alpha) by a scale factor, and
    /// optionally swap the red and blue channels for targets with a
    /// reversed packed component order.
    #[must_use]
    pub(crate) fn scaled(self, color_scale: f32, swap_rb: bool) -> Self {
        let mut c = Self {
            r: self.r * color_scale,
            g: self.g * color_scale,
            b: self.b * color_scale,
            a: self.a,
        };
        if swap_rb {
            core::mem::swap(&mut c.r, &mut c.b);
        }
        c
    }
}

/// Texture filtering mode for sampling.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScaleMode {
    /// Nearest-neighbor sampling.
    Nearest,
    /// Bilinear sampling.
    Linear,
    /// Sharp pixel-art upscaling via a dedicated shader variant.
    PixelArt,
}

/// Texture addressing mode outside the `[0, 1]` coordinate range.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AddressMode {
    /// Clamp to the edge texel.
    Clamp,
    /// Repeat the texture.
    Wrap,
}

/// Source/destination factor of a blend equation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlendFactor {
    /// `0`
    Zero,
    /// `1`
    One,
    /// Source color.
    SrcColor,
    /// `1 - source color`
    OneMinusSrcColor,
    /// Source alpha.
    SrcAlpha,
    /// `1 - source alpha`
    OneMinusSrcAlpha,
    /// Destination color.
    DstColor,
    /// `1 - destination color`
    OneMinusDstColor,
    /// Destination alpha.
    DstAlpha,
    /// `1 - destination alpha`
    OneMinusDstAlpha,
}

/// Operation combining the weighted source and destination terms.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlendOperation {
    /// `src + dst`
    Add,
    /// `src - dst`
    Subtract,
    /// `dst - src`
    RevSubtract,
    /// `min(src, dst)` — requires driver support.
    Minimum,
    /// `max(src, dst)` — requires driver support.
    Maximum,
}

/// A complete blend mode: separate factor/operation triples for the color
/// and alpha channels, or no blending at all.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlendMode {
    /// Blending disabled; source overwrites destination.
    None,
    /// Custom blend equation.
    Custom {
        /// Source color factor.
        src_color: BlendFactor,
        /// Destination color factor.
        dst_color: BlendFactor,
        /// Color combining operation.
        color_op: BlendOperation,
        /// Source alpha factor.
        src_alpha: BlendFactor,
        /// Destination alpha factor.
        dst_alpha: BlendFactor,
        /// Alpha combining operation.
        alpha_op: BlendOperation,
    },
}

impl BlendMode {
    /// Standard alpha blending: `dst = src * srcA + dst * (1 - srcA)`.
    pub const BLEND: Self = Self::Custom {
        src_color: BlendFactor::SrcAlpha,
        dst_color: BlendFactor::OneMinusSrcAlpha,
        color_op: BlendOperation::Add,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::OneMinusSrcAlpha,
        alpha_op: BlendOperation::Add,
    };

    /// Additive blending: `dst = src * srcA + dst`.
    pub const ADD: Self = Self::Custom {
        src_color: BlendFactor::SrcAlpha,
        dst_color: BlendFactor::One,
        color_op: BlendOperation::Add,
        src_alpha: BlendFactor::Zero,
        dst_alpha: BlendFactor::One,
        alpha_op: BlendOperation::Add,
    };
}

/// Pixel layout of a texture's backing storage.
///
/// The `32` suffixed formats are byte-order RGBA-family layouts; the rest
/// are planar or semi-planar YCbCr layouts, plus the platform-opaque
/// external format sampled through the `OES_EGL_image_external` extension.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// RGBA, 8 bits per channel in byte order R, G, B, A.
    Rgba32,
    /// BGRA, 8 bits per channel in byte order B, G, R, A.
    Bgra32,
    /// RGBX: like RGBA but the fourth byte is ignored (opaque).
    Rgbx32,
    /// BGRX: like BGRA but the fourth byte is ignored (opaque).
    Bgrx32,
    /// Planar YCbCr with the U plane before the V plane.
    Iyuv,
    /// Planar YCbCr with the V plane before the U plane.
    Yv12,
    /// Semi-planar YCbCr with an interleaved UV plane.
    Nv12,
    /// Semi-planar YCbCr with an interleaved VU plane.
    Nv21,
    /// Platform-supplied opaque texture (`GL_TEXTURE_EXTERNAL_OES`).
    ExternalOes,
}

impl PixelFormat {
    /// Bytes per pixel of the primary plane.
    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba32 | Self::Bgra32 | Self::Rgbx32 | Self::Bgrx32 => 4,
            Self::Iyuv | Self::Yv12 | Self::Nv12 | Self::Nv21 | Self::ExternalOes => 1,
        }
    }

    /// Whether this is a three-plane YCbCr format.
    #[must_use]
    pub fn is_planar_yuv(self) -> bool {
        matches!(self, Self::Iyuv | Self::Yv12)
    }

    /// Whether this is a two-plane YCbCr format.
    #[must_use]
    pub fn is_semi_planar(self) -> bool {
        matches!(self, Self::Nv12 | Self::Nv21)
    }
}

/// How a texture's pixel data may be accessed after creation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TextureAccess {
    /// Uploaded rarely, sampled often.
    Static,
    /// Updated frequently; the texture keeps a CPU-side shadow buffer for
    /// lock/unlock access.
    Streaming,
    /// Usable as a render target.
    Target,
}

/// Colorspace of a texture's pixel values.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Colorspace {
    /// sRGB; the default for RGBA-family textures.
    Srgb,
    /// BT.601 limited range (SDTV video).
    Bt601Limited,
    /// BT.601 full range (JPEG).
    Bt601Full,
    /// BT.709 limited range (HDTV video).
    Bt709Limited,
    /// BT.709 full range.
    Bt709Full,
}

/// A YCbCr-to-RGB conversion: `rgb = matrix * (yuv + offset)`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct YcbcrMatrix {
    /// Per-channel offset applied before the matrix multiply.
    pub offset: [f32; 3],
    /// Row-major 3x3 conversion matrix.
    pub matrix: [[f32; 3]; 3],
}

/// Look up the conversion for a colorspace, for 8-bit content.
///
/// Returns `None` for colorspaces with no YCbCr interpretation (e.g.
/// [`Colorspace::Srgb`]); selecting a YUV shader variant for such a
/// colorspace is a hard error, not a soft default.
#[must_use]
pub fn ycbcr_to_rgb_matrix(colorspace: Colorspace) -> Option<YcbcrMatrix> {
    const LIMITED_OFFSET: [f32; 3] = [-16.0 / 255.0, -128.0 / 255.0, -128.0 / 255.0];
    const FULL_OFFSET: [f32; 3] = [0.0, -128.0 / 255.0, -128.0 / 255.0];

    match colorspace {
        Colorspace::Srgb => None,
        Colorspace::Bt601Limited => Some(YcbcrMatrix {
            offset: LIMITED_OFFSET,
            matrix: [
                [1.1644, 0.0, 1.596],
                [1.1644, -0.3918, -0.813],
                [1.1644, 2.0172, 0.0],
            ],
        }),
        Colorspace::Bt601Full => Some(YcbcrMatrix {
            offset: FULL_OFFSET,
            matrix: [
                [1.0, 0.0, 1.402],
                [1.0, -0.344_136, -0.714_136],
                [1.0, 1.772, 0.0],
            ],
        }),
        Colorspace::Bt709Limited => Some(YcbcrMatrix {
            offset: LIMITED_OFFSET,
            matrix: [
                [1.1644, 0.0, 1.7927],
                [1.1644, -0.2132, -0.5329],
                [1.1644, 2.1124, 0.0],
            ],
        }),
        Colorspace::Bt709Full => Some(YcbcrMatrix {
            offset: FULL_OFFSET,
            matrix: [
                [1.0, 0.0, 1.5748],
                [1.0, -0.187_324, -0.468_124],
                [1.0, 1.8556, 0.0],
            ],
        }),
    }
}

/// Vertex layout for untextured draws (points, lines, solid geometry).
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct SolidVertex {
    /// Position in viewport pixels.
    pub position: [f32; 2],
    /// Vertex color, already color-scaled and channel-swapped as needed.
    pub color: [f32; 4],
}

/// Vertex layout for textured geometry draws.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct TexturedVertex {
    /// Position in viewport pixels.
    pub position: [f32; 2],
    /// Vertex color, already color-scaled and channel-swapped as needed.
    pub color: [f32; 4],
    /// Normalized texture coordinate.
    pub tex_coord: [f32; 2],
}

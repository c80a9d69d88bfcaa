//! The shader source table and per-variant compile cache.
//!
//! Every draw selects one vertex and one fragment [`ShaderVariant`]. Source
//! for a variant is assembled from an ordered list of fragments: a prologue,
//! a precision include (fragment stages only), and the body. Compilation is
//! lazy and cached; a variant that fails to compile twice (once with the
//! platform precision hint, once with precision qualifiers defined away) is
//! poisoned for the lifetime of the cache.

use crate::error::RenderError;
use crate::gl::{GlApi, ShaderId, ShaderStage};

/// A distinct shader source in the table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShaderVariant {
    /// The single vertex shader shared by all draws.
    VertexDefault,
    /// Untextured: output the interpolated vertex color.
    FragmentSolid,
    /// Texture sampled as-is (channel order matches the target).
    FragmentTextureAbgr,
    /// [`FragmentTextureAbgr`](Self::FragmentTextureAbgr) with pixel-art
    /// sharp upscaling.
    FragmentTextureAbgrPixelArt,
    /// Texture with red and blue swapped while sampling.
    FragmentTextureArgb,
    /// [`FragmentTextureArgb`](Self::FragmentTextureArgb) with pixel-art
    /// sharp upscaling.
    FragmentTextureArgbPixelArt,
    /// Texture sampled as-is with alpha forced opaque.
    FragmentTextureRgb,
    /// [`FragmentTextureRgb`](Self::FragmentTextureRgb) with pixel-art
    /// sharp upscaling.
    FragmentTextureRgbPixelArt,
    /// Texture with red/blue swapped and alpha forced opaque.
    FragmentTextureBgr,
    /// [`FragmentTextureBgr`](Self::FragmentTextureBgr) with pixel-art
    /// sharp upscaling.
    FragmentTextureBgrPixelArt,
    /// Three-plane YCbCr sampled from separate Y/U/V textures.
    FragmentTextureYuv,
    /// Two-plane YCbCr with interleaved UV chroma.
    FragmentTextureNv12,
    /// Two-plane YCbCr with interleaved VU chroma.
    FragmentTextureNv21,
    /// Platform-opaque external texture (`samplerExternalOES`).
    FragmentTextureExternalOes,
}

/// Number of variants, for the cache's fixed-slot storage.
const VARIANT_COUNT: usize = 14;

impl ShaderVariant {
    /// The pipeline stage this variant compiles for.
    #[must_use]
    pub fn stage(self) -> ShaderStage {
        match self {
            Self::VertexDefault => ShaderStage::Vertex,
            _ => ShaderStage::Fragment,
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::VertexDefault => 0,
            Self::FragmentSolid => 1,
            Self::FragmentTextureAbgr => 2,
            Self::FragmentTextureAbgrPixelArt => 3,
            Self::FragmentTextureArgb => 4,
            Self::FragmentTextureArgbPixelArt => 5,
            Self::FragmentTextureRgb => 6,
            Self::FragmentTextureRgbPixelArt => 7,
            Self::FragmentTextureBgr => 8,
            Self::FragmentTextureBgrPixelArt => 9,
            Self::FragmentTextureYuv => 10,
            Self::FragmentTextureNv12 => 11,
            Self::FragmentTextureNv21 => 12,
            Self::FragmentTextureExternalOes => 13,
        }
    }

    fn prologue(self) -> &'static str {
        match self {
            Self::FragmentTextureExternalOes => {
                "#extension GL_OES_EGL_image_external : require\n"
            }
            _ => "",
        }
    }

    fn body(self) -> &'static str {
        match self {
            Self::VertexDefault => VERTEX_DEFAULT,
            Self::FragmentSolid => FRAGMENT_SOLID,
            Self::FragmentTextureAbgr => FRAGMENT_TEXTURE_ABGR,
            Self::FragmentTextureAbgrPixelArt => FRAGMENT_TEXTURE_ABGR_PIXELART,
            Self::FragmentTextureArgb => FRAGMENT_TEXTURE_ARGB,
            Self::FragmentTextureArgbPixelArt => FRAGMENT_TEXTURE_ARGB_PIXELART,
            Self::FragmentTextureRgb => FRAGMENT_TEXTURE_RGB,
            Self::FragmentTextureRgbPixelArt => FRAGMENT_TEXTURE_RGB_PIXELART,
            Self::FragmentTextureBgr => FRAGMENT_TEXTURE_BGR,
            Self::FragmentTextureBgrPixelArt => FRAGMENT_TEXTURE_BGR_PIXELART,
            Self::FragmentTextureYuv => FRAGMENT_TEXTURE_YUV,
            Self::FragmentTextureNv12 => FRAGMENT_TEXTURE_NV12,
            Self::FragmentTextureNv21 => FRAGMENT_TEXTURE_NV21,
            Self::FragmentTextureExternalOes => FRAGMENT_TEXTURE_EXTERNAL_OES,
        }
    }
}

/// Fragment precision include for the first compile attempt: use the
/// platform's recommended float precision.
const PRECISION_PLATFORM: &str = "\
#ifdef GL_FRAGMENT_PRECISION_HIGH
precision highp float;
#else
precision mediump float;
#endif
";

/// Fallback include for the retry: some drivers reject precision
/// qualifiers entirely, so define them away.
const PRECISION_UNDEFINED: &str = "\
#define mediump
#define highp
#define lowp
";

const VERTEX_DEFAULT: &str = "\
uniform mat4 u_projection;
attribute vec2 a_position;
attribute vec4 a_color;
attribute vec2 a_texCoord;
varying vec2 v_texCoord;
varying vec4 v_color;

void main()
{
    v_texCoord = a_texCoord;
    gl_Position = u_projection * vec4(a_position, 0.0, 1.0);
    gl_PointSize = 1.0;
    v_color = a_color;
}
";

const FRAGMENT_SOLID: &str = "\
varying mediump vec4 v_color;

void main()
{
    gl_FragColor = v_color;
}
";

const FRAGMENT_TEXTURE_ABGR: &str = "\
uniform sampler2D u_texture;
varying mediump vec4 v_color;
varying mediump vec2 v_texCoord;

void main()
{
    gl_FragColor = texture2D(u_texture, v_texCoord);
    gl_FragColor *= v_color;
}
";

const FRAGMENT_TEXTURE_ARGB: &str = "\
uniform sampler2D u_texture;
varying mediump vec4 v_color;
varying mediump vec2 v_texCoord;

void main()
{
    mediump vec4 abgr = texture2D(u_texture, v_texCoord);
    gl_FragColor = abgr;
    gl_FragColor.r = abgr.b;
    gl_FragColor.b = abgr.r;
    gl_FragColor *= v_color;
}
";

const FRAGMENT_TEXTURE_RGB: &str = "\
uniform sampler2D u_texture;
varying mediump vec4 v_color;
varying mediump vec2 v_texCoord;

void main()
{
    gl_FragColor = texture2D(u_texture, v_texCoord);
    gl_FragColor.a = 1.0;
    gl_FragColor *= v_color;
}
";

const FRAGMENT_TEXTURE_BGR: &str = "\
uniform sampler2D u_texture;
varying mediump vec4 v_color;
varying mediump vec2 v_texCoord;

void main()
{
    mediump vec4 abgr = texture2D(u_texture, v_texCoord);
    gl_FragColor = abgr;
    gl_FragColor.r = abgr.b;
    gl_FragColor.b = abgr.r;
    gl_FragColor.a = 1.0;
    gl_FragColor *= v_color;
}
";

const FRAGMENT_TEXTURE_ABGR_PIXELART: &str = "\
uniform sampler2D u_texture;
uniform mediump vec4 u_texel_size;
varying mediump vec4 v_color;
varying mediump vec2 v_texCoord;

void main()
{
    mediump vec2 texel = v_texCoord * u_texel_size.zw;
    mediump vec2 base = floor(texel - 0.5) + 0.5;
    mediump vec2 offs = clamp((texel - base) * 2.0, -1.0, 1.0);
    mediump vec2 uv = (base + offs * 0.5) * u_texel_size.xy;
    gl_FragColor = texture2D(u_texture, uv);
    gl_FragColor *= v_color;
}
";

const FRAGMENT_TEXTURE_ARGB_PIXELART: &str = "\
uniform sampler2D u_texture;
uniform mediump vec4 u_texel_size;
varying mediump vec4 v_color;
varying mediump vec2 v_texCoord;

void main()
{
    mediump vec2 texel = v_texCoord * u_texel_size.zw;
    mediump vec2 base = floor(texel - 0.5) + 0.5;
    mediump vec2 offs = clamp((texel - base) * 2.0, -1.0, 1.0);
    mediump vec2 uv = (base + offs * 0.5) * u_texel_size.xy;
    mediump vec4 abgr = texture2D(u_texture, uv);
    gl_FragColor = abgr;
    gl_FragColor.r = abgr.b;
    gl_FragColor.b = abgr.r;
    gl_FragColor *= v_color;
}
";

const FRAGMENT_TEXTURE_RGB_PIXELART: &str = "\
uniform sampler2D u_texture;
uniform mediump vec4 u_texel_size;
varying mediump vec4 v_color;
varying mediump vec2 v_texCoord;

void main()
{
    mediump vec2 texel = v_texCoord * u_texel_size.zw;
    mediump vec2 base = floor(texel - 0.5) + 0.5;
    mediump vec2 offs = clamp((texel - base) * 2.0, -1.0, 1.0);
    mediump vec2 uv = (base + offs * 0.5) * u_texel_size.xy;
    gl_FragColor = texture2D(u_texture, uv);
    gl_FragColor.a = 1.0;
    gl_FragColor *= v_color;
}
";

const FRAGMENT_TEXTURE_BGR_PIXELART: &str = "\
uniform sampler2D u_texture;
uniform mediump vec4 u_texel_size;
varying mediump vec4 v_color;
varying mediump vec2 v_texCoord;

void main()
{
    mediump vec2 texel = v_texCoord * u_texel_size.zw;
    mediump vec2 base = floor(texel - 0.5) + 0.5;
    mediump vec2 offs = clamp((texel - base) * 2.0, -1.0, 1.0);
    mediump vec2 uv = (base + offs * 0.5) * u_texel_size.xy;
    mediump vec4 abgr = texture2D(u_texture, uv);
    gl_FragColor = abgr;
    gl_FragColor.r = abgr.b;
    gl_FragColor.b = abgr.r;
    gl_FragColor.a = 1.0;
    gl_FragColor *= v_color;
}
";

const FRAGMENT_TEXTURE_YUV: &str = "\
uniform sampler2D u_texture;
uniform sampler2D u_texture_u;
uniform sampler2D u_texture_v;
uniform mediump vec3 u_offset;
uniform mediump mat3 u_matrix;
varying mediump vec4 v_color;
varying mediump vec2 v_texCoord;

void main()
{
    mediump vec3 yuv;
    yuv.x = texture2D(u_texture, v_texCoord).r;
    yuv.y = texture2D(u_texture_u, v_texCoord).r;
    yuv.z = texture2D(u_texture_v, v_texCoord).r;
    gl_FragColor = vec4(u_matrix * (yuv + u_offset), 1.0);
    gl_FragColor *= v_color;
}
";

const FRAGMENT_TEXTURE_NV12: &str = "\
uniform sampler2D u_texture;
uniform sampler2D u_texture_u;
uniform mediump vec3 u_offset;
uniform mediump mat3 u_matrix;
varying mediump vec4 v_color;
varying mediump vec2 v_texCoord;

void main()
{
    mediump vec3 yuv;
    yuv.x = texture2D(u_texture, v_texCoord).r;
    yuv.yz = texture2D(u_texture_u, v_texCoord).ra;
    gl_FragColor = vec4(u_matrix * (yuv + u_offset), 1.0);
    gl_FragColor *= v_color;
}
";

const FRAGMENT_TEXTURE_NV21: &str = "\
uniform sampler2D u_texture;
uniform sampler2D u_texture_u;
uniform mediump vec3 u_offset;
uniform mediump mat3 u_matrix;
varying mediump vec4 v_color;
varying mediump vec2 v_texCoord;

void main()
{
    mediump vec3 yuv;
    yuv.x = texture2D(u_texture, v_texCoord).r;
    yuv.yz = texture2D(u_texture_u, v_texCoord).ar;
    gl_FragColor = vec4(u_matrix * (yuv + u_offset), 1.0);
    gl_FragColor *= v_color;
}
";

const FRAGMENT_TEXTURE_EXTERNAL_OES: &str = "\
uniform samplerExternalOES u_texture;
varying mediump vec4 v_color;
varying mediump vec2 v_texCoord;

void main()
{
    gl_FragColor = texture2D(u_texture, v_texCoord);
    gl_FragColor *= v_color;
}
";

#[derive(Clone, Default)]
enum Slot {
    #[default]
    Uncompiled,
    Compiled(ShaderId),
    /// Both compile attempts failed; the stored log is from the last one.
    Failed(String),
}

/// Lazily compiled, permanently cached shaders, one slot per variant.
pub struct ShaderCache {
    slots: [Slot; VARIANT_COUNT],
}

impl ShaderCache {
    /// An empty cache; nothing compiles until a variant is requested.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
        }
    }

    /// Fetch the compiled shader for `variant`, compiling on first use.
    ///
    /// # Errors
    ///
    /// [`RenderError::ShaderCompile`] if the variant failed to compile, now
    /// or on any earlier request; [`RenderError::ResourceAllocation`] if the
    /// driver cannot allocate a shader object.
    pub fn get_or_compile<G: GlApi>(
        &mut self,
        gl: &G,
        variant: ShaderVariant,
    ) -> Result<ShaderId, RenderError> {
        match &self.slots[variant.slot()] {
            Slot::Compiled(id) => return Ok(*id),
            Slot::Failed(log) => {
                return Err(RenderError::ShaderCompile {
                    variant,
                    log: log.clone(),
                })
            }
            Slot::Uncompiled => {}
        }

        match compile(gl, variant) {
            Ok(id) => {
                self.slots[variant.slot()] = Slot::Compiled(id);
                Ok(id)
            }
            Err(RenderError::ShaderCompile { variant, log }) => {
                log::error!("shader {variant:?} failed to compile: {log}");
                self.slots[variant.slot()] = Slot::Failed(log.clone());
                Err(RenderError::ShaderCompile { variant, log })
            }
            Err(other) => Err(other),
        }
    }

    /// Delete every compiled shader. The cache is unusable afterwards.
    pub fn destroy<G: GlApi>(&mut self, gl: &G) {
        for slot in &mut self.slots {
            if let Slot::Compiled(id) = slot {
                gl.delete_shader(*id);
            }
            *slot = Slot::Uncompiled;
        }
    }
}

impl Default for ShaderCache {
    fn default() -> Self {
        Self::new()
    }
}

fn compile<G: GlApi>(gl: &G, variant: ShaderVariant) -> Result<ShaderId, RenderError> {
    // First try the platform's recommended precision; some drivers choke on
    // precision qualifiers, so retry once with them defined away.
    let mut last_log = String::new();
    for include in [PRECISION_PLATFORM, PRECISION_UNDEFINED] {
        let shader = gl
            .create_shader(variant.stage())
            .map_err(RenderError::ResourceAllocation)?;
        let sources: &[&str] = match variant.stage() {
            ShaderStage::Vertex => &[variant.prologue(), variant.body()],
            ShaderStage::Fragment => &[variant.prologue(), include, variant.body()],
        };
        gl.shader_source(shader, sources);
        if gl.compile_shader(shader) {
            return Ok(shader);
        }
        last_log = gl.shader_info_log(shader);
        gl.delete_shader(shader);
        if variant.stage() == ShaderStage::Vertex {
            break;
        }
    }
    Err(RenderError::ShaderCompile {
        variant,
        log: last_log,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::testing::{Call, MockGl};

    #[test]
    fn compiles_once_and_caches() {
        let gl = MockGl::new();
        let mut cache = ShaderCache::new();
        let a = cache
            .get_or_compile(&gl, ShaderVariant::FragmentSolid)
            .unwrap();
        let b = cache
            .get_or_compile(&gl, ShaderVariant::FragmentSolid)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(gl.count(|c| matches!(c, Call::CreateShader(_))), 1);
    }

    #[test]
    fn retries_fragment_compile_with_relaxed_precision() {
        let gl = MockGl::new();
        gl.fail_compiles.set(1);
        let mut cache = ShaderCache::new();
        assert!(cache
            .get_or_compile(&gl, ShaderVariant::FragmentTextureAbgr)
            .is_ok());
        // One shader object per attempt, the failed one deleted.
        assert_eq!(gl.count(|c| matches!(c, Call::CreateShader(_))), 2);
        assert_eq!(gl.count(|c| matches!(c, Call::DeleteShader(_))), 1);
    }

    #[test]
    fn double_failure_poisons_the_variant() {
        let gl = MockGl::new();
        gl.fail_compiles.set(2);
        let mut cache = ShaderCache::new();
        let err = cache
            .get_or_compile(&gl, ShaderVariant::FragmentTextureYuv)
            .unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompile { .. }));

        // A later request fails immediately without touching the driver.
        gl.reset();
        let err = cache
            .get_or_compile(&gl, ShaderVariant::FragmentTextureYuv)
            .unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompile { .. }));
        assert_eq!(gl.count(|c| matches!(c, Call::CreateShader(_))), 0);
    }

    #[test]
    fn vertex_compile_does_not_retry() {
        let gl = MockGl::new();
        gl.fail_compiles.set(1);
        let mut cache = ShaderCache::new();
        assert!(cache
            .get_or_compile(&gl, ShaderVariant::VertexDefault)
            .is_err());
        assert_eq!(gl.count(|c| matches!(c, Call::CreateShader(_))), 1);
    }
}

//! The GPU seam: typed handles, small state enums, and the [`GlApi`] trait
//! covering exactly the GLES2 calls the engine issues.
//!
//! The renderer is generic over [`GlApi`]. In production the [`GlowGl`]
//! implementation forwards every call to [glow]; in tests a recording mock
//! stands in so state-elision and batching behavior can be asserted by
//! counting the calls that actually reach the "driver".
//!
//! [glow]: https://docs.rs/glow

use std::num::NonZeroU32;
use std::sync::Arc;

use glow::HasContext;

use crate::types::{BlendFactor, BlendOperation};

/// A compiled shader object handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderId(pub(crate) NonZeroU32);

/// A linked program object handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProgramId(pub(crate) NonZeroU32);

/// A texture object handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub(crate) NonZeroU32);

/// A framebuffer object handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub(crate) NonZeroU32);

/// A buffer object handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) NonZeroU32);

/// A resolved uniform location within a linked program.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UniformLocation(pub(crate) u32);

/// Shader pipeline stage.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    /// Vertex stage.
    Vertex,
    /// Fragment stage.
    Fragment,
}

/// Toggleable fixed-function capabilities.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Capability {
    /// Framebuffer blending.
    Blend,
    /// Scissor (clip rectangle) test.
    ScissorTest,
    /// Depth testing (always off in this renderer).
    DepthTest,
    /// Back-face culling (always off in this renderer).
    CullFace,
}

/// Primitive topology for a draw call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DrawMode {
    /// Independent points.
    Points,
    /// Independent line segments (pairs of vertices).
    Lines,
    /// A connected polyline.
    LineStrip,
    /// Independent triangles.
    Triangles,
}

/// Texture binding target.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TextureTarget {
    /// Regular 2D texture.
    Two,
    /// Platform-opaque external texture (`GL_TEXTURE_EXTERNAL_OES`).
    ExternalOes,
}

/// Texel layout of one texture plane as the driver sees it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TexelFormat {
    /// Four 8-bit channels.
    Rgba,
    /// One 8-bit channel (luma or a single chroma plane).
    Luminance,
    /// Two 8-bit channels (interleaved chroma plane).
    LuminanceAlpha,
}

/// Min/mag filtering, applied to both filters together.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FilterMode {
    /// Nearest-neighbor.
    Nearest,
    /// Bilinear.
    Linear,
}

/// Coordinate wrapping per axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WrapMode {
    /// Clamp to the edge texel.
    ClampToEdge,
    /// Repeat.
    Repeat,
}

/// The subset of GLES2 this engine drives, expressed with typed handles and
/// enums so a mock implementation can observe exactly what reaches the GPU.
///
/// All methods take `&self`, matching glow; the single-threaded ownership
/// model of the renderer provides the needed exclusivity.
pub trait GlApi {
    /// Create a shader object for the given stage.
    ///
    /// # Errors
    ///
    /// Returns the driver's message if the object cannot be allocated.
    fn create_shader(&self, stage: ShaderStage) -> Result<ShaderId, String>;
    /// Supply shader source as an ordered list of fragments.
    fn shader_source(&self, shader: ShaderId, sources: &[&str]);
    /// Compile; returns the compile status.
    fn compile_shader(&self, shader: ShaderId) -> bool;
    /// Fetch the info log after a failed compile.
    fn shader_info_log(&self, shader: ShaderId) -> String;
    /// Delete a shader object.
    fn delete_shader(&self, shader: ShaderId);

    /// Create a program object.
    ///
    /// # Errors
    ///
    /// Returns the driver's message if the object cannot be allocated.
    fn create_program(&self) -> Result<ProgramId, String>;
    /// Attach a shader to a program.
    fn attach_shader(&self, program: ProgramId, shader: ShaderId);
    /// Bind a vertex attribute index to a name, pre-link.
    fn bind_attrib_location(&self, program: ProgramId, index: u32, name: &str);
    /// Link; returns the link status.
    fn link_program(&self, program: ProgramId) -> bool;
    /// Fetch the info log after a failed link.
    fn program_info_log(&self, program: ProgramId) -> String;
    /// Delete a program object.
    fn delete_program(&self, program: ProgramId);
    /// Make a program current.
    fn use_program(&self, program: ProgramId);
    /// Resolve a uniform name; `None` means the uniform is not present in
    /// the linked program (normal, not an error).
    fn get_uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    /// Upload an `int` uniform (sampler unit bindings).
    fn uniform_1_i32(&self, location: UniformLocation, v: i32);
    /// Upload a `vec3` uniform.
    fn uniform_3_f32(&self, location: UniformLocation, x: f32, y: f32, z: f32);
    /// Upload a `vec4` uniform.
    fn uniform_4_f32(&self, location: UniformLocation, x: f32, y: f32, z: f32, w: f32);
    /// Upload a `mat3` uniform, column-major.
    fn uniform_matrix_3(&self, location: UniformLocation, values: &[f32; 9]);
    /// Upload a `mat4` uniform, column-major.
    fn uniform_matrix_4(&self, location: UniformLocation, values: &[f32; 16]);

    /// Enable a capability.
    fn enable(&self, cap: Capability);
    /// Disable a capability.
    fn disable(&self, cap: Capability);
    /// Set the viewport rectangle (GL window coordinates, bottom-up).
    fn viewport(&self, x: i32, y: i32, w: i32, h: i32);
    /// Set the scissor rectangle (GL window coordinates, bottom-up).
    fn scissor(&self, x: i32, y: i32, w: i32, h: i32);
    /// Set separate color/alpha blend factors.
    fn blend_func_separate(
        &self,
        src_color: BlendFactor,
        dst_color: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    );
    /// Set separate color/alpha blend equations.
    fn blend_equation_separate(&self, color: BlendOperation, alpha: BlendOperation);
    /// Set the color used by [`clear`](Self::clear).
    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32);
    /// Clear the color buffer.
    fn clear(&self);

    /// Create a buffer object.
    ///
    /// # Errors
    ///
    /// Returns the driver's message if the object cannot be allocated.
    fn create_buffer(&self) -> Result<BufferId, String>;
    /// Bind (or unbind) the array buffer.
    fn bind_array_buffer(&self, buffer: Option<BufferId>);
    /// Upload data to the bound array buffer with stream-draw usage.
    fn buffer_data(&self, data: &[u8]);
    /// Delete a buffer object.
    fn delete_buffer(&self, buffer: BufferId);
    /// Enable a vertex attribute array.
    fn enable_vertex_attrib_array(&self, index: u32);
    /// Disable a vertex attribute array.
    fn disable_vertex_attrib_array(&self, index: u32);
    /// Point a float vertex attribute into the bound array buffer.
    fn vertex_attrib_pointer(
        &self,
        index: u32,
        size: i32,
        normalized: bool,
        stride: i32,
        offset: i32,
    );
    /// Issue a draw call over the bound vertex state.
    fn draw_arrays(&self, mode: DrawMode, first: i32, count: i32);

    /// Create a texture object.
    ///
    /// # Errors
    ///
    /// Returns the driver's message if the object cannot be allocated.
    fn create_texture(&self) -> Result<TextureId, String>;
    /// Delete a texture object.
    fn delete_texture(&self, texture: TextureId);
    /// Select the active texture unit (0-based).
    fn active_texture(&self, unit: u32);
    /// Bind (or unbind) a texture on the active unit.
    fn bind_texture(&self, target: TextureTarget, texture: Option<TextureId>);
    /// Allocate (and optionally fill) the bound texture's level 0.
    fn tex_image_2d(
        &self,
        target: TextureTarget,
        format: TexelFormat,
        width: i32,
        height: i32,
        pixels: Option<&[u8]>,
    );
    /// Update a sub-rectangle of the bound texture. `pixels` must be
    /// tightly packed.
    #[allow(clippy::too_many_arguments)]
    fn tex_sub_image_2d(
        &self,
        target: TextureTarget,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: TexelFormat,
        pixels: &[u8],
    );
    /// Set min and mag filters of the bound texture.
    fn tex_filter(&self, target: TextureTarget, filter: FilterMode);
    /// Set S/T wrap modes of the bound texture.
    fn tex_wrap(&self, target: TextureTarget, s: WrapMode, t: WrapMode);
    /// Set the unpack row alignment for texture uploads.
    fn pixel_store_unpack_alignment(&self, alignment: i32);
    /// Set the pack row alignment for readbacks.
    fn pixel_store_pack_alignment(&self, alignment: i32);

    /// Create a framebuffer object.
    ///
    /// # Errors
    ///
    /// Returns the driver's message if the object cannot be allocated.
    fn create_framebuffer(&self) -> Result<FramebufferId, String>;
    /// Bind a framebuffer, or `None` for the default framebuffer.
    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>);
    /// Attach a texture as the bound framebuffer's color attachment 0.
    fn framebuffer_texture_2d(&self, target: TextureTarget, texture: TextureId);
    /// Whether the bound framebuffer is complete.
    fn framebuffer_complete(&self) -> bool;
    /// Delete a framebuffer object.
    fn delete_framebuffer(&self, framebuffer: FramebufferId);

    /// Whether the driver advertises an extension.
    fn extension_supported(&self, name: &str) -> bool;
    /// Poll one pending GL error, translated to its code name. `None`
    /// means no error is pending.
    fn get_error(&self) -> Option<&'static str>;
}

// Extension enums glow does not re-export.
const GL_TEXTURE_EXTERNAL_OES: u32 = 0x8D65;
const GL_MIN_EXT: u32 = 0x8007;
const GL_MAX_EXT: u32 = 0x8008;
// GLES2 single/dual channel formats, removed from desktop core profiles.
const GL_LUMINANCE: u32 = 0x1909;
const GL_LUMINANCE_ALPHA: u32 = 0x190A;

/// The production [`GlApi`] backed by a [`glow::Context`].
///
/// All raw GL calls in the crate live here.
pub struct GlowGl {
    gl: Arc<glow::Context>,
}

impl GlowGl {
    /// Wrap a glow context.
    ///
    /// # Safety
    ///
    /// The context must be valid and must be current on the calling thread
    /// whenever any renderer method is invoked; every call on this wrapper
    /// assumes so.
    #[must_use]
    pub unsafe fn new(gl: Arc<glow::Context>) -> Self {
        Self { gl }
    }
}

fn stage_to_gl(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex => glow::VERTEX_SHADER,
        ShaderStage::Fragment => glow::FRAGMENT_SHADER,
    }
}

fn cap_to_gl(cap: Capability) -> u32 {
    match cap {
        Capability::Blend => glow::BLEND,
        Capability::ScissorTest => glow::SCISSOR_TEST,
        Capability::DepthTest => glow::DEPTH_TEST,
        Capability::CullFace => glow::CULL_FACE,
    }
}

fn mode_to_gl(mode: DrawMode) -> u32 {
    match mode {
        DrawMode::Points => glow::POINTS,
        DrawMode::Lines => glow::LINES,
        DrawMode::LineStrip => glow::LINE_STRIP,
        DrawMode::Triangles => glow::TRIANGLES,
    }
}

fn target_to_gl(target: TextureTarget) -> u32 {
    match target {
        TextureTarget::Two => glow::TEXTURE_2D,
        TextureTarget::ExternalOes => GL_TEXTURE_EXTERNAL_OES,
    }
}

fn texel_format_to_gl(format: TexelFormat) -> u32 {
    match format {
        TexelFormat::Rgba => glow::RGBA,
        TexelFormat::Luminance => GL_LUMINANCE,
        TexelFormat::LuminanceAlpha => GL_LUMINANCE_ALPHA,
    }
}

fn blend_factor_to_gl(factor: BlendFactor) -> u32 {
    match factor {
        BlendFactor::Zero => glow::ZERO,
        BlendFactor::One => glow::ONE,
        BlendFactor::SrcColor => glow::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => glow::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => glow::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstColor => glow::DST_COLOR,
        BlendFactor::OneMinusDstColor => glow::ONE_MINUS_DST_COLOR,
        BlendFactor::DstAlpha => glow::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => glow::ONE_MINUS_DST_ALPHA,
    }
}

#[expect(clippy::cast_possible_wrap)]
fn wrap_to_gl(mode: WrapMode) -> i32 {
    (match mode {
        WrapMode::ClampToEdge => glow::CLAMP_TO_EDGE,
        WrapMode::Repeat => glow::REPEAT,
    }) as i32
}

fn blend_op_to_gl(op: BlendOperation) -> u32 {
    match op {
        BlendOperation::Add => glow::FUNC_ADD,
        BlendOperation::Subtract => glow::FUNC_SUBTRACT,
        BlendOperation::RevSubtract => glow::FUNC_REVERSE_SUBTRACT,
        BlendOperation::Minimum => GL_MIN_EXT,
        BlendOperation::Maximum => GL_MAX_EXT,
    }
}

fn shader_handle(id: ShaderId) -> glow::Shader {
    glow::NativeShader(id.0)
}

fn program_handle(id: ProgramId) -> glow::Program {
    glow::NativeProgram(id.0)
}

fn texture_handle(id: TextureId) -> glow::Texture {
    glow::NativeTexture(id.0)
}

impl GlApi for GlowGl {
    fn create_shader(&self, stage: ShaderStage) -> Result<ShaderId, String> {
        let shader = unsafe { self.gl.create_shader(stage_to_gl(stage)) }?;
        Ok(ShaderId(shader.0))
    }

    fn shader_source(&self, shader: ShaderId, sources: &[&str]) {
        // glow takes a single source string; the fragment list is a queue
        // convenience, so join here.
        let joined = sources.concat();
        unsafe { self.gl.shader_source(shader_handle(shader), &joined) };
    }

    fn compile_shader(&self, shader: ShaderId) -> bool {
        unsafe {
            self.gl.compile_shader(shader_handle(shader));
            self.gl.get_shader_compile_status(shader_handle(shader))
        }
    }

    fn shader_info_log(&self, shader: ShaderId) -> String {
        unsafe { self.gl.get_shader_info_log(shader_handle(shader)) }
    }

    fn delete_shader(&self, shader: ShaderId) {
        unsafe { self.gl.delete_shader(shader_handle(shader)) };
    }

    fn create_program(&self) -> Result<ProgramId, String> {
        let program = unsafe { self.gl.create_program() }?;
        Ok(ProgramId(program.0))
    }

    fn attach_shader(&self, program: ProgramId, shader: ShaderId) {
        unsafe {
            self.gl
                .attach_shader(program_handle(program), shader_handle(shader));
        }
    }

    fn bind_attrib_location(&self, program: ProgramId, index: u32, name: &str) {
        unsafe {
            self.gl
                .bind_attrib_location(program_handle(program), index, name);
        }
    }

    fn link_program(&self, program: ProgramId) -> bool {
        unsafe {
            self.gl.link_program(program_handle(program));
            self.gl.get_program_link_status(program_handle(program))
        }
    }

    fn program_info_log(&self, program: ProgramId) -> String {
        unsafe { self.gl.get_program_info_log(program_handle(program)) }
    }

    fn delete_program(&self, program: ProgramId) {
        unsafe { self.gl.delete_program(program_handle(program)) };
    }

    fn use_program(&self, program: ProgramId) {
        unsafe { self.gl.use_program(Some(program_handle(program))) };
    }

    fn get_uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let location = unsafe { self.gl.get_uniform_location(program_handle(program), name) }?;
        Some(UniformLocation(location.0))
    }

    fn uniform_1_i32(&self, location: UniformLocation, v: i32) {
        unsafe {
            self.gl
                .uniform_1_i32(Some(&glow::NativeUniformLocation(location.0)), v);
        }
    }

    fn uniform_3_f32(&self, location: UniformLocation, x: f32, y: f32, z: f32) {
        unsafe {
            self.gl
                .uniform_3_f32(Some(&glow::NativeUniformLocation(location.0)), x, y, z);
        }
    }

    fn uniform_4_f32(&self, location: UniformLocation, x: f32, y: f32, z: f32, w: f32) {
        unsafe {
            self.gl
                .uniform_4_f32(Some(&glow::NativeUniformLocation(location.0)), x, y, z, w);
        }
    }

    fn uniform_matrix_3(&self, location: UniformLocation, values: &[f32; 9]) {
        unsafe {
            self.gl.uniform_matrix_3_f32_slice(
                Some(&glow::NativeUniformLocation(location.0)),
                false,
                values,
            );
        }
    }

    fn uniform_matrix_4(&self, location: UniformLocation, values: &[f32; 16]) {
        unsafe {
            self.gl.uniform_matrix_4_f32_slice(
                Some(&glow::NativeUniformLocation(location.0)),
                false,
                values,
            );
        }
    }

    fn enable(&self, cap: Capability) {
        unsafe { self.gl.enable(cap_to_gl(cap)) };
    }

    fn disable(&self, cap: Capability) {
        unsafe { self.gl.disable(cap_to_gl(cap)) };
    }

    fn viewport(&self, x: i32, y: i32, w: i32, h: i32) {
        unsafe { self.gl.viewport(x, y, w, h) };
    }

    fn scissor(&self, x: i32, y: i32, w: i32, h: i32) {
        unsafe { self.gl.scissor(x, y, w, h) };
    }

    fn blend_func_separate(
        &self,
        src_color: BlendFactor,
        dst_color: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    ) {
        unsafe {
            self.gl.blend_func_separate(
                blend_factor_to_gl(src_color),
                blend_factor_to_gl(dst_color),
                blend_factor_to_gl(src_alpha),
                blend_factor_to_gl(dst_alpha),
            );
        }
    }

    fn blend_equation_separate(&self, color: BlendOperation, alpha: BlendOperation) {
        unsafe {
            self.gl
                .blend_equation_separate(blend_op_to_gl(color), blend_op_to_gl(alpha));
        }
    }

    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
        unsafe { self.gl.clear_color(r, g, b, a) };
    }

    fn clear(&self) {
        unsafe { self.gl.clear(glow::COLOR_BUFFER_BIT) };
    }

    fn create_buffer(&self) -> Result<BufferId, String> {
        let buffer = unsafe { self.gl.create_buffer() }?;
        Ok(BufferId(buffer.0))
    }

    fn bind_array_buffer(&self, buffer: Option<BufferId>) {
        unsafe {
            self.gl
                .bind_buffer(glow::ARRAY_BUFFER, buffer.map(|b| glow::NativeBuffer(b.0)));
        }
    }

    fn buffer_data(&self, data: &[u8]) {
        unsafe {
            self.gl
                .buffer_data_u8_slice(glow::ARRAY_BUFFER, data, glow::STREAM_DRAW);
        }
    }

    fn delete_buffer(&self, buffer: BufferId) {
        unsafe { self.gl.delete_buffer(glow::NativeBuffer(buffer.0)) };
    }

    fn enable_vertex_attrib_array(&self, index: u32) {
        unsafe { self.gl.enable_vertex_attrib_array(index) };
    }

    fn disable_vertex_attrib_array(&self, index: u32) {
        unsafe { self.gl.disable_vertex_attrib_array(index) };
    }

    fn vertex_attrib_pointer(
        &self,
        index: u32,
        size: i32,
        normalized: bool,
        stride: i32,
        offset: i32,
    ) {
        unsafe {
            self.gl
                .vertex_attrib_pointer_f32(index, size, glow::FLOAT, normalized, stride, offset);
        }
    }

    fn draw_arrays(&self, mode: DrawMode, first: i32, count: i32) {
        unsafe { self.gl.draw_arrays(mode_to_gl(mode), first, count) };
    }

    fn create_texture(&self) -> Result<TextureId, String> {
        let texture = unsafe { self.gl.create_texture() }?;
        Ok(TextureId(texture.0))
    }

    fn delete_texture(&self, texture: TextureId) {
        unsafe { self.gl.delete_texture(texture_handle(texture)) };
    }

    fn active_texture(&self, unit: u32) {
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) };
    }

    fn bind_texture(&self, target: TextureTarget, texture: Option<TextureId>) {
        unsafe {
            self.gl
                .bind_texture(target_to_gl(target), texture.map(texture_handle));
        }
    }

    fn tex_image_2d(
        &self,
        target: TextureTarget,
        format: TexelFormat,
        width: i32,
        height: i32,
        pixels: Option<&[u8]>,
    ) {
        let gl_format = texel_format_to_gl(format);
        // In ES2 the internal format must equal the client format.
        #[expect(clippy::cast_possible_wrap)]
        let internal = gl_format as i32;
        unsafe {
            self.gl.tex_image_2d(
                target_to_gl(target),
                0,
                internal,
                width,
                height,
                0,
                gl_format,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(pixels),
            );
        }
    }

    fn tex_sub_image_2d(
        &self,
        target: TextureTarget,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: TexelFormat,
        pixels: &[u8],
    ) {
        unsafe {
            self.gl.tex_sub_image_2d(
                target_to_gl(target),
                0,
                x,
                y,
                width,
                height,
                texel_format_to_gl(format),
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(pixels)),
            );
        }
    }

    fn tex_filter(&self, target: TextureTarget, filter: FilterMode) {
        let value = match filter {
            FilterMode::Nearest => glow::NEAREST,
            FilterMode::Linear => glow::LINEAR,
        };
        #[expect(clippy::cast_possible_wrap)]
        let value = value as i32;
        unsafe {
            self.gl
                .tex_parameter_i32(target_to_gl(target), glow::TEXTURE_MIN_FILTER, value);
            self.gl
                .tex_parameter_i32(target_to_gl(target), glow::TEXTURE_MAG_FILTER, value);
        }
    }

    fn tex_wrap(&self, target: TextureTarget, s: WrapMode, t: WrapMode) {
        unsafe {
            self.gl
                .tex_parameter_i32(target_to_gl(target), glow::TEXTURE_WRAP_S, wrap_to_gl(s));
            self.gl
                .tex_parameter_i32(target_to_gl(target), glow::TEXTURE_WRAP_T, wrap_to_gl(t));
        }
    }

    fn pixel_store_unpack_alignment(&self, alignment: i32) {
        unsafe {
            self.gl
                .pixel_store_i32(glow::UNPACK_ALIGNMENT, alignment);
        }
    }

    fn pixel_store_pack_alignment(&self, alignment: i32) {
        unsafe { self.gl.pixel_store_i32(glow::PACK_ALIGNMENT, alignment) };
    }

    fn create_framebuffer(&self) -> Result<FramebufferId, String> {
        let framebuffer = unsafe { self.gl.create_framebuffer() }?;
        Ok(FramebufferId(framebuffer.0))
    }

    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>) {
        unsafe {
            self.gl.bind_framebuffer(
                glow::FRAMEBUFFER,
                framebuffer.map(|f| glow::NativeFramebuffer(f.0)),
            );
        }
    }

    fn framebuffer_texture_2d(&self, target: TextureTarget, texture: TextureId) {
        unsafe {
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                target_to_gl(target),
                Some(texture_handle(texture)),
                0,
            );
        }
    }

    fn framebuffer_complete(&self) -> bool {
        unsafe { self.gl.check_framebuffer_status(glow::FRAMEBUFFER) == glow::FRAMEBUFFER_COMPLETE }
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        unsafe {
            self.gl
                .delete_framebuffer(glow::NativeFramebuffer(framebuffer.0));
        }
    }

    fn extension_supported(&self, name: &str) -> bool {
        self.gl.supported_extensions().contains(name)
    }

    fn get_error(&self) -> Option<&'static str> {
        let error = unsafe { self.gl.get_error() };
        match error {
            glow::NO_ERROR => None,
            glow::INVALID_ENUM => Some("GL_INVALID_ENUM"),
            glow::INVALID_VALUE => Some("GL_INVALID_VALUE"),
            glow::INVALID_OPERATION => Some("GL_INVALID_OPERATION"),
            glow::INVALID_FRAMEBUFFER_OPERATION => Some("GL_INVALID_FRAMEBUFFER_OPERATION"),
            glow::OUT_OF_MEMORY => Some("GL_OUT_OF_MEMORY"),
            _ => Some("UNKNOWN"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod testing {
    //! A recording [`GlApi`] for unit tests: hands out sequential handles,
    //! logs every state-changing call, and can be told to fail compiles or
    //! links.

    use std::cell::{Cell, RefCell};
    use std::num::NonZeroU32;

    use super::{
        BufferId, Capability, DrawMode, FilterMode, FramebufferId, GlApi, ProgramId, ShaderId,
        ShaderStage, TexelFormat, TextureId, TextureTarget, UniformLocation, WrapMode,
    };
    use crate::types::{BlendFactor, BlendOperation};

    /// One recorded driver call.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        CreateShader(u32),
        DeleteShader(u32),
        CreateProgram(u32),
        LinkProgram(u32),
        DeleteProgram(u32),
        UseProgram(u32),
        Uniform1i(u32, i32),
        Uniform3f(u32),
        Uniform4f(u32),
        UniformMatrix3(u32),
        UniformMatrix4(u32),
        Enable(Capability),
        Disable(Capability),
        Viewport(i32, i32, i32, i32),
        Scissor(i32, i32, i32, i32),
        BlendFuncSeparate(BlendFactor, BlendFactor, BlendFactor, BlendFactor),
        BlendEquationSeparate(BlendOperation, BlendOperation),
        ClearColor(f32, f32, f32, f32),
        Clear,
        BufferData(usize),
        EnableVertexAttribArray(u32),
        DisableVertexAttribArray(u32),
        VertexAttribPointer(u32, i32, i32),
        DrawArrays(DrawMode, i32, i32),
        CreateTexture(u32),
        DeleteTexture(u32),
        ActiveTexture(u32),
        BindTexture(TextureTarget, Option<u32>),
        TexImage2d(i32, i32, TexelFormat),
        TexSubImage2d(i32, i32, i32, i32),
        TexFilter(FilterMode),
        TexWrap(WrapMode, WrapMode),
        CreateFramebuffer(u32),
        BindFramebuffer(Option<u32>),
        FramebufferTexture2d(u32),
        DeleteFramebuffer(u32),
    }

    /// The mock driver.
    pub struct MockGl {
        pub calls: RefCell<Vec<Call>>,
        next_id: Cell<u32>,
        next_uniform: Cell<u32>,
        /// While non-zero, each compile attempt fails and decrements this.
        pub fail_compiles: Cell<u32>,
        /// While non-zero, each link attempt fails and decrements this.
        pub fail_links: Cell<u32>,
        /// Extensions the mock driver advertises.
        pub extensions: RefCell<Vec<&'static str>>,
    }

    impl MockGl {
        pub fn new() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
                next_uniform: Cell::new(0),
                fail_compiles: Cell::new(0),
                fail_links: Cell::new(0),
                extensions: RefCell::new(vec![
                    "GL_OES_EGL_image_external",
                    "GL_EXT_blend_minmax",
                ]),
            }
        }

        fn fresh_id(&self) -> NonZeroU32 {
            let id = self.next_id.get();
            self.next_id.set(id + 1);
            NonZeroU32::new(id).unwrap()
        }

        fn record(&self, call: Call) {
            self.calls.borrow_mut().push(call);
        }

        /// Count recorded calls matching a predicate.
        pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.borrow().iter().filter(|c| pred(c)).count()
        }

        /// Forget everything recorded so far.
        pub fn reset(&self) {
            self.calls.borrow_mut().clear();
        }
    }

    impl GlApi for MockGl {
        fn create_shader(&self, _stage: ShaderStage) -> Result<ShaderId, String> {
            let id = self.fresh_id();
            self.record(Call::CreateShader(id.get()));
            Ok(ShaderId(id))
        }

        fn shader_source(&self, _shader: ShaderId, _sources: &[&str]) {}

        fn compile_shader(&self, _shader: ShaderId) -> bool {
            if self.fail_compiles.get() > 0 {
                self.fail_compiles.set(self.fail_compiles.get() - 1);
                return false;
            }
            true
        }

        fn shader_info_log(&self, _shader: ShaderId) -> String {
            "mock compile log".into()
        }

        fn delete_shader(&self, shader: ShaderId) {
            self.record(Call::DeleteShader(shader.0.get()));
        }

        fn create_program(&self) -> Result<ProgramId, String> {
            let id = self.fresh_id();
            self.record(Call::CreateProgram(id.get()));
            Ok(ProgramId(id))
        }

        fn attach_shader(&self, _program: ProgramId, _shader: ShaderId) {}

        fn bind_attrib_location(&self, _program: ProgramId, _index: u32, _name: &str) {}

        fn link_program(&self, program: ProgramId) -> bool {
            self.record(Call::LinkProgram(program.0.get()));
            if self.fail_links.get() > 0 {
                self.fail_links.set(self.fail_links.get() - 1);
                return false;
            }
            true
        }

        fn program_info_log(&self, _program: ProgramId) -> String {
            "mock link log".into()
        }

        fn delete_program(&self, program: ProgramId) {
            self.record(Call::DeleteProgram(program.0.get()));
        }

        fn use_program(&self, program: ProgramId) {
            self.record(Call::UseProgram(program.0.get()));
        }

        fn get_uniform_location(
            &self,
            _program: ProgramId,
            _name: &str,
        ) -> Option<UniformLocation> {
            // Every uniform resolves; tests that need absence can extend
            // this when a concrete case arises.
            let loc = self.next_uniform.get();
            self.next_uniform.set(loc + 1);
            Some(UniformLocation(loc))
        }

        fn uniform_1_i32(&self, location: UniformLocation, v: i32) {
            self.record(Call::Uniform1i(location.0, v));
        }

        fn uniform_3_f32(&self, location: UniformLocation, _x: f32, _y: f32, _z: f32) {
            self.record(Call::Uniform3f(location.0));
        }

        fn uniform_4_f32(&self, location: UniformLocation, _x: f32, _y: f32, _z: f32, _w: f32) {
            self.record(Call::Uniform4f(location.0));
        }

        fn uniform_matrix_3(&self, location: UniformLocation, _values: &[f32; 9]) {
            self.record(Call::UniformMatrix3(location.0));
        }

        fn uniform_matrix_4(&self, location: UniformLocation, _values: &[f32; 16]) {
            self.record(Call::UniformMatrix4(location.0));
        }

        fn enable(&self, cap: Capability) {
            self.record(Call::Enable(cap));
        }

        fn disable(&self, cap: Capability) {
            self.record(Call::Disable(cap));
        }

        fn viewport(&self, x: i32, y: i32, w: i32, h: i32) {
            self.record(Call::Viewport(x, y, w, h));
        }

        fn scissor(&self, x: i32, y: i32, w: i32, h: i32) {
            self.record(Call::Scissor(x, y, w, h));
        }

        fn blend_func_separate(
            &self,
            src_color: BlendFactor,
            dst_color: BlendFactor,
            src_alpha: BlendFactor,
            dst_alpha: BlendFactor,
        ) {
            self.record(Call::BlendFuncSeparate(
                src_color, dst_color, src_alpha, dst_alpha,
            ));
        }

        fn blend_equation_separate(&self, color: BlendOperation, alpha: BlendOperation) {
            self.record(Call::BlendEquationSeparate(color, alpha));
        }

        fn clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
            self.record(Call::ClearColor(r, g, b, a));
        }

        fn clear(&self) {
            self.record(Call::Clear);
        }

        fn create_buffer(&self) -> Result<BufferId, String> {
            Ok(BufferId(self.fresh_id()))
        }

        fn bind_array_buffer(&self, _buffer: Option<BufferId>) {}

        fn buffer_data(&self, data: &[u8]) {
            self.record(Call::BufferData(data.len()));
        }

        fn delete_buffer(&self, _buffer: BufferId) {}

        fn enable_vertex_attrib_array(&self, index: u32) {
            self.record(Call::EnableVertexAttribArray(index));
        }

        fn disable_vertex_attrib_array(&self, index: u32) {
            self.record(Call::DisableVertexAttribArray(index));
        }

        fn vertex_attrib_pointer(
            &self,
            index: u32,
            size: i32,
            _normalized: bool,
            stride: i32,
            _offset: i32,
        ) {
            self.record(Call::VertexAttribPointer(index, size, stride));
        }

        fn draw_arrays(&self, mode: DrawMode, first: i32, count: i32) {
            self.record(Call::DrawArrays(mode, first, count));
        }

        fn create_texture(&self) -> Result<TextureId, String> {
            let id = self.fresh_id();
            self.record(Call::CreateTexture(id.get()));
            Ok(TextureId(id))
        }

        fn delete_texture(&self, texture: TextureId) {
            self.record(Call::DeleteTexture(texture.0.get()));
        }

        fn active_texture(&self, unit: u32) {
            self.record(Call::ActiveTexture(unit));
        }

        fn bind_texture(&self, target: TextureTarget, texture: Option<TextureId>) {
            self.record(Call::BindTexture(target, texture.map(|t| t.0.get())));
        }

        fn tex_image_2d(
            &self,
            _target: TextureTarget,
            format: TexelFormat,
            width: i32,
            height: i32,
            _pixels: Option<&[u8]>,
        ) {
            self.record(Call::TexImage2d(width, height, format));
        }

        fn tex_sub_image_2d(
            &self,
            _target: TextureTarget,
            x: i32,
            y: i32,
            width: i32,
            height: i32,
            _format: TexelFormat,
            _pixels: &[u8],
        ) {
            self.record(Call::TexSubImage2d(x, y, width, height));
        }

        fn tex_filter(&self, _target: TextureTarget, filter: FilterMode) {
            self.record(Call::TexFilter(filter));
        }

        fn tex_wrap(&self, _target: TextureTarget, s: WrapMode, t: WrapMode) {
            self.record(Call::TexWrap(s, t));
        }

        fn pixel_store_unpack_alignment(&self, _alignment: i32) {}

        fn pixel_store_pack_alignment(&self, _alignment: i32) {}

        fn create_framebuffer(&self) -> Result<FramebufferId, String> {
            let id = self.fresh_id();
            self.record(Call::CreateFramebuffer(id.get()));
            Ok(FramebufferId(id))
        }

        fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>) {
            self.record(Call::BindFramebuffer(framebuffer.map(|f| f.0.get())));
        }

        fn framebuffer_texture_2d(&self, _target: TextureTarget, texture: TextureId) {
            self.record(Call::FramebufferTexture2d(texture.0.get()));
        }

        fn framebuffer_complete(&self) -> bool {
            true
        }

        fn delete_framebuffer(&self, framebuffer: FramebufferId) {
            self.record(Call::DeleteFramebuffer(framebuffer.0.get()));
        }

        fn extension_supported(&self, name: &str) -> bool {
            self.extensions.borrow().contains(&name)
        }

        fn get_error(&self) -> Option<&'static str> {
            None
        }
    }
}

//! The renderer façade: owns the GPU resources, tracks the driver state it
//! has already applied, and executes the frame's command queue with greedy
//! batching of compatible draws.
//!
//! Nothing here issues a raw GL call; everything goes through the
//! [`GlApi`] seam, which is what the unit tests count calls on.

use std::borrow::Cow;
use std::mem;

use crate::error::RenderError;
use crate::gl::{
    BufferId, Capability, DrawMode, FilterMode, GlApi, ProgramId, TexelFormat, TextureId,
    TextureTarget, WrapMode,
};
use crate::program::{ProgramCache, Uniform, ATTRIB_COLOR, ATTRIB_POSITION, ATTRIB_TEXCOORD};
use crate::queue::{CommandQueue, DrawAttrs, DrawData, RenderCommand, VertexIndices};
use crate::shaders::{ShaderCache, ShaderVariant};
use crate::texture::{
    FramebufferList, TextureDescriptor, TextureKey, TextureResource, TextureStore,
};
use crate::types::{
    ycbcr_to_rgb_matrix, AddressMode, BlendMode, BlendOperation, FColor, PixelFormat, Rect,
    ScaleMode, SolidVertex, TextureAccess, TexturedVertex,
};

/// Per-draw uniform data tied to the selected fragment shader. Compared by
/// value when deciding whether the active program can be kept as-is.
#[derive(Clone, Debug, PartialEq)]
enum ShaderParams {
    None,
    /// `[1/w, 1/h, w, h]` for the pixel-art variants.
    TexelSize([f32; 4]),
    /// Offset and column-major 3x3 matrix for the YCbCr variants.
    Yuv { offset: [f32; 3], matrix: [f32; 9] },
}

/// The program currently bound on the driver, with the inputs that chose
/// it.
#[derive(Clone, Debug, PartialEq)]
struct ActiveProgram {
    program: ProgramId,
    fragment: ShaderVariant,
    params: ShaderParams,
}

/// Everything the renderer knows about driver state it already applied.
/// Dirty flags force reapplication on the next draw; `None` values mean
/// unknown.
struct DrawState {
    viewport: Rect,
    viewport_dirty: bool,
    cliprect: Rect,
    cliprect_dirty: bool,
    cliprect_enabled: bool,
    cliprect_enabled_dirty: bool,
    texturing: bool,
    texturing_dirty: bool,
    blend: Option<BlendMode>,
    clear_color: FColor,
    clear_color_dirty: bool,
    projection: [f32; 16],
    program: Option<ActiveProgram>,
    texture: Option<TextureKey>,
}

impl Default for DrawState {
    fn default() -> Self {
        let mut projection = [0.0; 16];
        projection[12] = -1.0;
        projection[15] = 1.0;
        Self {
            viewport: Rect::default(),
            viewport_dirty: true,
            cliprect: Rect::default(),
            cliprect_dirty: true,
            cliprect_enabled: false,
            cliprect_enabled_dirty: true,
            texturing: false,
            texturing_dirty: true,
            blend: None,
            clear_color: FColor::WHITE,
            clear_color_dirty: true,
            projection,
            program: None,
            texture: None,
        }
    }
}

/// A GLES2 render-command execution engine.
///
/// Draw requests are queued; [`flush`](Self::flush) executes the frame,
/// fusing adjacent compatible draws into single driver calls and eliding
/// every state change the driver has already seen.
pub struct Renderer<G: GlApi> {
    gl: G,
    debug: bool,
    queue: CommandQueue,
    shader_cache: ShaderCache,
    program_cache: ProgramCache,
    framebuffers: FramebufferList,
    textures: TextureStore,
    drawstate: DrawState,
    render_target: Option<TextureKey>,
    vbo: BufferId,
    drawable_width: i32,
    drawable_height: i32,
    blend_minmax_supported: bool,
    external_textures_supported: bool,
    // Current draw settings, captured into each queued draw.
    blend_mode: BlendMode,
    scale_mode: ScaleMode,
    address_u: AddressMode,
    address_v: AddressMode,
    color_scale: f32,
    destroyed: bool,
}

impl<G: GlApi> Renderer<G> {
    /// Set up a renderer on the given context: queries extensions, creates
    /// the stream vertex buffer, and forces the fixed pipeline state this
    /// engine assumes (no depth, no culling, tight pixel packing, position
    /// and color attribute arrays on).
    ///
    /// With `debug` on, GL errors are polled after resource operations and
    /// at the end of each flush.
    ///
    /// # Errors
    ///
    /// [`RenderError::ResourceAllocation`] if the vertex buffer cannot be
    /// created.
    pub fn new(gl: G, debug: bool) -> Result<Self, RenderError> {
        let blend_minmax_supported = gl.extension_supported("GL_EXT_blend_minmax");
        let external_textures_supported = gl.extension_supported("GL_OES_EGL_image_external");

        let vbo = gl
            .create_buffer()
            .map_err(RenderError::ResourceAllocation)?;
        gl.bind_array_buffer(Some(vbo));
        gl.disable(Capability::DepthTest);
        gl.disable(Capability::CullFace);
        gl.active_texture(0);
        gl.pixel_store_pack_alignment(1);
        gl.pixel_store_unpack_alignment(1);
        gl.enable_vertex_attrib_array(ATTRIB_POSITION);
        gl.enable_vertex_attrib_array(ATTRIB_COLOR);
        gl.disable_vertex_attrib_array(ATTRIB_TEXCOORD);
        gl.clear_color(1.0, 1.0, 1.0, 1.0);

        Ok(Self {
            gl,
            debug,
            queue: CommandQueue::new(),
            shader_cache: ShaderCache::new(),
            program_cache: ProgramCache::new(),
            framebuffers: FramebufferList::new(),
            textures: TextureStore::new(),
            drawstate: DrawState::default(),
            render_target: None,
            vbo,
            drawable_width: 0,
            drawable_height: 0,
            blend_minmax_supported,
            external_textures_supported,
            blend_mode: BlendMode::BLEND,
            scale_mode: ScaleMode::Linear,
            address_u: AddressMode::Clamp,
            address_v: AddressMode::Clamp,
            color_scale: 1.0,
            destroyed: false,
        })
    }

    /// Update the drawable size used for the window-coordinate Y flip.
    /// Call whenever the surface is resized.
    pub fn set_drawable_size(&mut self, width: i32, height: i32) {
        if width != self.drawable_width || height != self.drawable_height {
            self.drawable_width = width;
            self.drawable_height = height;
            self.drawstate.viewport_dirty = true;
            // The scissor Y flip is computed from the drawable height.
            self.drawstate.cliprect_dirty = true;
        }
    }

    /// Turn debug GL error polling on or off.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Set the blend mode for subsequent draws.
    ///
    /// # Errors
    ///
    /// [`RenderError::UnsupportedBlendMode`] if the driver cannot express
    /// the mode; the current mode is kept.
    pub fn set_blend_mode(&mut self, mode: BlendMode) -> Result<(), RenderError> {
        if !self.supports_blend_mode(mode) {
            return Err(RenderError::UnsupportedBlendMode);
        }
        self.blend_mode = mode;
        Ok(())
    }

    /// Set the texture filter for subsequent draws.
    pub fn set_scale_mode(&mut self, mode: ScaleMode) {
        self.scale_mode = mode;
    }

    /// Set the texture addressing modes for subsequent draws.
    pub fn set_address_mode(&mut self, u: AddressMode, v: AddressMode) {
        self.address_u = u;
        self.address_v = v;
    }

    /// Set the color-scale factor folded into queued vertex colors and
    /// clears (HDR headroom, usually `1.0`).
    pub fn set_color_scale(&mut self, scale: f32) {
        self.color_scale = scale;
    }

    /// Whether the driver can express a blend mode. Min/max combining
    /// needs `GL_EXT_blend_minmax`.
    #[must_use]
    pub fn supports_blend_mode(&self, mode: BlendMode) -> bool {
        match mode {
            BlendMode::None => true,
            BlendMode::Custom {
                color_op, alpha_op, ..
            } => {
                let minmax = |op| matches!(op, BlendOperation::Minimum | BlendOperation::Maximum);
                !(minmax(color_op) || minmax(alpha_op)) || self.blend_minmax_supported
            }
        }
    }

    // --- queueing ---------------------------------------------------------

    /// Queue a viewport change.
    pub fn set_viewport(&mut self, rect: Rect) {
        self.queue.push_viewport(rect);
    }

    /// Queue a clip rectangle change; `None` disables clipping.
    pub fn set_clip_rect(&mut self, rect: Option<Rect>) {
        self.queue.push_clip_rect(rect.is_some(), rect.unwrap_or_default());
    }

    /// Queue a clear of the current render target.
    pub fn clear(&mut self, color: FColor) {
        self.queue.push_clear(color, self.color_scale);
    }

    /// Queue a point draw.
    pub fn draw_points(&mut self, points: &[[f32; 2]], color: FColor) {
        let attrs = self.draw_attrs();
        self.queue.push_points(points, color, &attrs);
    }

    /// Queue a polyline draw through the given points.
    pub fn draw_lines(&mut self, points: &[[f32; 2]], color: FColor) {
        let attrs = self.draw_attrs();
        self.queue.push_lines(points, color, &attrs);
    }

    /// Queue a triangle-list draw, textured when `texture` is given.
    ///
    /// `positions` and `colors` run parallel; `uvs` must match them when a
    /// texture is sampled. `scale` multiplies positions at queue time.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidTexture`] if `texture` does not name a live
    /// texture.
    pub fn draw_geometry(
        &mut self,
        texture: Option<TextureKey>,
        positions: &[[f32; 2]],
        colors: &[FColor],
        uvs: &[[f32; 2]],
        indices: VertexIndices<'_>,
        scale: [f32; 2],
    ) -> Result<(), RenderError> {
        if let Some(key) = texture {
            self.textures.get(key)?;
        }
        let attrs = self.draw_attrs();
        self.queue
            .push_geometry(texture, positions, colors, uvs, indices, scale, &attrs);
        Ok(())
    }

    fn draw_attrs(&self) -> DrawAttrs {
        DrawAttrs {
            blend: self.blend_mode,
            scale_mode: self.scale_mode,
            address_u: self.address_u,
            address_v: self.address_v,
            color_scale: self.color_scale,
            swap_rb: self.target_swaps_rb(),
        }
    }

    fn target_format(&self) -> Option<PixelFormat> {
        self.render_target
            .and_then(|key| self.textures.get(key).ok())
            .map(|t| t.descriptor.format)
    }

    fn target_swaps_rb(&self) -> bool {
        matches!(
            self.target_format(),
            Some(PixelFormat::Bgra32 | PixelFormat::Bgrx32)
        )
    }

    // --- flush ------------------------------------------------------------

    /// Execute every queued command.
    ///
    /// The frame's vertex bytes are uploaded to the stream buffer in one
    /// piece, then the command list is walked once. Adjacent draws that
    /// agree on texture, filter, addressing, and blend fuse into single
    /// driver calls; adjacent 2-vertex line draws with the same blend fuse
    /// into one segment-list call.
    ///
    /// A failing draw is skipped and its error reported, but the rest of
    /// the frame still executes; the first error wins.
    ///
    /// # Errors
    ///
    /// Any [`RenderError`] raised by a draw, or [`RenderError::Gl`] from
    /// the end-of-flush debug check.
    pub fn flush(&mut self) -> Result<(), RenderError> {
        let mut commands = mem::take(&mut self.queue.commands);
        let mut vertices = mem::take(&mut self.queue.vertices);

        let mut result = Ok(());
        if !commands.is_empty() {
            self.gl.bind_array_buffer(Some(self.vbo));
            if !vertices.is_empty() {
                self.gl.buffer_data(&vertices);
            }
            result = self.run_commands(&commands);
        }

        commands.clear();
        vertices.clear();
        self.queue.commands = commands;
        self.queue.vertices = vertices;

        let check = self.check_gl_error("flush");
        if result.is_ok() {
            result = check;
        }
        result
    }

    fn run_commands(&mut self, commands: &[RenderCommand]) -> Result<(), RenderError> {
        let mut result = Ok(());
        let mut i = 0;
        while i < commands.len() {
            match &commands[i] {
                RenderCommand::SetViewport(rect) => {
                    if *rect != self.drawstate.viewport {
                        self.drawstate.viewport = *rect;
                        self.drawstate.viewport_dirty = true;
                        // The scissor rectangle is viewport-relative.
                        self.drawstate.cliprect_dirty = true;
                    }
                    i += 1;
                }
                RenderCommand::SetClipRect { enabled, rect } => {
                    if *enabled != self.drawstate.cliprect_enabled {
                        self.drawstate.cliprect_enabled = *enabled;
                        self.drawstate.cliprect_enabled_dirty = true;
                    }
                    if *rect != self.drawstate.cliprect {
                        self.drawstate.cliprect = *rect;
                        self.drawstate.cliprect_dirty = true;
                    }
                    i += 1;
                }
                RenderCommand::Clear { color, color_scale } => {
                    self.execute_clear(*color, *color_scale);
                    i += 1;
                }
                RenderCommand::DrawPoints(_) => {
                    let (merged, next) = merge_draws(commands, i, |c| match c {
                        RenderCommand::DrawPoints(d) => Some(d),
                        _ => None,
                    });
                    record(&mut result, self.draw_solid(&merged, DrawMode::Points));
                    i = next;
                }
                RenderCommand::DrawLines(data) => {
                    if data.count > 2 {
                        // A connected polyline cannot fuse with anything.
                        record(&mut result, self.draw_solid(data, DrawMode::LineStrip));
                        i += 1;
                    } else {
                        let mut merged = *data;
                        let mut j = i + 1;
                        // Only exact segments fuse; a degenerate draw would
                        // shift the pair alignment of everything after it.
                        if merged.count == 2 {
                            while let Some(RenderCommand::DrawLines(next)) = commands.get(j) {
                                if next.count == 2 && next.blend == merged.blend {
                                    merged.count += next.count;
                                    j += 1;
                                } else {
                                    break;
                                }
                            }
                        }
                        record(&mut result, self.draw_solid(&merged, DrawMode::Lines));
                        i = j;
                    }
                }
                RenderCommand::DrawGeometry(_) => {
                    let (merged, next) = merge_draws(commands, i, |c| match c {
                        RenderCommand::DrawGeometry(d) => Some(d),
                        _ => None,
                    });
                    record(&mut result, self.draw_geometry_command(&merged));
                    i = next;
                }
            }
        }
        result
    }

    fn execute_clear(&mut self, color: FColor, color_scale: f32) {
        let color = color.scaled(color_scale, self.target_swaps_rb());
        if self.drawstate.clear_color_dirty || color != self.drawstate.clear_color {
            self.gl.clear_color(color.r, color.g, color.b, color.a);
            self.drawstate.clear_color = color;
            self.drawstate.clear_color_dirty = false;
        }
        // A clear ignores the clip rectangle; scissor comes back on the
        // next draw via the dirty flag.
        if self.drawstate.cliprect_enabled || self.drawstate.cliprect_enabled_dirty {
            self.gl.disable(Capability::ScissorTest);
            self.drawstate.cliprect_enabled_dirty = self.drawstate.cliprect_enabled;
        }
        self.gl.clear();
    }

    fn draw_solid(&mut self, data: &DrawData, mode: DrawMode) -> Result<(), RenderError> {
        self.set_draw_state(data, ShaderVariant::FragmentSolid, ShaderParams::None, false)?;
        self.issue_draw(data, mode, false);
        Ok(())
    }

    fn draw_geometry_command(&mut self, data: &DrawData) -> Result<(), RenderError> {
        match data.texture {
            None => self.draw_solid(data, DrawMode::Triangles),
            Some(key) => {
                self.set_copy_state(data, key)?;
                self.issue_draw(data, DrawMode::Triangles, true);
                Ok(())
            }
        }
    }

    /// Pick the fragment shader and parameters for sampling `key` into the
    /// current target, apply the draw state, then bind the texture's
    /// planes. A format with no mapping fails before anything binds.
    fn set_copy_state(&mut self, data: &DrawData, key: TextureKey) -> Result<(), RenderError> {
        let descriptor = self.textures.get(key)?.descriptor;
        if descriptor.format == PixelFormat::ExternalOes && !self.external_textures_supported {
            return Err(RenderError::UnsupportedTextureFormat);
        }
        let fragment =
            copy_fragment_variant(descriptor.format, self.target_format(), data.scale_mode)?;
        let params = match fragment {
            ShaderVariant::FragmentTextureAbgrPixelArt
            | ShaderVariant::FragmentTextureArgbPixelArt
            | ShaderVariant::FragmentTextureRgbPixelArt
            | ShaderVariant::FragmentTextureBgrPixelArt => {
                ShaderParams::TexelSize(self.textures.get(key)?.texel_size)
            }
            ShaderVariant::FragmentTextureYuv
            | ShaderVariant::FragmentTextureNv12
            | ShaderVariant::FragmentTextureNv21 => yuv_params(descriptor.colorspace)?,
            _ => ShaderParams::None,
        };

        self.set_draw_state(data, fragment, params, true)?;

        if self.drawstate.texture != Some(key) {
            let resource = self.textures.get(key)?;
            let target = resource.target;
            if let Some(v) = resource.texture_v {
                self.gl.active_texture(2);
                self.gl.bind_texture(target, Some(v));
            }
            if let Some(u) = resource.texture_u {
                self.gl.active_texture(1);
                self.gl.bind_texture(target, Some(u));
            }
            if resource.texture_u.is_some() || resource.texture_v.is_some() {
                self.gl.active_texture(0);
            }
            self.gl.bind_texture(target, Some(resource.texture));
            self.drawstate.texture = Some(key);
        }

        // Filter and wrap state live on the texture object; reapply only
        // what this draw changes.
        let resource = self.textures.get_mut(key)?;
        if resource.applied_scale_mode != Some(data.scale_mode) {
            self.gl
                .tex_filter(resource.target, filter_for(data.scale_mode));
            resource.applied_scale_mode = Some(data.scale_mode);
        }
        let address = (data.address_u, data.address_v);
        if resource.applied_address != Some(address) {
            self.gl
                .tex_wrap(resource.target, wrap_for(address.0), wrap_for(address.1));
            resource.applied_address = Some(address);
        }
        Ok(())
    }

    /// Bring the driver's fixed-function and program state in line with
    /// one draw, touching only aspects marked dirty or actually changed.
    #[expect(clippy::cast_precision_loss)]
    fn set_draw_state(
        &mut self,
        data: &DrawData,
        fragment: ShaderVariant,
        params: ShaderParams,
        texturing: bool,
    ) -> Result<(), RenderError> {
        let is_target = self.render_target.is_some();

        if self.drawstate.viewport_dirty {
            let vp = self.drawstate.viewport;
            // GL window coordinates grow upward; flip unless rendering
            // into a texture.
            let y = if is_target {
                vp.y
            } else {
                self.drawable_height - vp.y - vp.h
            };
            self.gl.viewport(vp.x, y, vp.w, vp.h);
            if vp.w != 0 && vp.h != 0 {
                let m = &mut self.drawstate.projection;
                m[0] = 2.0 / vp.w as f32;
                m[5] = if is_target {
                    2.0 / vp.h as f32
                } else {
                    -2.0 / vp.h as f32
                };
                m[12] = -1.0;
                m[13] = if is_target { -1.0 } else { 1.0 };
                m[15] = 1.0;
            }
            self.drawstate.viewport_dirty = false;
        }

        if self.drawstate.cliprect_enabled_dirty {
            if self.drawstate.cliprect_enabled {
                self.gl.enable(Capability::ScissorTest);
            } else {
                self.gl.disable(Capability::ScissorTest);
            }
            self.drawstate.cliprect_enabled_dirty = false;
        }

        if self.drawstate.cliprect_enabled && self.drawstate.cliprect_dirty {
            let rect = self.drawstate.cliprect;
            let vp = self.drawstate.viewport;
            let y = if is_target {
                vp.y + rect.y
            } else {
                self.drawable_height - vp.y - rect.y - rect.h
            };
            self.gl.scissor(vp.x + rect.x, y, rect.w, rect.h);
            self.drawstate.cliprect_dirty = false;
        }

        if texturing != self.drawstate.texturing || self.drawstate.texturing_dirty {
            if texturing {
                self.gl.enable_vertex_attrib_array(ATTRIB_TEXCOORD);
            } else {
                self.gl.disable_vertex_attrib_array(ATTRIB_TEXCOORD);
            }
            self.drawstate.texturing = texturing;
            self.drawstate.texturing_dirty = false;
        }

        self.select_program(fragment, &params)?;

        // Projection is a per-program uniform; push it only when this
        // program last saw a different matrix.
        let projection = self.drawstate.projection;
        if let Some(entry) = self.program_cache.front_mut() {
            if let Some(location) = entry.uniform(Uniform::Projection) {
                if entry.projection != projection {
                    self.gl.uniform_matrix_4(location, &projection);
                    entry.projection = projection;
                }
            }
        }

        if self.drawstate.blend != Some(data.blend) {
            match data.blend {
                BlendMode::None => self.gl.disable(Capability::Blend),
                BlendMode::Custom {
                    src_color,
                    dst_color,
                    color_op,
                    src_alpha,
                    dst_alpha,
                    alpha_op,
                } => {
                    self.gl.enable(Capability::Blend);
                    self.gl
                        .blend_func_separate(src_color, dst_color, src_alpha, dst_alpha);
                    self.gl.blend_equation_separate(color_op, alpha_op);
                }
            }
            self.drawstate.blend = Some(data.blend);
        }

        Ok(())
    }

    /// Make the program for (default vertex, `fragment`) current, skipping
    /// all driver traffic when the active program already matches both the
    /// shader choice and the parameter values. Any failure leaves no
    /// active program, so the next draw starts from scratch.
    fn select_program(
        &mut self,
        fragment: ShaderVariant,
        params: &ShaderParams,
    ) -> Result<(), RenderError> {
        if let Some(active) = &self.drawstate.program {
            if active.fragment == fragment && active.params == *params {
                return Ok(());
            }
        }
        let result = self.select_program_uncached(fragment, params);
        if result.is_err() {
            self.drawstate.program = None;
        }
        result
    }

    fn select_program_uncached(
        &mut self,
        fragment: ShaderVariant,
        params: &ShaderParams,
    ) -> Result<(), RenderError> {
        let vertex_id = self
            .shader_cache
            .get_or_compile(&self.gl, ShaderVariant::VertexDefault)?;
        let fragment_id = self.shader_cache.get_or_compile(&self.gl, fragment)?;
        let projection = self.drawstate.projection;
        let previous = self.drawstate.program.take();
        let entry = self
            .program_cache
            .acquire(&self.gl, vertex_id, fragment_id, &projection)?;
        let program = entry.program;

        let program_changed = previous.as_ref().map_or(true, |p| p.program != program);
        if program_changed {
            self.gl.use_program(program);
        }

        let params_changed =
            program_changed || previous.as_ref().map_or(true, |p| p.params != *params);
        if params_changed {
            match params {
                ShaderParams::None => {}
                ShaderParams::TexelSize(ts) => {
                    if let Some(location) = entry.uniform(Uniform::TexelSize) {
                        self.gl.uniform_4_f32(location, ts[0], ts[1], ts[2], ts[3]);
                    }
                }
                ShaderParams::Yuv { offset, matrix } => {
                    if let Some(location) = entry.uniform(Uniform::YuvOffset) {
                        self.gl
                            .uniform_3_f32(location, offset[0], offset[1], offset[2]);
                    }
                    if let Some(location) = entry.uniform(Uniform::YuvMatrix) {
                        self.gl.uniform_matrix_3(location, matrix);
                    }
                }
            }
        }

        self.drawstate.program = Some(ActiveProgram {
            program,
            fragment,
            params: params.clone(),
        });
        Ok(())
    }

    /// Point the attribute arrays at this draw's vertex range and issue
    /// the call. The byte offset goes into the pointers, so the draw
    /// itself always starts at vertex zero.
    #[expect(clippy::cast_possible_truncation)]
    fn issue_draw(&mut self, data: &DrawData, mode: DrawMode, textured: bool) {
        let stride = if textured {
            mem::size_of::<TexturedVertex>()
        } else {
            mem::size_of::<SolidVertex>()
        } as i32;
        let first = data.first as i32;
        self.gl
            .vertex_attrib_pointer(ATTRIB_POSITION, 2, false, stride, first);
        self.gl
            .vertex_attrib_pointer(ATTRIB_COLOR, 4, false, stride, first + 8);
        if textured {
            self.gl
                .vertex_attrib_pointer(ATTRIB_TEXCOORD, 2, false, stride, first + 24);
        }
        self.gl.draw_arrays(mode, 0, data.count as i32);
    }

    // --- textures ---------------------------------------------------------

    /// Create a texture.
    ///
    /// YCbCr formats allocate their chroma planes at half resolution and
    /// require a colorspace with a conversion matrix. External-OES
    /// textures require driver support and static access. Streaming
    /// textures get a CPU shadow buffer; target textures get (or share) a
    /// framebuffer for their dimensions.
    ///
    /// # Errors
    ///
    /// [`RenderError::UnsupportedTextureFormat`],
    /// [`RenderError::UnsupportedTextureAccess`],
    /// [`RenderError::UnsupportedColorspace`], or
    /// [`RenderError::ResourceAllocation`].
    pub fn create_texture(
        &mut self,
        descriptor: TextureDescriptor,
    ) -> Result<TextureKey, RenderError> {
        self.create_texture_inner(descriptor, None)
    }

    /// Wrap an externally created GL texture (a video decoder output, for
    /// example). The handle is never deleted by this renderer.
    ///
    /// # Errors
    ///
    /// As for [`create_texture`](Self::create_texture).
    pub fn import_texture(
        &mut self,
        descriptor: TextureDescriptor,
        texture: TextureId,
    ) -> Result<TextureKey, RenderError> {
        self.create_texture_inner(descriptor, Some(texture))
    }

    fn create_texture_inner(
        &mut self,
        descriptor: TextureDescriptor,
        external: Option<TextureId>,
    ) -> Result<TextureKey, RenderError> {
        let format = descriptor.format;
        match format {
            PixelFormat::ExternalOes => {
                if !self.external_textures_supported {
                    return Err(RenderError::UnsupportedTextureFormat);
                }
                if descriptor.access != TextureAccess::Static {
                    return Err(RenderError::UnsupportedTextureAccess);
                }
            }
            f if f.is_planar_yuv() || f.is_semi_planar() => {
                if ycbcr_to_rgb_matrix(descriptor.colorspace).is_none() {
                    return Err(RenderError::UnsupportedColorspace);
                }
                if descriptor.access == TextureAccess::Target {
                    return Err(RenderError::UnsupportedTextureAccess);
                }
            }
            _ => {}
        }

        let target = if format == PixelFormat::ExternalOes {
            TextureTarget::ExternalOes
        } else {
            TextureTarget::Two
        };
        let owned = external.is_none();
        let texture = match external {
            Some(handle) => handle,
            None => self
                .gl
                .create_texture()
                .map_err(RenderError::ResourceAllocation)?,
        };
        let (w, h) = (descriptor.width, descriptor.height);
        let filter = filter_for(self.scale_mode);
        let (wrap_s, wrap_t) = (wrap_for(self.address_u), wrap_for(self.address_v));

        self.gl.active_texture(0);
        self.gl.bind_texture(target, Some(texture));
        self.gl.tex_filter(target, filter);
        self.gl.tex_wrap(target, wrap_s, wrap_t);
        match format {
            PixelFormat::Rgba32
            | PixelFormat::Bgra32
            | PixelFormat::Rgbx32
            | PixelFormat::Bgrx32 => {
                self.gl.tex_image_2d(target, TexelFormat::Rgba, w, h, None);
            }
            PixelFormat::Iyuv | PixelFormat::Yv12 | PixelFormat::Nv12 | PixelFormat::Nv21 => {
                self.gl
                    .tex_image_2d(target, TexelFormat::Luminance, w, h, None);
            }
            // External images bring their own storage.
            PixelFormat::ExternalOes => {}
        }

        let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
        let mut texture_u = None;
        let mut texture_v = None;
        if format.is_planar_yuv() {
            for plane in [&mut texture_u, &mut texture_v] {
                let id = self
                    .gl
                    .create_texture()
                    .map_err(RenderError::ResourceAllocation)?;
                self.gl.bind_texture(target, Some(id));
                self.gl.tex_filter(target, filter);
                self.gl.tex_wrap(target, wrap_s, wrap_t);
                self.gl
                    .tex_image_2d(target, TexelFormat::Luminance, cw, ch, None);
                *plane = Some(id);
            }
        } else if format.is_semi_planar() {
            let id = self
                .gl
                .create_texture()
                .map_err(RenderError::ResourceAllocation)?;
            self.gl.bind_texture(target, Some(id));
            self.gl.tex_filter(target, filter);
            self.gl.tex_wrap(target, wrap_s, wrap_t);
            self.gl
                .tex_image_2d(target, TexelFormat::LuminanceAlpha, cw, ch, None);
            texture_u = Some(id);
        }

        #[expect(clippy::cast_precision_loss)]
        let texel_size = [1.0 / w as f32, 1.0 / h as f32, w as f32, h as f32];
        let mut resource = TextureResource {
            descriptor,
            texture,
            texture_u,
            texture_v,
            target,
            owned,
            texel_size,
            applied_scale_mode: Some(self.scale_mode),
            applied_address: Some((self.address_u, self.address_v)),
            shadow: None,
            locked: None,
            fbo: None,
        };
        if descriptor.access == TextureAccess::Streaming {
            resource.shadow = Some(vec![0; resource.shadow_len()]);
        }
        if descriptor.access == TextureAccess::Target {
            resource.fbo = Some(self.framebuffers.get_or_create(&self.gl, w, h)?);
        }

        // Texture binding on unit 0 changed under the cached state.
        self.drawstate.texture = None;
        self.check_gl_error("create_texture")?;
        Ok(self.textures.insert(resource))
    }

    /// Upload a rectangle of packed pixels into an RGBA-family texture.
    /// Rows are repacked tight when `pitch` carries padding.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidTexture`] for a dead key,
    /// [`RenderError::UnsupportedTextureFormat`] for YCbCr or external
    /// formats.
    ///
    /// # Panics
    ///
    /// Panics if `pixels` holds fewer than `pitch * rect.h` bytes.
    pub fn update_texture(
        &mut self,
        key: TextureKey,
        rect: Rect,
        pixels: &[u8],
        pitch: usize,
    ) -> Result<(), RenderError> {
        let (texture, target, format) = {
            let r = self.textures.get(key)?;
            (r.texture, r.target, r.descriptor.format)
        };
        if format.is_planar_yuv() || format.is_semi_planar() || format == PixelFormat::ExternalOes
        {
            return Err(RenderError::UnsupportedTextureFormat);
        }
        let tight = rect.w.unsigned_abs() as usize * format.bytes_per_pixel();
        let rows = rect.h.unsigned_abs() as usize;
        self.gl.active_texture(0);
        self.gl.bind_texture(target, Some(texture));
        let packed = repack(pixels, pitch, tight, rows);
        self.gl
            .tex_sub_image_2d(target, rect.x, rect.y, rect.w, rect.h, TexelFormat::Rgba, &packed);
        self.drawstate.texture = None;
        self.check_gl_error("update_texture")
    }

    /// Upload a rectangle of planar YCbCr data; chroma rectangles are the
    /// luma rectangle at half resolution.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidTexture`] for a dead key,
    /// [`RenderError::UnsupportedTextureFormat`] unless the texture is
    /// IYUV or YV12.
    ///
    /// # Panics
    ///
    /// Panics if a plane slice holds fewer bytes than its pitch times its
    /// rectangle height.
    #[allow(clippy::too_many_arguments)]
    pub fn update_yuv_texture(
        &mut self,
        key: TextureKey,
        rect: Rect,
        y_plane: &[u8],
        y_pitch: usize,
        u_plane: &[u8],
        u_pitch: usize,
        v_plane: &[u8],
        v_pitch: usize,
    ) -> Result<(), RenderError> {
        let (texture, texture_u, texture_v, target, format) = {
            let r = self.textures.get(key)?;
            (r.texture, r.texture_u, r.texture_v, r.target, r.descriptor.format)
        };
        if !format.is_planar_yuv() {
            return Err(RenderError::UnsupportedTextureFormat);
        }
        let (texture_u, texture_v) = match (texture_u, texture_v) {
            (Some(u), Some(v)) => (u, v),
            _ => return Err(RenderError::InvalidTexture),
        };
        let chroma = Rect::new(rect.x / 2, rect.y / 2, (rect.w + 1) / 2, (rect.h + 1) / 2);

        self.gl.active_texture(0);
        self.upload_plane(target, texture, rect, y_plane, y_pitch, TexelFormat::Luminance);
        self.upload_plane(target, texture_u, chroma, u_plane, u_pitch, TexelFormat::Luminance);
        self.upload_plane(target, texture_v, chroma, v_plane, v_pitch, TexelFormat::Luminance);
        self.drawstate.texture = None;
        self.check_gl_error("update_yuv_texture")
    }

    /// Upload a rectangle of semi-planar YCbCr data (one luma plane, one
    /// interleaved chroma plane).
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidTexture`] for a dead key,
    /// [`RenderError::UnsupportedTextureFormat`] unless the texture is
    /// NV12 or NV21.
    ///
    /// # Panics
    ///
    /// Panics if a plane slice holds fewer bytes than its pitch times its
    /// rectangle height.
    pub fn update_nv_texture(
        &mut self,
        key: TextureKey,
        rect: Rect,
        y_plane: &[u8],
        y_pitch: usize,
        uv_plane: &[u8],
        uv_pitch: usize,
    ) -> Result<(), RenderError> {
        let (texture, texture_uv, target, format) = {
            let r = self.textures.get(key)?;
            (r.texture, r.texture_u, r.target, r.descriptor.format)
        };
        if !format.is_semi_planar() {
            return Err(RenderError::UnsupportedTextureFormat);
        }
        let texture_uv = texture_uv.ok_or(RenderError::InvalidTexture)?;
        let chroma = Rect::new(rect.x / 2, rect.y / 2, (rect.w + 1) / 2, (rect.h + 1) / 2);

        self.gl.active_texture(0);
        self.upload_plane(target, texture, rect, y_plane, y_pitch, TexelFormat::Luminance);
        self.upload_plane(
            target,
            texture_uv,
            chroma,
            uv_plane,
            uv_pitch,
            TexelFormat::LuminanceAlpha,
        );
        self.drawstate.texture = None;
        self.check_gl_error("update_nv_texture")
    }

    fn upload_plane(
        &self,
        target: TextureTarget,
        texture: TextureId,
        rect: Rect,
        pixels: &[u8],
        pitch: usize,
        format: TexelFormat,
    ) {
        let bpp = match format {
            TexelFormat::Rgba => 4,
            TexelFormat::Luminance => 1,
            TexelFormat::LuminanceAlpha => 2,
        };
        let tight = rect.w.unsigned_abs() as usize * bpp;
        let rows = rect.h.unsigned_abs() as usize;
        let packed = repack(pixels, pitch, tight, rows);
        self.gl.bind_texture(target, Some(texture));
        self.gl
            .tex_sub_image_2d(target, rect.x, rect.y, rect.w, rect.h, format, &packed);
    }

    /// Borrow a rectangle of a streaming texture's CPU shadow for writing.
    /// Returns the pixels starting at the rectangle's first byte and the
    /// buffer's row pitch. The rectangle uploads when
    /// [`unlock_texture`](Self::unlock_texture) is called.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidTexture`] for a dead key,
    /// [`RenderError::NotStreaming`] for non-streaming textures.
    pub fn lock_texture(
        &mut self,
        key: TextureKey,
        rect: Rect,
    ) -> Result<(&mut [u8], usize), RenderError> {
        let resource = self.textures.get_mut(key)?;
        if resource.shadow.is_none() {
            return Err(RenderError::NotStreaming);
        }
        let pitch = resource.pitch();
        let bpp = resource.descriptor.format.bytes_per_pixel();
        let offset = rect.y.unsigned_abs() as usize * pitch + rect.x.unsigned_abs() as usize * bpp;
        resource.locked = Some(rect);
        let shadow = resource.shadow.as_mut().ok_or(RenderError::NotStreaming)?;
        Ok((&mut shadow[offset..], pitch))
    }

    /// Upload the rectangle locked by [`lock_texture`](Self::lock_texture).
    /// A no-op when nothing is locked.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidTexture`] for a dead key,
    /// [`RenderError::NotStreaming`] for non-streaming textures.
    pub fn unlock_texture(&mut self, key: TextureKey) -> Result<(), RenderError> {
        let (rect, format) = {
            let resource = self.textures.get_mut(key)?;
            match resource.locked.take() {
                Some(rect) => (rect, resource.descriptor.format),
                None => return Ok(()),
            }
        };
        // Take the shadow out so the upload can borrow the renderer.
        let (shadow, pitch) = {
            let resource = self.textures.get_mut(key)?;
            let pitch = resource.pitch();
            (
                resource.shadow.take().ok_or(RenderError::NotStreaming)?,
                pitch,
            )
        };

        let result = if format.is_planar_yuv() || format.is_semi_planar() {
            // YCbCr shadows hold full planes back to back; re-upload them
            // whole.
            self.upload_shadow_planes(key, &shadow, pitch)
        } else {
            let bpp = format.bytes_per_pixel();
            let offset =
                rect.y.unsigned_abs() as usize * pitch + rect.x.unsigned_abs() as usize * bpp;
            self.update_texture(key, rect, &shadow[offset..], pitch)
        };
        self.textures.get_mut(key)?.shadow = Some(shadow);
        result
    }

    fn upload_shadow_planes(
        &mut self,
        key: TextureKey,
        shadow: &[u8],
        pitch: usize,
    ) -> Result<(), RenderError> {
        let descriptor = self.textures.get(key)?.descriptor;
        let (w, h) = (descriptor.width, descriptor.height);
        let rows = h.unsigned_abs() as usize;
        let chroma_pitch = (pitch + 1) / 2;
        let chroma_rows = (rows + 1) / 2;
        let luma_len = rows * pitch;
        let chroma_len = chroma_rows * chroma_pitch;
        let rect = Rect::new(0, 0, w, h);
        let y_plane = &shadow[..luma_len];
        match descriptor.format {
            PixelFormat::Iyuv => self.update_yuv_texture(
                key,
                rect,
                y_plane,
                pitch,
                &shadow[luma_len..luma_len + chroma_len],
                chroma_pitch,
                &shadow[luma_len + chroma_len..],
                chroma_pitch,
            ),
            PixelFormat::Yv12 => self.update_yuv_texture(
                key,
                rect,
                y_plane,
                pitch,
                &shadow[luma_len + chroma_len..],
                chroma_pitch,
                &shadow[luma_len..luma_len + chroma_len],
                chroma_pitch,
            ),
            PixelFormat::Nv12 | PixelFormat::Nv21 => self.update_nv_texture(
                key,
                rect,
                y_plane,
                pitch,
                &shadow[luma_len..],
                chroma_pitch * 2,
            ),
            _ => Err(RenderError::UnsupportedTextureFormat),
        }
    }

    /// Destroy a texture, deleting its owned GL handles. Shared
    /// framebuffers stay alive for other targets of the same size.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidTexture`] if the key is already dead.
    pub fn destroy_texture(&mut self, key: TextureKey) -> Result<(), RenderError> {
        let resource = self.textures.remove(key).ok_or(RenderError::InvalidTexture)?;
        if self.drawstate.texture == Some(key) {
            self.drawstate.texture = None;
        }
        if self.render_target == Some(key) {
            self.render_target = None;
            self.drawstate.viewport_dirty = true;
        }
        if resource.owned {
            self.gl.delete_texture(resource.texture);
            if let Some(u) = resource.texture_u {
                self.gl.delete_texture(u);
            }
            if let Some(v) = resource.texture_v {
                self.gl.delete_texture(v);
            }
        }
        Ok(())
    }

    // --- render targets ---------------------------------------------------

    /// Direct subsequent drawing into a target texture, or back to the
    /// default framebuffer with `None`. Forces viewport (and thus
    /// projection) reapplication, since the Y orientation flips.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidTexture`] for a dead key,
    /// [`RenderError::UnsupportedTextureAccess`] if the texture was not
    /// created with target access, [`RenderError::IncompleteRenderTarget`]
    /// if the framebuffer does not reach completeness.
    pub fn set_render_target(&mut self, key: Option<TextureKey>) -> Result<(), RenderError> {
        match key {
            Some(k) => {
                let (fbo, texture, target) = {
                    let resource = self.textures.get(k)?;
                    (
                        resource.fbo.ok_or(RenderError::UnsupportedTextureAccess)?,
                        resource.texture,
                        resource.target,
                    )
                };
                self.gl.bind_framebuffer(Some(fbo));
                self.gl.framebuffer_texture_2d(target, texture);
                if !self.gl.framebuffer_complete() {
                    return Err(RenderError::IncompleteRenderTarget);
                }
            }
            None => self.gl.bind_framebuffer(None),
        }
        self.render_target = key;
        self.drawstate.viewport_dirty = true;
        self.drawstate.cliprect_dirty = true;
        Ok(())
    }

    // --- state recovery and teardown --------------------------------------

    /// Forget everything believed about driver state. Call after foreign
    /// code has used the context; the next flush reapplies all state.
    pub fn invalidate_cached_state(&mut self) {
        let ds = &mut self.drawstate;
        ds.viewport_dirty = true;
        ds.cliprect_dirty = true;
        ds.cliprect_enabled_dirty = true;
        ds.texturing_dirty = true;
        ds.clear_color_dirty = true;
        ds.blend = None;
        ds.program = None;
        ds.texture = None;
    }

    /// Release every GPU resource this renderer created: shaders, cached
    /// programs, framebuffers, owned textures, and the stream vertex
    /// buffer. Safe to call more than once; later calls do nothing.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.shader_cache.destroy(&self.gl);
        self.program_cache.destroy(&self.gl);
        self.framebuffers.destroy(&self.gl);
        let textures: Vec<TextureResource> = self.textures.drain().collect();
        for resource in textures {
            if resource.owned {
                self.gl.delete_texture(resource.texture);
                if let Some(u) = resource.texture_u {
                    self.gl.delete_texture(u);
                }
                if let Some(v) = resource.texture_v {
                    self.gl.delete_texture(v);
                }
            }
        }
        self.gl.delete_buffer(self.vbo);
        self.drawstate.program = None;
        self.drawstate.texture = None;
    }

    fn check_gl_error(&self, context: &str) -> Result<(), RenderError> {
        if !self.debug {
            return Ok(());
        }
        let mut failed = None;
        while let Some(code) = self.gl.get_error() {
            log::error!("GL error in {context}: {code}");
            failed = Some(code);
        }
        match failed {
            Some(code) => Err(RenderError::Gl {
                context: context.to_owned(),
                code,
            }),
            None => Ok(()),
        }
    }
}

/// Absorb the run of draws following `commands[i]` that are the same kind
/// and compatible with it; returns the fused draw and the next unabsorbed
/// index.
fn merge_draws<'a>(
    commands: &'a [RenderCommand],
    i: usize,
    as_kind: impl Fn(&'a RenderCommand) -> Option<&'a DrawData>,
) -> (DrawData, usize) {
    // The caller matched commands[i] to this kind already.
    let Some(data) = as_kind(&commands[i]) else {
        unreachable!("merge_draws called on a mismatched command");
    };
    let mut merged = *data;
    let mut j = i + 1;
    while let Some(next) = commands.get(j).and_then(&as_kind) {
        if draws_compatible(&merged, next) {
            merged.count += next.count;
            j += 1;
        } else {
            break;
        }
    }
    (merged, j)
}

fn draws_compatible(a: &DrawData, b: &DrawData) -> bool {
    a.texture == b.texture
        && a.scale_mode == b.scale_mode
        && a.address_u == b.address_u
        && a.address_v == b.address_v
        && a.blend == b.blend
}

fn record(result: &mut Result<(), RenderError>, step: Result<(), RenderError>) {
    if result.is_ok() {
        *result = step;
    }
}

fn filter_for(mode: ScaleMode) -> FilterMode {
    match mode {
        ScaleMode::Nearest => FilterMode::Nearest,
        // Pixel-art sharpening runs in the shader on top of bilinear
        // samples.
        ScaleMode::Linear | ScaleMode::PixelArt => FilterMode::Linear,
    }
}

fn wrap_for(mode: AddressMode) -> WrapMode {
    match mode {
        AddressMode::Clamp => WrapMode::ClampToEdge,
        AddressMode::Wrap => WrapMode::Repeat,
    }
}

fn yuv_params(colorspace: crate::types::Colorspace) -> Result<ShaderParams, RenderError> {
    let conversion = ycbcr_to_rgb_matrix(colorspace).ok_or(RenderError::UnsupportedColorspace)?;
    let m = conversion.matrix;
    Ok(ShaderParams::Yuv {
        offset: conversion.offset,
        // Row-major to the column-major layout mat3 uniforms expect.
        matrix: [
            m[0][0], m[1][0], m[2][0], m[0][1], m[1][1], m[2][1], m[0][2], m[1][2], m[2][2],
        ],
    })
}

/// The format-compatibility table: which fragment shader samples a source
/// format correctly into the current target's channel order.
///
/// Uploads treat every packed format as raw RGBA bytes, so a reversed
/// source or target order is fixed by swapping in the shader, and `X`
/// channels force alpha opaque. A pairing with no entry is an error; no
/// silent fallback.
fn copy_fragment_variant(
    source: PixelFormat,
    target: Option<PixelFormat>,
    scale_mode: ScaleMode,
) -> Result<ShaderVariant, RenderError> {
    use PixelFormat as Pf;
    use ShaderVariant as Sv;

    let base = match target {
        Some(tf) if tf != source => match source {
            Pf::Bgra32 => match tf {
                Pf::Rgba32 | Pf::Rgbx32 => Sv::FragmentTextureArgb,
                Pf::Bgrx32 => Sv::FragmentTextureAbgr,
                _ => return Err(RenderError::UnsupportedTextureFormat),
            },
            Pf::Rgba32 => match tf {
                Pf::Bgra32 | Pf::Bgrx32 => Sv::FragmentTextureArgb,
                Pf::Rgbx32 => Sv::FragmentTextureAbgr,
                _ => return Err(RenderError::UnsupportedTextureFormat),
            },
            Pf::Bgrx32 => match tf {
                Pf::Rgba32 | Pf::Rgbx32 => Sv::FragmentTextureArgb,
                Pf::Bgra32 => Sv::FragmentTextureRgb,
                _ => return Err(RenderError::UnsupportedTextureFormat),
            },
            Pf::Rgbx32 => match tf {
                Pf::Rgba32 => Sv::FragmentTextureRgb,
                Pf::Bgra32 => Sv::FragmentTextureBgr,
                Pf::Bgrx32 => Sv::FragmentTextureArgb,
                _ => return Err(RenderError::UnsupportedTextureFormat),
            },
            Pf::Iyuv | Pf::Yv12 => Sv::FragmentTextureYuv,
            Pf::Nv12 => Sv::FragmentTextureNv12,
            Pf::Nv21 => Sv::FragmentTextureNv21,
            Pf::ExternalOes => Sv::FragmentTextureExternalOes,
        },
        Some(_) => Sv::FragmentTextureAbgr,
        None => match source {
            Pf::Rgba32 => Sv::FragmentTextureAbgr,
            Pf::Bgra32 => Sv::FragmentTextureArgb,
            // X-channel formats force alpha opaque on top of their swap.
            Pf::Rgbx32 => Sv::FragmentTextureRgb,
            Pf::Bgrx32 => Sv::FragmentTextureBgr,
            Pf::Iyuv | Pf::Yv12 => Sv::FragmentTextureYuv,
            Pf::Nv12 => Sv::FragmentTextureNv12,
            Pf::Nv21 => Sv::FragmentTextureNv21,
            Pf::ExternalOes => Sv::FragmentTextureExternalOes,
        },
    };

    if scale_mode == ScaleMode::PixelArt {
        let sharp = match base {
            Sv::FragmentTextureAbgr => Some(Sv::FragmentTextureAbgrPixelArt),
            Sv::FragmentTextureArgb => Some(Sv::FragmentTextureArgbPixelArt),
            Sv::FragmentTextureRgb => Some(Sv::FragmentTextureRgbPixelArt),
            Sv::FragmentTextureBgr => Some(Sv::FragmentTextureBgrPixelArt),
            _ => None,
        };
        if let Some(sharp) = sharp {
            return Ok(sharp);
        }
    }
    Ok(base)
}

fn repack(pixels: &[u8], pitch: usize, tight: usize, rows: usize) -> Cow<'_, [u8]> {
    if pitch == tight || rows == 0 {
        Cow::Borrowed(&pixels[..tight * rows])
    } else {
        let mut packed = Vec::with_capacity(tight * rows);
        for row in 0..rows {
            packed.extend_from_slice(&pixels[row * pitch..row * pitch + tight]);
        }
        Cow::Owned(packed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::gl::testing::{Call, MockGl};
    use crate::types::Colorspace;

    fn renderer() -> Renderer<MockGl> {
        let mut r = Renderer::new(MockGl::new(), false).unwrap();
        r.set_drawable_size(640, 480);
        r.set_viewport(Rect::new(0, 0, 640, 480));
        r
    }

    fn rgba_descriptor(access: TextureAccess) -> TextureDescriptor {
        TextureDescriptor {
            format: PixelFormat::Rgba32,
            access,
            width: 16,
            height: 16,
            colorspace: Colorspace::Srgb,
        }
    }

    fn triangle(r: &mut Renderer<MockGl>, texture: Option<TextureKey>) {
        let positions = [[0.0, 0.0], [8.0, 0.0], [8.0, 8.0]];
        let colors = [FColor::WHITE; 3];
        let uvs = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]];
        r.draw_geometry(
            texture,
            &positions,
            &colors,
            &uvs,
            VertexIndices::Sequential,
            [1.0, 1.0],
        )
        .unwrap();
    }

    #[test]
    fn repeated_draws_apply_state_once() {
        let mut r = renderer();
        r.draw_points(&[[1.0, 1.0]], FColor::WHITE);
        r.flush().unwrap();
        r.gl.reset();

        r.draw_points(&[[2.0, 2.0]], FColor::WHITE);
        r.draw_points(&[[3.0, 3.0]], FColor::WHITE);
        r.flush().unwrap();
        // Everything was applied on the first flush: no viewport, blend,
        // program, or projection traffic on the second.
        assert_eq!(r.gl.count(|c| matches!(c, Call::Viewport(..))), 0);
        assert_eq!(r.gl.count(|c| matches!(c, Call::BlendFuncSeparate(..))), 0);
        assert_eq!(r.gl.count(|c| matches!(c, Call::UseProgram(_))), 0);
        assert_eq!(r.gl.count(|c| matches!(c, Call::UniformMatrix4(_))), 0);
        assert_eq!(r.gl.count(|c| matches!(c, Call::DrawArrays(..))), 1);
    }

    #[test]
    fn compatible_geometry_fuses_into_one_draw() {
        let mut r = renderer();
        for _ in 0..3 {
            triangle(&mut r, None);
        }
        r.flush().unwrap();
        let draws: Vec<Call> = r
            .gl
            .calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::DrawArrays(..)))
            .cloned()
            .collect();
        assert_eq!(draws, vec![Call::DrawArrays(DrawMode::Triangles, 0, 9)]);
    }

    #[test]
    fn texture_change_splits_the_batch() {
        let mut r = renderer();
        let a = r.create_texture(rgba_descriptor(TextureAccess::Static)).unwrap();
        let b = r.create_texture(rgba_descriptor(TextureAccess::Static)).unwrap();

        for texture in [Some(a), Some(a), Some(b), Some(b)] {
            triangle(&mut r, texture);
        }
        r.flush().unwrap();
        assert_eq!(r.gl.count(|c| matches!(c, Call::DrawArrays(..))), 2);

        r.gl.reset();
        for texture in [Some(a), Some(a), Some(b), Some(a), Some(a)] {
            triangle(&mut r, texture);
        }
        r.flush().unwrap();
        // Fusion is adjacent-only: the middle draw breaks the run.
        assert_eq!(r.gl.count(|c| matches!(c, Call::DrawArrays(..))), 3);
    }

    #[test]
    fn two_vertex_lines_fuse_and_polylines_do_not() {
        let mut r = renderer();
        r.draw_lines(&[[0.0, 0.0], [5.0, 0.0]], FColor::WHITE);
        r.draw_lines(&[[0.0, 2.0], [5.0, 2.0]], FColor::WHITE);
        r.flush().unwrap();
        let draws: Vec<Call> = r
            .gl
            .calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::DrawArrays(..)))
            .cloned()
            .collect();
        assert_eq!(draws, vec![Call::DrawArrays(DrawMode::Lines, 0, 4)]);

        r.gl.reset();
        r.draw_lines(&[[0.0, 0.0], [5.0, 0.0], [5.0, 5.0]], FColor::WHITE);
        r.draw_lines(&[[0.0, 2.0], [5.0, 2.0]], FColor::WHITE);
        r.flush().unwrap();
        let draws: Vec<Call> = r
            .gl
            .calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::DrawArrays(..)))
            .cloned()
            .collect();
        assert_eq!(
            draws,
            vec![
                Call::DrawArrays(DrawMode::LineStrip, 0, 3),
                Call::DrawArrays(DrawMode::Lines, 0, 2),
            ]
        );
    }

    #[test]
    fn degenerate_line_does_not_join_a_segment_batch() {
        let mut r = renderer();
        r.draw_lines(&[[3.0, 3.0]], FColor::WHITE);
        r.draw_lines(&[[0.0, 0.0], [5.0, 0.0]], FColor::WHITE);
        r.flush().unwrap();
        let draws: Vec<Call> = r
            .gl
            .calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::DrawArrays(..)))
            .cloned()
            .collect();
        // Fusing the single vertex in would shift the pair alignment of
        // the following segment.
        assert_eq!(
            draws,
            vec![
                Call::DrawArrays(DrawMode::Lines, 0, 1),
                Call::DrawArrays(DrawMode::Lines, 0, 2),
            ]
        );
    }

    #[test]
    fn clear_color_is_deduplicated() {
        let mut r = renderer();
        // Construction itself seeds the clear color; only the flush counts.
        r.gl.reset();
        r.clear(FColor::new(0.2, 0.4, 0.6, 1.0));
        r.clear(FColor::new(0.2, 0.4, 0.6, 1.0));
        r.clear(FColor::new(0.0, 0.0, 0.0, 1.0));
        r.flush().unwrap();
        assert_eq!(r.gl.count(|c| matches!(c, Call::ClearColor(..))), 2);
        assert_eq!(r.gl.count(|c| matches!(c, Call::Clear)), 3);
    }

    #[test]
    fn clear_suspends_the_scissor() {
        let mut r = renderer();
        r.set_clip_rect(Some(Rect::new(10, 10, 100, 100)));
        r.draw_points(&[[20.0, 20.0]], FColor::WHITE);
        r.clear(FColor::WHITE);
        r.draw_points(&[[30.0, 30.0]], FColor::WHITE);
        r.flush().unwrap();
        // Scissor: enabled for the first draw, dropped for the clear,
        // re-enabled for the second draw.
        assert_eq!(
            r.gl.count(|c| matches!(c, Call::Enable(Capability::ScissorTest))),
            2
        );
        assert_eq!(
            r.gl.count(|c| matches!(c, Call::Disable(Capability::ScissorTest))),
            1
        );
    }

    #[test]
    fn scissor_rect_is_y_flipped_for_the_window() {
        let mut r = renderer();
        r.set_clip_rect(Some(Rect::new(10, 20, 100, 50)));
        r.draw_points(&[[20.0, 30.0]], FColor::WHITE);
        r.flush().unwrap();
        // drawable height 480: y' = 480 - 0 - 20 - 50.
        assert_eq!(r.gl.count(|c| *c == Call::Scissor(10, 410, 100, 50)), 1);
    }

    #[test]
    fn viewport_change_reissues_the_scissor() {
        let mut r = renderer();
        r.set_clip_rect(Some(Rect::new(10, 20, 100, 50)));
        r.draw_points(&[[20.0, 30.0]], FColor::WHITE);
        r.flush().unwrap();
        assert_eq!(r.gl.count(|c| *c == Call::Scissor(10, 410, 100, 50)), 1);

        r.gl.reset();
        r.set_viewport(Rect::new(50, 60, 300, 200));
        r.draw_points(&[[20.0, 30.0]], FColor::WHITE);
        r.flush().unwrap();
        // The scissor rectangle follows the viewport origin: x' = 50 + 10,
        // y' = 480 - 60 - 20 - 50.
        assert_eq!(r.gl.count(|c| *c == Call::Scissor(60, 350, 100, 50)), 1);
    }

    #[test]
    fn pixel_art_draw_uploads_texel_size_once() {
        let mut r = renderer();
        let t = r.create_texture(rgba_descriptor(TextureAccess::Static)).unwrap();
        r.set_scale_mode(ScaleMode::PixelArt);
        triangle(&mut r, Some(t));
        triangle(&mut r, Some(t));
        r.flush().unwrap();
        r.gl.reset();
        triangle(&mut r, Some(t));
        r.flush().unwrap();
        // Same program, same parameter values: nothing re-uploads.
        assert_eq!(r.gl.count(|c| matches!(c, Call::Uniform4f(_))), 0);
    }

    #[test]
    fn yuv_draw_binds_three_planes_and_uploads_conversion() {
        let mut r = renderer();
        let t = r
            .create_texture(TextureDescriptor {
                format: PixelFormat::Iyuv,
                access: TextureAccess::Static,
                width: 16,
                height: 16,
                colorspace: Colorspace::Bt601Limited,
            })
            .unwrap();
        r.gl.reset();
        triangle(&mut r, Some(t));
        r.flush().unwrap();
        assert_eq!(r.gl.count(|c| *c == Call::ActiveTexture(2)), 1);
        assert_eq!(r.gl.count(|c| *c == Call::ActiveTexture(1)), 1);
        assert_eq!(r.gl.count(|c| matches!(c, Call::Uniform3f(_))), 1);
        assert_eq!(r.gl.count(|c| matches!(c, Call::UniformMatrix3(_))), 1);
    }

    #[test]
    fn unsupported_format_pairing_leaves_no_texture_bound() {
        let mut r = renderer();
        let t = r
            .create_texture(TextureDescriptor {
                format: PixelFormat::ExternalOes,
                access: TextureAccess::Static,
                width: 16,
                height: 16,
                colorspace: Colorspace::Srgb,
            })
            .unwrap();
        // The driver loses the extension (context change); the pairing now
        // has no shader.
        r.external_textures_supported = false;
        r.gl.reset();
        triangle(&mut r, Some(t));
        let err = r.flush().unwrap_err();
        assert_eq!(err, RenderError::UnsupportedTextureFormat);
        assert_eq!(r.drawstate.texture, None);
        assert_eq!(r.gl.count(|c| matches!(c, Call::BindTexture(..))), 0);
    }

    #[test]
    fn draw_failure_does_not_abort_the_frame() {
        let mut r = renderer();
        let t = r
            .create_texture(TextureDescriptor {
                format: PixelFormat::ExternalOes,
                access: TextureAccess::Static,
                width: 16,
                height: 16,
                colorspace: Colorspace::Srgb,
            })
            .unwrap();
        r.external_textures_supported = false;
        triangle(&mut r, Some(t));
        r.draw_points(&[[1.0, 1.0]], FColor::WHITE);
        let err = r.flush().unwrap_err();
        assert_eq!(err, RenderError::UnsupportedTextureFormat);
        // The point draw after the failed copy still happened.
        assert_eq!(r.gl.count(|c| matches!(c, Call::DrawArrays(DrawMode::Points, _, _))), 1);
    }

    #[test]
    fn render_target_switch_reapplies_viewport_and_swaps_clear_channels() {
        let mut r = renderer();
        let target = r
            .create_texture(TextureDescriptor {
                format: PixelFormat::Bgra32,
                access: TextureAccess::Target,
                width: 64,
                height: 64,
                colorspace: Colorspace::Srgb,
            })
            .unwrap();
        r.draw_points(&[[1.0, 1.0]], FColor::WHITE);
        r.flush().unwrap();

        r.set_render_target(Some(target)).unwrap();
        r.gl.reset();
        r.set_viewport(Rect::new(0, 0, 64, 64));
        r.clear(FColor::new(1.0, 0.0, 0.0, 1.0));
        r.draw_points(&[[1.0, 1.0]], FColor::WHITE);
        r.flush().unwrap();
        // Red clear lands with red and blue swapped for the BGRA target.
        assert_eq!(r.gl.count(|c| *c == Call::ClearColor(0.0, 0.0, 1.0, 1.0)), 1);
        // Target viewport is not Y-flipped.
        assert_eq!(r.gl.count(|c| *c == Call::Viewport(0, 0, 64, 64)), 1);
    }

    #[test]
    fn unsupported_blend_mode_is_rejected_up_front() {
        let gl = MockGl::new();
        gl.extensions.borrow_mut().retain(|e| *e != "GL_EXT_blend_minmax");
        let mut r = Renderer::new(gl, false).unwrap();
        let minmax = BlendMode::Custom {
            src_color: crate::types::BlendFactor::One,
            dst_color: crate::types::BlendFactor::One,
            color_op: BlendOperation::Maximum,
            src_alpha: crate::types::BlendFactor::One,
            dst_alpha: crate::types::BlendFactor::One,
            alpha_op: BlendOperation::Add,
        };
        assert!(!r.supports_blend_mode(minmax));
        assert_eq!(r.set_blend_mode(minmax), Err(RenderError::UnsupportedBlendMode));
        assert!(r.supports_blend_mode(BlendMode::BLEND));
    }

    #[test]
    fn streaming_lock_uploads_on_unlock() {
        let mut r = renderer();
        let t = r.create_texture(rgba_descriptor(TextureAccess::Streaming)).unwrap();
        let rect = Rect::new(4, 4, 8, 8);
        {
            let (pixels, pitch) = r.lock_texture(t, rect).unwrap();
            assert_eq!(pitch, 64);
            pixels[0] = 0xff;
        }
        r.gl.reset();
        r.unlock_texture(t).unwrap();
        assert_eq!(r.gl.count(|c| *c == Call::TexSubImage2d(4, 4, 8, 8)), 1);
        // Unlocking again is a no-op.
        r.gl.reset();
        r.unlock_texture(t).unwrap();
        assert_eq!(r.gl.count(|c| matches!(c, Call::TexSubImage2d(..))), 0);
    }

    #[test]
    fn lock_requires_streaming_access() {
        let mut r = renderer();
        let t = r.create_texture(rgba_descriptor(TextureAccess::Static)).unwrap();
        assert!(matches!(
            r.lock_texture(t, Rect::new(0, 0, 4, 4)),
            Err(RenderError::NotStreaming)
        ));
    }

    #[test]
    fn update_repacks_padded_rows() {
        let mut r = renderer();
        let t = r.create_texture(rgba_descriptor(TextureAccess::Static)).unwrap();
        r.gl.reset();
        // 2x2 rect with a 16-byte pitch (8 bytes of padding per row).
        let pixels = vec![0u8; 32];
        r.update_texture(t, Rect::new(0, 0, 2, 2), &pixels, 16).unwrap();
        assert_eq!(r.gl.count(|c| *c == Call::TexSubImage2d(0, 0, 2, 2)), 1);
    }

    #[test]
    fn yuv_creation_requires_a_convertible_colorspace() {
        let mut r = renderer();
        let err = r
            .create_texture(TextureDescriptor {
                format: PixelFormat::Nv12,
                access: TextureAccess::Static,
                width: 16,
                height: 16,
                colorspace: Colorspace::Srgb,
            })
            .unwrap_err();
        assert_eq!(err, RenderError::UnsupportedColorspace);
    }

    #[test]
    fn destroyed_texture_fails_draws_at_flush() {
        let mut r = renderer();
        let t = r.create_texture(rgba_descriptor(TextureAccess::Static)).unwrap();
        triangle(&mut r, Some(t));
        r.destroy_texture(t).unwrap();
        assert_eq!(r.flush().unwrap_err(), RenderError::InvalidTexture);
    }

    #[test]
    fn imported_texture_handle_is_not_deleted() {
        let mut r = renderer();
        let foreign = r.gl.create_texture().unwrap();
        let key = r.import_texture(rgba_descriptor(TextureAccess::Static), foreign).unwrap();
        r.destroy_texture(key).unwrap();
        assert_eq!(r.gl.count(|c| matches!(c, Call::DeleteTexture(_))), 0);
    }

    #[test]
    fn destroy_is_idempotent_and_releases_resources() {
        let mut r = renderer();
        let _t = r.create_texture(rgba_descriptor(TextureAccess::Static)).unwrap();
        r.draw_points(&[[1.0, 1.0]], FColor::WHITE);
        r.flush().unwrap();
        r.destroy();
        let programs = r.gl.count(|c| matches!(c, Call::DeleteProgram(_)));
        let textures = r.gl.count(|c| matches!(c, Call::DeleteTexture(_)));
        assert_eq!(programs, 1);
        assert_eq!(textures, 1);
        r.destroy();
        assert_eq!(r.gl.count(|c| matches!(c, Call::DeleteProgram(_))), programs);
    }

    #[test]
    fn invalidate_forces_full_state_reapplication() {
        let mut r = renderer();
        r.draw_points(&[[1.0, 1.0]], FColor::WHITE);
        r.flush().unwrap();
        r.invalidate_cached_state();
        r.gl.reset();
        r.draw_points(&[[1.0, 1.0]], FColor::WHITE);
        r.flush().unwrap();
        assert_eq!(r.gl.count(|c| matches!(c, Call::Viewport(..))), 1);
        assert_eq!(r.gl.count(|c| matches!(c, Call::UseProgram(_))), 1);
        assert_eq!(r.gl.count(|c| matches!(c, Call::BlendFuncSeparate(..))), 1);
    }

    #[test]
    fn copy_table_rejects_unsupported_pairings() {
        // YCbCr sources never depend on the target format.
        assert_eq!(
            copy_fragment_variant(PixelFormat::Yv12, Some(PixelFormat::Rgba32), ScaleMode::Linear)
                .unwrap(),
            ShaderVariant::FragmentTextureYuv
        );
        // Packed source into a YCbCr "target" has no mapping.
        assert_eq!(
            copy_fragment_variant(PixelFormat::Rgba32, Some(PixelFormat::Nv12), ScaleMode::Linear),
            Err(RenderError::UnsupportedTextureFormat)
        );
        // Matching formats sample as-is.
        assert_eq!(
            copy_fragment_variant(PixelFormat::Bgra32, Some(PixelFormat::Bgra32), ScaleMode::Linear)
                .unwrap(),
            ShaderVariant::FragmentTextureAbgr
        );
    }
}

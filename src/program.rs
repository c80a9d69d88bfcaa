//! The linked-program cache.
//!
//! Linking is the expensive step of GLES2 pipeline setup, so linked
//! programs are kept in a small most-recently-used list keyed by their
//! (vertex, fragment) shader pair. Uniform locations are resolved once at
//! link time; draw paths index the table instead of querying the driver.

use std::collections::VecDeque;

use crate::error::RenderError;
use crate::gl::{GlApi, ProgramId, ShaderId, UniformLocation};

/// Vertex attribute index for position, bound pre-link.
pub const ATTRIB_POSITION: u32 = 0;
/// Vertex attribute index for color, bound pre-link.
pub const ATTRIB_COLOR: u32 = 1;
/// Vertex attribute index for texture coordinates, bound pre-link.
pub const ATTRIB_TEXCOORD: u32 = 2;

/// The fixed uniform table resolved for every program.
///
/// Absence of a uniform in a given program is normal (the solid-color
/// fragment shader has no samplers); lookups yield `None` in that case.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Uniform {
    /// `u_projection` — orthographic projection matrix.
    Projection,
    /// `u_texture` — primary sampler (luma plane for YCbCr).
    Texture,
    /// `u_texture_u` — U or interleaved chroma plane sampler.
    TextureU,
    /// `u_texture_v` — V plane sampler.
    TextureV,
    /// `u_texel_size` — `[1/w, 1/h, w, h]` for pixel-art sampling.
    TexelSize,
    /// `u_offset` — YCbCr channel offsets.
    YuvOffset,
    /// `u_matrix` — YCbCr-to-RGB conversion matrix.
    YuvMatrix,
}

const UNIFORM_COUNT: usize = 7;

const UNIFORM_TABLE: [(Uniform, &str); UNIFORM_COUNT] = [
    (Uniform::Projection, "u_projection"),
    (Uniform::Texture, "u_texture"),
    (Uniform::TextureU, "u_texture_u"),
    (Uniform::TextureV, "u_texture_v"),
    (Uniform::TexelSize, "u_texel_size"),
    (Uniform::YuvOffset, "u_offset"),
    (Uniform::YuvMatrix, "u_matrix"),
];

impl Uniform {
    fn slot(self) -> usize {
        match self {
            Self::Projection => 0,
            Self::Texture => 1,
            Self::TextureU => 2,
            Self::TextureV => 3,
            Self::TexelSize => 4,
            Self::YuvOffset => 5,
            Self::YuvMatrix => 6,
        }
    }
}

/// A linked program plus everything resolved at link time.
#[derive(Debug)]
pub struct ProgramEntry {
    /// The GL program object.
    pub program: ProgramId,
    /// Vertex shader half of the cache key.
    pub vertex: ShaderId,
    /// Fragment shader half of the cache key.
    pub fragment: ShaderId,
    uniforms: [Option<UniformLocation>; UNIFORM_COUNT],
    /// The projection matrix last uploaded to this program.
    pub projection: [f32; 16],
}

impl ProgramEntry {
    /// The resolved location of a uniform, or `None` if the linked program
    /// does not use it.
    #[must_use]
    pub fn uniform(&self, uniform: Uniform) -> Option<UniformLocation> {
        self.uniforms[uniform.slot()]
    }
}

/// Capacity of the cache; the least-recently-used entry beyond this is
/// evicted.
const MAX_CACHED_PROGRAMS: usize = 8;

/// A most-recently-used-ordered cache of linked programs. The head is
/// always the entry of the most recent [`acquire`](Self::acquire).
pub struct ProgramCache {
    entries: VecDeque<ProgramEntry>,
}

impl ProgramCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(MAX_CACHED_PROGRAMS + 1),
        }
    }

    /// The entry of the most recent successful [`acquire`](Self::acquire),
    /// if any.
    pub fn front_mut(&mut self) -> Option<&mut ProgramEntry> {
        self.entries.front_mut()
    }

    /// Fetch the linked program for a shader pair, linking it on a miss.
    ///
    /// On a hit the entry moves to the head (no driver traffic beyond
    /// that). On a miss the program is linked with the three fixed
    /// attribute bindings, its uniform table is resolved, it is made
    /// current, its samplers are bound to their fixed units, and
    /// `projection` is pushed as its initial matrix. If the cache then
    /// exceeds capacity the tail entry's program is deleted.
    ///
    /// # Errors
    ///
    /// [`RenderError::ProgramLink`] if linking fails (the partial program
    /// is deleted); [`RenderError::ResourceAllocation`] if the driver
    /// cannot allocate a program object.
    pub fn acquire<G: GlApi>(
        &mut self,
        gl: &G,
        vertex: ShaderId,
        fragment: ShaderId,
        projection: &[f32; 16],
    ) -> Result<&mut ProgramEntry, RenderError> {
        if let Some(index) = self
            .entries
            .iter()
            .position(|e| e.vertex == vertex && e.fragment == fragment)
        {
            if index != 0 {
                // Move to head; the relative order of the rest is
                // preserved.
                if let Some(entry) = self.entries.remove(index) {
                    self.entries.push_front(entry);
                }
            }
        } else {
            let entry = link_program(gl, vertex, fragment, projection)?;
            self.entries.push_front(entry);
            if self.entries.len() > MAX_CACHED_PROGRAMS {
                if let Some(evicted) = self.entries.pop_back() {
                    log::debug!("evicting cached shader program");
                    gl.delete_program(evicted.program);
                }
            }
        }
        // Both branches above leave the acquired entry at the head.
        Ok(self
            .entries
            .front_mut()
            .expect("program cache is non-empty after acquire"))
    }

    /// Number of cached programs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Delete every cached program. The cache is empty afterwards.
    pub fn destroy<G: GlApi>(&mut self, gl: &G) {
        for entry in self.entries.drain(..) {
            gl.delete_program(entry.program);
        }
    }
}

impl Default for ProgramCache {
    fn default() -> Self {
        Self::new()
    }
}

fn link_program<G: GlApi>(
    gl: &G,
    vertex: ShaderId,
    fragment: ShaderId,
    projection: &[f32; 16],
) -> Result<ProgramEntry, RenderError> {
    let program = gl
        .create_program()
        .map_err(RenderError::ResourceAllocation)?;
    gl.attach_shader(program, vertex);
    gl.attach_shader(program, fragment);
    gl.bind_attrib_location(program, ATTRIB_POSITION, "a_position");
    gl.bind_attrib_location(program, ATTRIB_COLOR, "a_color");
    gl.bind_attrib_location(program, ATTRIB_TEXCOORD, "a_texCoord");
    if !gl.link_program(program) {
        let log = gl.program_info_log(program);
        gl.delete_program(program);
        return Err(RenderError::ProgramLink { log });
    }

    let mut uniforms = [None; UNIFORM_COUNT];
    for (uniform, name) in UNIFORM_TABLE {
        uniforms[uniform.slot()] = gl.get_uniform_location(program, name);
    }

    let entry = ProgramEntry {
        program,
        vertex,
        fragment,
        uniforms,
        projection: *projection,
    };

    // New programs become current right away so the fixed sampler units
    // and the initial projection can be pushed while we are here.
    gl.use_program(program);
    if let Some(location) = entry.uniform(Uniform::TextureV) {
        gl.uniform_1_i32(location, 2);
    }
    if let Some(location) = entry.uniform(Uniform::TextureU) {
        gl.uniform_1_i32(location, 1);
    }
    if let Some(location) = entry.uniform(Uniform::Texture) {
        gl.uniform_1_i32(location, 0);
    }
    if let Some(location) = entry.uniform(Uniform::Projection) {
        gl.uniform_matrix_4(location, projection);
    }

    Ok(entry)
}

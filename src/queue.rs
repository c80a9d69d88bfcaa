//! The per-frame command queue.
//!
//! Draw requests are recorded as [`RenderCommand`]s while their vertex data
//! accumulates in one contiguous byte buffer. Nothing touches the GPU until
//! the whole frame is flushed, which is what lets the batcher fuse adjacent
//! compatible draws into single driver calls.
//!
//! Color scaling and the red/blue swap for reversed-order render targets
//! are applied here, at queue time, so executed vertex data never needs
//! fixups.

use crate::texture::TextureKey;
use crate::types::{
    AddressMode, BlendMode, FColor, Rect, ScaleMode, SolidVertex, TexturedVertex,
};

/// Draw parameters captured when a draw is queued. `blend`, `scale_mode`
/// and the address modes participate in batching compatibility;
/// `color_scale` and `swap_rb` are baked into vertex colors immediately.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DrawAttrs {
    /// Blend mode for the draw.
    pub blend: BlendMode,
    /// Sampling filter for the draw's texture.
    pub scale_mode: ScaleMode,
    /// Texture addressing outside `[0, 1]`, U axis.
    pub address_u: AddressMode,
    /// Texture addressing outside `[0, 1]`, V axis.
    pub address_v: AddressMode,
    /// Multiplier folded into vertex color channels (not alpha).
    pub color_scale: f32,
    /// Whether the render target stores red and blue reversed.
    pub swap_rb: bool,
}

/// The payload common to every draw command.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DrawData {
    /// Texture sampled by the draw, if any.
    pub texture: Option<TextureKey>,
    /// Blend mode.
    pub blend: BlendMode,
    /// Sampling filter.
    pub scale_mode: ScaleMode,
    /// U-axis addressing.
    pub address_u: AddressMode,
    /// V-axis addressing.
    pub address_v: AddressMode,
    /// Byte offset of the draw's first vertex in the frame's vertex
    /// buffer.
    pub first: usize,
    /// Number of vertices.
    pub count: usize,
}

/// One recorded operation.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderCommand {
    /// Change the viewport rectangle.
    SetViewport(Rect),
    /// Change the clip rectangle and whether clipping applies.
    SetClipRect {
        /// Whether scissoring is on.
        enabled: bool,
        /// Clip rectangle in viewport coordinates.
        rect: Rect,
    },
    /// Clear the target. The color is resolved against the target's
    /// channel order at execute time, so it is carried unscaled here.
    Clear {
        /// Clear color as requested.
        color: FColor,
        /// Color-scale factor captured when the clear was queued.
        color_scale: f32,
    },
    /// Draw untextured points.
    DrawPoints(DrawData),
    /// Draw line segments or a polyline.
    DrawLines(DrawData),
    /// Draw triangles, textured or solid.
    DrawGeometry(DrawData),
}

/// Index data for a geometry draw.
#[derive(Copy, Clone, Debug)]
pub enum VertexIndices<'a> {
    /// Vertices are used in order.
    Sequential,
    /// 16-bit indices.
    U16(&'a [u16]),
    /// 32-bit indices.
    U32(&'a [u32]),
}

impl VertexIndices<'_> {
    fn len(&self, vertex_count: usize) -> usize {
        match self {
            Self::Sequential => vertex_count,
            Self::U16(indices) => indices.len(),
            Self::U32(indices) => indices.len(),
        }
    }

    fn get(&self, i: usize) -> usize {
        match self {
            Self::Sequential => i,
            Self::U16(indices) => usize::from(indices[i]),
            Self::U32(indices) => indices[i] as usize,
        }
    }
}

/// The frame's recorded commands and their vertex bytes.
#[derive(Default)]
pub struct CommandQueue {
    pub(crate) commands: Vec<RenderCommand>,
    pub(crate) vertices: Vec<u8>,
}

impl CommandQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any commands are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drop all recorded commands and vertex data, keeping allocations.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.vertices.clear();
    }

    /// Record a viewport change.
    pub fn push_viewport(&mut self, rect: Rect) {
        self.commands.push(RenderCommand::SetViewport(rect));
    }

    /// Record a clip rectangle change.
    pub fn push_clip_rect(&mut self, enabled: bool, rect: Rect) {
        self.commands
            .push(RenderCommand::SetClipRect { enabled, rect });
    }

    /// Record a clear.
    pub fn push_clear(&mut self, color: FColor, color_scale: f32) {
        self.commands.push(RenderCommand::Clear { color, color_scale });
    }

    /// Record a point draw, one vertex per input point, offset by half a
    /// pixel so each point lands on a pixel center.
    pub fn push_points(&mut self, points: &[[f32; 2]], color: FColor, attrs: &DrawAttrs) {
        let color = vertex_color(color, attrs);
        let first = self.vertices.len();
        for p in points {
            self.push_solid_vertex(SolidVertex {
                position: [p[0] + 0.5, p[1] + 0.5],
                color,
            });
        }
        self.commands
            .push(RenderCommand::DrawPoints(draw_data(None, attrs, first, points.len())));
    }

    /// Record a polyline draw through the given points.
    ///
    /// Positions are nudged to pixel centers, and every endpoint after the
    /// first is pushed a quarter pixel along its segment's direction so
    /// the final pixel of each segment rasterizes under the diamond-exit
    /// rule instead of being dropped.
    pub fn push_lines(&mut self, points: &[[f32; 2]], color: FColor, attrs: &DrawAttrs) {
        if points.is_empty() {
            return;
        }
        let color = vertex_color(color, attrs);
        let first = self.vertices.len();
        let mut prev = [points[0][0] + 0.5, points[0][1] + 0.5];
        self.push_solid_vertex(SolidVertex { position: prev, color });
        for p in &points[1..] {
            // The segment starts where the previous (nudged) endpoint
            // landed, so each nudge feeds into the next direction.
            let end = [p[0] + 0.5, p[1] + 0.5];
            let angle = (end[1] - prev[1]).atan2(end[0] - prev[0]);
            prev = [end[0] + angle.cos() * 0.25, end[1] + angle.sin() * 0.25];
            self.push_solid_vertex(SolidVertex { position: prev, color });
        }
        self.commands
            .push(RenderCommand::DrawLines(draw_data(None, attrs, first, points.len())));
    }

    /// Record a triangle-list draw. `positions` and `colors` run parallel;
    /// `uvs` is sampled only when `texture` is present. `scale` is applied
    /// to positions at queue time.
    #[allow(clippy::too_many_arguments)]
    pub fn push_geometry(
        &mut self,
        texture: Option<TextureKey>,
        positions: &[[f32; 2]],
        colors: &[FColor],
        uvs: &[[f32; 2]],
        indices: VertexIndices<'_>,
        scale: [f32; 2],
        attrs: &DrawAttrs,
    ) {
        let count = indices.len(positions.len());
        let first = self.vertices.len();
        for i in 0..count {
            let k = indices.get(i);
            let position = [positions[k][0] * scale[0], positions[k][1] * scale[1]];
            let color = vertex_color(colors[k], attrs);
            if texture.is_some() {
                self.push_textured_vertex(TexturedVertex {
                    position,
                    color,
                    tex_coord: uvs[k],
                });
            } else {
                self.push_solid_vertex(SolidVertex { position, color });
            }
        }
        self.commands
            .push(RenderCommand::DrawGeometry(draw_data(texture, attrs, first, count)));
    }

    fn push_solid_vertex(&mut self, vertex: SolidVertex) {
        self.vertices.extend_from_slice(bytemuck::bytes_of(&vertex));
    }

    fn push_textured_vertex(&mut self, vertex: TexturedVertex) {
        self.vertices.extend_from_slice(bytemuck::bytes_of(&vertex));
    }
}

fn vertex_color(color: FColor, attrs: &DrawAttrs) -> [f32; 4] {
    let c = color.scaled(attrs.color_scale, attrs.swap_rb);
    [c.r, c.g, c.b, c.a]
}

fn draw_data(
    texture: Option<TextureKey>,
    attrs: &DrawAttrs,
    first: usize,
    count: usize,
) -> DrawData {
    DrawData {
        texture,
        blend: attrs.blend,
        scale_mode: attrs.scale_mode,
        address_u: attrs.address_u,
        address_v: attrs.address_v,
        first,
        count,
    }
}

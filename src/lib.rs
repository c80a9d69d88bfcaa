//! A batching render-command execution engine for OpenGL ES 2.0 contexts,
//! driven through [glow].
//!
//! Draw requests are queued, not executed: each frame records commands and
//! their vertex data, and [`Renderer::flush`] replays the queue against the
//! driver, fusing adjacent compatible draws into single calls and skipping
//! every state change the driver has already seen. On top of that sit a
//! small LRU cache of linked shader programs, a shader variant table
//! covering packed RGBA orders, planar and semi-planar YCbCr, and
//! platform-external textures, and a texture store with streaming and
//! render-target support.
//!
//! ```no_run
//! use gles2_renderer::{FColor, GlowGl, Rect, Renderer};
//!
//! # fn obtain_context() -> std::sync::Arc<glow::Context> { unimplemented!() }
//! // Safety: the context must stay current on this thread.
//! let gl = unsafe { GlowGl::new(obtain_context()) };
//! let mut renderer = Renderer::new(gl, false)?;
//! renderer.set_drawable_size(640, 480);
//! renderer.set_viewport(Rect::new(0, 0, 640, 480));
//!
//! renderer.clear(FColor::new(0.1, 0.1, 0.1, 1.0));
//! renderer.draw_lines(&[[10.0, 10.0], [100.0, 80.0]], FColor::WHITE);
//! renderer.flush()?;
//! # Ok::<(), gles2_renderer::RenderError>(())
//! ```
//!
//! [glow]: https://docs.rs/glow

mod error;
pub mod gl;
mod program;
mod queue;
mod render;
mod shaders;
mod texture;
mod types;

pub use error::RenderError;
pub use gl::{GlApi, GlowGl, TextureId};
pub use queue::VertexIndices;
pub use render::Renderer;
pub use shaders::ShaderVariant;
pub use texture::{TextureDescriptor, TextureKey};
pub use types::{
    AddressMode, BlendFactor, BlendMode, BlendOperation, Colorspace, FColor, PixelFormat, Rect,
    ScaleMode, TextureAccess,
};

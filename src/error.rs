//! Renderer error taxonomy.
//!
//! Every fallible operation returns `Result<_, RenderError>`; the error's
//! `Display` output is the diagnostic string callers can surface. A failure
//! inside a draw aborts that draw only — the renderer itself stays usable.

use std::fmt;

use crate::shaders::ShaderVariant;

/// An error raised by the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderError {
    /// A shader variant failed to compile, including after the
    /// relaxed-precision retry. The variant is poisoned for the lifetime of
    /// the renderer.
    ShaderCompile {
        /// The variant that failed.
        variant: ShaderVariant,
        /// Driver info log from the final attempt.
        log: String,
    },
    /// A vertex/fragment pair failed to link into a program.
    ProgramLink {
        /// Driver info log.
        log: String,
    },
    /// A GL object (shader, program, buffer, texture, framebuffer) could
    /// not be allocated.
    ResourceAllocation(String),
    /// A YUV draw was requested for a colorspace with no YCbCr-to-RGB
    /// conversion.
    UnsupportedColorspace,
    /// No shader exists for the requested (source format, target format)
    /// combination, or the format is not usable on this driver.
    UnsupportedTextureFormat,
    /// The requested texture access mode is not valid for its format.
    UnsupportedTextureAccess,
    /// The requested blend mode needs an extension the driver lacks.
    UnsupportedBlendMode,
    /// A command referenced a texture that was never created or has been
    /// destroyed.
    InvalidTexture,
    /// A render-target framebuffer did not reach completeness.
    IncompleteRenderTarget,
    /// An operation that requires a texture's CPU shadow buffer was called
    /// on a non-streaming texture.
    NotStreaming,
    /// One or more GL errors were collected while debug checking is
    /// enabled.
    Gl {
        /// Call-site context for the check.
        context: String,
        /// Translated GL error code name.
        code: &'static str,
    },
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShaderCompile { variant, log } => {
                write!(f, "failed to compile shader {variant:?}: {log}")
            }
            Self::ProgramLink { log } => write!(f, "failed to link shader program: {log}"),
            Self::ResourceAllocation(what) => write!(f, "failed to allocate {what}"),
            Self::UnsupportedColorspace => write!(f, "unsupported YUV colorspace"),
            Self::UnsupportedTextureFormat => write!(f, "unsupported texture format"),
            Self::UnsupportedTextureAccess => {
                write!(f, "unsupported texture access for this format")
            }
            Self::UnsupportedBlendMode => write!(f, "unsupported blend mode"),
            Self::InvalidTexture => write!(f, "invalid texture reference"),
            Self::IncompleteRenderTarget => write!(f, "render target framebuffer is incomplete"),
            Self::NotStreaming => write!(f, "texture was not created with streaming access"),
            Self::Gl { context, code } => write!(f, "GL error in {context}: {code}"),
        }
    }
}

impl std::error::Error for RenderError {}

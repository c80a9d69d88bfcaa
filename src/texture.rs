//! Texture bookkeeping: the key-addressed store of per-texture GPU
//! resources and the shared list of render-target framebuffers.
//!
//! All GL traffic for creating and updating textures lives in the renderer
//! façade; this module owns the data.

use crate::error::RenderError;
use crate::gl::{FramebufferId, GlApi, TextureId, TextureTarget};
use crate::types::{AddressMode, Colorspace, PixelFormat, ScaleMode, TextureAccess};

/// Opaque handle to a texture in the store. Stays valid until the texture
/// is destroyed; a stale key is rejected, not reused.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureKey(pub(crate) usize);

/// Creation-time description of a texture.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TextureDescriptor {
    /// Pixel layout of the backing storage.
    pub format: PixelFormat,
    /// Access pattern the texture is created for.
    pub access: TextureAccess,
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
    /// Colorspace of the pixel values; YCbCr formats require one with a
    /// conversion matrix.
    pub colorspace: Colorspace,
}

/// The GPU-side bundle backing one texture.
pub struct TextureResource {
    /// How the texture was described at creation.
    pub descriptor: TextureDescriptor,
    /// Primary plane (or the whole texture for packed formats).
    pub texture: TextureId,
    /// U plane for planar YCbCr; interleaved chroma plane for
    /// semi-planar.
    pub texture_u: Option<TextureId>,
    /// V plane for planar YCbCr.
    pub texture_v: Option<TextureId>,
    /// Binding target of every plane.
    pub target: TextureTarget,
    /// Whether the GL handles were created here. Externally supplied
    /// handles are never deleted.
    pub owned: bool,
    /// `[1/w, 1/h, w, h]`, pushed for pixel-art sampling.
    pub texel_size: [f32; 4],
    /// Filter state last uploaded via `glTexParameter`, `None` until
    /// first set.
    pub applied_scale_mode: Option<ScaleMode>,
    /// Wrap state last uploaded, `None` until first set.
    pub applied_address: Option<(AddressMode, AddressMode)>,
    /// CPU shadow of the pixel data, present for streaming textures.
    pub shadow: Option<Vec<u8>>,
    /// Region handed out by a streaming lock, uploaded on unlock.
    pub locked: Option<crate::types::Rect>,
    /// Framebuffer for render-target textures, shared per dimensions.
    pub fbo: Option<FramebufferId>,
}

impl TextureResource {
    /// Byte pitch of the primary plane.
    #[must_use]
    pub fn pitch(&self) -> usize {
        self.descriptor.width.unsigned_abs() as usize * self.descriptor.format.bytes_per_pixel()
    }

    /// Size of the CPU shadow buffer for this texture's format: the
    /// primary plane, plus two half-resolution chroma planes for YCbCr.
    #[must_use]
    pub fn shadow_len(&self) -> usize {
        let height = self.descriptor.height.unsigned_abs() as usize;
        let pitch = self.pitch();
        let mut len = height * pitch;
        let format = self.descriptor.format;
        if format.is_planar_yuv() || format.is_semi_planar() {
            len += 2 * ((height + 1) / 2) * ((pitch + 1) / 2);
        }
        len
    }
}

/// The renderer's texture table. Keys are never reused.
#[derive(Default)]
pub struct TextureStore {
    slots: Vec<Option<TextureResource>>,
}

impl TextureStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a texture, returning its key.
    pub fn insert(&mut self, resource: TextureResource) -> TextureKey {
        let key = TextureKey(self.slots.len());
        self.slots.push(Some(resource));
        key
    }

    /// Look up a texture.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidTexture`] for keys never issued or already
    /// destroyed.
    pub fn get(&self, key: TextureKey) -> Result<&TextureResource, RenderError> {
        self.slots
            .get(key.0)
            .and_then(Option::as_ref)
            .ok_or(RenderError::InvalidTexture)
    }

    /// Look up a texture mutably.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidTexture`] for keys never issued or already
    /// destroyed.
    pub fn get_mut(&mut self, key: TextureKey) -> Result<&mut TextureResource, RenderError> {
        self.slots
            .get_mut(key.0)
            .and_then(Option::as_mut)
            .ok_or(RenderError::InvalidTexture)
    }

    /// Remove a texture, returning its resource bundle for teardown.
    pub fn remove(&mut self, key: TextureKey) -> Option<TextureResource> {
        self.slots.get_mut(key.0).and_then(Option::take)
    }

    /// Drain every remaining texture, for renderer teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = TextureResource> + '_ {
        self.slots.drain(..).flatten()
    }
}

struct FramebufferEntry {
    width: i32,
    height: i32,
    fbo: FramebufferId,
}

/// Render-target framebuffers, shared by dimensions: two targets of the
/// same size reuse one FBO, rebinding their own color attachment when they
/// become current.
#[derive(Default)]
pub struct FramebufferList {
    entries: Vec<FramebufferEntry>,
}

impl FramebufferList {
    /// An empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the framebuffer for the given dimensions, creating it on
    /// first use.
    ///
    /// # Errors
    ///
    /// [`RenderError::ResourceAllocation`] if the driver cannot allocate
    /// a framebuffer object.
    pub fn get_or_create<G: GlApi>(
        &mut self,
        gl: &G,
        width: i32,
        height: i32,
    ) -> Result<FramebufferId, RenderError> {
        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.width == width && e.height == height)
        {
            return Ok(entry.fbo);
        }
        let fbo = gl
            .create_framebuffer()
            .map_err(RenderError::ResourceAllocation)?;
        self.entries.push(FramebufferEntry { width, height, fbo });
        Ok(fbo)
    }

    /// Delete every framebuffer in the list.
    pub fn destroy<G: GlApi>(&mut self, gl: &G) {
        for entry in self.entries.drain(..) {
            gl.delete_framebuffer(entry.fbo);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::gl::testing::{Call, MockGl};

    #[test]
    fn framebuffers_are_shared_per_dimensions() {
        let gl = MockGl::new();
        let mut list = FramebufferList::new();
        let a = list.get_or_create(&gl, 64, 64).unwrap();
        let b = list.get_or_create(&gl, 64, 64).unwrap();
        let c = list.get_or_create(&gl, 64, 32).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(gl.count(|call| matches!(call, Call::CreateFramebuffer(_))), 2);
    }

    #[test]
    fn destroyed_keys_stay_invalid() {
        let mut store = TextureStore::new();
        let gl = MockGl::new();
        let texture = gl.create_texture().unwrap();
        let key = store.insert(TextureResource {
            descriptor: TextureDescriptor {
                format: PixelFormat::Rgba32,
                access: TextureAccess::Static,
                width: 4,
                height: 4,
                colorspace: Colorspace::Srgb,
            },
            texture,
            texture_u: None,
            texture_v: None,
            target: TextureTarget::Two,
            owned: true,
            texel_size: [0.25, 0.25, 4.0, 4.0],
            applied_scale_mode: None,
            applied_address: None,
            shadow: None,
            locked: None,
            fbo: None,
        });
        assert!(store.get(key).is_ok());
        assert!(store.remove(key).is_some());
        assert!(matches!(
            store.get(key),
            Err(RenderError::InvalidTexture)
        ));
        // The slot is spent; a new insert gets a fresh key.
        let texture = gl.create_texture().unwrap();
        let key2 = store.insert(TextureResource {
            descriptor: TextureDescriptor {
                format: PixelFormat::Rgba32,
                access: TextureAccess::Static,
                width: 2,
                height: 2,
                colorspace: Colorspace::Srgb,
            },
            texture,
            texture_u: None,
            texture_v: None,
            target: TextureTarget::Two,
            owned: true,
            texel_size: [0.5, 0.5, 2.0, 2.0],
            applied_scale_mode: None,
            applied_address: None,
            shadow: None,
            locked: None,
            fbo: None,
        });
        assert_ne!(key, key2);
    }

    #[test]
    fn shadow_len_adds_half_resolution_chroma_planes() {
        let gl = MockGl::new();
        let texture = gl.create_texture().unwrap();
        let resource = TextureResource {
            descriptor: TextureDescriptor {
                format: PixelFormat::Iyuv,
                access: TextureAccess::Streaming,
                width: 5,
                height: 5,
                colorspace: Colorspace::Bt601Limited,
            },
            texture,
            texture_u: None,
            texture_v: None,
            target: TextureTarget::Two,
            owned: true,
            texel_size: [0.2, 0.2, 5.0, 5.0],
            applied_scale_mode: None,
            applied_address: None,
            shadow: None,
            locked: None,
            fbo: None,
        };
        // 5x5 luma plus two 3x3 chroma planes.
        assert_eq!(resource.shadow_len(), 25 + 2 * 9);
    }
}

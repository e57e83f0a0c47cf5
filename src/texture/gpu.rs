//! GPU texture layer seam
//!
//! The scheduler hands decoded bitmaps to a [`GpuTextureLayer`] and keeps the
//! returned [`GpuTexture`] inside the owning record. Byte sizes reported here
//! are what the budget ledger accounts for.

use super::types::RawImage;
use super::{TextureError, TextureResult};
use std::collections::HashMap;
use tracing::debug;

/// Opaque handle into the GPU layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuHandle(pub u32);

/// A texture object living in the GPU layer
#[derive(Debug, PartialEq, Eq)]
pub struct GpuTexture {
    pub handle: GpuHandle,
    pub width: u32,
    pub height: u32,
    pub discard_level: u8,
    /// Allocation size used for ledger accounting
    pub bytes: u64,
}

impl GpuTexture {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Collaborator that turns decoded bitmaps into drawable textures
pub trait GpuTextureLayer {
    /// Upload a bitmap decoded at `discard_level`
    fn create(&mut self, image: &RawImage, discard_level: u8) -> TextureResult<GpuTexture>;

    /// Free the texture. Memory is considered released as soon as this returns.
    fn destroy(&mut self, texture: GpuTexture);
}

/// Keeps texture bitmaps in host memory. Used for headless runs and tests.
#[derive(Debug, Default)]
pub struct HostTextureLayer {
    next_handle: u32,
    textures: HashMap<GpuHandle, RawImage>,
    allocated_bytes: u64,
}

impl HostTextureLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    pub fn image(&self, handle: GpuHandle) -> Option<&RawImage> {
        self.textures.get(&handle)
    }
}

impl GpuTextureLayer for HostTextureLayer {
    fn create(&mut self, image: &RawImage, discard_level: u8) -> TextureResult<GpuTexture> {
        if !image.is_valid() {
            return Err(TextureError::InvalidImage {
                reason: format!(
                    "{}x{}x{} with {} bytes",
                    image.width,
                    image.height,
                    image.components,
                    image.data.len()
                ),
            });
        }

        self.next_handle += 1;
        let handle = GpuHandle(self.next_handle);
        let bytes = image.data.len() as u64;
        self.textures.insert(handle, image.clone());
        self.allocated_bytes += bytes;

        debug!("Created host texture {:?} {}x{} @ discard {}", handle, image.width, image.height, discard_level);

        Ok(GpuTexture {
            handle,
            width: image.width,
            height: image.height,
            discard_level,
            bytes,
        })
    }

    fn destroy(&mut self, texture: GpuTexture) {
        if self.textures.remove(&texture.handle).is_some() {
            self.allocated_bytes = self.allocated_bytes.saturating_sub(texture.bytes);
        }
    }
}

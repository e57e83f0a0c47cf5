//! wgpu-backed GPU texture layer

use super::gpu::{GpuHandle, GpuTexture, GpuTextureLayer};
use super::types::RawImage;
use super::{TextureError, TextureResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use wgpu::{Device, Queue, TextureFormat};

/// Texture object plus the view and sampler the renderer binds
pub struct UploadedTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
}

pub struct WgpuTextureLayer {
    device: Arc<Device>,
    queue: Arc<Queue>,
    next_handle: u32,
    textures: HashMap<GpuHandle, UploadedTexture>,
}

impl WgpuTextureLayer {
    pub fn new(device: Arc<Device>, queue: Arc<Queue>) -> Self {
        info!("🖼️ Texture uploads go through wgpu");
        Self { device, queue, next_handle: 0, textures: HashMap::new() }
    }

    pub fn texture(&self, handle: GpuHandle) -> Option<&UploadedTexture> {
        self.textures.get(&handle)
    }

    fn upload(&self, rgba: &[u8], width: u32, height: u32, label: &str) -> UploadedTexture {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        UploadedTexture { texture, view, sampler }
    }
}

/// Expand 1-4 component bitmaps to RGBA8
fn to_rgba(image: &RawImage) -> TextureResult<Vec<u8>> {
    let texels = image.width as usize * image.height as usize;
    let data = &image.data;
    let mut rgba = Vec::with_capacity(texels * 4);
    match image.components {
        4 => rgba.extend_from_slice(data),
        3 => {
            for px in data.chunks_exact(3) {
                rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
            }
        }
        2 => {
            for px in data.chunks_exact(2) {
                rgba.extend_from_slice(&[px[0], px[0], px[0], px[1]]);
            }
        }
        1 => {
            for &l in data.iter() {
                rgba.extend_from_slice(&[l, l, l, 255]);
            }
        }
        n => {
            return Err(TextureError::GpuCreate { reason: format!("unsupported component count {}", n) });
        }
    }
    Ok(rgba)
}

impl GpuTextureLayer for WgpuTextureLayer {
    fn create(&mut self, image: &RawImage, discard_level: u8) -> TextureResult<GpuTexture> {
        if !image.is_valid() {
            return Err(TextureError::InvalidImage {
                reason: format!("{}x{}x{}", image.width, image.height, image.components),
            });
        }
        let rgba = to_rgba(image)?;

        self.next_handle += 1;
        let handle = GpuHandle(self.next_handle);
        let uploaded = self.upload(&rgba, image.width, image.height, &format!("texture-{}", handle.0));
        self.textures.insert(handle, uploaded);

        debug!("Uploaded {:?} {}x{} @ discard {}", handle, image.width, image.height, discard_level);

        Ok(GpuTexture {
            handle,
            width: image.width,
            height: image.height,
            discard_level,
            bytes: rgba.len() as u64,
        })
    }

    fn destroy(&mut self, texture: GpuTexture) {
        if let Some(uploaded) = self.textures.remove(&texture.handle) {
            uploaded.texture.destroy();
        }
    }
}

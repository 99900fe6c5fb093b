use crate::compositor::ComposedRaster;
use crate::sync::TextureBackend;
use crate::texture_cache::TextureResource;
use anyhow::{ensure, Result};
use std::borrow::Cow;

/// Sampled RGBA texture living on the GPU.
#[derive(Debug)]
pub struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl GpuTexture {
    /// Creates an sRGB texture from tightly packed RGBA8 rows.
    pub fn from_rgba8(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Self {
        let extent = wgpu::Extent3d { width, height, depth_or_array_layers: 1 };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let (pixel_data, padded_row_bytes) = prepare_texture_upload(data, width, height);
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixel_data.as_ref(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row_bytes),
                rows_per_image: Some(height),
            },
            extent,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view, width, height }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn destroy(&self) {
        self.texture.destroy();
    }
}

impl TextureResource for GpuTexture {
    fn dispose(&self) {
        self.destroy();
    }
}

/// Uploads composed rasters through a shared device and queue.
#[derive(Debug, Clone)]
pub struct WgpuTextureBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl WgpuTextureBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }
}

impl TextureBackend for WgpuTextureBackend {
    type Texture = GpuTexture;

    fn upload(&mut self, key: &str, raster: &ComposedRaster) -> Result<GpuTexture> {
        let (width, height) = (raster.width(), raster.height());
        let limit = self.device.limits().max_texture_dimension_2d;
        ensure!(
            width <= limit && height <= limit,
            "raster {width}x{height} exceeds the device texture limit {limit}"
        );
        let rgba = raster.to_rgba8();
        Ok(GpuTexture::from_rgba8(&self.device, &self.queue, key, &rgba, width, height))
    }
}

pub(super) fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width.saturating_mul(4);
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let remainder = unpadded % align;
    if remainder == 0 {
        unpadded
    } else {
        unpadded + align - remainder
    }
}

/// Pads each row to the copy alignment, borrowing when no padding is needed.
pub(super) fn prepare_texture_upload(data: &[u8], width: u32, height: u32) -> (Cow<'_, [u8]>, u32) {
    let row_bytes = width.saturating_mul(4);
    let padded_row_bytes = padded_bytes_per_row(width);
    if padded_row_bytes == row_bytes {
        return (Cow::Borrowed(data), row_bytes);
    }
    let mut padded = vec![0u8; padded_row_bytes.saturating_mul(height) as usize];
    for (row, src) in data.chunks_exact(row_bytes as usize).take(height as usize).enumerate() {
        let dst = row * padded_row_bytes as usize;
        padded[dst..dst + src.len()].copy_from_slice(src);
    }
    (Cow::Owned(padded), padded_row_bytes)
}

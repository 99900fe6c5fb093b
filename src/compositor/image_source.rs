use crate::assets::AssetSource;
use crate::error::FetchError;
use resvg::usvg;
use std::time::Duration;
use thiserror::Error;
use tiny_skia::{FilterQuality, IntSize, Pixmap, PixmapPaint, Transform};

#[derive(Debug, Error)]
pub enum ImageLoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("could not decode '{location}': {message}")]
    Decode { location: String, message: String },
}

impl ImageLoadError {
    fn decode(location: &str, message: impl ToString) -> Self {
        ImageLoadError::Decode { location: location.to_string(), message: message.to_string() }
    }
}

/// A decoded source image. Vectors stay as trees so they rasterise at their drawn size.
pub enum SourceImage {
    Raster(Pixmap),
    Vector(usvg::Tree),
}

impl SourceImage {
    pub fn load(source: &dyn AssetSource, location: &str, timeout: Duration) -> Result<Self, ImageLoadError> {
        let bytes = source.fetch(location, timeout)?;
        Self::decode(&bytes, location)
    }

    pub fn decode(bytes: &[u8], location: &str) -> Result<Self, ImageLoadError> {
        if looks_like_svg(bytes, location) {
            let tree = usvg::Tree::from_data(bytes, &usvg::Options::default())
                .map_err(|err| ImageLoadError::decode(location, err))?;
            return Ok(SourceImage::Vector(tree));
        }
        decode_raster(bytes, location).map(SourceImage::Raster)
    }

    /// Natural size in pixels.
    pub fn size(&self) -> (f32, f32) {
        match self {
            SourceImage::Raster(pixmap) => (pixmap.width() as f32, pixmap.height() as f32),
            SourceImage::Vector(tree) => (tree.size().width(), tree.size().height()),
        }
    }

    /// Draws the image onto `canvas`, mapping its natural size through `transform`.
    pub fn draw(&self, canvas: &mut Pixmap, transform: Transform, opacity: f32) {
        let opacity = opacity.clamp(0.0, 1.0);
        match self {
            SourceImage::Raster(pixmap) => {
                let paint = PixmapPaint { opacity, quality: FilterQuality::Bilinear, ..PixmapPaint::default() };
                canvas.draw_pixmap(0, 0, pixmap.as_ref(), &paint, transform, None);
            }
            SourceImage::Vector(tree) if opacity >= 1.0 => {
                resvg::render(tree, transform, &mut canvas.as_mut());
            }
            SourceImage::Vector(tree) => {
                let Some(mut layer) = Pixmap::new(canvas.width(), canvas.height()) else {
                    return;
                };
                resvg::render(tree, transform, &mut layer.as_mut());
                let paint = PixmapPaint { opacity, ..PixmapPaint::default() };
                canvas.draw_pixmap(0, 0, layer.as_ref(), &paint, Transform::identity(), None);
            }
        }
    }
}

fn looks_like_svg(bytes: &[u8], location: &str) -> bool {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    if path.to_ascii_lowercase().ends_with(".svg") {
        return true;
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]);
    let head = head.trim_start_matches('\u{feff}').trim_start();
    head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg"))
}

/// Decodes PNG, JPEG or HDR bytes into a premultiplied pixmap.
pub fn decode_raster(bytes: &[u8], location: &str) -> Result<Pixmap, ImageLoadError> {
    let rgba = image::load_from_memory(bytes).map_err(|err| ImageLoadError::decode(location, err))?.into_rgba8();
    let (width, height) = rgba.dimensions();
    let size = IntSize::from_wh(width, height).ok_or_else(|| ImageLoadError::decode(location, "image is empty"))?;
    let mut data = rgba.into_raw();
    for px in data.chunks_exact_mut(4) {
        let alpha = px[3] as u16;
        if alpha < 255 {
            for channel in &mut px[..3] {
                *channel = ((*channel as u16 * alpha + 127) / 255) as u8;
            }
        }
    }
    Pixmap::from_vec(data, size).ok_or_else(|| ImageLoadError::decode(location, "pixel buffer size mismatch"))
}

//! Offscreen rasterisation of one zone's configuration into a texture image.
//!
//! Layers are drawn in a fixed order: colour fill, background, logo, text,
//! number, and finally the debug overlay on top. Each stage after the fill can
//! fail independently; a failed stage is logged and left out of the result.

mod fonts;
mod image_source;
mod text;

pub use fonts::{FontCache, FontStatus};
pub use image_source::{ImageLoadError, SourceImage};
pub use text::{TextBounds, TextStyle};

use crate::assets::{AssetPaths, AssetSource};
use crate::config::CompositionConfig;
use crate::error::{CompositionStage, CompositionStageError};
use crate::zone::{LogoRef, Rgb, TextLayer, ZoneConfig};
use fonts::FontLoader;
use std::sync::Arc;
use tiny_skia::{Color, Pixmap, Transform};

/// Largest accepted canvas edge.
pub const MAX_CANVAS_EDGE: u32 = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn square(edge: u32) -> Self {
        Self { width: edge, height: edge }
    }
}

impl From<&CompositionConfig> for CanvasSize {
    fn from(config: &CompositionConfig) -> Self {
        Self::new(config.width, config.height)
    }
}

/// A finished composition. Pixels are stored premultiplied.
pub struct ComposedRaster {
    pixmap: Pixmap,
    skipped: Vec<CompositionStageError>,
}

impl ComposedRaster {
    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Straight-alpha RGBA of one pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let px = self.pixmap.pixel(x, y)?.demultiply();
        Some([px.red(), px.green(), px.blue(), px.alpha()])
    }

    /// Straight-alpha RGBA rows, top to bottom.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixmap.data().len());
        for px in self.pixmap.pixels() {
            let px = px.demultiply();
            out.extend_from_slice(&[px.red(), px.green(), px.blue(), px.alpha()]);
        }
        out
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, CompositionStageError> {
        self.pixmap.encode_png().map_err(|err| CompositionStageError::new(CompositionStage::Encode, err.to_string()))
    }

    /// Stages that were left out of this raster.
    pub fn skipped(&self) -> &[CompositionStageError] {
        &self.skipped
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }
}

impl std::fmt::Debug for ComposedRaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedRaster")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("skipped", &self.skipped)
            .finish()
    }
}

pub struct Compositor {
    source: Arc<dyn AssetSource>,
    paths: AssetPaths,
    settings: CompositionConfig,
    fonts: FontCache,
}

impl Compositor {
    pub fn new(source: Arc<dyn AssetSource>, paths: AssetPaths, settings: CompositionConfig) -> Self {
        Self { source, paths, settings, fonts: FontCache::new() }
    }

    pub fn settings(&self) -> &CompositionConfig {
        &self.settings
    }

    pub fn paths(&self) -> &AssetPaths {
        &self.paths
    }

    pub fn fonts(&self) -> &FontCache {
        &self.fonts
    }

    pub fn fonts_mut(&mut self) -> &mut FontCache {
        &mut self.fonts
    }

    /// Composes `zone` onto a fresh canvas. Only an unusable canvas size is an
    /// error; every layer failure is recorded in [`ComposedRaster::skipped`].
    pub fn compose(
        &mut self,
        zone: &ZoneConfig,
        debug_overlay: Option<&str>,
        size: CanvasSize,
    ) -> Result<ComposedRaster, CompositionStageError> {
        if size.width > MAX_CANVAS_EDGE || size.height > MAX_CANVAS_EDGE {
            return Err(CompositionStageError::new(
                CompositionStage::Canvas,
                format!("{}x{} exceeds the {MAX_CANVAS_EDGE}px limit", size.width, size.height),
            ));
        }
        let mut pixmap = Pixmap::new(size.width, size.height).ok_or_else(|| {
            CompositionStageError::new(CompositionStage::Canvas, format!("{}x{} has no area", size.width, size.height))
        })?;
        pixmap.fill(solid(zone.color));

        let mut skipped = Vec::new();
        let mut record = |result: Result<(), CompositionStageError>| {
            if let Err(err) = result {
                if err.stage == CompositionStage::Overlay {
                    log::debug!("{err}");
                } else {
                    log::warn!("{err}");
                }
                skipped.push(err);
            }
        };

        let background = zone.background.as_ref().map(|bg| bg.location().to_string());
        if let Some(location) = background.as_deref() {
            record(self.draw_background(&mut pixmap, zone, location));
        }
        if let Some(logo) = &zone.logo {
            let location = match logo {
                LogoRef::Catalog(id) => self.paths.logo(id),
                LogoRef::Uploaded(location) => location.clone(),
            };
            if background.as_deref() == Some(location.as_str()) {
                log::debug!("logo {location} is already the background; not drawn twice");
            } else {
                record(self.draw_logo(&mut pixmap, &location));
            }
        }
        if let Some(layer) = zone.text.as_ref().filter(|layer| layer.is_visible()) {
            record(self.draw_layer(&mut pixmap, layer, CompositionStage::Text));
        }
        if let Some(layer) = zone.number.as_ref().filter(|layer| layer.is_visible()) {
            record(self.draw_layer(&mut pixmap, layer, CompositionStage::Number));
        }
        if let Some(location) = debug_overlay.map(str::trim).filter(|loc| !loc.is_empty()) {
            record(self.draw_overlay(&mut pixmap, location));
        }
        Ok(ComposedRaster { pixmap, skipped })
    }

    fn draw_background(
        &self,
        canvas: &mut Pixmap,
        zone: &ZoneConfig,
        location: &str,
    ) -> Result<(), CompositionStageError> {
        let image = SourceImage::load(self.source.as_ref(), location, self.settings.background_timeout())
            .map_err(|err| CompositionStageError::new(CompositionStage::Background, err.to_string()))?;
        let (natural_w, natural_h) = image.size();
        if natural_w <= 0.0 || natural_h <= 0.0 {
            return Err(CompositionStageError::new(CompositionStage::Background, format!("{location} is empty")));
        }
        let (canvas_w, canvas_h) = (canvas.width() as f32, canvas.height() as f32);
        match zone.repeat {
            Some(repeat) => {
                let tile_w = tile_edge(repeat[0], canvas_w, natural_w);
                let tile_h = tile_edge(repeat[1], canvas_h, natural_h);
                let (offset_x, offset_y) = zone.tile_offset();
                let start_x = wrap_start(offset_x, tile_w);
                let start_y = wrap_start(offset_y, tile_h);
                let (sx, sy) = (tile_w / natural_w, tile_h / natural_h);
                let mut y = start_y;
                while y < canvas_h {
                    let mut x = start_x;
                    while x < canvas_w {
                        image.draw(canvas, Transform::from_row(sx, 0.0, 0.0, sy, x, y), 1.0);
                        x += tile_w;
                    }
                    y += tile_h;
                }
            }
            None => {
                image.draw(canvas, Transform::from_scale(canvas_w / natural_w, canvas_h / natural_h), 1.0);
            }
        }
        log::debug!("background {location} drawn");
        Ok(())
    }

    fn draw_logo(&self, canvas: &mut Pixmap, location: &str) -> Result<(), CompositionStageError> {
        let image = SourceImage::load(self.source.as_ref(), location, self.settings.logo_timeout())
            .map_err(|err| CompositionStageError::new(CompositionStage::Logo, err.to_string()))?;
        let (natural_w, natural_h) = image.size();
        if natural_w <= 0.0 || natural_h <= 0.0 {
            return Err(CompositionStageError::new(CompositionStage::Logo, format!("{location} is empty")));
        }
        let (canvas_w, canvas_h) = (canvas.width() as f32, canvas.height() as f32);
        let fraction = self.settings.logo_scale.clamp(0.01, 1.0);
        let scale = (canvas_w * fraction / natural_w).min(canvas_h * fraction / natural_h);
        let left = (canvas_w - natural_w * scale) / 2.0;
        let top = (canvas_h - natural_h * scale) / 2.0;
        image.draw(canvas, Transform::from_row(scale, 0.0, 0.0, scale, left, top), 1.0);
        log::debug!("logo {location} drawn");
        Ok(())
    }

    fn draw_layer(
        &mut self,
        canvas: &mut Pixmap,
        layer: &TextLayer,
        stage: CompositionStage,
    ) -> Result<(), CompositionStageError> {
        let (default_size, bold) = match stage {
            CompositionStage::Number => (self.settings.number_size, true),
            _ => (self.settings.text_size, false),
        };
        let loader = FontLoader {
            source: self.source.as_ref(),
            paths: &self.paths,
            default_font: self.settings.default_font.as_deref(),
            timeout: self.settings.font_timeout(),
        };
        let font = self
            .fonts
            .resolve(layer.font_family.as_deref(), &loader)
            .ok_or_else(|| CompositionStageError::new(stage, "no usable font face"))?;
        let position = layer.resolved_position(stage.label());
        let center = position.to_pixels(canvas.width(), canvas.height());
        let style = TextStyle {
            size: layer.size.unwrap_or(default_size),
            fill: layer.color.unwrap_or(Rgb::BLACK),
            stroke: layer.stroke,
            bold,
        };
        text::draw_text(canvas, &font, &layer.value, center, &style)
            .map_err(|message| CompositionStageError::new(stage, message))?;
        log::debug!("{stage} '{}' drawn at ({}, {})", layer.value, position.x, position.y);
        Ok(())
    }

    fn draw_overlay(&self, canvas: &mut Pixmap, location: &str) -> Result<(), CompositionStageError> {
        let image = SourceImage::load(self.source.as_ref(), location, self.settings.overlay_timeout())
            .map_err(|err| CompositionStageError::new(CompositionStage::Overlay, err.to_string()))?;
        let (natural_w, natural_h) = image.size();
        if natural_w <= 0.0 || natural_h <= 0.0 {
            return Err(CompositionStageError::new(CompositionStage::Overlay, format!("{location} is empty")));
        }
        let transform = Transform::from_scale(canvas.width() as f32 / natural_w, canvas.height() as f32 / natural_h);
        image.draw(canvas, transform, self.settings.overlay_opacity);
        Ok(())
    }
}

fn solid(color: Rgb) -> Color {
    Color::from_rgba8(color.r, color.g, color.b, 255)
}

/// Tile edge for a repeat count across `canvas` pixels; non-positive counts keep the natural size.
fn tile_edge(repeat: f32, canvas: f32, natural: f32) -> f32 {
    if repeat.is_finite() && repeat > 0.0 {
        (canvas / repeat).max(1.0)
    } else {
        natural.max(1.0)
    }
}

/// First tile origin at or before zero for an offset grid.
fn wrap_start(offset: f32, tile: f32) -> f32 {
    if !offset.is_finite() {
        return 0.0;
    }
    let rem = offset.rem_euclid(tile);
    if rem > 0.0 {
        rem - tile
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssetSource;
    use crate::zone::{BackgroundSource, PercentPos};
    use std::time::Duration;

    const FACE: &[u8] = include_bytes!("../../assets/fonts/default.ttf");

    fn png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).expect("encode png");
        out.into_inner()
    }

    fn compositor(source: MemoryAssetSource) -> Compositor {
        let settings = CompositionConfig { default_font: Some("fonts/default.ttf".into()), ..Default::default() };
        Compositor::new(Arc::new(source.with("fonts/default.ttf", FACE.to_vec())), AssetPaths::new("a"), settings)
    }

    #[test]
    fn tile_grid_covers_canvas_with_offset() {
        assert_eq!(tile_edge(4.0, 100.0, 37.0), 25.0);
        assert_eq!(tile_edge(0.0, 100.0, 37.0), 37.0);
        assert_eq!(wrap_start(10.0, 25.0), -15.0);
        assert_eq!(wrap_start(-10.0, 25.0), -10.0);
        assert_eq!(wrap_start(50.0, 25.0), 0.0);
    }

    #[test]
    fn stretched_background_fills_canvas() {
        let source = MemoryAssetSource::new().with("bg.png", png(2, 2, [0, 0, 255, 255]));
        let mut compositor = compositor(source);
        let zone = ZoneConfig { background: Some(BackgroundSource::Transient("bg.png".into())), ..Default::default() };
        let raster = compositor.compose(&zone, None, CanvasSize::square(16)).expect("compose");
        assert!(raster.skipped().is_empty());
        assert_eq!(raster.pixel(0, 0), Some([0, 0, 255, 255]));
        assert_eq!(raster.pixel(15, 15), Some([0, 0, 255, 255]));
    }

    #[test]
    fn tiled_background_honours_offset() {
        let mut tile = image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 0, 0, 0]));
        tile.put_pixel(0, 0, image::Rgba([0, 255, 0, 255]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        tile.write_to(&mut bytes, image::ImageFormat::Png).expect("encode");
        let source = MemoryAssetSource::new().with("tile.png", bytes.into_inner());
        let mut compositor = compositor(source);
        let zone = ZoneConfig {
            color: Rgb::WHITE,
            background: Some(BackgroundSource::Persistent("tile.png".into())),
            repeat: Some([0.0, 0.0]),
            offset: Some([1.0, 0.0]),
            ..Default::default()
        };
        let raster = compositor.compose(&zone, None, CanvasSize::square(4)).expect("compose");
        assert_eq!(raster.pixel(1, 0), Some([0, 255, 0, 255]));
        assert_eq!(raster.pixel(3, 2), Some([0, 255, 0, 255]));
        assert_eq!(raster.pixel(0, 0), Some([255, 255, 255, 255]));
    }

    #[test]
    fn logo_is_centred_and_fits_fraction() {
        let source = MemoryAssetSource::new().with("a/logos_catalog/star.svg", br##"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"><rect width="10" height="10" fill="#00ff00"/></svg>"##.to_vec());
        let mut compositor = compositor(source);
        let zone = ZoneConfig { logo: Some(LogoRef::Catalog("star".into())), ..Default::default() };
        let raster = compositor.compose(&zone, None, CanvasSize::square(100)).expect("compose");
        assert_eq!(raster.pixel(50, 50), Some([0, 255, 0, 255]));
        assert_eq!(raster.pixel(36, 50), Some([0, 255, 0, 255]));
        assert_eq!(raster.pixel(30, 50), Some([255, 255, 255, 255]));
    }

    #[test]
    fn logo_matching_background_is_drawn_once() {
        let source = MemoryAssetSource::new().with("same.png", png(1, 1, [9, 9, 9, 255]));
        let mut compositor = compositor(source);
        let zone = ZoneConfig {
            background: Some(BackgroundSource::Transient("same.png".into())),
            logo: Some(LogoRef::Uploaded("same.png".into())),
            ..Default::default()
        };
        compositor.compose(&zone, None, CanvasSize::square(8)).expect("compose");
    }

    #[test]
    fn number_renders_at_clamped_position() {
        let mut compositor = compositor(MemoryAssetSource::new());
        let zone = ZoneConfig {
            number: Some(TextLayer::new("8").at(150.0, 50.0).with_color(Rgb::new(255, 0, 0))),
            ..Default::default()
        };
        let raster = compositor.compose(&zone, None, CanvasSize::square(256)).expect("compose");
        assert!(raster.skipped().is_empty());
        let right_edge_red = (200..256)
            .flat_map(|x| (100..156).map(move |y| (x, y)))
            .any(|(x, y)| raster.pixel(x, y).is_some_and(|px| px[0] > 200 && px[1] < 60));
        assert!(right_edge_red, "number should be drawn at the right edge");
        assert_eq!(PercentPos::new(150.0, 50.0).clamped("n"), PercentPos::new(100.0, 50.0));
    }

    #[test]
    fn missing_overlay_is_recorded_silently() {
        let mut compositor = compositor(MemoryAssetSource::new());
        let raster = compositor
            .compose(&ZoneConfig::with_color(Rgb::BLACK), Some("a/uv_overlays/x_front.png"), CanvasSize::square(4))
            .expect("compose");
        assert_eq!(raster.skipped().len(), 1);
        assert_eq!(raster.skipped()[0].stage, CompositionStage::Overlay);
        assert_eq!(raster.pixel(2, 2), Some([0, 0, 0, 255]));
    }

    #[test]
    fn overlay_blends_at_configured_opacity() {
        let source = MemoryAssetSource::new().with("ov.png", png(1, 1, [255, 255, 255, 255]));
        let mut compositor = compositor(source);
        let raster = compositor
            .compose(&ZoneConfig::with_color(Rgb::BLACK), Some("ov.png"), CanvasSize::square(4))
            .expect("compose");
        let [r, _, _, a] = raster.pixel(1, 1).expect("pixel");
        assert_eq!(a, 255);
        assert!((70..=85).contains(&r), "overlay red {r}");
    }

    #[test]
    fn invalid_canvas_is_rejected() {
        let mut compositor = compositor(MemoryAssetSource::new());
        let err = compositor.compose(&ZoneConfig::default(), None, CanvasSize::new(0, 10)).unwrap_err();
        assert_eq!(err.stage, CompositionStage::Canvas);
        assert!(compositor.compose(&ZoneConfig::default(), None, CanvasSize::square(MAX_CANVAS_EDGE + 1)).is_err());
    }

    #[test]
    fn slow_logo_times_out_without_failing() {
        let mut source = MemoryAssetSource::new();
        source.insert_with_latency("a/logos_catalog/slow.svg", b"<svg/>".to_vec(), Duration::from_secs(60));
        let mut compositor = compositor(source);
        let zone = ZoneConfig { logo: Some(LogoRef::Catalog("slow".into())), ..ZoneConfig::with_color(Rgb::BLACK) };
        let raster = compositor.compose(&zone, None, CanvasSize::square(4)).expect("compose");
        assert_eq!(raster.skipped()[0].stage, CompositionStage::Logo);
        assert_eq!(raster.encode_png().map(|png| png.starts_with(b"\x89PNG")).ok(), Some(true));
    }
}

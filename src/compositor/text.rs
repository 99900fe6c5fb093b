use crate::zone::{Rgb, Stroke};
use rusttype::{point, Font, PositionedGlyph, Scale};
use tiny_skia::{Mask, Paint, Pixmap, Rect, Transform};

/// Largest stroke half-width in pixels; the outline filter scales with it.
const MAX_STROKE_RADIUS: f32 = 64.0;

pub struct TextStyle {
    /// Em size in pixels.
    pub size: f32,
    pub fill: Rgb,
    pub stroke: Option<Stroke>,
    pub bold: bool,
}

/// Pixel box covered by drawn text, in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextBounds {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

/// Draws `value` centred on `center`. Returns `Ok(None)` when nothing visible was drawn.
pub fn draw_text(
    canvas: &mut Pixmap,
    font: &Font<'static>,
    value: &str,
    center: (f32, f32),
    style: &TextStyle,
) -> Result<Option<TextBounds>, String> {
    if !style.size.is_finite() || style.size <= 0.0 {
        return Err(format!("invalid font size {}", style.size));
    }
    let scale = em_scale(font, style.size);
    let metrics = font.v_metrics(scale);
    let width = advance_width(font, value, scale);
    let height = metrics.ascent - metrics.descent;
    let origin = point(center.0 - width / 2.0, center.1 - height / 2.0 + metrics.ascent);
    let glyphs: Vec<PositionedGlyph<'_>> = font.layout(value, scale, origin).collect();

    let bold_radius = if style.bold { (style.size / 36.0).round().max(1.0) as usize } else { 0 };
    let stroke_radius = style
        .stroke
        .filter(|stroke| stroke.width.is_finite() && stroke.width > 0.0)
        .map(|stroke| (stroke.width / 2.0).round().clamp(1.0, MAX_STROKE_RADIUS) as usize)
        .unwrap_or(0);
    let Some(mut fill) = Coverage::for_glyphs(&glyphs, bold_radius + stroke_radius + 1, canvas) else {
        return Ok(None);
    };
    for glyph in &glyphs {
        fill.rasterize(glyph);
    }
    if bold_radius > 0 {
        fill = fill.filtered(bold_radius, f32::max);
    }

    fill.paint(canvas, style.fill)?;
    if let Some(stroke) = style.stroke.filter(|_| stroke_radius > 0) {
        let outer = fill.filtered(stroke_radius, f32::max);
        let inner = fill.filtered(stroke_radius, f32::min);
        outer.subtract(&inner).paint(canvas, stroke.color)?;
    }
    Ok(fill.bounds())
}

/// rusttype scales by ascent-to-descent height; CSS-style sizes are em sizes.
fn em_scale(font: &Font<'static>, size: f32) -> Scale {
    let unscaled = font.v_metrics_unscaled();
    let units_per_em = font.units_per_em().max(1) as f32;
    let extent = unscaled.ascent - unscaled.descent;
    if extent <= 0.0 {
        return Scale::uniform(size);
    }
    Scale::uniform(size * extent / units_per_em)
}

fn advance_width(font: &Font<'static>, value: &str, scale: Scale) -> f32 {
    font.layout(value, scale, point(0.0, 0.0))
        .map(|glyph| glyph.position().x + glyph.unpositioned().h_metrics().advance_width)
        .fold(0.0, f32::max)
}

/// Anti-aliased glyph coverage over a canvas sub-rectangle.
struct Coverage {
    x0: i32,
    y0: i32,
    width: usize,
    height: usize,
    canvas_width: u32,
    canvas_height: u32,
    data: Vec<f32>,
}

impl Coverage {
    fn for_glyphs(glyphs: &[PositionedGlyph<'_>], pad: usize, canvas: &Pixmap) -> Option<Self> {
        let boxes = glyphs.iter().filter_map(PositionedGlyph::pixel_bounding_box);
        let (min_x, min_y, max_x, max_y) = boxes.fold(None, |acc: Option<(i32, i32, i32, i32)>, bb| {
            Some(match acc {
                None => (bb.min.x, bb.min.y, bb.max.x, bb.max.y),
                Some((a, b, c, d)) => (a.min(bb.min.x), b.min(bb.min.y), c.max(bb.max.x), d.max(bb.max.y)),
            })
        })?;
        let pad = pad as i32;
        let x0 = (min_x - pad).max(0);
        let y0 = (min_y - pad).max(0);
        let x1 = (max_x + pad).min(canvas.width() as i32);
        let y1 = (max_y + pad).min(canvas.height() as i32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        let (width, height) = ((x1 - x0) as usize, (y1 - y0) as usize);
        Some(Self {
            x0,
            y0,
            width,
            height,
            canvas_width: canvas.width(),
            canvas_height: canvas.height(),
            data: vec![0.0; width * height],
        })
    }

    fn rasterize(&mut self, glyph: &PositionedGlyph<'_>) {
        let Some(bb) = glyph.pixel_bounding_box() else {
            return;
        };
        glyph.draw(|gx, gy, value| {
            let x = bb.min.x + gx as i32 - self.x0;
            let y = bb.min.y + gy as i32 - self.y0;
            if x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height {
                let cell = &mut self.data[y as usize * self.width + x as usize];
                *cell = cell.max(value.clamp(0.0, 1.0));
            }
        });
    }

    fn get(&self, x: isize, y: isize) -> f32 {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            0.0
        } else {
            self.data[y as usize * self.width + x as usize]
        }
    }

    /// Square-window morphology: `f32::max` dilates, `f32::min` erodes.
    fn filtered(&self, radius: usize, combine: fn(f32, f32) -> f32) -> Coverage {
        let r = radius as isize;
        let mut horizontal = vec![0.0; self.data.len()];
        for y in 0..self.height as isize {
            for x in 0..self.width as isize {
                let mut acc = self.get(x, y);
                for d in 1..=r {
                    acc = combine(acc, combine(self.get(x - d, y), self.get(x + d, y)));
                }
                horizontal[y as usize * self.width + x as usize] = acc;
            }
        }
        let pass = Coverage { data: horizontal, ..self.with_data(Vec::new()) };
        let mut data = vec![0.0; self.data.len()];
        for y in 0..self.height as isize {
            for x in 0..self.width as isize {
                let mut acc = pass.get(x, y);
                for d in 1..=r {
                    acc = combine(acc, combine(pass.get(x, y - d), pass.get(x, y + d)));
                }
                data[y as usize * self.width + x as usize] = acc;
            }
        }
        self.with_data(data)
    }

    fn subtract(&self, other: &Coverage) -> Coverage {
        let data = self.data.iter().zip(&other.data).map(|(a, b)| (a - b).max(0.0)).collect();
        self.with_data(data)
    }

    fn with_data(&self, data: Vec<f32>) -> Coverage {
        Coverage {
            x0: self.x0,
            y0: self.y0,
            width: self.width,
            height: self.height,
            canvas_width: self.canvas_width,
            canvas_height: self.canvas_height,
            data,
        }
    }

    fn bounds(&self) -> Option<TextBounds> {
        let mut bounds: Option<TextBounds> = None;
        for (i, value) in self.data.iter().enumerate() {
            if *value < 0.5 {
                continue;
            }
            let x = self.x0 + (i % self.width) as i32;
            let y = self.y0 + (i / self.width) as i32;
            bounds = Some(match bounds {
                None => TextBounds { min_x: x, min_y: y, max_x: x, max_y: y },
                Some(b) => TextBounds {
                    min_x: b.min_x.min(x),
                    min_y: b.min_y.min(y),
                    max_x: b.max_x.max(x),
                    max_y: b.max_y.max(y),
                },
            });
        }
        bounds
    }

    fn paint(&self, canvas: &mut Pixmap, color: Rgb) -> Result<(), String> {
        let mut mask = Mask::new(self.canvas_width, self.canvas_height).ok_or("text mask has no area")?;
        let stride = self.canvas_width as usize;
        let target = mask.data_mut();
        for row in 0..self.height {
            for col in 0..self.width {
                let value = self.data[row * self.width + col];
                if value > 0.0 {
                    let index = (self.y0 as usize + row) * stride + self.x0 as usize + col;
                    target[index] = (value * 255.0).round() as u8;
                }
            }
        }
        let mut paint = Paint::default();
        paint.set_color_rgba8(color.r, color.g, color.b, 255);
        let area = Rect::from_xywh(0.0, 0.0, self.canvas_width as f32, self.canvas_height as f32)
            .ok_or("text area is empty")?;
        canvas.fill_rect(area, &paint, Transform::identity(), Some(&mask));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face() -> Font<'static> {
        Font::try_from_vec(include_bytes!("../../assets/fonts/default.ttf").to_vec()).expect("font")
    }

    fn canvas() -> Pixmap {
        let mut pixmap = Pixmap::new(200, 200).expect("canvas");
        pixmap.fill(tiny_skia::Color::WHITE);
        pixmap
    }

    fn style(bold: bool, stroke: Option<Stroke>) -> TextStyle {
        TextStyle { size: 48.0, fill: Rgb::new(255, 0, 0), stroke, bold }
    }

    #[test]
    fn text_is_centred_on_position() {
        let mut pixmap = canvas();
        let bounds = draw_text(&mut pixmap, &face(), "HH", (100.0, 60.0), &style(false, None))
            .expect("draw")
            .expect("visible");
        let mid_x = (bounds.min_x + bounds.max_x) as f32 / 2.0;
        let mid_y = (bounds.min_y + bounds.max_y) as f32 / 2.0;
        assert!((mid_x - 100.0).abs() <= 3.0, "x centre {mid_x}");
        assert!((mid_y - 60.0).abs() <= 8.0, "y centre {mid_y}");
        let px = pixmap.pixel(bounds.min_x as u32 + 2, 60).expect("pixel");
        assert_eq!((px.red(), px.green()), (255, 0));
    }

    #[test]
    fn bold_covers_more_than_regular() {
        let mut regular = canvas();
        let mut bold = canvas();
        draw_text(&mut regular, &face(), "7", (100.0, 100.0), &style(false, None)).expect("draw");
        draw_text(&mut bold, &face(), "7", (100.0, 100.0), &style(true, None)).expect("draw");
        let inked = |p: &Pixmap| p.pixels().iter().filter(|px| px.green() < 128).count();
        assert!(inked(&bold) > inked(&regular));
    }

    #[test]
    fn stroke_ring_uses_stroke_color() {
        let mut pixmap = canvas();
        let stroke = Stroke { color: Rgb::new(0, 0, 255), width: 4.0 };
        draw_text(&mut pixmap, &face(), "O", (100.0, 100.0), &style(false, Some(stroke))).expect("draw");
        let blue = pixmap.pixels().iter().filter(|px| px.blue() > 200 && px.red() < 60).count();
        assert!(blue > 20, "stroke pixels {blue}");
    }

    #[test]
    fn whitespace_draws_nothing() {
        let mut pixmap = canvas();
        assert_eq!(draw_text(&mut pixmap, &face(), "   ", (50.0, 50.0), &style(false, None)), Ok(None));
        assert!(draw_text(&mut pixmap, &face(), "x", (50.0, 50.0), &TextStyle { size: 0.0, ..style(false, None) })
            .is_err());
    }

    #[test]
    fn oversized_stroke_is_capped() {
        let mut pixmap = canvas();
        let stroke = Stroke { color: Rgb::new(0, 0, 255), width: 1e6 };
        draw_text(&mut pixmap, &face(), "O", (100.0, 100.0), &style(false, Some(stroke))).expect("draw");
        let corner = pixmap.pixel(0, 0).expect("pixel");
        assert_eq!((corner.red(), corner.green(), corner.blue()), (255, 255, 255));
    }
}

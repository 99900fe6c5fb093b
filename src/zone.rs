use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Zone ids used before a model's own zones are known.
pub const DEFAULT_ZONE_IDS: [&str; 4] = ["front", "back", "sleeve_left", "sleeve_right"];

pub fn default_zone_ids() -> Vec<String> {
    DEFAULT_ZONE_IDS.iter().map(|id| id.to_string()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(0xff, 0xff, 0xff);
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rrggbb` or `#rgb`; the leading `#` is optional.
    pub fn parse_hex(raw: &str) -> Option<Self> {
        let hex = raw.trim().trim_start_matches('#');
        let digits: Vec<u8> = hex.chars().map(|c| c.to_digit(16).map(|d| d as u8)).collect::<Option<_>>()?;
        match digits.as_slice() {
            [r, g, b] => Some(Self::new(r * 17, g * 17, b * 17)),
            [r1, r2, g1, g2, b1, b2] => Some(Self::new(r1 * 16 + r2, g1 * 16 + g2, b1 * 16 + b2)),
            _ => None,
        }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    pub fn to_linear(self) -> [f32; 3] {
        fn channel(v: u8) -> f32 {
            let c = v as f32 / 255.0;
            if c <= 0.04045 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        }
        [channel(self.r), channel(self.g), channel(self.b)]
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Rgb::WHITE
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Rgb {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Rgb::parse_hex(&value).ok_or_else(|| format!("invalid hex color '{value}'"))
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        value.to_hex()
    }
}

/// Clamps a percentage into `[0, 100]`. Non-finite input maps to the centre.
pub fn clamp_percent(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        50.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentPos {
    #[serde(rename = "xPercent")]
    pub x: f32,
    #[serde(rename = "yPercent")]
    pub y: f32,
}

impl PercentPos {
    pub const CENTER: PercentPos = PercentPos { x: 50.0, y: 50.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Returns the position clamped into `[0, 100]`, logging when a component moved.
    pub fn clamped(self, what: &str) -> PercentPos {
        let clamped = PercentPos::new(clamp_percent(self.x), clamp_percent(self.y));
        if clamped != self {
            log::warn!(
                "{what} position ({}, {}) out of range, clamped to ({}, {})",
                self.x,
                self.y,
                clamped.x,
                clamped.y
            );
        }
        clamped
    }

    /// Pixel position of this percentage on a canvas of the given size.
    pub fn to_pixels(self, width: u32, height: u32) -> (f32, f32) {
        (self.x * width as f32 / 100.0, self.y * height as f32 / 100.0)
    }
}

impl Default for PercentPos {
    fn default() -> Self {
        Self::CENTER
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    #[serde(default = "Stroke::default_color")]
    pub color: Rgb,
    #[serde(default = "Stroke::default_width")]
    pub width: f32,
}

impl Stroke {
    const fn default_color() -> Rgb {
        Rgb::BLACK
    }

    const fn default_width() -> f32 {
        2.0
    }
}

impl Default for Stroke {
    fn default() -> Self {
        Self { color: Self::default_color(), width: Self::default_width() }
    }
}

/// Text or number drawn onto a zone. Numbers always render bold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TextLayer {
    #[serde(deserialize_with = "string_or_number")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(default, alias = "fontSize", skip_serializing_if = "Option::is_none")]
    pub size: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<Stroke>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_percent: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_percent: Option<f32>,
}

impl TextLayer {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into(), ..Default::default() }
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.set_position(PercentPos::new(x, y));
        self
    }

    /// Explicit position, if either axis was given. A missing axis sits at 50.
    pub fn position(&self) -> Option<PercentPos> {
        if self.x_percent.is_none() && self.y_percent.is_none() {
            return None;
        }
        let center = PercentPos::CENTER;
        Some(PercentPos::new(self.x_percent.unwrap_or(center.x), self.y_percent.unwrap_or(center.y)))
    }

    pub fn set_position(&mut self, position: PercentPos) {
        self.x_percent = Some(position.x);
        self.y_percent = Some(position.y);
    }

    pub fn with_color(mut self, color: Rgb) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_size(mut self, size: f32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_font(mut self, family: impl Into<String>) -> Self {
        self.font_family = Some(family.into());
        self
    }

    pub fn with_stroke(mut self, stroke: Stroke) -> Self {
        self.stroke = Some(stroke);
        self
    }

    pub fn is_visible(&self) -> bool {
        !self.value.trim().is_empty()
    }

    /// Position clamped for drawing; absent positions default to the centre.
    pub fn resolved_position(&self, what: &str) -> PercentPos {
        self.position().unwrap_or(PercentPos::CENTER).clamped(what)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
    })
}

/// Where a zone's background raster comes from. A persistent location (stable
/// URL or design texture) always supersedes a transient local reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackgroundSource {
    Persistent(String),
    Transient(String),
}

impl BackgroundSource {
    pub fn location(&self) -> &str {
        match self {
            BackgroundSource::Persistent(location) | BackgroundSource::Transient(location) => location,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogoRef {
    /// Id into the logo catalog, resolved through the asset path conventions.
    Catalog(String),
    /// Location of an uploaded image.
    Uploaded(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneConfig {
    #[serde(default)]
    pub color: Rgb,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<BackgroundSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<LogoRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<TextLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<[f32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<[f32; 2]>,
}

impl ZoneConfig {
    pub fn with_color(color: Rgb) -> Self {
        Self { color, ..Default::default() }
    }

    /// Offset used when tiling; zero when unset.
    pub fn tile_offset(&self) -> (f32, f32) {
        self.offset.map(|[x, y]| (x, y)).unwrap_or((0.0, 0.0))
    }
}

/// Which layer of a zone a picked position applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Text,
    Number,
}

/// Per-zone configuration state. Every mutation bumps `generation`.
#[derive(Debug, Clone, Default)]
pub struct ZoneConfigs {
    zones: BTreeMap<String, ZoneConfig>,
    generation: u64,
}

impl ZoneConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zone_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let zones = ids.into_iter().map(|id| (id.into(), ZoneConfig::default())).collect();
        Self { zones, generation: 0 }
    }

    pub fn from_map(zones: BTreeMap<String, ZoneConfig>) -> Self {
        Self { zones, generation: 0 }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Failed to read zone configs {}", path.display()))?;
        let zones: BTreeMap<String, ZoneConfig> = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse zone configs {}", path.display()))?;
        Ok(Self::from_map(zones))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.zones).context("Failed to serialize zone configs")
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, zone_id: &str) -> Option<&ZoneConfig> {
        self.zones.get(zone_id)
    }

    pub fn zone_ids(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ZoneConfig)> {
        self.zones.iter().map(|(id, cfg)| (id.as_str(), cfg))
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Adds empty configs for ids not seen before; existing zones are untouched.
    pub fn ensure_zones<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        let mut added = false;
        for id in ids {
            if !self.zones.contains_key(id) {
                self.zones.insert(id.to_string(), ZoneConfig::default());
                added = true;
            }
        }
        if added {
            self.bump();
        }
    }

    pub fn set_color(&mut self, zone_id: &str, color: Rgb) {
        self.zone_mut(zone_id).color = color;
        self.bump();
    }

    /// Sets a persistent background and drops any transient one.
    pub fn set_texture_url(&mut self, zone_id: &str, location: impl Into<String>) {
        self.zone_mut(zone_id).background = Some(BackgroundSource::Persistent(location.into()));
        self.bump();
    }

    /// Sets a transient background unless a persistent one is already authoritative.
    pub fn set_image_url(&mut self, zone_id: &str, location: impl Into<String>) {
        let zone = self.zone_mut(zone_id);
        match &zone.background {
            Some(BackgroundSource::Persistent(existing)) => {
                log::debug!("zone '{zone_id}' keeps persistent background '{existing}'");
            }
            _ => zone.background = Some(BackgroundSource::Transient(location.into())),
        }
        self.bump();
    }

    pub fn clear_background(&mut self, zone_id: &str) {
        self.zone_mut(zone_id).background = None;
        self.bump();
    }

    pub fn set_logo(&mut self, zone_id: &str, logo: Option<LogoRef>) {
        self.zone_mut(zone_id).logo = logo;
        self.bump();
    }

    pub fn set_text(&mut self, zone_id: &str, text: Option<TextLayer>) {
        self.zone_mut(zone_id).text = text;
        self.bump();
    }

    pub fn set_number(&mut self, zone_id: &str, number: Option<TextLayer>) {
        self.zone_mut(zone_id).number = number;
        self.bump();
    }

    pub fn set_repeat(&mut self, zone_id: &str, repeat: Option<[f32; 2]>) {
        self.zone_mut(zone_id).repeat = repeat;
        self.bump();
    }

    pub fn set_offset(&mut self, zone_id: &str, offset: Option<[f32; 2]>) {
        self.zone_mut(zone_id).offset = offset;
        self.bump();
    }

    /// Moves a text or number layer. Returns false when the zone has no such layer.
    pub fn place_layer(&mut self, zone_id: &str, kind: LayerKind, position: PercentPos) -> bool {
        let position = position.clamped("placed layer");
        let Some(zone) = self.zones.get_mut(zone_id) else {
            return false;
        };
        let layer = match kind {
            LayerKind::Text => zone.text.as_mut(),
            LayerKind::Number => zone.number.as_mut(),
        };
        match layer {
            Some(layer) => {
                layer.set_position(position);
                self.bump();
                true
            }
            None => false,
        }
    }

    /// Restores every known zone to its default configuration.
    pub fn reset(&mut self) {
        for zone in self.zones.values_mut() {
            *zone = ZoneConfig::default();
        }
        self.bump();
    }

    fn zone_mut(&mut self, zone_id: &str) -> &mut ZoneConfig {
        self.zones.entry(zone_id.to_string()).or_default()
    }

    fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors_parse_both_forms() {
        assert_eq!(Rgb::parse_hex("#ff0000"), Some(Rgb::new(255, 0, 0)));
        assert_eq!(Rgb::parse_hex("0f0"), Some(Rgb::new(0, 255, 0)));
        assert_eq!(Rgb::parse_hex("#12345"), None);
        assert_eq!(Rgb::parse_hex("#gg0000"), None);
        assert_eq!(Rgb::new(0xf5, 0xf5, 0xf5).to_hex(), "#f5f5f5");
    }

    #[test]
    fn clamp_moves_to_closest_boundary() {
        for (input, expected) in [(-20.0, 0.0), (140.0, 100.0), (42.5, 42.5), (0.0, 0.0), (100.0, 100.0)] {
            assert_eq!(clamp_percent(input), expected);
        }
        assert_eq!(clamp_percent(f32::NAN), 50.0);
        let pos = PercentPos::new(-5.0, 105.0).clamped("test");
        assert_eq!(pos, PercentPos::new(0.0, 100.0));
    }

    #[test]
    fn persistent_background_supersedes_transient() {
        let mut zones = ZoneConfigs::with_zone_ids(default_zone_ids());
        zones.set_image_url("front", "local://upload.png");
        assert_eq!(
            zones.get("front").and_then(|z| z.background.clone()),
            Some(BackgroundSource::Transient("local://upload.png".into()))
        );
        zones.set_texture_url("front", "https://cdn/a.png");
        zones.set_image_url("front", "local://other.png");
        assert_eq!(
            zones.get("front").and_then(|z| z.background.clone()),
            Some(BackgroundSource::Persistent("https://cdn/a.png".into()))
        );
    }

    #[test]
    fn every_mutation_bumps_generation() {
        let mut zones = ZoneConfigs::new();
        let start = zones.generation();
        zones.set_color("back", Rgb::new(1, 2, 3));
        zones.set_number("back", Some(TextLayer::new("10")));
        zones.set_number("back", None);
        zones.reset();
        assert_eq!(zones.generation(), start + 4);
        assert_eq!(zones.get("back"), Some(&ZoneConfig::default()));
    }

    #[test]
    fn place_layer_requires_existing_layer() {
        let mut zones = ZoneConfigs::new();
        zones.set_text("front", Some(TextLayer::new("TEAM")));
        assert!(zones.place_layer("front", LayerKind::Text, PercentPos::new(25.0, 120.0)));
        assert!(!zones.place_layer("front", LayerKind::Number, PercentPos::CENTER));
        let text = zones.get("front").and_then(|z| z.text.clone()).expect("text layer");
        assert_eq!(text.position(), Some(PercentPos::new(25.0, 100.0)));
    }

    #[test]
    fn zone_json_accepts_numeric_values() {
        let json = r##"{
            "back": {
                "color": "#112233",
                "number": { "value": 23, "size": 90, "xPercent": 50, "yPercent": 40 },
                "text": { "value": "ACE", "fontFamily": "Oswald", "fontSize": 40, "stroke": { "width": 3 } },
                "background": { "persistent": "assets/textures/camo.png" },
                "logo": { "catalog": "eagle" },
                "repeat": [2, 2]
            }
        }"##;
        let zones: BTreeMap<String, ZoneConfig> = serde_json::from_str(json).expect("parse zones");
        let back = &zones["back"];
        assert_eq!(back.color, Rgb::new(0x11, 0x22, 0x33));
        let number = back.number.as_ref().expect("number");
        assert_eq!(number.value, "23");
        assert_eq!(number.position(), Some(PercentPos::new(50.0, 40.0)));
        let text = back.text.as_ref().expect("text");
        assert_eq!(text.size, Some(40.0));
        assert_eq!(text.stroke, Some(Stroke { color: Rgb::BLACK, width: 3.0 }));
        assert!(text.position().is_none());
        assert_eq!(back.logo, Some(LogoRef::Catalog("eagle".into())));
    }

    #[test]
    fn single_axis_keeps_the_other_centered() {
        let layer: TextLayer = serde_json::from_str(r#"{"value":"7","xPercent":10}"#).expect("layer");
        assert_eq!(layer.position(), Some(PercentPos::new(10.0, 50.0)));
        let layer: TextLayer = serde_json::from_str(r#"{"value":"7","yPercent":-20}"#).expect("layer");
        assert_eq!(layer.resolved_position("number"), PercentPos::new(50.0, 0.0));
    }
}

use crate::assets::{AssetPaths, AssetSource};
use rusttype::Font;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Family names that always resolve to the default face without a fetch.
const SYSTEM_FAMILIES: [&str; 2] = ["Arial", "sans-serif"];

/// Load outcome of one font family.
#[derive(Clone)]
pub enum FontStatus {
    Ready(Arc<Font<'static>>),
    /// Every candidate file failed; draws fall back to the default face.
    Unavailable,
}

impl FontStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, FontStatus::Ready(_))
    }
}

/// Font faces keyed by family, owned by one compositor.
///
/// A family is fetched at most once; failures are remembered so later
/// compositions do not retry them.
#[derive(Default)]
pub struct FontCache {
    families: HashMap<String, FontStatus>,
    default_face: Option<FontStatus>,
}

impl FontCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, family: &str) -> Option<&FontStatus> {
        self.families.get(family)
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    pub fn clear(&mut self) {
        self.families.clear();
        self.default_face = None;
    }

    /// Registers an already decoded face for `family`.
    pub fn insert(&mut self, family: impl Into<String>, font: Font<'static>) {
        self.families.insert(family.into(), FontStatus::Ready(Arc::new(font)));
    }

    /// Resolves the face to draw `family` with, loading it on first use.
    /// Returns `None` only when neither the family nor the default face is usable.
    pub fn resolve(&mut self, family: Option<&str>, loader: &FontLoader<'_>) -> Option<Arc<Font<'static>>> {
        let family = family.map(str::trim).filter(|name| !name.is_empty());
        if let Some(name) = family.filter(|name| !SYSTEM_FAMILIES.contains(name)) {
            if !self.families.contains_key(name) {
                let status = loader.load_family(name);
                self.families.insert(name.to_string(), status);
            }
            if let Some(FontStatus::Ready(font)) = self.families.get(name) {
                return Some(font.clone());
            }
        }
        self.default_face(loader)
    }

    fn default_face(&mut self, loader: &FontLoader<'_>) -> Option<Arc<Font<'static>>> {
        let status = self.default_face.get_or_insert_with(|| loader.load_default());
        match status {
            FontStatus::Ready(font) => Some(font.clone()),
            FontStatus::Unavailable => None,
        }
    }
}

/// Borrowed view of what a font fetch needs.
pub struct FontLoader<'a> {
    pub source: &'a dyn AssetSource,
    pub paths: &'a AssetPaths,
    pub default_font: Option<&'a str>,
    pub timeout: Duration,
}

impl FontLoader<'_> {
    fn load_family(&self, family: &str) -> FontStatus {
        for candidate in self.paths.font_candidates(family) {
            match self.load_file(&candidate) {
                Ok(font) => {
                    log::debug!("font family '{family}' loaded from {candidate}");
                    return FontStatus::Ready(Arc::new(font));
                }
                Err(message) => log::debug!("font candidate {candidate} rejected: {message}"),
            }
        }
        log::warn!("font family '{family}' failed to load; using the default face");
        FontStatus::Unavailable
    }

    fn load_default(&self) -> FontStatus {
        let Some(location) = self.default_font else {
            log::warn!("no default font configured; text layers cannot be drawn");
            return FontStatus::Unavailable;
        };
        match self.load_file(location) {
            Ok(font) => FontStatus::Ready(Arc::new(font)),
            Err(message) => {
                log::warn!("default font {location} failed to load: {message}");
                FontStatus::Unavailable
            }
        }
    }

    fn load_file(&self, location: &str) -> Result<Font<'static>, String> {
        let bytes = self.source.fetch(location, self.timeout).map_err(|err| err.to_string())?;
        Font::try_from_vec(bytes).ok_or_else(|| "not a TrueType or OpenType font".to_string())
    }
}

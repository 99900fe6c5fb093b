use crate::error::UploadError;
use image::{imageops::FilterType, ImageFormat};
use regex::Regex;
use std::borrow::Cow;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
/// Raster uploads above this edge length are downscaled before storage.
pub const MAX_RASTER_EDGE: u32 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Png,
    Jpeg,
    Svg,
}

impl UploadKind {
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/svg+xml" => Some(Self::Svg),
            _ => None,
        }
    }

    /// MIME type guessed from a file extension, for files picked from disk.
    pub fn mime_for_path(path: &Path) -> Option<&'static str> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some("image/png"),
            "jpg" | "jpeg" => Some("image/jpeg"),
            "svg" => Some("image/svg+xml"),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Svg => "svg",
        }
    }

    fn image_format(self) -> Option<ImageFormat> {
        match self {
            Self::Png => Some(ImageFormat::Png),
            Self::Jpeg => Some(ImageFormat::Jpeg),
            Self::Svg => None,
        }
    }
}

/// A file handed to an uploader.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { name: name.into(), mime: mime.into(), bytes }
    }

    /// Reads a file from disk, guessing its MIME type from the extension.
    pub fn from_path(path: &Path) -> Result<Self, UploadError> {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let bytes = fs::read(path).map_err(|source| UploadError::Io { name: name.clone(), source })?;
        let mime = UploadKind::mime_for_path(path).unwrap_or("application/octet-stream");
        Ok(Self::new(name, mime, bytes))
    }
}

/// Where an accepted upload can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub url: String,
}

/// Checks size and type before anything is stored.
pub fn validate_upload(file: &UploadFile) -> Result<UploadKind, UploadError> {
    let size = file.bytes.len() as u64;
    if size == 0 {
        return Err(UploadError::EmptyFile);
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(UploadError::TooLarge { size, limit: MAX_UPLOAD_BYTES });
    }
    UploadKind::from_mime(&file.mime).ok_or_else(|| UploadError::UnsupportedType { mime: file.mime.clone() })
}

/// Strips executable content from SVG markup.
pub struct SvgSanitizer {
    script_blocks: Regex,
    script_tags: Regex,
    event_handlers: Regex,
    javascript_urls: Regex,
}

impl SvgSanitizer {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            script_blocks: Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>")?,
            script_tags: Regex::new(r"(?i)<script\b[^>]*/?>")?,
            event_handlers: Regex::new(r#"(?i)\s+on[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#)?,
            javascript_urls: Regex::new(r"(?i)javascript\s*:")?,
        })
    }

    pub fn sanitize<'a>(&self, svg: &'a str) -> Cow<'a, str> {
        let mut out = Cow::Borrowed(svg);
        for pattern in [&self.script_blocks, &self.script_tags, &self.event_handlers, &self.javascript_urls] {
            let replaced = match pattern.replace_all(&out, "") {
                Cow::Owned(replaced) => Some(replaced),
                Cow::Borrowed(_) => None,
            };
            if let Some(replaced) = replaced {
                out = Cow::Owned(replaced);
            }
        }
        out
    }
}

pub trait Uploader {
    fn upload(&mut self, file: UploadFile) -> Result<UploadReceipt, UploadError>;
}

/// Stores uploads under `{base}/uploads/{unix_millis}_{uuid}.{ext}`.
pub struct LocalUploader {
    dir: PathBuf,
    sanitizer: SvgSanitizer,
}

impl LocalUploader {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self { dir: dir.into(), sanitizer: SvgSanitizer::new()? })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn prepare(&self, kind: UploadKind, file: &UploadFile) -> Result<Vec<u8>, UploadError> {
        match kind {
            UploadKind::Svg => {
                let text = std::str::from_utf8(&file.bytes)
                    .map_err(|_| UploadError::Rejected(format!("'{}' is not UTF-8 SVG text", file.name)))?;
                if !text.contains("<svg") {
                    return Err(UploadError::Rejected(format!("'{}' has no <svg> element", file.name)));
                }
                let clean = self.sanitizer.sanitize(text);
                if matches!(clean, Cow::Owned(_)) {
                    log::warn!("removed script content from '{}'", file.name);
                }
                Ok(clean.into_owned().into_bytes())
            }
            UploadKind::Png | UploadKind::Jpeg => downscale_raster(kind, file),
        }
    }
}

impl Uploader for LocalUploader {
    fn upload(&mut self, file: UploadFile) -> Result<UploadReceipt, UploadError> {
        let kind = validate_upload(&file)?;
        let bytes = self.prepare(kind, &file)?;
        let millis = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or_default();
        let stored = format!("{millis}_{}.{}", uuid::Uuid::new_v4(), kind.extension());
        let io_err = |source| UploadError::Io { name: file.name.clone(), source };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let path = self.dir.join(&stored);
        fs::write(&path, &bytes).map_err(io_err)?;
        log::info!("stored upload '{}' as {}", file.name, path.display());
        Ok(UploadReceipt { url: path.to_string_lossy().replace('\\', "/") })
    }
}

fn downscale_raster(kind: UploadKind, file: &UploadFile) -> Result<Vec<u8>, UploadError> {
    let decoded = image::load_from_memory(&file.bytes)
        .map_err(|err| UploadError::Rejected(format!("'{}' could not be decoded: {err}", file.name)))?;
    if decoded.width() <= MAX_RASTER_EDGE && decoded.height() <= MAX_RASTER_EDGE {
        return Ok(file.bytes.clone());
    }
    let resized = decoded.resize(MAX_RASTER_EDGE, MAX_RASTER_EDGE, FilterType::Triangle);
    log::debug!(
        "downscaled '{}' from {}x{} to {}x{}",
        file.name,
        decoded.width(),
        decoded.height(),
        resized.width(),
        resized.height()
    );
    let format = kind.image_format().unwrap_or(ImageFormat::Png);
    let resized = if format == ImageFormat::Jpeg { image::DynamicImage::ImageRgb8(resized.into_rgb8()) } else { resized };
    let mut out = Cursor::new(Vec::new());
    resized
        .write_to(&mut out, format)
        .map_err(|err| UploadError::Rejected(format!("'{}' could not be re-encoded: {err}", file.name)))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).expect("encode png");
        out.into_inner()
    }

    #[test]
    fn validation_rejects_out_of_policy_files() {
        assert!(matches!(validate_upload(&UploadFile::new("a.png", "image/png", vec![])), Err(UploadError::EmptyFile)));
        let big = UploadFile::new("a.png", "image/png", vec![0; MAX_UPLOAD_BYTES as usize + 1]);
        assert!(matches!(validate_upload(&big), Err(UploadError::TooLarge { .. })));
        let gif = UploadFile::new("a.gif", "image/gif", vec![1]);
        assert!(matches!(validate_upload(&gif), Err(UploadError::UnsupportedType { .. })));
        assert_eq!(validate_upload(&UploadFile::new("a.jpg", "image/jpg", vec![1])).expect("jpg"), UploadKind::Jpeg);
        let exact = UploadFile::new("a.svg", "image/svg+xml", vec![b' '; MAX_UPLOAD_BYTES as usize]);
        assert_eq!(validate_upload(&exact).expect("at limit"), UploadKind::Svg);
    }

    #[test]
    fn sanitizer_strips_scripts_and_handlers() {
        let sanitizer = SvgSanitizer::new().expect("patterns");
        let dirty = r#"<svg onload="alert(1)"><script type="x">evil()</script><a href="javascript:go()">x</a><SCRIPT src="a.js"/></svg>"#;
        let clean = sanitizer.sanitize(dirty);
        assert_eq!(clean, r#"<svg><a href="go()">x</a></svg>"#);
        assert!(matches!(sanitizer.sanitize("<svg/>"), Cow::Borrowed(_)));
    }

    #[test]
    fn local_uploader_stores_with_unique_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut uploader = LocalUploader::new(dir.path().join("uploads")).expect("uploader");
        let first = uploader.upload(UploadFile::new("logo.png", "image/png", png(4, 4))).expect("upload");
        let second = uploader.upload(UploadFile::new("logo.png", "image/png", png(4, 4))).expect("upload");
        assert_ne!(first.url, second.url);
        assert!(first.url.ends_with(".png"));
        assert!(Path::new(&first.url).exists());

        let svg = uploader
            .upload(UploadFile::new("mark.svg", "image/svg+xml", br#"<svg onclick='x()'></svg>"#.to_vec()))
            .expect("svg upload");
        assert_eq!(fs::read_to_string(&svg.url).expect("read svg"), "<svg></svg>");
    }

    #[test]
    fn oversized_rasters_are_downscaled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut uploader = LocalUploader::new(dir.path()).expect("uploader");
        let receipt = uploader.upload(UploadFile::new("wide.png", "image/png", png(4096, 1024))).expect("upload");
        let stored = image::open(&receipt.url).expect("stored image");
        assert_eq!((stored.width(), stored.height()), (2048, 512));
    }

    #[test]
    fn undecodable_raster_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut uploader = LocalUploader::new(dir.path()).expect("uploader");
        let err = uploader.upload(UploadFile::new("fake.png", "image/png", b"not a png".to_vec())).unwrap_err();
        assert!(matches!(err, UploadError::Rejected(_)));
        assert_eq!(fs::read_dir(dir.path()).expect("dir").count(), 0);
    }
}

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure to obtain the raw bytes behind an asset location.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("asset '{location}' was not found")]
    NotFound { location: String },
    #[error("fetching '{location}' timed out after {}ms", .timeout.as_millis())]
    Timeout { location: String, timeout: Duration },
    #[error("failed to read '{location}': {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
    #[error("request for '{location}' failed: {message}")]
    Http { location: String, message: String },
}

impl FetchError {
    pub fn location(&self) -> &str {
        match self {
            FetchError::NotFound { location }
            | FetchError::Timeout { location, .. }
            | FetchError::Io { location, .. }
            | FetchError::Http { location, .. } => location,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }
}

/// Fatal to a single model load attempt. Never retried automatically.
#[derive(Debug, Error)]
pub enum AssetLoadError {
    #[error("failed to fetch model asset: {0}")]
    Fetch(#[from] FetchError),
    #[error("failed to parse model asset '{location}': {message}")]
    Parse { location: String, message: String },
    #[error("model asset '{location}' contains no drawable triangle meshes")]
    Empty { location: String },
}

/// Model config documents are optional; callers fall back to material names.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to fetch model config: {0}")]
    Fetch(#[from] FetchError),
    #[error("failed to parse model config '{location}': {source}")]
    Parse {
        location: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositionStage {
    Canvas,
    Background,
    Logo,
    Text,
    Number,
    Overlay,
    Encode,
}

impl CompositionStage {
    pub fn label(self) -> &'static str {
        match self {
            CompositionStage::Canvas => "canvas",
            CompositionStage::Background => "background",
            CompositionStage::Logo => "logo",
            CompositionStage::Text => "text",
            CompositionStage::Number => "number",
            CompositionStage::Overlay => "overlay",
            CompositionStage::Encode => "encode",
        }
    }
}

impl fmt::Display for CompositionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single compositor stage that could not be drawn. The stage is skipped.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {message}")]
pub struct CompositionStageError {
    pub stage: CompositionStage,
    pub message: String,
}

impl CompositionStageError {
    pub fn new(stage: CompositionStage, message: impl Into<String>) -> Self {
        Self { stage, message: message.into() }
    }
}

/// Failure to produce or bind one zone's texture. Other zones are unaffected.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Composition(#[from] CompositionStageError),
    #[error("failed to upload texture '{key}': {message}")]
    Upload { key: String, message: String },
    #[error("surface for zone '{zone_id}' is no longer part of the scene")]
    StaleSurface { zone_id: String },
}

/// Upload failures are user facing and carry a descriptive message.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("the selected file is empty")]
    EmptyFile,
    #[error("file is {} bytes; the upload limit is {} MB", .size, .limit / (1024 * 1024))]
    TooLarge { size: u64, limit: u64 },
    #[error("file type '{mime}' is not allowed; use PNG, JPEG or SVG")]
    UnsupportedType { mime: String },
    #[error("failed to store upload '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("upload rejected: {0}")]
    Rejected(String),
}

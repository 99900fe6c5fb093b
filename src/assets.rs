use crate::error::FetchError;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

/// Upper bound on a single fetched asset.
const MAX_FETCH_BYTES: u64 = 64 * 1024 * 1024;

/// Location conventions for everything the configurator loads by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPaths {
    base: String,
}

impl AssetPaths {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        let trimmed = base.trim_end_matches('/');
        let base = if trimmed.is_empty() && base.starts_with('/') { "/".to_string() } else { trimmed.to_string() };
        Self { base }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn model(&self, model_id: &str) -> String {
        self.join(&format!("models/{model_id}.glb"))
    }

    pub fn model_config(&self, model_id: &str) -> String {
        self.join(&format!("models/{model_id}.config.json"))
    }

    pub fn uv_overlay(&self, model_id: &str, zone_id: &str) -> String {
        self.join(&format!("uv_overlays/{model_id}_{zone_id}.png"))
    }

    pub fn logo(&self, logo_id: &str) -> String {
        self.join(&format!("logos_catalog/{logo_id}.svg"))
    }

    /// Candidate files for a font family, most preferred first. Only TrueType and
    /// OpenType outlines can be rasterised, so `.woff2` is tried last.
    pub fn font_candidates(&self, family: &str) -> Vec<String> {
        ["ttf", "otf", "woff2"].iter().map(|ext| self.join(&format!("fonts/{family}.{ext}"))).collect()
    }

    pub fn uploads_dir(&self) -> PathBuf {
        PathBuf::from(self.join("uploads"))
    }

    fn join(&self, relative: &str) -> String {
        if self.base.is_empty() {
            relative.to_string()
        } else if self.base.ends_with('/') {
            format!("{}{relative}", self.base)
        } else {
            format!("{}/{relative}", self.base)
        }
    }
}

/// Source of raw asset bytes. Every fetch is bounded by `timeout`.
pub trait AssetSource {
    fn fetch(&self, location: &str, timeout: Duration) -> Result<Vec<u8>, FetchError>;
}

pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Reads local paths from disk and remote `http(s)` locations over the network.
pub struct DefaultAssetSource {
    agent: ureq::Agent,
}

impl DefaultAssetSource {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new().timeout_connect(Duration::from_secs(5)).build();
        Self { agent }
    }

    fn fetch_remote(&self, location: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let response = match self.agent.get(location).timeout(timeout).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => {
                return Err(FetchError::NotFound { location: location.to_string() });
            }
            Err(ureq::Error::Status(code, _)) => {
                return Err(FetchError::Http { location: location.to_string(), message: format!("status {code}") });
            }
            Err(err) if error_chain_timed_out(&err) => {
                return Err(FetchError::Timeout { location: location.to_string(), timeout });
            }
            Err(err) => {
                return Err(FetchError::Http { location: location.to_string(), message: err.to_string() });
            }
        };
        let mut bytes = Vec::new();
        response.into_reader().take(MAX_FETCH_BYTES).read_to_end(&mut bytes).map_err(|source| {
            if matches!(source.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock) {
                FetchError::Timeout { location: location.to_string(), timeout }
            } else {
                FetchError::Io { location: location.to_string(), source }
            }
        })?;
        Ok(bytes)
    }
}

impl Default for DefaultAssetSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetSource for DefaultAssetSource {
    fn fetch(&self, location: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        if is_remote(location) {
            return self.fetch_remote(location, timeout);
        }
        match fs::read(location) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound { location: location.to_string() })
            }
            Err(source) => Err(FetchError::Io { location: location.to_string(), source }),
        }
    }
}

fn error_chain_timed_out(err: &ureq::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if matches!(io.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock) {
                return true;
            }
        }
        source = inner.source();
    }
    false
}

struct MemoryEntry {
    bytes: Vec<u8>,
    latency: Duration,
}

/// In-memory asset store. Entries may carry a simulated latency; a fetch whose
/// latency exceeds its timeout fails with [`FetchError::Timeout`] without sleeping.
#[derive(Default)]
pub struct MemoryAssetSource {
    entries: HashMap<String, MemoryEntry>,
    requests: Mutex<Vec<String>>,
}

impl MemoryAssetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.insert_with_latency(location, bytes, Duration::ZERO);
    }

    pub fn insert_with_latency(&mut self, location: impl Into<String>, bytes: impl Into<Vec<u8>>, latency: Duration) {
        self.entries.insert(location.into(), MemoryEntry { bytes: bytes.into(), latency });
    }

    pub fn with(mut self, location: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(location, bytes);
        self
    }

    /// Every location requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

impl AssetSource for MemoryAssetSource {
    fn fetch(&self, location: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(location.to_string());
        }
        let entry =
            self.entries.get(location).ok_or_else(|| FetchError::NotFound { location: location.to_string() })?;
        if entry.latency > timeout {
            return Err(FetchError::Timeout { location: location.to_string(), timeout });
        }
        Ok(entry.bytes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_conventions_follow_base_dir() {
        let paths = AssetPaths::new("assets/");
        assert_eq!(paths.model("tshirt"), "assets/models/tshirt.glb");
        assert_eq!(paths.model_config("tshirt"), "assets/models/tshirt.config.json");
        assert_eq!(paths.uv_overlay("tshirt", "front"), "assets/uv_overlays/tshirt_front.png");
        assert_eq!(paths.logo("eagle"), "assets/logos_catalog/eagle.svg");
        assert_eq!(paths.font_candidates("Oswald").last().map(String::as_str), Some("assets/fonts/Oswald.woff2"));
    }

    #[test]
    fn root_base_keeps_single_slash() {
        let paths = AssetPaths::new("/");
        assert_eq!(paths.logo("x"), "/logos_catalog/x.svg");
        let remote = AssetPaths::new("https://cdn.example.com/assets");
        assert_eq!(remote.model("cap"), "https://cdn.example.com/assets/models/cap.glb");
    }

    #[test]
    fn memory_source_simulates_timeouts() {
        let mut source = MemoryAssetSource::new();
        source.insert_with_latency("slow.png", vec![1, 2, 3], Duration::from_secs(30));
        source.insert("fast.png", vec![4]);
        let err = source.fetch("slow.png", Duration::from_secs(10)).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(source.fetch("fast.png", Duration::from_millis(1)).expect("fast"), vec![4]);
        assert!(matches!(source.fetch("missing", Duration::from_secs(1)), Err(FetchError::NotFound { .. })));
        assert_eq!(source.requests(), vec!["slow.png", "fast.png", "missing"]);
    }

    #[test]
    fn default_source_reads_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("blob.bin");
        fs::write(&path, b"abc").expect("write");
        let source = DefaultAssetSource::new();
        let location = path.to_string_lossy().to_string();
        assert_eq!(source.fetch(&location, Duration::from_secs(1)).expect("read"), b"abc");
        let missing = dir.path().join("nope.bin").to_string_lossy().to_string();
        assert!(matches!(source.fetch(&missing, Duration::from_secs(1)), Err(FetchError::NotFound { .. })));
    }
}

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server listens on.
    pub bind_addr: SocketAddr,
    /// Directory holding one reference image per registered face.
    pub faces_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Minimum SCRFD score for a detection to count as a face.
    pub detection_threshold: f32,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
    /// Pending requests the analysis engine will queue before callers wait.
    pub engine_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            faces_dir: PathBuf::from("reference_faces"),
            model_dir: facegate_core::default_model_dir(),
            similarity_threshold: 0.40,
            detection_threshold: facegate_core::detector::DEFAULT_CONFIDENCE_THRESHOLD,
            max_upload_bytes: 10 * 1024 * 1024,
            engine_queue: 8,
        }
    }
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: parse_var(lookup("FACEGATE_BIND")).unwrap_or(defaults.bind_addr),
            faces_dir: lookup("FACEGATE_FACES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.faces_dir),
            model_dir: lookup("FACEGATE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            similarity_threshold: parse_var(lookup("FACEGATE_SIMILARITY_THRESHOLD"))
                .unwrap_or(defaults.similarity_threshold),
            detection_threshold: parse_var(lookup("FACEGATE_DETECTION_THRESHOLD"))
                .unwrap_or(defaults.detection_threshold),
            max_upload_bytes: parse_var(lookup("FACEGATE_MAX_UPLOAD_BYTES"))
                .unwrap_or(defaults.max_upload_bytes),
            engine_queue: parse_var(lookup("FACEGATE_ENGINE_QUEUE"))
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.engine_queue),
        }
    }
}

fn parse_var<T: FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|v| v.trim().parse().ok())
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

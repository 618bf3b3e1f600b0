use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use vigil_core::matcher::DEFAULT_MATCH_THRESHOLD;
use vigil_core::preprocess::DEFAULT_INPUT_SIZE;
use vigil_core::{MatchPolicy, TensorLayout};

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by `VIGIL_CONFIG`,
/// then `VIGIL_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to bind the HTTP listener on.
    pub host: String,
    pub port: u16,
    /// Path segment in `POST /api/<service>/infer`.
    pub service: String,
    /// Execution device to allocate the graph on.
    pub device: String,
    /// Serialized embedding graph (ONNX).
    pub graph_path: PathBuf,
    /// Directory of reference images; file stems are identity labels.
    pub gallery_dir: PathBuf,
    /// Square input edge expected by the graph.
    pub input_size: u32,
    pub tensor_layout: TensorLayout,
    /// Expected embedding length; unset accepts whatever the graph emits.
    pub embedding_dim: Option<usize>,
    pub l2_normalize: bool,
    /// Squared-distance threshold below which two faces match.
    pub match_threshold: f32,
    pub match_policy: MatchPolicy,
    /// Upper bound on one request, queueing included.
    pub inference_timeout_secs: u64,
    /// Reuse gallery embeddings while file mtimes are unchanged.
    pub gallery_cache: bool,
    /// Directory to store every decoded probe in, if set.
    pub capture_dir: Option<PathBuf>,
    pub max_body_bytes: usize,
    pub intra_threads: usize,
    /// Pending requests allowed in the engine queue.
    pub queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            service: "vigil".to_string(),
            device: "cpu".to_string(),
            graph_path: PathBuf::from("model/facenet.onnx"),
            gallery_dir: PathBuf::from("data/known"),
            input_size: DEFAULT_INPUT_SIZE,
            tensor_layout: TensorLayout::Nchw,
            embedding_dim: None,
            l2_normalize: true,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            match_policy: MatchPolicy::FirstMatch,
            inference_timeout_secs: 30,
            gallery_cache: false,
            capture_dir: None,
            max_body_bytes: 10 * 1024 * 1024,
            intra_threads: 2,
            queue_depth: 16,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("VIGIL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but would make every request fail or
    /// every comparison miss.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            anyhow::bail!(
                "match_threshold must be a positive finite number, got {}",
                self.match_threshold
            );
        }
        if self.inference_timeout_secs == 0 {
            anyhow::bail!("inference_timeout_secs must be at least 1");
        }
        if self.input_size == 0 {
            anyhow::bail!("input_size must be at least 1");
        }
        if self.queue_depth == 0 {
            anyhow::bail!("queue_depth must be at least 1");
        }
        if self.embedding_dim == Some(0) {
            anyhow::bail!("embedding_dim must be at least 1 when set");
        }
        Ok(())
    }

    /// Parse a TOML configuration file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Apply `VIGIL_*` overrides from `lookup`. Unparseable values are
    /// logged and ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str| lookup(key);
        let path = |key: &str| lookup(key).map(PathBuf::from);

        if let Some(v) = string("VIGIL_HOST") {
            self.host = v;
        }
        if let Some(v) = string("VIGIL_SERVICE") {
            self.service = v;
        }
        if let Some(v) = string("VIGIL_DEVICE") {
            self.device = v;
        }
        if let Some(v) = path("VIGIL_GRAPH_PATH") {
            self.graph_path = v;
        }
        if let Some(v) = path("VIGIL_GALLERY_DIR") {
            self.gallery_dir = v;
        }
        if let Some(v) = path("VIGIL_CAPTURE_DIR") {
            self.capture_dir = Some(v);
        }
        if let Some(v) = parsed(&lookup, "VIGIL_PORT") {
            self.port = v;
        }
        if let Some(v) = parsed(&lookup, "VIGIL_INPUT_SIZE") {
            self.input_size = v;
        }
        if let Some(v) = parsed(&lookup, "VIGIL_TENSOR_LAYOUT") {
            self.tensor_layout = v;
        }
        if let Some(v) = parsed(&lookup, "VIGIL_EMBEDDING_DIM") {
            self.embedding_dim = Some(v);
        }
        if let Some(v) = string("VIGIL_L2_NORMALIZE") {
            self.l2_normalize = v != "0";
        }
        if let Some(v) = parsed(&lookup, "VIGIL_MATCH_THRESHOLD") {
            self.match_threshold = v;
        }
        if let Some(v) = parsed(&lookup, "VIGIL_MATCH_POLICY") {
            self.match_policy = v;
        }
        if let Some(v) = parsed(&lookup, "VIGIL_INFERENCE_TIMEOUT_SECS") {
            self.inference_timeout_secs = v;
        }
        if let Some(v) = string("VIGIL_GALLERY_CACHE") {
            self.gallery_cache = v != "0";
        }
        if let Some(v) = parsed(&lookup, "VIGIL_MAX_BODY_BYTES") {
            self.max_body_bytes = v;
        }
        if let Some(v) = parsed(&lookup, "VIGIL_INTRA_THREADS") {
            self.intra_threads = v;
        }
        if let Some(v) = parsed(&lookup, "VIGIL_QUEUE_DEPTH") {
            self.queue_depth = v;
        }
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.match_policy, MatchPolicy::FirstMatch);
        assert_eq!(config.input_size, 160);
        assert!(!config.gallery_cache);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("VIGIL_PORT", "9000"),
            ("VIGIL_GALLERY_DIR", "/srv/known"),
            ("VIGIL_MATCH_POLICY", "best"),
            ("VIGIL_TENSOR_LAYOUT", "nhwc"),
            ("VIGIL_EMBEDDING_DIM", "128"),
            ("VIGIL_GALLERY_CACHE", "1"),
            ("VIGIL_CAPTURE_DIR", "/srv/captured"),
        ]));
        assert_eq!(config.port, 9000);
        assert_eq!(config.gallery_dir, PathBuf::from("/srv/known"));
        assert_eq!(config.match_policy, MatchPolicy::BestMatch);
        assert_eq!(config.tensor_layout, TensorLayout::Nhwc);
        assert_eq!(config.embedding_dim, Some(128));
        assert!(config.gallery_cache);
        assert_eq!(config.capture_dir, Some(PathBuf::from("/srv/captured")));
    }

    #[test]
    fn test_invalid_env_value_keeps_previous() {
        let mut config = Config::default();
        config.apply_env(env(&[("VIGIL_PORT", "eighty"), ("VIGIL_MATCH_THRESHOLD", "x")]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.match_threshold, DEFAULT_MATCH_THRESHOLD);
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        std::fs::write(
            &path,
            r#"
port = 5000
service = "frontdoor"
graph_path = "/opt/models/facenet.onnx"
match_policy = "best-match"
match_threshold = 1.1
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.service, "frontdoor");
        assert_eq!(config.graph_path, PathBuf::from("/opt/models/facenet.onnx"));
        assert_eq!(config.match_policy, MatchPolicy::BestMatch);
        assert!((config.match_threshold - 1.1).abs() < 1e-6);
        // untouched keys keep defaults
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_example_config_parses() {
        let example = include_str!("../../../contrib/vigil.example.toml");
        let config: Config = toml::from_str(example).unwrap();
        assert_eq!(config.service, "vigil");
        assert_eq!(config.tensor_layout, TensorLayout::Nchw);
        assert_eq!(config.embedding_dim, None);
    }

    #[test]
    fn test_from_file_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_nan_threshold() {
        let mut config = Config::default();
        config.apply_env(env(&[("VIGIL_MATCH_THRESHOLD", "NaN")]));
        assert!(config.match_threshold.is_nan());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("match_threshold"));
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        for raw in ["-1", "0", "inf"] {
            let mut config = Config::default();
            config.apply_env(env(&[("VIGIL_MATCH_THRESHOLD", raw)]));
            assert!(config.validate().is_err(), "threshold {raw} accepted");
        }
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        for key in [
            "VIGIL_INFERENCE_TIMEOUT_SECS",
            "VIGIL_INPUT_SIZE",
            "VIGIL_QUEUE_DEPTH",
            "VIGIL_EMBEDDING_DIM",
        ] {
            let mut config = Config::default();
            config.apply_env(env(&[(key, "0")]));
            assert!(config.validate().is_err(), "{key}=0 accepted");
        }
    }

    #[test]
    fn test_validate_applies_to_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        std::fs::write(&path, "inference_timeout_secs = 0\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert!(config.validate().is_err());
    }
}

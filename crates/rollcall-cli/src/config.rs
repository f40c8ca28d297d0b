use rollcall_core::MatchMetric;
use rollcall_store::DedupPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Runtime configuration: defaults, then the TOML file, then `ROLLCALL_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    pub data_dir: PathBuf,
    /// SQLite database (default: `<data_dir>/rollcall.db`).
    pub db_path: PathBuf,
    /// Stored registration images (default: `<data_dir>/images`).
    pub images_dir: PathBuf,
    pub metric: MatchMetric,
    /// Acceptance threshold in the metric's units.
    pub threshold: f32,
    pub dedup: DedupPolicy,
    /// Upper bound on waiting for one camera frame.
    pub capture_timeout_secs: u64,
    /// Frames discarded at stream start (camera AGC/AE stabilization).
    pub warmup_frames: usize,
}

/// Config file contents. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub camera_device: Option<String>,
    pub model_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub images_dir: Option<PathBuf>,
    pub metric: Option<MatchMetric>,
    pub threshold: Option<f32>,
    pub dedup: Option<DedupPolicy>,
    pub capture_timeout_secs: Option<u64>,
    pub warmup_frames: Option<usize>,
}

impl FileConfig {
    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Config {
    /// Load from the process environment.
    ///
    /// `explicit` (or `ROLLCALL_CONFIG`) names a file that must exist; the
    /// default location is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();

        let (path, required) = match explicit
            .map(Path::to_path_buf)
            .or_else(|| env("ROLLCALL_CONFIG").map(PathBuf::from))
        {
            Some(path) => (path, true),
            None => (default_config_path(), false),
        };

        let file = match std::fs::read_to_string(&path) {
            Ok(text) => {
                tracing::debug!(path = %path.display(), "config file loaded");
                FileConfig::parse(&path, &text)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                FileConfig::default()
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        Ok(Self::resolve(file, env))
    }

    /// Merge file values and environment lookups over the defaults.
    pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(default_data_dir);

        let db_path = env("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("rollcall.db"));

        let images_dir = env("ROLLCALL_IMAGES_DIR")
            .map(PathBuf::from)
            .or(file.images_dir)
            .unwrap_or_else(|| data_dir.join("images"));

        let metric = env_parsed(&env, "ROLLCALL_METRIC")
            .or(file.metric)
            .unwrap_or_default();

        Self {
            camera_device: env("ROLLCALL_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            model_dir: env("ROLLCALL_MODEL_DIR")
                .map(PathBuf::from)
                .or(file.model_dir)
                .unwrap_or_else(rollcall_core::default_model_dir),
            data_dir,
            db_path,
            images_dir,
            metric,
            threshold: env_parsed(&env, "ROLLCALL_THRESHOLD")
                .or(file.threshold)
                .unwrap_or_else(|| metric.default_threshold()),
            dedup: env_parsed(&env, "ROLLCALL_DEDUP")
                .or(file.dedup)
                .unwrap_or_default(),
            capture_timeout_secs: env_parsed(&env, "ROLLCALL_CAPTURE_TIMEOUT_SECS")
                .or(file.capture_timeout_secs)
                .unwrap_or(10),
            warmup_frames: env_parsed(&env, "ROLLCALL_WARMUP_FRAMES")
                .or(file.warmup_frames)
                .unwrap_or(4),
        }
    }
}

/// Unparsable values are ignored with a warning.
fn env_parsed<T>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid environment value");
            None
        }
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("rollcall")
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("rollcall/config.toml")
}

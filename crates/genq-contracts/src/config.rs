use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const CONFIG_PATH_ENV: &str = "GENQ_CONFIG";
pub const API_BASE_ENV: &str = "GEMINI_API_BASE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    Missing(PathBuf),
    #[error("failed reading config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Model identifiers per quality tier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelNames {
    #[serde(default = "default_pro_model")]
    pub pro: String,
    #[serde(default = "default_fast_model")]
    pub fast: String,
}

impl Default for ModelNames {
    fn default() -> Self {
        Self {
            pro: default_pro_model(),
            fast: default_fast_model(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    images_dir: String,
    #[serde(default = "default_batch_subdir")]
    batch_subdir: String,
    #[serde(default = "default_queue_filename")]
    queue_filename: String,
    #[serde(default = "default_max_reference_images")]
    max_reference_images: usize,
    #[serde(default = "default_api_delay_seconds")]
    api_delay_seconds: f64,
    #[serde(default)]
    api_base: Option<String>,
    #[serde(default)]
    request_timeout_seconds: Option<f64>,
    #[serde(default = "default_webp_quality")]
    webp_quality: u8,
    #[serde(default)]
    models: ModelNames,
}

/// Resolved, immutable process configuration.
///
/// Built once at startup and handed to each component by reference. Every
/// path has already been expanded from its `~/` form and the batch/queue
/// locations are derived from `images_dir`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub images_dir: PathBuf,
    pub batch_dir: PathBuf,
    pub queue_file: PathBuf,
    pub max_reference_images: usize,
    pub api_delay: Duration,
    pub api_base: String,
    pub request_timeout: Option<Duration>,
    pub webp_quality: u8,
    pub models: ModelNames,
}

impl Config {
    /// Location used when no `--config` flag is given: `$GENQ_CONFIG`, else
    /// `./config.json`.
    pub fn default_location() -> PathBuf {
        env::var(CONFIG_PATH_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(|value| expand_home(&value))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, path)
    }

    pub fn parse(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let parsed: RawConfig =
            serde_json::from_str(raw).map_err(|source| ConfigError::Malformed {
                path: origin.to_path_buf(),
                source,
            })?;
        Self::resolve(parsed)
    }

    /// Applies `GEMINI_API_BASE` on top of the file value.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(base) = env::var(API_BASE_ENV)
            .ok()
            .map(|value| normalize_api_base(&value))
            .filter(|value| !value.is_empty())
        {
            self.api_base = base;
        }
        self
    }

    fn resolve(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.images_dir.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "images_dir",
                reason: "must not be empty".to_string(),
            });
        }
        let images_dir = expand_home(raw.images_dir.trim());
        let batch_subdir = non_empty_or(raw.batch_subdir, default_batch_subdir);
        let queue_filename = non_empty_or(raw.queue_filename, default_queue_filename);

        let api_delay = Duration::try_from_secs_f64(raw.api_delay_seconds).map_err(|err| {
            ConfigError::Invalid {
                field: "api_delay_seconds",
                reason: err.to_string(),
            }
        })?;
        let request_timeout = raw
            .request_timeout_seconds
            .map(|seconds| {
                Duration::try_from_secs_f64(seconds).map_err(|err| ConfigError::Invalid {
                    field: "request_timeout_seconds",
                    reason: err.to_string(),
                })
            })
            .transpose()?;
        if raw.webp_quality > 100 {
            return Err(ConfigError::Invalid {
                field: "webp_quality",
                reason: format!("{} is outside 0..=100", raw.webp_quality),
            });
        }

        Ok(Self {
            batch_dir: images_dir.join(expand_home(&batch_subdir)),
            queue_file: images_dir.join(expand_home(&queue_filename)),
            images_dir,
            max_reference_images: raw.max_reference_images,
            api_delay,
            api_base: raw
                .api_base
                .map(|value| normalize_api_base(&value))
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            request_timeout,
            webp_quality: raw.webp_quality,
            models: raw.models,
        })
    }
}

/// Expands a leading `~` or `~/` to the current user's home directory.
/// Anything else, or a host with no resolvable home, is returned as given.
pub fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(raw));
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

fn normalize_api_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn non_empty_or(value: String, fallback: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

fn default_batch_subdir() -> String {
    "batch".to_string()
}

fn default_queue_filename() -> String {
    "batch_queue.json".to_string()
}

fn default_max_reference_images() -> usize {
    14
}

fn default_api_delay_seconds() -> f64 {
    3.0
}

fn default_webp_quality() -> u8 {
    85
}

fn default_pro_model() -> String {
    "gemini-3-pro-image-preview".to_string()
}

fn default_fast_model() -> String {
    "gemini-2.5-flash-image".to_string()
}

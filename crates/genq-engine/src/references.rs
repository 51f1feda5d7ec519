use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use genq_contracts::config::expand_home;
use serde_json::{json, Value};

use crate::error::GenerationError;

/// Reference image ready to be sent inline.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage {
    pub mime_type: &'static str,
    pub data: String,
}

impl InlineImage {
    pub fn to_part(&self) -> Value {
        json!({
            "inlineData": {
                "mimeType": self.mime_type,
                "data": self.data,
            }
        })
    }
}

/// Validates and encodes reference images, bounded by a fixed count.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceEncoder {
    max_images: usize,
}

impl ReferenceEncoder {
    pub fn new(max_images: usize) -> Self {
        Self { max_images }
    }

    pub fn max_images(&self) -> usize {
        self.max_images
    }

    pub fn check_capacity(&self, paths: &[String]) -> Result<(), GenerationError> {
        if paths.len() > self.max_images {
            return Err(GenerationError::ReferenceCapacityExceeded {
                count: paths.len(),
                max: self.max_images,
            });
        }
        Ok(())
    }

    /// Every path is expanded and checked before any file is read, so one
    /// bad reference fails the whole request without reading the rest.
    /// Output order matches input order.
    pub fn encode(&self, paths: &[String]) -> Result<Vec<InlineImage>> {
        self.check_capacity(paths)?;
        let resolved = paths
            .iter()
            .map(|raw| {
                let path = expand_home(raw.trim());
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(GenerationError::ReferenceNotFound(path))
                }
            })
            .collect::<Result<Vec<PathBuf>, GenerationError>>()?;

        resolved
            .iter()
            .map(|path| -> Result<InlineImage> {
                let bytes =
                    fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
                Ok(InlineImage {
                    mime_type: mime_for_path(path),
                    data: BASE64.encode(bytes),
                })
            })
            .collect()
    }
}

/// MIME type by extension. Unknown extensions are sent as PNG.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/png",
    }
}

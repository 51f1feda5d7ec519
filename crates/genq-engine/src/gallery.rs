use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentImage {
    pub filename: String,
    pub base64: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Joins a client-supplied subdirectory onto the images root, refusing
/// anything that could escape it.
pub fn resolve_image_subdir(images_dir: &Path, directory: &str) -> Result<PathBuf> {
    let relative = Path::new(directory.trim());
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => bail!("directory must stay inside the images directory: {directory}"),
        }
    }
    Ok(images_dir.join(relative))
}

/// `.webp` files in `dir`, newest first, at most `limit` entries.
pub(crate) fn newest_webp_files(dir: &Path, limit: usize) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let is_webp = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("webp"))
            .unwrap_or(false);
        if !is_webp || !entry.file_type()?.is_file() {
            continue;
        }
        let modified = entry
            .metadata()?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((modified, path));
    }
    files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    Ok(files.into_iter().take(limit).map(|(_, path)| path).collect())
}

pub fn recent_images(images_dir: &Path, directory: &str, limit: usize) -> Result<Vec<RecentImage>> {
    let dir = resolve_image_subdir(images_dir, directory)?;
    newest_webp_files(&dir, limit)?
        .into_iter()
        .map(|path| {
            let bytes = fs::read(&path).with_context(|| format!("failed reading {}", path.display()))?;
            Ok(RecentImage {
                filename: file_name(&path),
                size: bytes.len() as u64,
                base64: BASE64.encode(&bytes),
                path,
            })
        })
        .collect()
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use walkdir::WalkDir;

const SOURCE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    pub quality: u8,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionReport {
    pub converted: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<ConversionFailure>,
    pub quality: u8,
}

impl ConversionReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Converts generated images under a directory tree to a web format.
pub trait FormatConverter: Send + Sync {
    fn convert(&self, root: &Path, options: &ConvertOptions) -> Result<ConversionReport>;
}

/// Writes a sibling `.webp` for every PNG/JPEG found below the root, lossy
/// encoded at the requested quality (0..=100).
#[derive(Debug, Default, Clone, Copy)]
pub struct WebpConverter;

impl WebpConverter {
    fn convert_one(source: &Path, target: &Path, quality: u8) -> Result<()> {
        let rgba = image::open(source)
            .with_context(|| format!("failed to decode {}", source.display()))?
            .to_rgba8();
        let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
        let encoded = encoder.encode(f32::from(quality));
        fs::write(target, &*encoded)
            .with_context(|| format!("failed to write {}", target.display()))?;
        Ok(())
    }
}

impl FormatConverter for WebpConverter {
    fn convert(&self, root: &Path, options: &ConvertOptions) -> Result<ConversionReport> {
        if !root.is_dir() {
            anyhow::bail!("images directory not found: {}", root.display());
        }
        let mut sources: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_convertible(path))
            .collect();
        sources.sort();

        let mut report = ConversionReport {
            converted: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            quality: options.quality,
        };
        for source in sources {
            let target = source.with_extension("webp");
            if target.exists() && !options.force {
                report.skipped.push(source);
                continue;
            }
            match Self::convert_one(&source, &target, options.quality) {
                Ok(()) => {
                    tracing::debug!(source = %source.display(), "converted to webp");
                    report.converted.push(target);
                }
                Err(err) => {
                    tracing::warn!(source = %source.display(), error = %err, "webp conversion failed");
                    report.failed.push(ConversionFailure {
                        path: source,
                        error: format!("{err:#}"),
                    });
                }
            }
        }
        tracing::info!(
            converted = report.converted.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "webp conversion finished"
        );
        Ok(report)
    }
}

fn is_convertible(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use image::{Rgba, RgbaImage};

    use super::{ConvertOptions, FormatConverter, WebpConverter};

    fn write_png(path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        RgbaImage::from_pixel(4, 3, Rgba([200, 20, 20, 255])).save(path)?;
        Ok(())
    }

    const DEFAULT: ConvertOptions = ConvertOptions {
        quality: 85,
        force: false,
    };

    #[test]
    fn converts_nested_images_and_skips_existing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_png(&temp.path().join("top.png"))?;
        write_png(&temp.path().join("batch").join("hero.png"))?;
        fs::write(temp.path().join("notes.txt"), "not an image")?;

        let report = WebpConverter.convert(temp.path(), &DEFAULT)?;
        assert_eq!(report.converted.len(), 2);
        assert!(report.success());
        assert_eq!(report.quality, 85);
        let webp = temp.path().join("batch").join("hero.webp");
        assert!(webp.is_file());
        assert_eq!(image::open(&webp)?.width(), 4);

        let again = WebpConverter.convert(temp.path(), &DEFAULT)?;
        assert!(again.converted.is_empty());
        assert_eq!(again.skipped.len(), 2);

        let forced = WebpConverter.convert(
            temp.path(),
            &ConvertOptions {
                quality: 60,
                force: true,
            },
        )?;
        assert_eq!(forced.converted.len(), 2);
        assert_eq!(forced.quality, 60);
        Ok(())
    }

    #[test]
    fn undecodable_source_is_reported_not_fatal() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_png(&temp.path().join("good.png"))?;
        fs::write(temp.path().join("broken.jpg"), b"definitely not jpeg")?;

        let report = WebpConverter.convert(temp.path(), &DEFAULT)?;
        assert_eq!(report.converted, vec![temp.path().join("good.webp")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, temp.path().join("broken.jpg"));
        assert!(!report.success());
        Ok(())
    }

    fn write_noisy_png(path: &Path) -> anyhow::Result<()> {
        let mut seed: u32 = 0x2545_f491;
        let image = RgbaImage::from_fn(96, 96, |x, y| {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let noise = (seed >> 24) as u8;
            Rgba([noise, (x * 2) as u8, (y * 2) as u8 ^ noise, 255])
        });
        image.save(path)?;
        Ok(())
    }

    #[test]
    fn lower_quality_writes_smaller_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut sizes = Vec::new();
        for quality in [10, 95] {
            let root = temp.path().join(format!("q{quality}"));
            fs::create_dir_all(&root)?;
            write_noisy_png(&root.join("noise.png"))?;
            let report = WebpConverter.convert(
                &root,
                &ConvertOptions {
                    quality,
                    force: false,
                },
            )?;
            assert!(report.success());
            let target = root.join("noise.webp");
            assert_eq!(image::open(&target)?.width(), 96);
            sizes.push(fs::metadata(&target)?.len());
        }
        assert!(
            sizes[0] < sizes[1],
            "quality 10 gave {} bytes, 95 gave {}",
            sizes[0],
            sizes[1]
        );
        Ok(())
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(WebpConverter
            .convert(Path::new("/definitely/not/here"), &DEFAULT)
            .is_err());
    }
}

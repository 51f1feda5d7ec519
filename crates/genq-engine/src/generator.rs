use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use genq_contracts::outcome::GenerationOutcome;
use genq_contracts::request::{GenerationRequest, QualityTier};
use serde::Serialize;

use crate::backend::{extract_first_inline_image, ImageBackend};
use crate::payload::RequestBuilder;

/// A successfully written image and the settings that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedImage {
    pub image_path: PathBuf,
    pub model: String,
    pub quality: QualityTier,
    pub resolution: String,
    pub aspect_ratio: String,
    pub reference_images_used: usize,
}

impl GeneratedImage {
    pub fn into_outcome(self, filename: &str) -> GenerationOutcome {
        GenerationOutcome::Success {
            filename: filename.to_string(),
            path: self.image_path,
            resolution: self.resolution,
            aspect_ratio: self.aspect_ratio,
            reference_images_used: self.reference_images_used,
        }
    }
}

/// One request in, one image file out. No retries.
pub struct Generator {
    builder: RequestBuilder,
    backend: Box<dyn ImageBackend>,
}

impl Generator {
    pub fn new(builder: RequestBuilder, backend: Box<dyn ImageBackend>) -> Self {
        Self { builder, backend }
    }

    pub fn builder(&self) -> &RequestBuilder {
        &self.builder
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn ensure_ready(&self) -> Result<()> {
        self.backend.ensure_credentials()
    }

    /// Writes the first returned image to `output_path`. The write is a plain
    /// overwrite; an existing file with the same name is replaced.
    pub fn generate(
        &self,
        request: &GenerationRequest,
        output_path: &Path,
    ) -> Result<GeneratedImage> {
        self.backend.ensure_credentials()?;
        let built = self.builder.build(request)?;
        tracing::info!(
            model = %built.model,
            quality = built.quality.as_str(),
            resolution = built.resolution,
            aspect_ratio = %built.aspect_ratio,
            references = built.reference_images_used,
            "requesting image"
        );

        let response = self.backend.generate_content(&built.model, &built.payload)?;
        let image = extract_first_inline_image(&response)?;

        if let Some(parent) = output_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(output_path, &image.bytes)
            .with_context(|| format!("failed to write {}", output_path.display()))?;
        tracing::info!(path = %output_path.display(), bytes = image.bytes.len(), "saved image");

        Ok(GeneratedImage {
            image_path: output_path.to_path_buf(),
            model: built.model,
            quality: built.quality,
            resolution: built.resolution.to_string(),
            aspect_ratio: built.aspect_ratio,
            reference_images_used: built.reference_images_used,
        })
    }

    /// Like [`Generator::generate`] but never fails: errors become an
    /// `Error` outcome carrying the full error chain.
    pub fn generate_outcome(
        &self,
        request: &GenerationRequest,
        output_dir: &Path,
        filename: &str,
    ) -> GenerationOutcome {
        match self.generate(request, &output_dir.join(filename)) {
            Ok(image) => image.into_outcome(filename),
            Err(err) => GenerationOutcome::Error {
                filename: filename.to_string(),
                error: format!("{err:#}"),
            },
        }
    }
}

/// `gemini_image_<local timestamp>.png`, used for immediate generations.
pub fn timestamped_filename() -> String {
    format!(
        "gemini_image_{}.png",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    )
}

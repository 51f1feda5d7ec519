use anyhow::{bail, Result};
use genq_contracts::config::{Config, ModelNames};
use genq_contracts::request::{GenerationRequest, QualityTier};
use serde_json::{json, Map, Value};

use crate::references::{InlineImage, ReferenceEncoder};

/// Backend payload plus what the outcome record needs afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRequest {
    pub model: String,
    pub quality: QualityTier,
    pub resolution: &'static str,
    pub aspect_ratio: String,
    pub reference_images_used: usize,
    pub payload: Value,
}

/// Maps a logical request onto a `generateContent` payload.
///
/// Tier rules:
/// - fast: references are dropped, `imageSize` is omitted, a `large`
///   size class resolves as `small`.
/// - pro: references are encoded inline ahead of the prompt and `imageSize`
///   carries the size-class resolution.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    encoder: ReferenceEncoder,
    models: ModelNames,
}

impl RequestBuilder {
    pub fn new(encoder: ReferenceEncoder, models: ModelNames) -> Self {
        Self { encoder, models }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ReferenceEncoder::new(config.max_reference_images),
            config.models.clone(),
        )
    }

    pub fn encoder(&self) -> &ReferenceEncoder {
        &self.encoder
    }

    pub fn model_for(&self, quality: QualityTier) -> &str {
        match quality {
            QualityTier::Pro => &self.models.pro,
            QualityTier::Fast => &self.models.fast,
        }
    }

    pub fn build(&self, request: &GenerationRequest) -> Result<BuiltRequest> {
        if request.prompt.trim().is_empty() {
            bail!("prompt must not be empty");
        }
        let quality = request.quality;
        let resolution = request.effective_size_class().resolution();
        let references = request.effective_reference_images();

        let mut parts: Vec<Value> = self
            .encoder
            .encode(references)?
            .iter()
            .map(InlineImage::to_part)
            .collect();
        parts.push(json!({ "text": request.prompt }));

        let mut image_config = Map::new();
        image_config.insert(
            "aspectRatio".to_string(),
            Value::String(request.aspect_ratio.clone()),
        );
        if quality.supports_explicit_resolution() {
            image_config.insert(
                "imageSize".to_string(),
                Value::String(resolution.to_string()),
            );
        }

        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": image_config,
            },
        });

        Ok(BuiltRequest {
            model: self.model_for(quality).to_string(),
            quality,
            resolution,
            aspect_ratio: request.aspect_ratio.clone(),
            reference_images_used: references.len(),
            payload,
        })
    }
}

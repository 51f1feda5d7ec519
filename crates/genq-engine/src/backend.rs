use std::env;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use genq_contracts::config::Config;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

use crate::error::GenerationError;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
const FALLBACK_API_KEY_ENV: &str = "GOOGLE_API_KEY";

/// The external image API, one call per generation.
pub trait ImageBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Fails with `CredentialMissing` when calls cannot be authenticated.
    fn ensure_credentials(&self) -> Result<()>;

    /// Issues one `generateContent` call and returns the parsed response
    /// body. Non-2xx statuses surface as `ExternalApi` with the body intact.
    fn generate_content(&self, model: &str, payload: &Value) -> Result<Value>;
}

/// Decoded image bytes from a response part.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

pub struct GeminiBackend {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl GeminiBackend {
    /// Reads the credential from `GEMINI_API_KEY` (or `GOOGLE_API_KEY`).
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = non_empty_env(API_KEY_ENV).or_else(|| non_empty_env(FALLBACK_API_KEY_ENV));
        Self::new(&config.api_base, api_key, config.request_timeout)
    }

    pub fn new(
        api_base: &str,
        api_key: Option<String>,
        timeout: Option<std::time::Duration>,
    ) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

impl ImageBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn ensure_credentials(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Err(GenerationError::CredentialMissing.into());
        }
        Ok(())
    }

    fn generate_content(&self, model: &str, payload: &Value) -> Result<Value> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(GenerationError::CredentialMissing.into());
        };
        let endpoint = self.endpoint_for_model(model);
        tracing::debug!(endpoint = %endpoint, "posting generateContent");
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error(response)
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .context("Gemini response body read failed")?;
    if !status.is_success() {
        return Err(GenerationError::ExternalApi {
            status: status.as_u16(),
            body,
        }
        .into());
    }
    let parsed: Value = serde_json::from_str(&body)
        .map_err(|err| GenerationError::MalformedResponse(err.to_string()))?;
    Ok(parsed)
}

/// First part carrying inline binary data, across all candidates. Text-only
/// responses are legal and surface as `NoImageInResponse`.
pub fn extract_first_inline_image(response: &Value) -> Result<InlineImageBytes> {
    let parts = response
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| {
            candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
        })
        .flatten();

    for part in parts {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64
            .decode(data.as_bytes())
            .map_err(|err| GenerationError::MalformedResponse(format!("image base64: {err}")))?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok(InlineImageBytes { bytes, mime_type });
    }

    Err(GenerationError::NoImageInResponse.into())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

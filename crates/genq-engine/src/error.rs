use std::path::PathBuf;

use thiserror::Error;

/// Conditions a caller may want to tell apart. Everything else (I/O,
/// transport) travels as a plain `anyhow` chain.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("GEMINI_API_KEY not set")]
    CredentialMissing,
    #[error("Reference image not found: {}", .0.display())]
    ReferenceNotFound(PathBuf),
    #[error("Too many reference images ({count}). Maximum is {max}.")]
    ReferenceCapacityExceeded { count: usize, max: usize },
    #[error("API error: {status} - {body}")]
    ExternalApi { status: u16, body: String },
    #[error("API returned a malformed response: {0}")]
    MalformedResponse(String),
    #[error("No image data in API response")]
    NoImageInResponse,
}

impl GenerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CredentialMissing => "credential_missing",
            Self::ReferenceNotFound(_) => "reference_not_found",
            Self::ReferenceCapacityExceeded { .. } => "reference_capacity_exceeded",
            Self::ExternalApi { .. } => "external_api_error",
            Self::MalformedResponse(_) => "malformed_response",
            Self::NoImageInResponse => "no_image_in_response",
        }
    }
}

use serde::{Deserialize, Serialize};

pub const IMMEDIATE_ASPECT_RATIO: &str = "1:1";
pub const QUEUED_ASPECT_RATIO: &str = "16:9";

/// Backend capability tier. Unrecognized values coerce to `Pro`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Option<String>")]
pub enum QualityTier {
    #[default]
    Pro,
    Fast,
}

impl QualityTier {
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fast" => Self::Fast,
            _ => Self::Pro,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pro => "pro",
            Self::Fast => "fast",
        }
    }

    pub fn supports_reference_images(self) -> bool {
        matches!(self, Self::Pro)
    }

    /// The fast backend rejects an explicit `imageSize` directive.
    pub fn supports_explicit_resolution(self) -> bool {
        matches!(self, Self::Pro)
    }
}

impl From<Option<String>> for QualityTier {
    fn from(value: Option<String>) -> Self {
        value
            .as_deref()
            .map(Self::parse_lenient)
            .unwrap_or_default()
    }
}

/// Requested output size. Unrecognized values coerce to the `Large` default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Option<String>")]
pub enum SizeClass {
    Small,
    Medium,
    #[default]
    Large,
    XLarge,
}

impl SizeClass {
    pub const ALL: [SizeClass; 4] = [Self::Small, Self::Medium, Self::Large, Self::XLarge];

    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "small" => Self::Small,
            "medium" => Self::Medium,
            "xlarge" => Self::XLarge,
            _ => Self::Large,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::XLarge => "xlarge",
        }
    }

    /// Fixed resolution label sent to the backend.
    pub fn resolution(self) -> &'static str {
        match self {
            Self::Small => "1K",
            Self::Medium | Self::Large => "2K",
            Self::XLarge => "4K",
        }
    }
}

impl From<Option<String>> for SizeClass {
    fn from(value: Option<String>) -> Self {
        value
            .as_deref()
            .map(Self::parse_lenient)
            .unwrap_or_default()
    }
}

/// One logical image generation, before any tier rules or encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub filename: Option<String>,
    pub aspect_ratio: String,
    pub size_class: SizeClass,
    pub quality: QualityTier,
    pub reference_images: Vec<String>,
    pub description: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            filename: None,
            aspect_ratio: IMMEDIATE_ASPECT_RATIO.to_string(),
            size_class: SizeClass::default(),
            quality: QualityTier::default(),
            reference_images: Vec::new(),
            description: None,
        }
    }

    /// Size class after the fast-tier remap: a fast request left at `Large`
    /// resolves as `Small`. Every other combination passes through.
    pub fn effective_size_class(&self) -> SizeClass {
        if self.quality == QualityTier::Fast && self.size_class == SizeClass::Large {
            SizeClass::Small
        } else {
            self.size_class
        }
    }

    /// Reference paths the tier is allowed to send. Always empty for fast.
    pub fn effective_reference_images(&self) -> &[String] {
        if self.quality.supports_reference_images() {
            &self.reference_images
        } else {
            &[]
        }
    }

    /// Bakes the tier rules into the request itself.
    pub fn apply_tier_rules(&mut self) {
        self.size_class = self.effective_size_class();
        if !self.quality.supports_reference_images() {
            self.reference_images.clear();
        }
    }
}

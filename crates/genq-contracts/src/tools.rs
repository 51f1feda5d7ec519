//! Tool catalog and typed tool-call arguments.
//!
//! Arguments are validated here, once, when a call arrives. Handlers only
//! ever see the typed structs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::queue::QueueIdentifier;
use crate::request::{
    GenerationRequest, QualityTier, SizeClass, IMMEDIATE_ASPECT_RATIO, QUEUED_ASPECT_RATIO,
};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "genq-image-server";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_WEBP_QUALITY: u8 = 85;
pub const DEFAULT_IMAGE_DIRECTORY: &str = "batch";
pub const DEFAULT_IMAGE_LIMIT: usize = 10;

#[derive(Debug, Error, PartialEq)]
pub enum ToolCallError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: &'static str, message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolName {
    GenerateImage,
    AddToBatch,
    RemoveFromBatch,
    ViewBatchQueue,
    RunBatch,
    ConvertToWebp,
    GetGeneratedWebpImages,
    UploadToWordpress,
}

impl ToolName {
    pub const ALL: [ToolName; 8] = [
        Self::GetGeneratedWebpImages,
        Self::GenerateImage,
        Self::AddToBatch,
        Self::RemoveFromBatch,
        Self::ViewBatchQueue,
        Self::RunBatch,
        Self::ConvertToWebp,
        Self::UploadToWordpress,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenerateImage => "generate_image",
            Self::AddToBatch => "add_to_batch",
            Self::RemoveFromBatch => "remove_from_batch",
            Self::ViewBatchQueue => "view_batch_queue",
            Self::RunBatch => "run_batch",
            Self::ConvertToWebp => "convert_to_webp",
            Self::GetGeneratedWebpImages => "get_generated_webp_images",
            Self::UploadToWordpress => "upload_to_wordpress",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.as_str() == raw)
    }
}

/// Either one path or a list of paths.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ReferenceList {
    One(String),
    Many(Vec<String>),
}

impl ReferenceList {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(path) => vec![path],
            Self::Many(paths) => paths,
        }
    }
}

/// `reference_images` wins over the single `reference_image` when both are
/// present. Blank entries are dropped.
fn merge_references(list: Option<ReferenceList>, single: Option<String>) -> Vec<String> {
    let mut paths = list.map(ReferenceList::into_vec).unwrap_or_default();
    paths.retain(|path| !path.trim().is_empty());
    if paths.is_empty() {
        if let Some(single) = single.filter(|path| !path.trim().is_empty()) {
            paths.push(single);
        }
    }
    paths
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GenerateImageArgs {
    pub prompt: String,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub image_size: SizeClass,
    #[serde(default)]
    pub quality: QualityTier,
    #[serde(default)]
    pub reference_image: Option<String>,
    #[serde(default)]
    pub reference_images: Option<ReferenceList>,
}

impl GenerateImageArgs {
    pub fn into_request(self) -> GenerationRequest {
        GenerationRequest {
            prompt: self.prompt,
            filename: None,
            aspect_ratio: aspect_ratio_or(self.aspect_ratio, IMMEDIATE_ASPECT_RATIO),
            size_class: self.image_size,
            quality: self.quality,
            reference_images: merge_references(self.reference_images, self.reference_image),
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AddToBatchArgs {
    pub prompt: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub image_size: SizeClass,
    #[serde(default)]
    pub quality: QualityTier,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reference_image: Option<String>,
    #[serde(default)]
    pub reference_images: Option<ReferenceList>,
}

impl AddToBatchArgs {
    pub fn into_request(self) -> GenerationRequest {
        GenerationRequest {
            prompt: self.prompt,
            filename: self.filename.filter(|name| !name.trim().is_empty()),
            aspect_ratio: aspect_ratio_or(self.aspect_ratio, QUEUED_ASPECT_RATIO),
            size_class: self.image_size,
            quality: self.quality,
            reference_images: merge_references(self.reference_images, self.reference_image),
            description: self.description.filter(|text| !text.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum RawIdentifier {
    Index(u64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct RawRemoveArgs {
    identifier: RawIdentifier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoveFromBatchArgs {
    pub identifier: QueueIdentifier,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConvertToWebpArgs {
    /// Falls back to the configured `webp_quality` when absent.
    #[serde(default)]
    pub quality: Option<u8>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecentImagesArgs {
    #[serde(default = "default_image_directory")]
    pub directory: String,
    #[serde(default = "default_image_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadArgs {
    pub wp_url: String,
    pub wp_user: String,
    pub wp_password: String,
    #[serde(default = "default_image_directory")]
    pub directory: String,
    #[serde(default = "default_image_limit")]
    pub limit: usize,
}

/// A validated tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    GenerateImage(GenerateImageArgs),
    AddToBatch(AddToBatchArgs),
    RemoveFromBatch(RemoveFromBatchArgs),
    ViewBatchQueue,
    RunBatch,
    ConvertToWebp(ConvertToWebpArgs),
    GetGeneratedWebpImages(RecentImagesArgs),
    UploadToWordpress(UploadArgs),
}

impl ToolCall {
    pub fn parse(name: &str, arguments: Option<Value>) -> Result<Self, ToolCallError> {
        let tool =
            ToolName::parse(name).ok_or_else(|| ToolCallError::UnknownTool(name.to_string()))?;
        let arguments = match arguments {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(value @ Value::Object(_)) => value,
            Some(_) => {
                return Err(ToolCallError::InvalidArguments {
                    tool: tool.as_str(),
                    message: "arguments must be an object".to_string(),
                })
            }
        };

        let call = match tool {
            ToolName::GenerateImage => {
                let args: GenerateImageArgs = decode(tool, arguments)?;
                require_text(tool, "prompt", &args.prompt)?;
                Self::GenerateImage(args)
            }
            ToolName::AddToBatch => {
                let args: AddToBatchArgs = decode(tool, arguments)?;
                require_text(tool, "prompt", &args.prompt)?;
                Self::AddToBatch(args)
            }
            ToolName::RemoveFromBatch => {
                let raw: RawRemoveArgs = decode(tool, arguments)?;
                let identifier = match raw.identifier {
                    RawIdentifier::Index(index) => index.to_string(),
                    RawIdentifier::Text(text) => text,
                };
                require_text(tool, "identifier", &identifier)?;
                Self::RemoveFromBatch(RemoveFromBatchArgs {
                    identifier: QueueIdentifier::Auto(identifier),
                })
            }
            ToolName::ViewBatchQueue => Self::ViewBatchQueue,
            ToolName::RunBatch => Self::RunBatch,
            ToolName::ConvertToWebp => {
                let args: ConvertToWebpArgs = decode(tool, arguments)?;
                if let Some(quality) = args.quality.filter(|quality| *quality > 100) {
                    return Err(ToolCallError::InvalidArguments {
                        tool: tool.as_str(),
                        message: format!("quality {quality} is outside 0..=100"),
                    });
                }
                Self::ConvertToWebp(args)
            }
            ToolName::GetGeneratedWebpImages => {
                Self::GetGeneratedWebpImages(decode(tool, arguments)?)
            }
            ToolName::UploadToWordpress => {
                let args: UploadArgs = decode(tool, arguments)?;
                require_text(tool, "wp_url", &args.wp_url)?;
                require_text(tool, "wp_user", &args.wp_user)?;
                require_text(tool, "wp_password", &args.wp_password)?;
                Self::UploadToWordpress(args)
            }
        };
        Ok(call)
    }

    pub fn name(&self) -> ToolName {
        match self {
            Self::GenerateImage(_) => ToolName::GenerateImage,
            Self::AddToBatch(_) => ToolName::AddToBatch,
            Self::RemoveFromBatch(_) => ToolName::RemoveFromBatch,
            Self::ViewBatchQueue => ToolName::ViewBatchQueue,
            Self::RunBatch => ToolName::RunBatch,
            Self::ConvertToWebp(_) => ToolName::ConvertToWebp,
            Self::GetGeneratedWebpImages(_) => ToolName::GetGeneratedWebpImages,
            Self::UploadToWordpress(_) => ToolName::UploadToWordpress,
        }
    }
}

fn decode<T: DeserializeOwned>(tool: ToolName, arguments: Value) -> Result<T, ToolCallError> {
    serde_json::from_value(arguments).map_err(|err| ToolCallError::InvalidArguments {
        tool: tool.as_str(),
        message: err.to_string(),
    })
}

fn require_text(tool: ToolName, field: &str, value: &str) -> Result<(), ToolCallError> {
    if value.trim().is_empty() {
        return Err(ToolCallError::InvalidArguments {
            tool: tool.as_str(),
            message: format!("`{field}` must not be empty"),
        });
    }
    Ok(())
}

fn aspect_ratio_or(value: Option<String>, fallback: &str) -> String {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn default_image_directory() -> String {
    DEFAULT_IMAGE_DIRECTORY.to_string()
}

fn default_image_limit() -> usize {
    DEFAULT_IMAGE_LIMIT
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Catalog returned by `tools/list`, in a fixed order.
pub fn tool_catalog(max_reference_images: usize) -> Vec<ToolDefinition> {
    ToolName::ALL
        .into_iter()
        .map(|name| tool_definition(name, max_reference_images))
        .collect()
}

fn tool_definition(name: ToolName, max_refs: usize) -> ToolDefinition {
    let size_enum: Vec<&str> = SizeClass::ALL.iter().map(|size| size.as_str()).collect();
    let reference_image = json!({
        "type": "string",
        "description": "Optional single reference image file path (pro mode only)"
    });
    let reference_images = json!({
        "type": "array",
        "items": {"type": "string"},
        "description": format!("Optional list of reference image file paths, max {max_refs} (pro mode only)"),
        "maxItems": max_refs
    });
    let directory = json!({
        "type": "string",
        "description": "Directory under the images directory to scan (default: batch)",
        "default": DEFAULT_IMAGE_DIRECTORY
    });
    let limit = json!({
        "type": "integer",
        "description": "Maximum number of images",
        "default": DEFAULT_IMAGE_LIMIT,
        "minimum": 0
    });

    let (description, input_schema) = match name {
        ToolName::GetGeneratedWebpImages => (
            "Get base64 data of recently generated WebP images for uploading",
            object_schema(
                json!({"directory": directory, "limit": limit}),
                &[],
            ),
        ),
        ToolName::GenerateImage => (
            "Generate a single image immediately. Use quality='pro' (default) for high quality with reference image support, or quality='fast' for cheaper, quicker images (no reference images).",
            object_schema(
                json!({
                    "prompt": {"type": "string", "description": "Text description of the image to generate"},
                    "aspect_ratio": {"type": "string", "description": "Aspect ratio (1:1, 16:9, 9:16, 4:3, 3:4)", "default": IMMEDIATE_ASPECT_RATIO},
                    "image_size": {"type": "string", "description": "Image resolution: 'small' (1K), 'medium' (2K), 'large' (2K, default; small for fast), 'xlarge' (4K)", "enum": size_enum, "default": "large"},
                    "quality": {"type": "string", "description": "Quality tier: 'pro' (reference images supported) or 'fast' (cheaper, no reference images)", "enum": ["pro", "fast"], "default": "pro"},
                    "reference_image": reference_image,
                    "reference_images": reference_images
                }),
                &["prompt"],
            ),
        ),
        ToolName::AddToBatch => (
            "Add an image to the batch queue for later generation with resolution control and quality tier",
            object_schema(
                json!({
                    "prompt": {"type": "string", "description": "Text description of the image to generate"},
                    "filename": {"type": "string", "description": "Optional filename for the image"},
                    "aspect_ratio": {"type": "string", "description": "Aspect ratio (1:1, 16:9, 9:16, 4:3, 3:4)", "default": QUEUED_ASPECT_RATIO},
                    "image_size": {"type": "string", "description": "Image resolution: 'small' (1K), 'medium' (2K), 'large' (2K, default; small for fast), 'xlarge' (4K)", "enum": size_enum, "default": "large"},
                    "quality": {"type": "string", "description": "Quality tier: 'pro' (default) or 'fast' (cheaper, no reference images)", "enum": ["pro", "fast"], "default": "pro"},
                    "description": {"type": "string", "description": "Optional description/note for this image"},
                    "reference_image": reference_image,
                    "reference_images": reference_images
                }),
                &["prompt"],
            ),
        ),
        ToolName::RemoveFromBatch => (
            "Remove an image from the batch queue by index (0, 1, 2...) or filename",
            object_schema(
                json!({
                    "identifier": {"type": "string", "description": "Either an integer index (0 for first item, 1 for second, etc.) or a filename string"}
                }),
                &["identifier"],
            ),
        ),
        ToolName::ViewBatchQueue => (
            "View all images currently queued for batch generation",
            object_schema(json!({}), &[]),
        ),
        ToolName::RunBatch => (
            "Execute batch generation for all queued images",
            object_schema(json!({}), &[]),
        ),
        ToolName::ConvertToWebp => (
            "Convert generated images to WebP format. Scans the images directory recursively and converts PNG/JPG to WebP.",
            object_schema(
                json!({
                    "quality": {"type": "integer", "description": "WebP quality (0-100). Default 85", "default": DEFAULT_WEBP_QUALITY, "minimum": 0, "maximum": 100},
                    "force": {"type": "boolean", "description": "Force reconversion even if .webp files already exist", "default": false}
                }),
                &[],
            ),
        ),
        ToolName::UploadToWordpress => (
            "Upload WebP images directly to a WordPress media library",
            object_schema(
                json!({
                    "wp_url": {"type": "string", "description": "WordPress site URL (e.g., https://example.com)"},
                    "wp_user": {"type": "string", "description": "WordPress username"},
                    "wp_password": {"type": "string", "description": "WordPress application password"},
                    "directory": directory,
                    "limit": limit
                }),
                &["wp_url", "wp_user", "wp_password"],
            ),
        ),
    };

    ToolDefinition {
        name: name.as_str(),
        description,
        input_schema,
    }
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

mod backend;
mod batch;
mod convert;
mod error;
mod gallery;
mod generator;
mod payload;
mod references;
mod upload;

pub use backend::{extract_first_inline_image, GeminiBackend, ImageBackend, InlineImageBytes};
pub use batch::BatchRunner;
pub use convert::{ConversionFailure, ConversionReport, ConvertOptions, FormatConverter, WebpConverter};
pub use error::GenerationError;
pub use gallery::{recent_images, resolve_image_subdir, RecentImage};
pub use generator::{timestamped_filename, GeneratedImage, Generator};
pub use payload::{BuiltRequest, RequestBuilder};
pub use references::{mime_for_path, InlineImage, ReferenceEncoder};
pub use upload::{
    MediaSite, MediaUploader, UploadFailure, UploadReport, UploadedMedia, WordPressUploader,
};

#[cfg(test)]
mod testing;

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use genq_contracts::config::Config;
use genq_contracts::queue::{FileQueueStore, QueueStore};
use genq_contracts::tools::{
    tool_catalog, AddToBatchArgs, ConvertToWebpArgs, GenerateImageArgs, RecentImagesArgs,
    ToolCall, UploadArgs, PROTOCOL_VERSION, SERVER_NAME, SERVER_VERSION,
};
use genq_engine::{
    recent_images, resolve_image_subdir, timestamped_filename, BatchRunner, ConvertOptions,
    FormatConverter, GeminiBackend, Generator, MediaSite, MediaUploader, RequestBuilder,
    WebpConverter, WordPressUploader,
};
use serde_json::{json, Value};

use crate::rpc::{self, code, Incoming, RpcError, RpcMethod};

/// Owns every collaborator a tool call may need. Built once at startup.
pub struct ImageServer {
    config: Config,
    generator: Generator,
    queue: Box<dyn QueueStore>,
    converter: Box<dyn FormatConverter>,
    uploader: Box<dyn MediaUploader>,
}

impl ImageServer {
    pub fn new(
        config: Config,
        generator: Generator,
        queue: Box<dyn QueueStore>,
        converter: Box<dyn FormatConverter>,
        uploader: Box<dyn MediaUploader>,
    ) -> Self {
        Self {
            config,
            generator,
            queue,
            converter,
            uploader,
        }
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let backend = GeminiBackend::from_config(&config)?;
        let generator = Generator::new(RequestBuilder::from_config(&config), Box::new(backend));
        let queue = FileQueueStore::new(config.queue_file.clone());
        let uploader = WordPressUploader::new(config.request_timeout)?;
        Ok(Self::new(
            config,
            generator,
            Box::new(queue),
            Box::new(WebpConverter),
            Box::new(uploader),
        ))
    }

    /// Reads requests until EOF, answering each before reading the next.
    pub fn serve<R: BufRead, W: Write>(&self, mut input: R, mut output: W) -> Result<()> {
        tracing::info!(
            server = SERVER_NAME,
            version = SERVER_VERSION,
            backend = self.generator.backend_name(),
            "serving on stdio"
        );
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = input
                .read_until(b'\n', &mut buf)
                .context("failed reading request")?;
            if read == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let Some(response) = self.handle_line(&line) else {
                continue;
            };
            serde_json::to_writer(&mut output, &response).context("failed writing response")?;
            output.write_all(b"\n")?;
            output.flush()?;
        }
        tracing::info!("input closed, shutting down");
        Ok(())
    }

    /// One request line in, at most one response out.
    pub fn handle_line(&self, line: &str) -> Option<Value> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match rpc::parse_line(line) {
            Ok(incoming) => self.handle_request(incoming),
            Err(response) => {
                tracing::warn!("rejected malformed request line");
                Some(response)
            }
        }
    }

    fn handle_request(&self, incoming: Incoming) -> Option<Value> {
        let method = RpcMethod::parse(&incoming.method);
        let Some(id) = incoming.id else {
            tracing::debug!(method = %incoming.method, "notification");
            return None;
        };
        let reply = match method {
            Some(RpcMethod::Initialize) => Ok(self.initialize_result()),
            Some(RpcMethod::ToolsList) => Ok(json!({
                "tools": tool_catalog(self.config.max_reference_images),
            })),
            Some(RpcMethod::ToolsCall) => self.tools_call(incoming.params),
            Some(RpcMethod::Initialized) => Ok(json!({})),
            None => Err(RpcError::new(
                code::METHOD_NOT_FOUND,
                format!("Method not found: {}", incoming.method),
            )),
        };
        Some(match reply {
            Ok(result) => rpc::success(id, result),
            Err(error) => rpc::failure(id, &error),
        })
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
        })
    }

    fn tools_call(&self, mut params: serde_json::Map<String, Value>) -> Result<Value, RpcError> {
        let Some(name) = params
            .remove("name")
            .and_then(|name| name.as_str().map(str::to_string))
        else {
            return Err(RpcError::new(
                code::INVALID_PARAMS,
                "tools/call requires a tool `name`",
            ));
        };
        let call = ToolCall::parse(&name, params.remove("arguments")).map_err(|err| {
            tracing::warn!(tool = %name, error = %err, "rejected tool call");
            RpcError::from(&err)
        })?;

        tracing::info!(tool = call.name().as_str(), "tool call");
        let result = self.call_tool(call).map_err(|err| {
            let mapped = rpc::operation_error(&err);
            tracing::warn!(tool = %name, kind = mapped.kind.unwrap_or("internal"), error = %mapped.message, "tool call failed");
            mapped
        })?;
        let text = serde_json::to_string(&result).map_err(|err| {
            RpcError::new(code::OPERATION_FAILED, format!("failed to encode result: {err}"))
        })?;
        Ok(json!({
            "content": [{"type": "text", "text": text}],
        }))
    }

    /// Runs a validated tool call and returns its JSON result body.
    pub fn call_tool(&self, call: ToolCall) -> Result<Value> {
        match call {
            ToolCall::GenerateImage(args) => self.generate_image(args),
            ToolCall::AddToBatch(args) => self.add_to_batch(args),
            ToolCall::RemoveFromBatch(args) => {
                let removed = self.queue.remove(&args.identifier)?;
                let queue_length = self.queue.view()?.len();
                Ok(json!({
                    "success": true,
                    "removed": removed,
                    "queue_length": queue_length,
                }))
            }
            ToolCall::ViewBatchQueue => {
                let entries = self.queue.view()?;
                Ok(json!({
                    "success": true,
                    "count": entries.len(),
                    "queue": entries,
                }))
            }
            ToolCall::RunBatch => self.run_batch(),
            ToolCall::ConvertToWebp(args) => self.convert_to_webp(args),
            ToolCall::GetGeneratedWebpImages(args) => self.recent_webp_images(args),
            ToolCall::UploadToWordpress(args) => self.upload_to_wordpress(args),
        }
    }

    fn generate_image(&self, args: GenerateImageArgs) -> Result<Value> {
        let request = args.into_request();
        let path = self.config.images_dir.join(timestamped_filename());
        let image = self.generator.generate(&request, &path)?;
        let message = format!(
            "Image generated successfully ({} mode): {}",
            image.quality.as_str(),
            image.image_path.display()
        );
        Ok(json!({
            "success": true,
            "image_path": image.image_path,
            "resolution": image.resolution,
            "aspect_ratio": image.aspect_ratio,
            "quality": image.quality,
            "model": image.model,
            "reference_images_used": image.reference_images_used,
            "message": message,
        }))
    }

    /// Tier rules are baked in before persisting. Reference paths are
    /// counted here but only checked for existence when the batch runs.
    fn add_to_batch(&self, args: AddToBatchArgs) -> Result<Value> {
        let mut request = args.into_request();
        request.apply_tier_rules();
        self.generator
            .builder()
            .encoder()
            .check_capacity(&request.reference_images)?;
        let quality = request.quality;
        let size_class = request.size_class;
        let entry = self.queue.add(request)?;
        Ok(json!({
            "success": true,
            "index": entry.position,
            "filename": entry.filename,
            "queue_length": entry.position + 1,
            "quality": quality,
            "image_size": size_class,
        }))
    }

    fn run_batch(&self) -> Result<Value> {
        let runner = BatchRunner::new(&self.generator, self.config.api_delay);
        let report = runner.run(self.queue.as_ref(), &self.config.batch_dir)?;
        Ok(json!({
            "success": report.failed() == 0,
            "total": report.attempted(),
            "succeeded": report.succeeded(),
            "failed": report.failed(),
            "results_file": report.results_file,
            "results": report.results,
        }))
    }

    fn convert_to_webp(&self, args: ConvertToWebpArgs) -> Result<Value> {
        let options = ConvertOptions {
            quality: args.quality.unwrap_or(self.config.webp_quality),
            force: args.force,
        };
        let report = self.converter.convert(&self.config.images_dir, &options)?;
        let mut value = serde_json::to_value(&report)?;
        value["success"] = json!(report.success());
        Ok(value)
    }

    fn recent_webp_images(&self, args: RecentImagesArgs) -> Result<Value> {
        let images = recent_images(&self.config.images_dir, &args.directory, args.limit)?;
        Ok(json!({
            "success": true,
            "count": images.len(),
            "images": images,
        }))
    }

    fn upload_to_wordpress(&self, args: UploadArgs) -> Result<Value> {
        let dir = resolve_image_subdir(&self.config.images_dir, &args.directory)?;
        let site = MediaSite {
            url: args.wp_url,
            user: args.wp_user,
            password: args.wp_password,
        };
        let report = self.uploader.upload_recent(&site, &dir, args.limit)?;
        Ok(serde_json::to_value(report)?)
    }
}

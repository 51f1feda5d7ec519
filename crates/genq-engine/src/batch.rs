use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use genq_contracts::outcome::{
    write_batch_results, BatchReport, GenerationOutcome, BATCH_RESULTS_FILE,
};
use genq_contracts::queue::{
    ensure_image_extension, is_plain_filename, QueueIdentifier, QueueStore,
};

use crate::generator::Generator;

/// Drains a queue snapshot through the generator, one entry at a time.
///
/// A succeeded entry is removed from the live queue right after its image is
/// written, so an interrupted run leaves only unprocessed or failed entries
/// behind. Failed entries stay queued; running the batch again retries them.
/// The runner pauses for `delay` between items, never after the last one.
pub struct BatchRunner<'a> {
    generator: &'a Generator,
    delay: Duration,
    pause: Box<dyn Fn(Duration) + 'a>,
}

impl<'a> BatchRunner<'a> {
    pub fn new(generator: &'a Generator, delay: Duration) -> Self {
        Self {
            generator,
            delay,
            pause: Box::new(thread::sleep),
        }
    }

    /// Replaces `thread::sleep` as the way the runner waits between items.
    pub fn with_pause(mut self, pause: impl Fn(Duration) + 'a) -> Self {
        self.pause = Box::new(pause);
        self
    }

    pub fn run(&self, queue: &dyn QueueStore, output_dir: &Path) -> Result<BatchReport> {
        self.generator.ensure_ready()?;
        let entries = queue.view().context("failed to load batch queue")?;
        if entries.is_empty() {
            tracing::info!("batch queue is empty");
            return Ok(BatchReport::empty());
        }
        fs::create_dir_all(output_dir)
            .with_context(|| format!("failed to create {}", output_dir.display()))?;

        let total = entries.len();
        tracing::info!(total, output_dir = %output_dir.display(), "starting batch");
        let mut results = Vec::with_capacity(total);

        for (idx, entry) in entries.iter().enumerate() {
            let filename = ensure_image_extension(&entry.filename);
            tracing::info!(
                item = idx + 1,
                total,
                filename = %filename,
                quality = entry.request.quality.as_str(),
                "generating queued image"
            );

            let outcome = if is_plain_filename(&filename) {
                self.generator
                    .generate_outcome(&entry.request, output_dir, &filename)
            } else {
                GenerationOutcome::Error {
                    error: format!("Filename must not contain directories: {filename}"),
                    filename: filename.clone(),
                }
            };
            if outcome.is_success() {
                match queue.remove(&QueueIdentifier::entry(entry)) {
                    Ok(_) => tracing::info!(filename = %entry.filename, "removed from queue"),
                    Err(err) => tracing::warn!(
                        filename = %entry.filename,
                        error = %err,
                        "could not remove generated entry from queue"
                    ),
                }
            } else if let GenerationOutcome::Error { error, .. } = &outcome {
                tracing::warn!(filename = %filename, error = %error, "queued image failed");
            }
            results.push(outcome);

            if idx + 1 < total && !self.delay.is_zero() {
                tracing::debug!(delay_ms = self.delay.as_millis() as u64, "waiting before next item");
                (self.pause)(self.delay);
            }
        }

        let results_file = output_dir.join(BATCH_RESULTS_FILE);
        write_batch_results(&results_file, &results)
            .with_context(|| format!("failed to write {}", results_file.display()))?;
        let report = BatchReport {
            results,
            results_file: Some(results_file),
        };
        tracing::info!(
            total = report.attempted(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            "batch complete"
        );
        Ok(report)
    }
}

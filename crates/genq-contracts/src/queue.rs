use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::{GenerationRequest, QualityTier, SizeClass, QUEUED_ASPECT_RATIO};

pub const DEFAULT_IMAGE_EXTENSION: &str = "png";
const FILENAME_SLUG_WORDS: usize = 6;
const FILENAME_SLUG_MAX_CHARS: usize = 48;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("no queued entry matches `{0}`")]
    NotFound(String),
    #[error("filename `{0}` must be a plain file name without directories")]
    InvalidFilename(String),
    #[error("queue file {} is malformed: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("queue file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How a caller names the entry to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueIdentifier {
    /// An in-bounds non-negative integer is a position in the current queue;
    /// anything else is matched as a filename.
    Auto(String),
    /// Always a filename, even when it looks numeric.
    Filename(String),
    /// One specific entry taken from an earlier snapshot. Matches on
    /// filename, prompt and `added_at` so repeated filenames stay distinct.
    Entry {
        filename: String,
        prompt: String,
        added_at: Option<String>,
    },
}

impl QueueIdentifier {
    pub fn entry(entry: &QueueEntry) -> Self {
        Self::Entry {
            filename: entry.filename.clone(),
            prompt: entry.request.prompt.clone(),
            added_at: entry.added_at.clone(),
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            Self::Auto(raw) | Self::Filename(raw) => raw,
            Self::Entry { filename, .. } => filename,
        }
    }

    fn resolve(&self, entries: &[StoredEntry]) -> Option<usize> {
        if let Self::Entry {
            filename,
            prompt,
            added_at,
        } = self
        {
            return entries.iter().position(|entry| {
                entry.filename == *filename && entry.prompt == *prompt && entry.added_at == *added_at
            });
        }
        if let Self::Auto(raw) = self {
            if let Ok(index) = raw.trim().parse::<usize>() {
                if index < entries.len() {
                    return Some(index);
                }
            }
        }
        let wanted = self.raw().trim();
        if wanted.is_empty() {
            return None;
        }
        let suffixed = ensure_image_extension(wanted);
        entries
            .iter()
            .position(|entry| entry.filename == wanted)
            .or_else(|| {
                entries
                    .iter()
                    .position(|entry| entry.filename == suffixed)
            })
    }
}

/// A pending generation with its current position in the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub position: usize,
    pub filename: String,
    pub request: GenerationRequest,
    pub added_at: Option<String>,
}

impl Serialize for QueueEntry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct View<'a> {
            index: usize,
            #[serde(flatten)]
            stored: &'a StoredEntry,
        }
        let stored = StoredEntry::from_entry(self);
        View {
            index: self.position,
            stored: &stored,
        }
        .serialize(serializer)
    }
}

/// Ordered, durable list of pending generations.
pub trait QueueStore {
    /// Appends and returns the new entry, whose `position` is its index.
    fn add(&self, request: GenerationRequest) -> Result<QueueEntry, QueueError>;
    /// Removes exactly one entry and returns it.
    fn remove(&self, identifier: &QueueIdentifier) -> Result<QueueEntry, QueueError>;
    /// Full ordered snapshot.
    fn view(&self) -> Result<Vec<QueueEntry>, QueueError>;
}

/// Queue persisted as `{"prompts": [...]}` in one JSON file.
///
/// Every call is a fresh load, mutate, persist cycle; nothing is cached
/// between calls. Persisting writes a sibling temp file and renames it over
/// the queue file so a crash never leaves a truncated queue. There is no
/// locking: two concurrent writers race and the last rename wins.
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    path: PathBuf,
}

impl FileQueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<QueueFile, QueueError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(QueueFile::default())
            }
            Err(source) => {
                return Err(QueueError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if raw.trim().is_empty() {
            return Ok(QueueFile::default());
        }
        let mut file: QueueFile =
            serde_json::from_str(&raw).map_err(|source| QueueError::Malformed {
                path: self.path.clone(),
                source,
            })?;
        for (position, entry) in file.prompts.iter_mut().enumerate() {
            entry.normalize(position);
        }
        Ok(file)
    }

    fn persist(&self, file: &QueueFile) -> Result<(), QueueError> {
        let io_err = |source| QueueError::Io {
            path: self.path.clone(),
            source,
        };
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(io_err)?;
        let encoded = serde_json::to_string_pretty(file).map_err(|source| {
            QueueError::Malformed {
                path: self.path.clone(),
                source,
            }
        })?;
        let mut staged = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
        staged.write_all(encoded.as_bytes()).map_err(io_err)?;
        staged.as_file().sync_all().map_err(io_err)?;
        staged
            .persist(&self.path)
            .map_err(|err| io_err(err.error))?;
        Ok(())
    }
}

impl QueueStore for FileQueueStore {
    fn add(&self, request: GenerationRequest) -> Result<QueueEntry, QueueError> {
        if request.prompt.trim().is_empty() {
            return Err(QueueError::EmptyPrompt);
        }
        let mut file = self.load()?;
        let position = file.prompts.len();
        let filename = match request
            .filename
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
        {
            Some(name) if !is_plain_filename(name) => {
                return Err(QueueError::InvalidFilename(name.to_string()))
            }
            Some(name) => ensure_image_extension(name),
            None => default_filename(&request.prompt, position),
        };
        let entry = QueueEntry {
            position,
            filename,
            request,
            added_at: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        };
        file.prompts.push(StoredEntry::from_entry(&entry));
        self.persist(&file)?;
        tracing::debug!(
            queue = %self.path.display(),
            position,
            filename = %entry.filename,
            "queued generation"
        );
        Ok(entry)
    }

    fn remove(&self, identifier: &QueueIdentifier) -> Result<QueueEntry, QueueError> {
        let mut file = self.load()?;
        let Some(index) = identifier.resolve(&file.prompts) else {
            return Err(QueueError::NotFound(identifier.raw().to_string()));
        };
        let stored = file.prompts.remove(index);
        self.persist(&file)?;
        tracing::debug!(
            queue = %self.path.display(),
            index,
            filename = %stored.filename,
            "removed queued generation"
        );
        Ok(stored.into_entry(index))
    }

    fn view(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let file = self.load()?;
        Ok(file
            .prompts
            .into_iter()
            .enumerate()
            .map(|(position, stored)| stored.into_entry(position))
            .collect())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueFile {
    #[serde(default)]
    prompts: Vec<StoredEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    prompt: String,
    #[serde(default)]
    filename: String,
    #[serde(default = "default_queued_aspect_ratio")]
    aspect_ratio: String,
    #[serde(default)]
    image_size: SizeClass,
    #[serde(default)]
    quality: QualityTier,
    #[serde(default)]
    reference_images: Vec<String>,
    // Older queue files carried a single path here.
    #[serde(default, skip_serializing)]
    reference_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    added_at: Option<String>,
}

impl StoredEntry {
    fn from_entry(entry: &QueueEntry) -> Self {
        let request = &entry.request;
        Self {
            prompt: request.prompt.clone(),
            filename: entry.filename.clone(),
            aspect_ratio: request.aspect_ratio.clone(),
            image_size: request.size_class,
            quality: request.quality,
            reference_images: request.reference_images.clone(),
            reference_image: None,
            description: request.description.clone(),
            added_at: entry.added_at.clone(),
        }
    }

    fn normalize(&mut self, position: usize) {
        if self.reference_images.is_empty() {
            if let Some(single) = self.reference_image.take().filter(|p| !p.trim().is_empty()) {
                self.reference_images.push(single);
            }
        }
        if self.filename.trim().is_empty() {
            self.filename = format!("image_{}.{DEFAULT_IMAGE_EXTENSION}", position + 1);
        }
        if self.aspect_ratio.trim().is_empty() {
            self.aspect_ratio = default_queued_aspect_ratio();
        }
    }

    fn into_entry(self, position: usize) -> QueueEntry {
        QueueEntry {
            position,
            request: GenerationRequest {
                prompt: self.prompt,
                filename: Some(self.filename.clone()),
                aspect_ratio: self.aspect_ratio,
                size_class: self.image_size,
                quality: self.quality,
                reference_images: self.reference_images,
                description: self.description,
            },
            filename: self.filename,
            added_at: self.added_at,
        }
    }
}

fn default_queued_aspect_ratio() -> String {
    QUEUED_ASPECT_RATIO.to_string()
}

/// Generated images are always PNG: keeps a `.png` name, otherwise appends
/// `.png`.
pub fn ensure_image_extension(name: &str) -> String {
    let name = name.trim();
    let is_png = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(DEFAULT_IMAGE_EXTENSION))
        .unwrap_or(false);
    if is_png {
        name.to_string()
    } else {
        format!("{name}.{DEFAULT_IMAGE_EXTENSION}")
    }
}

/// True when `name` is a single normal path component, so joining it onto
/// an output directory cannot leave that directory.
pub fn is_plain_filename(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Filename for an entry enqueued without one: the first words of the
/// prompt as a lowercase slug, or `image_<n>` when the prompt has no
/// usable characters.
pub fn default_filename(prompt: &str, position: usize) -> String {
    let mut slug = String::new();
    for word in prompt
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .take(FILENAME_SLUG_WORDS)
    {
        let word = word.to_ascii_lowercase();
        let extra = if slug.is_empty() { 0 } else { 1 };
        if slug.len() + extra + word.len() > FILENAME_SLUG_MAX_CHARS {
            break;
        }
        if extra == 1 {
            slug.push('_');
        }
        slug.push_str(&word);
    }
    if slug.is_empty() {
        slug = format!("image_{}", position + 1);
    }
    format!("{slug}.{DEFAULT_IMAGE_EXTENSION}")
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{
        default_filename, ensure_image_extension, is_plain_filename, FileQueueStore, QueueError,
        QueueIdentifier, QueueStore,
    };
    use crate::request::{GenerationRequest, QualityTier, SizeClass};

    fn queued(prompt: &str, filename: Option<&str>) -> GenerationRequest {
        let mut request = GenerationRequest::new(prompt);
        request.aspect_ratio = "16:9".to_string();
        request.filename = filename.map(str::to_string);
        request
    }

    #[test]
    fn add_returns_positions_in_insertion_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FileQueueStore::new(temp.path().join("queue.json"));
        let first = store.add(queued("a red circle", None))?;
        let second = store.add(queued("blue square", Some("square")))?;
        assert_eq!(first.position, 0);
        assert_eq!(first.filename, "a_red_circle.png");
        assert_eq!(second.position, 1);
        assert_eq!(second.filename, "square.png");

        let view = store.view()?;
        let names: Vec<&str> = view.iter().map(|entry| entry.filename.as_str()).collect();
        assert_eq!(names, vec!["a_red_circle.png", "square.png"]);
        Ok(())
    }

    #[test]
    fn removing_index_zero_repeatedly_empties_queue() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FileQueueStore::new(temp.path().join("queue.json"));
        for idx in 0..4 {
            store.add(queued(&format!("prompt {idx}"), None))?;
        }
        for idx in 0..4 {
            let removed = store.remove(&QueueIdentifier::Auto("0".to_string()))?;
            assert_eq!(removed.request.prompt, format!("prompt {idx}"));
        }
        assert!(store.view()?.is_empty());
        let err = store
            .remove(&QueueIdentifier::Auto("0".to_string()))
            .expect_err("empty queue has nothing to remove");
        assert!(matches!(err, QueueError::NotFound(ref raw) if raw == "0"));
        Ok(())
    }

    #[test]
    fn remove_by_filename_takes_exactly_one_match() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FileQueueStore::new(temp.path().join("queue.json"));
        store.add(queued("one", Some("hero.png")))?;
        store.add(queued("two", Some("banner.png")))?;
        store.add(queued("three", Some("hero.png")))?;

        let removed = store.remove(&QueueIdentifier::Auto("hero.png".to_string()))?;
        assert_eq!(removed.request.prompt, "one");
        let prompts: Vec<String> = store
            .view()?
            .into_iter()
            .map(|entry| entry.request.prompt)
            .collect();
        assert_eq!(prompts, vec!["two", "three"]);

        let removed = store.remove(&QueueIdentifier::Auto("banner".to_string()))?;
        assert_eq!(removed.request.prompt, "two");
        Ok(())
    }

    #[test]
    fn out_of_bounds_number_falls_back_to_filename() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FileQueueStore::new(temp.path().join("queue.json"));
        store.add(queued("first", None))?;
        store.add(queued("numbered", Some("7")))?;

        let removed = store.remove(&QueueIdentifier::Auto("7".to_string()))?;
        assert_eq!(removed.filename, "7.png");
        assert_eq!(store.view()?.len(), 1);

        let err = store
            .remove(&QueueIdentifier::Filename("0".to_string()))
            .expect_err("filename lookup never treats input as index");
        assert!(matches!(err, QueueError::NotFound(_)));
        Ok(())
    }

    #[test]
    fn indices_refer_to_current_list_after_removal() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FileQueueStore::new(temp.path().join("queue.json"));
        store.add(queued("a", None))?;
        store.add(queued("b", None))?;
        store.add(queued("c", None))?;

        store.remove(&QueueIdentifier::Auto("0".to_string()))?;
        let removed = store.remove(&QueueIdentifier::Auto("1".to_string()))?;
        assert_eq!(removed.request.prompt, "c");
        let view = store.view()?;
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].position, 0);
        assert_eq!(view[0].request.prompt, "b");
        Ok(())
    }

    #[test]
    fn empty_prompt_is_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FileQueueStore::new(temp.path().join("queue.json"));
        let err = store.add(queued("   ", None)).expect_err("empty prompt");
        assert!(matches!(err, QueueError::EmptyPrompt));
        assert!(!store.path().exists());
        Ok(())
    }

    #[test]
    fn legacy_queue_file_is_normalized_on_read() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("queue.json");
        std::fs::write(
            &path,
            serde_json::to_string(&json!({
                "prompts": [
                    {"prompt": "castle", "reference_image": "~/ref.png", "quality": "ultra"},
                    {"prompt": "moat", "filename": "moat.png", "image_size": "small", "quality": "fast"}
                ]
            }))?,
        )?;
        let store = FileQueueStore::new(&path);
        let view = store.view()?;
        assert_eq!(view[0].filename, "image_1.png");
        assert_eq!(view[0].request.aspect_ratio, "16:9");
        assert_eq!(view[0].request.reference_images, vec!["~/ref.png"]);
        assert_eq!(view[0].request.quality, QualityTier::Pro);
        assert_eq!(view[0].request.size_class, SizeClass::Large);
        assert_eq!(view[1].request.quality, QualityTier::Fast);
        assert_eq!(view[1].request.size_class, SizeClass::Small);
        Ok(())
    }

    #[test]
    fn malformed_queue_file_is_not_overwritten() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("queue.json");
        std::fs::write(&path, "{oops")?;
        let store = FileQueueStore::new(&path);
        let err = store.add(queued("x", None)).expect_err("malformed");
        assert!(matches!(err, QueueError::Malformed { .. }));
        assert_eq!(std::fs::read_to_string(&path)?, "{oops");
        Ok(())
    }

    #[test]
    fn persisted_format_is_stable_json() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("queue.json");
        let store = FileQueueStore::new(&path);
        let mut request = queued("lighthouse at dusk", Some("lighthouse"));
        request.reference_images = vec!["/refs/a.png".to_string()];
        request.description = Some("cover art".to_string());
        store.add(request)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        let row = &parsed["prompts"][0];
        assert_eq!(row["prompt"], json!("lighthouse at dusk"));
        assert_eq!(row["filename"], json!("lighthouse.png"));
        assert_eq!(row["aspect_ratio"], json!("16:9"));
        assert_eq!(row["image_size"], json!("large"));
        assert_eq!(row["quality"], json!("pro"));
        assert_eq!(row["reference_images"], json!(["/refs/a.png"]));
        assert_eq!(row["description"], json!("cover art"));
        assert!(row.get("reference_image").is_none());
        assert!(row["added_at"].as_str().is_some());
        Ok(())
    }

    #[test]
    fn queue_entry_serializes_with_index() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FileQueueStore::new(temp.path().join("queue.json"));
        store.add(queued("a", None))?;
        store.add(queued("b", None))?;
        let view = serde_json::to_value(store.view()?)?;
        assert_eq!(view[1]["index"], json!(1));
        assert_eq!(view[1]["prompt"], json!("b"));
        Ok(())
    }

    #[test]
    fn filename_helpers() {
        assert_eq!(ensure_image_extension("cover"), "cover.png");
        assert_eq!(ensure_image_extension("cover.PNG"), "cover.PNG");
        assert_eq!(ensure_image_extension("cover.jpg"), "cover.jpg.png");
        assert_eq!(ensure_image_extension("cover.webp"), "cover.webp.png");
        assert_eq!(ensure_image_extension("cover.v2"), "cover.v2.png");
        assert_eq!(
            default_filename("A Red Circle, on white!", 0),
            "a_red_circle_on_white.png"
        );
        assert_eq!(default_filename("???", 4), "image_5.png");
    }

    #[test]
    fn entry_identifier_removes_that_entry_among_duplicate_filenames() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FileQueueStore::new(temp.path().join("queue.json"));
        store.add(queued("first, broken", Some("dup.png")))?;
        let second = store.add(queued("second, fine", Some("dup.png")))?;

        let removed = store.remove(&QueueIdentifier::entry(&second))?;
        assert_eq!(removed.request.prompt, "second, fine");
        let view = store.view()?;
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].request.prompt, "first, broken");

        let err = store
            .remove(&QueueIdentifier::entry(&second))
            .expect_err("already removed");
        assert!(matches!(err, QueueError::NotFound(ref raw) if raw == "dup.png"));
        assert_eq!(store.view()?.len(), 1);
        Ok(())
    }

    #[test]
    fn entry_identifier_matches_legacy_rows_without_timestamp() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("queue.json");
        std::fs::write(
            &path,
            serde_json::to_string(&json!({
                "prompts": [
                    {"prompt": "old one", "filename": "dup.png"},
                    {"prompt": "old two", "filename": "dup.png"}
                ]
            }))?,
        )?;
        let store = FileQueueStore::new(&path);
        let snapshot = store.view()?;
        let removed = store.remove(&QueueIdentifier::entry(&snapshot[1]))?;
        assert_eq!(removed.request.prompt, "old two");
        assert_eq!(store.view()?[0].request.prompt, "old one");
        Ok(())
    }

    #[test]
    fn filenames_with_directories_are_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FileQueueStore::new(temp.path().join("queue.json"));
        for bad in ["../escape.png", "/tmp/abs.png", "nested/dir.png", ".."] {
            let err = store.add(queued("x", Some(bad))).expect_err(bad);
            assert!(matches!(err, QueueError::InvalidFilename(ref name) if name == bad));
        }
        assert!(!store.path().exists());
        assert!(is_plain_filename("ok.png"));
        assert!(!is_plain_filename("."));
        Ok(())
    }
}

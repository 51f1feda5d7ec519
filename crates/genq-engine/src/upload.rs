use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client as HttpClient;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::gallery::{file_name, newest_webp_files};

/// Target media library and its credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSite {
    pub url: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadedMedia {
    pub filename: String,
    pub media_id: i64,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadFailure {
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReport {
    pub success: bool,
    pub uploaded: Vec<UploadedMedia>,
    pub failed: Vec<UploadFailure>,
    pub total: usize,
}

pub trait MediaUploader: Send + Sync {
    fn upload_file(&self, site: &MediaSite, path: &Path) -> Result<UploadedMedia>;

    /// Uploads the newest `.webp` files in `dir`. One file failing does not
    /// stop the others.
    fn upload_recent(&self, site: &MediaSite, dir: &Path, limit: usize) -> Result<UploadReport> {
        let mut uploaded = Vec::new();
        let mut failed = Vec::new();
        for path in newest_webp_files(dir, limit)? {
            match self.upload_file(site, &path) {
                Ok(media) => {
                    tracing::info!(filename = %media.filename, media_id = media.media_id, "uploaded media");
                    uploaded.push(media);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "media upload failed");
                    failed.push(UploadFailure {
                        filename: file_name(&path),
                        error: format!("{err:#}"),
                    });
                }
            }
        }
        Ok(UploadReport {
            success: failed.is_empty(),
            total: uploaded.len() + failed.len(),
            uploaded,
            failed,
        })
    }
}

/// WordPress REST media endpoint, basic auth, multipart body.
pub struct WordPressUploader {
    http: HttpClient,
}

impl WordPressUploader {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }
}

impl MediaUploader for WordPressUploader {
    fn upload_file(&self, site: &MediaSite, path: &Path) -> Result<UploadedMedia> {
        let filename = file_name(path);
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let part = Part::bytes(bytes)
            .file_name(filename.clone())
            .mime_str("image/webp")?;
        let endpoint = format!("{}/wp-json/wp/v2/media", site.url.trim_end_matches('/'));
        let response = self
            .http
            .post(&endpoint)
            .basic_auth(&site.user, Some(&site.password))
            .multipart(Form::new().part("file", part))
            .send()
            .with_context(|| format!("media upload request failed ({endpoint})"))?;

        let status = response.status();
        let body = response.text().context("media upload response read failed")?;
        if status != StatusCode::CREATED {
            bail!("HTTP {}: {}", status.as_u16(), body);
        }
        let media: Value = serde_json::from_str(&body).context("media response is not JSON")?;
        let media_id = media
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("media response is missing `id`"))?;
        Ok(UploadedMedia {
            filename,
            media_id,
            url: media
                .get("source_url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            title: media
                .pointer("/title/rendered")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{Duration, SystemTime};

    use serde_json::json;

    use super::{MediaSite, MediaUploader, WordPressUploader};
    use crate::testing::serve;

    fn site(url: String) -> MediaSite {
        MediaSite {
            url,
            user: "user".to_string(),
            password: "pass".to_string(),
        }
    }

    #[test]
    fn uploads_newest_first_and_collects_failures() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let older = temp.path().join("older.webp");
        let newer = temp.path().join("newer.webp");
        fs::write(&older, b"old")?;
        fs::write(&newer, b"new")?;
        fs::File::options()
            .write(true)
            .open(&older)?
            .set_modified(SystemTime::now() - Duration::from_secs(600))?;

        let created = json!({
            "id": 42,
            "source_url": "https://blog.example/wp-content/uploads/newer.webp",
            "title": {"rendered": "newer"}
        })
        .to_string();
        let (base, server) = serve(vec![
            ("201 Created", created),
            ("401 Unauthorized", r#"{"code":"rest_cannot_create"}"#.to_string()),
        ])?;

        let report = WordPressUploader::new(None)?.upload_recent(&site(base), temp.path(), 10)?;
        let requests = server.join().expect("server thread");

        assert!(!report.success);
        assert_eq!(report.total, 2);
        assert_eq!(report.uploaded.len(), 1);
        assert_eq!(report.uploaded[0].filename, "newer.webp");
        assert_eq!(report.uploaded[0].media_id, 42);
        assert_eq!(report.uploaded[0].title, "newer");
        assert_eq!(report.failed[0].filename, "older.webp");
        assert_eq!(
            report.failed[0].error,
            r#"HTTP 401: {"code":"rest_cannot_create"}"#
        );

        assert!(requests[0].starts_with("POST /v1beta/wp-json/wp/v2/media "));
        assert!(requests[0].contains("Basic dXNlcjpwYXNz"));
        assert!(requests[0].contains(r#"filename="newer.webp""#));
        assert!(requests[0].contains("image/webp"));
        Ok(())
    }

    #[test]
    fn empty_directory_uploads_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let report = WordPressUploader::new(None)?.upload_recent(
            &site("http://127.0.0.1:9".to_string()),
            &temp.path().join("batch"),
            10,
        )?;
        assert!(report.success);
        assert_eq!(report.total, 0);
        Ok(())
    }
}

//! Screenshot artifact storage.
//!
//! Screenshots arrive as base64, either bare or as a `data:image/...;base64,`
//! URL. They are decoded and written under a single directory.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};

const DATA_URL_PREFIX: &str = "data:image";
const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// A file written by [`ArtifactStore::save`].
#[derive(Debug, Clone, Serialize)]
pub struct SavedArtifact {
    pub filename: String,
    pub filepath: PathBuf,
    pub size: usize,
}

/// One entry of [`ArtifactStore::list`].
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub created: u64,
}

/// Directory of saved screenshots.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where `filename` would be written. Rejects names that would escape the
    /// directory.
    pub fn path_for(&self, filename: &str) -> Result<PathBuf> {
        validate_filename(filename)?;
        Ok(self.dir.join(filename))
    }

    /// Decode `payload` and write it as `filename` (or a timestamped default).
    pub async fn save(&self, filename: Option<&str>, payload: &str) -> Result<SavedArtifact> {
        let filename = filename.map_or_else(default_filename, str::to_string);
        let filepath = self.path_for(&filename)?;
        let bytes = decode_image_payload(payload)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&filepath, &bytes).await?;
        info!(path = %filepath.display(), size = bytes.len(), "Screenshot saved");

        Ok(SavedArtifact {
            filename,
            filepath,
            size: bytes.len(),
        })
    }

    /// Saved `.png` files, newest first. A missing directory is an empty list.
    pub async fn list(&self) -> Result<Vec<ArtifactInfo>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("png") {
                continue;
            }
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping unreadable artifact");
                    continue;
                }
            };
            let created = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs());
            out.push(ArtifactInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                size: meta.len(),
                created,
            });
        }
        out.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.name.cmp(&a.name)));
        Ok(out)
    }
}

/// `screenshot_<unix-seconds>.png`
pub fn default_filename() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    format!("screenshot_{secs}.png")
}

fn validate_filename(filename: &str) -> Result<()> {
    let invalid = filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\', '\0']);
    if invalid {
        return Err(Error::Artifact(format!("Invalid filename: {filename:?}")));
    }
    Ok(())
}

/// Decode a bare base64 string or a `data:image/...;base64,` URL.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>> {
    let encoded = if payload.starts_with(DATA_URL_PREFIX) {
        payload
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| Error::Artifact("Malformed data URL".into()))?
    } else {
        payload
    };
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Artifact(format!("Invalid base64 image data: {e}")))
}

/// Whether a response `data` field carries a screenshot: an image data URL,
/// or bare base64 that decodes to a PNG.
pub fn is_image_payload(data: &Value) -> bool {
    let Some(s) = data.as_str() else {
        return false;
    };
    if s.starts_with(DATA_URL_PREFIX) {
        return true;
    }
    decode_image_payload(s).is_ok_and(|bytes| bytes.starts_with(PNG_MAGIC))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn png_base64() -> String {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(b"fake image body");
        STANDARD.encode(bytes)
    }

    #[tokio::test]
    async fn saves_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("shots"));
        let payload = format!("data:image/png;base64,{}", png_base64());

        let saved = store.save(Some("page.png"), &payload).await.unwrap();
        assert_eq!(saved.filename, "page.png");
        let written = std::fs::read(&saved.filepath).unwrap();
        assert!(written.starts_with(PNG_MAGIC));
        assert_eq!(written.len(), saved.size);
    }

    #[tokio::test]
    async fn default_name_is_timestamped() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let saved = store.save(None, &png_base64()).await.unwrap();
        assert!(saved.filename.starts_with("screenshot_"));
        assert!(saved.filename.ends_with(".png"));
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        for name in ["../evil.png", "a/b.png", "..", ""] {
            let err = store.save(Some(name), &png_base64()).await.unwrap_err();
            assert!(matches!(err, Error::Artifact(_)), "accepted {name:?}");
        }
    }

    #[tokio::test]
    async fn rejects_bad_base64() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let err = store.save(Some("x.png"), "not base64!!").await.unwrap_err();
        assert!(matches!(err, Error::Artifact(_)));
        assert!(!dir.path().join("x.png").exists());
    }

    #[tokio::test]
    async fn lists_only_pngs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.save(Some("a.png"), &png_base64()).await.unwrap();
        store.save(Some("b.png"), &png_base64()).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let listed = store.list().await.unwrap();
        let mut names: Vec<_> = listed.iter().map(|a| a.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }

    #[tokio::test]
    async fn missing_directory_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("absent"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[test]
    fn recognises_image_payloads() {
        assert!(is_image_payload(&json!("data:image/jpeg;base64,AAAA")));
        assert!(is_image_payload(&json!(png_base64())));
        assert!(!is_image_payload(&json!("aGVsbG8=")));
        assert!(!is_image_payload(&json!({"title": "Example"})));
    }
}

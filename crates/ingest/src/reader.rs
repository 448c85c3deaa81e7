use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

use crate::error::{IngestError, Result};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

pub struct ImageReader;

impl ImageReader {
    /// Read an image and return its bytes as standard, padded base64.
    pub async fn encode(path: &Path) -> Result<String> {
        let bytes = Self::read_bytes(path).await?;
        Ok(Self::encode_bytes(&bytes))
    }

    pub fn encode_bytes(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    /// Read an image and wrap it in a `data:` URL for chat-completion image parts.
    pub async fn data_url(path: &Path) -> Result<String> {
        let encoded = Self::encode(path).await?;
        Ok(format!("data:{};base64,{}", mime_type(path), encoded))
    }

    pub async fn read_bytes(path: &Path) -> Result<Vec<u8>> {
        fs::read(path)
            .await
            .map_err(|e| IngestError::io(path, e))
    }

    /// Recursively list statement images under `dir`, sorted by path.
    pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut images = Vec::new();

        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                IngestError::io(path, source)
            })?;

            if entry.file_type().is_file() && is_image(entry.path()) {
                images.push(entry.into_path());
            }
        }

        images.sort();
        tracing::debug!(dir = %dir.display(), count = images.len(), "discovered images");
        Ok(images)
    }
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// MIME type used in the data URL. Unknown extensions fall back to PNG.
pub fn mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_encode_matches_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statement.png");
        std::fs::write(&path, b"hello").unwrap();

        let encoded = ImageReader::encode(&path).await.unwrap();
        assert_eq!(encoded, "aGVsbG8=");
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let err = ImageReader::encode(Path::new("/definitely/not/here.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Io { .. }));
    }

    #[tokio::test]
    async fn test_data_url_uses_extension_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.JPG");
        std::fs::write(&path, [0xffu8, 0xd8]).unwrap();

        let url = ImageReader::data_url(&path).await.unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.png"), b"x").unwrap();
        std::fs::write(dir.path().join("a.jpeg"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("nested/c.webp"), b"x").unwrap();

        let found = ImageReader::discover(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["a.jpeg", "b.png", "nested/c.webp"]);
    }
}

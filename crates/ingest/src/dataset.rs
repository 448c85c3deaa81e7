use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{IngestError, Result};
use crate::image_id;
use crate::reader::ImageReader;

/// One evaluation case: a statement image and the JSON the extractor should produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetItem {
    pub id: String,
    pub image_path: PathBuf,
    /// Expected output as JSON text. Kept as text so malformed fixtures
    /// surface when a run reaches them rather than at load time.
    pub expected_output: String,
}

/// On-disk shape of an item. `expected_output` may be a JSON string or an
/// inline object.
#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(alias = "image")]
    image_path: PathBuf,
    expected_output: Value,
}

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub name: String,
    pub items: Vec<DatasetItem>,
}

impl Dataset {
    /// Load a dataset from a `.json` array, a `.jsonl` file, or a directory
    /// of images (see [`Dataset::from_dir`]).
    ///
    /// Relative image paths are resolved against the dataset file's directory.
    pub async fn load(path: &Path) -> Result<Self> {
        if fs::metadata(path).await.is_ok_and(|m| m.is_dir()) {
            return Self::from_dir(path).await;
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| IngestError::io(path, e))?;

        let raw_items = match path.extension().and_then(|e| e.to_str()) {
            Some("jsonl") => parse_jsonl(path, &content)?,
            _ => serde_json::from_str::<Vec<RawItem>>(&content)
                .map_err(|e| IngestError::dataset(path, e.to_string()))?,
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let items = raw_items
            .into_iter()
            .map(|raw| resolve_item(base_dir, raw))
            .collect::<Vec<_>>();

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        tracing::info!(dataset = %name, items = items.len(), "loaded dataset");

        Ok(Self { name, items })
    }

    /// Build a dataset from the images under `dir`. Each image's expected
    /// output is the JSON file next to it with the same stem; images without
    /// one are skipped.
    pub async fn from_dir(dir: &Path) -> Result<Self> {
        let mut items = Vec::new();

        for image_path in ImageReader::discover(dir)? {
            let expected_path = image_path.with_extension("json");
            let expected_output = match fs::read_to_string(&expected_path).await {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!(image = %image_path.display(), "no expected output, skipping");
                    continue;
                }
                Err(e) => return Err(IngestError::io(expected_path, e)),
            };

            items.push(DatasetItem {
                id: image_id(&image_path),
                image_path,
                expected_output,
            });
        }

        let name = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        tracing::info!(dataset = %name, items = items.len(), "loaded image directory");

        Ok(Self { name, items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn parse_jsonl(path: &Path, content: &str) -> Result<Vec<RawItem>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<RawItem>(line)
                .map_err(|e| IngestError::dataset(path, format!("line {}: {}", idx + 1, e)))
        })
        .collect()
}

fn resolve_item(base_dir: &Path, raw: RawItem) -> DatasetItem {
    let image_path = if raw.image_path.is_relative() {
        base_dir.join(&raw.image_path)
    } else {
        raw.image_path
    };

    let expected_output = match raw.expected_output {
        Value::String(text) => text,
        other => other.to_string(),
    };

    DatasetItem {
        id: raw.id.unwrap_or_else(|| image_id(&image_path)),
        image_path,
        expected_output,
    }
}

pub mod dataset;
pub mod error;
pub mod reader;

pub use dataset::{Dataset, DatasetItem};
pub use error::{IngestError, Result};
pub use reader::ImageReader;

use sha2::{Digest, Sha256};
use std::path::Path;

/// Base64 text of the image's raw bytes.
pub async fn encode_image(path: &Path) -> Result<String> {
    ImageReader::encode(path).await
}

/// Image identifier used in score records: the file stem.
pub fn image_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Stable content fingerprint of an image (first 16 bytes of SHA-256, hex).
pub fn image_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_id_is_stem() {
        assert_eq!(image_id(Path::new("/data/fidelity_q3.png")), "fidelity_q3");
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = image_fingerprint(b"statement");
        let b = image_fingerprint(b"statement");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, image_fingerprint(b"other"));
    }
}

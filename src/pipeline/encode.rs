//! Slice encoding: PNG bytes on disk → base64 `ImageData` for the vision API.
//!
//! Slices are already PNG when the browser hands them over, so no
//! re-encoding happens here; the bytes are read back and wrapped. PNG stays
//! lossless, which matters more for small print than payload size, and
//! `detail: "high"` lets GPT-4-class models tile the full slice instead of
//! reading a single downscaled overview.

use crate::error::SliceError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::path::Path;
use tracing::debug;

/// Wrap PNG bytes for a vision request.
pub fn encode_png(png: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!("Encoded slice → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}

/// Read a slice image from disk.
pub async fn read_slice_image(index: usize, path: &Path) -> Result<Vec<u8>, SliceError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| SliceError::ImageUnreadable {
            slice: index,
            detail: format!("{}: {}", path.display(), e),
        })?;
    if bytes.is_empty() {
        return Err(SliceError::ImageUnreadable {
            slice: index,
            detail: format!("{} is empty", path.display()),
        });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_wraps_png_as_high_detail() {
        let png = crate::pipeline::fake::solid_png(10, 10);
        let data = encode_png(&png);
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, png);
    }

    #[tokio::test]
    async fn missing_slice_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_slice_image(4, &dir.path().join("nope.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, SliceError::ImageUnreadable { slice: 4, .. }));
    }
}

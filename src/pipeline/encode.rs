//! Image encoding: image file on disk → base64 `ImageData`.
//!
//! Slide renders and extracted figures are already encoded images, so they
//! are forwarded byte-for-byte with the MIME type taken from the extension.
//! `detail: "high"` keeps small formula text legible to the vision model.

use crate::error::EnhancementError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::path::Path;
use tracing::debug;

/// Extensions the captioning stage will send to a vision model.
pub const CAPTIONABLE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// MIME type for an image path, by extension.
pub fn mime_for(path: &Path) -> &'static str {
    match extension(path).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

/// Whether `path` has an extension a vision model accepts.
pub fn is_captionable(path: &Path) -> bool {
    extension(path).is_some_and(|ext| CAPTIONABLE_EXTENSIONS.contains(&ext.as_str()))
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Read an image file and wrap it for a vision request.
pub async fn encode_image_file(path: &Path) -> Result<ImageData, EnhancementError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| EnhancementError::Image {
            path: path.to_path_buf(),
            source: e,
        })?;

    let b64 = STANDARD.encode(&bytes);
    debug!("Encoded {} → {} bytes base64", path.display(), b64.len());

    Ok(ImageData::new(b64, mime_for(path)).with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_by_extension() {
        assert_eq!(mime_for(Path::new("a/b.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("fig.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("fig.webp")), "image/webp");
    }

    #[test]
    fn captionable_filter() {
        assert!(is_captionable(Path::new("img/x.jpg")));
        assert!(!is_captionable(Path::new("img/x.emf")));
        assert!(!is_captionable(Path::new("img/noext")));
    }

    #[tokio::test]
    async fn encode_file_roundtrips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slide01.png");
        std::fs::write(&path, b"\x89PNG fake").unwrap();

        let data = encode_image_file(&path).await.expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, b"\x89PNG fake");
    }

    #[tokio::test]
    async fn missing_file_is_image_error() {
        let err = encode_image_file(Path::new("/nonexistent/x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, EnhancementError::Image { .. }));
    }
}

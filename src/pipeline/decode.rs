//! Image payload decoding: base64 txt2img reply → validated bytes → PNG file.
//!
//! The WebUI returns images as base64 strings, sometimes as a full
//! `data:image/png;base64,` URI. [`decode_image_payload`] only unwraps the
//! base64 and sniffs the format. The full decode is [`decode_image`], which
//! the worker runs inside the retried image step for every synthesizer, so a
//! truncated or corrupt payload is retried like any other bad reply.
//! Persisting re-encodes the decoded image, so the file on disk is always a
//! real PNG whatever the backend sent.

use crate::error::ServiceError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::path::PathBuf;
use tracing::debug;

const SERVICE: &str = "txt2img";

/// Decode one base64 image payload and check it is a known image format.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, ServiceError> {
    let b64 = match payload.split_once(";base64,") {
        Some((head, data)) if head.starts_with("data:") => data,
        _ => payload,
    };
    let bytes = STANDARD
        .decode(b64.trim())
        .map_err(|e| ServiceError::MalformedResponse {
            service: SERVICE,
            detail: format!("invalid base64 image: {e}"),
        })?;
    if bytes.is_empty() {
        return Err(ServiceError::EmptyResponse { service: SERVICE });
    }
    image::guess_format(&bytes).map_err(|e| ServiceError::MalformedResponse {
        service: SERVICE,
        detail: format!("payload is not an image: {e}"),
    })?;
    debug!("Decoded image payload → {} bytes", bytes.len());
    Ok(bytes)
}

/// Decode `bytes` completely, on the blocking pool.
pub async fn decode_image(bytes: Vec<u8>) -> Result<DynamicImage, ServiceError> {
    if bytes.is_empty() {
        return Err(ServiceError::EmptyResponse { service: SERVICE });
    }
    tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|e| ServiceError::Upstream {
            service: SERVICE,
            detail: format!("image decoder task failed: {e}"),
        })?
        .map_err(|e| ServiceError::MalformedResponse {
            service: SERVICE,
            detail: format!("payload is not a complete image: {e}"),
        })
}

/// Write a decoded image to `path` as PNG, on the blocking pool.
pub async fn save_png(image: DynamicImage, path: PathBuf) -> Result<(), image::ImageError> {
    tokio::task::spawn_blocking(move || {
        image.save_with_format(&path, ImageFormat::Png)?;
        debug!("Saved {}x{} image → {}", image.width(), image.height(), path.display());
        Ok(())
    })
    .await
    .map_err(|e| image::ImageError::IoError(std::io::Error::other(e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("encode should succeed");
        buf
    }

    #[test]
    fn decodes_plain_and_data_uri_payloads() {
        let png = png_bytes(4, 4);
        let b64 = STANDARD.encode(&png);
        assert_eq!(decode_image_payload(&b64).unwrap(), png);
        let uri = format!("data:image/png;base64,{b64}");
        assert_eq!(decode_image_payload(&uri).unwrap(), png);
    }

    #[test]
    fn rejects_invalid_base64() {
        let err = decode_image_payload("not base64!!").unwrap_err();
        assert!(matches!(err, ServiceError::MalformedResponse { .. }));
    }

    #[test]
    fn rejects_non_image_bytes() {
        let b64 = STANDARD.encode(b"hello world, not an image");
        let err = decode_image_payload(&b64).unwrap_err();
        assert!(matches!(err, ServiceError::MalformedResponse { .. }));
    }

    #[test]
    fn empty_payload_is_empty_response() {
        let err = decode_image_payload("").unwrap_err();
        assert_eq!(err, ServiceError::EmptyResponse { service: "txt2img" });
    }

    #[tokio::test]
    async fn truncated_payload_passes_sniffing_but_not_decoding() {
        let png = png_bytes(16, 16);
        let truncated = png[..png.len() / 2].to_vec();
        assert!(decode_image_payload(&STANDARD.encode(&truncated)).is_ok());

        let err = decode_image(truncated).await.unwrap_err();
        assert!(matches!(err, ServiceError::MalformedResponse { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn decode_image_rejects_empty_and_garbage() {
        assert_eq!(
            decode_image(Vec::new()).await.unwrap_err(),
            ServiceError::EmptyResponse { service: "txt2img" }
        );
        assert!(matches!(
            decode_image(b"garbage".to_vec()).await.unwrap_err(),
            ServiceError::MalformedResponse { .. }
        ));
    }

    #[tokio::test]
    async fn save_png_writes_a_png_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let image = decode_image(png_bytes(8, 6)).await.unwrap();
        save_png(image, path.clone()).await.unwrap();
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (8, 6));
    }

    #[tokio::test]
    async fn save_png_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("bad.png");
        let image = decode_image(png_bytes(2, 2)).await.unwrap();
        assert!(save_png(image, path.clone()).await.is_err());
        assert!(!path.exists());
    }
}

//! Media encoding
//!
//! Turns uploaded files into text payloads (`data:<mime>;base64,...`).
//! Images are downscaled to a maximum width and re-encoded as JPEG;
//! other media pass through with a size ceiling check.

use crate::config::EncoderConfig;
use crate::error::{Error, Result};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::GenericImageView;
use std::path::Path;
use tracing::{debug, info};

/// Category of uploaded media
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Raster image, re-encoded on upload
    Image,
    /// Video or other binary, passed through
    Video,
}

impl MediaKind {
    /// Classify a MIME type
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            MediaKind::Image
        } else {
            MediaKind::Video
        }
    }
}

/// MIME type for a file path, by extension
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "ogv" => "video/ogg",
        _ => "application/octet-stream",
    }
}

/// Decoded size of a base64 payload of `payload_len` characters (approximate)
pub fn estimated_decoded_size(payload_len: usize) -> u64 {
    (payload_len as u64).saturating_mul(3) / 4
}

/// Wrap raw bytes as a base64 data URI
pub fn to_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}

/// Target dimensions for an image: width capped at `max_width`, never upscaled
pub fn scaled_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width {
        return (width, height);
    }

    let scaled_height = ((height as f64) * (max_width as f64) / (width as f64)).round() as u32;
    (max_width, scaled_height.max(1))
}

/// Converts uploaded bytes into storable text payloads
#[derive(Debug, Clone)]
pub struct MediaEncoder {
    config: EncoderConfig,
}

impl MediaEncoder {
    /// Create an encoder with the given configuration
    pub fn new(config: EncoderConfig) -> Self {
        MediaEncoder { config }
    }

    /// Encoding settings in use
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Reject payloads whose decoded size would exceed the non-image ceiling
    pub fn check_size(&self, payload_len: usize) -> Result<()> {
        let estimated = estimated_decoded_size(payload_len);
        if estimated > self.config.max_video_bytes {
            return Err(Error::SizeExceeded {
                estimated,
                limit: self.config.max_video_bytes,
            });
        }
        Ok(())
    }

    /// Encode raw file bytes into a text payload
    pub async fn encode(&self, bytes: Vec<u8>, kind: MediaKind, mime: &str) -> Result<String> {
        match kind {
            MediaKind::Image => {
                let max_width = self.config.max_image_width;
                let quality = self.config.jpeg_quality;

                tokio::task::spawn_blocking(move || reencode_image(&bytes, max_width, quality))
                    .await
                    .map_err(|e| Error::Internal(format!("image task failed: {}", e)))?
            }
            MediaKind::Video => {
                let payload = to_data_uri(mime, &bytes);
                self.check_size(payload.len())?;
                debug!("Encoded {} bytes of {} as {} chars", bytes.len(), mime, payload.len());
                Ok(payload)
            }
        }
    }

    /// Read a file and encode it, classifying by extension when `kind` is None
    pub async fn encode_file(&self, path: &Path, kind: Option<MediaKind>) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::ReadError(format!("{}: {}", path.display(), e)))?;

        let mime = mime_for_path(path);
        let kind = kind.unwrap_or_else(|| MediaKind::from_mime(mime));
        info!("Encoding {} ({} bytes, {:?})", path.display(), bytes.len(), kind);

        self.encode(bytes, kind, mime).await
    }
}

impl Default for MediaEncoder {
    fn default() -> Self {
        Self::new(EncoderConfig::default())
    }
}

/// Decode, downscale and re-encode an image as a JPEG data URI
fn reencode_image(bytes: &[u8], max_width: u32, quality: u8) -> Result<String> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| Error::ReadError(format!("cannot decode image: {}", e)))?;
    let (width, height) = img.dimensions();
    let (new_width, new_height) = scaled_dimensions(width, height, max_width);

    let img = if (new_width, new_height) == (width, height) {
        img
    } else {
        debug!("Downscaling image {}x{} -> {}x{}", width, height, new_width, new_height);
        img.resize_exact(new_width, new_height, FilterType::Lanczos3)
    };

    // JPEG carries no alpha channel
    let rgb = img.to_rgb8();
    let mut output = Vec::new();
    JpegEncoder::new_with_quality(&mut output, quality).encode_image(&rgb)?;

    Ok(to_data_uri("image/jpeg", &output))
}

//! Image encoding and decoding at the crate's edges.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid base64 data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Image data is empty")]
    Empty,

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decode a base64 image, accepting `data:` URLs and wrapped or unpadded input.
pub fn decode_base64_image(data: &str) -> Result<DynamicImage, CodecError> {
    let payload = match data.trim().strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map_or(rest, |(_, b64)| b64),
        None => data.trim(),
    };

    let mut cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(CodecError::Empty);
    }
    while cleaned.len() % 4 != 0 {
        cleaned.push('=');
    }

    let bytes = STANDARD.decode(cleaned.as_bytes())?;
    decode_image_bytes(&bytes)
}

pub fn decode_image_bytes(bytes: &[u8]) -> Result<DynamicImage, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    image::load_from_memory(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, CodecError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

pub fn encode_png_base64(image: &DynamicImage) -> Result<String, CodecError> {
    Ok(STANDARD.encode(encode_png(image)?))
}

pub fn load_image(path: &Path) -> Result<DynamicImage, CodecError> {
    let bytes = std::fs::read(path)?;
    decode_image_bytes(&bytes)
}

/// Write `image` to `path`, picking the format from the extension (PNG if unknown).
pub fn save_image(path: &Path, image: &DynamicImage) -> Result<(), CodecError> {
    let format = ImageFormat::from_path(path).unwrap_or(ImageFormat::Png);
    let image = match format {
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image.clone(),
    };
    image
        .save_with_format(path, format)
        .map_err(|e| CodecError::Encode(e.to_string()))
}

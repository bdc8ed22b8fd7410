//! Image ingestion for `read_files` and image turns

use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat};

use crate::llm::ImageData;

use super::ToolError;

/// Images are shrunk to fit inside this square, keeping aspect ratio
pub const MAX_IMAGE_DIMENSION: u32 = 1024;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Whether the path looks like an image we can decode
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Decode, downscale to fit 1024×1024, flatten to RGB and re-encode as JPEG
pub fn encode_image(bytes: &[u8]) -> Result<ImageData, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let img = if img.width() > MAX_IMAGE_DIMENSION || img.height() > MAX_IMAGE_DIMENSION {
        img.thumbnail(MAX_IMAGE_DIMENSION, MAX_IMAGE_DIMENSION)
    } else {
        img
    };
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(ImageData {
        media_type: "image/jpeg".to_string(),
        data: STANDARD.encode(out.into_inner()),
    })
}

/// Read and encode an image file off the async runtime's worker threads
pub async fn load_image(path: &Path) -> Result<ImageData, ToolError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ToolError::io(path.display(), e))?;
    let display = path.display().to_string();
    tokio::task::spawn_blocking(move || encode_image(&bytes))
        .await
        .map_err(|e| ToolError::Image {
            path: display.clone(),
            message: e.to_string(),
        })?
        .map_err(|e| ToolError::Image {
            path: display,
            message: e.to_string(),
        })
}

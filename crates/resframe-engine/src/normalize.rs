use std::io::Cursor;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crate::model::Part;

/// Longest edge, in pixels, the model accepts without downscaling.
pub const MAX_IMAGE_DIMENSION: u32 = 4096;

pub const ACCEPTED_UPLOAD_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Canonical form for transmission: 8-bit RGB, longer edge at most
/// `MAX_IMAGE_DIMENSION`. Compliant images come back unchanged.
pub fn prepare_image(image: &DynamicImage) -> DynamicImage {
    let rgb = match image {
        DynamicImage::ImageRgb8(_) => image.clone(),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    };
    let (width, height) = (rgb.width(), rgb.height());
    let (target_width, target_height) = bounded_dimensions(width, height);
    if (target_width, target_height) == (width, height) {
        return rgb;
    }
    rgb.resize_exact(target_width, target_height, FilterType::Lanczos3)
}

pub fn normalize_images(images: &[DynamicImage]) -> Vec<DynamicImage> {
    images.iter().map(prepare_image).collect()
}

/// Proportional dimensions with the longer edge clamped to the maximum.
/// The shorter edge is truncated, never below one pixel.
pub fn bounded_dimensions(width: u32, height: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= MAX_IMAGE_DIMENSION {
        return (width, height);
    }
    let scale = |dim: u32| -> u32 {
        let scaled = u64::from(dim) * u64::from(MAX_IMAGE_DIMENSION) / u64::from(longest);
        (scaled as u32).max(1)
    };
    (scale(width), scale(height))
}

pub fn is_accepted_upload(path: &Path) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|ext| {
            let lowered = ext.to_ascii_lowercase();
            ACCEPTED_UPLOAD_EXTENSIONS.contains(&lowered.as_str())
        })
        .unwrap_or(false)
}

/// Decodes an uploaded plan image. Only PNG and JPEG uploads are accepted.
pub fn load_upload(path: &Path) -> Result<DynamicImage> {
    if !is_accepted_upload(path) {
        bail!(
            "unsupported upload {} (accepted: {})",
            path.display(),
            ACCEPTED_UPLOAD_EXTENSIONS.join(", ")
        );
    }
    image::open(path).with_context(|| format!("failed to decode {}", path.display()))
}

pub fn load_uploads(paths: &[impl AsRef<Path>]) -> Result<Vec<DynamicImage>> {
    paths.iter().map(|path| load_upload(path.as_ref())).collect()
}

/// PNG-encodes an image into an inline data part.
pub fn encode_inline_part(image: &DynamicImage) -> Result<Part> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .context("PNG encode failed")?;
    Ok(Part::InlineData {
        mime_type: "image/png".to_string(),
        data: BASE64.encode(bytes.into_inner()),
    })
}

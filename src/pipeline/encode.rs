//! Image normalisation: uploaded bytes → bounded JPEG wrapped in `ImageData`.
//!
//! Phone photos of menus are routinely 4000 px and several megabytes. The
//! vision model reads text just as well at 2000 px on the long edge, so the
//! image is downscaled, flattened to RGB (JPEG has no alpha) and re-encoded
//! at quality 85 before it is base64-embedded in the request body.

use crate::error::InvalidImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ImageFormat;
use tracing::debug;

/// The normalised image plus what was done to it.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: ImageData,
    pub original_dimensions: (u32, u32),
    pub dimensions: (u32, u32),
    pub jpeg_bytes: usize,
}

/// Decode, bound and re-encode an already-validated upload.
///
/// CPU-bound; callers on the async runtime run it via `spawn_blocking`.
pub fn normalize_image(
    bytes: &[u8],
    format: ImageFormat,
    max_dimension: u32,
    jpeg_quality: u8,
) -> Result<NormalizedImage, InvalidImage> {
    let img = image::load_from_memory_with_format(bytes, format).map_err(|e| {
        InvalidImage::Undecodable {
            detail: e.to_string(),
        }
    })?;
    let original = (img.width(), img.height());

    let img = if original.0.max(original.1) > max_dimension {
        let resized = img.resize(max_dimension, max_dimension, FilterType::Lanczos3);
        debug!(
            "Image resized: {}x{} → {}x{}",
            original.0,
            original.1,
            resized.width(),
            resized.height()
        );
        resized
    } else {
        img
    };

    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, jpeg_quality);
        encoder
            .encode_image(&rgb)
            .map_err(|e| InvalidImage::Undecodable {
                detail: format!("JPEG re-encode failed: {e}"),
            })?;
    }
    debug!("Image compressed: {} bytes → {} bytes", bytes.len(), buf.len());

    let b64 = STANDARD.encode(&buf);
    Ok(NormalizedImage {
        image: ImageData::new(b64, "image/jpeg").with_detail("high"),
        original_dimensions: original,
        dimensions: (rgb.width(), rgb.height()),
        jpeg_bytes: buf.len(),
    })
}

/// `data:` URL for an encoded image, as OpenAI-style APIs expect it.
pub fn data_url(image: &ImageData) -> String {
    format!("data:{};base64,{}", image.mime_type, image.data)
}

//! Upload validation: the gate in front of every paid call.
//!
//! Nothing here decodes pixels. The checks are cheap and ordered from
//! cheapest to dearest (emptiness, byte size, declared content type, magic
//! bytes), so a bad upload is refused before a stream is opened and before
//! any upstream service sees it.

use crate::error::InvalidImage;
use image::ImageFormat;
use tracing::debug;

/// Formats the vision request accepts.
pub const ACCEPTED_FORMATS: [ImageFormat; 3] =
    [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

const ACCEPTED_CONTENT_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/jpg",
    "image/pjpeg",
    "image/png",
    "image/webp",
];

/// A single uploaded file, as received.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    /// Declared MIME type from the upload, if any.
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

impl UploadedImage {
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type,
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Best-effort content type from a file extension.
    pub fn content_type_for_path(path: &std::path::Path) -> Option<String> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        ImageFormat::from_extension(&ext).map(|f| f.to_mime_type().to_string())
    }
}

/// Validate an upload and return its sniffed format.
pub fn validate_upload(
    upload: &UploadedImage,
    max_bytes: usize,
) -> Result<ImageFormat, InvalidImage> {
    if upload.bytes.is_empty() {
        return Err(InvalidImage::Empty);
    }
    if upload.bytes.len() > max_bytes {
        return Err(InvalidImage::TooLarge {
            size: upload.bytes.len(),
            limit: max_bytes,
        });
    }

    let declared = upload.content_type.as_deref().map(normalise_content_type);
    // An absent type is left to the magic-byte sniff; a present one must
    // already name an accepted image type.
    if let Some(ref ct) = declared {
        if !ACCEPTED_CONTENT_TYPES.contains(&ct.as_str()) {
            return Err(InvalidImage::UnsupportedFormat {
                declared: ct.clone(),
            });
        }
    }

    let sniffed = image::guess_format(&upload.bytes).ok();
    match sniffed {
        Some(fmt) if ACCEPTED_FORMATS.contains(&fmt) => {
            debug!(
                "Upload accepted: {} bytes, {:?} (declared {:?})",
                upload.bytes.len(),
                fmt,
                declared
            );
            Ok(fmt)
        }
        other => Err(InvalidImage::UnsupportedFormat {
            declared: declared
                .or_else(|| other.map(|f| f.to_mime_type().to_string()))
                .unwrap_or_else(|| "unknown".to_string()),
        }),
    }
}

/// `"Image/JPEG; charset=binary"` → `"image/jpeg"`.
fn normalise_content_type(ct: &str) -> String {
    ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

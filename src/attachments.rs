// src/attachments.rs

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::AttachmentError;

pub const MAX_IMAGES: usize = 5;
pub const MAX_TOTAL_MB: usize = 10;
const MAX_TOTAL_BYTES: u64 = (MAX_TOTAL_MB as u64) * 1024 * 1024;

/// Infers whether a file is an image from its extension.
pub fn is_image(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .is_some_and(|mime| mime.type_() == mime_guess::mime::IMAGE)
}

/// Reads the image files among `paths` and returns them base64-encoded,
/// ready to attach to a message. Non-image files are ignored; the limits
/// apply to the images that remain.
pub async fn prepare_images(paths: &[PathBuf], supports_vision: bool) -> Result<Vec<String>, AttachmentError> {
    if !supports_vision {
        return Err(AttachmentError::ModelLacksVision);
    }

    let images: Vec<&PathBuf> = paths.iter().filter(|p| is_image(p)).collect();
    if images.is_empty() {
        return Err(AttachmentError::NoImages);
    }
    if images.len() > MAX_IMAGES {
        return Err(AttachmentError::TooMany { max: MAX_IMAGES });
    }

    let mut total = 0u64;
    for path in &images {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|source| io_error(path, source))?;
        total += meta.len();
    }
    if total > MAX_TOTAL_BYTES {
        return Err(AttachmentError::TooLarge {
            max_mb: MAX_TOTAL_MB,
        });
    }

    let mut encoded = Vec::with_capacity(images.len());
    for path in images {
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| io_error(path, source))?;
        encoded.push(STANDARD.encode(&data));
    }

    tracing::debug!(count = encoded.len(), bytes = total, "Prepared image attachments");
    Ok(encoded)
}

fn io_error(path: &Path, source: std::io::Error) -> AttachmentError {
    AttachmentError::Io {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
        source,
    }
}

//! Input validation, applied before any external call.

use sketchforge_core::DomainError;

/// Base64 payload ceiling: ~50 MB of decoded image data.
pub const MAX_IMAGE_BASE64_BYTES: usize = 67 * 1024 * 1024;

/// Validate a submitted image payload (raw base64, no data-URL prefix).
pub fn validate_image_data(image_data: &str) -> Result<(), DomainError> {
    if image_data.is_empty() {
        return Err(DomainError::validation("image data is required"));
    }

    if image_data.len() > MAX_IMAGE_BASE64_BYTES {
        return Err(DomainError::validation(
            "image too large, maximum size is 50MB",
        ));
    }

    let mut padding = 0usize;
    for c in image_data.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '+' | '/' if padding == 0 => {}
            '=' if padding < 2 => padding += 1,
            c if c.is_whitespace() => {}
            _ => {
                return Err(DomainError::validation("invalid image data format"));
            }
        }
    }

    Ok(())
}

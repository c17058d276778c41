//! Image helpers for image blocks
//!
//! Images are stored inline in entries as base64 data URIs. Resampling
//! happens in the host before bytes reach `image_block`; this module only
//! checks limits, computes target dimensions and builds the block.

use crate::config::{
    IMAGE_MAX_HEIGHT, IMAGE_MAX_SIZE_KB, IMAGE_MAX_WIDTH, IMAGE_QUALITY, VALID_IMAGE_TYPES,
};
use crate::database::Block;
use crate::error::{AppError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Webp,
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Webp => "image/webp",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageOptions {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: f32,
    pub format: ImageFormat,
    pub max_size_kb: u64,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            max_width: IMAGE_MAX_WIDTH,
            max_height: IMAGE_MAX_HEIGHT,
            quality: IMAGE_QUALITY,
            format: ImageFormat::Webp,
            max_size_kb: IMAGE_MAX_SIZE_KB,
        }
    }
}

/// Scale `width`x`height` down to fit the bounds, keeping aspect ratio.
/// Images already inside the bounds are left alone.
pub fn calculate_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let (mut w, mut h) = (width as f64, height as f64);

    if w > max_width as f64 {
        h = h * max_width as f64 / w;
        w = max_width as f64;
    }
    if h > max_height as f64 {
        w = w * max_height as f64 / h;
        h = max_height as f64;
    }

    (w.round() as u32, h.round() as u32)
}

pub fn is_supported_mime(mime: &str) -> bool {
    VALID_IMAGE_TYPES.contains(&mime)
}

/// Human readable size, e.g. `"0 Bytes"`, `"1.5 KB"`, `"2 MB"`
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let exponent = ((63 - bytes.leading_zeros()) / 10) as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);

    let formatted = format!("{:.2}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');

    format!("{} {}", trimmed, UNITS[exponent])
}

/// Build an image block from already-compressed bytes
pub fn image_block(
    bytes: &[u8],
    mime: &str,
    caption: Option<String>,
    opts: &ImageOptions,
) -> Result<Block> {
    if !is_supported_mime(mime) {
        return Err(AppError::Validation(format!(
            "Unsupported image type: {}",
            mime
        )));
    }

    let limit = opts.max_size_kb * 1024;
    if bytes.len() as u64 > limit {
        return Err(AppError::Validation(format!(
            "Image size ({}KB) exceeds limit of {}KB",
            (bytes.len() as f64 / 1024.0).round(),
            opts.max_size_kb
        )));
    }

    Ok(Block::Image {
        payload: format!("data:{};base64,{}", mime, STANDARD.encode(bytes)),
        caption,
    })
}

/// Split a base64 data URI into its mime type and decoded bytes
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let invalid = || AppError::Validation("Invalid image data URI".to_string());

    let rest = uri.strip_prefix("data:").ok_or_else(invalid)?;
    let (header, data) = rest.split_once(',').ok_or_else(invalid)?;
    let mime = header.strip_suffix(";base64").ok_or_else(invalid)?;

    let bytes = STANDARD
        .decode(data)
        .map_err(|e| AppError::Validation(format!("Invalid image data: {}", e)))?;

    Ok((mime.to_string(), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_dimensions() {
        assert_eq!(calculate_dimensions(800, 600, 1200, 1200), (800, 600));
        assert_eq!(calculate_dimensions(2400, 1200, 1200, 1200), (1200, 600));
        assert_eq!(calculate_dimensions(1000, 3000, 1200, 1200), (400, 1200));
        assert_eq!(calculate_dimensions(3000, 2000, 1200, 600), (900, 600));
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(500), "500 Bytes");
        assert_eq!(format_file_size(1024), "1 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5 MB");
    }

    #[test]
    fn test_image_block_round_trip() {
        let bytes = vec![0x89, 0x50, 0x4e, 0x47];
        let block = image_block(&bytes, "image/png", Some("diagram".to_string()), &ImageOptions::default())
            .unwrap();

        let Block::Image { payload, caption } = block else {
            panic!("expected image block");
        };
        assert_eq!(caption.as_deref(), Some("diagram"));
        assert!(payload.starts_with("data:image/png;base64,"));

        let (mime, decoded) = decode_data_uri(&payload).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn test_image_block_limits() {
        let opts = ImageOptions {
            max_size_kb: 1,
            ..ImageOptions::default()
        };

        assert!(image_block(&[0u8; 16], "image/bmp", None, &opts).is_err());
        assert!(image_block(&vec![0u8; 2048], "image/jpeg", None, &opts).is_err());
        assert!(image_block(&[0u8; 16], "image/gif", None, &opts).is_ok());
    }

    #[test]
    fn test_decode_rejects_plain_text() {
        assert!(decode_data_uri("hello").is_err());
        assert!(decode_data_uri("data:image/png,abc").is_err());
    }
}

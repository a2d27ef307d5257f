//! Turning raw bytes into the object the memory tier holds.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use image::{DynamicImage, ImageFormat};

/// Decode raw bytes into a cacheable object.
///
/// Decoding runs on the blocking pool, so implementations may be CPU-heavy.
/// Failure means the bytes are unusable: a network response that fails to
/// decode is never cached, and a disk entry that fails to decode is skipped.
pub trait Decoder: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Output>;
}

/// A decoded cover image.
#[derive(Debug, Clone)]
pub struct Cover {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub image: DynamicImage,
}

/// Decodes PNG, JPEG, GIF, WebP and BMP covers, sniffing the format from the
/// bytes rather than trusting the URI.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoverDecoder;

impl Decoder for CoverDecoder {
    type Output = Cover;

    fn decode(&self, bytes: &[u8]) -> Result<Cover> {
        let format = image::guess_format(bytes).or_raise(|| ErrorKind::Decode)?;
        let image = image::load_from_memory_with_format(bytes, format).or_raise(|| ErrorKind::Decode)?;
        Ok(Cover { format, width: image.width(), height: image.height(), image })
    }
}

/// Accepts any bytes as-is. For callers that only want the cached bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl Decoder for RawDecoder {
    type Output = Vec<u8>;

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// Encode a solid-colour PNG, for tests that need real image bytes.
#[cfg(any(test, feature = "mock"))]
pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 40, 255]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    match image.write_to(&mut bytes, ImageFormat::Png) {
        Ok(()) => bytes.into_inner(),
        Err(err) => panic!("sample_png: failed to encode: {err}"),
    }
}

//! Screenshot capture: the raster type shared by every stage of a session and
//! the `Screenshotter` seam the controller captures through.

#[cfg(feature = "cdp")]
pub mod cdp;

use std::fmt;
use std::io::Cursor;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, Viewport};

/// A captured PNG together with its pixel dimensions
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    pub png_data: Vec<u8>,
}

impl Screenshot {
    /// Wrap PNG bytes, reading the dimensions from the image header.
    pub fn from_png(png_data: Vec<u8>) -> Result<Self> {
        let (width, height) = image::ImageReader::new(Cursor::new(&png_data))
            .with_guessed_format()
            .map_err(|e| Error::ImageDecode(format!("Unrecognised image data: {}", e)))?
            .into_dimensions()
            .map_err(|e| Error::ImageDecode(format!("Failed to read dimensions: {}", e)))?;
        Ok(Self {
            width,
            height,
            png_data,
        })
    }

    /// Encode an in-memory RGBA buffer as PNG.
    pub fn from_rgba(img: &image::RgbaImage) -> Result<Self> {
        let mut png_data = Vec::new();
        img.write_to(&mut Cursor::new(&mut png_data), image::ImageFormat::Png)
            .map_err(|e| Error::ImageDecode(format!("PNG encoding failed: {}", e)))?;
        Ok(Self {
            width: img.width(),
            height: img.height(),
            png_data,
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|e| Error::ImageDecode(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_png(data)
    }

    /// Decode into an RGBA8 pixel buffer.
    pub fn to_rgba(&self) -> Result<image::RgbaImage> {
        image::load_from_memory(&self.png_data)
            .map(|img| img.to_rgba8())
            .map_err(|e| Error::ImageDecode(e.to_string()))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// What to point the capturer at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// A live page
    Url(String),
    /// A generated HTML document
    Markup(String),
}

impl CaptureSource {
    pub fn describe(&self) -> String {
        match self {
            CaptureSource::Url(url) => url.clone(),
            CaptureSource::Markup(html) => format!("<inline markup, {} bytes>", html.len()),
        }
    }
}

/// Category of a capture failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureErrorKind {
    Unreachable,
    Timeout,
    ElementNotFound,
    Other,
}

impl fmt::Display for CaptureErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CaptureErrorKind::Unreachable => "unreachable",
            CaptureErrorKind::Timeout => "timeout",
            CaptureErrorKind::ElementNotFound => "element-not-found",
            CaptureErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Produces raster screenshots of URLs or markup.
///
/// Implementations own their timeouts and must release any browser handle
/// before returning, on success and failure alike.
#[async_trait]
pub trait Screenshotter: Send + Sync {
    async fn capture(
        &self,
        source: &CaptureSource,
        viewport: Viewport,
        wait_ms: u64,
    ) -> Result<Screenshot>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screenshot_reads_dimensions_from_png() {
        let img = image::RgbaImage::from_pixel(12, 7, image::Rgba([10, 20, 30, 255]));
        let shot = Screenshot::from_rgba(&img).unwrap();
        assert_eq!(&shot.png_data[0..8], b"\x89PNG\r\n\x1a\n");

        let reread = Screenshot::from_png(shot.png_data.clone()).unwrap();
        assert_eq!(reread.dimensions(), (12, 7));
        assert_eq!(reread.to_rgba().unwrap().get_pixel(3, 3).0, [10, 20, 30, 255]);
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let err = Screenshot::from_png(b"not an image".to_vec()).unwrap_err();
        assert!(matches!(err, Error::ImageDecode(_)));
    }

    #[test]
    fn capture_kind_display_is_kebab_case() {
        assert_eq!(CaptureErrorKind::ElementNotFound.to_string(), "element-not-found");
    }
}

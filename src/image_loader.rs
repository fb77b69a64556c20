//! Image decoding for initial texture content.

use std::path::Path;

use image::DynamicImage;

use crate::error::{Error, Result};

/// Tightly packed 8-bit pixels, rows top to bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

impl DecodedImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("decoding {}", path.display());
        Self::from_dynamic(image::open(path)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_dynamic(image::load_from_memory(bytes)?)
    }

    /// Accepts 8-bit gray, gray+alpha, RGB and RGBA. RGB is widened to RGBA since
    /// there is no three-channel texture format.
    pub fn from_dynamic(image: DynamicImage) -> Result<Self> {
        let (width, height) = (image.width(), image.height());
        let (pixels, channels) = match image {
            DynamicImage::ImageLuma8(buf) => (buf.into_raw(), 1),
            DynamicImage::ImageLumaA8(buf) => (buf.into_raw(), 2),
            DynamicImage::ImageRgb8(buf) => (DynamicImage::ImageRgb8(buf).to_rgba8().into_raw(), 4),
            DynamicImage::ImageRgba8(buf) => (buf.into_raw(), 4),
            other => {
                return Err(Error::UnsupportedPixelLayout(format!("{:?}", other.color())));
            }
        };
        Ok(Self {
            pixels,
            width,
            height,
            channels,
        })
    }

    /// Copies one channel out of every pixel.
    pub fn extract_channel(&self, channel: u8) -> Result<Vec<u8>> {
        if channel >= self.channels {
            return Err(Error::UnsupportedPixelLayout(format!(
                "channel {channel} of a {}-channel image",
                self.channels
            )));
        }
        Ok(self
            .pixels
            .chunks_exact(self.channels as usize)
            .map(|px| px[channel as usize])
            .collect())
    }
}

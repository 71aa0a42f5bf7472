use super::{DecodedImage, EncodedImage, Image};
use crate::error::{PipeDataError, Result};
use bytes::Bytes;
use image::{DynamicImage, ImageBuffer};

/// Pixel layouts stored as raw samples because no compressed encoding
/// accepts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawLayout {
    Rgb32F,
    Rgba32F,
}

impl RawLayout {
    pub fn name(&self) -> &'static str {
        match self {
            RawLayout::Rgb32F => "RGB32F",
            RawLayout::Rgba32F => "RGBA32F",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "RGB32F" => Ok(RawLayout::Rgb32F),
            "RGBA32F" => Ok(RawLayout::Rgba32F),
            _ => Err(PipeDataError::UnsupportedType(format!(
                "unknown raw pixel layout \"{}\"",
                name
            ))),
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            RawLayout::Rgb32F => 3,
            RawLayout::Rgba32F => 4,
        }
    }
}

/// Float pixels as little-endian `f32` samples, row-major.
#[derive(Debug, Clone)]
pub struct RawImage {
    layout: RawLayout,
    width: u32,
    height: u32,
    samples: Bytes,
}

impl RawImage {
    pub fn new(layout: RawLayout, width: u32, height: u32, samples: Bytes) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(layout.channels()))
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| {
                PipeDataError::Serialization(format!(
                    "{} image of {}x{} is too large",
                    layout.name(),
                    width,
                    height
                ))
            })?;
        if samples.len() != expected {
            return Err(PipeDataError::Serialization(format!(
                "{} image of {}x{} needs {} bytes, got {}",
                layout.name(),
                width,
                height,
                expected,
                samples.len()
            )));
        }
        Ok(Self {
            layout,
            width,
            height,
            samples,
        })
    }

    /// The raw form of `image`, or `None` when a compressed encoding exists.
    pub fn from_pixels(image: &DynamicImage) -> Option<Self> {
        let (layout, (width, height), samples): (_, _, &[f32]) = match image {
            DynamicImage::ImageRgb32F(buf) => (RawLayout::Rgb32F, buf.dimensions(), buf.as_raw()),
            DynamicImage::ImageRgba32F(buf) => (RawLayout::Rgba32F, buf.dimensions(), buf.as_raw()),
            _ => return None,
        };
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Some(Self {
            layout,
            width,
            height,
            samples: Bytes::from(bytes),
        })
    }

    pub fn layout(&self) -> RawLayout {
        self.layout
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn samples(&self) -> &Bytes {
        &self.samples
    }

    pub fn to_decoded(&self) -> Result<DecodedImage> {
        let floats: Vec<f32> = self
            .samples
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let image = match self.layout {
            RawLayout::Rgb32F => ImageBuffer::from_raw(self.width, self.height, floats)
                .map(DynamicImage::ImageRgb32F),
            RawLayout::Rgba32F => ImageBuffer::from_raw(self.width, self.height, floats)
                .map(DynamicImage::ImageRgba32F),
        };
        image.map(DecodedImage::new).ok_or_else(|| {
            PipeDataError::Serialization(format!(
                "{} samples do not fill a {}x{} image",
                self.layout.name(),
                self.width,
                self.height
            ))
        })
    }
}

/// What the codecs write for an image.
#[derive(Debug, Clone)]
pub enum ImagePayload {
    Encoded(EncodedImage),
    Raw(RawImage),
}

impl ImagePayload {
    pub fn of(image: &Image) -> Result<Self> {
        if let Some(encoded) = image.downcast_ref::<EncodedImage>() {
            return Ok(ImagePayload::Encoded(encoded.clone()));
        }
        match RawImage::from_pixels(&*image.decode()?) {
            Some(raw) => Ok(ImagePayload::Raw(raw)),
            None => image.encoded().map(ImagePayload::Encoded),
        }
    }

    pub fn into_image(self) -> Result<Image> {
        match self {
            ImagePayload::Encoded(encoded) => Ok(Image::new(encoded)),
            ImagePayload::Raw(raw) => raw.to_decoded().map(Image::new),
        }
    }
}

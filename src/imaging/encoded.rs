use super::ImageRepr;
use crate::error::{PipeDataError, Result};
use crate::format::{Format, FormatTag};
use bytes::Bytes;
use image::codecs::jpeg::JpegDecoder;
use image::codecs::png::PngDecoder;
use image::{DynamicImage, ImageDecoder, ImageFormat};
use std::any::Any;
use std::io::Cursor;
use std::sync::Arc;

/// Compression format of an [`EncodedImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageEncoding {
    Png,
    Jpeg,
}

impl ImageEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            ImageEncoding::Png => "PNG",
            ImageEncoding::Jpeg => "JPEG",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "PNG" => Ok(ImageEncoding::Png),
            "JPEG" | "JPG" => Ok(ImageEncoding::Jpeg),
            _ => Err(PipeDataError::UnsupportedType(format!(
                "unknown image format \"{}\"",
                name
            ))),
        }
    }

    fn image_format(&self) -> ImageFormat {
        match self {
            ImageEncoding::Png => ImageFormat::Png,
            ImageEncoding::Jpeg => ImageFormat::Jpeg,
        }
    }
}

/// Compressed image bytes. Dimensions come from the header, so building
/// one never decodes pixels.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    encoding: ImageEncoding,
    bytes: Bytes,
    width: u32,
    height: u32,
    channels: u8,
}

impl EncodedImage {
    pub fn new(encoding: ImageEncoding, bytes: Bytes) -> Result<Self> {
        let cursor = Cursor::new(bytes.as_ref());
        let ((width, height), color) = match encoding {
            ImageEncoding::Png => {
                let decoder = PngDecoder::new(cursor)?;
                (decoder.dimensions(), decoder.color_type())
            }
            ImageEncoding::Jpeg => {
                let decoder = JpegDecoder::new(cursor)?;
                (decoder.dimensions(), decoder.color_type())
            }
        };
        Ok(Self {
            encoding,
            width,
            height,
            channels: color.channel_count(),
            bytes,
        })
    }

    pub fn png(bytes: impl Into<Bytes>) -> Result<Self> {
        Self::new(ImageEncoding::Png, bytes.into())
    }

    pub fn jpeg(bytes: impl Into<Bytes>) -> Result<Self> {
        Self::new(ImageEncoding::Jpeg, bytes.into())
    }

    /// Compress decoded pixels.
    pub fn from_dynamic(image: &DynamicImage, encoding: ImageEncoding) -> Result<Self> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, encoding.image_format())?;
        Self::new(encoding, Bytes::from(out.into_inner()))
    }

    pub fn encoding(&self) -> ImageEncoding {
        self.encoding
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

impl FormatTag for EncodedImage {
    const NAME: &'static str = "EncodedImage";
}

impl ImageRepr for EncodedImage {
    fn format(&self) -> Format {
        Format::of::<EncodedImage>()
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn channels(&self) -> u8 {
        self.channels
    }

    fn decode(&self) -> Result<Arc<DynamicImage>> {
        let image = image::load_from_memory_with_format(&self.bytes, self.encoding.image_format())?;
        Ok(Arc::new(image))
    }

    fn encoded(&self) -> Result<EncodedImage> {
        Ok(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

//! Format-independent image handle.
//!
//! Mirrors the array handle: an [`Image`] owns one backing representation
//! (compressed bytes, decoded pixels, or the script-side view) and converts
//! through the shared [`FormatRegistry`].

mod decoded;
mod encoded;
mod raw;

pub use decoded::DecodedImage;
pub use encoded::{EncodedImage, ImageEncoding};
pub use raw::{ImagePayload, RawImage, RawLayout};

use crate::error::{PipeDataError, Result};
use crate::format::{ConverterRegistry, FnConverter, Format, FormatRegistry, FormatTag, Handle};
use image::DynamicImage;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A concrete backing representation for [`Image`].
pub trait ImageRepr: Any + Send + Sync + fmt::Debug {
    fn format(&self) -> Format;
    fn height(&self) -> u32;
    fn width(&self) -> u32;
    fn channels(&self) -> u8;
    /// Decoded pixels. Representations that already hold pixels share them.
    fn decode(&self) -> Result<Arc<DynamicImage>>;
    /// A compressed form of the image.
    fn encoded(&self) -> Result<EncodedImage>;
    fn as_any(&self) -> &dyn Any;
}

/// Handle over an image in one of several representations.
#[derive(Clone)]
pub struct Image {
    repr: Arc<dyn ImageRepr>,
}

impl Image {
    pub fn new<R: ImageRepr>(repr: R) -> Self {
        Self {
            repr: Arc::new(repr),
        }
    }

    pub fn format(&self) -> Format {
        self.repr.format()
    }

    pub fn height(&self) -> u32 {
        self.repr.height()
    }

    pub fn width(&self) -> u32 {
        self.repr.width()
    }

    pub fn channels(&self) -> u8 {
        self.repr.channels()
    }

    pub fn decode(&self) -> Result<Arc<DynamicImage>> {
        self.repr.decode()
    }

    pub fn encoded(&self) -> Result<EncodedImage> {
        self.repr.encoded()
    }

    pub fn downcast_ref<T: ImageRepr>(&self) -> Option<&T> {
        self.repr.as_any().downcast_ref::<T>()
    }

    /// The image in representation `T`, converting through `registry` when
    /// the handle holds something else.
    pub fn get_as<T: ImageRepr + FormatTag + Clone>(&self, registry: &FormatRegistry) -> Result<T> {
        if let Some(repr) = self.downcast_ref::<T>() {
            return Ok(repr.clone());
        }
        let converted = registry.images().convert(self, Format::of::<T>())?;
        converted.downcast_ref::<T>().cloned().ok_or_else(|| {
            PipeDataError::UnsupportedType(format!(
                "converter produced {} instead of {}",
                converted.format(),
                T::NAME
            ))
        })
    }

    pub fn convert_to(&self, to: Format, registry: &FormatRegistry) -> Result<Image> {
        registry.images().convert(self, to)
    }
}

impl Handle for Image {
    fn format(&self) -> Format {
        self.repr.format()
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.repr, &other.repr) {
            return true;
        }
        if self.width() != other.width()
            || self.height() != other.height()
            || self.channels() != other.channels()
        {
            return false;
        }
        match (self.decode(), other.decode()) {
            (Ok(a), Ok(b)) => a.color() == b.color() && a.as_bytes() == b.as_bytes(),
            _ => false,
        }
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("format", &self.format())
            .field("width", &self.width())
            .field("height", &self.height())
            .field("channels", &self.channels())
            .finish()
    }
}

impl From<DynamicImage> for Image {
    fn from(image: DynamicImage) -> Self {
        Image::new(DecodedImage::new(image))
    }
}

impl From<EncodedImage> for Image {
    fn from(image: EncodedImage) -> Self {
        Image::new(image)
    }
}

pub(crate) fn expect_repr<T: ImageRepr + FormatTag>(handle: &Image) -> Result<&T> {
    handle
        .downcast_ref::<T>()
        .ok_or_else(|| PipeDataError::ConversionCapability {
            from: handle.format().name().to_string(),
            to: T::NAME.to_string(),
        })
}

fn encoded_to_decoded(from: &Image) -> Result<Image> {
    let encoded = expect_repr::<EncodedImage>(from)?;
    Ok(Image::new(DecodedImage::from_shared(encoded.decode()?)))
}

fn decoded_to_encoded(from: &Image) -> Result<Image> {
    let decoded = expect_repr::<DecodedImage>(from)?;
    Ok(Image::new(EncodedImage::from_dynamic(
        decoded.image(),
        ImageEncoding::Png,
    )?))
}

fn any_to_decoded(from: &Image) -> Result<Image> {
    Ok(Image::new(DecodedImage::from_shared(from.decode()?)))
}

fn any_to_encoded(from: &Image) -> Result<Image> {
    Ok(Image::new(from.encoded()?))
}

/// Register the encoded and decoded converters.
pub fn register_defaults(registry: &mut ConverterRegistry<Image>) {
    registry
        .register(FnConverter::exact(
            "encoded-to-decoded",
            Format::of::<EncodedImage>(),
            Format::of::<DecodedImage>(),
            encoded_to_decoded,
        ))
        .register(FnConverter::exact(
            "decoded-to-png",
            Format::of::<DecodedImage>(),
            Format::of::<EncodedImage>(),
            decoded_to_encoded,
        ))
        .register(FnConverter::any_source(
            "decode-any",
            Format::of::<DecodedImage>(),
            any_to_decoded,
        ))
        .register(FnConverter::any_source(
            "encode-any",
            Format::of::<EncodedImage>(),
            any_to_encoded,
        ));
}

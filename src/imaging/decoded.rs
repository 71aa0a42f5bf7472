use super::{EncodedImage, ImageEncoding, ImageRepr};
use crate::error::Result;
use crate::format::{Format, FormatTag};
use image::{DynamicImage, GenericImageView};
use std::any::Any;
use std::sync::Arc;

/// Decoded pixels, shared between clones.
#[derive(Debug, Clone)]
pub struct DecodedImage(Arc<DynamicImage>);

impl DecodedImage {
    pub fn new(image: DynamicImage) -> Self {
        Self(Arc::new(image))
    }

    pub fn from_shared(image: Arc<DynamicImage>) -> Self {
        Self(image)
    }

    pub fn image(&self) -> &Arc<DynamicImage> {
        &self.0
    }
}

impl FormatTag for DecodedImage {
    const NAME: &'static str = "DecodedImage";
}

impl ImageRepr for DecodedImage {
    fn format(&self) -> Format {
        Format::of::<DecodedImage>()
    }

    fn height(&self) -> u32 {
        self.0.height()
    }

    fn width(&self) -> u32 {
        self.0.width()
    }

    fn channels(&self) -> u8 {
        self.0.color().channel_count()
    }

    fn decode(&self) -> Result<Arc<DynamicImage>> {
        Ok(Arc::clone(&self.0))
    }

    fn encoded(&self) -> Result<EncodedImage> {
        EncodedImage::from_dynamic(&self.0, ImageEncoding::Png)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

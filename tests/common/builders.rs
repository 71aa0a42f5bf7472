//! Test data builders for creating test objects

use image::{DynamicImage, Rgb, RgbImage};
use ndarray::{ArrayD, IxDyn};
use pipedata_rs::data::{BoundingBox, Data, List};
use pipedata_rs::imaging::{EncodedImage, ImageEncoding};
use pipedata_rs::{Image, NDArray};

/// Builder for a record holding one value of every kind
pub struct DataBuilder {
    data: Data,
}

impl DataBuilder {
    pub fn new() -> Self {
        Self { data: Data::new() }
    }

    /// One key per value kind, including edge values
    pub fn every_kind() -> Self {
        let mut nested = Data::new();
        nested.put_string("inner", "").unwrap();

        Self::new()
            .with("string", "hello")
            .with("empty_string", "")
            .with("long", i64::MIN)
            .with("double", f64::NEG_INFINITY)
            .with("boolean", false)
            .with("bytes", Vec::<u8>::new())
            .with("ndarray", float_array(&[2, 3]))
            .with("image", png_image(4, 3))
            .with(
                "bbox",
                BoundingBox::from_corners(0.1, 0.5, 0.2, 0.6, Some("dog".into()), Some(0.75)),
            )
            .with("nested", nested)
            .with("empty_nested", Data::new())
            .with("strings", List::from(vec!["a".to_string(), "b".to_string()]))
            .with("doubles", List::from(vec![1.5, f64::NAN]))
    }

    pub fn with(mut self, key: &str, value: impl Into<pipedata_rs::Value>) -> Self {
        self.data.put(key, value).unwrap();
        self
    }

    pub fn meta(mut self, meta: Data) -> Self {
        self.data.set_meta_data(meta);
        self
    }

    pub fn build(self) -> Data {
        self.data
    }
}

impl Default for DataBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A float64 array counting up from zero
pub fn float_array(shape: &[usize]) -> NDArray {
    let len = shape.iter().product::<usize>();
    let values = (0..len).map(|i| i as f64).collect();
    NDArray::from(ArrayD::from_shape_vec(IxDyn(shape), values).unwrap())
}

/// A deterministic RGB test pattern
pub fn rgb_pixels(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 40) as u8, (y * 40) as u8, 200])
    }))
}

/// The test pattern, PNG-encoded
pub fn png_image(width: u32, height: u32) -> Image {
    Image::from(EncodedImage::from_dynamic(&rgb_pixels(width, height), ImageEncoding::Png).unwrap())
}

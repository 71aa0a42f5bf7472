//! Script-side value types.
//!
//! - [`ScriptData`]: the ordered guest container, exposed to scripts as `Data`.
//! - [`ScriptArray`]: guest representation of an NDArray (`NDArray` in scripts).
//! - [`ScriptImage`]: guest representation of an Image (`Image` in scripts).
//!
//! Bounding boxes travel as plain object maps (see [`bbox_to_map`]).

use crate::array::{self, ArrayRepr, NDArray, NDArrayType, NativeArray, SerializedArray};
use crate::data::BoundingBox;
use crate::error::Result;
use crate::format::{FnConverter, Format, FormatRegistry, FormatTag};
use crate::imaging::{self, DecodedImage, EncodedImage, Image, ImageEncoding, ImageRepr};
use bytes::Bytes;
use image::{DynamicImage, GenericImageView};
use rhai::{Dynamic, ImmutableString, Map, FLOAT};
use std::any::Any;
use std::sync::Arc;

/// Insertion-ordered key/value container used inside scripts.
#[derive(Debug, Clone, Default)]
pub struct ScriptData {
    entries: Vec<(ImmutableString, Dynamic)>,
    meta: Option<Box<ScriptData>>,
}

impl ScriptData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Dynamic> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v)
    }

    /// Insert or overwrite; an existing key keeps its position.
    pub fn set(&mut self, key: impl Into<ImmutableString>, value: Dynamic) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Dynamic> {
        let position = self.entries.iter().position(|(k, _)| k.as_str() == key)?;
        Some(self.entries.remove(position).1)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Dynamic)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn meta(&self) -> Option<&ScriptData> {
        self.meta.as_deref()
    }

    pub fn set_meta(&mut self, meta: ScriptData) {
        self.meta = Some(Box::new(meta));
    }
}

/// Script-side array. Shares its buffer with the native array it came from.
#[derive(Debug, Clone)]
pub struct ScriptArray(NativeArray);

impl ScriptArray {
    pub fn new(native: NativeArray) -> Self {
        Self(native)
    }

    pub fn native(&self) -> &NativeArray {
        &self.0
    }

    pub fn into_native(self) -> NativeArray {
        self.0
    }
}

impl FormatTag for ScriptArray {
    const NAME: &'static str = "ScriptArray";
}

impl ArrayRepr for ScriptArray {
    fn format(&self) -> Format {
        Format::of::<ScriptArray>()
    }

    fn dtype(&self) -> NDArrayType {
        self.0.dtype()
    }

    fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    fn to_le_bytes(&self) -> Result<Bytes> {
        Ok(self.0.encode_le())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Script-side image. Shares decoded pixels with its source.
#[derive(Debug, Clone)]
pub struct ScriptImage(Arc<DynamicImage>);

impl ScriptImage {
    pub fn new(pixels: Arc<DynamicImage>) -> Self {
        Self(pixels)
    }

    pub fn pixels(&self) -> &Arc<DynamicImage> {
        &self.0
    }
}

impl FormatTag for ScriptImage {
    const NAME: &'static str = "ScriptImage";
}

impl ImageRepr for ScriptImage {
    fn format(&self) -> Format {
        Format::of::<ScriptImage>()
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

pub(crate) const BBOX_FIELDS: [&str; 4] = ["cx", "cy", "height", "width"];
pub(crate) const BBOX_OPTIONAL_FIELDS: [&str; 2] = ["label", "probability"];

/// Object-map form of a bounding box. Absent label/probability are unit.
pub fn bbox_to_map(b: &BoundingBox) -> Map {
    let mut map = Map::new();
    map.insert("cx".into(), Dynamic::from_float(b.cx()));
    map.insert("cy".into(), Dynamic::from_float(b.cy()));
    map.insert("height".into(), Dynamic::from_float(b.height()));
    map.insert("width".into(), Dynamic::from_float(b.width()));
    map.insert(
        "label".into(),
        b.label().map_or(Dynamic::UNIT, |l| Dynamic::from(l.to_string())),
    );
    map.insert(
        "probability".into(),
        b.probability().map_or(Dynamic::UNIT, Dynamic::from_float),
    );
    map
}

pub(crate) fn number(value: &Dynamic) -> Option<FLOAT> {
    value
        .as_float()
        .ok()
        .or_else(|| value.as_int().ok().map(|i| i as FLOAT))
}

fn native_to_script(from: &NDArray) -> Result<NDArray> {
    let native = array::expect_repr::<NativeArray>(from)?;
    Ok(NDArray::new(ScriptArray::new(native.clone())))
}

fn script_to_native(from: &NDArray) -> Result<NDArray> {
    let script = array::expect_repr::<ScriptArray>(from)?;
    Ok(NDArray::new(script.native().clone()))
}

fn serialized_to_script(from: &NDArray) -> Result<NDArray> {
    let serialized = array::expect_repr::<SerializedArray>(from)?;
    let native = NativeArray::from_le_bytes(serialized.dtype(), serialized.shape(), serialized.buffer())?;
    Ok(NDArray::new(ScriptArray::new(native)))
}

fn decoded_to_script(from: &Image) -> Result<Image> {
    let decoded = imaging::expect_repr::<DecodedImage>(from)?;
    Ok(Image::new(ScriptImage::new(Arc::clone(decoded.image()))))
}

fn script_to_decoded(from: &Image) -> Result<Image> {
    let script = imaging::expect_repr::<ScriptImage>(from)?;
    Ok(Image::new(DecodedImage::from_shared(Arc::clone(script.pixels()))))
}

fn any_image_to_script(from: &Image) -> Result<Image> {
    Ok(Image::new(ScriptImage::new(from.decode()?)))
}

/// Register the converters into and out of the script representations.
pub fn register_converters(registry: &mut FormatRegistry) {
    registry
        .arrays_mut()
        .register(FnConverter::exact(
            "native-to-script",
            Format::of::<NativeArray>(),
            Format::of::<ScriptArray>(),
            native_to_script,
        ))
        .register(FnConverter::exact(
            "script-to-native",
            Format::of::<ScriptArray>(),
            Format::of::<NativeArray>(),
            script_to_native,
        ))
        .register(FnConverter::exact(
            "serialized-to-script",
            Format::of::<SerializedArray>(),
            Format::of::<ScriptArray>(),
            serialized_to_script,
        ));

    registry
        .images_mut()
        .register(FnConverter::exact(
            "decoded-to-script",
            Format::of::<DecodedImage>(),
            Format::of::<ScriptImage>(),
            decoded_to_script,
        ))
        .register(FnConverter::exact(
            "script-to-decoded",
            Format::of::<ScriptImage>(),
            Format::of::<DecodedImage>(),
            script_to_decoded,
        ))
        .register(FnConverter::any_source(
            "decode-to-script",
            Format::of::<ScriptImage>(),
            any_image_to_script,
        ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use ndarray::array;

    #[test]
    fn test_script_data_overwrite_keeps_position() {
        let mut data = ScriptData::new();
        data.set("a", Dynamic::from_int(1));
        data.set("b", Dynamic::from_int(2));
        data.set("a", Dynamic::from("x".to_string()));
        assert_eq!(data.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(data.get("a").unwrap().is_string());
        assert_eq!(data.remove("a").unwrap().into_string().unwrap(), "x");
        assert!(!data.contains("a"));
    }

    #[test]
    fn test_native_script_conversion_is_zero_copy() {
        let registry = FormatRegistry::with_defaults();
        let native = NativeArray::from(array![1.0f64, 2.0, 3.0].into_dyn());
        let original_ptr = native.as_array::<f64>().unwrap().as_ptr();

        let script: ScriptArray = NDArray::from(native).get_as(&registry).unwrap();
        assert_eq!(script.native().as_array::<f64>().unwrap().as_ptr(), original_ptr);

        let back: NativeArray = NDArray::new(script).get_as(&registry).unwrap();
        assert_eq!(back.as_array::<f64>().unwrap().as_ptr(), original_ptr);
    }

    #[test]
    fn test_serialized_to_script_copies() {
        let registry = FormatRegistry::with_defaults();
        let buffer = Bytes::from([3i64.to_le_bytes(), 4i64.to_le_bytes()].concat());
        let serialized = NDArray::new(SerializedArray::new(NDArrayType::Int64, vec![2], buffer.clone()).unwrap());
        let script: ScriptArray = serialized.get_as(&registry).unwrap();
        assert_eq!(script.native().to_f64_vec(), vec![3.0, 4.0]);
        assert_ne!(
            script.native().as_array::<i64>().unwrap().as_ptr() as *const u8,
            buffer.as_ptr()
        );
    }

    #[test]
    fn test_image_script_round_trip_shares_pixels() {
        let registry = FormatRegistry::with_defaults();
        let pixels = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 2, Rgba([9, 8, 7, 255])));
        let decoded = Image::from(pixels);
        let script: ScriptImage = decoded.get_as(&registry).unwrap();
        assert_eq!(script.channels(), 4);
        let back: DecodedImage = Image::new(script.clone()).get_as(&registry).unwrap();
        assert!(Arc::ptr_eq(back.image(), script.pixels()));
    }

    #[test]
    fn test_encoded_image_reaches_script_via_capability() {
        let registry = FormatRegistry::with_defaults();
        let pixels = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 4])));
        let encoded = Image::new(EncodedImage::from_dynamic(&pixels, ImageEncoding::Png).unwrap());
        let script: ScriptImage = encoded.get_as(&registry).unwrap();
        assert_eq!(script.pixels().as_bytes(), pixels.as_bytes());
    }

    #[test]
    fn test_bbox_map_layout() {
        let map = bbox_to_map(&BoundingBox::new(0.5, 0.5, 0.2, 0.3).with_label("cat"));
        assert_eq!(map.len(), 6);
        assert!(map.get("probability").unwrap().is_unit());
        assert_eq!(number(map.get("width").unwrap()), Some(0.3));
    }
}

//! Moving [`Data`] across the host/script boundary.
//!
//! Host to script dispatches on each key's [`ValueType`]. Script to host
//! runs every value through [`classify`], an ordered chain of predicates
//! where the first match decides the host type:
//!
//! string, int, float, bool, blob, `NDArray`, `Image`, bounding-box map,
//! array, then `Data` or any other object map.
//!
//! Lists take their element type from the first element. Later elements of
//! another type are rejected rather than coerced.

use super::types::{bbox_to_map, number, ScriptArray, ScriptData, ScriptImage, BBOX_FIELDS, BBOX_OPTIONAL_FIELDS};
use crate::array::{NDArray, NativeArray};
use crate::data::{BoundingBox, Data, List, Value, ValueType};
use crate::error::{PipeDataError, Result, ResultExt};
use crate::format::{Format, FormatRegistry};
use crate::imaging::{DecodedImage, Image};
use rhai::{Array, Blob, Dynamic, Map};

type Classifier = fn(&Dynamic) -> bool;

const CLASSIFIERS: [(ValueType, Classifier); 10] = [
    (ValueType::String, is_string),
    (ValueType::Int64, is_int),
    (ValueType::Double, is_float),
    (ValueType::Boolean, is_bool),
    (ValueType::Bytes, is_bytes),
    (ValueType::NDArray, is_ndarray),
    (ValueType::Image, is_image),
    (ValueType::BoundingBox, is_bounding_box),
    (ValueType::List, is_list),
    (ValueType::Data, is_data),
];

/// Host type a script value maps to, or `None` if it has no host form.
pub fn classify(value: &Dynamic) -> Option<ValueType> {
    CLASSIFIERS
        .iter()
        .find(|(_, matches)| matches(value))
        .map(|(value_type, _)| *value_type)
}

pub fn is_string(value: &Dynamic) -> bool {
    value.is_string() || value.is_char()
}

pub fn is_int(value: &Dynamic) -> bool {
    value.is_int()
}

pub fn is_float(value: &Dynamic) -> bool {
    value.is_float()
}

pub fn is_bool(value: &Dynamic) -> bool {
    value.is_bool()
}

pub fn is_bytes(value: &Dynamic) -> bool {
    value.is_blob()
}

pub fn is_ndarray(value: &Dynamic) -> bool {
    value.is::<ScriptArray>()
}

pub fn is_image(value: &Dynamic) -> bool {
    value.is::<ScriptImage>()
}

/// An object map with numeric `cx`, `cy`, `height`, `width`, optionally
/// `label` (string or unit) and `probability` (number or unit), and nothing
/// else.
pub fn is_bounding_box(value: &Dynamic) -> bool {
    let Some(map) = value.read_lock::<Map>() else {
        return false;
    };
    let required = BBOX_FIELDS
        .iter()
        .all(|field| map.get(*field).and_then(number).is_some());
    let known = map
        .keys()
        .all(|k| BBOX_FIELDS.contains(&k.as_str()) || BBOX_OPTIONAL_FIELDS.contains(&k.as_str()));
    let label_ok = map
        .get("label")
        .map_or(true, |l| l.is_unit() || l.is_string());
    let probability_ok = map
        .get("probability")
        .map_or(true, |p| p.is_unit() || number(p).is_some());
    required && known && label_ok && probability_ok
}

pub fn is_list(value: &Dynamic) -> bool {
    value.is_array()
}

pub fn is_data(value: &Dynamic) -> bool {
    value.is::<ScriptData>() || value.is_map()
}

fn unsupported(key: &str, value: &Dynamic) -> PipeDataError {
    PipeDataError::UnsupportedType(format!(
        "script value of type {} has no host form (key \"{}\")",
        value.type_name(),
        key
    ))
}

fn cast<T: rhai::Variant + Clone>(key: &str, value: &Dynamic) -> Result<T> {
    value.clone().try_cast::<T>().ok_or_else(|| unsupported(key, value))
}

/// Converts containers in both directions using one converter registry.
#[derive(Debug, Clone, Copy)]
pub struct Marshaller<'a> {
    registry: &'a FormatRegistry,
}

impl<'a> Marshaller<'a> {
    pub fn new(registry: &'a FormatRegistry) -> Self {
        Self { registry }
    }

    /// Host container to script container.
    pub fn to_guest(&self, data: &Data) -> Result<ScriptData> {
        tracing::trace!(keys = data.len(), "marshaling container into script");
        let mut out = ScriptData::new();
        for (key, value) in data.iter() {
            out.set(key, self.value_to_guest(key, value)?);
        }
        if let Some(meta) = data.meta_data() {
            out.set_meta(self.to_guest(meta)?);
        }
        Ok(out)
    }

    fn value_to_guest(&self, key: &str, value: &Value) -> Result<Dynamic> {
        Ok(match value {
            Value::String(s) => Dynamic::from(s.clone()),
            Value::Int64(i) => Dynamic::from_int(*i),
            Value::Double(d) => Dynamic::from_float(*d),
            Value::Boolean(b) => Dynamic::from_bool(*b),
            Value::Bytes(b) => Dynamic::from_blob(b.clone()),
            Value::NDArray(array) => {
                let script: ScriptArray = array
                    .get_as(self.registry)
                    .with_context(|| format!("key \"{}\"", key))?;
                Dynamic::from(script)
            }
            Value::Image(image) => {
                let script: ScriptImage = image
                    .get_as(self.registry)
                    .with_context(|| format!("key \"{}\"", key))?;
                Dynamic::from(script)
            }
            Value::BoundingBox(b) => Dynamic::from_map(bbox_to_map(b)),
            Value::Data(nested) => Dynamic::from(self.to_guest(nested)?),
            Value::List(list) => {
                let items = list
                    .to_values()
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.value_to_guest(&format!("{}[{}]", key, i), item))
                    .collect::<Result<Array>>()?;
                Dynamic::from_array(items)
            }
        })
    }

    /// Script value to host container. Accepts a `Data` or an object map;
    /// map keys come back in sorted order.
    pub fn from_guest(&self, value: &Dynamic) -> Result<Data> {
        if let Some(data) = value.read_lock::<ScriptData>() {
            return self.from_guest_data(&data);
        }
        if let Some(map) = value.read_lock::<Map>() {
            return self.map_to_data(&map);
        }
        Err(PipeDataError::UnsupportedType(format!(
            "expected Data from script, found {}",
            value.type_name()
        )))
    }

    pub fn from_guest_data(&self, data: &ScriptData) -> Result<Data> {
        tracing::trace!(keys = data.len(), "marshaling container out of script");
        let mut out = Data::new();
        for (key, value) in data.iter() {
            out.put(key, self.value_from_guest(key, value)?)?;
        }
        if let Some(meta) = data.meta() {
            out.set_meta_data(self.from_guest_data(meta)?);
        }
        Ok(out)
    }

    fn map_to_data(&self, map: &Map) -> Result<Data> {
        let mut out = Data::new();
        for (key, value) in map.iter() {
            out.put(key.as_str(), self.value_from_guest(key, value)?)?;
        }
        Ok(out)
    }

    fn value_from_guest(&self, key: &str, value: &Dynamic) -> Result<Value> {
        let value_type = classify(value).ok_or_else(|| unsupported(key, value))?;
        Ok(match value_type {
            ValueType::String => {
                if value.is_char() {
                    Value::String(cast::<char>(key, value)?.to_string())
                } else {
                    Value::String(cast::<rhai::ImmutableString>(key, value)?.to_string())
                }
            }
            ValueType::Int64 => Value::Int64(cast::<rhai::INT>(key, value)?),
            ValueType::Double => Value::Double(cast::<rhai::FLOAT>(key, value)?),
            ValueType::Boolean => Value::Boolean(cast::<bool>(key, value)?),
            ValueType::Bytes => Value::Bytes(cast::<Blob>(key, value)?),
            ValueType::NDArray => {
                let script = NDArray::new(cast::<ScriptArray>(key, value)?);
                Value::NDArray(
                    script
                        .convert_to(Format::of::<NativeArray>(), self.registry)
                        .with_context(|| format!("key \"{}\"", key))?,
                )
            }
            ValueType::Image => {
                let script = Image::new(cast::<ScriptImage>(key, value)?);
                Value::Image(
                    script
                        .convert_to(Format::of::<DecodedImage>(), self.registry)
                        .with_context(|| format!("key \"{}\"", key))?,
                )
            }
            ValueType::BoundingBox => Value::BoundingBox(map_to_bbox(key, &cast::<Map>(key, value)?)?),
            ValueType::List => Value::List(self.list_from_guest(key, &cast::<Array>(key, value)?)?),
            ValueType::Data => match value.read_lock::<ScriptData>() {
                Some(nested) => Value::Data(self.from_guest_data(&nested)?),
                None => Value::Data(self.map_to_data(&cast::<Map>(key, value)?)?),
            },
        })
    }

    fn list_from_guest(&self, key: &str, items: &Array) -> Result<List> {
        let first = items.first().ok_or_else(|| PipeDataError::EmptyListInference {
            key: key.to_string(),
        })?;
        let element_type = classify(first).ok_or_else(|| unsupported(&format!("{}[0]", key), first))?;
        if element_type == ValueType::List {
            return Err(PipeDataError::NestedList {
                key: key.to_string(),
            });
        }

        let mut values = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let item_key = format!("{}[{}]", key, i);
            match classify(item) {
                Some(t) if t == element_type => values.push(self.value_from_guest(&item_key, item)?),
                Some(ValueType::List) => return Err(PipeDataError::NestedList { key: item_key }),
                Some(t) => return Err(PipeDataError::type_mismatch(&item_key, element_type, t)),
                None => return Err(unsupported(&item_key, item)),
            }
        }
        List::from_values(key, element_type, values)
    }
}

fn map_to_bbox(key: &str, map: &Map) -> Result<BoundingBox> {
    let field = |name: &str| {
        map.get(name).and_then(number).ok_or_else(|| {
            PipeDataError::UnsupportedType(format!(
                "bounding box field \"{}\" is not a number (key \"{}\")",
                name, key
            ))
        })
    };
    let label = map
        .get("label")
        .filter(|l| !l.is_unit())
        .and_then(|l| l.clone().into_string().ok());
    let probability = map.get("probability").and_then(number);
    Ok(BoundingBox::create(
        field("cx")?,
        field("cy")?,
        field("height")?,
        field("width")?,
        label,
        probability,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::{EncodedImage, ImageEncoding};
    use image::{DynamicImage, GrayImage, Luma};
    use ndarray::array;

    fn registry() -> FormatRegistry {
        FormatRegistry::with_defaults()
    }

    fn sample() -> Data {
        let mut data = Data::new();
        data.put_string("name", "frame-1").unwrap();
        data.put_long("count", 42).unwrap();
        data.put_double("score", f64::NAN).unwrap();
        data.put_boolean("ok", true).unwrap();
        data.put_bytes("raw", vec![0u8, 1, 255]).unwrap();
        data.put_ndarray("arr", NDArray::from(array![[1i32, 2], [3, 4]].into_dyn()))
            .unwrap();
        data.put_image(
            "img",
            Image::from(DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 2, Luma([77])))),
        )
        .unwrap();
        data.put_bounding_box("box", BoundingBox::new(0.5, 0.5, 0.2, 0.1).with_label("cat"))
            .unwrap();
        data.put_list("tags", vec!["a", "b"]).unwrap();

        let mut nested = Data::new();
        nested.put_long("depth", 1).unwrap();
        data.put_data("nested", nested).unwrap();

        let mut meta = Data::new();
        meta.put_string("source", "camera").unwrap();
        data.set_meta_data(meta);
        data
    }

    #[test]
    fn test_classifier_order() {
        assert_eq!(classify(&Dynamic::from("s")), Some(ValueType::String));
        assert_eq!(classify(&Dynamic::from_char('c')), Some(ValueType::String));
        assert_eq!(classify(&Dynamic::from_int(1)), Some(ValueType::Int64));
        assert_eq!(classify(&Dynamic::from_float(1.0)), Some(ValueType::Double));
        assert_eq!(classify(&Dynamic::from_bool(false)), Some(ValueType::Boolean));
        assert_eq!(classify(&Dynamic::from_blob(vec![1])), Some(ValueType::Bytes));
        assert_eq!(
            classify(&Dynamic::from_map(bbox_to_map(&BoundingBox::new(0.0, 0.0, 1.0, 1.0)))),
            Some(ValueType::BoundingBox)
        );
        assert_eq!(classify(&Dynamic::from_array(vec![])), Some(ValueType::List));
        assert_eq!(classify(&Dynamic::from(ScriptData::new())), Some(ValueType::Data));
        assert_eq!(classify(&Dynamic::from_map(Map::new())), Some(ValueType::Data));
        assert_eq!(classify(&Dynamic::UNIT), None);
    }

    #[test]
    fn test_map_with_extra_field_is_not_a_bbox() {
        let mut map = bbox_to_map(&BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        map.insert("extra".into(), Dynamic::from_int(1));
        assert_eq!(classify(&Dynamic::from_map(map)), Some(ValueType::Data));
    }

    #[test]
    fn test_round_trip_all_kinds() {
        let registry = registry();
        let marshaller = Marshaller::new(&registry);
        let data = sample();
        let guest = marshaller.to_guest(&data).unwrap();
        assert_eq!(guest.keys().collect::<Vec<_>>(), data.keys());
        assert!(guest.get("arr").unwrap().is::<ScriptArray>());
        assert!(guest.meta().is_some());

        let back = marshaller.from_guest(&Dynamic::from(guest)).unwrap();
        assert_eq!(back, data);
        assert_eq!(back.keys(), data.keys());
        assert_eq!(back.get_ndarray("arr").unwrap().format(), Format::of::<NativeArray>());
    }

    #[test]
    fn test_encoded_image_comes_back_decoded() {
        let registry = registry();
        let marshaller = Marshaller::new(&registry);
        let pixels = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([9])));
        let encoded = Image::new(EncodedImage::from_dynamic(&pixels, ImageEncoding::Png).unwrap());
        let data = Data::singleton("img", encoded.clone()).unwrap();

        let back = marshaller
            .from_guest(&Dynamic::from(marshaller.to_guest(&data).unwrap()))
            .unwrap();
        let image = back.get_image("img").unwrap();
        assert_eq!(image.format(), Format::of::<DecodedImage>());
        assert_eq!(image, &encoded);
    }

    #[test]
    fn test_empty_list_cannot_be_inferred() {
        let registry = registry();
        let mut guest = ScriptData::new();
        guest.set("xs", Dynamic::from_array(vec![]));
        let err = Marshaller::new(&registry).from_guest_data(&guest).unwrap_err();
        assert!(matches!(err, PipeDataError::EmptyListInference { ref key } if key == "xs"));
    }

    #[test]
    fn test_heterogeneous_list_is_rejected() {
        let registry = registry();
        let mut guest = ScriptData::new();
        guest.set(
            "xs",
            Dynamic::from_array(vec![Dynamic::from_int(1), Dynamic::from_float(2.0)]),
        );
        let err = Marshaller::new(&registry).from_guest_data(&guest).unwrap_err();
        match err {
            PipeDataError::TypeMismatch { key, expected, actual } => {
                assert_eq!(key, "xs[1]");
                assert_eq!(expected, ValueType::Int64);
                assert_eq!(actual, ValueType::Double);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_nested_list_is_rejected() {
        let registry = registry();
        let mut guest = ScriptData::new();
        let inner = Dynamic::from_array(vec![Dynamic::from_int(1)]);
        guest.set("xs", Dynamic::from_array(vec![inner]));
        let err = Marshaller::new(&registry).from_guest_data(&guest).unwrap_err();
        assert!(matches!(err, PipeDataError::NestedList { .. }));
    }

    #[test]
    fn test_unit_value_is_unsupported() {
        let registry = registry();
        let mut guest = ScriptData::new();
        guest.set("nothing", Dynamic::UNIT);
        let err = Marshaller::new(&registry).from_guest_data(&guest).unwrap_err();
        assert!(matches!(err, PipeDataError::UnsupportedType(ref msg) if msg.contains("nothing")));
    }

    #[test]
    fn test_non_container_output_is_rejected() {
        let registry = registry();
        let err = Marshaller::new(&registry)
            .from_guest(&Dynamic::from_int(3))
            .unwrap_err();
        assert!(matches!(err, PipeDataError::UnsupportedType(_)));
    }

    #[test]
    fn test_object_map_output_uses_sorted_keys() {
        let registry = registry();
        let mut map = Map::new();
        map.insert("b".into(), Dynamic::from_int(2));
        map.insert("a".into(), Dynamic::from("x"));
        let data = Marshaller::new(&registry)
            .from_guest(&Dynamic::from_map(map))
            .unwrap();
        assert_eq!(data.keys(), vec!["a", "b"]);
        assert_eq!(data.get_long("b").unwrap(), 2);
    }

    #[test]
    fn test_array_conversion_needs_registry() {
        let empty = FormatRegistry::empty();
        let data = Data::singleton("arr", NDArray::from(array![1.0f64].into_dyn())).unwrap();
        let err = Marshaller::new(&empty).to_guest(&data).unwrap_err();
        assert!(matches!(err.root(), PipeDataError::ConversionCapability { .. }));
        assert!(err.to_string().contains("arr"));
    }
}

//! JSON form of [`Data`].
//!
//! Plain JSON covers strings, integers, finite doubles, booleans, nested
//! containers and non-empty lists. Everything else is a single-key object
//! whose key starts with `@`:
//!
//! | value                | form                                                   |
//! |----------------------|--------------------------------------------------------|
//! | BYTES                | `{"@bytes": "<base64>"}`                               |
//! | NaN / ±Infinity      | `{"@double": "NaN" \| "Infinity" \| "-Infinity"}`      |
//! | NDARRAY              | `{"@ndarray": {"type", "shape", "data": "<base64>"}}`  |
//! | IMAGE                | `{"@image": {"format", "data": "<base64>"}}`           |
//! | float IMAGE          | `{"@image": {"raw", "width", "height", "data"}}`       |
//! | BOUNDING_BOX         | `{"@bbox": {"cx", "cy", "height", "width", ...}}`      |
//! | empty LIST           | `{"@list": "<element type>"}`                          |
//!
//! Metadata is written under `"@metadata"` inside the container object.
//! Container keys that start with `@` are written with one more `@` in
//! front, so `"@id"` becomes `"@@id"`. Any other single-`@` key is an error
//! on input.

use super::{BoundingBox, Data, List, Value, ValueType};
use crate::array::{NDArray, NDArrayType, SerializedArray};
use crate::error::{PipeDataError, Result};
use crate::imaging::{EncodedImage, Image, ImageEncoding, ImagePayload, RawImage, RawLayout};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Map, Number, Value as Json};

const TAG_BYTES: &str = "@bytes";
const TAG_DOUBLE: &str = "@double";
const TAG_NDARRAY: &str = "@ndarray";
const TAG_IMAGE: &str = "@image";
const TAG_BBOX: &str = "@bbox";
const TAG_LIST: &str = "@list";
const TAG_METADATA: &str = "@metadata";

const VALUE_TAGS: [&str; 6] = [TAG_BYTES, TAG_DOUBLE, TAG_NDARRAY, TAG_IMAGE, TAG_BBOX, TAG_LIST];

impl Data {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_json_value()?)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_json_value()?)?)
    }

    pub fn from_json(json: &str) -> Result<Data> {
        let value: Json = serde_json::from_str(json)?;
        Self::from_json_value(&value)
    }

    pub fn to_json_value(&self) -> Result<Json> {
        encode_data(self)
    }

    pub fn from_json_value(value: &Json) -> Result<Data> {
        match value {
            Json::Object(map) => decode_data(map),
            other => Err(PipeDataError::Serialization(format!(
                "expected a JSON object for Data, found {}",
                json_kind(other)
            ))),
        }
    }
}

fn tagged(tag: &str, body: Json) -> Json {
    let mut map = Map::with_capacity(1);
    map.insert(tag.to_string(), body);
    Json::Object(map)
}

fn encode_data(data: &Data) -> Result<Json> {
    let mut map = Map::with_capacity(data.len() + 1);
    for (key, value) in data.iter() {
        map.insert(escape_key(key), encode_value(value)?);
    }
    if let Some(meta) = data.meta_data() {
        map.insert(TAG_METADATA.to_string(), encode_data(meta)?);
    }
    Ok(Json::Object(map))
}

fn escape_key(key: &str) -> String {
    if key.starts_with('@') {
        format!("@{}", key)
    } else {
        key.to_string()
    }
}

fn unescape_key(key: &str) -> Result<&str> {
    match key.strip_prefix('@') {
        None => Ok(key),
        Some(rest) if rest.starts_with('@') => Ok(rest),
        Some(_) => Err(malformed(key, "keys starting with a single '@' are reserved")),
    }
}

fn encode_value(value: &Value) -> Result<Json> {
    Ok(match value {
        Value::String(s) => Json::String(s.clone()),
        Value::Int64(n) => Json::from(*n),
        Value::Double(d) => encode_double(*d),
        Value::Boolean(b) => Json::Bool(*b),
        Value::Bytes(b) => tagged(TAG_BYTES, Json::String(STANDARD.encode(b))),
        Value::NDArray(array) => encode_ndarray(array)?,
        Value::Image(image) => encode_image(image)?,
        Value::BoundingBox(b) => tagged(TAG_BBOX, serde_json::to_value(b)?),
        Value::Data(d) => encode_data(d)?,
        Value::List(list) => encode_list(list)?,
    })
}

fn encode_double(d: f64) -> Json {
    match Number::from_f64(d) {
        Some(n) => Json::Number(n),
        None => {
            let form = if d.is_nan() {
                "NaN"
            } else if d > 0.0 {
                "Infinity"
            } else {
                "-Infinity"
            };
            tagged(TAG_DOUBLE, Json::String(form.to_string()))
        }
    }
}

fn encode_ndarray(array: &NDArray) -> Result<Json> {
    let bytes = array.to_le_bytes()?;
    Ok(tagged(
        TAG_NDARRAY,
        json!({
            "type": array.dtype().name(),
            "shape": array.shape(),
            "data": STANDARD.encode(&bytes),
        }),
    ))
}

fn encode_image(image: &Image) -> Result<Json> {
    let body = match ImagePayload::of(image)? {
        ImagePayload::Encoded(encoded) => json!({
            "format": encoded.encoding().name(),
            "data": STANDARD.encode(encoded.bytes()),
        }),
        ImagePayload::Raw(raw) => json!({
            "raw": raw.layout().name(),
            "width": raw.width(),
            "height": raw.height(),
            "data": STANDARD.encode(raw.samples()),
        }),
    };
    Ok(tagged(TAG_IMAGE, body))
}

fn encode_list(list: &List) -> Result<Json> {
    if list.is_empty() {
        return Ok(tagged(
            TAG_LIST,
            Json::String(list.element_type().name().to_string()),
        ));
    }
    list.to_values()
        .iter()
        .map(encode_value)
        .collect::<Result<Vec<_>>>()
        .map(Json::Array)
}

fn decode_data(map: &Map<String, Json>) -> Result<Data> {
    let mut data = Data::new();
    for (key, json) in map {
        if key == TAG_METADATA {
            let meta = match json {
                Json::Object(m) => decode_data(m)?,
                other => {
                    return Err(malformed(key, &format!("metadata must be an object, found {}", json_kind(other))))
                }
            };
            data.set_meta_data(meta);
            continue;
        }
        let key = unescape_key(key)?;
        let value = decode_value(key, json)?;
        data.put(key, value)?;
    }
    Ok(data)
}

fn decode_value(key: &str, json: &Json) -> Result<Value> {
    match json {
        Json::Null => Err(malformed(key, "null has no value type")),
        Json::Bool(b) => Ok(Value::Boolean(*b)),
        Json::Number(n) => decode_number(key, n),
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Array(items) => decode_list(key, items).map(Value::List),
        Json::Object(map) => match single_tag(map) {
            Some((tag, body)) => decode_tagged(key, tag, body),
            None => decode_data(map).map(Value::Data),
        },
    }
}

fn decode_number(key: &str, n: &Number) -> Result<Value> {
    if let Some(i) = n.as_i64() {
        Ok(Value::Int64(i))
    } else if n.is_u64() {
        Err(malformed(key, &format!("integer {} does not fit in INT64", n)))
    } else {
        n.as_f64()
            .map(Value::Double)
            .ok_or_else(|| malformed(key, &format!("unrepresentable number {}", n)))
    }
}

fn single_tag(map: &Map<String, Json>) -> Option<(&str, &Json)> {
    if map.len() != 1 {
        return None;
    }
    let (tag, body) = map.iter().next()?;
    VALUE_TAGS
        .contains(&tag.as_str())
        .then(|| (tag.as_str(), body))
}

fn decode_tagged(key: &str, tag: &str, body: &Json) -> Result<Value> {
    match tag {
        TAG_BYTES => Ok(Value::Bytes(decode_base64(key, body)?)),
        TAG_DOUBLE => match body.as_str() {
            Some("NaN") => Ok(Value::Double(f64::NAN)),
            Some("Infinity") => Ok(Value::Double(f64::INFINITY)),
            Some("-Infinity") => Ok(Value::Double(f64::NEG_INFINITY)),
            _ => Err(malformed(key, &format!("bad {} body {}", TAG_DOUBLE, body))),
        },
        TAG_NDARRAY => decode_ndarray(key, body).map(Value::NDArray),
        TAG_IMAGE => decode_image(key, body).map(Value::Image),
        TAG_BBOX => Ok(Value::BoundingBox(serde_json::from_value::<BoundingBox>(
            body.clone(),
        )?)),
        TAG_LIST => {
            let name = body
                .as_str()
                .ok_or_else(|| malformed(key, "empty-list tag must name an element type"))?;
            List::empty(key, ValueType::from_name(name)?).map(Value::List)
        }
        _ => Err(malformed(key, &format!("unknown tag {}", tag))),
    }
}

fn decode_list(key: &str, items: &[Json]) -> Result<List> {
    let values = items
        .iter()
        .enumerate()
        .map(|(i, item)| decode_value(&format!("{}[{}]", key, i), item))
        .collect::<Result<Vec<_>>>()?;
    let element_type = values
        .first()
        .map(Value::value_type)
        .ok_or_else(|| PipeDataError::EmptyListInference {
            key: key.to_string(),
        })?;
    List::from_values(key, element_type, values)
}

fn decode_ndarray(key: &str, body: &Json) -> Result<NDArray> {
    let dtype = body
        .get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| malformed(key, "ndarray is missing \"type\""))?;
    let shape = body
        .get("shape")
        .and_then(Json::as_array)
        .ok_or_else(|| malformed(key, "ndarray is missing \"shape\""))?
        .iter()
        .map(|d| {
            d.as_u64()
                .map(|d| d as usize)
                .ok_or_else(|| malformed(key, "ndarray shape must hold non-negative integers"))
        })
        .collect::<Result<Vec<_>>>()?;
    let data = decode_base64(
        key,
        body.get("data")
            .ok_or_else(|| malformed(key, "ndarray is missing \"data\""))?,
    )?;
    let array = SerializedArray::new(NDArrayType::from_name(dtype)?, shape, data.into())?;
    Ok(NDArray::new(array))
}

fn decode_image(key: &str, body: &Json) -> Result<Image> {
    if let Some(layout) = body.get("raw").and_then(Json::as_str) {
        return decode_raw_image(key, layout, body);
    }
    let format = body
        .get("format")
        .and_then(Json::as_str)
        .ok_or_else(|| malformed(key, "image is missing \"format\""))?;
    let data = decode_base64(
        key,
        body.get("data")
            .ok_or_else(|| malformed(key, "image is missing \"data\""))?,
    )?;
    let encoded = EncodedImage::new(ImageEncoding::from_name(format)?, data.into())?;
    Ok(Image::new(encoded))
}

fn decode_raw_image(key: &str, layout: &str, body: &Json) -> Result<Image> {
    let dimension = |name: &str| {
        body.get(name)
            .and_then(Json::as_u64)
            .and_then(|d| u32::try_from(d).ok())
            .ok_or_else(|| malformed(key, &format!("raw image needs a u32 \"{}\"", name)))
    };
    let data = decode_base64(
        key,
        body.get("data")
            .ok_or_else(|| malformed(key, "image is missing \"data\""))?,
    )?;
    let raw = RawImage::new(
        RawLayout::from_name(layout)?,
        dimension("width")?,
        dimension("height")?,
        data.into(),
    )?;
    ImagePayload::Raw(raw).into_image()
}

fn decode_base64(key: &str, body: &Json) -> Result<Vec<u8>> {
    let text = body
        .as_str()
        .ok_or_else(|| malformed(key, "expected a base64 string"))?;
    STANDARD
        .decode(text)
        .map_err(|e| malformed(key, &format!("invalid base64: {}", e)))
}

fn malformed(key: &str, detail: &str) -> PipeDataError {
    PipeDataError::Serialization(format!("key \"{}\": {}", key, detail))
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}

//! Framed binary form of [`Data`]: `b"PDAT"`, one version byte, then a
//! bincode payload of a serde mirror of the container.

use super::{BoundingBox, Data, List, Value};
use crate::array::{NDArray, NDArrayType, SerializedArray};
use crate::error::{PipeDataError, Result, ResultExt};
use crate::imaging::{EncodedImage, Image, ImageEncoding, ImagePayload, RawImage, RawLayout};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 4] = b"PDAT";
const VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct WireData {
    entries: Vec<(String, WireValue)>,
    meta: Option<Box<WireData>>,
}

#[derive(Serialize, Deserialize)]
struct WireArray {
    dtype: String,
    shape: Vec<u64>,
    data: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
enum WireImage {
    Encoded {
        encoding: String,
        data: Vec<u8>,
    },
    Raw {
        layout: String,
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
}

#[derive(Serialize, Deserialize)]
enum WireValue {
    String(String),
    Int64(i64),
    Double(f64),
    Boolean(bool),
    Bytes(Vec<u8>),
    Image(WireImage),
    NDArray(WireArray),
    BoundingBox(BoundingBox),
    Data(WireData),
    List(WireList),
}

#[derive(Serialize, Deserialize)]
enum WireList {
    String(Vec<String>),
    Int64(Vec<i64>),
    Double(Vec<f64>),
    Boolean(Vec<bool>),
    Bytes(Vec<Vec<u8>>),
    Image(Vec<WireImage>),
    NDArray(Vec<WireArray>),
    BoundingBox(Vec<BoundingBox>),
    Data(Vec<WireData>),
}

impl WireData {
    fn from_data(data: &Data) -> Result<Self> {
        let entries = data
            .iter()
            .map(|(k, v)| Ok((k.to_string(), WireValue::from_value(v)?)))
            .collect::<Result<Vec<_>>>()?;
        let meta = match data.meta_data() {
            Some(m) => Some(Box::new(WireData::from_data(m)?)),
            None => None,
        };
        Ok(Self { entries, meta })
    }

    fn into_data(self) -> Result<Data> {
        let mut data = Data::new();
        for (key, value) in self.entries {
            let value = value.into_value()?;
            data.put(key, value)?;
        }
        if let Some(meta) = self.meta {
            data.set_meta_data(meta.into_data()?);
        }
        Ok(data)
    }
}

impl WireArray {
    fn from_array(array: &NDArray) -> Result<Self> {
        Ok(Self {
            dtype: array.dtype().name().to_string(),
            shape: array.shape().iter().map(|&d| d as u64).collect(),
            data: array.to_le_bytes()?.to_vec(),
        })
    }

    fn into_array(self) -> Result<NDArray> {
        let shape = self
            .shape
            .into_iter()
            .map(|d| {
                usize::try_from(d).map_err(|_| {
                    PipeDataError::Serialization(format!("array dimension {} does not fit in memory", d))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let array = SerializedArray::new(NDArrayType::from_name(&self.dtype)?, shape, self.data.into())?;
        Ok(NDArray::new(array))
    }
}

impl WireImage {
    fn from_image(image: &Image) -> Result<Self> {
        Ok(match ImagePayload::of(image)? {
            ImagePayload::Encoded(encoded) => WireImage::Encoded {
                encoding: encoded.encoding().name().to_string(),
                data: encoded.bytes().to_vec(),
            },
            ImagePayload::Raw(raw) => WireImage::Raw {
                layout: raw.layout().name().to_string(),
                width: raw.width(),
                height: raw.height(),
                data: raw.samples().to_vec(),
            },
        })
    }

    fn into_image(self) -> Result<Image> {
        let payload = match self {
            WireImage::Encoded { encoding, data } => {
                ImagePayload::Encoded(EncodedImage::new(ImageEncoding::from_name(&encoding)?, data.into())?)
            }
            WireImage::Raw {
                layout,
                width,
                height,
                data,
            } => ImagePayload::Raw(RawImage::new(RawLayout::from_name(&layout)?, width, height, data.into())?),
        };
        payload.into_image()
    }
}

impl WireValue {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(match value {
            Value::String(s) => WireValue::String(s.clone()),
            Value::Int64(n) => WireValue::Int64(*n),
            Value::Double(d) => WireValue::Double(*d),
            Value::Boolean(b) => WireValue::Boolean(*b),
            Value::Bytes(b) => WireValue::Bytes(b.clone()),
            Value::Image(i) => WireValue::Image(WireImage::from_image(i)?),
            Value::NDArray(a) => WireValue::NDArray(WireArray::from_array(a)?),
            Value::BoundingBox(b) => WireValue::BoundingBox(b.clone()),
            Value::Data(d) => WireValue::Data(WireData::from_data(d)?),
            Value::List(l) => WireValue::List(WireList::from_list(l)?),
        })
    }

    fn into_value(self) -> Result<Value> {
        Ok(match self {
            WireValue::String(s) => Value::String(s),
            WireValue::Int64(n) => Value::Int64(n),
            WireValue::Double(d) => Value::Double(d),
            WireValue::Boolean(b) => Value::Boolean(b),
            WireValue::Bytes(b) => Value::Bytes(b),
            WireValue::Image(i) => Value::Image(i.into_image()?),
            WireValue::NDArray(a) => Value::NDArray(a.into_array()?),
            WireValue::BoundingBox(b) => Value::BoundingBox(b),
            WireValue::Data(d) => Value::Data(d.into_data()?),
            WireValue::List(l) => Value::List(l.into_list()?),
        })
    }
}

impl WireList {
    fn from_list(list: &List) -> Result<Self> {
        Ok(match list {
            List::String(v) => WireList::String(v.clone()),
            List::Int64(v) => WireList::Int64(v.clone()),
            List::Double(v) => WireList::Double(v.clone()),
            List::Boolean(v) => WireList::Boolean(v.clone()),
            List::Bytes(v) => WireList::Bytes(v.clone()),
            List::Image(v) => WireList::Image(v.iter().map(WireImage::from_image).collect::<Result<_>>()?),
            List::NDArray(v) => WireList::NDArray(v.iter().map(WireArray::from_array).collect::<Result<_>>()?),
            List::BoundingBox(v) => WireList::BoundingBox(v.clone()),
            List::Data(v) => WireList::Data(v.iter().map(WireData::from_data).collect::<Result<_>>()?),
        })
    }

    fn into_list(self) -> Result<List> {
        Ok(match self {
            WireList::String(v) => List::String(v),
            WireList::Int64(v) => List::Int64(v),
            WireList::Double(v) => List::Double(v),
            WireList::Boolean(v) => List::Boolean(v),
            WireList::Bytes(v) => List::Bytes(v),
            WireList::Image(v) => List::Image(v.into_iter().map(WireImage::into_image).collect::<Result<_>>()?),
            WireList::NDArray(v) => List::NDArray(v.into_iter().map(WireArray::into_array).collect::<Result<_>>()?),
            WireList::BoundingBox(v) => List::BoundingBox(v),
            WireList::Data(v) => List::Data(v.into_iter().map(WireData::into_data).collect::<Result<_>>()?),
        })
    }
}

impl Data {
    /// Encode into the framed binary form.
    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Data> {
        Self::read(bytes)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        let wire = WireData::from_data(self)?;
        writer.write_all(MAGIC)?;
        writer.write_all(&[VERSION])?;
        bincode::serialize_into(&mut writer, &wire)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Data> {
        let mut header = [0u8; 5];
        reader.read_exact(&mut header)?;
        if &header[..4] != MAGIC {
            return Err(PipeDataError::Serialization(
                "not a binary Data record (bad magic)".to_string(),
            ));
        }
        if header[4] != VERSION {
            return Err(PipeDataError::Serialization(format!(
                "unsupported binary Data version {} (expected {})",
                header[4], VERSION
            )));
        }
        let wire: WireData = bincode::deserialize_from(reader)?;
        wire.into_data()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(PipeDataError::from)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        self.write(BufWriter::new(file))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Data> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(PipeDataError::from)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Self::read(BufReader::new(file))
    }
}

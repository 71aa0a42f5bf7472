use super::{element_count, ArrayRepr, NDArrayType};
use crate::error::{PipeDataError, Result};
use crate::format::{Format, FormatTag};
use bytes::Bytes;
use std::any::Any;

/// Array held as element type, shape and a row-major little-endian buffer.
#[derive(Debug, Clone)]
pub struct SerializedArray {
    dtype: NDArrayType,
    shape: Vec<usize>,
    buffer: Bytes,
}

impl SerializedArray {
    /// Fixed-width element types must supply exactly `product(shape) * width`
    /// bytes. UTF8 buffers are stored as given.
    pub fn new(dtype: NDArrayType, shape: Vec<usize>, buffer: Bytes) -> Result<Self> {
        element_count(&shape)?;
        if dtype.width().is_some() {
            let expected = dtype.byte_len(&shape)?;
            if buffer.len() != expected {
                return Err(PipeDataError::Serialization(format!(
                    "{} array of shape {:?} needs {} bytes, got {}",
                    dtype,
                    shape,
                    expected,
                    buffer.len()
                )));
            }
        }
        Ok(Self {
            dtype,
            shape,
            buffer,
        })
    }

    pub fn dtype(&self) -> NDArrayType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }
}

impl FormatTag for SerializedArray {
    const NAME: &'static str = "SerializedArray";
}

impl ArrayRepr for SerializedArray {
    fn format(&self) -> Format {
        Format::of::<SerializedArray>()
    }

    fn dtype(&self) -> NDArrayType {
        self.dtype
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn to_le_bytes(&self) -> Result<Bytes> {
        Ok(self.buffer.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

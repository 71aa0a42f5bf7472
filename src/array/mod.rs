//! Format-independent numeric array handle.
//!
//! An [`NDArray`] wraps exactly one backing representation behind an `Arc`.
//! Cloning a handle is cheap; converting produces a new handle and leaves
//! the original untouched.
//!
//! Built-in representations:
//!
//! - [`NativeArray`]: shared `ndarray` arrays, the form arithmetic runs on.
//! - [`SerializedArray`]: dtype, shape and a little-endian byte buffer, the
//!   form the codecs produce.
//! - `ScriptArray` (in `scripting`): the script-side view of a native array.

mod native;
mod serialized;

pub use native::{ArithOp, NativeArray, Scalar};
pub use serialized::SerializedArray;

use crate::error::{PipeDataError, Result};
use crate::format::{ConverterRegistry, FnConverter, Format, FormatRegistry, FormatTag, Handle};
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NDArrayType {
    Double,
    Float,
    Float16,
    BFloat16,
    Int64,
    Int32,
    Int16,
    Int8,
    UInt64,
    UInt32,
    UInt16,
    UInt8,
    Bool,
    Utf8,
}

impl NDArrayType {
    const ALL: [NDArrayType; 14] = [
        NDArrayType::Double,
        NDArrayType::Float,
        NDArrayType::Float16,
        NDArrayType::BFloat16,
        NDArrayType::Int64,
        NDArrayType::Int32,
        NDArrayType::Int16,
        NDArrayType::Int8,
        NDArrayType::UInt64,
        NDArrayType::UInt32,
        NDArrayType::UInt16,
        NDArrayType::UInt8,
        NDArrayType::Bool,
        NDArrayType::Utf8,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NDArrayType::Double => "DOUBLE",
            NDArrayType::Float => "FLOAT",
            NDArrayType::Float16 => "FLOAT16",
            NDArrayType::BFloat16 => "BFLOAT16",
            NDArrayType::Int64 => "INT64",
            NDArrayType::Int32 => "INT32",
            NDArrayType::Int16 => "INT16",
            NDArrayType::Int8 => "INT8",
            NDArrayType::UInt64 => "UINT64",
            NDArrayType::UInt32 => "UINT32",
            NDArrayType::UInt16 => "UINT16",
            NDArrayType::UInt8 => "UINT8",
            NDArrayType::Bool => "BOOL",
            NDArrayType::Utf8 => "UTF8",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == name)
            .ok_or_else(|| PipeDataError::UnsupportedType(format!("unknown array element type \"{}\"", name)))
    }

    /// Bytes per element, `None` for variable-width text.
    pub fn width(&self) -> Option<usize> {
        match self {
            NDArrayType::Double | NDArrayType::Int64 | NDArrayType::UInt64 => Some(8),
            NDArrayType::Float | NDArrayType::Int32 | NDArrayType::UInt32 => Some(4),
            NDArrayType::Float16
            | NDArrayType::BFloat16
            | NDArrayType::Int16
            | NDArrayType::UInt16 => Some(2),
            NDArrayType::Int8 | NDArrayType::UInt8 | NDArrayType::Bool => Some(1),
            NDArrayType::Utf8 => None,
        }
    }

    /// Buffer size of a fixed-width array of `shape`.
    pub fn byte_len(&self, shape: &[usize]) -> Result<usize> {
        let width = self.width().ok_or_else(|| {
            PipeDataError::UnsupportedType(format!("{} has no fixed element width", self))
        })?;
        element_count(shape)?
            .checked_mul(width)
            .ok_or_else(|| too_large(*self, shape))
    }
}

/// Product of `shape`, rejecting shapes whose size overflows.
pub(crate) fn element_count(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |n, &d| n.checked_mul(d))
        .ok_or_else(|| {
            PipeDataError::Serialization(format!("array shape {:?} is too large", shape))
        })
}

fn too_large(dtype: NDArrayType, shape: &[usize]) -> PipeDataError {
    PipeDataError::Serialization(format!("{} array of shape {:?} is too large", dtype, shape))
}

impl fmt::Display for NDArrayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A concrete backing representation for [`NDArray`].
pub trait ArrayRepr: Any + Send + Sync + fmt::Debug {
    fn format(&self) -> Format;
    fn dtype(&self) -> NDArrayType;
    fn shape(&self) -> &[usize];
    /// Elements in row-major order, little-endian.
    fn to_le_bytes(&self) -> Result<Bytes>;
    fn as_any(&self) -> &dyn Any;
}

/// Handle over a numeric array in one of several representations.
#[derive(Clone)]
pub struct NDArray {
    repr: Arc<dyn ArrayRepr>,
}

impl NDArray {
    pub fn new<R: ArrayRepr>(repr: R) -> Self {
        Self {
            repr: Arc::new(repr),
        }
    }

    pub fn format(&self) -> Format {
        self.repr.format()
    }

    pub fn dtype(&self) -> NDArrayType {
        self.repr.dtype()
    }

    pub fn shape(&self) -> &[usize] {
        self.repr.shape()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_le_bytes(&self) -> Result<Bytes> {
        self.repr.to_le_bytes()
    }

    pub fn repr(&self) -> &dyn ArrayRepr {
        self.repr.as_ref()
    }

    /// The backing representation, if it is a `T`.
    pub fn downcast_ref<T: ArrayRepr>(&self) -> Option<&T> {
        self.repr.as_any().downcast_ref::<T>()
    }

    /// The array in representation `T`, converting through `registry` when
    /// the handle holds something else.
    pub fn get_as<T: ArrayRepr + FormatTag + Clone>(&self, registry: &FormatRegistry) -> Result<T> {
        if let Some(repr) = self.downcast_ref::<T>() {
            return Ok(repr.clone());
        }
        let converted = registry.arrays().convert(self, Format::of::<T>())?;
        converted.downcast_ref::<T>().cloned().ok_or_else(|| {
            PipeDataError::UnsupportedType(format!(
                "converter produced {} instead of {}",
                converted.format(),
                T::NAME
            ))
        })
    }

    pub fn convert_to(&self, to: Format, registry: &FormatRegistry) -> Result<NDArray> {
        registry.arrays().convert(self, to)
    }
}

impl Handle for NDArray {
    fn format(&self) -> Format {
        self.repr.format()
    }
}

impl PartialEq for NDArray {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.repr, &other.repr) {
            return true;
        }
        self.dtype() == other.dtype()
            && self.shape() == other.shape()
            && match (self.to_le_bytes(), other.to_le_bytes()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            }
    }
}

impl fmt::Debug for NDArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NDArray")
            .field("format", &self.format())
            .field("dtype", &self.dtype())
            .field("shape", &self.shape())
            .finish()
    }
}

macro_rules! ndarray_from_native {
    ($($elem:ty),*) => {
        $(
            impl From<ndarray::ArrayD<$elem>> for NDArray {
                fn from(array: ndarray::ArrayD<$elem>) -> Self {
                    NDArray::new(NativeArray::from(array))
                }
            }

            impl From<ndarray::ArcArray<$elem, ndarray::IxDyn>> for NDArray {
                fn from(array: ndarray::ArcArray<$elem, ndarray::IxDyn>) -> Self {
                    NDArray::new(NativeArray::from(array))
                }
            }
        )*
    };
}

ndarray_from_native!(f64, f32, i64, i32, i16, i8, u8);

impl From<NativeArray> for NDArray {
    fn from(array: NativeArray) -> Self {
        NDArray::new(array)
    }
}

fn native_to_serialized(from: &NDArray) -> Result<NDArray> {
    let native = expect_repr::<NativeArray>(from)?;
    Ok(NDArray::new(SerializedArray::new(
        native.dtype(),
        native.shape().to_vec(),
        native.encode_le(),
    )?))
}

fn serialized_to_native(from: &NDArray) -> Result<NDArray> {
    let serialized = expect_repr::<SerializedArray>(from)?;
    Ok(NDArray::new(NativeArray::from_le_bytes(
        serialized.dtype(),
        serialized.shape(),
        serialized.buffer(),
    )?))
}

fn any_to_serialized(from: &NDArray) -> Result<NDArray> {
    Ok(NDArray::new(SerializedArray::new(
        from.dtype(),
        from.shape().to_vec(),
        from.to_le_bytes()?,
    )?))
}

pub(crate) fn expect_repr<T: ArrayRepr + FormatTag>(handle: &NDArray) -> Result<&T> {
    handle
        .downcast_ref::<T>()
        .ok_or_else(|| PipeDataError::ConversionCapability {
            from: handle.format().name().to_string(),
            to: T::NAME.to_string(),
        })
}

/// Register the native and serialized converters.
pub fn register_defaults(registry: &mut ConverterRegistry<NDArray>) {
    registry
        .register(FnConverter::exact(
            "native-to-serialized",
            Format::of::<NativeArray>(),
            Format::of::<SerializedArray>(),
            native_to_serialized,
        ))
        .register(FnConverter::exact(
            "serialized-to-native",
            Format::of::<SerializedArray>(),
            Format::of::<NativeArray>(),
            serialized_to_native,
        ))
        .register(FnConverter::any_source(
            "canonical-bytes",
            Format::of::<SerializedArray>(),
            any_to_serialized,
        ));
}

use super::{ArrayRepr, NDArrayType};
use crate::error::{PipeDataError, Result};
use crate::format::{Format, FormatTag};
use bytes::Bytes;
use ndarray::{ArcArray, ArrayD, IxDyn};
use std::any::Any;
use std::fmt;

/// Element-wise arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Scalar operand for array/scalar arithmetic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

/// Element types with a native representation.
pub trait Element: bytemuck::Pod + Send + Sync + fmt::Debug + 'static {
    const DTYPE: NDArrayType;

    fn apply(op: ArithOp, a: Self, b: Self) -> Result<Self>;
    fn from_scalar(s: Scalar) -> Self;
    fn to_f64(self) -> f64;
    fn from_le(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut Vec<u8>);
    fn extract(array: &NativeArray) -> Option<&ArcArray<Self, IxDyn>>;
}

macro_rules! element_common {
    ($t:ty, $variant:ident) => {
        const DTYPE: NDArrayType = NDArrayType::$variant;

        fn to_f64(self) -> f64 {
            self as f64
        }

        fn from_le(bytes: &[u8]) -> Self {
            let mut buf = [0u8; std::mem::size_of::<$t>()];
            buf.copy_from_slice(bytes);
            <$t>::from_le_bytes(buf)
        }

        fn write_le(self, out: &mut Vec<u8>) {
            out.extend_from_slice(&self.to_le_bytes());
        }

        fn extract(array: &NativeArray) -> Option<&ArcArray<Self, IxDyn>> {
            match array {
                NativeArray::$variant(a) => Some(a),
                _ => None,
            }
        }
    };
}

macro_rules! int_element {
    ($($t:ty => $variant:ident),*) => {
        $(
            impl Element for $t {
                element_common!($t, $variant);

                fn apply(op: ArithOp, a: Self, b: Self) -> Result<Self> {
                    match op {
                        ArithOp::Add => Ok(a.wrapping_add(b)),
                        ArithOp::Sub => Ok(a.wrapping_sub(b)),
                        ArithOp::Mul => Ok(a.wrapping_mul(b)),
                        ArithOp::Div => a.checked_div(b).ok_or_else(|| {
                            PipeDataError::Arithmetic(format!(
                                "{} division {} / {} is undefined",
                                NDArrayType::$variant, a, b
                            ))
                        }),
                    }
                }

                fn from_scalar(s: Scalar) -> Self {
                    match s {
                        Scalar::Int(i) => i as $t,
                        Scalar::Float(f) => f as $t,
                    }
                }
            }
        )*
    };
}

macro_rules! float_element {
    ($($t:ty => $variant:ident),*) => {
        $(
            impl Element for $t {
                element_common!($t, $variant);

                fn apply(op: ArithOp, a: Self, b: Self) -> Result<Self> {
                    Ok(match op {
                        ArithOp::Add => a + b,
                        ArithOp::Sub => a - b,
                        ArithOp::Mul => a * b,
                        ArithOp::Div => a / b,
                    })
                }

                fn from_scalar(s: Scalar) -> Self {
                    match s {
                        Scalar::Int(i) => i as $t,
                        Scalar::Float(f) => f as $t,
                    }
                }
            }
        )*
    };
}

int_element!(i64 => Int64, i32 => Int32, i16 => Int16, i8 => Int8, u8 => UInt8);
float_element!(f64 => Double, f32 => Float);

/// In-process array backed by a shared `ndarray` buffer.
///
/// Clones share the buffer; operations always allocate a new one.
#[derive(Debug, Clone)]
pub enum NativeArray {
    Double(ArcArray<f64, IxDyn>),
    Float(ArcArray<f32, IxDyn>),
    Int64(ArcArray<i64, IxDyn>),
    Int32(ArcArray<i32, IxDyn>),
    Int16(ArcArray<i16, IxDyn>),
    Int8(ArcArray<i8, IxDyn>),
    UInt8(ArcArray<u8, IxDyn>),
}

macro_rules! dispatch {
    ($value:expr, $a:ident => $body:expr) => {
        match $value {
            NativeArray::Double($a) => $body,
            NativeArray::Float($a) => $body,
            NativeArray::Int64($a) => $body,
            NativeArray::Int32($a) => $body,
            NativeArray::Int16($a) => $body,
            NativeArray::Int8($a) => $body,
            NativeArray::UInt8($a) => $body,
        }
    };
}

macro_rules! dispatch_same {
    ($value:expr, $a:ident => $body:expr) => {
        match $value {
            NativeArray::Double($a) => NativeArray::Double($body),
            NativeArray::Float($a) => NativeArray::Float($body),
            NativeArray::Int64($a) => NativeArray::Int64($body),
            NativeArray::Int32($a) => NativeArray::Int32($body),
            NativeArray::Int16($a) => NativeArray::Int16($body),
            NativeArray::Int8($a) => NativeArray::Int8($body),
            NativeArray::UInt8($a) => NativeArray::UInt8($body),
        }
    };
}

fn encode<T: Element>(a: &ArcArray<T, IxDyn>) -> Bytes {
    if cfg!(target_endian = "little") {
        if let Some(slice) = a.as_slice() {
            return Bytes::copy_from_slice(bytemuck::cast_slice(slice));
        }
    }
    let mut out = Vec::with_capacity(a.len() * std::mem::size_of::<T>());
    for v in a.iter() {
        v.write_le(&mut out);
    }
    Bytes::from(out)
}

fn decode<T: Element>(shape: &[usize], bytes: &[u8]) -> Result<ArcArray<T, IxDyn>> {
    let values = bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(T::from_le)
        .collect();
    shaped(shape, values)
}

fn shaped<T>(shape: &[usize], values: Vec<T>) -> Result<ArcArray<T, IxDyn>> {
    ArrayD::from_shape_vec(IxDyn(shape), values)
        .map(ArrayD::into_shared)
        .map_err(|e| PipeDataError::Serialization(format!("bad array shape {:?}: {}", shape, e)))
}

fn zip_with<T: Element>(
    a: &ArcArray<T, IxDyn>,
    b: &ArcArray<T, IxDyn>,
    op: ArithOp,
) -> Result<ArcArray<T, IxDyn>> {
    if a.shape() != b.shape() {
        return Err(PipeDataError::Arithmetic(format!(
            "shape mismatch: {:?} {} {:?}",
            a.shape(),
            op,
            b.shape()
        )));
    }
    let values = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| T::apply(op, *x, *y))
        .collect::<Result<Vec<_>>>()?;
    shaped(a.shape(), values)
}

fn with_scalar<T: Element>(
    a: &ArcArray<T, IxDyn>,
    scalar: Scalar,
    op: ArithOp,
    scalar_first: bool,
) -> Result<ArcArray<T, IxDyn>> {
    let s = T::from_scalar(scalar);
    let values = a
        .iter()
        .map(|x| {
            if scalar_first {
                T::apply(op, s, *x)
            } else {
                T::apply(op, *x, s)
            }
        })
        .collect::<Result<Vec<_>>>()?;
    shaped(a.shape(), values)
}

impl NativeArray {
    pub fn dtype(&self) -> NDArrayType {
        match self {
            NativeArray::Double(_) => NDArrayType::Double,
            NativeArray::Float(_) => NDArrayType::Float,
            NativeArray::Int64(_) => NDArrayType::Int64,
            NativeArray::Int32(_) => NDArrayType::Int32,
            NativeArray::Int16(_) => NDArrayType::Int16,
            NativeArray::Int8(_) => NDArrayType::Int8,
            NativeArray::UInt8(_) => NDArrayType::UInt8,
        }
    }

    pub fn shape(&self) -> &[usize] {
        dispatch!(self, a => a.shape())
    }

    pub fn len(&self) -> usize {
        dispatch!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_float(&self) -> bool {
        matches!(self, NativeArray::Double(_) | NativeArray::Float(_))
    }

    /// The underlying array when the element type is `T`.
    pub fn as_array<T: Element>(&self) -> Option<&ArcArray<T, IxDyn>> {
        T::extract(self)
    }

    /// Row-major little-endian copy of the elements.
    pub fn encode_le(&self) -> Bytes {
        dispatch!(self, a => encode(a))
    }

    /// Deep-copy `bytes` into a new native array.
    pub fn from_le_bytes(dtype: NDArrayType, shape: &[usize], bytes: &[u8]) -> Result<Self> {
        dtype.width().ok_or_else(|| unsupported(dtype))?;
        let expected = dtype.byte_len(shape)?;
        if bytes.len() != expected {
            return Err(PipeDataError::Serialization(format!(
                "{} array of shape {:?} needs {} bytes, got {}",
                dtype,
                shape,
                expected,
                bytes.len()
            )));
        }
        Ok(match dtype {
            NDArrayType::Double => NativeArray::Double(decode(shape, bytes)?),
            NDArrayType::Float => NativeArray::Float(decode(shape, bytes)?),
            NDArrayType::Int64 => NativeArray::Int64(decode(shape, bytes)?),
            NDArrayType::Int32 => NativeArray::Int32(decode(shape, bytes)?),
            NDArrayType::Int16 => NativeArray::Int16(decode(shape, bytes)?),
            NDArrayType::Int8 => NativeArray::Int8(decode(shape, bytes)?),
            NDArrayType::UInt8 => NativeArray::UInt8(decode(shape, bytes)?),
            other => return Err(unsupported(other)),
        })
    }

    /// A DOUBLE array of the given shape.
    pub fn from_f64_vec(shape: &[usize], values: Vec<f64>) -> Result<Self> {
        shaped(shape, values).map(NativeArray::Double)
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        dispatch!(self, a => a.iter().map(|v| v.to_f64()).collect())
    }

    /// Element-wise copy as DOUBLE.
    pub fn to_f64_array(&self) -> ArcArray<f64, IxDyn> {
        dispatch!(self, a => a.mapv(|v| v.to_f64()).into_shared())
    }

    pub fn sum(&self) -> f64 {
        dispatch!(self, a => a.iter().map(|v| v.to_f64()).sum())
    }

    /// Element-wise `self op other`. Both sides must share dtype and shape.
    pub fn binary(&self, op: ArithOp, other: &NativeArray) -> Result<NativeArray> {
        Ok(match (self, other) {
            (NativeArray::Double(a), NativeArray::Double(b)) => NativeArray::Double(zip_with(a, b, op)?),
            (NativeArray::Float(a), NativeArray::Float(b)) => NativeArray::Float(zip_with(a, b, op)?),
            (NativeArray::Int64(a), NativeArray::Int64(b)) => NativeArray::Int64(zip_with(a, b, op)?),
            (NativeArray::Int32(a), NativeArray::Int32(b)) => NativeArray::Int32(zip_with(a, b, op)?),
            (NativeArray::Int16(a), NativeArray::Int16(b)) => NativeArray::Int16(zip_with(a, b, op)?),
            (NativeArray::Int8(a), NativeArray::Int8(b)) => NativeArray::Int8(zip_with(a, b, op)?),
            (NativeArray::UInt8(a), NativeArray::UInt8(b)) => NativeArray::UInt8(zip_with(a, b, op)?),
            _ => {
                return Err(PipeDataError::Arithmetic(format!(
                    "dtype mismatch: {} {} {}",
                    self.dtype(),
                    op,
                    other.dtype()
                )))
            }
        })
    }

    /// Element-wise arithmetic with a scalar. Integer arrays combined with
    /// a float scalar are promoted to DOUBLE.
    pub fn scalar(&self, op: ArithOp, scalar: Scalar, scalar_first: bool) -> Result<NativeArray> {
        if matches!(scalar, Scalar::Float(_)) && !self.is_float() {
            let promoted = self.to_f64_array();
            return Ok(NativeArray::Double(with_scalar(&promoted, scalar, op, scalar_first)?));
        }
        Ok(dispatch_same!(self, a => with_scalar(a, scalar, op, scalar_first)?))
    }
}

fn unsupported(dtype: NDArrayType) -> PipeDataError {
    PipeDataError::UnsupportedType(format!("{} arrays have no native representation", dtype))
}

impl FormatTag for NativeArray {
    const NAME: &'static str = "NativeArray";
}

impl ArrayRepr for NativeArray {
    fn format(&self) -> Format {
        Format::of::<NativeArray>()
    }

    fn dtype(&self) -> NDArrayType {
        NativeArray::dtype(self)
    }

    fn shape(&self) -> &[usize] {
        NativeArray::shape(self)
    }

    fn to_le_bytes(&self) -> Result<Bytes> {
        Ok(self.encode_le())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

macro_rules! native_from {
    ($($t:ty => $variant:ident),*) => {
        $(
            impl From<ArrayD<$t>> for NativeArray {
                fn from(array: ArrayD<$t>) -> Self {
                    NativeArray::$variant(array.into_shared())
                }
            }

            impl From<ArcArray<$t, IxDyn>> for NativeArray {
                fn from(array: ArcArray<$t, IxDyn>) -> Self {
                    NativeArray::$variant(array)
                }
            }
        )*
    };
}

native_from!(f64 => Double, f32 => Float, i64 => Int64, i32 => Int32, i16 => Int16, i8 => Int8, u8 => UInt8);

//! Value kinds stored in a [`Data`] container.

use super::bbox::BoundingBox;
use super::Data;
use crate::array::NDArray;
use crate::error::{PipeDataError, Result};
use crate::imaging::Image;
use std::fmt;

/// Closed set of value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    Int64,
    Double,
    Boolean,
    Bytes,
    Image,
    NDArray,
    BoundingBox,
    Data,
    List,
}

impl ValueType {
    /// All kinds, in declaration order.
    pub const ALL: [ValueType; 10] = [
        ValueType::String,
        ValueType::Int64,
        ValueType::Double,
        ValueType::Boolean,
        ValueType::Bytes,
        ValueType::Image,
        ValueType::NDArray,
        ValueType::BoundingBox,
        ValueType::Data,
        ValueType::List,
    ];

    /// Canonical upper-case name, as used in serialized forms.
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::String => "STRING",
            ValueType::Int64 => "INT64",
            ValueType::Double => "DOUBLE",
            ValueType::Boolean => "BOOLEAN",
            ValueType::Bytes => "BYTES",
            ValueType::Image => "IMAGE",
            ValueType::NDArray => "NDARRAY",
            ValueType::BoundingBox => "BOUNDING_BOX",
            ValueType::Data => "DATA",
            ValueType::List => "LIST",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == name)
            .ok_or_else(|| PipeDataError::UnsupportedType(format!("unknown value type \"{}\"", name)))
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single typed value. The variant is the type tag.
#[derive(Debug, Clone)]
pub enum Value {
    String(String),
    Int64(i64),
    Double(f64),
    Boolean(bool),
    Bytes(Vec<u8>),
    Image(Image),
    NDArray(NDArray),
    BoundingBox(BoundingBox),
    Data(Data),
    List(List),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::Int64(_) => ValueType::Int64,
            Value::Double(_) => ValueType::Double,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Bytes(_) => ValueType::Bytes,
            Value::Image(_) => ValueType::Image,
            Value::NDArray(_) => ValueType::NDArray,
            Value::BoundingBox(_) => ValueType::BoundingBox,
            Value::Data(_) => ValueType::Data,
            Value::List(_) => ValueType::List,
        }
    }
}

/// Doubles compare equal when both are NaN.
pub(crate) fn double_eq(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => double_eq(*a, *b),
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Image(a), Value::Image(b)) => a == b,
            (Value::NDArray(a), Value::NDArray(b)) => a == b,
            (Value::BoundingBox(a), Value::BoundingBox(b)) => a == b,
            (Value::Data(a), Value::Data(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    String => String,
    &str => String,
    i64 => Int64,
    i32 => Int64,
    f64 => Double,
    bool => Boolean,
    Vec<u8> => Bytes,
    &[u8] => Bytes,
    Image => Image,
    NDArray => NDArray,
    BoundingBox => BoundingBox,
    Data => Data,
    List => List,
}

/// A homogeneous list. There is no list-of-lists variant.
#[derive(Debug, Clone)]
pub enum List {
    String(Vec<String>),
    Int64(Vec<i64>),
    Double(Vec<f64>),
    Boolean(Vec<bool>),
    Bytes(Vec<Vec<u8>>),
    Image(Vec<Image>),
    NDArray(Vec<NDArray>),
    BoundingBox(Vec<BoundingBox>),
    Data(Vec<Data>),
}

macro_rules! list_dispatch {
    ($list:expr, $items:ident => $body:expr) => {
        match $list {
            List::String($items) => $body,
            List::Int64($items) => $body,
            List::Double($items) => $body,
            List::Boolean($items) => $body,
            List::Bytes($items) => $body,
            List::Image($items) => $body,
            List::NDArray($items) => $body,
            List::BoundingBox($items) => $body,
            List::Data($items) => $body,
        }
    };
}

impl List {
    /// An empty list with the given element type. `LIST` is rejected.
    pub fn empty(key: &str, element_type: ValueType) -> Result<Self> {
        Ok(match element_type {
            ValueType::String => List::String(Vec::new()),
            ValueType::Int64 => List::Int64(Vec::new()),
            ValueType::Double => List::Double(Vec::new()),
            ValueType::Boolean => List::Boolean(Vec::new()),
            ValueType::Bytes => List::Bytes(Vec::new()),
            ValueType::Image => List::Image(Vec::new()),
            ValueType::NDArray => List::NDArray(Vec::new()),
            ValueType::BoundingBox => List::BoundingBox(Vec::new()),
            ValueType::Data => List::Data(Vec::new()),
            ValueType::List => {
                return Err(PipeDataError::NestedList {
                    key: key.to_string(),
                })
            }
        })
    }

    /// Build a list of `element_type` from loose values.
    ///
    /// Every element must already carry `element_type`; a mismatch is
    /// reported against `key[index]`.
    pub fn from_values(key: &str, element_type: ValueType, values: Vec<Value>) -> Result<Self> {
        let mut list = Self::empty(key, element_type)?;
        for (i, value) in values.into_iter().enumerate() {
            list.push(key, i, value)?;
        }
        Ok(list)
    }

    fn push(&mut self, key: &str, index: usize, value: Value) -> Result<()> {
        let expected = self.element_type();
        match (self, value) {
            (List::String(items), Value::String(v)) => items.push(v),
            (List::Int64(items), Value::Int64(v)) => items.push(v),
            (List::Double(items), Value::Double(v)) => items.push(v),
            (List::Boolean(items), Value::Boolean(v)) => items.push(v),
            (List::Bytes(items), Value::Bytes(v)) => items.push(v),
            (List::Image(items), Value::Image(v)) => items.push(v),
            (List::NDArray(items), Value::NDArray(v)) => items.push(v),
            (List::BoundingBox(items), Value::BoundingBox(v)) => items.push(v),
            (List::Data(items), Value::Data(v)) => items.push(v),
            (_, Value::List(_)) => {
                return Err(PipeDataError::NestedList {
                    key: format!("{}[{}]", key, index),
                })
            }
            (_, other) => {
                return Err(PipeDataError::type_mismatch(
                    &format!("{}[{}]", key, index),
                    expected,
                    other.value_type(),
                ))
            }
        }
        Ok(())
    }

    pub fn element_type(&self) -> ValueType {
        match self {
            List::String(_) => ValueType::String,
            List::Int64(_) => ValueType::Int64,
            List::Double(_) => ValueType::Double,
            List::Boolean(_) => ValueType::Boolean,
            List::Bytes(_) => ValueType::Bytes,
            List::Image(_) => ValueType::Image,
            List::NDArray(_) => ValueType::NDArray,
            List::BoundingBox(_) => ValueType::BoundingBox,
            List::Data(_) => ValueType::Data,
        }
    }

    pub fn len(&self) -> usize {
        list_dispatch!(self, items => items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index` as a loose value.
    pub fn get(&self, index: usize) -> Option<Value> {
        list_dispatch!(self, items => items.get(index).cloned().map(Value::from))
    }

    /// All elements as loose values, in order.
    pub fn to_values(&self) -> Vec<Value> {
        list_dispatch!(self, items => items.iter().cloned().map(Value::from).collect())
    }

    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            List::String(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_int64s(&self) -> Option<&[i64]> {
        match self {
            List::Int64(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_doubles(&self) -> Option<&[f64]> {
        match self {
            List::Double(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_booleans(&self) -> Option<&[bool]> {
        match self {
            List::Boolean(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_bounding_boxes(&self) -> Option<&[BoundingBox]> {
        match self {
            List::BoundingBox(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_ndarrays(&self) -> Option<&[NDArray]> {
        match self {
            List::NDArray(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_images(&self) -> Option<&[Image]> {
        match self {
            List::Image(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&[Data]> {
        match self {
            List::Data(items) => Some(items),
            _ => None,
        }
    }
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (List::String(a), List::String(b)) => a == b,
            (List::Int64(a), List::Int64(b)) => a == b,
            (List::Double(a), List::Double(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| double_eq(*x, *y))
            }
            (List::Boolean(a), List::Boolean(b)) => a == b,
            (List::Bytes(a), List::Bytes(b)) => a == b,
            (List::Image(a), List::Image(b)) => a == b,
            (List::NDArray(a), List::NDArray(b)) => a == b,
            (List::BoundingBox(a), List::BoundingBox(b)) => a == b,
            (List::Data(a), List::Data(b)) => a == b,
            _ => false,
        }
    }
}

macro_rules! list_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for List {
                fn from(items: Vec<$ty>) -> Self {
                    List::$variant(items)
                }
            }
        )*
    };
}

list_from! {
    String => String,
    i64 => Int64,
    f64 => Double,
    bool => Boolean,
    Vec<u8> => Bytes,
    Image => Image,
    NDArray => NDArray,
    BoundingBox => BoundingBox,
    Data => Data,
}

impl From<Vec<&str>> for List {
    fn from(items: Vec<&str>) -> Self {
        List::String(items.into_iter().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_names_round_trip() {
        for t in ValueType::ALL {
            assert_eq!(ValueType::from_name(t.name()).unwrap(), t);
        }
        assert!(ValueType::from_name("FLOAT").is_err());
    }

    #[test]
    fn test_value_reports_its_type() {
        assert_eq!(Value::from("x").value_type(), ValueType::String);
        assert_eq!(Value::from(3i64).value_type(), ValueType::Int64);
        assert_eq!(Value::from(vec![1u8]).value_type(), ValueType::Bytes);
        assert_eq!(
            Value::from(List::from(vec![1.0, 2.0])).value_type(),
            ValueType::List
        );
    }

    #[test]
    fn test_nan_doubles_are_equal() {
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert_ne!(Value::Double(1.0), Value::Double(f64::NAN));
        assert_eq!(List::from(vec![f64::NAN]), List::from(vec![f64::NAN]));
    }

    #[test]
    fn test_list_from_values_rejects_mixed_elements() {
        let err = List::from_values(
            "xs",
            ValueType::Int64,
            vec![Value::Int64(1), Value::String("two".into())],
        )
        .unwrap_err();
        match err {
            PipeDataError::TypeMismatch { key, expected, actual } => {
                assert_eq!(key, "xs[1]");
                assert_eq!(expected, ValueType::Int64);
                assert_eq!(actual, ValueType::String);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_list_of_lists_is_rejected() {
        assert!(matches!(
            List::empty("xs", ValueType::List),
            Err(PipeDataError::NestedList { .. })
        ));
        let inner = Value::List(List::from(vec![1i64]));
        assert!(matches!(
            List::from_values("xs", ValueType::Int64, vec![inner]),
            Err(PipeDataError::NestedList { .. })
        ));
    }

    #[test]
    fn test_empty_list_keeps_element_type() {
        let list = List::empty("xs", ValueType::BoundingBox).unwrap();
        assert!(list.is_empty());
        assert_eq!(list.element_type(), ValueType::BoundingBox);
        assert_ne!(list, List::empty("xs", ValueType::String).unwrap());
    }
}

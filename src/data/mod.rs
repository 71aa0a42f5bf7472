//! The pipeline value container.
//!
//! [`Data`] is the record every pipeline step consumes and produces: an
//! ordered map from non-empty string keys to typed [`Value`]s, plus an
//! optional nested metadata record.
//!
//! - Keys keep their insertion order. Re-inserting a key replaces its value
//!   (and possibly its type) without moving it.
//! - Typed getters never coerce: reading a `DOUBLE` through
//!   [`Data::get_long`] is a [`PipeDataError::TypeMismatch`].
//! - Equality ignores key order but covers metadata.
//!
//! JSON and binary codecs live in the `json` and `binary` submodules.

mod bbox;
mod binary;
mod json;
mod value;

pub use bbox::BoundingBox;
pub use value::{List, Value, ValueType};

use crate::array::NDArray;
use crate::error::{PipeDataError, Result};
use crate::imaging::Image;
use std::collections::HashMap;

/// Ordered, heterogeneously typed key/value record.
#[derive(Debug, Clone, Default)]
pub struct Data {
    entries: Vec<(String, Value)>,
    index: HashMap<String, usize>,
    meta: Option<Box<Data>>,
}

macro_rules! typed_getter {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $ret:ty, |$v:ident| $conv:expr) => {
        $(#[$doc])*
        pub fn $name(&self, key: &str) -> Result<$ret> {
            match self.get(key)? {
                Value::$variant($v) => Ok($conv),
                other => Err(PipeDataError::type_mismatch(
                    key,
                    ValueType::$variant,
                    other.value_type(),
                )),
            }
        }
    };
}

macro_rules! typed_put {
    ($name:ident, $variant:ident, $arg:ty) => {
        pub fn $name(&mut self, key: impl Into<String>, value: $arg) -> Result<()> {
            self.put(key, Value::$variant(value))
        }
    };
}

impl Data {
    pub fn new() -> Self {
        Self::default()
    }

    /// A container holding exactly one entry.
    pub fn singleton(key: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        let mut data = Self::new();
        data.put(key, value)?;
        Ok(data)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Result<&Value> {
        self.index
            .get(key)
            .map(|&i| &self.entries[i].1)
            .ok_or_else(|| PipeDataError::not_found(key))
    }

    pub fn type_of(&self, key: &str) -> Result<ValueType> {
        self.get(key).map(Value::value_type)
    }

    /// Element type of the list stored under `key`.
    pub fn list_type(&self, key: &str) -> Result<ValueType> {
        self.get_list(key).map(List::element_type)
    }

    /// Insert or overwrite `key`. An existing key keeps its position.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(PipeDataError::InvalidKey(
                "keys must be non-empty strings".to_string(),
            ));
        }
        let value = value.into();
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let position = self.index.remove(key)?;
        let (_, value) = self.entries.remove(position);
        for (k, _) in &self.entries[position..] {
            if let Some(i) = self.index.get_mut(k) {
                *i -= 1;
            }
        }
        Some(value)
    }

    typed_getter!(get_string, String, &str, |v| v.as_str());
    typed_getter!(
        /// The INT64 stored under `key`.
        get_long, Int64, i64, |v| *v
    );
    typed_getter!(get_double, Double, f64, |v| *v);
    typed_getter!(get_boolean, Boolean, bool, |v| *v);
    typed_getter!(get_bytes, Bytes, &[u8], |v| v.as_slice());
    typed_getter!(get_image, Image, &Image, |v| v);
    typed_getter!(get_ndarray, NDArray, &NDArray, |v| v);
    typed_getter!(get_bounding_box, BoundingBox, &BoundingBox, |v| v);
    typed_getter!(get_data, Data, &Data, |v| v);
    typed_getter!(get_list, List, &List, |v| v);

    pub fn get_data_mut(&mut self, key: &str) -> Result<&mut Data> {
        let i = *self.index.get(key).ok_or_else(|| PipeDataError::not_found(key))?;
        match &mut self.entries[i].1 {
            Value::Data(d) => Ok(d),
            other => Err(PipeDataError::type_mismatch(
                key,
                ValueType::Data,
                other.value_type(),
            )),
        }
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.put(key, Value::String(value.into()))
    }

    typed_put!(put_long, Int64, i64);
    typed_put!(put_double, Double, f64);
    typed_put!(put_boolean, Boolean, bool);

    pub fn put_bytes(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Result<()> {
        self.put(key, Value::Bytes(value.into()))
    }

    typed_put!(put_image, Image, Image);
    typed_put!(put_ndarray, NDArray, NDArray);
    typed_put!(put_bounding_box, BoundingBox, BoundingBox);
    typed_put!(put_data, Data, Data);

    pub fn put_list(&mut self, key: impl Into<String>, value: impl Into<List>) -> Result<()> {
        self.put(key, Value::List(value.into()))
    }

    /// Store a list built from loose values, checking that each element has
    /// `element_type`.
    pub fn put_list_of(
        &mut self,
        key: impl Into<String>,
        element_type: ValueType,
        values: Vec<Value>,
    ) -> Result<()> {
        let key = key.into();
        let list = List::from_values(&key, element_type, values)?;
        self.put(key, list)
    }

    pub fn has_meta_data(&self) -> bool {
        self.meta.is_some()
    }

    pub fn meta_data(&self) -> Option<&Data> {
        self.meta.as_deref()
    }

    pub fn set_meta_data(&mut self, meta: Data) {
        self.meta = Some(Box::new(meta));
    }

    /// The single key holding a value of type `value_type`.
    ///
    /// With `allow_lists`, a list whose element type is `value_type` also
    /// counts. Fails when no key or more than one key qualifies.
    pub fn infer_field(&self, value_type: ValueType, allow_lists: bool) -> Result<&str> {
        self.unique_key(
            |v| {
                v.value_type() == value_type
                    || (allow_lists
                        && matches!(v, Value::List(l) if l.element_type() == value_type))
            },
            &value_type.to_string(),
        )
    }

    /// The single key holding a list of `element_type`.
    pub fn infer_list_field(&self, element_type: ValueType) -> Result<&str> {
        self.unique_key(
            |v| matches!(v, Value::List(l) if l.element_type() == element_type),
            &format!("LIST<{}>", element_type),
        )
    }

    fn unique_key(&self, matches: impl Fn(&Value) -> bool, wanted: &str) -> Result<&str> {
        let mut found = self.iter().filter(|(_, v)| matches(v)).map(|(k, _)| k);
        match (found.next(), found.next()) {
            (Some(key), None) => Ok(key),
            (None, _) => Err(PipeDataError::FieldInference(format!(
                "no field of type {} in {:?}",
                wanted,
                self.keys()
            ))),
            (Some(first), Some(second)) => Err(PipeDataError::FieldInference(format!(
                "several fields of type {} (\"{}\", \"{}\", ...)",
                wanted, first, second
            ))),
        }
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).map_or(false, |o| o == v))
            && self.meta == other.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_keep_insertion_order() {
        let mut data = Data::new();
        data.put_long("b", 1).unwrap();
        data.put_string("a", "x").unwrap();
        data.put_double("c", 2.5).unwrap();
        assert_eq!(data.keys(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_overwrite_retypes_in_place() {
        let mut data = Data::new();
        data.put_long("a", 1).unwrap();
        data.put_long("b", 2).unwrap();
        data.put_string("a", "now a string").unwrap();

        assert_eq!(data.keys(), vec!["a", "b"]);
        assert_eq!(data.type_of("a").unwrap(), ValueType::String);
        assert_eq!(data.get_string("a").unwrap(), "now a string");
        assert!(matches!(
            data.get_long("a"),
            Err(PipeDataError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_wrong_accessor_names_key_and_types() {
        let data = Data::singleton("k", 1.5).unwrap();
        match data.get_boolean("k").unwrap_err() {
            PipeDataError::TypeMismatch { key, expected, actual } => {
                assert_eq!(key, "k");
                assert_eq!(expected, ValueType::Boolean);
                assert_eq!(actual, ValueType::Double);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_key() {
        let data = Data::new();
        assert!(matches!(
            data.get_string("nope"),
            Err(PipeDataError::ValueNotFound { .. })
        ));
        assert!(matches!(
            data.type_of("nope"),
            Err(PipeDataError::ValueNotFound { .. })
        ));
    }

    #[test]
    fn test_empty_key_rejected() {
        let mut data = Data::new();
        assert!(matches!(
            data.put_long("", 1),
            Err(PipeDataError::InvalidKey(_))
        ));
        assert!(data.is_empty());
    }

    #[test]
    fn test_list_type_requires_list() {
        let mut data = Data::new();
        data.put_list("xs", vec![1i64, 2, 3]).unwrap();
        data.put_long("n", 3).unwrap();
        assert_eq!(data.list_type("xs").unwrap(), ValueType::Int64);
        assert!(matches!(
            data.list_type("n"),
            Err(PipeDataError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_put_list_of_rejects_nested_lists() {
        let mut data = Data::new();
        let err = data
            .put_list_of("xs", ValueType::List, Vec::new())
            .unwrap_err();
        assert!(matches!(err, PipeDataError::NestedList { .. }));
        assert!(!data.contains("xs"));
    }

    #[test]
    fn test_remove_reindexes_later_keys() {
        let mut data = Data::new();
        data.put_long("a", 1).unwrap();
        data.put_long("b", 2).unwrap();
        data.put_long("c", 3).unwrap();
        assert_eq!(data.remove("a"), Some(Value::Int64(1)));
        assert_eq!(data.keys(), vec!["b", "c"]);
        assert_eq!(data.get_long("c").unwrap(), 3);
        data.put_long("b", 20).unwrap();
        assert_eq!(data.keys(), vec!["b", "c"]);
        assert_eq!(data.remove("a"), None);
    }

    #[test]
    fn test_equality_ignores_order_but_not_meta() {
        let mut a = Data::new();
        a.put_long("x", 1).unwrap();
        a.put_string("y", "z").unwrap();
        let mut b = Data::new();
        b.put_string("y", "z").unwrap();
        b.put_long("x", 1).unwrap();
        assert_eq!(a, b);

        b.set_meta_data(Data::singleton("source", "camera").unwrap());
        assert_ne!(a, b);
        assert!(b.has_meta_data());
        assert_eq!(b.keys(), vec!["y", "x"]);
    }

    #[test]
    fn test_nested_data_mutation() {
        let mut outer = Data::new();
        outer.put_data("inner", Data::new()).unwrap();
        outer.get_data_mut("inner").unwrap().put_long("n", 7).unwrap();
        assert_eq!(outer.get_data("inner").unwrap().get_long("n").unwrap(), 7);
    }

    #[test]
    fn test_infer_field() {
        let mut data = Data::new();
        data.put_string("name", "a").unwrap();
        data.put_list("boxes", vec![BoundingBox::new(0.5, 0.5, 0.1, 0.1)])
            .unwrap();
        data.put_long("n", 1).unwrap();

        assert_eq!(data.infer_field(ValueType::String, false).unwrap(), "name");
        assert!(data.infer_field(ValueType::BoundingBox, false).is_err());
        assert_eq!(
            data.infer_field(ValueType::BoundingBox, true).unwrap(),
            "boxes"
        );
        assert_eq!(
            data.infer_list_field(ValueType::BoundingBox).unwrap(),
            "boxes"
        );

        data.put_string("other", "b").unwrap();
        assert!(matches!(
            data.infer_field(ValueType::String, false),
            Err(PipeDataError::FieldInference(_))
        ));
    }
}

//! Field values and records.
//!
//! A [`Record`] is the normalized, ordered field list of an entity. Custom
//! scalar types convert to the underlying primitive through [`IntoValue`] and
//! [`FromValue`], so the codec only ever sees a handful of value types.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CacheError, CacheResult, Entity, Key};

/// Primitive value types a field may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    String,
    Bytes,
    Timestamp,
    Key,
    /// Any primitive; the value's own type is recorded on the wire.
    Any,
}

impl ValueType {
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (ValueType::Any, v) => !matches!(v, Value::List(_) | Value::Record(_)),
            (expected, v) => v.value_type() == Some(expected),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::Bytes => "bytes",
            ValueType::Timestamp => "timestamp",
            ValueType::Key => "key",
            ValueType::Any => "any",
        }
    }
}

/// Raw byte string field value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blob(pub Vec<u8>);

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Key(Key),
    List(Vec<Value>),
    Record(Record),
}

impl Value {
    /// The primitive type of a scalar value; `None` for null, lists and records.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Int(_) => Some(ValueType::Int),
            Value::Float(_) => Some(ValueType::Float),
            Value::String(_) => Some(ValueType::String),
            Value::Bytes(_) => Some(ValueType::Bytes),
            Value::Timestamp(_) => Some(ValueType::Timestamp),
            Value::Key(_) => Some(ValueType::Key),
            Value::Null | Value::List(_) | Value::Record(_) => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            other => other.value_type().map(ValueType::name).unwrap_or("unknown"),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Ordering between two scalars of the same type.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Key(a), Value::Key(b)) => Some(a.encode().cmp(&b.encode())),
            _ => None,
        }
    }

    /// Turn this slot into a record, replacing anything else, and borrow it.
    pub(crate) fn make_record(&mut self) -> &mut Record {
        if !matches!(self, Value::Record(_)) {
            *self = Value::Record(Record::new());
        }
        match self {
            Value::Record(record) => record,
            _ => unreachable!("slot was just set to a record"),
        }
    }

    /// Turn this slot into a list, replacing anything else, and borrow it.
    pub(crate) fn make_list(&mut self) -> &mut Vec<Value> {
        if !matches!(self, Value::List(_)) {
            *self = Value::List(Vec::new());
        }
        match self {
            Value::List(list) => list,
            _ => unreachable!("slot was just set to a list"),
        }
    }
}

fn mismatch(field: &str, expected: &str, found: &Value) -> CacheError {
    CacheError::TypeMismatch {
        field: field.to_string(),
        expected: expected.to_string(),
        found: found.describe().to_string(),
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// Ordered field list of one entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Builder form of [`Record::set`].
    pub fn with(mut self, name: &str, value: impl IntoValue) -> Self {
        self.set(name, value.into_value());
        self
    }

    /// Add a nested entity as a record-valued field.
    pub fn with_nested<E: Entity>(self, name: &str, nested: &E) -> Self {
        self.with(name, Value::Record(nested.to_record()))
    }

    /// Add a list of nested entities as a repeated field.
    pub fn with_repeated<E: Entity>(self, name: &str, items: &[E]) -> Self {
        let values = items.iter().map(|e| Value::Record(e.to_record())).collect();
        self.with(name, Value::List(values))
    }

    /// Insert or replace a field, keeping its original position.
    pub fn set(&mut self, name: &str, value: Value) {
        *self.slot_mut(name) = value;
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Mutable slot for `name`, appending a null field when absent.
    pub(crate) fn slot_mut(&mut self, name: &str) -> &mut Value {
        let idx = match self.fields.iter().position(|(n, _)| n == name) {
            Some(idx) => idx,
            None => {
                self.fields.push((name.to_string(), Value::Null));
                self.fields.len() - 1
            }
        };
        &mut self.fields[idx].1
    }

    /// Remove and convert a field; missing and null fields yield the default.
    pub fn take<T: FromValue + Default>(&mut self, name: &str) -> CacheResult<T> {
        match self.remove(name) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => T::from_value(name, value),
        }
    }

    /// Remove and rebuild a nested entity; a missing field yields an entity
    /// built from an empty record.
    pub fn take_nested<E: Entity>(&mut self, name: &str) -> CacheResult<E> {
        match self.remove(name) {
            None | Some(Value::Null) => E::from_record(Record::new()),
            Some(Value::Record(record)) => E::from_record(record),
            Some(other) => Err(mismatch(name, "record", &other)),
        }
    }

    /// Remove and rebuild a list of nested entities.
    pub fn take_repeated<E: Entity>(&mut self, name: &str) -> CacheResult<Vec<E>> {
        match self.remove(name) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::List(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::Record(record) => E::from_record(record),
                    Value::Null => E::from_record(Record::new()),
                    other => Err(mismatch(name, "record", &other)),
                })
                .collect(),
            Some(other) => Err(mismatch(name, "list", &other)),
        }
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

pub trait IntoValue {
    fn into_value(self) -> Value;
}

pub trait FromValue: Sized {
    /// Convert a non-null value; `field` names the field for error messages.
    fn from_value(field: &str, value: Value) -> CacheResult<Self>;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl FromValue for Value {
    fn from_value(_field: &str, value: Value) -> CacheResult<Self> {
        Ok(value)
    }
}

macro_rules! scalar_conversions {
    ($ty:ty, $variant:ident, $expected:literal) => {
        impl IntoValue for $ty {
            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }

        impl FromValue for $ty {
            fn from_value(field: &str, value: Value) -> CacheResult<Self> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(mismatch(field, $expected, &other)),
                }
            }
        }
    };
}

scalar_conversions!(bool, Bool, "bool");
scalar_conversions!(i64, Int, "int");
scalar_conversions!(f64, Float, "float");
scalar_conversions!(String, String, "string");
scalar_conversions!(DateTime<Utc>, Timestamp, "timestamp");
scalar_conversions!(Key, Key, "key");

macro_rules! narrow_int_conversions {
    ($($ty:ty),*) => {$(
        impl IntoValue for $ty {
            fn into_value(self) -> Value {
                Value::Int(i64::from(self))
            }
        }

        impl FromValue for $ty {
            fn from_value(field: &str, value: Value) -> CacheResult<Self> {
                match value {
                    Value::Int(v) => <$ty>::try_from(v).map_err(|_| CacheError::TypeMismatch {
                        field: field.to_string(),
                        expected: stringify!($ty).to_string(),
                        found: format!("int {v}"),
                    }),
                    other => Err(mismatch(field, stringify!($ty), &other)),
                }
            }
        }
    )*};
}

narrow_int_conversions!(i8, i16, i32, u8, u16, u32);

impl IntoValue for f32 {
    fn into_value(self) -> Value {
        Value::Float(f64::from(self))
    }
}

impl FromValue for f32 {
    fn from_value(field: &str, value: Value) -> CacheResult<Self> {
        match value {
            Value::Float(v) => Ok(v as f32),
            other => Err(mismatch(field, "f32", &other)),
        }
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::String(self.to_string())
    }
}

impl IntoValue for Blob {
    fn into_value(self) -> Value {
        Value::Bytes(self.0)
    }
}

impl FromValue for Blob {
    fn from_value(field: &str, value: Value) -> CacheResult<Self> {
        match value {
            Value::Bytes(v) => Ok(Blob(v)),
            other => Err(mismatch(field, "bytes", &other)),
        }
    }
}

impl IntoValue for Record {
    fn into_value(self) -> Value {
        Value::Record(self)
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(field: &str, value: Value) -> CacheResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(field, other).map(Some),
        }
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(field: &str, value: Value) -> CacheResult<Self> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::List(items) => items
                .into_iter()
                .map(|item| T::from_value(field, item))
                .collect(),
            other => Err(mismatch(field, "list", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_set_keeps_position() {
        let mut record = Record::new().with("A", 1i64).with("B", "x");
        record.set("A", Value::Int(2));
        let names: Vec<_> = record.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(record.get("A"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_take_defaults_missing_and_null() {
        let mut record = Record::new().with("Count", Value::Null);
        assert_eq!(record.take::<i64>("Count").unwrap(), 0);
        assert_eq!(record.take::<String>("Missing").unwrap(), "");
        assert_eq!(record.take::<Option<i64>>("Missing").unwrap(), None);
    }

    #[test]
    fn test_take_type_mismatch() {
        let mut record = Record::new().with("Count", "seven");
        let err = record.take::<i64>("Count").unwrap_err();
        assert!(matches!(err, CacheError::TypeMismatch { .. }));
    }

    #[test]
    fn test_narrow_ints_check_range() {
        assert_eq!(i32::from_value("f", Value::Int(12)).unwrap(), 12);
        assert!(u8::from_value("f", Value::Int(300)).is_err());
        assert!(u32::from_value("f", Value::Int(-1)).is_err());
    }

    #[test]
    fn test_option_vec_conversions() {
        let value = vec![Some(1i64), None, Some(3)].into_value();
        assert_eq!(
            value,
            Value::List(vec![Value::Int(1), Value::Null, Value::Int(3)])
        );
        let back = Vec::<Option<i64>>::from_value("f", value).unwrap();
        assert_eq!(back, vec![Some(1), None, Some(3)]);
    }

    #[test]
    fn test_value_type_accepts() {
        assert!(ValueType::Int.accepts(&Value::Int(1)));
        assert!(ValueType::Int.accepts(&Value::Null));
        assert!(!ValueType::Int.accepts(&Value::Float(1.0)));
        assert!(ValueType::Any.accepts(&Value::Bytes(vec![1])));
        assert!(!ValueType::Any.accepts(&Value::List(vec![])));
    }

    #[test]
    fn test_compare_mixed_numbers() {
        assert_eq!(
            Value::Int(2).compare(&Value::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::String("a".into()).compare(&Value::Int(1)), None);
    }
}

//! Typed cell values and the coercion table used when building rows

use crate::error::{Result, TypesError};
use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Column value type tags as they appear on the wire
///
/// Tags stay below `0x80`; the codec uses the high bit of the tag byte for
/// the aggregate flag.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TryFromPrimitive, IntoPrimitive,
)]
pub enum ColumnValueType {
    Null = 0x02,
    Int64 = 0x03,
    Uint64 = 0x04,
    Double = 0x05,
    Boolean = 0x06,
    String = 0x10,
    Any = 0x11,
}

impl ColumnValueType {
    pub fn from_value(value: u32) -> Result<Self> {
        u8::try_from(value)
            .ok()
            .and_then(|tag| Self::try_from(tag).ok())
            .ok_or(TypesError::UnknownValueType { value })
    }

    pub fn value(self) -> u8 {
        self.into()
    }

    /// Fixed payload width, `None` for length-prefixed payloads
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            ColumnValueType::Null => Some(0),
            ColumnValueType::Int64 | ColumnValueType::Uint64 | ColumnValueType::Double => Some(8),
            ColumnValueType::Boolean => Some(1),
            ColumnValueType::String | ColumnValueType::Any => None,
        }
    }
}

/// Cell payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int64(i64),
    Uint64(u64),
    Double(f64),
    Boolean(bool),
    /// Raw bytes of a string column
    String(Bytes),
    /// Self-describing tree value in its binary encoding, kept opaque here
    Any(Bytes),
}

impl Value {
    pub fn value_type(&self) -> ColumnValueType {
        match self {
            Value::Null => ColumnValueType::Null,
            Value::Int64(_) => ColumnValueType::Int64,
            Value::Uint64(_) => ColumnValueType::Uint64,
            Value::Double(_) => ColumnValueType::Double,
            Value::Boolean(_) => ColumnValueType::Boolean,
            Value::String(_) => ColumnValueType::String,
            Value::Any(_) => ColumnValueType::Any,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Coerce into a payload of `target` type
    ///
    /// Returns `None` when the value is null or has no lossless conversion.
    pub fn convert_to(&self, target: ColumnValueType) -> Option<Value> {
        match (target, self) {
            (_, Value::Null) | (ColumnValueType::Null, _) => None,

            (ColumnValueType::Int64, Value::Int64(v)) => Some(Value::Int64(*v)),
            (ColumnValueType::Int64, Value::Uint64(v)) => i64::try_from(*v).ok().map(Value::Int64),
            (ColumnValueType::Int64, Value::Double(v)) => {
                if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v < i64::MAX as f64 {
                    Some(Value::Int64(*v as i64))
                } else {
                    None
                }
            }

            (ColumnValueType::Uint64, Value::Uint64(v)) => Some(Value::Uint64(*v)),
            (ColumnValueType::Uint64, Value::Int64(v)) => u64::try_from(*v).ok().map(Value::Uint64),
            (ColumnValueType::Uint64, Value::Double(v)) => {
                if v.fract() == 0.0 && *v >= 0.0 && *v < u64::MAX as f64 {
                    Some(Value::Uint64(*v as u64))
                } else {
                    None
                }
            }

            (ColumnValueType::Double, Value::Double(v)) => Some(Value::Double(*v)),
            (ColumnValueType::Double, Value::Int64(v)) => Some(Value::Double(*v as f64)),
            (ColumnValueType::Double, Value::Uint64(v)) => Some(Value::Double(*v as f64)),

            (ColumnValueType::Boolean, Value::Boolean(v)) => Some(Value::Boolean(*v)),

            (ColumnValueType::String, Value::String(v)) => Some(Value::String(v.clone())),

            (ColumnValueType::Any, Value::Any(v)) => Some(Value::Any(v.clone())),

            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Bytes::copy_from_slice(v.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Bytes::from(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A single cell of an unversioned row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnversionedValue {
    id: u32,
    aggregate: bool,
    value: Value,
}

impl UnversionedValue {
    /// The type tag is derived from the payload, so the two cannot disagree
    pub fn new(id: u32, aggregate: bool, value: Value) -> Self {
        Self {
            id,
            aggregate,
            value,
        }
    }

    pub fn null(id: u32) -> Self {
        Self::new(id, false, Value::Null)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn value_type(&self) -> ColumnValueType {
        self.value.value_type()
    }

    pub fn is_aggregate(&self) -> bool {
        self.aggregate
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

/// A cell of a versioned row: an unversioned cell plus its write timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedValue {
    value: UnversionedValue,
    timestamp: u64,
}

impl VersionedValue {
    pub fn new(id: u32, aggregate: bool, value: Value, timestamp: u64) -> Self {
        Self {
            value: UnversionedValue::new(id, aggregate, value),
            timestamp,
        }
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn id(&self) -> u32 {
        self.value.id()
    }

    pub fn value_type(&self) -> ColumnValueType {
        self.value.value_type()
    }

    pub fn is_aggregate(&self) -> bool {
        self.value.is_aggregate()
    }

    pub fn value(&self) -> &Value {
        self.value.value()
    }

    pub fn as_unversioned(&self) -> &UnversionedValue {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags() {
        assert_eq!(ColumnValueType::from_value(0x03).unwrap(), ColumnValueType::Int64);
        assert_eq!(ColumnValueType::String.value(), 0x10);
        assert!(ColumnValueType::from_value(0x7f).is_err());
        assert!(ColumnValueType::from_value(0x1_0003).is_err());
        for ty in [
            ColumnValueType::Null,
            ColumnValueType::Int64,
            ColumnValueType::Uint64,
            ColumnValueType::Double,
            ColumnValueType::Boolean,
            ColumnValueType::String,
            ColumnValueType::Any,
        ] {
            assert!(ty.value() < 0x80);
        }
    }

    #[test]
    fn test_integer_coercion() {
        assert_eq!(
            Value::Int64(5).convert_to(ColumnValueType::Uint64),
            Some(Value::Uint64(5))
        );
        assert_eq!(Value::Int64(-5).convert_to(ColumnValueType::Uint64), None);
        assert_eq!(Value::Uint64(u64::MAX).convert_to(ColumnValueType::Int64), None);
        assert_eq!(
            Value::Double(3.0).convert_to(ColumnValueType::Int64),
            Some(Value::Int64(3))
        );
        assert_eq!(Value::Double(3.5).convert_to(ColumnValueType::Int64), None);
        assert_eq!(
            Value::Int64(2).convert_to(ColumnValueType::Double),
            Some(Value::Double(2.0))
        );
    }

    #[test]
    fn test_unconvertible_values() {
        assert_eq!(Value::Null.convert_to(ColumnValueType::Int64), None);
        assert_eq!(Value::from("x").convert_to(ColumnValueType::Boolean), None);
        assert_eq!(Value::Boolean(true).convert_to(ColumnValueType::Null), None);
        assert_eq!(Value::from("x").convert_to(ColumnValueType::Any), None);
    }

    #[test]
    fn test_value_type_follows_payload() {
        let cell = UnversionedValue::new(3, true, Value::from("abc"));
        assert_eq!(cell.value_type(), ColumnValueType::String);
        assert!(cell.is_aggregate());
        assert_eq!(UnversionedValue::null(1).value_type(), ColumnValueType::Null);

        let versioned = VersionedValue::new(2, false, Value::Int64(1), 77);
        assert_eq!(versioned.timestamp(), 77);
        assert_eq!(versioned.id(), 2);
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(4i64)), Value::Int64(4));
    }
}

// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Encoding and decoding of SQL values.
//!
//! There are three representations of a value in this crate:
//!
//!   * [`Param`] is what a caller hands to a statement builder. It is a closed
//!     set of source types; anything else must be converted explicitly, either
//!     by the caller or with [`Param::coerce`].
//!   * [`Value`] is the tagged wire representation, `{"type": ..., "value":
//!     ...}` or `{"type": "blob", "base64": ...}`.
//!   * [`Datum`] is what a caller gets back after decoding a [`Value`].
//!
//! Encoding is strict: a non-finite float is rejected with
//! [`EncodeError::NonFiniteFloat`], both when a [`Param`] is encoded and when
//! a [`Value`] is serialized. Reading is permissive: an unrecognized type tag
//! is kept as [`Value::Unknown`] so that newer servers do not break older
//! clients, and a payload that does not match its tag is kept as
//! [`Value::Malformed`]. Either is reported only when the value is decoded.

use std::fmt;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};

/// Accepts base64 with or without trailing padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// An error encountered while encoding a [`Param`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    /// Infinite and NaN floats have no lossless wire representation.
    #[error("only finite numbers (not Infinity or NaN) can be passed as arguments, got {0}")]
    NonFiniteFloat(f64),
    /// The integer does not fit in 64 signed bits.
    #[error("integer {0} is out of range for a 64-bit signed integer")]
    IntegerOutOfRange(String),
    /// A request could not be serialized.
    #[error("unable to serialize request: {0}")]
    Request(String),
}

/// An error encountered while decoding a [`Value`] into a [`Datum`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The server sent a type tag this client does not know about.
    #[error("unknown value type: {0}")]
    UnknownType(String),
    /// The server sent a known type tag with a payload that does not match it.
    #[error("malformed {0} value")]
    Malformed(String),
}

/// How `integer` values are decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IntegerMode {
    /// Decode to [`Datum::Integer`], preserving all 64 bits.
    #[default]
    Safe,
    /// Decode to [`Datum::Float`]. Values beyond 2^53 lose precision.
    Lossy,
}

/// A value on the wire.
///
/// Reading a value never fails for a well-formed `{"type": ...}` object:
/// unrecognized tags become [`Value::Unknown`] and payloads that do not match
/// their tag become [`Value::Malformed`], so one bad cell cannot spoil a whole
/// response. Writing is strict; serializing a non-finite [`Value::Float`]
/// fails.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawValue")]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// A 64-bit signed integer, carried as a decimal string.
    Integer(i64),
    /// A finite 64-bit float.
    Float(f64),
    /// A UTF-8 string.
    Text(String),
    /// A byte string, carried as base64.
    ///
    /// `None` means the server omitted the `base64` field.
    Blob(Option<Vec<u8>>),
    /// A value with a type tag this client does not recognize.
    Unknown {
        /// The unrecognized type tag.
        kind: String,
        /// The raw `value` field, if any.
        value: Option<serde_json::Value>,
        /// The raw `base64` field, if any.
        base64: Option<String>,
    },
    /// A value with a known type tag whose payload does not match the tag,
    /// e.g. an integer that is not a decimal string.
    Malformed {
        /// The type tag.
        kind: String,
        /// The raw `value` field, if any.
        value: Option<serde_json::Value>,
        /// The raw `base64` field, if any.
        base64: Option<String>,
    },
}

impl Value {
    /// Returns the wire type tag of this value.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Unknown { kind, .. } | Value::Malformed { kind, .. } => kind.as_str(),
        }
    }

    /// Decodes this value into a [`Datum`].
    ///
    /// A blob without a `base64` field decodes to [`Datum::Null`]. An unknown
    /// type tag or a malformed payload is an error; use
    /// [`Value::decode_lenient`] to map those to [`Datum::Null`] instead.
    pub fn decode(self, mode: IntegerMode) -> Result<Datum, DecodeError> {
        Ok(match self {
            Value::Null => Datum::Null,
            Value::Integer(i) => match mode {
                IntegerMode::Safe => Datum::Integer(i),
                IntegerMode::Lossy => Datum::Float(i as f64),
            },
            Value::Float(f) => Datum::Float(f),
            Value::Text(s) => Datum::Text(s),
            Value::Blob(Some(bytes)) => Datum::Blob(bytes),
            Value::Blob(None) => Datum::Null,
            Value::Unknown { kind, .. } => return Err(DecodeError::UnknownType(kind)),
            Value::Malformed { kind, .. } => return Err(DecodeError::Malformed(kind)),
        })
    }

    /// Like [`Value::decode`], but decodes unknown type tags and malformed
    /// payloads to [`Datum::Null`].
    pub fn decode_lenient(self, mode: IntegerMode) -> Datum {
        self.decode(mode).unwrap_or(Datum::Null)
    }
}

/// The on-the-wire shape shared by every [`Value`] variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawValue {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base64: Option<String>,
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if let Value::Float(f) = self {
            if !f.is_finite() {
                return Err(S::Error::custom(EncodeError::NonFiniteFloat(*f)));
            }
        }
        RawValue::from(self).serialize(serializer)
    }
}

impl From<&Value> for RawValue {
    fn from(value: &Value) -> RawValue {
        let raw = |kind: &str, value| RawValue {
            kind: kind.into(),
            value,
            base64: None,
        };
        match value {
            Value::Null => raw("null", None),
            Value::Integer(i) => raw("integer", Some(i.to_string().into())),
            Value::Float(f) => raw("float", Some((*f).into())),
            Value::Text(s) => raw("text", Some(s.as_str().into())),
            Value::Blob(bytes) => RawValue {
                kind: "blob".into(),
                value: None,
                base64: bytes.as_ref().map(|b| STANDARD.encode(b)),
            },
            Value::Unknown {
                kind,
                value,
                base64,
            }
            | Value::Malformed {
                kind,
                value,
                base64,
            } => RawValue {
                kind: kind.clone(),
                value: value.clone(),
                base64: base64.clone(),
            },
        }
    }
}

impl From<RawValue> for Value {
    fn from(raw: RawValue) -> Value {
        use serde_json::Value as Json;

        if !matches!(
            raw.kind.as_str(),
            "null" | "integer" | "float" | "text" | "blob"
        ) {
            return Value::Unknown {
                kind: raw.kind,
                value: raw.value,
                base64: raw.base64,
            };
        }

        let value = match (raw.kind.as_str(), &raw.value) {
            ("null", _) => Some(Value::Null),
            // Servers send non-finite floats, among others, as a null value.
            ("integer" | "float" | "text", None | Some(Json::Null)) => Some(Value::Null),
            ("integer", Some(Json::String(s))) => s.parse().ok().map(Value::Integer),
            ("integer", Some(Json::Number(n))) => n.as_i64().map(Value::Integer),
            ("float", Some(Json::Number(n))) => n.as_f64().map(Value::Float),
            ("text", Some(Json::String(s))) => Some(Value::Text(s.clone())),
            ("blob", _) => match &raw.base64 {
                None => Some(Value::Blob(None)),
                Some(b64) => LENIENT_BASE64
                    .decode(b64.as_bytes())
                    .ok()
                    .map(|bytes| Value::Blob(Some(bytes))),
            },
            _ => None,
        };
        value.unwrap_or_else(|| Value::Malformed {
            kind: raw.kind,
            value: raw.value,
            base64: raw.base64,
        })
    }
}

/// A decoded SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    /// SQL `NULL`.
    Null,
    /// A 64-bit signed integer.
    Integer(i64),
    /// A 64-bit float.
    Float(f64),
    /// A UTF-8 string.
    Text(String),
    /// A byte string.
    Blob(Vec<u8>),
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Datum::Null => f.write_str("NULL"),
            Datum::Integer(i) => write!(f, "{i}"),
            Datum::Float(n) => write!(f, "{n}"),
            Datum::Text(s) => f.write_str(s),
            Datum::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// A statement parameter, before encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// SQL `NULL`.
    Null,
    /// A 64-bit signed integer.
    Integer(i64),
    /// A float. Must be finite to encode.
    Float(f64),
    /// A boolean, sent as the integer `0` or `1`.
    Bool(bool),
    /// A UTF-8 string.
    Text(String),
    /// A byte string.
    Blob(Vec<u8>),
    /// The text form of a value of some other type, see [`Param::coerce`].
    Coerced(String),
}

impl Param {
    /// Sends `value` as text, using its [`Display`](fmt::Display) form.
    ///
    /// This is lossy: the server sees a string, not the original type.
    pub fn coerce<T: fmt::Display>(value: T) -> Param {
        Param::Coerced(value.to_string())
    }

    /// Encodes this parameter into its wire representation.
    pub fn encode(self) -> Result<Value, EncodeError> {
        Ok(match self {
            Param::Null => Value::Null,
            Param::Integer(i) => Value::Integer(i),
            Param::Float(f) if !f.is_finite() => return Err(EncodeError::NonFiniteFloat(f)),
            Param::Float(f) => Value::Float(f),
            Param::Bool(b) => Value::Integer(i64::from(b)),
            Param::Text(s) | Param::Coerced(s) => Value::Text(s),
            Param::Blob(b) => Value::Blob(Some(b)),
        })
    }
}

macro_rules! impl_from_integer {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Param {
                fn from(i: $t) -> Param {
                    Param::Integer(i64::from(i))
                }
            }
        )*
    };
}

impl_from_integer!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! impl_try_from_integer {
    ($($t:ty),*) => {
        $(
            impl TryFrom<$t> for Param {
                type Error = EncodeError;

                fn try_from(i: $t) -> Result<Param, EncodeError> {
                    i64::try_from(i)
                        .map(Param::Integer)
                        .map_err(|_| EncodeError::IntegerOutOfRange(i.to_string()))
                }
            }
        )*
    };
}

impl_try_from_integer!(i128, isize, u64, u128, usize);

impl From<f32> for Param {
    fn from(f: f32) -> Param {
        Param::Float(f64::from(f))
    }
}

impl From<f64> for Param {
    fn from(f: f64) -> Param {
        Param::Float(f)
    }
}

impl From<bool> for Param {
    fn from(b: bool) -> Param {
        Param::Bool(b)
    }
}

impl From<String> for Param {
    fn from(s: String) -> Param {
        Param::Text(s)
    }
}

impl From<&str> for Param {
    fn from(s: &str) -> Param {
        Param::Text(s.into())
    }
}

impl From<Vec<u8>> for Param {
    fn from(b: Vec<u8>) -> Param {
        Param::Blob(b)
    }
}

impl From<&[u8]> for Param {
    fn from(b: &[u8]) -> Param {
        Param::Blob(b.to_vec())
    }
}

impl From<Datum> for Param {
    fn from(datum: Datum) -> Param {
        match datum {
            Datum::Null => Param::Null,
            Datum::Integer(i) => Param::Integer(i),
            Datum::Float(f) => Param::Float(f),
            Datum::Text(s) => Param::Text(s),
            Datum::Blob(b) => Param::Blob(b),
        }
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Param {
        match value {
            None => Param::Null,
            Some(v) => v.into(),
        }
    }
}

/// Encodes anything convertible into a [`Param`].
pub fn encode<P: Into<Param>>(param: P) -> Result<Value, EncodeError> {
    param.into().encode()
}

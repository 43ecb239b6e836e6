//! Value codec: [`HostValue`] to engine values and back.
//!
//! Encoding is total over `HostValue` except for map keys, which the engine
//! only accepts as property names: string keys pass through, integer keys
//! become their base-10 text, and every other key kind is dropped.
//!
//! Decoding classifies each engine value exactly once into a [`NativeKind`]
//! and then converts by kind. Objects come back as maps keyed by their
//! non-negative integer property names only; other properties are skipped.
//! Numbers keep their engine tag: int-tagged values come back as integers
//! (unsigned when non-negative), float-tagged values as floats. Encoded floats
//! always carry the float tag, so `Float(2.0)` comes back as `Float(2.0)`.
//! Whole numbers computed by scripts carry whichever tag the engine gave them:
//! `0.5 * 4` decodes as `Float(2.0)` while `Math.floor(7.9)` and `1e3` decode
//! as integers. Hosts reading script-computed numbers should compare them
//! numerically.
//!
//! Index keys are base-10 digits with an optional leading `+`; `"+3"` decodes
//! as key 3, while negative and exponent forms are skipped.
//!
//! Children are built first and then moved into their parent, so a
//! partially built container is simply dropped if a later child fails.

use std::borrow::Cow;

use rquickjs::convert::Coerced;
use rquickjs::{Array, BigInt, Ctx, Object, Type, Value, qjs};
use tracing::trace;

use crate::error::{CodecError, CodecResult};
use crate::value::{HostMap, HostValue, Integer, Wide};

/// The kind of an engine value, decided once in fixed precedence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeKind {
    Undefined,
    Null,
    String,
    Array,
    /// Any object that is not an array, functions included.
    Object,
    /// Non-negative int-tagged number.
    Uint(u64),
    /// Negative int-tagged number.
    Int(i64),
    /// BigInt that fits a signed 64-bit slot, or wrapped into one.
    BigInt(i64),
    /// Float-tagged number.
    Number(f64),
    Bool(bool),
}

impl NativeKind {
    /// Classify a value.
    pub fn inspect(value: &Value<'_>) -> CodecResult<Self> {
        Ok(match value.type_of() {
            Type::Null => Self::Null,
            Type::String => Self::String,
            Type::Array => Self::Array,
            Type::Int => {
                let v = value.as_int().unwrap_or_default();
                match u64::try_from(v) {
                    Ok(unsigned) => Self::Uint(unsigned),
                    Err(_) => Self::Int(v.into()),
                }
            }
            Type::BigInt => inspect_big_int(value)?,
            Type::Float => Self::Number(value.as_float().unwrap_or_default()),
            Type::Bool => Self::Bool(value.as_bool().unwrap_or_default()),
            _ if value.is_object() => Self::Object,
            _ => Self::Undefined,
        })
    }
}

fn inspect_big_int(value: &Value<'_>) -> CodecResult<NativeKind> {
    let Coerced(text) = value.get::<Coerced<String>>()?;
    if let Ok(signed) = text.parse::<i64>() {
        return Ok(NativeKind::BigInt(signed));
    }
    if let Ok(unsigned) = text.parse::<u64>() {
        return Ok(NativeKind::Uint(unsigned));
    }
    let wrapped = match value.as_big_int() {
        Some(big) => big.clone().to_i64()?,
        None => 0,
    };
    Ok(NativeKind::BigInt(wrapped))
}

/// Encode a host value into an engine value owned by `ctx`.
pub fn encode<'js>(ctx: &Ctx<'js>, value: &HostValue) -> rquickjs::Result<Value<'js>> {
    Ok(match value {
        HostValue::Nil => Value::new_null(ctx.clone()),
        HostValue::String(s) => rquickjs::String::from_str(ctx.clone(), s)?.into_value(),
        HostValue::Integer(i) => encode_integer(ctx, *i)?,
        HostValue::Float(f) => encode_float(ctx, *f),
        HostValue::Bool(b) => Value::new_bool(ctx.clone(), *b),
        HostValue::Map(map) => encode_map(ctx, map)?.into_value(),
        HostValue::Sequence(items) => {
            let array = Array::new(ctx.clone())?;
            for (index, item) in items.iter().enumerate() {
                array.set(index, encode(ctx, item)?)?;
            }
            array.into_value()
        }
    })
}

/// Encode a map as a plain object.
pub fn encode_map<'js>(ctx: &Ctx<'js>, map: &HostMap) -> rquickjs::Result<Object<'js>> {
    let object = Object::new(ctx.clone())?;
    for (key, value) in map.iter() {
        let Some(name) = property_name(key) else {
            trace!(?key, "Dropping map entry with unsupported key kind");
            continue;
        };
        object.set(name.as_ref(), encode(ctx, value)?)?;
    }
    Ok(object)
}

fn property_name(key: &HostValue) -> Option<Cow<'_, str>> {
    match key {
        HostValue::String(s) => Some(Cow::Borrowed(s)),
        HostValue::Integer(i) => Some(Cow::Owned(i.to_string())),
        _ => None,
    }
}

/// `Value::new_float` folds whole numbers in `i32` range into int-tagged
/// values. Box the double directly so the float tag survives.
fn encode_float<'js>(ctx: &Ctx<'js>, value: f64) -> Value<'js> {
    // SAFETY: `__JS_NewFloat64` only
    // boxes the double; the result holds no reference that needs freeing.
    unsafe {
        let raw = qjs::__JS_NewFloat64(value);
        Value::from_raw(ctx.clone(), raw)
    }
}

/// Integers in `i32` range become engine ints; wider values become BigInts.
fn encode_integer<'js>(ctx: &Ctx<'js>, integer: Integer) -> rquickjs::Result<Value<'js>> {
    match integer.widen() {
        Wide::Signed(v) => match i32::try_from(v) {
            Ok(small) => Ok(Value::new_int(ctx.clone(), small)),
            Err(_) => Ok(BigInt::from_i64(ctx.clone(), v)?.into_value()),
        },
        Wide::Unsigned(v) => match i32::try_from(v) {
            Ok(small) => Ok(Value::new_int(ctx.clone(), small)),
            Err(_) => Ok(BigInt::from_u64(ctx.clone(), v)?.into_value()),
        },
    }
}

/// Decode an engine value, refusing to nest deeper than `max_depth`.
pub fn decode(value: &Value<'_>, max_depth: usize) -> CodecResult<HostValue> {
    decode_at(value, 0, max_depth)
}

fn decode_at(value: &Value<'_>, depth: usize, max_depth: usize) -> CodecResult<HostValue> {
    Ok(match NativeKind::inspect(value)? {
        NativeKind::Undefined | NativeKind::Null => HostValue::Nil,
        NativeKind::String => HostValue::String(value.get::<String>()?),
        NativeKind::Uint(v) => HostValue::Integer(Integer::U64(v)),
        NativeKind::Int(v) | NativeKind::BigInt(v) => HostValue::Integer(Integer::I64(v)),
        NativeKind::Number(f) => HostValue::Float(f),
        NativeKind::Bool(b) => HostValue::Bool(b),
        NativeKind::Array => {
            if depth >= max_depth {
                return Err(CodecError::TooDeep(max_depth));
            }
            let Some(array) = value.as_array() else {
                return Ok(HostValue::Nil);
            };
            let mut items = Vec::with_capacity(array.len());
            for index in 0..array.len() {
                let child: Value = array.get(index)?;
                items.push(decode_at(&child, depth + 1, max_depth)?);
            }
            HostValue::Sequence(items)
        }
        NativeKind::Object => {
            if depth >= max_depth {
                return Err(CodecError::TooDeep(max_depth));
            }
            let Some(object) = value.as_object() else {
                return Ok(HostValue::Nil);
            };
            let mut map = HostMap::new();
            for key in object.keys::<String>() {
                let key = key?;
                let Some(index) = index_key(&key) else {
                    continue;
                };
                let child: Value = object.get(key.as_str())?;
                map.insert(Integer::I64(index), decode_at(&child, depth + 1, max_depth)?);
            }
            HostValue::Map(map)
        }
    })
}

/// Base-10 digits with an optional leading `+`, fitting `i64`.
fn index_key(key: &str) -> Option<i64> {
    let digits = key.strip_prefix('+').unwrap_or(key);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

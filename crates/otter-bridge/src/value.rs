//! Host-side values exchanged with script code.
//!
//! [`HostValue`] is the closed set of shapes the codec understands. Anything
//! richer (dates, typed arrays, functions) is out of scope and never produced.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value as JsonValue;

/// An integer of any host width.
///
/// Equality is numeric: `Integer::U8(5) == Integer::I64(5)`. The codec widens
/// every variant to 64 bits before encoding, and decodes into `I64` or `U64`.
#[derive(Debug, Clone, Copy)]
pub enum Integer {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Isize(isize),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Usize(usize),
}

/// An integer widened to its 64-bit slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wide {
    Signed(i64),
    Unsigned(u64),
}

impl Integer {
    pub fn is_signed(self) -> bool {
        matches!(self.widen(), Wide::Signed(_))
    }

    pub fn widen(self) -> Wide {
        match self {
            Self::I8(v) => Wide::Signed(v.into()),
            Self::I16(v) => Wide::Signed(v.into()),
            Self::I32(v) => Wide::Signed(v.into()),
            Self::I64(v) => Wide::Signed(v),
            Self::Isize(v) => Wide::Signed(v as i64),
            Self::U8(v) => Wide::Unsigned(v.into()),
            Self::U16(v) => Wide::Unsigned(v.into()),
            Self::U32(v) => Wide::Unsigned(v.into()),
            Self::U64(v) => Wide::Unsigned(v),
            Self::Usize(v) => Wide::Unsigned(v as u64),
        }
    }

    fn as_i128(self) -> i128 {
        match self.widen() {
            Wide::Signed(v) => v.into(),
            Wide::Unsigned(v) => v.into(),
        }
    }

    pub fn as_i64(self) -> Option<i64> {
        i64::try_from(self.as_i128()).ok()
    }

    pub fn as_u64(self) -> Option<u64> {
        u64::try_from(self.as_i128()).ok()
    }
}

impl PartialEq for Integer {
    fn eq(&self, other: &Self) -> bool {
        self.as_i128() == other.as_i128()
    }
}

impl Eq for Integer {}

impl PartialOrd for Integer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Integer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_i128().cmp(&other.as_i128())
    }
}

impl fmt::Display for Integer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.widen() {
            Wide::Signed(v) => write!(f, "{v}"),
            Wide::Unsigned(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! integer_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Integer {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }

            impl From<$ty> for HostValue {
                fn from(v: $ty) -> Self {
                    Self::Integer(Integer::$variant(v))
                }
            }
        )*
    };
}

integer_from! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    isize => Isize,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    usize => Usize,
}

/// A value living on the host side of the bridge.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    #[default]
    Nil,
    String(String),
    Integer(Integer),
    Float(f64),
    Bool(bool),
    Map(HostMap),
    Sequence(Vec<HostValue>),
}

impl HostValue {
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<Integer> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HostMap> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[HostValue]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Render as JSON. Map keys become their string form.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Nil => JsonValue::Null,
            Self::String(s) => JsonValue::String(s.clone()),
            Self::Integer(i) => match i.widen() {
                Wide::Signed(v) => v.into(),
                Wide::Unsigned(v) => v.into(),
            },
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Map(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (json_key(k), v.to_json()))
                    .collect(),
            ),
            Self::Sequence(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

fn json_key(key: &HostValue) -> String {
    match key {
        HostValue::String(s) => s.clone(),
        HostValue::Integer(i) => i.to_string(),
        other => other.to_json().to_string(),
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for HostValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<f32> for HostValue {
    fn from(f: f32) -> Self {
        Self::Float(f.into())
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Integer> for HostValue {
    fn from(i: Integer) -> Self {
        Self::Integer(i)
    }
}

impl From<HostMap> for HostValue {
    fn from(map: HostMap) -> Self {
        Self::Map(map)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(items: Vec<T>) -> Self {
        Self::Sequence(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

impl From<JsonValue> for HostValue {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Self::Nil,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Self::Integer(Integer::U64(u))
                } else if let Some(i) = n.as_i64() {
                    Self::Integer(Integer::I64(i))
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => Self::String(s),
            JsonValue::Array(items) => Self::Sequence(items.into_iter().map(Self::from).collect()),
            JsonValue::Object(fields) => Self::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (HostValue::String(k), HostValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Unordered map from host values to host values.
///
/// Backed by an entry list: keys need only equality (floats and nested maps
/// are legal keys, the encoder just drops them). Inserting an equal key
/// replaces the existing entry. Equality ignores entry order.
#[derive(Debug, Clone, Default)]
pub struct HostMap {
    entries: Vec<(HostValue, HostValue)>,
}

impl HostMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, returning the value it replaced.
    pub fn insert(
        &mut self,
        key: impl Into<HostValue>,
        value: impl Into<HostValue>,
    ) -> Option<HostValue> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &HostValue) -> Option<&HostValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Look up a string key.
    pub fn get_str(&self, key: &str) -> Option<&HostValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &HostValue) -> Option<HostValue> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.swap_remove(index).1)
    }

    pub fn contains_key(&self, key: &HostValue) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HostValue, &HostValue)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &HostValue> {
        self.entries.iter().map(|(k, _)| k)
    }
}

impl PartialEq for HostMap {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|ov| ov == v))
    }
}

impl<K: Into<HostValue>, V: Into<HostValue>> FromIterator<(K, V)> for HostMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl IntoIterator for HostMap {
    type Item = (HostValue, HostValue);
    type IntoIter = std::vec::IntoIter<(HostValue, HostValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_equality_is_numeric() {
        assert_eq!(Integer::U8(5), Integer::I64(5));
        assert_eq!(Integer::Isize(-3), Integer::I8(-3));
        assert_ne!(Integer::U64(u64::MAX), Integer::I64(-1));
        assert_eq!(HostValue::from(7u16), HostValue::from(7i32));
    }

    #[test]
    fn test_integer_widen() {
        assert_eq!(Integer::I8(-1).widen(), Wide::Signed(-1));
        assert_eq!(Integer::U32(u32::MAX).widen(), Wide::Unsigned(u32::MAX as u64));
        assert!(Integer::Isize(0).is_signed());
        assert!(!Integer::Usize(0).is_signed());
        assert_eq!(Integer::U64(u64::MAX).as_i64(), None);
        assert_eq!(Integer::I64(-5).as_u64(), None);
    }

    #[test]
    fn test_map_insert_replaces() {
        let mut map = HostMap::new();
        assert!(map.insert("a", 1i32).is_none());
        assert_eq!(map.insert("a", 2i32), Some(HostValue::from(1i32)));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get_str("a"), Some(&HostValue::from(2i32)));

        // Integer keys compare numerically across widths
        map.insert(3u8, "x");
        map.insert(3i64, "y");
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&HostValue::from(3usize)), Some(&HostValue::from("y")));
    }

    #[test]
    fn test_map_equality_ignores_order() {
        let a: HostMap = [("x", 1i32), ("y", 2i32)].into_iter().collect();
        let b: HostMap = [("y", 2i32), ("x", 1i32)].into_iter().collect();
        let c: HostMap = [("x", 1i32)].into_iter().collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_map_remove() {
        let mut map: HostMap = [("x", true), ("y", false)].into_iter().collect();
        assert_eq!(map.remove(&"x".into()), Some(HostValue::Bool(true)));
        assert!(!map.contains_key(&"x".into()));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_from_json() {
        let value = HostValue::from(json!({
            "cmd": "ping",
            "n": 42,
            "neg": -1,
            "ratio": 0.5,
            "tags": ["a", null],
        }));

        let map = value.as_map().unwrap();
        assert_eq!(map.get_str("cmd"), Some(&HostValue::from("ping")));
        assert_eq!(map.get_str("n"), Some(&HostValue::Integer(Integer::U64(42))));
        assert_eq!(map.get_str("neg"), Some(&HostValue::Integer(Integer::I64(-1))));
        assert_eq!(map.get_str("ratio"), Some(&HostValue::Float(0.5)));
        assert_eq!(
            map.get_str("tags"),
            Some(&HostValue::Sequence(vec!["a".into(), HostValue::Nil]))
        );
    }

    #[test]
    fn test_to_json() {
        let mut map = HostMap::new();
        map.insert(0i64, "zero");
        map.insert("name", HostValue::Sequence(vec![1u8.into(), 2.5f64.into()]));

        assert_eq!(
            HostValue::Map(map).to_json(),
            json!({"0": "zero", "name": [1, 2.5]})
        );
        assert_eq!(HostValue::Float(f64::NAN).to_json(), json!(null));
    }
}

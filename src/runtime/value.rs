//! Dynamic value model exchanged between the host and the interpreter.
//!
//! [`Value`] is the closed tagged representation both sides agree on.
//! Numbers carry no integer/float distinction, sequence indices are implicit
//! (1..N on the interpreter side), and mapping keys are always the canonical
//! decimal string form of the original key. The sequence-vs-mapping decision
//! for table-like data is a pure function over the table's keys,
//! independently of any conversion.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;

/// Maximum nesting depth the marshaller will traverse in either direction.
pub const MAX_VALUE_DEPTH: usize = 100;

/// A dynamic value as seen by both the host and the interpreter.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    /// All numbers are 64-bit floats.
    Number(f64),
    String(String),
    /// Ordered elements; indices are implicit.
    Sequence(Vec<Value>),
    /// String-keyed, order-insensitive.
    Mapping(IndexMap<String, Value>),
    /// A native handle (function, userdata, thread) reduced to its textual
    /// representation. Cannot be packed back into the interpreter.
    Opaque(String),
}

impl Value {
    /// Build a mapping from key/value pairs.
    pub fn mapping<K, I>(pairs: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Mapping(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
            Value::Opaque(_) => "opaque",
        }
    }
}

/// Canonical decimal rendering of a numeric key: integers come out without a
/// decimal point, everything else keeps its natural decimal form.
pub fn canonical_key(n: f64) -> String {
    if n.is_finite() && n.trunc() == n && (i64::MIN as f64..=i64::MAX as f64).contains(&n) {
        (n as i64).to_string()
    } else {
        n.to_string()
    }
}

/// A table key as seen by the classifier.
#[derive(Clone, Debug, PartialEq)]
pub enum TableKey {
    Int(i64),
    Number(f64),
    Str(String),
    /// Anything else, reduced to a textual form.
    Other(String),
}

impl TableKey {
    /// The canonical string form used when the table is a mapping.
    pub fn render(&self) -> String {
        match self {
            TableKey::Int(i) => i.to_string(),
            TableKey::Number(n) => canonical_key(*n),
            TableKey::Str(s) => s.clone(),
            TableKey::Other(repr) => repr.clone(),
        }
    }
}

/// Shape assigned to a table-like structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    /// Contiguous integer keys 1..N and nothing else.
    Sequence(usize),
    Mapping,
}

/// Classify a table's keys: if keys `1..N` are all present, contiguous, and
/// no other key of any kind exists, the table is a sequence of length N;
/// otherwise it is a mapping. A table holding only key `2` is a mapping, and
/// any non-integer numeric key forces a mapping even when key `1` exists.
pub fn classify(keys: &[TableKey]) -> Shape {
    let mut taken = vec![false; keys.len()];
    for key in keys {
        match key {
            TableKey::Int(i) if *i >= 1 && (*i as usize) <= keys.len() => {
                let slot = (*i - 1) as usize;
                if taken[slot] {
                    return Shape::Mapping;
                }
                taken[slot] = true;
            }
            _ => return Shape::Mapping,
        }
    }
    Shape::Sequence(keys.len())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", canonical_key(*n)),
            Value::String(s) => write!(f, "{s}"),
            Value::Opaque(repr) => write!(f, "{repr}"),
            nested => write_nested(f, nested),
        }
    }
}

fn write_nested(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => write!(f, "{s:?}"),
        Value::Sequence(items) => {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write_nested(f, item)?;
            }
            write!(f, "]")
        }
        Value::Mapping(map) => {
            write!(f, "{{")?;
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{key:?}:")?;
                write_nested(f, item)?;
            }
            write!(f, "}}")
        }
        scalar => write!(f, "{scalar}"),
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Value {
        Value::Number(n)
    }
}

macro_rules! number_from {
    ($($ty:ty),*) => {$(
        impl From<$ty> for Value {
            fn from(n: $ty) -> Value {
                Value::Number(n as f64)
            }
        }
    )*};
}

number_from!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32);

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Value {
        match value {
            Some(value) => value.into(),
            None => Value::Nil,
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Value {
        Value::Sequence(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<HashMap<String, T>> for Value {
    fn from(map: HashMap<String, T>) -> Value {
        Value::Mapping(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<Value>> From<HashMap<&str, T>> for Value {
    fn from(map: HashMap<&str, T>) -> Value {
        Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (k.to_string(), v.into()))
                .collect(),
        )
    }
}

/// Integer-keyed containers become mappings with canonical decimal keys,
/// never sequences.
impl<T: Into<Value>> From<HashMap<i64, T>> for Value {
    fn from(map: HashMap<i64, T>) -> Value {
        Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (k.to_string(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn test_classify_contiguous_from_one() {
        let keys = vec![TableKey::Int(1), TableKey::Int(2), TableKey::Int(3)];
        assert_eq!(classify(&keys), Shape::Sequence(3));
    }

    #[test]
    fn test_classify_order_does_not_matter() {
        let keys = vec![TableKey::Int(2), TableKey::Int(1)];
        assert_eq!(classify(&keys), Shape::Sequence(2));
    }

    #[test]
    fn test_classify_must_start_at_one() {
        assert_eq!(classify(&[TableKey::Int(2)]), Shape::Mapping);
    }

    #[test]
    fn test_classify_gap_is_a_mapping() {
        let keys = vec![TableKey::Int(1), TableKey::Int(3)];
        assert_eq!(classify(&keys), Shape::Mapping);
    }

    #[test]
    fn test_classify_non_integer_key_forces_mapping() {
        assert_eq!(classify(&[TableKey::Number(1.1)]), Shape::Mapping);
        let keys = vec![TableKey::Int(1), TableKey::Number(2.5)];
        assert_eq!(classify(&keys), Shape::Mapping);
    }

    #[test]
    fn test_classify_string_key_forces_mapping() {
        let keys = vec![TableKey::Int(1), TableKey::Str("hello".to_string())];
        assert_eq!(classify(&keys), Shape::Mapping);
    }

    #[test]
    fn test_classify_empty_table_is_an_empty_sequence() {
        assert_eq!(classify(&[]), Shape::Sequence(0));
    }

    #[test]
    fn test_canonical_key_rendering() {
        assert_eq!(canonical_key(1.0), "1");
        assert_eq!(canonical_key(-3.0), "-3");
        assert_eq!(canonical_key(1.1), "1.1");
        assert_eq!(canonical_key(0.5), "0.5");
    }

    #[test]
    fn test_nil_containers_become_nil() {
        assert_eq!(Value::from(None::<Vec<String>>), Value::Nil);
        assert_eq!(Value::from(None::<HashMap<i64, f64>>), Value::Nil);
        assert_eq!(
            Value::from(Some(vec!["hello"])),
            Value::Sequence(vec![Value::String("hello".to_string())])
        );
    }

    #[test]
    fn test_integer_keyed_map_renders_decimal_keys() {
        let value = Value::from(hashmap! { 1i64 => "one" });
        assert_eq!(
            value,
            Value::mapping([("1", Value::String("one".to_string()))])
        );
    }

    #[test]
    fn test_numbers_collapse_to_float() {
        assert_eq!(Value::from(1u8), Value::Number(1.0));
        assert_eq!(Value::from(2u64), Value::Number(2.0));
        assert_eq!(Value::from(1.5f32), Value::Number(1.5));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Number(1.0).to_string(), "1");
        assert_eq!(Value::String("hi".to_string()).to_string(), "hi");
        let nested = Value::mapping([(
            "array",
            Value::Sequence(vec![Value::Number(3.0), Value::String("one".to_string())]),
        )]);
        assert_eq!(nested.to_string(), r#"{"array":[3,"one"]}"#);
    }
}

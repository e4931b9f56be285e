//! Pack/unpack between the host value model and interpreter values.
//!
//! Both directions recurse fully and share the classification and key
//! rendering rules from [`crate::runtime::value`]. A seen-set of table
//! pointers rejects self-referential tables instead of looping on them.

use crate::runtime::error::Error;
use crate::runtime::value::{classify, Shape, TableKey, Value, MAX_VALUE_DEPTH};
use indexmap::IndexMap;
use mlua::{Lua, Table, Value as LuaValue};
use std::collections::HashSet;

/// Build an interpreter value from a host value.
///
/// Sequences become tables indexed 1..N, mappings become string-keyed
/// tables. Opaque handles cannot be rebuilt and are a marshalling error.
pub fn pack(lua: &Lua, value: &Value) -> mlua::Result<LuaValue> {
    pack_at(lua, value, 0)
}

fn pack_at(lua: &Lua, value: &Value, depth: usize) -> mlua::Result<LuaValue> {
    if depth > MAX_VALUE_DEPTH {
        return Err(mlua::Error::external(Error::Marshal(format!(
            "nesting deeper than {MAX_VALUE_DEPTH}"
        ))));
    }
    match value {
        Value::Nil => Ok(LuaValue::Nil),
        Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        Value::Number(n) => Ok(LuaValue::Number(*n)),
        Value::String(s) => Ok(LuaValue::String(lua.create_string(s)?)),
        Value::Sequence(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, pack_at(lua, item, depth + 1)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        Value::Mapping(map) => {
            let table = lua.create_table()?;
            for (key, item) in map {
                table.raw_set(key.as_str(), pack_at(lua, item, depth + 1)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        Value::Opaque(repr) => Err(mlua::Error::external(Error::Marshal(format!(
            "cannot pack opaque handle {repr}"
        )))),
    }
}

/// Read an interpreter value into the host value model.
///
/// Tables are classified as sequence or mapping by their keys; mapping keys
/// are rendered to canonical decimal strings. Functions, userdata and
/// threads come back as [`Value::Opaque`] in their textual form.
pub fn unpack(value: &LuaValue) -> Result<Value, Error> {
    let mut seen = HashSet::new();
    unpack_at(value, 0, &mut seen)
}

fn unpack_at(value: &LuaValue, depth: usize, seen: &mut HashSet<usize>) -> Result<Value, Error> {
    if depth > MAX_VALUE_DEPTH {
        return Err(Error::Marshal(format!(
            "nesting deeper than {MAX_VALUE_DEPTH}"
        )));
    }
    match value {
        LuaValue::Nil => Ok(Value::Nil),
        LuaValue::Boolean(b) => Ok(Value::Bool(*b)),
        LuaValue::Integer(i) => Ok(Value::Number(*i as f64)),
        LuaValue::Number(n) => Ok(Value::Number(*n)),
        LuaValue::String(s) => Ok(Value::String(s.to_string_lossy().to_string())),
        LuaValue::Table(table) => unpack_table(table, depth, seen),
        other => Ok(Value::Opaque(opaque_repr(other))),
    }
}

fn unpack_table(table: &Table, depth: usize, seen: &mut HashSet<usize>) -> Result<Value, Error> {
    let ptr = table.to_pointer() as usize;
    if !seen.insert(ptr) {
        return Err(Error::Marshal("self-referential table".to_string()));
    }

    let mut pairs = Vec::new();
    for entry in table.clone().pairs::<LuaValue, LuaValue>() {
        pairs.push(entry.map_err(Error::from_lua)?);
    }
    let keys: Vec<TableKey> = pairs.iter().map(|(key, _)| table_key(key)).collect();

    let unpacked = match classify(&keys) {
        Shape::Sequence(len) => {
            let mut items = vec![Value::Nil; len];
            for ((_, item), key) in pairs.iter().zip(&keys) {
                if let TableKey::Int(i) = key {
                    items[(*i - 1) as usize] = unpack_at(item, depth + 1, seen)?;
                }
            }
            Value::Sequence(items)
        }
        Shape::Mapping => {
            let mut map = IndexMap::with_capacity(pairs.len());
            for ((_, item), key) in pairs.iter().zip(&keys) {
                map.insert(key.render(), unpack_at(item, depth + 1, seen)?);
            }
            Value::Mapping(map)
        }
    };

    seen.remove(&ptr);
    Ok(unpacked)
}

fn table_key(key: &LuaValue) -> TableKey {
    match key {
        LuaValue::Integer(i) => TableKey::Int(*i),
        LuaValue::Number(n) => TableKey::Number(*n),
        LuaValue::String(s) => TableKey::Str(s.to_string_lossy().to_string()),
        LuaValue::Boolean(b) => TableKey::Str(b.to_string()),
        other => TableKey::Other(opaque_repr(other)),
    }
}

fn opaque_repr(value: &LuaValue) -> String {
    format!("{}: {:?}", value.type_name(), value.to_pointer())
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    fn eval(lua: &Lua, source: &str) -> Value {
        let value = lua
            .load(format!("return {source}"))
            .eval::<LuaValue>()
            .unwrap();
        unpack(&value).unwrap()
    }

    fn seq(items: Vec<Value>) -> Value {
        Value::Sequence(items)
    }

    fn s(text: &str) -> Value {
        Value::String(text.to_string())
    }

    #[test]
    fn test_unpack_scalars() {
        let lua = Lua::new();
        assert_eq!(eval(&lua, "nil"), Value::Nil);
        assert_eq!(eval(&lua, "true"), Value::Bool(true));
        assert_eq!(eval(&lua, "false"), Value::Bool(false));
        assert_eq!(eval(&lua, "1"), Value::Number(1.0));
        assert_eq!(eval(&lua, "\"hello\""), s("hello"));
    }

    #[test]
    fn test_unpack_sequences() {
        let lua = Lua::new();
        assert_eq!(
            eval(&lua, "{\"hello\", \"world\"}"),
            seq(vec![s("hello"), s("world")])
        );
        assert_eq!(eval(&lua, "{[1]=\"one\"}"), seq(vec![s("one")]));
    }

    #[test]
    fn test_unpack_mappings() {
        let lua = Lua::new();
        assert_eq!(
            eval(&lua, "{hello=\"world\", [1]=\"one\"}"),
            Value::mapping([("hello", s("world")), ("1", s("one"))])
        );
        assert_eq!(
            eval(&lua, "{[2]=\"two\"}"),
            Value::mapping([("2", s("two"))])
        );
        assert_eq!(
            eval(&lua, "{[1.1]=\"one\"}"),
            Value::mapping([("1.1", s("one"))])
        );
    }

    #[test]
    fn test_unpack_recurses_both_shapes() {
        let lua = Lua::new();
        assert_eq!(
            eval(&lua, "{array={3, 2, \"one\"}}"),
            Value::mapping([(
                "array",
                seq(vec![Value::Number(3.0), Value::Number(2.0), s("one")])
            )])
        );
        assert_eq!(
            eval(&lua, "{{hello=\"world\", foo=\"bar\"}, true}"),
            seq(vec![
                Value::mapping([("hello", s("world")), ("foo", s("bar"))]),
                Value::Bool(true),
            ])
        );
    }

    #[test]
    fn test_unpack_function_is_opaque() {
        let lua = Lua::new();
        let value = eval(&lua, "function() return 1 end");
        match value {
            Value::Opaque(repr) => assert!(repr.starts_with("function: 0x"), "{repr}"),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn test_unpack_rejects_cycles() {
        let lua = Lua::new();
        let value = lua
            .load("local t = {} t.me = t return t")
            .eval::<LuaValue>()
            .unwrap();
        assert!(matches!(unpack(&value), Err(Error::Marshal(_))));
    }

    #[test]
    fn test_shared_subtable_is_not_a_cycle() {
        let lua = Lua::new();
        let value = lua
            .load("local leaf = {1} return {a=leaf, b=leaf}")
            .eval::<LuaValue>()
            .unwrap();
        assert!(unpack(&value).is_ok());
    }

    #[test]
    fn test_pack_round_trips_host_values() {
        let lua = Lua::new();
        let cases = vec![
            Value::from(None::<Vec<String>>),
            Value::from(None::<std::collections::HashMap<i64, f64>>),
            Value::from(true),
            Value::from(false),
            Value::from(1),
            Value::from(2u64),
            Value::from("hello"),
            Value::from(vec!["hello", "world"]),
            Value::from(hashmap! { "hello".to_string() => "world" }),
            Value::from(hashmap! { "1".to_string() => "one" }),
            Value::from(hashmap! { 1i64 => "one" }),
            Value::from(hashmap! { "array".to_string() => vec!["hello", "world"] }),
        ];
        for value in cases {
            let packed = pack(&lua, &value).unwrap();
            assert_eq!(unpack(&packed).unwrap(), value, "{value:?}");
        }
    }

    #[test]
    fn test_pack_nil_container_is_nil_not_empty() {
        let lua = Lua::new();
        let packed = pack(&lua, &Value::from(None::<Vec<String>>)).unwrap();
        assert!(matches!(packed, LuaValue::Nil));
    }

    #[test]
    fn test_pack_sequence_of_mappings() {
        let lua = Lua::new();
        let value = Value::from(vec![
            hashmap! { "foo".to_string() => 1.23 },
            hashmap! { "bar".to_string() => 4.56 },
        ]);
        let packed = pack(&lua, &value).unwrap();
        assert_eq!(unpack(&packed).unwrap(), value);
    }

    #[test]
    fn test_pack_rejects_opaque() {
        let lua = Lua::new();
        assert!(pack(&lua, &Value::Opaque("function: 0x0".to_string())).is_err());
    }
}

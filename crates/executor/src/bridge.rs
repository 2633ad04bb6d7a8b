//! Value bridging between Lua tables and JSON.
//!
//! A table whose raw length is non-zero (dense 1-based integer keys) crosses
//! as an array; every other table crosses as a map of its string keys.
//! Lua integers stay integral; floats stay floats. Values JSON cannot
//! represent (functions, userdata, non-finite floats) cross as null.

use mlua::{Lua, Table, Value as LuaValue};
use serde_json::{Map, Number, Value};

/// Convert a Lua value into JSON.
pub fn lua_to_json(value: &LuaValue) -> Value {
    match value {
        LuaValue::Nil => Value::Null,
        LuaValue::Boolean(b) => Value::Bool(*b),
        LuaValue::Integer(i) => Value::Number((*i).into()),
        LuaValue::Number(n) => Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
        LuaValue::String(s) => Value::String(s.to_string_lossy().to_string()),
        LuaValue::Table(table) => table_to_json(table),
        // Functions, userdata, threads have no JSON image
        _ => Value::Null,
    }
}

fn table_to_json(table: &Table) -> Value {
    let len = table.raw_len();
    if len > 0 {
        let mut items = Vec::with_capacity(len);
        for i in 1..=len {
            let item: LuaValue = table.raw_get(i).unwrap_or(LuaValue::Nil);
            items.push(lua_to_json(&item));
        }
        return Value::Array(items);
    }
    let mut map = Map::new();
    for pair in table.clone().pairs::<LuaValue, LuaValue>() {
        let Ok((key, val)) = pair else { continue };
        // Non-string keys are dropped, as in a JSON object
        if let LuaValue::String(k) = key {
            map.insert(k.to_string_lossy().to_string(), lua_to_json(&val));
        }
    }
    Value::Object(map)
}

/// Convert a JSON value into a Lua value in `lua`.
pub fn json_to_lua(lua: &Lua, value: &Value) -> mlua::Result<LuaValue> {
    Ok(match value {
        Value::Null => LuaValue::Nil,
        Value::Bool(b) => LuaValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                LuaValue::Integer(i)
            } else {
                LuaValue::Number(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => LuaValue::String(lua.create_string(s)?),
        Value::Array(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, json_to_lua(lua, item)?)?;
            }
            LuaValue::Table(table)
        }
        Value::Object(map) => {
            let table = lua.create_table_with_capacity(0, map.len())?;
            for (key, val) in map {
                table.raw_set(key.as_str(), json_to_lua(lua, val)?)?;
            }
            LuaValue::Table(table)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(value: Value) -> Value {
        let lua = Lua::new();
        let lua_value = json_to_lua(&lua, &value).unwrap();
        lua_to_json(&lua_value)
    }

    #[test]
    fn scalars_round_trip() {
        for v in [json!(null), json!(true), json!(42), json!(2.5), json!("hi")] {
            assert_eq!(round_trip(v.clone()), v);
        }
    }

    #[test]
    fn integers_stay_integral() {
        assert_eq!(round_trip(json!(7)), json!(7));
        assert_ne!(round_trip(json!(7)), json!(7.0));
    }

    #[test]
    fn dense_tables_are_arrays() {
        assert_eq!(round_trip(json!([1, 2, 3])), json!([1, 2, 3]));
        assert_eq!(round_trip(json!([])), json!({}));
        // An empty Lua table has no way to say "array"; it crosses as a map.
    }

    #[test]
    fn nested_structures_round_trip() {
        let v = json!({"user": {"name": "Alice", "tags": ["a", "b"]}, "n": 3});
        assert_eq!(round_trip(v.clone()), v);
    }

    #[test]
    fn lua_side_shapes() {
        let lua = Lua::new();
        // {1, 2, ["x"] = 3} has a dense part, so it crosses as an array and
        // the string key is dropped
        let table: Table = lua
            .load(r#"return {1, 2, x = 3}"#)
            .eval()
            .unwrap();
        assert_eq!(table_to_json(&table), json!([1, 2]));

        // Pure string keys cross as a map
        let table: Table = lua.load(r#"return {a = 1, b = "two"}"#).eval().unwrap();
        assert_eq!(table_to_json(&table), json!({"a": 1, "b": "two"}));

        // Functions have no JSON image
        let table: Table = lua.load(r#"return {f = function() end}"#).eval().unwrap();
        assert_eq!(table_to_json(&table), json!({"f": null}));
    }
}

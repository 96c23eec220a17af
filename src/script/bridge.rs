//! Conversion between Lua values and host values
//!
//! Lua tables are ambiguous: a table with a non-empty sequence part becomes
//! a list (1-based indices shift to 0-based), everything else becomes a map.
//! An empty table is therefore always an empty map. A table with both
//! sequence items and other keys is rejected.

use std::collections::BTreeMap;

use mlua::{Lua, Table};

use super::placeholder::Placeholder;
use super::value::Value;
use crate::common::Error;

/// Convert a Lua value into a host value
pub fn from_lua(value: &mlua::Value) -> mlua::Result<Value> {
    match value {
        mlua::Value::Nil => Ok(Value::Null),
        mlua::Value::Boolean(b) => Ok(Value::Bool(*b)),
        mlua::Value::Integer(i) => Ok(Value::Number(*i as f64)),
        mlua::Value::Number(n) => Ok(Value::Number(*n)),
        mlua::Value::String(s) => Ok(Value::String(s.to_str()?.to_string())),
        mlua::Value::Table(t) => table_to_value(t),
        mlua::Value::UserData(ud) => {
            let placeholder = ud.borrow::<Placeholder>().map_err(|_| {
                mlua::Error::runtime("unsupported userdata value, expected a placeholder")
            })?;
            Ok(Value::Placeholder(placeholder.clone()))
        }
        other => Err(mlua::Error::runtime(format!(
            "cannot convert {} to a value",
            other.type_name()
        ))),
    }
}

fn table_to_value(table: &Table) -> mlua::Result<Value> {
    let len = table.raw_len();
    if len > 0 {
        for pair in table.clone().pairs::<mlua::Value, mlua::Value>() {
            let (key, _) = pair?;
            let in_sequence = matches!(key, mlua::Value::Integer(i) if i >= 1 && i as usize <= len);
            if !in_sequence {
                return Err(mlua::Error::runtime(format!(
                    "table mixes list items with key {}; use either a list or a map",
                    format_compact(&key)
                )));
            }
        }
        let mut items = Vec::with_capacity(len);
        for i in 1..=len {
            let item: mlua::Value = table.raw_get(i)?;
            items.push(from_lua(&item)?);
        }
        return Ok(Value::List(items));
    }

    let mut entries = BTreeMap::new();
    for pair in table.clone().pairs::<mlua::Value, mlua::Value>() {
        let (key, value) = pair?;
        let key = match &key {
            mlua::Value::String(s) => s.to_str()?.to_string(),
            mlua::Value::Integer(i) => i.to_string(),
            mlua::Value::Number(n) => n.to_string(),
            other => {
                return Err(mlua::Error::runtime(format!(
                    "unsupported table key of type {}",
                    other.type_name()
                )))
            }
        };
        entries.insert(key, from_lua(&value)?);
    }
    Ok(Value::Map(entries))
}

/// Convert a host value into a Lua value
pub fn to_lua(lua: &Lua, value: &Value) -> mlua::Result<mlua::Value> {
    match value {
        Value::Null => Ok(mlua::Value::Nil),
        Value::Bool(b) => Ok(mlua::Value::Boolean(*b)),
        Value::Number(n) => {
            if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                Ok(mlua::Value::Integer(*n as i64))
            } else {
                Ok(mlua::Value::Number(*n))
            }
        }
        Value::String(s) => Ok(mlua::Value::String(lua.create_string(s)?)),
        Value::List(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, to_lua(lua, item)?)?;
            }
            Ok(mlua::Value::Table(table))
        }
        Value::Map(entries) => {
            let table = lua.create_table_with_capacity(0, entries.len())?;
            for (k, v) in entries {
                table.raw_set(k.as_str(), to_lua(lua, v)?)?;
            }
            Ok(mlua::Value::Table(table))
        }
        Value::Placeholder(p) => Ok(mlua::Value::UserData(lua.create_userdata(p.clone())?)),
    }
}

/// Render a Lua argument compactly for call logs; tables are not expanded
pub fn format_compact(value: &mlua::Value) -> String {
    match value {
        mlua::Value::Nil => "nil".to_string(),
        mlua::Value::Boolean(b) => b.to_string(),
        mlua::Value::Integer(i) => i.to_string(),
        mlua::Value::Number(n) => n.to_string(),
        mlua::Value::String(s) => s.to_string_lossy().to_string(),
        mlua::Value::Table(_) => "{...}".to_string(),
        mlua::Value::UserData(ud) => match ud.borrow::<Placeholder>() {
            Ok(p) => p.to_string(),
            Err(_) => "userdata".to_string(),
        },
        other => other.type_name().to_string(),
    }
}

/// Find a host error raised through one or more Lua call frames
pub fn host_error(err: &mlua::Error) -> Option<&Error> {
    match err {
        mlua::Error::CallbackError { cause, .. } => host_error(cause),
        mlua::Error::WithContext { cause, .. } => host_error(cause),
        mlua::Error::ExternalError(e) => e.downcast_ref::<Error>(),
        _ => None,
    }
}

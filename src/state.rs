//! Per-file state store
//!
//! Captured values flow from one test step to the next through the script's
//! `State` global. One store exists per file execution; it lives on the
//! thread that owns the Lua runtime and is dropped with the suite.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use mlua::{Lua, Table};

use crate::common::{Error, Result};
use crate::script::{bridge, Value};

/// Mapping from capture name to a scalar value
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    values: Rc<RefCell<BTreeMap<String, Value>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.borrow().get(name).cloned()
    }

    /// Store a scalar; storing null removes the entry
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        Self::validate(name, &value)?;
        let mut values = self.values.borrow_mut();
        if value.is_null() {
            values.remove(name);
        } else {
            values.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// Check that `value` can be stored under `name`
    pub fn validate(name: &str, value: &Value) -> Result<()> {
        if value.is_null() || value.is_scalar() {
            Ok(())
        } else {
            Err(Error::UnsupportedSave {
                name: name.to_string(),
                kind: value.type_name().to_string(),
            })
        }
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values.borrow().clone()
    }

    /// Build the `State` table whose reads and writes go through this store
    pub fn bind(&self, lua: &Lua) -> mlua::Result<Table> {
        let table = lua.create_table()?;
        let meta = lua.create_table()?;

        let store = self.clone();
        meta.set(
            "__index",
            lua.create_function(move |lua, (_, key): (Table, String)| match store.get(&key) {
                Some(value) => bridge::to_lua(lua, &value),
                None => Ok(mlua::Value::Nil),
            })?,
        )?;

        let store = self.clone();
        meta.set(
            "__newindex",
            lua.create_function(
                move |_, (_, key, value): (Table, String, mlua::Value)| {
                    let value = bridge::from_lua(&value)?;
                    store.set(&key, value).map_err(mlua::Error::external)
                },
            )?,
        )?;

        let store = self.clone();
        meta.set(
            "__pairs",
            lua.create_function(move |lua, _: Table| {
                let snapshot = lua.create_table()?;
                for (k, v) in store.snapshot() {
                    snapshot.raw_set(k, bridge::to_lua(lua, &v)?)?;
                }
                let next: mlua::Function = lua.globals().get("next")?;
                Ok((next, snapshot, mlua::Value::Nil))
            })?,
        )?;

        table.set_metatable(Some(meta));
        Ok(table)
    }
}

//! Placeholder markers used inside expected trees
//!
//! Scripts build these with the global constructors `Ignore()`, `NotNull()`,
//! `Save(name, allowNull?)`, `Contains(substring, caseSensitive?)` and the
//! `Null` sentinel. They travel through the bridge as opaque userdata.

use std::fmt;

use mlua::UserData;
use serde::Serialize;

/// Marker that changes comparison semantics at its path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "placeholder", rename_all = "snake_case")]
pub enum Placeholder {
    /// Matches anything, including null
    Ignore,
    /// Matches any non-null value
    NotNull,
    /// Matches like `NotNull` (or anything when `allow_null`) and captures
    /// the actual value into `State[name]`
    Save { name: String, allow_null: bool },
    /// Matches strings containing `substring`
    Contains {
        substring: String,
        case_sensitive: bool,
    },
    /// Matches only null
    Null,
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::Ignore => write!(f, "Ignore()"),
            Placeholder::NotNull => write!(f, "NotNull()"),
            Placeholder::Save { name, allow_null } if *allow_null => {
                write!(f, "Save({:?}, true)", name)
            }
            Placeholder::Save { name, .. } => write!(f, "Save({:?})", name),
            Placeholder::Contains {
                substring,
                case_sensitive,
            } if *case_sensitive => write!(f, "Contains({:?}, true)", substring),
            Placeholder::Contains { substring, .. } => write!(f, "Contains({:?})", substring),
            Placeholder::Null => write!(f, "Null"),
        }
    }
}

impl UserData for Placeholder {
    fn add_methods<M: mlua::UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(mlua::MetaMethod::ToString, |_, this, ()| {
            Ok(this.to_string())
        });
    }
}

/// Register the placeholder constructors and the `Null` sentinel as globals
pub fn register(lua: &mlua::Lua) -> mlua::Result<()> {
    let globals = lua.globals();

    globals.set(
        "Ignore",
        lua.create_function(|_, ()| Ok(Placeholder::Ignore))?,
    )?;
    globals.set(
        "NotNull",
        lua.create_function(|_, ()| Ok(Placeholder::NotNull))?,
    )?;
    globals.set(
        "Save",
        lua.create_function(|_, (name, allow_null): (String, Option<bool>)| {
            Ok(Placeholder::Save {
                name,
                allow_null: allow_null.unwrap_or(false),
            })
        })?,
    )?;
    globals.set(
        "Contains",
        lua.create_function(|_, (substring, case_sensitive): (String, Option<bool>)| {
            Ok(Placeholder::Contains {
                substring,
                case_sensitive: case_sensitive.unwrap_or(false),
            })
        })?,
    )?;
    globals.set("Null", Placeholder::Null)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_defaults() {
        let lua = mlua::Lua::new();
        register(&lua).unwrap();

        let save: mlua::AnyUserData = lua.load(r#"Save("id")"#).eval().unwrap();
        assert_eq!(
            *save.borrow::<Placeholder>().unwrap(),
            Placeholder::Save {
                name: "id".into(),
                allow_null: false
            }
        );

        let contains: mlua::AnyUserData = lua.load(r#"Contains("ID")"#).eval().unwrap();
        assert_eq!(
            *contains.borrow::<Placeholder>().unwrap(),
            Placeholder::Contains {
                substring: "ID".into(),
                case_sensitive: false
            }
        );
    }

    #[test]
    fn test_tostring() {
        let lua = mlua::Lua::new();
        register(&lua).unwrap();
        let s: String = lua
            .load(r#"tostring(Save("token", true))"#)
            .eval()
            .unwrap();
        assert_eq!(s, r#"Save("token", true)"#);
    }
}

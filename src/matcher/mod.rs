//! Structural comparison engine
//!
//! [`compare`] walks an expected tree (which may contain placeholders) and an
//! actual tree side by side, tracking a structured [`Path`]. It never touches
//! the state store; [`check`] applies the collected `Save` bindings only when
//! the whole comparison succeeded.

mod diff;
mod path;

use std::fmt;

use crate::common::{Error, Result};
use crate::script::{Placeholder, Value};
use crate::state::StateStore;

pub use path::Path;

/// Rendering used when the actual tree has no node at a path
const MISSING: &str = "<missing>";

/// One difference between expected and actual
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub path: Path,
    pub want: String,
    pub got: String,
}

/// An accepted `Save` placeholder
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub path: Path,
    pub name: String,
}

/// Result of a comparison
#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub mismatches: Vec<Mismatch>,
    pub bindings: Vec<Binding>,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Rendered "-want +got" diff; empty on success
    pub fn diff(&self) -> String {
        if self.is_match() {
            String::new()
        } else {
            diff::render(&self.mismatches)
        }
    }
}

/// A failed comparison, kept structured for renderers
#[derive(Debug, Clone, PartialEq)]
pub struct MatchFailure {
    pub diff: String,
    pub expected: Value,
    pub actual: Value,
    pub mismatches: Vec<Mismatch>,
}

impl fmt::Display for MatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.diff.trim_end())
    }
}

/// Compare `actual` against `expected`
pub fn compare(expected: &Value, actual: &Value) -> MatchOutcome {
    let mut outcome = MatchOutcome::default();
    walk(expected, Some(actual), &Path::root(), &mut outcome);
    outcome
}

/// Compare and, on success, write every captured value into `state`
///
/// Captures are all-or-nothing: each one is validated before any is written.
pub fn check(expected: &Value, actual: &Value, state: &StateStore) -> Result<()> {
    let outcome = compare(expected, actual);
    if !outcome.is_match() {
        return Err(Error::Match(Box::new(MatchFailure {
            diff: outcome.diff(),
            expected: expected.clone(),
            actual: actual.clone(),
            mismatches: outcome.mismatches,
        })));
    }

    let captured: Vec<(String, Value)> = outcome
        .bindings
        .into_iter()
        .map(|b| {
            let value = b.path.extract(actual).cloned().unwrap_or(Value::Null);
            (b.name, value)
        })
        .collect();

    for (name, value) in &captured {
        StateStore::validate(name, value)?;
    }
    for (name, value) in captured {
        state.set(&name, value)?;
    }
    Ok(())
}

fn render(actual: Option<&Value>) -> String {
    actual.map_or_else(|| MISSING.to_string(), Value::to_string)
}

fn is_absent(actual: Option<&Value>) -> bool {
    actual.map_or(true, Value::is_null)
}

fn mismatch(out: &mut MatchOutcome, path: &Path, want: impl fmt::Display, actual: Option<&Value>) {
    out.mismatches.push(Mismatch {
        path: path.clone(),
        want: want.to_string(),
        got: render(actual),
    });
}

fn walk(expected: &Value, actual: Option<&Value>, path: &Path, out: &mut MatchOutcome) {
    match expected {
        Value::Placeholder(p) => resolve(p, actual, path, out),
        Value::Null => {
            if !is_absent(actual) {
                mismatch(out, path, expected, actual);
            }
        }
        Value::List(_) | Value::Map(_) if expected.is_empty_container() => {
            if !actual.is_some_and(Value::is_empty_container) {
                mismatch(out, path, expected, actual);
            }
        }
        Value::List(want) => match actual {
            Some(Value::List(got)) => {
                for (i, item) in want.iter().enumerate() {
                    walk(item, got.get(i), &path.index(i), out);
                }
                for (i, extra) in got.iter().enumerate().skip(want.len()) {
                    mismatch(out, &path.index(i), MISSING, Some(extra));
                }
            }
            _ => mismatch(out, path, expected, actual),
        },
        Value::Map(want) => match actual {
            Some(Value::Map(got)) => {
                for (key, item) in want {
                    walk(item, got.get(key), &path.key(key.as_str()), out);
                }
                for (key, extra) in got.iter().filter(|(k, _)| !want.contains_key(*k)) {
                    mismatch(out, &path.key(key.as_str()), MISSING, Some(extra));
                }
            }
            _ => mismatch(out, path, expected, actual),
        },
        Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            if actual != Some(expected) {
                mismatch(out, path, expected, actual);
            }
        }
    }
}

fn resolve(placeholder: &Placeholder, actual: Option<&Value>, path: &Path, out: &mut MatchOutcome) {
    let ok = match placeholder {
        Placeholder::Ignore => true,
        Placeholder::NotNull => !is_absent(actual),
        Placeholder::Null => is_absent(actual),
        Placeholder::Save { name, allow_null } => {
            let ok = *allow_null || !is_absent(actual);
            if ok {
                out.bindings.push(Binding {
                    path: path.clone(),
                    name: name.clone(),
                });
            }
            ok
        }
        Placeholder::Contains {
            substring,
            case_sensitive,
        } => match actual.and_then(Value::as_str) {
            Some(s) if *case_sensitive => s.contains(substring.as_str()),
            Some(s) => s.to_lowercase().contains(&substring.to_lowercase()),
            None => false,
        },
    };
    if !ok {
        mismatch(out, path, placeholder, actual);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    fn map(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    fn save(name: &str) -> Value {
        Value::Placeholder(Placeholder::Save {
            name: name.into(),
            allow_null: false,
        })
    }

    fn contains(s: &str, case_sensitive: bool) -> Value {
        Value::Placeholder(Placeholder::Contains {
            substring: s.into(),
            case_sensitive,
        })
    }

    #[test]
    fn test_ignore_matches_anything() {
        let ignore = Value::Placeholder(Placeholder::Ignore);
        for actual in [Value::Null, v(json!(1)), v(json!({"a": [1]})), v(json!([]))] {
            assert!(compare(&ignore, &actual).is_match());
        }
        let nested = map(vec![("a", ignore.clone()), ("b", ignore)]);
        assert!(compare(&nested, &v(json!({"a": null, "b": {"x": 1}}))).is_match());
    }

    #[test]
    fn test_not_null() {
        let expected = map(vec![("id", Value::Placeholder(Placeholder::NotNull))]);
        assert!(compare(&expected, &v(json!({"id": 0}))).is_match());
        assert!(compare(&expected, &v(json!({"id": []}))).is_match());
        assert!(!compare(&expected, &v(json!({"id": null}))).is_match());

        let outcome = compare(&expected, &v(json!({})));
        assert_eq!(outcome.mismatches[0].got, "<missing>");
    }

    #[test]
    fn test_explicit_null() {
        let expected = map(vec![("deleted", Value::Placeholder(Placeholder::Null))]);
        assert!(compare(&expected, &v(json!({"deleted": null}))).is_match());
        assert!(!compare(&expected, &v(json!({"deleted": false}))).is_match());
    }

    #[test]
    fn test_save_nested_writes_state() {
        let state = StateStore::new();
        let expected = map(vec![("a", map(vec![("b", save("x"))]))]);
        check(&expected, &v(json!({"a": {"b": 7}})), &state).unwrap();
        assert_eq!(state.get("x"), Some(Value::Number(7.0)));
    }

    #[test]
    fn test_save_not_applied_when_match_fails() {
        let state = StateStore::new();
        let expected = map(vec![
            ("a", map(vec![("b", save("x"))])),
            ("status", Value::Number(200.0)),
        ]);
        let err = check(&expected, &v(json!({"a": {"b": 7}, "status": 500})), &state).unwrap_err();
        assert!(matches!(err, Error::Match(_)));
        assert_eq!(state.get("x"), None);
    }

    #[test]
    fn test_save_allow_null_removes_key() {
        let state = StateStore::new();
        state.set("cursor", Value::from("c1")).unwrap();
        let expected = map(vec![(
            "next",
            Value::Placeholder(Placeholder::Save {
                name: "cursor".into(),
                allow_null: true,
            }),
        )]);
        check(&expected, &v(json!({"next": null})), &state).unwrap();
        assert_eq!(state.get("cursor"), None);
    }

    #[test]
    fn test_save_container_is_rejected_without_partial_writes() {
        let state = StateStore::new();
        let expected = map(vec![("a", save("first")), ("b", save("second"))]);
        let err = check(&expected, &v(json!({"a": "ok", "b": {"x": 1}})), &state).unwrap_err();
        assert!(matches!(err, Error::UnsupportedSave { ref name, .. } if name == "second"));
        assert_eq!(state.get("first"), None);
    }

    #[test]
    fn test_empty_container_ambiguity() {
        let empty = Value::Map(BTreeMap::new());
        assert!(compare(&empty, &v(json!([]))).is_match());
        assert!(compare(&empty, &v(json!({}))).is_match());
        assert!(!compare(&empty, &v(json!({"k": 1}))).is_match());
        assert!(!compare(&empty, &v(json!(["v"]))).is_match());
        assert!(!compare(&empty, &Value::Null).is_match());
    }

    #[test]
    fn test_contains_case_folding() {
        let actual = Value::from("user id: 42");
        assert!(compare(&contains("ID", false), &actual).is_match());
        assert!(!compare(&contains("ID", true), &actual).is_match());
        assert!(compare(&contains("id", true), &actual).is_match());
        assert!(!compare(&contains("id", false), &Value::Number(1.0)).is_match());
    }

    #[test]
    fn test_lists_are_zero_based() {
        let expected = v(json!([{"id": 1}, {"id": 2}]));
        let outcome = compare(&expected, &v(json!([{"id": 1}, {"id": 3}])));
        assert_eq!(outcome.mismatches.len(), 1);
        assert_eq!(outcome.mismatches[0].path.to_string(), ".1.id");
    }

    #[test]
    fn test_length_differences_are_reported() {
        let outcome = compare(&v(json!([1])), &v(json!([1, 2])));
        assert_eq!(outcome.mismatches[0].path, Path::root().index(1));
        assert_eq!(outcome.mismatches[0].want, "<missing>");

        let outcome = compare(&v(json!([1, 2])), &v(json!([1])));
        assert_eq!(outcome.mismatches[0].got, "<missing>");
    }

    #[test]
    fn test_extra_keys_are_mismatches() {
        let outcome = compare(&v(json!({"a": 1})), &v(json!({"a": 1, "b": 2})));
        assert_eq!(outcome.mismatches.len(), 1);
        assert_eq!(outcome.mismatches[0].path, Path::root().key("b"));
    }

    #[test]
    fn test_placeholder_in_list_reports_index() {
        let expected = Value::List(vec![
            map(vec![("id", Value::Placeholder(Placeholder::NotNull))]),
            map(vec![("id", Value::Placeholder(Placeholder::NotNull))]),
        ]);
        let outcome = compare(&expected, &v(json!([{"id": "a"}, {"id": null}])));
        assert_eq!(outcome.mismatches.len(), 1);
        let found = &outcome.mismatches[0];
        assert_eq!(found.path, Path::root().index(1).key("id"));
        assert_eq!(found.want, "NotNull()");
    }

    #[test]
    fn test_diff_and_failure_payload() {
        let state = StateStore::new();
        let expected = map(vec![("status", Value::Number(200.0))]);
        let actual = v(json!({"status": 404}));
        let Err(Error::Match(failure)) = check(&expected, &actual, &state) else {
            panic!("expected a match error");
        };
        assert_eq!(failure.diff, "diff -want +got:\n  .status:\n-   200\n+   404\n");
        assert_eq!(failure.expected, expected);
        assert_eq!(failure.actual, actual);
    }

    #[test]
    fn test_type_mismatch_reports_whole_node() {
        let outcome = compare(&v(json!({"a": {"b": 1}})), &v(json!({"a": "text"})));
        assert_eq!(outcome.mismatches[0].path.to_string(), ".a");
        assert_eq!(outcome.mismatches[0].got, "\"text\"");
    }
}

//! Test result reporting
//!
//! A reporter is scoped: the root reporter hands a file-scoped reporter to
//! the closure given to [`Reporter::run_file`], which in turn hands a
//! test-scoped reporter to [`Reporter::run_test`]. Implementations emit
//! their start event before calling the closure and their end event after
//! it returns, so consumers always see complete start/end pairs.

pub mod json;
pub mod live;
pub mod pretty;
pub mod tally;

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::common::Error;
use crate::script::Value;

pub use json::JsonReporter;
pub use live::{Cache, Event, LiveReporter};
pub use pretty::PrettyReporter;
pub use tally::{Tally, TallyCounts};

/// Sink for the File -> Test -> (Error | Info) event tree
pub trait Reporter: Send + Sync {
    /// Open a file scope and run `f` inside it
    fn run_file(&self, path: &Path, f: &mut dyn FnMut(Arc<dyn Reporter>));

    /// Open a test scope and run `f` inside it
    fn run_test(&self, capability: &str, name: &str, f: &mut dyn FnMut(Arc<dyn Reporter>));

    /// Record an error in the current scope
    fn error(&self, error: TestError);

    /// Record a diagnostic in the current scope
    fn info(&self, info: Info);
}

/// A failure attached to a test or file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestError {
    pub message: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
}

impl TestError {
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: kind.to_string(),
            expected: None,
            actual: None,
        }
    }
}

impl From<&Error> for TestError {
    /// Match failures keep their expected/actual trees for diff rendering
    fn from(e: &Error) -> Self {
        match e {
            Error::Match(failure) => Self {
                message: e.to_string(),
                kind: e.kind().to_string(),
                expected: Some(failure.expected.clone()),
                actual: Some(failure.actual.clone()),
            },
            other => Self::new(other.kind(), other.to_string()),
        }
    }
}

/// Diagnostic category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoKind {
    Helper,
    Request,
    Response,
    Query,
    #[serde(rename = "result")]
    QueryResult,
}

/// Named argument of a logged call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfoArg {
    pub name: String,
    pub value: String,
}

/// Typed diagnostic attached to a test or file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Info {
    pub kind: InfoKind,
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<InfoArg>,
    /// Milliseconds since the owning test or file started, stamped by the reporter
    #[serde(rename = "offset")]
    pub offset_ms: u64,
    /// Position among the file's tests and file-level infos
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<u64>,
}

impl Info {
    pub fn new(kind: InfoKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            content: String::new(),
            language: None,
            args: Vec::new(),
            offset_ms: 0,
            order: None,
        }
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push(InfoArg {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

/// Reporter that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn run_file(&self, _path: &Path, f: &mut dyn FnMut(Arc<dyn Reporter>)) {
        f(Arc::new(NullReporter))
    }

    fn run_test(&self, _capability: &str, _name: &str, f: &mut dyn FnMut(Arc<dyn Reporter>)) {
        f(Arc::new(NullReporter))
    }

    fn error(&self, _error: TestError) {}

    fn info(&self, _info: Info) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatchFailure;
    use serde_json::json;

    #[test]
    fn test_match_error_keeps_payload() {
        let err = Error::Match(Box::new(MatchFailure {
            diff: "diff -want +got:\n  .status:\n-   200\n+   404\n".into(),
            expected: Value::from(json!({"status": 200})),
            actual: Value::from(json!({"status": 404})),
            mismatches: Vec::new(),
        }));
        let e = TestError::from(&err);
        assert_eq!(e.kind, "MATCH_ERROR");
        assert_eq!(e.expected, Some(Value::from(json!({"status": 200}))));
        assert!(e.message.contains(".status"));
    }

    #[test]
    fn test_generic_error_has_no_payload() {
        let e = TestError::from(&Error::Setup("db down".into()));
        assert_eq!(e.kind, "SETUP_ERROR");
        assert_eq!(
            serde_json::to_value(&e).unwrap(),
            json!({"message": "Error during setup: db down", "kind": "SETUP_ERROR"})
        );
    }

    #[test]
    fn test_info_serialization() {
        let info = Info::new(InfoKind::QueryResult, "rows")
            .content("[]")
            .language("json")
            .arg("limit", "10");
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({
                "kind": "result",
                "title": "rows",
                "content": "[]",
                "language": "json",
                "args": [{"name": "limit", "value": "10"}],
                "offset": 0
            })
        );
    }
}

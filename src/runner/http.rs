//! HTTP capability backed by reqwest
//!
//! Scripts use it as `Test.http(name, function(t) ... end)`:
//!
//! ```lua
//! Test.http("create user", function(t)
//!     t.header("Authorization", "Bearer " .. State.token)
//!     t.send("POST", "/users", { name = "ada" })
//!     t.check(201, { id = Save("user_id"), name = "ada" })
//! end)
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;

use super::{
    string_arg, AfterTest, ArgType, Argument, CallContext, FunctionSpec, Provisioned, Runner, Setup,
    SetupContext,
};
use crate::common::{Error, Result};
use crate::reporter::{Info, InfoKind};
use crate::script::{Placeholder, Value};

/// Name of the capability in scripts
pub const NAME: &str = "http";

#[derive(Debug, Clone)]
struct Recorded {
    status: u16,
    body: Value,
}

#[derive(Debug, Default)]
struct Transient {
    headers: Vec<(String, String)>,
    response: Option<Recorded>,
}

/// Sends requests to one base URL and checks the last response
pub struct HttpRunner {
    client: reqwest::Client,
    base_url: String,
    default_headers: BTreeMap<String, String>,
    transient: Mutex<Transient>,
}

impl HttpRunner {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        default_headers: BTreeMap<String, String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            default_headers,
            transient: Mutex::new(Transient::default()),
        }
    }

    /// Runner used only for its metadata, before any setup has happened
    pub fn declared() -> Self {
        Self::new(reqwest::Client::new(), "", BTreeMap::new())
    }

    fn transient(&self) -> MutexGuard<'_, Transient> {
        self.transient
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn send(&self, cx: &CallContext<'_>, args: &[Value]) -> Result<Vec<Value>> {
        if self.transient().response.is_some() {
            return Err(Error::invalid_argument(
                "send",
                "send already called in this test",
            ));
        }

        let method = string_arg("send", args, 0)?;
        let path = string_arg("send", args, 1)?;
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| Error::invalid_argument("send", format!("unknown method {}", method)))?;

        let mut request = self.client.request(method.clone(), self.url(&path));
        for (name, value) in &self.default_headers {
            request = request.header(name, value);
        }
        for (name, value) in &self.transient().headers {
            request = request.header(name, value);
        }

        let mut info = Info::new(InfoKind::Request, format!("{} {}", method, path));
        match args.get(2) {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => {
                info = info.content(text.clone());
                request = request.body(text.clone());
            }
            Some(body @ (Value::Map(_) | Value::List(_))) => {
                let json = body.to_json();
                info = info
                    .content(serde_json::to_string_pretty(&json)?)
                    .language("json");
                request = request.json(&json);
            }
            Some(other) => {
                return Err(Error::invalid_argument(
                    "send",
                    format!("body must be a string or table, got {}", other.type_name()),
                ))
            }
        }
        cx.info(info);

        tracing::debug!(%method, path, "Sending request");
        let (status, text) = cx.block_on(async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        })??;

        let (body, info) = match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(json) => (
                Value::from(json.clone()),
                Info::new(InfoKind::Response, status.to_string())
                    .content(serde_json::to_string_pretty(&json)?)
                    .language("json"),
            ),
            Err(_) => (
                Value::String(text.clone()),
                Info::new(InfoKind::Response, status.to_string()).content(text),
            ),
        };
        cx.info(info);

        let recorded = Recorded { status, body };
        self.transient().response = Some(recorded.clone());
        Ok(vec![response_value(&recorded)])
    }

    fn check(&self, cx: &CallContext<'_>, args: &[Value]) -> Result<Vec<Value>> {
        let recorded = self
            .transient()
            .response
            .clone()
            .ok_or_else(|| Error::invalid_argument("check", "send not called"))?;

        let ignore = || Value::Placeholder(Placeholder::Ignore);
        let mut expected = BTreeMap::new();
        match args {
            [Value::Map(fields), ..] => {
                if let Some(key) = fields.keys().find(|k| *k != "status" && *k != "body") {
                    return Err(Error::invalid_argument(
                        "check",
                        format!("unexpected key '{}', expected only status and body", key),
                    ));
                }
                if fields.is_empty() {
                    return Err(Error::invalid_argument(
                        "check",
                        "table needs a status or body key",
                    ));
                }
                for key in ["status", "body"] {
                    expected.insert(key.to_string(), fields.get(key).cloned().unwrap_or_else(ignore));
                }
            }
            [status @ Value::Number(_), rest @ ..] => {
                expected.insert("status".to_string(), status.clone());
                expected.insert("body".to_string(), rest.first().cloned().unwrap_or_else(ignore));
            }
            _ => {
                return Err(Error::invalid_argument(
                    "check",
                    "expected a status code or a {status, body} table",
                ))
            }
        }

        cx.check(&Value::Map(expected), &response_value(&recorded))?;
        Ok(Vec::new())
    }

    fn header(&self, args: &[Value]) -> Result<Vec<Value>> {
        let name = string_arg("header", args, 0)?;
        let value = string_arg("header", args, 1)?;
        self.transient().headers.push((name, value));
        Ok(Vec::new())
    }
}

fn response_value(recorded: &Recorded) -> Value {
    Value::Map(BTreeMap::from([
        ("status".to_string(), Value::Number(f64::from(recorded.status))),
        ("body".to_string(), recorded.body.clone()),
    ]))
}

impl Runner for HttpRunner {
    fn name(&self) -> &str {
        NAME
    }

    fn functions(&self) -> Vec<FunctionSpec> {
        vec![
            FunctionSpec::new("send", "Send an HTTP request and record the response")
                .arg(Argument::new("method", &[ArgType::String], "HTTP method"))
                .arg(Argument::new("path", &[ArgType::String], "Path relative to the base URL"))
                .arg(
                    Argument::new("body", &[ArgType::String, ArgType::Table], "Request body")
                        .optional(),
                )
                .returns(ArgType::Table),
            FunctionSpec::new("header", "Add a header to requests in this test")
                .arg(Argument::new("name", &[ArgType::String], "Header name"))
                .arg(Argument::new("value", &[ArgType::String], "Header value")),
            FunctionSpec::new("check", "Match the recorded response")
                .arg(Argument::new(
                    "status",
                    &[ArgType::Number, ArgType::Table],
                    "Expected status code, or a {status, body} table",
                ))
                .arg(Argument::new("body", &[ArgType::Table], "Expected body").optional()),
        ]
    }

    fn call(&self, cx: &CallContext<'_>, function: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        match function {
            "send" => self.send(cx, &args),
            "check" => self.check(cx, &args),
            "header" => self.header(&args),
            other => Err(Error::unknown_function(NAME, other)),
        }
    }

    fn after_test_hook(&self) -> Option<&dyn AfterTest> {
        Some(self)
    }
}

impl AfterTest for HttpRunner {
    fn after_test(&self, _cx: &CallContext<'_>) -> Result<()> {
        *self.transient() = Transient::default();
        Ok(())
    }
}

/// Script-side configuration for [`HttpSetup`]
#[derive(Debug, Default, Deserialize)]
pub struct HttpConfig {
    /// Base URL requests are resolved against
    #[serde(default)]
    pub base_url: Option<String>,

    /// Headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request timeout
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

/// Provisions an [`HttpRunner`] from the script's `Config` table
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpSetup;

impl Setup for HttpSetup {
    type Config = HttpConfig;

    fn setup(&self, _cx: &SetupContext, dir: &Path, config: HttpConfig) -> Result<Provisioned> {
        let base_url = config.base_url.ok_or_else(|| {
            Error::Setup(format!(
                "Config.base_url is not set (add it to tester.toml [script] in {})",
                dir.display()
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        tracing::debug!(base_url = %base_url, "Provisioned http runner");
        Ok(Provisioned::new(vec![Arc::new(HttpRunner::new(
            client,
            base_url,
            config.headers,
        ))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let runner = HttpRunner::new(reqwest::Client::new(), "http://localhost:8080/", BTreeMap::new());
        assert_eq!(runner.url("/users"), "http://localhost:8080/users");
        assert_eq!(runner.url("users"), "http://localhost:8080/users");
        assert_eq!(runner.url("https://other/x"), "https://other/x");
    }

    #[test]
    fn test_setup_requires_base_url() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let cx = SetupContext::new(
            rt.handle().clone(),
            tokio_util::sync::CancellationToken::new(),
        );
        let err = HttpSetup
            .setup(&cx, Path::new("."), HttpConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Setup(_)));
    }

    #[test]
    fn test_config_decoding_defaults() {
        let config: HttpConfig =
            serde_json::from_value(serde_json::json!({"base_url": "http://x"})).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://x"));
        assert_eq!(config.timeout_secs, 30);
        assert!(config.headers.is_empty());
    }

    struct Harness {
        _rt: tokio::runtime::Runtime,
        exec: SetupContext,
        state: crate::state::StateStore,
        runner: HttpRunner,
    }

    impl Harness {
        fn new(status: u16, body: serde_json::Value) -> Self {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let exec = SetupContext::new(
                rt.handle().clone(),
                tokio_util::sync::CancellationToken::new(),
            );
            let runner = HttpRunner::declared();
            runner.transient().response = Some(Recorded {
                status,
                body: Value::from(body),
            });
            Self {
                _rt: rt,
                exec,
                state: crate::state::StateStore::new(),
                runner,
            }
        }

        fn call(&self, function: &str, args: Vec<Value>) -> Result<Vec<Value>> {
            let cx = CallContext::new(
                Arc::new(crate::reporter::NullReporter),
                &self.state,
                &self.exec,
            );
            self.runner.call(&cx, function, args)
        }
    }

    fn table(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn test_check_status_and_body() {
        let h = Harness::new(200, serde_json::json!({"id": "abc"}));
        h.call("check", vec![Value::Number(200.0)]).unwrap();
        h.call("check", vec![table(serde_json::json!({"status": 200}))])
            .unwrap();
        h.call(
            "check",
            vec![table(serde_json::json!({"status": 200, "body": {"id": "abc"}}))],
        )
        .unwrap();

        let err = h.call("check", vec![Value::Number(404.0)]).unwrap_err();
        assert_eq!(err.kind(), "MATCH_ERROR");
    }

    #[test]
    fn test_check_table_with_unknown_keys_is_rejected() {
        let h = Harness::new(500, serde_json::json!({"id": "abc"}));
        let err = h
            .call("check", vec![table(serde_json::json!({"id": "WRONG", "code": 200}))])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }), "{:?}", err);

        let err = h
            .call("check", vec![table(serde_json::json!({"status": 500, "code": 1}))])
            .unwrap_err();
        assert!(err.to_string().contains("code"), "{}", err);
    }

    #[test]
    fn test_after_test_clears_response_and_headers() {
        let h = Harness::new(200, serde_json::json!({}));
        h.call("header", vec![Value::from("X-Trace"), Value::from("1")])
            .unwrap();

        let cx = CallContext::new(Arc::new(crate::reporter::NullReporter), &h.state, &h.exec);
        h.runner.after_test_hook().unwrap().after_test(&cx).unwrap();

        assert!(h.runner.transient().headers.is_empty());
        let err = h.call("check", vec![Value::Number(200.0)]).unwrap_err();
        assert!(err.to_string().contains("send not called"), "{}", err);
    }

    #[test]
    fn test_declares_after_test_hook() {
        let runner = HttpRunner::declared();
        assert!(runner.after_test_hook().is_some());
        assert!(runner.helpers().is_none());
        let names: Vec<String> = runner.functions().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["send", "header", "check"]);
    }
}

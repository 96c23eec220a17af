//! Built-in string helpers

use super::{string_arg, ArgType, Argument, CallContext, FunctionSpec, Helpers};
use crate::common::{Error, Result};
use crate::script::Value;

/// Remove the common leading indentation of a multi-line string
///
/// Blank lines do not take part in computing the indent but are kept (as
/// empty lines). The result is trimmed at both ends, which lets scripts
/// write queries inside indented long strings.
pub fn dedent(s: &str) -> String {
    let lines: Vec<&str> = s.split('\n').collect();

    let indent = lines
        .iter()
        .filter_map(|line| {
            let trimmed = line.trim_start_matches([' ', '\t']);
            (!trimmed.is_empty()).then(|| line.len() - trimmed.len())
        })
        .min()
        .unwrap_or(0);

    if indent == 0 {
        return s.trim().to_string();
    }

    lines
        .iter()
        .map(|line| {
            if line.len() >= indent {
                &line[indent..]
            } else {
                line.trim_start_matches([' ', '\t'])
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Helper set exposing `Helper.Dedent`
#[derive(Debug, Default, Clone, Copy)]
pub struct StringHelpers;

impl Helpers for StringHelpers {
    fn helper_functions(&self) -> Vec<FunctionSpec> {
        vec![FunctionSpec::new(
            "Dedent",
            "Remove common leading whitespace from every line",
        )
        .arg(Argument::new("text", &[ArgType::String], "Text to dedent"))
        .returns(ArgType::String)]
    }

    fn call_helper(&self, _cx: &CallContext<'_>, name: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        match name {
            "Dedent" => {
                let text = string_arg(name, &args, 0)?;
                Ok(vec![Value::String(dedent(&text))])
            }
            other => Err(Error::unknown_function("Helper", other)),
        }
    }
}

//! Error types for the script tester
//!
//! Errors are grouped by the scope they abort: a script or setup error ends
//! the current file, a match error only fails the test step that raised it.

use std::io;
use thiserror::Error;

use crate::matcher::MatchFailure;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the script tester
#[derive(Error, Debug)]
pub enum Error {
    // === Script Errors ===
    #[error("{0}")]
    Script(String),

    #[error("Runner '{0}' not found")]
    UnknownRunner(String),

    #[error("Function '{function}' not found on runner '{runner}'")]
    UnknownFunction { runner: String, function: String },

    #[error("{function}: {message}")]
    InvalidArgument { function: String, message: String },

    // === Setup Errors ===
    #[error("Error during setup: {0}")]
    Setup(String),

    // === Match Errors ===
    #[error("{0}")]
    Match(Box<MatchFailure>),

    #[error("Cannot save {kind} value into State.{name}: only strings, numbers and booleans can be saved")]
    UnsupportedSave { name: String, kind: String },

    // === Watch Errors ===
    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Run cancelled")]
    Cancelled,

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an unknown function error
    pub fn unknown_function(runner: &str, function: &str) -> Self {
        Self::UnknownFunction {
            runner: runner.to_string(),
            function: function.to_string(),
        }
    }

    /// Create an invalid argument error for a host function
    pub fn invalid_argument(function: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            function: function.to_string(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code, used by line reporters
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Script(_)
            | Error::UnknownRunner(_)
            | Error::UnknownFunction { .. }
            | Error::InvalidArgument { .. } => "SCRIPT_ERROR",
            Error::Setup(_) => "SETUP_ERROR",
            Error::Match(_) | Error::UnsupportedSave { .. } => "MATCH_ERROR",
            Error::Watch(_) => "WATCH_ERROR",
            Error::Cancelled => "CANCELLED",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Whether this error must stop the remainder of the file
    pub fn is_fatal_for_file(&self) -> bool {
        matches!(
            self,
            Error::Setup(_) | Error::UnknownRunner(_) | Error::Cancelled
        )
    }
}

impl From<mlua::Error> for Error {
    fn from(e: mlua::Error) -> Self {
        crate::script::bridge::host_error(&e)
            .map(clone_host_error)
            .unwrap_or_else(|| Error::Script(e.to_string()))
    }
}

/// Rebuild an owned error from one recovered behind the scripting boundary
fn clone_host_error(e: &Error) -> Error {
    match e {
        Error::Script(m) => Error::Script(m.clone()),
        Error::UnknownRunner(r) => Error::UnknownRunner(r.clone()),
        Error::UnknownFunction { runner, function } => Error::unknown_function(runner, function),
        Error::InvalidArgument { function, message } => {
            Error::invalid_argument(function, message.clone())
        }
        Error::Setup(m) => Error::Setup(m.clone()),
        Error::Match(f) => Error::Match(f.clone()),
        Error::UnsupportedSave { name, kind } => Error::UnsupportedSave {
            name: name.clone(),
            kind: kind.clone(),
        },
        Error::Watch(m) => Error::Watch(m.clone()),
        Error::Cancelled => Error::Cancelled,
        Error::Config(m) => Error::Config(m.clone()),
        Error::ConfigParse(m) => Error::ConfigParse(m.clone()),
        other => Error::Script(other.to_string()),
    }
}

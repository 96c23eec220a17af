//! Script tester - integration tests driven by Lua scenario scripts
//!
//! A script declares `Test.<capability>(name, fn)` blocks; the body calls
//! capability functions and checks responses against expected trees that
//! may contain placeholders (`Ignore`, `NotNull`, `Save`, ...). Captured
//! values flow between tests through the per-file `State` table.

pub mod cli;
pub mod commands;
pub mod common;
pub mod live;
pub mod manager;
pub mod matcher;
pub mod reporter;
pub mod runner;
pub mod script;
pub mod state;
pub mod suite;
pub mod watch;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use manager::Manager;
pub use matcher::MatchFailure;
pub use reporter::Reporter;
pub use script::{Placeholder, Value};
pub use state::StateStore;
pub use suite::Suite;

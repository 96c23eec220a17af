//! Value model and Lua bridge

pub mod bridge;
pub mod placeholder;
pub mod value;

pub use placeholder::Placeholder;
pub use value::Value;

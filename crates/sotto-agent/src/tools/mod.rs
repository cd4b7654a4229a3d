//! Tool trait, registry, and built-in tools.

pub mod base;
pub mod core_memory;
pub mod filesystem;
pub mod memory_search;
pub mod message;
pub mod registry;
pub mod shell;
pub mod spawn;
pub mod web;

pub use base::{optional_bool, optional_i64, optional_string, require_string, Tool};
pub use registry::ToolRegistry;

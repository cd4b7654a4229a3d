//! Typed configuration schema and loader.

pub mod loader;
pub mod schema;

pub use loader::{get_config_path, load_config, save_config};
pub use schema::{
    AgentDefaults, Config, ExecGuardConfig, MemoryConfig, ProviderConfig,
};

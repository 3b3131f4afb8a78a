//! Layered configuration
//!
//! Configuration is merged from four layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. User config (~/.config/lava-ctl/config.toml)
//! 3. Explicit `--config` file
//! 4. CLI overrides
//!
//! Environment variables then fill keys that no layer set. Typed settings
//! for the scheduler and the artifact store are extracted from the merged
//! tree and fail before any network I/O when a required key is missing.

mod defaults;
mod merge;
mod settings;
mod store;

pub use defaults::BuiltinDefaults;
pub use merge::{deep_merge, merge_layers};
pub use settings::{SchedulerSettings, StorageSettings};
pub use store::{
    parse_scalar, persist_key, user_config_path, Config, ConfigError, ConfigOrigin, ConfigSource,
    ENV_PARAMETERS,
};

//! Gateway configuration: schema, discovery and loading.
//!
//! Config files are looked up as `wagate.{toml,yaml,yml,json}` in the working
//! directory, then in `~/.config/wagate/`. `${ENV_VAR}` placeholders are
//! substituted before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, config_dir, discover_and_load, find_or_default_config_path, load_config,
        set_config_dir, to_toml,
    },
    schema::{GatewayConfig, ServerConfig, StoreConfig, TransportConfig, TransportKind},
};

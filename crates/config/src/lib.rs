//! Configuration loading: file discovery, `${VAR}` substitution, env overrides.

pub mod env_subst;
pub mod loader;
pub mod overrides;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, config_dir, data_dir, discover_and_load, find_config_file,
        find_or_default_config_path, load, load_config, set_config_dir, to_toml,
    },
    overrides::{apply_env_overrides, parse_duration},
    schema::{
        CourierConfig, DispatchConfig, LoggingConfig, ReconnectConfig, ServerConfig,
        WhatsAppConfig,
    },
};

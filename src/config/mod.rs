//! The `config` module turns configuration sources into settings.
//!
//! Two layers are kept:
//! - [`Settings`]: application settings loaded from `config/default.*` and
//!   `POPMQTT_*` environment variables, merged over defaults
//! - [`ClientSettings`]: the broker connection parsed out of a connection string

mod settings;

use config::{Config, Environment, File};

use crate::utils::ConfigError;

pub use settings::{
    ClientSettings, DEFAULT_PORT, DEFAULT_URI, LogSettings, PartialLogSettings, PartialSettings,
    Settings,
};

/// Loads the configuration from the default file and environment variables
/// (`POPMQTT_URI`, `POPMQTT_LOG_LEVEL`) and merges it with default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::with_prefix("POPMQTT").separator("_"));

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merge(partial))
}

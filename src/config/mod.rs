//! Configuration loading.
//!
//! Sources, later ones winning: built-in defaults, an optional
//! `config/default.{toml,yaml,json}` file, then `TXANNOUNCE__*` environment
//! variables (`TXANNOUNCE__SERVER__PORT=9000`).

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{LogSettings, RelaySettings, ServerSettings, Settings};

pub const ENV_PREFIX: &str = "TXANNOUNCE";

/// Loads the configuration from the default file and environment variables
/// and merges it over the default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}

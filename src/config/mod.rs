mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    ArchiveSettings, LifecycleSettings, LoggingSettings, PartialSettings, Settings,
};

/// Loads the configuration from `config/default.*` and `CBC__*` environment
/// variables, then merges it with default values.
///
/// Environment keys use a double underscore between levels, e.g.
/// `CBC__LIFECYCLE__ACK_TIMEOUT_SECS=20`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("CBC")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge())
}

mod settings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{BrokerConfig, ConsumerSettings, Settings};

/// Loads the configuration from `config/default` and `RABBIT__*` environment
/// variables, merged over the default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Loads the configuration from the given file (any extension the `config`
/// crate understands, optional) and the environment.
///
/// Environment keys use `__` between sections, for example
/// `RABBIT__AMQP__URL` or `RABBIT__AMQP__TLS__CA_CERT=/a.pem,/b.pem`.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    let path = path.as_ref().to_string_lossy().into_owned();
    let builder = Config::builder()
        .add_source(File::with_name(&path).required(false))
        .add_source(
            Environment::with_prefix("RABBIT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("amqp.tls.ca_cert"),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_over(Settings::default()))
}

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory, relative to the working directory, holding the YAML files.
const CONFIGURATION_DIR: &str = "configuration";

/// File loaded for every environment before the environment-specific one.
const BASE_CONFIG_FILE: &str = "base.yaml";

const ENV_PREFIX: &str = "APP";
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested keys, e.g. `APP_ENDPOINT__POSTGRES__HOST`.
const ENV_SEPARATOR: &str = "__";

const LIST_SEPARATOR: &str = ",";

/// Configuration types that can be loaded with [`load_config`].
pub trait Config {
    /// Keys whose environment variable values are split on `,` into lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Errors raised while assembling a configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("Failed to determine the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("Failed to parse APP_ENVIRONMENT: {0}")]
    Environment(#[source] std::io::Error),

    #[error("Failed to build configuration: {0}")]
    Build(#[from] rust_cli_config::ConfigError),
}

/// Loads `T` from layered sources.
///
/// Sources, later ones overriding earlier ones:
/// 1. `configuration/base.yaml`
/// 2. `configuration/{environment}.yaml`
/// 3. variables prefixed with `APP_`, nested with `__`
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    load_config_from::<T>(base_path.join(CONFIGURATION_DIR))
}

/// Same as [`load_config`] with an explicit configuration directory.
pub fn load_config_from<T>(configuration_directory: PathBuf) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;
    let environment_filename = format!("{environment}.yaml");

    let mut environment_source = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if !<T as Config>::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source
            .try_parsing(true)
            .list_separator(LIST_SEPARATOR);

        for key in <T as Config>::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    let settings = rust_cli_config::Config::builder()
        .add_source(rust_cli_config::File::from(
            configuration_directory.join(BASE_CONFIG_FILE),
        ))
        // The environment file is optional so a single base file is enough for local runs.
        .add_source(
            rust_cli_config::File::from(configuration_directory.join(environment_filename))
                .required(false),
        )
        .add_source(environment_source)
        .build()?;

    Ok(settings.try_deserialize::<T>()?)
}

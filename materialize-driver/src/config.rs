use materialize_config::load_config;
use materialize_config::shared::DriverConfig;

/// Loads the [`DriverConfig`] and validates it.
pub fn load_driver_config() -> anyhow::Result<DriverConfig> {
    let config = load_config::<DriverConfig>()?;
    config.validate()?;

    Ok(config)
}

use super::schema::Config;
use crate::error::{ConfigError, Result};
use crate::module::ModuleType;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use figment::Figment;
use std::path::Path;
use std::str::FromStr;

/// Load from the conventional config files in the working directory, with
/// `LATHE_`-prefixed environment variables layered on top.
pub fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        .merge(Toml::file("lathe.toml"))
        .merge(Json::file("lathe.json"))
        .merge(Yaml::file("lathe.yaml"))
        .merge(Yaml::file("lathe.yml"))
        .merge(Env::prefixed("LATHE_").split("_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

/// Load a specific config file, dispatching the provider on extension.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into())
        }
    };

    let config: Config = figment
        .merge(Env::prefixed("LATHE_").split("_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.dev_server.port == 0 {
        return Err(ConfigError::Validation("Dev server port must be non-zero".into()).into());
    }

    if config.mcp.base_path.is_empty() || config.mcp.base_path.contains('/') {
        return Err(ConfigError::Validation(
            "mcp.basePath must be a single path segment without slashes".into(),
        )
        .into());
    }

    for def in &config.virtual_modules {
        if def.namespace.is_empty() || def.name.is_empty() {
            return Err(ConfigError::Validation(
                "Virtual module definitions need a namespace and a name".into(),
            )
            .into());
        }
        ModuleType::from_str(&def.module_type).map_err(|_| {
            ConfigError::Validation(format!(
                "Virtual module '{}:{}' has unknown module type '{}'",
                def.namespace, def.name, def.module_type
            ))
        })?;
    }

    Ok(())
}

//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ServerConfig;
use crate::config::validation::validate_config;
use crate::error::ServerError;

/// Load and validate a configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ServerError> {
    let content = fs::read_to_string(path)
        .map_err(|e| ServerError::Config(format!("{}: {}", path.display(), e)))?;
    let config: ServerConfig =
        toml::from_str(&content).map_err(|e| ServerError::Config(e.to_string()))?;

    validate_config(&config).map_err(|errors| {
        let joined = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        ServerError::Config(joined)
    })?;

    Ok(config)
}

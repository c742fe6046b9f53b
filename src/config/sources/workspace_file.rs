//! Workspace config file source: `config/config.toml` then `config/{FORGE_ENV}.toml`

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::File;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_ENVIRONMENT: &str = "development";

/// Deployment environment selecting the override file; `FORGE_ENV` or "development".
pub fn environment_name() -> String {
    std::env::var("FORGE_ENV")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
}

/// Existing workspace config files in precedence order (later wins).
pub fn workspace_config_files(workspace_root: &Path, environment: &str) -> Vec<PathBuf> {
    let config_dir = workspace_root.join("config");
    let mut files = vec![config_dir.join("config.toml")];
    // An environment named "config" would load the base file twice.
    if environment != "config" {
        files.push(config_dir.join(format!("{}.toml", environment)));
    }
    files.into_iter().filter(|path| path.is_file()).collect()
}

pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let environment = environment_name();
    let files = workspace_config_files(workspace_root, &environment);
    debug!(
        workspace = %workspace_root.display(),
        environment = %environment,
        files = files.len(),
        "Loading workspace configuration"
    );
    Ok(files.into_iter().fold(builder, |builder, path| {
        builder.add_source(File::from(path).required(false))
    }))
}

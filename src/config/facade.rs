//! Single entry point for assembling configuration from every source.

use super::merge::merge_policy;
use super::sources::{environment, global_file, workspace_file};
use super::ForgeConfig;
use crate::error::ConfigError;
use config::File;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Order: defaults, global file, `config/config.toml`, `config/{FORGE_ENV}.toml`,
    /// then `FORGE_*` environment variables.
    pub fn load(workspace_root: &Path) -> Result<ForgeConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = environment::add_to_builder(builder);
        Ok(builder.build()?.try_deserialize()?)
    }

    /// Load configuration from one explicit file plus environment overrides.
    pub fn load_from_file(path: &Path) -> Result<ForgeConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?
            .add_source(File::from(path).required(true));
        let builder = environment::add_to_builder(builder);
        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn default() -> ForgeConfig {
        ForgeConfig::default()
    }
}

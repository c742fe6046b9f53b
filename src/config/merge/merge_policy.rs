//! Merge rules: defaults, override order, conflict handling.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
///
/// Later sources override earlier ones key by key: defaults, global file,
/// workspace files, then environment.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("provider.base_url", "https://api.openai.com/v1")?
        .set_default("provider.api_key_env", "OPENAI_API_KEY")?
        .set_default("processor.workers", 4)?
        .set_default("status.backend", "memory")
}

pub mod run;
pub mod serve;

use std::path::Path;

use anyhow::{Context, Result};
use kurator_engine::config::{parser, validator};
use kurator_engine::ProcessConfig;

/// Load process configuration from an optional YAML file, apply CLI
/// overrides, and validate the result.
pub fn load_process_config(
    path: Option<&Path>,
    port: Option<u16>,
    output: Option<String>,
) -> Result<ProcessConfig> {
    let mut config = match path {
        Some(path) => parser::parse_config(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => ProcessConfig::default(),
    };
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(output) = output {
        config.output = output;
    }
    validator::validate_process_config(&config)?;

    tracing::debug!(
        port = config.port,
        output = %config.output,
        queue_depth = config.pipeline.queue_depth,
        "Process configuration loaded"
    );
    Ok(config)
}

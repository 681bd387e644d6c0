//! Loading the process configuration file.
//!
//! Values may reference the environment as `${NAME}` or `${NAME:-fallback}`.
//! References inside full-line `#` comments are left alone, so commented-out
//! settings never require their variables to be set.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Captures, Regex};

use crate::config::types::ProcessConfig;

static ENV_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid env reference regex")
});

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Expand environment references in a configuration document.
///
/// # Errors
///
/// Fails naming every referenced variable that is unset and has no fallback.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut unset = BTreeSet::new();
    let expanded: Vec<String> = input
        .split('\n')
        .map(|line| {
            if is_comment(line) {
                return line.to_string();
            }
            ENV_REF_RE
                .replace_all(line, |caps: &Captures<'_>| {
                    let name = &caps[1];
                    match (std::env::var(name), caps.get(2)) {
                        (Ok(value), _) => value,
                        (Err(_), Some(fallback)) => fallback.as_str().to_string(),
                        (Err(_), None) => {
                            unset.insert(name.to_string());
                            String::new()
                        }
                    }
                })
                .into_owned()
        })
        .collect();

    if !unset.is_empty() {
        let names: Vec<String> = unset.into_iter().collect();
        anyhow::bail!("Unset environment variable(s) in config: {}", names.join(", "));
    }
    Ok(expanded.join("\n"))
}

/// Parse process configuration from YAML text. A blank document yields the
/// defaults.
///
/// # Errors
///
/// Returns an error for unset variables or YAML that does not describe a
/// process configuration.
pub fn parse_config_str(yaml: &str) -> Result<ProcessConfig> {
    let expanded = substitute_env_vars(yaml)?;
    if expanded.lines().all(|l| l.trim().is_empty() || is_comment(l)) {
        return Ok(ProcessConfig::default());
    }
    serde_yaml::from_str(&expanded).context("Invalid kurator process configuration")
}

/// Read and parse a process configuration file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not parse.
pub fn parse_config(path: &Path) -> Result<ProcessConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config_str(&text)
}

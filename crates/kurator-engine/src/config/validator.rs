//! Semantic validation for parsed process configuration values.

use anyhow::{bail, Result};

use crate::config::types::{PipelineSettings, ProcessConfig, ServiceConfig, SourceConfig};

fn validate_pipeline_settings(settings: &PipelineSettings, errors: &mut Vec<String>) {
    if settings.queue_depth == 0 {
        errors.push("pipeline.queue_depth must be >= 1".to_string());
    }
    if settings.stage_timeout_secs == 0 {
        errors.push("pipeline.stage_timeout_secs must be > 0".to_string());
    }
    if settings.max_concurrent_runs == 0 {
        errors.push("pipeline.max_concurrent_runs must be >= 1".to_string());
    }
    if settings.max_consecutive_stage_failures == Some(0) {
        errors.push("pipeline.max_consecutive_stage_failures must be >= 1 when set".to_string());
    }
    if settings.max_sink_failures == Some(0) {
        errors.push("pipeline.max_sink_failures must be >= 1 when set".to_string());
    }
}

fn validate_services(services: &ServiceConfig, errors: &mut Vec<String>) {
    for (key, value) in [
        ("services.scientific_name", &services.scientific_name),
        ("services.global_names", &services.global_names),
        ("services.basis_of_record", &services.basis_of_record),
        ("services.event_date", &services.event_date),
        ("services.georeference", &services.georeference),
    ] {
        if value.trim().is_empty() {
            errors.push(format!("{key} must not be empty"));
        }
    }
    if !services.georef_threshold_km.is_finite() || services.georef_threshold_km <= 0.0 {
        errors.push(format!(
            "services.georef_threshold_km must be a positive number, got {}",
            services.georef_threshold_km
        ));
    }
}

fn validate_source(source: &SourceConfig, errors: &mut Vec<String>) {
    match source {
        SourceConfig::Idigbio {
            base_url,
            page_size,
            request_timeout_secs,
        } => {
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                errors.push(format!(
                    "source.base_url must be an http(s) URL, got '{base_url}'"
                ));
            }
            if *page_size == 0 {
                errors.push("source.page_size must be >= 1".to_string());
            }
            if *request_timeout_secs == 0 {
                errors.push("source.request_timeout_secs must be > 0".to_string());
            }
        }
        SourceConfig::JsonLines { path } => {
            if path.as_os_str().is_empty() {
                errors.push("source.path must not be empty".to_string());
            }
        }
    }
}

/// Validate a parsed process configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_process_config(config: &ProcessConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.port == 0 {
        errors.push("port must be between 1 and 65535".to_string());
    }
    if config.output.trim().is_empty() {
        errors.push("output target must not be empty".to_string());
    }
    if config.default_limit == 0 {
        errors.push("default_limit must be >= 1".to_string());
    }

    validate_pipeline_settings(&config.pipeline, &mut errors);
    validate_services(&config.services, &mut errors);
    validate_source(&config.source, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        bail!(
            "Configuration validation failed:\n  - {}",
            errors.join("\n  - ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_process_config(&ProcessConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_queue_depth_rejected() {
        let mut config = ProcessConfig::default();
        config.pipeline.queue_depth = 0;
        let err = validate_process_config(&config).unwrap_err().to_string();
        assert!(err.contains("queue_depth"));
    }

    #[test]
    fn test_empty_output_rejected() {
        let config = ProcessConfig {
            output: "  ".to_string(),
            ..ProcessConfig::default()
        };
        let err = validate_process_config(&config).unwrap_err().to_string();
        assert!(err.contains("output target"));
    }

    #[test]
    fn test_non_http_base_url_rejected() {
        let config = ProcessConfig {
            source: SourceConfig::Idigbio {
                base_url: "ftp://search.idigbio.org".to_string(),
                page_size: 10,
                request_timeout_secs: 5,
            },
            ..ProcessConfig::default()
        };
        let err = validate_process_config(&config).unwrap_err().to_string();
        assert!(err.contains("base_url"));
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = ProcessConfig {
            port: 0,
            default_limit: 0,
            ..ProcessConfig::default()
        };
        config.pipeline.stage_timeout_secs = 0;
        config.pipeline.max_sink_failures = Some(0);
        config.services.georef_threshold_km = -1.0;
        config.services.global_names = String::new();

        let err = validate_process_config(&config).unwrap_err().to_string();
        assert!(err.contains("port"));
        assert!(err.contains("default_limit"));
        assert!(err.contains("stage_timeout_secs"));
        assert!(err.contains("max_sink_failures"));
        assert!(err.contains("georef_threshold_km"));
        assert!(err.contains("services.global_names"));
    }
}

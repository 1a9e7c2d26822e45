use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    let threshold = config.router.complexity_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigError::Validation {
            message: format!("complexity_threshold must be within [0, 1], got {}", threshold),
        });
    }

    if let Some(limit) = &config.client.rate_limit {
        if limit.requests == 0 || limit.period_secs <= 0.0 {
            return Err(ConfigError::Validation {
                message: "rate_limit requires requests > 0 and period_secs > 0".to_string(),
            });
        }
    }

    if config.pipeline.page_concurrency == 0 {
        return Err(ConfigError::Validation {
            message: "page_concurrency must be at least 1".to_string(),
        });
    }

    let mut models = HashSet::new();
    for backend in &config.backends {
        if !models.insert(backend.model.as_str()) {
            return Err(ConfigError::InvalidBackend {
                model: backend.model.clone(),
                reason: "Duplicate backend model".to_string(),
            });
        }
        if !backend.endpoint.starts_with("http://") && !backend.endpoint.starts_with("https://")
        {
            return Err(ConfigError::InvalidBackend {
                model: backend.model.clone(),
                reason: format!("Endpoint must be an http(s) URL: {}", backend.endpoint),
            });
        }
        if backend.input_price_per_million < 0.0 || backend.output_price_per_million < 0.0 {
            return Err(ConfigError::InvalidBackend {
                model: backend.model.clone(),
                reason: "Prices must not be negative".to_string(),
            });
        }
    }

    let roles = &config.router.models;
    if roles.default_worker == roles.expert_fallback
        || roles.expert_fallback == roles.reserve_channel
        || roles.default_worker == roles.reserve_channel
    {
        return Err(ConfigError::Validation {
            message: "default_worker, expert_fallback and reserve_channel must be distinct models"
                .to_string(),
        });
    }

    for (role, model) in [
        ("default_worker", &roles.default_worker),
        ("expert_fallback", &roles.expert_fallback),
        ("reserve_channel", &roles.reserve_channel),
        ("testing", &roles.testing),
    ] {
        if !models.contains(model.as_str()) {
            return Err(ConfigError::Validation {
                message: format!("Router role '{}' uses model '{}' with no backend", role, model),
            });
        }
    }

    Ok(())
}

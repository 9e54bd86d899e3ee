// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as valid host names, non-empty paths, and heartbeat ordering.

use crate::diagnostic::ConfigError;
use crate::model::PalaverConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &PalaverConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let host = config.gateway.host.trim();
    if host.is_empty() {
        errors.push(ConfigError::Validation {
            message: "gateway.host must not be empty".to_string(),
        });
    } else {
        let is_valid_ip = host.parse::<std::net::IpAddr>().is_ok();
        let is_valid_hostname = host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == ':');
        if !is_valid_ip && !is_valid_hostname {
            errors.push(ConfigError::Validation {
                message: format!("gateway.host `{host}` is not a valid IP address or hostname"),
            });
        }
    }

    if config.gateway.outbound_buffer == 0 {
        errors.push(ConfigError::Validation {
            message: "gateway.outbound_buffer must be at least 1".to_string(),
        });
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    if config.chat.idle_timeout_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "chat.idle_timeout_secs must be greater than 0".to_string(),
        });
    }

    if config.chat.heartbeat_interval_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "chat.heartbeat_interval_secs must be greater than 0".to_string(),
        });
    }

    if config.chat.heartbeat_timeout_secs <= config.chat.heartbeat_interval_secs {
        errors.push(ConfigError::Validation {
            message: format!(
                "chat.heartbeat_timeout_secs ({}) must be greater than chat.heartbeat_interval_secs ({})",
                config.chat.heartbeat_timeout_secs, config.chat.heartbeat_interval_secs
            ),
        });
    }

    if config.chat.welcome_message.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "chat.welcome_message must not be empty".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

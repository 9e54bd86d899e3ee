// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Palaver configuration system.

use palaver_config::diagnostic::ConfigError;
use palaver_config::model::PalaverConfig;
use palaver_config::{load_and_validate_path, load_and_validate_str, load_config_from_str};

/// Valid TOML with all known fields deserializes successfully.
#[test]
fn valid_toml_deserializes_into_palaver_config() {
    let toml = r#"
[server]
log_level = "debug"

[gateway]
host = "0.0.0.0"
port = 8080
outbound_buffer = 128
metrics_enabled = false

[storage]
database_path = "/tmp/test.db"
wal_mode = false

[chat]
idle_timeout_secs = 600
heartbeat_interval_secs = 10
heartbeat_timeout_secs = 30
history_replay_limit = 20
welcome_message = "Un conseiller arrive."
default_category = "reservation"
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.server.log_level, "debug");
    assert_eq!(config.gateway.host, "0.0.0.0");
    assert_eq!(config.gateway.port, 8080);
    assert_eq!(config.gateway.outbound_buffer, 128);
    assert!(!config.gateway.metrics_enabled);
    assert_eq!(config.storage.database_path, "/tmp/test.db");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.chat.idle_timeout_secs, 600);
    assert_eq!(config.chat.heartbeat_interval_secs, 10);
    assert_eq!(config.chat.heartbeat_timeout_secs, 30);
    assert_eq!(config.chat.history_replay_limit, 20);
    assert_eq!(config.chat.welcome_message, "Un conseiller arrive.");
    assert_eq!(config.chat.default_category, "reservation");
}

/// Missing optional sections use defaults without error.
#[test]
fn missing_optional_sections_use_defaults() {
    let config = load_config_from_str("").expect("empty TOML should use defaults");

    assert_eq!(config.server.log_level, "info");
    assert_eq!(config.gateway.host, "127.0.0.1");
    assert_eq!(config.gateway.port, 3000);
    assert_eq!(config.gateway.outbound_buffer, 64);
    assert!(config.gateway.metrics_enabled);
    assert!(config.storage.wal_mode);
    assert_eq!(config.chat.idle_timeout_secs, 1800);
    assert_eq!(config.chat.history_replay_limit, 50);
    assert_eq!(config.chat.default_category, "general");
}

/// Unknown field in [chat] is rejected.
#[test]
fn unknown_field_in_chat_produces_error() {
    let toml = r#"
[chat]
idle_timout_secs = 5
"#;

    let err = load_config_from_str(toml).expect_err("should reject unknown field");
    let err_str = format!("{err}");
    assert!(
        err_str.contains("unknown field") || err_str.contains("idle_timout_secs"),
        "error should mention unknown field or the bad key, got: {err_str}"
    );
}

/// Unexpected top-level section is rejected by deny_unknown_fields.
#[test]
fn deny_unknown_fields_at_top_level() {
    let toml = r#"
[payments]
provider = "stripe"
"#;

    let err = load_config_from_str(toml).expect_err("unknown section should be rejected");
    let err_str = format!("{err}");
    assert!(
        err_str.contains("unknown field") || err_str.contains("payments"),
        "error should mention unknown field, got: {err_str}"
    );
}

/// Typos become UnknownKey diagnostics with a suggestion.
#[test]
fn load_and_validate_str_suggests_correction() {
    let toml = r#"
[gateway]
prot = 8080
"#;

    let errors = load_and_validate_str(toml).expect_err("typo should fail");
    let found = errors.iter().any(|e| match e {
        ConfigError::UnknownKey {
            key, suggestion, ..
        } => key == "prot" && suggestion.as_deref() == Some("port"),
        _ => false,
    });
    assert!(found, "expected an UnknownKey for `prot`, got: {errors:?}");
}

/// Wrong value types are reported as InvalidType.
#[test]
fn wrong_type_is_reported() {
    let toml = r#"
[gateway]
port = "eighty"
"#;

    let errors = load_and_validate_str(toml).expect_err("string port should fail");
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidType { .. })),
        "expected InvalidType, got: {errors:?}"
    );
}

/// Semantic validation runs after a successful parse.
#[test]
fn validation_runs_after_parse() {
    let toml = r#"
[chat]
heartbeat_interval_secs = 60
heartbeat_timeout_secs = 30
"#;

    let errors = load_and_validate_str(toml).expect_err("timeout below interval should fail");
    assert!(errors.iter().any(
        |e| matches!(e, ConfigError::Validation { message } if message.contains("heartbeat_timeout_secs"))
    ));
}

/// Explicit file paths load and validate.
#[test]
fn load_from_explicit_path() {
    let dir = std::env::temp_dir().join(format!("palaver-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("palaver.toml");
    std::fs::write(&path, "[gateway]\nport = 4100\n").unwrap();

    let config = load_and_validate_path(&path).expect("file config should load");
    assert_eq!(config.gateway.port, 4100);

    std::fs::remove_dir_all(&dir).ok();
}

/// Dotted overrides (what the env provider produces) land on the right field.
#[test]
fn dotted_override_reaches_chat_section() {
    use figment::{
        providers::{Format, Serialized, Toml},
        Figment,
    };

    let config: PalaverConfig = Figment::new()
        .merge(Serialized::defaults(PalaverConfig::default()))
        .merge(Toml::string("[chat]\nidle_timeout_secs = 120\n"))
        .merge(("chat.idle_timeout_secs", 300))
        .extract()
        .expect("should merge override");

    assert_eq!(config.chat.idle_timeout_secs, 300);
}

/// Missing config files are silently skipped (Figment's Toml::file() behavior).
#[test]
fn missing_config_files_silently_skipped() {
    use figment::{
        providers::{Format, Serialized, Toml},
        Figment,
    };

    let config: PalaverConfig = Figment::new()
        .merge(Serialized::defaults(PalaverConfig::default()))
        .merge(Toml::file("/nonexistent/path/palaver.toml"))
        .extract()
        .expect("missing file should be silently skipped");

    assert_eq!(config.gateway.port, 3000);
}

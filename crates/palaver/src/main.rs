// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Palaver - real-time client/agent chat relay.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use palaver_config::{ConfigError, PalaverConfig};

/// Palaver - real-time client/agent chat relay.
#[derive(Parser, Debug)]
#[command(name = "palaver", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the chat relay server.
    Serve {
        /// Explicit config file instead of the XDG lookup.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Inspect Palaver configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Load and validate the configuration, reporting every problem.
    Check {
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    Show {
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn load(path: Option<&std::path::Path>) -> Result<PalaverConfig, Vec<ConfigError>> {
    match path {
        Some(path) => palaver_config::load_and_validate_path(path),
        None => palaver_config::load_and_validate(),
    }
}

fn load_or_exit(path: Option<&std::path::Path>) -> PalaverConfig {
    match load(path) {
        Ok(config) => config,
        Err(errors) => {
            palaver_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { config }) => {
            let config = load_or_exit(config.as_deref());
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Some(Commands::Config { action }) => match action {
            ConfigCommands::Check { path } => {
                let config = load_or_exit(path.as_deref());
                println!(
                    "palaver: config ok (gateway {}:{}, database {})",
                    config.gateway.host, config.gateway.port, config.storage.database_path
                );
            }
            ConfigCommands::Show { path } => {
                let config = load_or_exit(path.as_deref());
                match toml::to_string_pretty(&config) {
                    Ok(text) => print!("{text}"),
                    Err(e) => {
                        eprintln!("error: cannot render config: {e}");
                        std::process::exit(1);
                    }
                }
            }
        },
        None => {
            println!("palaver: use --help for available commands");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Only jemalloc supports advancing the epoch.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn parses_config_check_with_path() {
        let cli = Cli::try_parse_from(["palaver", "config", "check", "--path", "palaver.toml"])
            .unwrap();
        match cli.command {
            Some(Commands::Config {
                action: ConfigCommands::Check { path },
            }) => assert_eq!(path, Some(PathBuf::from("palaver.toml"))),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_serve_without_flags() {
        let cli = Cli::try_parse_from(["palaver", "serve"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve { config: None })));
    }

    #[test]
    fn rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["palaver", "shell"]).is_err());
    }

    #[test]
    fn load_reports_errors_for_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("palaver.toml");
        std::fs::write(&path, "[chat]\nidle_timeout_secs = 0\n").unwrap();
        let errors = load(Some(&path)).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn effective_config_renders_as_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("palaver.toml");
        std::fs::write(&path, "[gateway]\nport = 4100\n").unwrap();
        let config = load(Some(&path)).unwrap();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("port = 4100"));
    }
}

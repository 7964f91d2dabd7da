mod file_config;

pub use file_config::{CompletionConfig, FileConfig};

use crate::completion::{DEFAULT_RUN_HISTORY_LIMIT, DEFAULT_SUBSCRIBER_BUFFER};
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub cors_allowed_origins: Vec<String>,
    pub seed_demo_items: usize,
    pub item_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub cors_allowed_origins: Vec<String>,
    pub seed_demo_items: usize,

    pub completion: CompletionSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionSettings {
    pub item_delay: Duration,
    pub subscriber_buffer: usize,
    pub run_history_limit: usize,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            item_delay: Duration::ZERO,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            run_history_limit: DEFAULT_RUN_HISTORY_LIMIT,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        if port != 0 && port == metrics_port {
            bail!("port and metrics_port must differ (both are {})", port);
        }

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let frontend_dir_path = file
            .frontend_dir_path
            .or_else(|| cli.frontend_dir_path.clone());

        let cors_allowed_origins = file
            .cors_allowed_origins
            .or_else(|| {
                (!cli.cors_allowed_origins.is_empty()).then(|| cli.cors_allowed_origins.clone())
            })
            .unwrap_or_else(|| vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()]);

        let seed_demo_items = file.seed_demo_items.unwrap_or(cli.seed_demo_items);

        let completion_file = file.completion.unwrap_or_default();
        let defaults = CompletionSettings::default();
        let completion = CompletionSettings {
            item_delay: Duration::from_millis(
                completion_file.item_delay_ms.unwrap_or(cli.item_delay_ms),
            ),
            subscriber_buffer: completion_file
                .subscriber_buffer
                .unwrap_or(defaults.subscriber_buffer),
            run_history_limit: completion_file
                .run_history_limit
                .unwrap_or(defaults.run_history_limit),
        };
        if completion.subscriber_buffer == 0 {
            bail!("completion.subscriber_buffer must be greater than zero");
        }

        Ok(Self {
            db_dir,
            port,
            metrics_port,
            logging_level,
            frontend_dir_path,
            cors_allowed_origins,
            seed_demo_items,
            completion,
        })
    }

    pub fn todo_db_path(&self) -> PathBuf {
        self.db_dir.join("todo.db")
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

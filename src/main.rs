use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use todo_progress_server::completion::{
    create_dispatcher, BulkCompletionWorker, ProgressBroadcaster, StoreItemGateway,
};
use todo_progress_server::config::{AppConfig, CliConfig, FileConfig};
use todo_progress_server::server::{
    self, run_server, RequestsLoggingLevel, ServerConfig, ServerState,
};
use todo_progress_server::todo_store::{seed_demo_list, SqliteTodoStore, TodoStore};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the SQLite database (todo.db).
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Optional TOML config file. Its values override command line values.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Path to the frontend directory to be statically served.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,

    /// Origin allowed by CORS. Can be repeated. Defaults to http://localhost:3000.
    #[clap(long = "cors-allowed-origin")]
    pub cors_allowed_origins: Vec<String>,

    /// Number of items of the demo list created on an empty database. 0 disables seeding.
    #[clap(long, default_value_t = 5000)]
    pub seed_demo_items: usize,

    /// Pause between two items of a completion run, in milliseconds.
    #[clap(long, default_value_t = 0)]
    pub item_delay_ms: u64,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            frontend_dir_path: self.frontend_dir_path.clone(),
            cors_allowed_origins: self.cors_allowed_origins.clone(),
            seed_demo_items: self.seed_demo_items,
            item_delay_ms: self.item_delay_ms,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}...", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let app_config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!(
        "Opening SQLite todo database at {:?}...",
        app_config.todo_db_path()
    );
    let todo_store = Arc::new(SqliteTodoStore::new(app_config.todo_db_path())?);

    info!("Initializing metrics...");
    server::metrics::init_metrics();

    if let Some(list_id) = seed_demo_list(todo_store.as_ref(), app_config.seed_demo_items)? {
        info!("Demo list available with id {}", list_id);
    }
    server::metrics::set_todo_lists_total(todo_store.count_todo_lists()?);

    let progress_broadcaster = Arc::new(ProgressBroadcaster::new(
        app_config.completion.subscriber_buffer,
    ));
    let worker = Arc::new(BulkCompletionWorker::new(
        Arc::new(StoreItemGateway::new(todo_store.clone())),
        progress_broadcaster.clone(),
        app_config.completion.item_delay,
    ));

    let shutdown_token = CancellationToken::new();
    let (mut dispatcher, dispatcher_handle) = create_dispatcher(
        worker,
        shutdown_token.clone(),
        app_config.completion.run_history_limit,
    );
    let dispatcher_task = tokio::spawn(async move { dispatcher.run().await });

    {
        let shutdown_token = shutdown_token.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
            info!("Received Ctrl-C, shutting down...");
            shutdown_token.cancel();
        });
    }

    let state = ServerState::new(
        ServerConfig::from(&app_config),
        todo_store,
        progress_broadcaster,
        dispatcher_handle,
    );
    let result = run_server(state, shutdown_token.clone()).await;

    shutdown_token.cancel();
    if let Err(e) = dispatcher_task.await {
        error!("Completion dispatcher task failed: {}", e);
    }

    result
}

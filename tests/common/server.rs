//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own database and its own
//! completion dispatcher.

use super::constants::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use todo_progress_server::completion::{
    create_dispatcher, BulkCompletionWorker, ProgressBroadcaster, StoreItemGateway,
    DEFAULT_RUN_HISTORY_LIMIT, DEFAULT_SUBSCRIBER_BUFFER,
};
use todo_progress_server::server::{make_app, RequestsLoggingLevel, ServerConfig, ServerState};
use todo_progress_server::todo_store::{ListId, SqliteTodoStore, TodoStore};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Test server instance with an isolated database
///
/// When dropped, the server and its dispatcher shut down and the temp
/// directory is removed.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    #[allow(dead_code)]
    pub port: u16,

    /// Store for direct database access in tests
    pub todo_store: Arc<dyn TodoStore>,

    /// Broadcaster shared with the websocket route
    #[allow(dead_code)]
    pub progress_broadcaster: Arc<ProgressBroadcaster>,

    _temp_db_dir: TempDir,
    shutdown_token: CancellationToken,
}

impl TestServer {
    /// Spawns a server on a random port with no delay between items.
    pub async fn spawn() -> Self {
        Self::spawn_with_item_delay(Duration::ZERO).await
    }

    /// Spawns a server whose completion runs pause `item_delay` between items.
    ///
    /// # Panics
    ///
    /// Panics if the database cannot be created, the port cannot be bound or
    /// the server doesn't become ready within `SERVER_READY_TIMEOUT_MS`.
    pub async fn spawn_with_item_delay(item_delay: Duration) -> Self {
        let temp_db_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_db_dir.path().join("todo.db");

        let todo_store: Arc<dyn TodoStore> =
            Arc::new(SqliteTodoStore::new(&db_path).expect("Failed to open todo store"));

        let progress_broadcaster = Arc::new(ProgressBroadcaster::new(DEFAULT_SUBSCRIBER_BUFFER));
        let worker = Arc::new(BulkCompletionWorker::new(
            Arc::new(StoreItemGateway::new(todo_store.clone())),
            progress_broadcaster.clone(),
            item_delay,
        ));

        let shutdown_token = CancellationToken::new();
        let (mut dispatcher, dispatcher_handle) =
            create_dispatcher(worker, shutdown_token.clone(), DEFAULT_RUN_HISTORY_LIMIT);
        tokio::spawn(async move { dispatcher.run().await });

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port,
            metrics_port: 0,
            frontend_dir_path: None,
            cors_allowed_origins: vec![TEST_ALLOWED_ORIGIN.to_string()],
        };
        let state = ServerState::new(
            config,
            todo_store.clone(),
            progress_broadcaster.clone(),
            dispatcher_handle,
        );
        let app = make_app(state);

        let server_shutdown = shutdown_token.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            todo_store,
            progress_broadcaster,
            _temp_db_dir: temp_db_dir,
            shutdown_token,
        };

        server.wait_for_ready().await;

        server
    }

    /// Creates a list with the given item titles straight in the store.
    #[allow(dead_code)]
    pub fn create_list(&self, name: &str, item_count: usize) -> ListId {
        let titles: Vec<String> = (1..=item_count).map(|i| format!("Item {}", i)).collect();
        self.todo_store
            .create_todo_list_with_items(name, &titles)
            .expect("Failed to create list")
            .id
    }

    /// Waits until the broadcaster holds `count` subscribers.
    ///
    /// The websocket route registers after the upgrade completes, so tests
    /// wait here before triggering a run.
    #[allow(dead_code)]
    pub async fn wait_for_subscribers(&self, count: usize) {
        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        while self.progress_broadcaster.subscriber_count().await != count {
            if start.elapsed() > timeout {
                panic!(
                    "Expected {} progress subscribers within {}ms",
                    count, SERVER_READY_TIMEOUT_MS
                );
            }
            tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
        }
    }

    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

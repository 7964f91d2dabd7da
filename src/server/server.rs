use anyhow::{Context, Result};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use super::{log_requests, metrics, state::*, websocket::progress_ws_handler, ServerConfig};
use crate::completion::{CompletionRun, DispatchError, DispatcherHandle, RunId};
use crate::todo_store::{
    CreateTodoItem, CreateTodoList, ItemId, ListId, TodoItem, TodoList, TodoListSummary,
    TodoStoreError, UpdateTodoItem, UpdateTodoList,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
    pub version: String,
    pub progress_subscribers: usize,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

/// JSON error body returned by every API route.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiError {
    status_code: u16,
    message: String,
    detailed: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>, detailed: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            message: message.into(),
            detailed: detailed.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<TodoStoreError> for ApiError {
    fn from(err: TodoStoreError) -> Self {
        match &err {
            TodoStoreError::ListNotFound(_) | TodoStoreError::ItemNotFound { .. } => {
                ApiError::new(StatusCode::NOT_FOUND, err.to_string(), "")
            }
            TodoStoreError::Validation(message) => {
                ApiError::new(StatusCode::BAD_REQUEST, message.clone(), "")
            }
            TodoStoreError::Storage(_) | TodoStoreError::Unavailable(_) => {
                error!("Store failure: {}", err);
                metrics::record_error("store", "api");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                    err.to_string(),
                )
            }
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        let status = match err {
            DispatchError::RunNotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::AlreadyFinished(_) => StatusCode::CONFLICT,
            DispatchError::DispatcherUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        ApiError::new(status, err.to_string(), "")
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "Invalid request body.",
            rejection.body_text(),
        )
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
        version: env!("APP_VERSION").to_string(),
        progress_subscribers: state.progress_broadcaster.subscriber_count().await,
    };
    Json(stats)
}

// Lists

async fn get_todo_lists(
    State(store): State<GuardedTodoStore>,
) -> ApiResult<Json<Vec<TodoListSummary>>> {
    Ok(Json(store.list_todo_lists()?))
}

async fn get_todo_list(
    State(store): State<GuardedTodoStore>,
    Path(list_id): Path<ListId>,
) -> ApiResult<Json<TodoList>> {
    Ok(Json(store.get_todo_list(list_id)?))
}

fn refresh_todo_lists_total(store: &GuardedTodoStore) {
    match store.count_todo_lists() {
        Ok(count) => metrics::set_todo_lists_total(count),
        Err(e) => warn!("Failed to count todo lists for metrics: {}", e),
    }
}

async fn post_todo_list(
    State(store): State<GuardedTodoStore>,
    payload: Result<Json<CreateTodoList>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TodoList>)> {
    let Json(payload) = payload?;
    let list = store.create_todo_list(&payload)?;
    info!("Created todo list {}", list.id);
    refresh_todo_lists_total(&store);
    Ok((StatusCode::CREATED, Json(list)))
}

async fn put_todo_list(
    State(store): State<GuardedTodoStore>,
    Path(list_id): Path<ListId>,
    payload: Result<Json<UpdateTodoList>, JsonRejection>,
) -> ApiResult<Json<TodoList>> {
    let Json(payload) = payload?;
    Ok(Json(store.update_todo_list(list_id, &payload)?))
}

async fn delete_todo_list(
    State(store): State<GuardedTodoStore>,
    Path(list_id): Path<ListId>,
) -> ApiResult<StatusCode> {
    store.delete_todo_list(list_id)?;
    info!("Deleted todo list {}", list_id);
    refresh_todo_lists_total(&store);
    Ok(StatusCode::NO_CONTENT)
}

// Items

async fn get_todo_items(
    State(store): State<GuardedTodoStore>,
    Path(list_id): Path<ListId>,
) -> ApiResult<Json<Vec<TodoItem>>> {
    Ok(Json(store.get_todo_items(list_id)?))
}

async fn get_todo_item(
    State(store): State<GuardedTodoStore>,
    Path((list_id, item_id)): Path<(ListId, ItemId)>,
) -> ApiResult<Json<TodoItem>> {
    Ok(Json(store.get_todo_item(list_id, item_id)?))
}

async fn post_todo_item(
    State(store): State<GuardedTodoStore>,
    Path(list_id): Path<ListId>,
    payload: Result<Json<CreateTodoItem>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TodoItem>)> {
    let Json(payload) = payload?;
    let item = store.create_todo_item(list_id, &payload)?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn put_todo_item(
    State(store): State<GuardedTodoStore>,
    Path((list_id, item_id)): Path<(ListId, ItemId)>,
    payload: Result<Json<UpdateTodoItem>, JsonRejection>,
) -> ApiResult<Json<TodoItem>> {
    let Json(payload) = payload?;
    Ok(Json(store.update_todo_item(list_id, item_id, &payload)?))
}

async fn delete_todo_item(
    State(store): State<GuardedTodoStore>,
    Path((list_id, item_id)): Path<(ListId, ItemId)>,
) -> ApiResult<StatusCode> {
    store.delete_todo_item(list_id, item_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// Completion runs

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteAllAccepted {
    message: String,
    run_id: RunId,
}

/// Queues completion of every item of the list and returns right away.
/// An unknown list is reported through the run state, not here.
async fn post_complete_all(
    State(dispatcher): State<DispatcherHandle>,
    Path(list_id): Path<ListId>,
) -> ApiResult<(StatusCode, Json<CompleteAllAccepted>)> {
    let run_id = dispatcher.submit(list_id).await?;
    info!("Accepted completion run {} for list {}", run_id, list_id);
    Ok((
        StatusCode::ACCEPTED,
        Json(CompleteAllAccepted {
            message: format!("Completion of all items of list {} has started.", list_id),
            run_id,
        }),
    ))
}

async fn get_completion_runs(
    State(dispatcher): State<DispatcherHandle>,
) -> Json<Vec<CompletionRun>> {
    Json(dispatcher.list_runs().await)
}

async fn get_completion_run(
    State(dispatcher): State<DispatcherHandle>,
    Path(run_id): Path<RunId>,
) -> ApiResult<Json<CompletionRun>> {
    dispatcher
        .get_run(run_id)
        .await
        .map(Json)
        .ok_or_else(|| DispatchError::RunNotFound(run_id).into())
}

async fn delete_completion_run(
    State(dispatcher): State<DispatcherHandle>,
    Path(run_id): Path<RunId>,
) -> ApiResult<StatusCode> {
    dispatcher.cancel(run_id).await?;
    Ok(StatusCode::ACCEPTED)
}

fn make_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
}

pub fn make_app(state: ServerState) -> Router {
    let todo_routes: Router = Router::new()
        .route("/", get(get_todo_lists).post(post_todo_list))
        .route(
            "/{list_id}",
            get(get_todo_list).put(put_todo_list).delete(delete_todo_list),
        )
        .route(
            "/{list_id}/todoitems",
            get(get_todo_items).post(post_todo_item),
        )
        .route(
            "/{list_id}/todoitems/{item_id}",
            get(get_todo_item)
                .put(put_todo_item)
                .delete(delete_todo_item),
        )
        .route(
            "/{list_id}/complete-all",
            axum::routing::post(post_complete_all),
        )
        .with_state(state.clone());

    let run_routes: Router = Router::new()
        .route("/", get(get_completion_runs))
        .route(
            "/{run_id}",
            get(get_completion_run).delete(delete_completion_run),
        )
        .with_state(state.clone());

    let ws_routes: Router = Router::new()
        .route("/progress", get(progress_ws_handler))
        .with_state(state.clone());

    let home_router: Router = match &state.config.frontend_dir_path {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new()
            .route("/", get(home))
            .with_state(state.clone()),
    };

    home_router
        .nest("/api/todolists", todo_routes)
        .nest("/api/completion-runs", run_routes)
        .nest("/ws", ws_routes)
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .layer(make_cors_layer(&state.config.cors_allowed_origins))
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics::metrics_handler))
}

/// Serve the API and the metrics endpoint until `shutdown_token` is
/// cancelled.
pub async fn run_server(state: ServerState, shutdown_token: CancellationToken) -> Result<()> {
    let port = state.config.port;
    let metrics_port = state.config.metrics_port;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);

    let api_shutdown = shutdown_token.clone();
    let metrics_shutdown = shutdown_token.clone();
    let api_server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { api_shutdown.cancelled().await });
    let metrics_server = axum::serve(metrics_listener, make_metrics_app())
        .with_graceful_shutdown(async move { metrics_shutdown.cancelled().await });

    tokio::try_join!(
        async { api_server.await.context("API server failed") },
        async { metrics_server.await.context("Metrics server failed") },
    )?;
    Ok(())
}

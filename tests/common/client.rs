//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per API route. When routes or request
//! formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

#[allow(dead_code)]
impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Response {
        request.send().await.expect("Request failed")
    }

    // ========================================================================
    // Server
    // ========================================================================

    pub async fn get_home(&self) -> Response {
        self.send(self.client.get(self.url("/"))).await
    }

    // ========================================================================
    // Lists
    // ========================================================================

    pub async fn get_todo_lists(&self) -> Response {
        self.send(self.client.get(self.url("/api/todolists"))).await
    }

    pub async fn get_todo_list(&self, list_id: i64) -> Response {
        self.send(self.client.get(self.url(&format!("/api/todolists/{}", list_id))))
            .await
    }

    pub async fn create_todo_list(&self, name: &str) -> Response {
        self.send(
            self.client
                .post(self.url("/api/todolists"))
                .json(&json!({ "name": name })),
        )
        .await
    }

    pub async fn update_todo_list(&self, list_id: i64, name: &str) -> Response {
        self.send(
            self.client
                .put(self.url(&format!("/api/todolists/{}", list_id)))
                .json(&json!({ "name": name })),
        )
        .await
    }

    pub async fn delete_todo_list(&self, list_id: i64) -> Response {
        self.send(self.client.delete(self.url(&format!("/api/todolists/{}", list_id))))
            .await
    }

    // ========================================================================
    // Items
    // ========================================================================

    pub async fn get_todo_items(&self, list_id: i64) -> Response {
        self.send(
            self.client
                .get(self.url(&format!("/api/todolists/{}/todoitems", list_id))),
        )
        .await
    }

    pub async fn get_todo_item(&self, list_id: i64, item_id: i64) -> Response {
        self.send(self.client.get(self.url(&format!(
            "/api/todolists/{}/todoitems/{}",
            list_id, item_id
        ))))
        .await
    }

    pub async fn create_todo_item(&self, list_id: i64, title: &str) -> Response {
        self.send(
            self.client
                .post(self.url(&format!("/api/todolists/{}/todoitems", list_id)))
                .json(&json!({ "title": title })),
        )
        .await
    }

    pub async fn update_todo_item(
        &self,
        list_id: i64,
        item_id: i64,
        title: &str,
        is_completed: bool,
    ) -> Response {
        self.send(
            self.client
                .put(self.url(&format!(
                    "/api/todolists/{}/todoitems/{}",
                    list_id, item_id
                )))
                .json(&json!({ "title": title, "isCompleted": is_completed })),
        )
        .await
    }

    pub async fn delete_todo_item(&self, list_id: i64, item_id: i64) -> Response {
        self.send(self.client.delete(self.url(&format!(
            "/api/todolists/{}/todoitems/{}",
            list_id, item_id
        ))))
        .await
    }

    // ========================================================================
    // Completion runs
    // ========================================================================

    pub async fn complete_all(&self, list_id: i64) -> Response {
        self.send(
            self.client
                .post(self.url(&format!("/api/todolists/{}/complete-all", list_id))),
        )
        .await
    }

    pub async fn get_completion_runs(&self) -> Response {
        self.send(self.client.get(self.url("/api/completion-runs")))
            .await
    }

    pub async fn get_completion_run(&self, run_id: &str) -> Response {
        self.send(
            self.client
                .get(self.url(&format!("/api/completion-runs/{}", run_id))),
        )
        .await
    }

    pub async fn cancel_completion_run(&self, run_id: &str) -> Response {
        self.send(
            self.client
                .delete(self.url(&format!("/api/completion-runs/{}", run_id))),
        )
        .await
    }

    /// Triggers complete-all and returns the accepted run id.
    pub async fn start_completion_run(&self, list_id: i64) -> String {
        let response = self.complete_all(list_id).await;
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
        let body: Value = response.json().await.expect("Invalid accepted body");
        body["runId"]
            .as_str()
            .expect("Missing runId in accepted body")
            .to_string()
    }

    /// Polls the run until it leaves the submitted/running states.
    pub async fn wait_for_run_finished(&self, run_id: &str) -> Value {
        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(RUN_FINISH_TIMEOUT_MS);

        loop {
            let run: Value = self
                .get_completion_run(run_id)
                .await
                .json()
                .await
                .expect("Invalid run body");
            if matches!(run["state"].as_str(), Some("completed") | Some("failed")) {
                return run;
            }
            if start.elapsed() > timeout {
                panic!("Run {} did not finish within {}ms", run_id, RUN_FINISH_TIMEOUT_MS);
            }
            tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
        }
    }
}

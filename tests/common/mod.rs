//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestServer, TestClient};
//! use reqwest::StatusCode;
//!
//! #[tokio::test]
//! async fn test_get_lists() {
//!     let server = TestServer::spawn().await;
//!     let client = TestClient::new(server.base_url.clone());
//!
//!     let response = client.get_todo_lists().await;
//!     assert_eq!(response.status(), StatusCode::OK);
//! }
//! ```

mod client;
mod constants;
mod server;
mod ws;

pub use client::TestClient;
pub use constants::*;
pub use server::TestServer;
#[allow(unused_imports)]
pub use ws::{
    connect_progress_ws, next_progress_event, try_connect_progress_ws_from, ProgressSocket,
};

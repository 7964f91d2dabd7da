//! Shared constants for end-to-end tests

// ============================================================================
// Timeouts
// ============================================================================

/// How long to wait for a spawned server to answer `GET /`
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Poll interval while waiting for the server or for a condition
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;

/// Per-request timeout of the test client
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// How long to wait for a single progress frame
pub const WS_MESSAGE_TIMEOUT_SECS: u64 = 5;

/// How long to wait for a completion run to finish
pub const RUN_FINISH_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// Fixtures
// ============================================================================

/// Origin allowed by CORS on every test server
pub const TEST_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Name of the three-item list created by `TestServer::create_list`
pub const THREE_ITEM_LIST_NAME: &str = "Three items";

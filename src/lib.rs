//! Todo Progress Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod completion;
pub mod config;
pub mod server;
pub mod sqlite_persistence;
pub mod todo_store;

// Re-export commonly used types for convenience
pub use completion::{DispatcherHandle, ProgressBroadcaster, ProgressEvent};
pub use server::{run_server, RequestsLoggingLevel, ServerConfig, ServerState};
pub use todo_store::{SqliteTodoStore, TodoStore};

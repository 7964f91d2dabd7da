use axum::extract::FromRef;

use crate::completion::{DispatcherHandle, ProgressBroadcaster};
use crate::todo_store::TodoStore;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedTodoStore = Arc<dyn TodoStore>;
pub type GuardedProgressBroadcaster = Arc<ProgressBroadcaster>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub todo_store: GuardedTodoStore,
    pub progress_broadcaster: GuardedProgressBroadcaster,
    pub dispatcher: DispatcherHandle,
    pub hash: String,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        todo_store: GuardedTodoStore,
        progress_broadcaster: GuardedProgressBroadcaster,
        dispatcher: DispatcherHandle,
    ) -> Self {
        ServerState {
            config,
            start_time: Instant::now(),
            todo_store,
            progress_broadcaster,
            dispatcher,
            hash: env!("GIT_HASH").to_string(),
        }
    }
}

impl FromRef<ServerState> for GuardedTodoStore {
    fn from_ref(input: &ServerState) -> Self {
        input.todo_store.clone()
    }
}

impl FromRef<ServerState> for GuardedProgressBroadcaster {
    fn from_ref(input: &ServerState) -> Self {
        input.progress_broadcaster.clone()
    }
}

impl FromRef<ServerState> for DispatcherHandle {
    fn from_ref(input: &ServerState) -> Self {
        input.dispatcher.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

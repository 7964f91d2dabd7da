//! The two store operations a completion run needs.

use crate::todo_store::{ItemId, ListId, TodoItem, TodoStore, TodoStoreError, TodoStoreResult};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait ItemStoreGateway: Send + Sync {
    /// Items of the list in stored order. Fails with `ListNotFound` for an
    /// unknown list.
    async fn list_items(&self, list_id: ListId) -> TodoStoreResult<Vec<TodoItem>>;

    /// Idempotent. Returns whether this call changed the item, and fails
    /// with a not-found error when either id does not resolve.
    async fn mark_complete(&self, list_id: ListId, item_id: ItemId) -> TodoStoreResult<bool>;
}

/// Gateway over a [`TodoStore`], running each blocking call on the blocking
/// thread pool.
pub struct StoreItemGateway {
    store: Arc<dyn TodoStore>,
}

impl StoreItemGateway {
    pub fn new(store: Arc<dyn TodoStore>) -> Self {
        Self { store }
    }

    async fn with_store<T, F>(&self, f: F) -> TodoStoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TodoStore) -> TodoStoreResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| TodoStoreError::Unavailable(format!("store task failed: {}", e)))?
    }
}

#[async_trait]
impl ItemStoreGateway for StoreItemGateway {
    async fn list_items(&self, list_id: ListId) -> TodoStoreResult<Vec<TodoItem>> {
        self.with_store(move |store| store.get_todo_items(list_id)).await
    }

    async fn mark_complete(&self, list_id: ListId, item_id: ItemId) -> TodoStoreResult<bool> {
        self.with_store(move |store| store.complete_todo_item(list_id, item_id)).await
    }
}

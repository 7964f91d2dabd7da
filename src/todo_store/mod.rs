//! Persistence for todo lists and their items.

mod models;
mod schema;
mod seed;
mod sqlite_todo_store;

pub use models::*;
pub use schema::TODO_VERSIONED_SCHEMAS;
pub use seed::{seed_demo_list, DEMO_LIST_NAME};
pub use sqlite_todo_store::SqliteTodoStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TodoStoreError {
    #[error("Todo list with id {0} not found")]
    ListNotFound(ListId),

    #[error("Item with id {item_id} not found on list with id {list_id}")]
    ItemNotFound { list_id: ListId, item_id: ItemId },

    #[error("{0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl TodoStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TodoStoreError::ListNotFound(_) | TodoStoreError::ItemNotFound { .. }
        )
    }
}

pub type TodoStoreResult<T> = Result<T, TodoStoreError>;

/// Rejects empty or whitespace-only names and titles.
pub(crate) fn require_non_empty(value: &str, what: &str) -> TodoStoreResult<()> {
    if value.trim().is_empty() {
        return Err(TodoStoreError::Validation(format!("{} cannot be empty.", what)));
    }
    Ok(())
}

pub trait TodoStore: Send + Sync {
    // Lists
    fn list_todo_lists(&self) -> TodoStoreResult<Vec<TodoListSummary>>;
    fn get_todo_list(&self, list_id: ListId) -> TodoStoreResult<TodoList>;
    fn create_todo_list(&self, payload: &CreateTodoList) -> TodoStoreResult<TodoList>;
    /// Creates a list and all of its items in a single transaction.
    fn create_todo_list_with_items(
        &self,
        name: &str,
        item_titles: &[String],
    ) -> TodoStoreResult<TodoList>;
    fn update_todo_list(
        &self,
        list_id: ListId,
        payload: &UpdateTodoList,
    ) -> TodoStoreResult<TodoList>;
    fn delete_todo_list(&self, list_id: ListId) -> TodoStoreResult<()>;
    fn count_todo_lists(&self) -> TodoStoreResult<usize>;

    // Items
    /// Items of a list in insertion order.
    fn get_todo_items(&self, list_id: ListId) -> TodoStoreResult<Vec<TodoItem>>;
    fn get_todo_item(&self, list_id: ListId, item_id: ItemId) -> TodoStoreResult<TodoItem>;
    fn create_todo_item(
        &self,
        list_id: ListId,
        payload: &CreateTodoItem,
    ) -> TodoStoreResult<TodoItem>;
    fn update_todo_item(
        &self,
        list_id: ListId,
        item_id: ItemId,
        payload: &UpdateTodoItem,
    ) -> TodoStoreResult<TodoItem>;
    fn delete_todo_item(&self, list_id: ListId, item_id: ItemId) -> TodoStoreResult<()>;
    /// Sets the completion flag. Returns false when the item was already
    /// complete, which is not an error.
    fn complete_todo_item(&self, list_id: ListId, item_id: ItemId) -> TodoStoreResult<bool>;
}

use serde::{Deserialize, Serialize};

pub type ListId = i64;
pub type ItemId = i64;

/// A single completable entry of a todo list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    pub id: ItemId,
    pub title: String,
    pub is_completed: bool,
}

/// A todo list with its items, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoList {
    pub id: ListId,
    pub name: String,
    pub items: Vec<TodoItem>,
}

/// List without its items, as returned by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoListSummary {
    pub id: ListId,
    pub name: String,
    pub item_count: usize,
    pub completed_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTodoList {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTodoList {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTodoItem {
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTodoItem {
    pub title: String,
    #[serde(default)]
    pub is_completed: bool,
}

use super::{ListId, TodoStore};
use anyhow::Result;
use tracing::info;

pub const DEMO_LIST_NAME: &str = "Demo list";

/// Creates a single demo list holding `item_count` open items, but only on an
/// empty database. Returns the id of the new list, if any.
pub fn seed_demo_list(store: &dyn TodoStore, item_count: usize) -> Result<Option<ListId>> {
    if item_count == 0 || store.count_todo_lists()? > 0 {
        return Ok(None);
    }

    let titles: Vec<String> = (1..=item_count).map(|i| format!("Item {}", i)).collect();
    let list = store.create_todo_list_with_items(DEMO_LIST_NAME, &titles)?;
    info!(
        "Seeded demo list {} with {} items",
        list.id,
        list.items.len()
    );
    Ok(Some(list.id))
}

use super::schema::TODO_VERSIONED_SCHEMAS;
use super::{
    require_non_empty, CreateTodoItem, CreateTodoList, ItemId, ListId, TodoItem, TodoList,
    TodoListSummary, TodoStore, TodoStoreError, TodoStoreResult, UpdateTodoItem, UpdateTodoList,
};
use crate::sqlite_persistence::open_versioned;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

pub struct SqliteTodoStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTodoStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path, TODO_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a half-applied statement
        // behind, so a poisoned connection is still usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<TodoItem> {
        Ok(TodoItem {
            id: row.get("id")?,
            title: row.get("title")?,
            is_completed: row.get::<_, i64>("is_completed")? != 0,
        })
    }

    fn list_exists(conn: &Connection, list_id: ListId) -> TodoStoreResult<bool> {
        Ok(conn
            .query_row(
                "SELECT 1 FROM todo_lists WHERE id = ?1",
                params![list_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    fn require_list(conn: &Connection, list_id: ListId) -> TodoStoreResult<String> {
        conn.query_row(
            "SELECT name FROM todo_lists WHERE id = ?1",
            params![list_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(TodoStoreError::ListNotFound(list_id))
    }

    fn load_items(conn: &Connection, list_id: ListId) -> TodoStoreResult<Vec<TodoItem>> {
        let mut stmt = conn.prepare_cached(
            "SELECT id, title, is_completed FROM todo_items WHERE list_id = ?1 ORDER BY id",
        )?;
        let items = stmt
            .query_map(params![list_id], Self::row_to_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn load_item(conn: &Connection, list_id: ListId, item_id: ItemId) -> TodoStoreResult<TodoItem> {
        let item = conn
            .query_row(
                "SELECT id, title, is_completed FROM todo_items WHERE list_id = ?1 AND id = ?2",
                params![list_id, item_id],
                Self::row_to_item,
            )
            .optional()?;
        match item {
            Some(item) => Ok(item),
            None if Self::list_exists(conn, list_id)? => {
                Err(TodoStoreError::ItemNotFound { list_id, item_id })
            }
            None => Err(TodoStoreError::ListNotFound(list_id)),
        }
    }

    /// Maps a zero-row delete of an item to the right not-found error.
    fn item_miss(conn: &Connection, list_id: ListId, item_id: ItemId) -> TodoStoreError {
        match Self::list_exists(conn, list_id) {
            Ok(true) => TodoStoreError::ItemNotFound { list_id, item_id },
            Ok(false) => TodoStoreError::ListNotFound(list_id),
            Err(e) => e,
        }
    }
}

impl TodoStore for SqliteTodoStore {
    fn list_todo_lists(&self) -> TodoStoreResult<Vec<TodoListSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT l.id, l.name,
                    COUNT(i.id) AS item_count,
                    COALESCE(SUM(i.is_completed), 0) AS completed_count
             FROM todo_lists l
             LEFT JOIN todo_items i ON i.list_id = l.id
             GROUP BY l.id
             ORDER BY l.id",
        )?;
        let lists = stmt
            .query_map([], |row| {
                Ok(TodoListSummary {
                    id: row.get("id")?,
                    name: row.get("name")?,
                    item_count: row.get::<_, i64>("item_count")? as usize,
                    completed_count: row.get::<_, i64>("completed_count")? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(lists)
    }

    fn get_todo_list(&self, list_id: ListId) -> TodoStoreResult<TodoList> {
        let conn = self.conn();
        let name = Self::require_list(&conn, list_id)?;
        let items = Self::load_items(&conn, list_id)?;
        Ok(TodoList {
            id: list_id,
            name,
            items,
        })
    }

    fn create_todo_list(&self, payload: &CreateTodoList) -> TodoStoreResult<TodoList> {
        self.create_todo_list_with_items(&payload.name, &[])
    }

    fn create_todo_list_with_items(
        &self,
        name: &str,
        item_titles: &[String],
    ) -> TodoStoreResult<TodoList> {
        require_non_empty(name, "Name")?;
        for title in item_titles {
            require_non_empty(title, "Title of the item")?;
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("INSERT INTO todo_lists (name) VALUES (?1)", params![name])?;
        let list_id = tx.last_insert_rowid();

        let mut items = Vec::with_capacity(item_titles.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO todo_items (list_id, title, is_completed) VALUES (?1, ?2, 0)",
            )?;
            for title in item_titles {
                stmt.execute(params![list_id, title])?;
                items.push(TodoItem {
                    id: tx.last_insert_rowid(),
                    title: title.clone(),
                    is_completed: false,
                });
            }
        }
        tx.commit()?;

        debug!("Created list {} with {} items", list_id, items.len());
        Ok(TodoList {
            id: list_id,
            name: name.to_string(),
            items,
        })
    }

    fn update_todo_list(
        &self,
        list_id: ListId,
        payload: &UpdateTodoList,
    ) -> TodoStoreResult<TodoList> {
        let conn = self.conn();
        Self::require_list(&conn, list_id)?;
        require_non_empty(&payload.name, "Name")?;

        conn.execute(
            "UPDATE todo_lists SET name = ?1 WHERE id = ?2",
            params![payload.name, list_id],
        )?;
        let items = Self::load_items(&conn, list_id)?;
        Ok(TodoList {
            id: list_id,
            name: payload.name.clone(),
            items,
        })
    }

    fn delete_todo_list(&self, list_id: ListId) -> TodoStoreResult<()> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM todo_lists WHERE id = ?1", params![list_id])?;
        if deleted == 0 {
            return Err(TodoStoreError::ListNotFound(list_id));
        }
        Ok(())
    }

    fn count_todo_lists(&self) -> TodoStoreResult<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM todo_lists", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn get_todo_items(&self, list_id: ListId) -> TodoStoreResult<Vec<TodoItem>> {
        let conn = self.conn();
        Self::require_list(&conn, list_id)?;
        Self::load_items(&conn, list_id)
    }

    fn get_todo_item(&self, list_id: ListId, item_id: ItemId) -> TodoStoreResult<TodoItem> {
        let conn = self.conn();
        Self::load_item(&conn, list_id, item_id)
    }

    fn create_todo_item(
        &self,
        list_id: ListId,
        payload: &CreateTodoItem,
    ) -> TodoStoreResult<TodoItem> {
        let conn = self.conn();
        Self::require_list(&conn, list_id)?;
        require_non_empty(&payload.title, "Title of the item")?;

        conn.execute(
            "INSERT INTO todo_items (list_id, title, is_completed) VALUES (?1, ?2, 0)",
            params![list_id, payload.title],
        )?;
        Ok(TodoItem {
            id: conn.last_insert_rowid(),
            title: payload.title.clone(),
            is_completed: false,
        })
    }

    fn update_todo_item(
        &self,
        list_id: ListId,
        item_id: ItemId,
        payload: &UpdateTodoItem,
    ) -> TodoStoreResult<TodoItem> {
        let conn = self.conn();
        Self::load_item(&conn, list_id, item_id)?;
        require_non_empty(&payload.title, "Title of the item")?;

        conn.execute(
            "UPDATE todo_items SET title = ?1, is_completed = ?2 WHERE list_id = ?3 AND id = ?4",
            params![payload.title, payload.is_completed as i64, list_id, item_id],
        )?;
        Ok(TodoItem {
            id: item_id,
            title: payload.title.clone(),
            is_completed: payload.is_completed,
        })
    }

    fn delete_todo_item(&self, list_id: ListId, item_id: ItemId) -> TodoStoreResult<()> {
        let conn = self.conn();
        let deleted = conn.execute(
            "DELETE FROM todo_items WHERE list_id = ?1 AND id = ?2",
            params![list_id, item_id],
        )?;
        if deleted == 0 {
            return Err(Self::item_miss(&conn, list_id, item_id));
        }
        Ok(())
    }

    fn complete_todo_item(&self, list_id: ListId, item_id: ItemId) -> TodoStoreResult<bool> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE todo_items SET is_completed = 1
             WHERE list_id = ?1 AND id = ?2 AND is_completed = 0",
            params![list_id, item_id],
        )?;
        if updated > 0 {
            return Ok(true);
        }
        // Nothing changed: either already complete or not there at all
        Self::load_item(&conn, list_id, item_id).map(|_| false)
    }
}

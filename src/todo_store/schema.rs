//! SQLite schema definitions for the todo database.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

// =============================================================================
// Version 1 - Lists and items
// =============================================================================

const TODO_LISTS_TABLE_V1: Table = Table {
    name: "todo_lists",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
    ],
    indices: &[],
};

const TODO_LIST_FOREIGN_KEY: ForeignKey = ForeignKey {
    foreign_table: "todo_lists",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

/// Item order within a list is the rowid order, i.e. insertion order.
const TODO_ITEMS_TABLE_V1: Table = Table {
    name: "todo_items",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "list_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TODO_LIST_FOREIGN_KEY)
        ),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!(
            "is_completed",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[("idx_todo_items_list_id", "list_id")],
};

pub static TODO_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[TODO_LISTS_TABLE_V1, TODO_ITEMS_TABLE_V1],
    migration: None,
}];

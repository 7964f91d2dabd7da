use crate::todo_store::ListId;
use serde::{Deserialize, Serialize};

/// Progress of a completion run, pushed to every subscriber.
///
/// Serialized as `{"listId": 1, "progress": 33}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub list_id: ListId,
    pub progress: u8,
}

impl ProgressEvent {
    pub fn new(list_id: ListId, progress: u8) -> Self {
        Self { list_id, progress }
    }
}

/// Floor of `processed * 100 / total`, clamped to 100.
///
/// An empty list has nothing left to do and reports 100, though the worker
/// never emits an event for it.
pub fn progress_percentage(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let percentage = (processed as u128 * 100) / total as u128;
    percentage.min(100) as u8
}

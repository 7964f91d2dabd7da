use super::broadcaster::ProgressBroadcaster;
use super::gateway::ItemStoreGateway;
use super::progress::{progress_percentage, ProgressEvent};
use crate::server::metrics;
use crate::todo_store::{ListId, TodoStoreError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors that end a completion run early.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Todo list with id {0} not found")]
    ListNotFound(ListId),

    #[error("Failed to read list items: {0}")]
    Store(#[source] TodoStoreError),

    #[error("cancelled")]
    Cancelled,
}

/// What a finished run did to the list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub newly_completed: usize,
    pub already_completed: usize,
    pub skipped: usize,
}

/// Completes every item of a list, one at a time, broadcasting progress
/// after each item.
pub struct BulkCompletionWorker {
    gateway: Arc<dyn ItemStoreGateway>,
    broadcaster: Arc<ProgressBroadcaster>,
    item_delay: Duration,
}

impl BulkCompletionWorker {
    pub fn new(
        gateway: Arc<dyn ItemStoreGateway>,
        broadcaster: Arc<ProgressBroadcaster>,
        item_delay: Duration,
    ) -> Self {
        Self {
            gateway,
            broadcaster,
            item_delay,
        }
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.broadcaster
    }

    /// Run the completion loop for `list_id`.
    ///
    /// Only the initial item fetch is fatal. An item that cannot be marked
    /// complete is counted as skipped and still advances the progress. An
    /// empty list completes without emitting any event.
    pub async fn run(
        &self,
        list_id: ListId,
        cancel_token: &CancellationToken,
    ) -> Result<RunSummary, CompletionError> {
        let items = match self.gateway.list_items(list_id).await {
            Ok(items) => items,
            Err(TodoStoreError::ListNotFound(_)) => {
                return Err(CompletionError::ListNotFound(list_id))
            }
            Err(e) => return Err(CompletionError::Store(e)),
        };

        let total = items.len();
        let mut summary = RunSummary {
            total,
            ..Default::default()
        };
        if total == 0 {
            info!("List {} has no items, nothing to complete", list_id);
            return Ok(summary);
        }

        debug!("Completing {} items of list {}", total, list_id);

        for (index, item) in items.iter().enumerate() {
            if cancel_token.is_cancelled() {
                return Err(CompletionError::Cancelled);
            }

            if item.is_completed {
                summary.already_completed += 1;
                metrics::record_item_already_completed();
            } else {
                match self.gateway.mark_complete(list_id, item.id).await {
                    Ok(true) => {
                        summary.newly_completed += 1;
                        metrics::record_item_completed();
                    }
                    // Another run got there between our read and this update
                    Ok(false) => {
                        summary.already_completed += 1;
                        metrics::record_item_already_completed();
                    }
                    Err(e) => {
                        warn!("Skipping item {} of list {}: {}", item.id, list_id, e);
                        summary.skipped += 1;
                        metrics::record_item_skipped();
                    }
                }
            }

            let processed = index + 1;
            let event = ProgressEvent::new(list_id, progress_percentage(processed, total));
            let dropped = self.broadcaster.broadcast(event).await;
            if dropped > 0 {
                debug!("Dropped {} progress subscribers", dropped);
            }

            if !self.item_delay.is_zero() && processed < total {
                tokio::select! {
                    _ = tokio::time::sleep(self.item_delay) => {}
                    _ = cancel_token.cancelled() => return Err(CompletionError::Cancelled),
                }
            }
        }

        info!(
            "Completed list {}: {} newly completed, {} already complete, {} skipped",
            list_id, summary.newly_completed, summary.already_completed, summary.skipped
        );
        Ok(summary)
    }
}

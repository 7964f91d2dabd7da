//! Bulk "complete all items" pipeline.
//!
//! A [`DispatcherHandle`] queues runs, the [`CompletionDispatcher`] spawns a
//! [`BulkCompletionWorker`] for each of them, and the worker reports progress
//! through the [`ProgressBroadcaster`] to every connected subscriber.

mod broadcaster;
mod dispatcher;
mod gateway;
mod handle;
mod progress;
mod worker;

pub use broadcaster::{ProgressBroadcaster, SubscriberId, DEFAULT_SUBSCRIBER_BUFFER};
pub use dispatcher::{create_dispatcher, CompletionDispatcher, DEFAULT_RUN_HISTORY_LIMIT};
pub use gateway::{ItemStoreGateway, StoreItemGateway};
pub use handle::{
    CompletionRun, DispatchError, DispatcherCommand, DispatcherHandle, RunId, RunRegistry, RunState,
};
pub use progress::{progress_percentage, ProgressEvent};
pub use worker::{BulkCompletionWorker, CompletionError, RunSummary};

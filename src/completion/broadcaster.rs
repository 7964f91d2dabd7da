//! Progress broadcaster.
//!
//! Tracks every connected progress subscriber and fans out each
//! [`ProgressEvent`] to all of them. Delivery is best effort: a subscriber
//! whose queue is closed or full is dropped from the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::debug;

use super::progress::ProgressEvent;
use crate::server::metrics;

pub type SubscriberId = u64;

/// Default capacity of a subscriber's outgoing queue.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1024;

pub struct ProgressBroadcaster {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<ProgressEvent>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl ProgressBroadcaster {
    /// `buffer` is the per-subscriber queue capacity.
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register a new subscriber.
    ///
    /// Returns its id and the receiver the transport should forward to the
    /// client. The receiver yields `None` once the subscriber is unregistered
    /// and all queued events have been read.
    pub async fn register(&self) -> (SubscriberId, mpsc::Receiver<ProgressEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);

        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(id, tx);
        metrics::set_progress_subscribers(subscribers.len());
        debug!("Registered progress subscriber {}", id);

        (id, rx)
    }

    /// Remove a subscriber. Returns false if it was not registered, for
    /// instance because a failed delivery already dropped it.
    pub async fn unregister(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let removed = subscribers.remove(&id).is_some();
        metrics::set_progress_subscribers(subscribers.len());
        if removed {
            debug!("Unregistered progress subscriber {}", id);
        }
        removed
    }

    /// Deliver `event` to every registered subscriber.
    ///
    /// Never waits on a subscriber. Subscribers that could not take the event
    /// are unregistered; returns how many were dropped.
    pub async fn broadcast(&self, event: ProgressEvent) -> usize {
        let targets: Vec<(SubscriberId, mpsc::Sender<ProgressEvent>)> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };

        let mut failed = Vec::new();
        for (id, tx) in &targets {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Closed(_)) => {
                    debug!("Progress subscriber {} disconnected", id);
                    failed.push(*id);
                }
                Err(TrySendError::Full(_)) => {
                    debug!("Progress subscriber {} is lagging behind, dropping it", id);
                    failed.push(*id);
                }
            }
        }
        drop(targets);

        if failed.is_empty() {
            return 0;
        }

        let mut subscribers = self.subscribers.write().await;
        let dropped = failed
            .iter()
            .filter(|id| subscribers.remove(*id).is_some())
            .count();
        metrics::set_progress_subscribers(subscribers.len());
        metrics::record_dropped_subscribers(dropped);
        dropped
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn is_registered(&self, id: SubscriberId) -> bool {
        self.subscribers.read().await.contains_key(&id)
    }
}

use super::handle::{
    CompletionRun, DispatchError, DispatcherCommand, DispatcherHandle, RunId, RunRegistry,
};
use super::worker::{BulkCompletionWorker, CompletionError};
use crate::server::metrics;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default number of finished runs kept for status queries.
pub const DEFAULT_RUN_HISTORY_LIMIT: usize = 100;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the execution of completion runs.
///
/// Each submitted run is spawned on its own task with a cancellation token
/// derived from the shutdown token, so shutting down cancels every run.
pub struct CompletionDispatcher {
    worker: Arc<BulkCompletionWorker>,

    /// Shared with handles and spawned runs
    runs: RunRegistry,

    /// Spawned runs that have not been reaped yet (managed by the loop only)
    running_handles: HashMap<RunId, JoinHandle<()>>,

    run_cancel_tokens: HashMap<RunId, CancellationToken>,

    command_receiver: mpsc::UnboundedReceiver<DispatcherCommand>,

    shutdown_token: CancellationToken,

    run_history_limit: usize,
}

impl CompletionDispatcher {
    pub fn new(
        worker: Arc<BulkCompletionWorker>,
        runs: RunRegistry,
        command_receiver: mpsc::UnboundedReceiver<DispatcherCommand>,
        shutdown_token: CancellationToken,
        run_history_limit: usize,
    ) -> Self {
        Self {
            worker,
            runs,
            running_handles: HashMap::new(),
            run_cancel_tokens: HashMap::new(),
            command_receiver,
            shutdown_token,
            run_history_limit,
        }
    }

    /// Main dispatcher loop. Returns once the shutdown token is cancelled and
    /// the in-flight runs have stopped.
    pub async fn run(&mut self) {
        info!(
            "Starting completion dispatcher (keeping {} finished runs)",
            self.run_history_limit
        );

        let mut cleanup = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            self.cleanup_finished_runs().await;

            tokio::select! {
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = cleanup.tick() => {}
                _ = self.shutdown_token.cancelled() => {
                    info!("Completion dispatcher received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: DispatcherCommand) {
        match cmd {
            DispatcherCommand::Start { run_id } => {
                self.spawn_run(run_id).await;
            }
            DispatcherCommand::Cancel { run_id, response } => {
                let result = self.cancel_run(run_id).await;
                let _ = response.send(result);
            }
        }
    }

    async fn cancel_run(&mut self, run_id: RunId) -> Result<(), DispatchError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&run_id)
            .ok_or(DispatchError::RunNotFound(run_id))?;
        if run.state.is_finished() {
            return Err(DispatchError::AlreadyFinished(run_id));
        }

        match self.run_cancel_tokens.get(&run_id) {
            Some(token) => {
                info!("Cancelling completion run {}", run_id);
                token.cancel();
            }
            None => {
                // Never spawned, nothing will pick it up
                run.mark_failed(CompletionError::Cancelled.to_string());
            }
        }
        Ok(())
    }

    async fn spawn_run(&mut self, run_id: RunId) {
        let list_id = {
            let runs = self.runs.read().await;
            match runs.get(&run_id) {
                Some(run) if !run.state.is_finished() => run.list_id,
                Some(_) => return,
                None => {
                    error!("Attempted to start unknown completion run {}", run_id);
                    return;
                }
            }
        };

        info!("Starting completion run {} for list {}", run_id, list_id);

        let cancel_token = self.shutdown_token.child_token();
        self.run_cancel_tokens.insert(run_id, cancel_token.clone());

        let worker = Arc::clone(&self.worker);
        let runs = Arc::clone(&self.runs);

        let handle = tokio::spawn(async move {
            if let Some(run) = runs.write().await.get_mut(&run_id) {
                run.mark_running();
            }
            metrics::set_completion_run_active(true);
            let start_time = Instant::now();

            let result =
                tokio::spawn(async move { worker.run(list_id, &cancel_token).await }).await;
            let elapsed = start_time.elapsed();

            let (outcome, result) = match result {
                Ok(Ok(summary)) => {
                    info!(
                        "Completion run {} finished in {:?} ({} items)",
                        run_id, elapsed, summary.total
                    );
                    ("completed", Ok(summary))
                }
                Ok(Err(CompletionError::Cancelled)) => {
                    info!("Completion run {} was cancelled after {:?}", run_id, elapsed);
                    ("cancelled", Err(CompletionError::Cancelled.to_string()))
                }
                Ok(Err(e)) => {
                    warn!("Completion run {} failed after {:?}: {}", run_id, elapsed, e);
                    ("failed", Err(e.to_string()))
                }
                Err(e) => {
                    error!(
                        "Completion run {} panicked after {:?}: {}",
                        run_id, elapsed, e
                    );
                    ("panic", Err(format!("Task panic: {}", e)))
                }
            };

            if let Some(run) = runs.write().await.get_mut(&run_id) {
                match result {
                    Ok(summary) => run.mark_completed(summary),
                    Err(message) => run.mark_failed(message),
                }
            }

            metrics::record_completion_run(outcome, elapsed);
            metrics::set_completion_run_active(false);
        });

        self.running_handles.insert(run_id, handle);
    }

    /// Reap finished run tasks and drop the oldest finished runs beyond the
    /// history limit.
    async fn cleanup_finished_runs(&mut self) {
        let finished: Vec<RunId> = self
            .running_handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(run_id, _)| *run_id)
            .collect();

        for run_id in finished {
            if let Some(handle) = self.running_handles.remove(&run_id) {
                let _ = handle.await;
            }
            self.run_cancel_tokens.remove(&run_id);
        }

        self.prune_history().await;
    }

    async fn prune_history(&self) {
        let mut runs = self.runs.write().await;
        let mut finished: Vec<&CompletionRun> =
            runs.values().filter(|run| run.state.is_finished()).collect();
        if finished.len() <= self.run_history_limit {
            return;
        }

        finished.sort_by_key(|run| run.finished_at.unwrap_or(run.submitted_at));
        let excess = finished.len() - self.run_history_limit;
        let expired: Vec<RunId> = finished
            .into_iter()
            .take(excess)
            .map(|run| run.run_id)
            .collect();

        for run_id in &expired {
            runs.remove(run_id);
        }
        debug!("Pruned {} finished completion runs", expired.len());
    }

    /// Cancel every in-flight run and wait for them to record their outcome.
    async fn shutdown(&mut self) {
        info!("Shutting down completion dispatcher...");

        for (run_id, token) in &self.run_cancel_tokens {
            debug!("Cancelling completion run: {}", run_id);
            token.cancel();
        }

        for (run_id, handle) in self.running_handles.drain() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                warn!("Completion run {} did not stop in time", run_id);
            }
        }

        self.run_cancel_tokens.clear();
        info!("Completion dispatcher shutdown complete");
    }
}

/// Create a dispatcher and its handle.
pub fn create_dispatcher(
    worker: Arc<BulkCompletionWorker>,
    shutdown_token: CancellationToken,
    run_history_limit: usize,
) -> (CompletionDispatcher, DispatcherHandle) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let runs: RunRegistry = Arc::new(RwLock::new(HashMap::new()));

    let dispatcher = CompletionDispatcher::new(
        worker,
        Arc::clone(&runs),
        command_rx,
        shutdown_token,
        run_history_limit,
    );
    let handle = DispatcherHandle::new(command_tx, runs);

    (dispatcher, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{ProgressBroadcaster, RunState, StoreItemGateway};
    use crate::todo_store::{ListId, SqliteTodoStore, TodoStore};
    use tempfile::TempDir;

    struct TestDispatcher {
        handle: DispatcherHandle,
        store: Arc<SqliteTodoStore>,
        broadcaster: Arc<ProgressBroadcaster>,
        shutdown_token: CancellationToken,
        loop_handle: JoinHandle<()>,
        _temp_dir: TempDir,
    }

    fn start_dispatcher(item_delay: Duration, run_history_limit: usize) -> TestDispatcher {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteTodoStore::new(temp_dir.path().join("todo.db")).unwrap());
        let broadcaster = Arc::new(ProgressBroadcaster::default());
        let worker = Arc::new(BulkCompletionWorker::new(
            Arc::new(StoreItemGateway::new(store.clone())),
            broadcaster.clone(),
            item_delay,
        ));
        let shutdown_token = CancellationToken::new();
        let (mut dispatcher, handle) =
            create_dispatcher(worker, shutdown_token.clone(), run_history_limit);
        let loop_handle = tokio::spawn(async move { dispatcher.run().await });

        TestDispatcher {
            handle,
            store,
            broadcaster,
            shutdown_token,
            loop_handle,
            _temp_dir: temp_dir,
        }
    }

    fn create_list(store: &SqliteTodoStore, count: usize) -> ListId {
        let titles: Vec<String> = (1..=count).map(|i| format!("Item {}", i)).collect();
        store.create_todo_list_with_items("list", &titles).unwrap().id
    }

    async fn wait_until_finished(handle: &DispatcherHandle, run_id: RunId) -> CompletionRun {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(run) = handle.get_run(run_id).await {
                    if run.state.is_finished() {
                        return run;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("run did not finish in time")
    }

    async fn wait_until_running(handle: &DispatcherHandle, run_id: RunId) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.get_run(run_id).await.map(|r| r.state) != Some(RunState::Running) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("run did not start in time");
    }

    #[tokio::test]
    async fn submitted_run_completes_list() {
        let t = start_dispatcher(Duration::ZERO, DEFAULT_RUN_HISTORY_LIMIT);
        let list_id = create_list(&t.store, 3);
        let (_id, mut rx) = t.broadcaster.register().await;

        let run_id = t.handle.submit(list_id).await.unwrap();
        let run = wait_until_finished(&t.handle, run_id).await;

        assert_eq!(run.state, RunState::Completed);
        assert_eq!(run.summary.unwrap().newly_completed, 3);
        assert!(run.started_at.is_some());
        assert!(t
            .store
            .get_todo_items(list_id)
            .unwrap()
            .iter()
            .all(|item| item.is_completed));

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.progress);
        }
        assert_eq!(seen, vec![33, 66, 100]);

        t.shutdown_token.cancel();
        t.loop_handle.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_list_fails_without_events() {
        let t = start_dispatcher(Duration::ZERO, DEFAULT_RUN_HISTORY_LIMIT);
        let (_id, mut rx) = t.broadcaster.register().await;

        let run_id = t.handle.submit(999).await.unwrap();
        let run = wait_until_finished(&t.handle, run_id).await;

        assert_eq!(run.state, RunState::Failed);
        assert!(run.error.unwrap().contains("not found"));
        assert!(rx.try_recv().is_err());

        t.shutdown_token.cancel();
        t.loop_handle.await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_submissions_are_idempotent() {
        let t = start_dispatcher(Duration::ZERO, DEFAULT_RUN_HISTORY_LIMIT);
        let list_id = create_list(&t.store, 10);

        let first = t.handle.submit(list_id).await.unwrap();
        let second = t.handle.submit(list_id).await.unwrap();
        let first = wait_until_finished(&t.handle, first).await;
        let second = wait_until_finished(&t.handle, second).await;

        assert_eq!(first.state, RunState::Completed);
        assert_eq!(second.state, RunState::Completed);
        let first = first.summary.unwrap();
        let second = second.summary.unwrap();
        assert_eq!(first.newly_completed + second.newly_completed, 10);
        assert_eq!(first.already_completed + second.already_completed, 10);

        t.shutdown_token.cancel();
        t.loop_handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_running_run() {
        let t = start_dispatcher(Duration::from_secs(60), DEFAULT_RUN_HISTORY_LIMIT);
        let list_id = create_list(&t.store, 3);

        let run_id = t.handle.submit(list_id).await.unwrap();
        wait_until_running(&t.handle, run_id).await;
        t.handle.cancel(run_id).await.unwrap();
        let run = wait_until_finished(&t.handle, run_id).await;

        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.error.as_deref(), Some("cancelled"));
        assert_eq!(
            t.handle.cancel(run_id).await,
            Err(DispatchError::AlreadyFinished(run_id))
        );

        t.shutdown_token.cancel();
        t.loop_handle.await.unwrap();
    }

    #[tokio::test]
    async fn run_is_running_only_once_its_task_starts() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteTodoStore::new(temp_dir.path().join("todo.db")).unwrap());
        let list_id = create_list(&store, 2);
        let worker = Arc::new(BulkCompletionWorker::new(
            Arc::new(StoreItemGateway::new(store.clone())),
            Arc::new(ProgressBroadcaster::default()),
            Duration::from_secs(60),
        ));
        let (mut dispatcher, handle) =
            create_dispatcher(worker, CancellationToken::new(), DEFAULT_RUN_HISTORY_LIMIT);

        let run_id = handle.submit(list_id).await.unwrap();
        dispatcher.spawn_run(run_id).await;

        // Single threaded runtime: the run task has not been polled yet
        let run = handle.get_run(run_id).await.unwrap();
        assert_eq!(run.state, RunState::Submitted);
        assert!(run.started_at.is_none());

        wait_until_running(&handle, run_id).await;

        dispatcher.shutdown().await;
        let run = handle.get_run(run_id).await.unwrap();
        assert_eq!(run.state, RunState::Failed);
    }

    #[tokio::test]
    async fn cancel_unknown_run() {
        let t = start_dispatcher(Duration::ZERO, DEFAULT_RUN_HISTORY_LIMIT);
        let run_id = uuid::Uuid::new_v4();

        assert_eq!(
            t.handle.cancel(run_id).await,
            Err(DispatchError::RunNotFound(run_id))
        );

        t.shutdown_token.cancel();
        t.loop_handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_runs() {
        let t = start_dispatcher(Duration::from_secs(60), DEFAULT_RUN_HISTORY_LIMIT);
        let list_id = create_list(&t.store, 5);

        let run_id = t.handle.submit(list_id).await.unwrap();
        wait_until_running(&t.handle, run_id).await;

        t.shutdown_token.cancel();
        tokio::time::timeout(Duration::from_secs(5), t.loop_handle)
            .await
            .expect("dispatcher did not stop")
            .unwrap();

        let run = t.handle.get_run(run_id).await.unwrap();
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.error.as_deref(), Some("cancelled"));
        assert_eq!(
            t.handle.submit(list_id).await,
            Err(DispatchError::DispatcherUnavailable)
        );
    }

    #[tokio::test]
    async fn finished_runs_beyond_limit_are_pruned() {
        let t = start_dispatcher(Duration::ZERO, 2);
        let list_id = create_list(&t.store, 1);

        let mut run_ids = Vec::new();
        for _ in 0..3 {
            let run_id = t.handle.submit(list_id).await.unwrap();
            wait_until_finished(&t.handle, run_id).await;
            run_ids.push(run_id);
        }
        // Any command wakes the loop, which prunes before waiting again
        let _ = t.handle.cancel(uuid::Uuid::new_v4()).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while t.handle.get_run(run_ids[0]).await.is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("oldest run was not pruned");

        assert!(t.handle.get_run(run_ids[1]).await.is_some());
        assert!(t.handle.get_run(run_ids[2]).await.is_some());

        t.shutdown_token.cancel();
        t.loop_handle.await.unwrap();
    }
}

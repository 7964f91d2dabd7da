use super::worker::RunSummary;
use crate::todo_store::ListId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

pub type RunId = Uuid;

/// Lifecycle of a completion run: `Submitted -> Running -> Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Submitted,
    Running,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

/// One execution of the completion pipeline against one list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRun {
    pub run_id: RunId,
    pub list_id: ListId,
    pub state: RunState,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompletionRun {
    fn submitted(list_id: ListId) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            list_id,
            state: RunState::Submitted,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            summary: None,
            error: None,
        }
    }

    pub(super) fn mark_running(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
    }

    pub(super) fn mark_completed(&mut self, summary: RunSummary) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
        self.summary = Some(summary);
    }

    pub(super) fn mark_failed(&mut self, error: String) {
        self.state = RunState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Completion run {0} not found")]
    RunNotFound(RunId),

    #[error("Completion run {0} has already finished")]
    AlreadyFinished(RunId),

    #[error("Completion dispatcher is not available")]
    DispatcherUnavailable,
}

/// Command sent to the dispatcher loop.
pub enum DispatcherCommand {
    Start {
        run_id: RunId,
    },
    Cancel {
        run_id: RunId,
        response: oneshot::Sender<Result<(), DispatchError>>,
    },
}

/// Runs known to the process, shared between the dispatcher loop, its
/// spawned runs and every handle.
pub type RunRegistry = Arc<RwLock<HashMap<RunId, CompletionRun>>>;

/// Handle to the completion dispatcher, used by HTTP handlers.
#[derive(Clone)]
pub struct DispatcherHandle {
    command_tx: mpsc::UnboundedSender<DispatcherCommand>,
    runs: RunRegistry,
}

impl DispatcherHandle {
    pub fn new(command_tx: mpsc::UnboundedSender<DispatcherCommand>, runs: RunRegistry) -> Self {
        Self { command_tx, runs }
    }

    /// Queue a completion run for `list_id` and return its id without waiting
    /// for it to start.
    ///
    /// The list is not looked up here, an unknown list makes the run fail.
    pub async fn submit(&self, list_id: ListId) -> Result<RunId, DispatchError> {
        let run = CompletionRun::submitted(list_id);
        let run_id = run.run_id;
        self.runs.write().await.insert(run_id, run);

        if self
            .command_tx
            .send(DispatcherCommand::Start { run_id })
            .is_err()
        {
            self.runs.write().await.remove(&run_id);
            return Err(DispatchError::DispatcherUnavailable);
        }
        Ok(run_id)
    }

    pub async fn get_run(&self, run_id: RunId) -> Option<CompletionRun> {
        self.runs.read().await.get(&run_id).cloned()
    }

    /// All known runs, most recently submitted first.
    pub async fn list_runs(&self) -> Vec<CompletionRun> {
        let mut runs: Vec<CompletionRun> = self.runs.read().await.values().cloned().collect();
        runs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        runs
    }

    /// Request cancellation of a run that has not finished yet. The run ends
    /// up `Failed` once the worker observes the request.
    pub async fn cancel(&self, run_id: RunId) -> Result<(), DispatchError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(DispatcherCommand::Cancel {
                run_id,
                response: response_tx,
            })
            .map_err(|_| DispatchError::DispatcherUnavailable)?;

        response_rx
            .await
            .map_err(|_| DispatchError::DispatcherUnavailable)?
    }
}

use std::time::Instant;

use super::{
    ClientId, Datum, Phase, TaskId,
    aggregator::ResultAggregator,
    task_store::{Payload, Task, TaskKind, TaskStore},
};

/// A unit of work as handed to a client.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub key: Option<Datum>,
    pub payload: Payload,
}

impl From<Task> for Assignment {
    fn from(task: Task) -> Self {
        Assignment { task_id: task.id, kind: task.kind, key: task.key, payload: task.payload }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Task(Assignment),
    /// Tasks are still outstanding elsewhere; retry later.
    Wait,
    /// The current phase is exhausted and the next one is not loaded yet.
    PhaseDone,
    /// The job is finished; the client may leave.
    JobDone,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    Map(Vec<(Datum, Datum)>),
    Reduce(Option<Datum>),
}

impl TaskOutput {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskOutput::Map(_) => TaskKind::Map,
            TaskOutput::Reduce(_) => TaskKind::Reduce,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Applied,
    /// The task is no longer held by this client; nothing changed.
    Stale,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("unknown task#{0}")]
    UnknownTask(TaskId),
    #[error("task#{task_id} is a {expected:?} task, got {got:?} output")]
    OutputMismatch { task_id: TaskId, expected: TaskKind, got: TaskKind },
}

/// Request handling on behalf of one client. Holds nothing but the id; all
/// state lives in the store and the aggregator it is handed.
#[derive(Debug, Clone, Copy)]
pub struct ClientSession {
    client_id: ClientId,
}

impl ClientSession {
    pub fn new(client_id: ClientId) -> Self {
        ClientSession { client_id }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn poll(&self, store: &mut TaskStore, phase: Phase, now: Instant) -> PollOutcome {
        if phase == Phase::Done {
            return PollOutcome::JobDone;
        }
        match store.claim_next(self.client_id, now) {
            Some(task) => {
                log::debug!("Dispatching task#{} to worker#{}", task.id, self.client_id);
                PollOutcome::Task(task.into())
            }
            None if store.is_phase_exhausted() => PollOutcome::PhaseDone,
            None => PollOutcome::Wait,
        }
    }

    pub fn report(
        &self,
        store: &mut TaskStore,
        aggregator: &mut ResultAggregator,
        task_id: TaskId,
        output: TaskOutput,
    ) -> Result<ReportOutcome, SessionError> {
        let (kind, key) = match self.lookup(store, task_id)? {
            Some(task) if task.state.is_assigned_to(self.client_id) => (task.kind, task.key.clone()),
            Some(_) => {
                log::debug!("Discarding stale result of task#{} from worker#{}", task_id, self.client_id);
                return Ok(ReportOutcome::Stale);
            }
            None => return Ok(ReportOutcome::Stale),
        };
        // only the holder's output is inspected; anyone else's is stale whatever its shape
        if output.kind() != kind {
            return Err(SessionError::OutputMismatch { task_id, expected: kind, got: output.kind() });
        }
        if !store.complete(task_id, self.client_id) {
            return Ok(ReportOutcome::Stale);
        }

        match (output, key) {
            (TaskOutput::Map(pairs), _) => {
                for (k, v) in pairs {
                    aggregator.record_map_output(k, v);
                }
            }
            (TaskOutput::Reduce(Some(value)), Some(key)) => aggregator.record_reduce_output(key, value),
            (TaskOutput::Reduce(Some(_)), None) => log::warn!("Reduce task#{} has no key, output dropped", task_id),
            (TaskOutput::Reduce(None), _) => log::trace!("Reduce task#{} emitted nothing", task_id),
        }
        Ok(ReportOutcome::Applied)
    }

    /// The client could not run the task; put it back for someone else.
    pub fn fail(&self, store: &mut TaskStore, task_id: TaskId) -> Result<ReportOutcome, SessionError> {
        if self.lookup(store, task_id)?.is_none() {
            return Ok(ReportOutcome::Stale);
        }
        if store.release(task_id, self.client_id) {
            Ok(ReportOutcome::Applied)
        } else {
            Ok(ReportOutcome::Stale)
        }
    }

    /// `Ok(None)` for a task of an earlier generation.
    fn lookup<'a>(&self, store: &'a TaskStore, task_id: TaskId) -> Result<Option<&'a Task>, SessionError> {
        match store.get(task_id) {
            Some(task) => Ok(Some(task)),
            None if store.is_retired(task_id) => Ok(None),
            None => Err(SessionError::UnknownTask(task_id)),
        }
    }
}

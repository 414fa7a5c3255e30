use std::{collections::{BTreeMap, BTreeSet}, time::{Duration, Instant}};

use super::{ClientId, Datum, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Map,
    Reduce,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A single input record, for map tasks.
    Record(Datum),
    /// Every value emitted for one key, in arrival order, for reduce tasks.
    Group(Vec<Datum>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Assigned { client: ClientId, at: Instant },
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub key: Option<Datum>,
    pub payload: Payload,
    pub state: TaskState,
}

/// A task that has not been given an id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub kind: TaskKind,
    pub key: Option<Datum>,
    pub payload: Payload,
}

impl TaskSpec {
    pub fn map(key: Option<Datum>, record: Datum) -> Self {
        TaskSpec { kind: TaskKind::Map, key, payload: Payload::Record(record) }
    }

    pub fn reduce(key: Datum, values: Vec<Datum>) -> Self {
        TaskSpec { kind: TaskKind::Reduce, key: Some(key), payload: Payload::Group(values) }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: usize,
    pub assigned: usize,
    pub done: usize,
}

impl TaskCounts {
    pub fn total(&self) -> usize {
        self.pending + self.assigned + self.done
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("generation {generation} still has {outstanding} outstanding tasks")]
    GenerationInProgress { generation: u64, outstanding: usize },
}

/// Registry of the tasks of the current phase generation.
///
/// Not synchronized on its own; the owner keeps it behind the job's single
/// lock together with the aggregator and the phase flag.
#[derive(Debug, Default)]
pub struct TaskStore {
    task_seq: TaskId,
    generation: u64,
    /// First id of the current generation; anything below is retired.
    generation_start: TaskId,
    tasks: BTreeMap<TaskId, Task>,
    /// Ids are handed out in creation order, so the smallest pending id is the oldest.
    pending: BTreeSet<TaskId>,
    assigned: usize,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the task set with a fresh generation of pending tasks.
    pub fn enqueue<I>(&mut self, specs: I) -> Result<Vec<TaskId>, StoreError>
    where
        I: IntoIterator<Item = TaskSpec>,
    {
        let outstanding = self.pending.len() + self.assigned;
        if outstanding > 0 {
            return Err(StoreError::GenerationInProgress { generation: self.generation, outstanding });
        }
        self.tasks.clear();
        self.generation += 1;
        self.generation_start = self.task_seq + 1;

        let mut ids = vec![];
        for spec in specs {
            self.task_seq += 1;
            let id = self.task_seq;
            self.tasks.insert(id, Task {
                id,
                kind: spec.kind,
                key: spec.key,
                payload: spec.payload,
                state: TaskState::Pending,
            });
            self.pending.insert(id);
            ids.push(id);
        }
        log::debug!("Generation {} loaded with {} tasks", self.generation, ids.len());
        Ok(ids)
    }

    pub fn claim_next(&mut self, client: ClientId, now: Instant) -> Option<Task> {
        let id = self.pending.pop_first()?;
        let Some(task) = self.tasks.get_mut(&id) else {
            log::warn!("Pending task#{} missing from the store", id);
            return None;
        };
        task.state = TaskState::Assigned { client, at: now };
        self.assigned += 1;
        Some(task.clone())
    }

    /// Marks the task done if `client` still holds it. Anything else (a late
    /// reply after reclaim, a duplicate, a foreign client) is a no-op.
    pub fn complete(&mut self, id: TaskId, client: ClientId) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) if task.state.is_assigned_to(client) => {
                task.state = TaskState::Done;
                self.assigned -= 1;
                true
            }
            _ => false,
        }
    }

    /// Gives a held task back to the pending queue right away.
    pub fn release(&mut self, id: TaskId, client: ClientId) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) if task.state.is_assigned_to(client) => {
                task.state = TaskState::Pending;
                self.assigned -= 1;
                self.pending.insert(id);
                true
            }
            _ => false,
        }
    }

    pub fn reclaim_expired(&mut self, now: Instant, timeout: Duration) -> Vec<Task> {
        let mut reclaimed = vec![];
        for task in self.tasks.values_mut() {
            if let TaskState::Assigned { at, .. } = task.state {
                if now.saturating_duration_since(at) > timeout {
                    reclaimed.push(task.clone());
                    task.state = TaskState::Pending;
                    self.pending.insert(task.id);
                }
            }
        }
        self.assigned -= reclaimed.len();
        reclaimed
    }

    pub fn is_phase_exhausted(&self) -> bool {
        self.pending.is_empty() && self.assigned == 0
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// True for ids issued to an earlier generation.
    pub fn is_retired(&self, id: TaskId) -> bool {
        id > 0 && id < self.generation_start
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn counts(&self) -> TaskCounts {
        TaskCounts {
            pending: self.pending.len(),
            assigned: self.assigned,
            done: self.tasks.len() - self.pending.len() - self.assigned,
        }
    }
}

impl TaskState {
    pub fn is_assigned_to(&self, client: ClientId) -> bool {
        matches!(self, TaskState::Assigned { client: holder, .. } if *holder == client)
    }
}

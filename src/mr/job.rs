use std::{collections::HashMap, time::{Duration, Instant}};

use tokio::sync::oneshot;

use super::{
    ClientId, Phase, Record, TaskId,
    aggregator::{FinalResults, ResultAggregator},
    phase::PhaseController,
    session::{ClientSession, PollOutcome, ReportOutcome, SessionError, TaskOutput},
    task_store::{StoreError, Task, TaskCounts, TaskStore},
};

/// All shared mutable state of the master. Every method runs under the one
/// lock the master keeps around a `Job`.
pub struct Job {
    store: TaskStore,
    aggregator: ResultAggregator,
    controller: PhaseController,
    client_seq: ClientId,
    clients: HashMap<ClientId, Instant>,
    progress: Progress,
    sink: Option<oneshot::Sender<FinalResults>>,
}

impl Job {
    /// Loads the map phase. A job with no records finishes right here.
    pub fn new(
        records: Vec<Record>,
        sink: oneshot::Sender<FinalResults>,
        report_interval: u32,
    ) -> Result<Job, StoreError> {
        let mut job = Job {
            store: TaskStore::new(),
            aggregator: ResultAggregator::new(),
            controller: PhaseController::new(),
            client_seq: 0,
            clients: HashMap::new(),
            progress: Progress::new(report_interval),
            sink: Some(sink),
        };
        job.controller.start(&mut job.store, records)?;
        job.progress.reset();
        job.advance();
        Ok(job)
    }

    pub fn phase(&self) -> Phase {
        self.controller.phase()
    }

    pub fn counts(&self) -> TaskCounts {
        self.store.counts()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn new_client_id(&mut self, now: Instant) -> ClientId {
        self.client_seq += 1;
        self.clients.insert(self.client_seq, now);
        self.client_seq
    }

    pub fn poll(&mut self, client: ClientId, now: Instant) -> PollOutcome {
        self.touch(client, now);
        let phase = self.controller.phase();
        ClientSession::new(client).poll(&mut self.store, phase, now)
    }

    pub fn report(
        &mut self,
        client: ClientId,
        task_id: TaskId,
        output: TaskOutput,
        now: Instant,
    ) -> Result<ReportOutcome, SessionError> {
        self.touch(client, now);
        let outcome = ClientSession::new(client).report(&mut self.store, &mut self.aggregator, task_id, output)?;
        if outcome == ReportOutcome::Applied {
            self.progress.observe(self.controller.phase(), self.store.counts());
            self.advance();
        }
        Ok(outcome)
    }

    pub fn fail(&mut self, client: ClientId, task_id: TaskId, reason: &str, now: Instant) -> Result<ReportOutcome, SessionError> {
        self.touch(client, now);
        let outcome = ClientSession::new(client).fail(&mut self.store, task_id)?;
        if outcome == ReportOutcome::Applied {
            log::warn!("Worker#{} failed task#{}, requeued: {}", client, task_id, reason);
        }
        Ok(outcome)
    }

    pub fn end_session(&mut self, client: ClientId) {
        if self.clients.remove(&client).is_some() {
            log::info!("Worker#{} said goodbye", client);
        }
    }

    pub fn reclaim_expired(&mut self, now: Instant, timeout: Duration) -> Vec<Task> {
        self.store.reclaim_expired(now, timeout)
    }

    /// Forgets clients not heard from within `timeout`.
    pub fn evict_silent_clients(&mut self, now: Instant, timeout: Duration) -> Vec<ClientId> {
        let silent: Vec<_> = self.clients.iter()
            .filter(|&(_, &seen)| now.saturating_duration_since(seen) > timeout)
            .map(|(&id, _)| id)
            .collect();
        for id in &silent {
            self.clients.remove(id);
        }
        silent
    }

    /// Evaluates the phase guard; hands the results to the sink on DONE.
    pub fn advance(&mut self) {
        let before = self.controller.phase();
        match self.controller.advance(&mut self.store, &mut self.aggregator) {
            Ok(Some(results)) => {
                if let Some(sink) = self.sink.take() {
                    if sink.send(results).is_err() {
                        log::warn!("Result sink dropped before the job finished");
                    }
                }
            }
            Ok(None) => (),
            Err(e) => log::error!("Phase transition failed: {}", e),
        }
        if self.controller.phase() != before {
            self.progress.reset();
        }
    }

    fn touch(&mut self, client: ClientId, now: Instant) {
        if self.clients.insert(client, now).is_none() {
            log::info!("Worker#{} connected", client);
            self.client_seq = self.client_seq.max(client);
        }
    }
}

/// Logs phase progress every `interval` percent.
struct Progress {
    interval: u32,
    next_report: u32,
    started: Instant,
}

impl Progress {
    fn new(interval: u32) -> Self {
        Progress { interval: interval.max(1), next_report: interval.max(1), started: Instant::now() }
    }

    fn reset(&mut self) {
        self.next_report = self.interval;
        self.started = Instant::now();
    }

    fn observe(&mut self, phase: Phase, counts: TaskCounts) {
        let total = counts.total();
        if total == 0 {
            return;
        }
        let ratio = (counts.done * 100 / total) as u32;
        log::debug!("{:?} progress {} / {}", phase, counts.done, total);
        if ratio >= self.next_report {
            log::info!("{}% of {:?} tasks done. Elapsed {:?}", ratio, phase, self.started.elapsed());
            while self.next_report <= ratio {
                self.next_report += self.interval;
            }
        }
    }
}

use super::{
    Phase, Record,
    aggregator::{FinalResults, ResultAggregator},
    task_store::{StoreError, TaskSpec, TaskStore},
};

/// Owns the phase flag and is the only thing that moves a job between
/// phases: INIT -> MAP -> SHUFFLE -> REDUCE -> DONE.
#[derive(Debug)]
pub struct PhaseController {
    phase: Phase,
}

impl Default for PhaseController {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseController {
    pub fn new() -> Self {
        PhaseController { phase: Phase::Init }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// INIT -> MAP: one map task per input record.
    pub fn start<I>(&mut self, store: &mut TaskStore, records: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = Record>,
    {
        if self.phase != Phase::Init {
            log::warn!("Job already started, ignoring start in {:?}", self.phase);
            return Ok(0);
        }
        let ids = store.enqueue(records.into_iter().map(|r| TaskSpec::map(r.key, r.value)))?;
        self.phase = Phase::Map;
        log::info!("Start map phase with {} tasks", ids.len());
        Ok(ids.len())
    }

    /// Evaluates the exhaustion guard and takes every transition it allows.
    ///
    /// Returns the final results exactly once, on the call that reaches DONE.
    pub fn advance(
        &mut self,
        store: &mut TaskStore,
        aggregator: &mut ResultAggregator,
    ) -> Result<Option<FinalResults>, StoreError> {
        loop {
            match self.phase {
                Phase::Map if store.is_phase_exhausted() => {
                    self.phase = Phase::Shuffle;
                    let grouped = aggregator.drain_grouped();
                    log::info!("Map done. Shuffled into {} keys", grouped.len());
                    store.enqueue(grouped.into_iter().map(|(key, values)| TaskSpec::reduce(key, values)))?;
                    self.phase = Phase::Reduce;
                    log::info!("Start reduce phase");
                }
                Phase::Reduce if store.is_phase_exhausted() => {
                    self.phase = Phase::Done;
                    let results = aggregator.take_final();
                    log::info!("Reduce phase done with {} results", results.len());
                    return Ok(Some(results));
                }
                _ => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::mr::task_store::{Payload, TaskKind};

    fn record(value: &str) -> Record {
        Record { key: None, value: value.as_bytes().to_vec() }
    }

    #[test]
    fn empty_input_runs_straight_to_done() {
        let mut store = TaskStore::new();
        let mut agg = ResultAggregator::new();
        let mut ctl = PhaseController::new();

        assert_eq!(ctl.start(&mut store, vec![]).unwrap(), 0);
        assert_eq!(ctl.phase(), Phase::Map);

        let results = ctl.advance(&mut store, &mut agg).unwrap();
        assert_eq!(ctl.phase(), Phase::Done);
        assert!(results.unwrap().is_empty());
        assert!(ctl.advance(&mut store, &mut agg).unwrap().is_none(), "results handed out once");
    }

    #[test]
    fn no_reduce_tasks_before_map_exhausted() {
        let mut store = TaskStore::new();
        let mut agg = ResultAggregator::new();
        let mut ctl = PhaseController::new();
        ctl.start(&mut store, vec![record("x"), record("y")]).unwrap();

        let now = Instant::now();
        let first = store.claim_next(1, now).unwrap();
        store.complete(first.id, 1);
        agg.record_map_output(b"k".to_vec(), b"1".to_vec());
        assert!(ctl.advance(&mut store, &mut agg).unwrap().is_none());
        assert_eq!(ctl.phase(), Phase::Map);

        let second = store.claim_next(1, now).unwrap();
        assert_eq!(second.kind, TaskKind::Map);
        store.complete(second.id, 1);
        agg.record_map_output(b"k".to_vec(), b"2".to_vec());
        assert!(ctl.advance(&mut store, &mut agg).unwrap().is_none());
        assert_eq!(ctl.phase(), Phase::Reduce);

        let reduce = store.claim_next(1, now).unwrap();
        assert_eq!(reduce.kind, TaskKind::Reduce);
        assert_eq!(reduce.key.as_deref(), Some(&b"k"[..]));
        assert_eq!(reduce.payload, Payload::Group(vec![b"1".to_vec(), b"2".to_vec()]));
        assert!(store.claim_next(1, now).is_none());
    }

    #[test]
    fn map_without_emissions_skips_reduce_work() {
        let mut store = TaskStore::new();
        let mut agg = ResultAggregator::new();
        let mut ctl = PhaseController::new();
        ctl.start(&mut store, vec![record("x")]).unwrap();

        let task = store.claim_next(1, Instant::now()).unwrap();
        store.complete(task.id, 1);
        let results = ctl.advance(&mut store, &mut agg).unwrap();
        assert_eq!(ctl.phase(), Phase::Done);
        assert!(results.unwrap().is_empty());
    }

    #[test]
    fn start_twice_is_ignored() {
        let mut store = TaskStore::new();
        let mut ctl = PhaseController::new();
        ctl.start(&mut store, vec![record("x")]).unwrap();
        assert_eq!(ctl.start(&mut store, vec![record("y")]).unwrap(), 0);
        assert_eq!(store.counts().pending, 1);
    }
}

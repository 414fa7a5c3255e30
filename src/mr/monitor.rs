use std::{sync::Arc, time::{Duration, Instant}};

use tokio::{sync::Mutex, time};

use super::job::Job;

/// Shortest sweep period; a zero period would never yield.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Periodically takes back tasks from clients that went quiet, and
/// re-evaluates the phase guard on the same tick.
pub struct StaleAssignmentMonitor {
    job: Arc<Mutex<Job>>,
    period: Duration,
    timeout: Duration,
}

impl StaleAssignmentMonitor {
    pub fn new(job: Arc<Mutex<Job>>, period: Duration, timeout: Duration) -> Self {
        if period < MIN_PERIOD {
            log::warn!("Sweep period {:?} too short, using {:?}", period, MIN_PERIOD);
        }
        StaleAssignmentMonitor { job, period: period.max(MIN_PERIOD), timeout }
    }

    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = ticker.tick() => { self.sweep(Instant::now()).await; }
                _ = &mut shutdown => break,
            }
        }
        log::debug!("Monitor exiting");
    }

    /// One tick. Returns how many tasks went back to pending.
    pub async fn sweep(&self, now: Instant) -> usize {
        let mut job = self.job.lock().await;
        let reclaimed = job.reclaim_expired(now, self.timeout);
        for task in &reclaimed {
            if let super::task_store::TaskState::Assigned { client, .. } = task.state {
                log::info!("Reclaiming task#{} from silent worker#{}", task.id, client);
            }
        }
        for client in job.evict_silent_clients(now, self.timeout) {
            log::info!("Worker#{} timed out, forgetting it", client);
        }
        job.advance();
        reclaimed.len()
    }
}

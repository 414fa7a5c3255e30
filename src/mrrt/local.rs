use tokio::{task::JoinSet, time};

use crate::{
    config::{MasterConfig, WorkerConfig},
    mr::{
        Record,
        aggregator::FinalResults,
        master::Master,
        worker::{Worker, WorkerStats},
    },
    mrapps,
};

/// A master and `clients` workers in one process, talking over the
/// master's address. Returns the results and whatever the workers report.
pub async fn run(
    master: MasterConfig,
    worker: WorkerConfig,
    clients: usize,
    records: Vec<Record>,
) -> Result<(FinalResults, Vec<WorkerStats>), anyhow::Error> {
    let mapper = mrapps::get_mapper(&worker.mapper)?;
    let reducer = mrapps::get_reducer(&worker.reducer)?;
    let worker = WorkerConfig {
        address: master.address.clone(),
        password: master.password.clone(),
        ..worker
    };

    let mut workers = JoinSet::new();
    for i in 0..clients {
        let config = WorkerConfig { name: Some(format!("local-{}", i)), ..worker.clone() };
        let worker = Worker::new(config, mapper.clone(), reducer.clone());
        workers.spawn(async move { worker.run().await });
    }

    let linger = master.linger;
    let results = Master::new(master).run(records).await?;

    // workers that never got to connect are left behind
    let mut stats = Vec::with_capacity(clients);
    let collect = async {
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(s)) => stats.push(s),
                Ok(Err(e)) => log::warn!("Worker failed: {:#}", e),
                Err(e) => log::warn!("Worker task died: {}", e),
            }
        }
    };
    if time::timeout(linger, collect).await.is_err() {
        log::info!("Abandoning {} workers", workers.len());
    }
    Ok((results, stats))
}

use std::{sync::Arc, time::Duration};

use hyper_util::rt::TokioIo;
use tokio::{net::UnixStream, time::{self, Instant}};
use tonic::{
    Code, Status,
    codegen::InterceptedService,
    transport::{Channel, Endpoint, Uri},
};
use tower::service_fn;

use super::{
    KeyValue, Mapper, Reducer, decode, encode,
    rpc::{self, MAX_MESSAGE_SIZE, MasterAddr, PasswordAttach, Report, proto::master_client::MasterClient},
    session::{Assignment, PollOutcome, TaskOutput},
    task_store::{Payload, TaskKind},
};
use crate::{config::WorkerConfig, mrapps};

const CONNECT_RETRY: Duration = Duration::from_secs(1);

pub(crate) type Client = MasterClient<InterceptedService<Channel, PasswordAttach>>;

/// What one worker got done before it left.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub maps: usize,
    pub reduces: usize,
    pub failures: usize,
    pub stale: usize,
}

pub struct Worker {
    config: WorkerConfig,
    mapper: Arc<dyn Mapper>,
    reducer: Arc<dyn Reducer>,
}

impl Worker {
    pub fn new(config: WorkerConfig, mapper: Arc<dyn Mapper>, reducer: Arc<dyn Reducer>) -> Self {
        Worker { config, mapper, reducer }
    }

    /// Looks the mapper and reducer up by the names in `config`.
    pub fn from_config(config: WorkerConfig) -> Result<Self, anyhow::Error> {
        let mapper = mrapps::get_mapper(&config.mapper)?;
        let reducer = mrapps::get_reducer(&config.reducer)?;
        Ok(Worker::new(config, mapper, reducer))
    }

    pub async fn run(&self) -> Result<WorkerStats, anyhow::Error> {
        let channel = self.connect_with_retry().await?;
        let mut client = new_client(channel, PasswordAttach::new(self.config.password.as_deref())?);

        let name = self.config.name.clone()
            .unwrap_or_else(|| format!("pid {}", std::process::id()));
        let client_id = client.register(rpc::RegisterRequest { name }).await?.into_inner().client_id;
        log::info!("Assigned client id: {}", client_id);

        let mut stats = WorkerStats::default();
        loop {
            let reply = match client.poll(rpc::PollRequest { client_id }).await {
                Ok(reply) => reply.into_inner(),
                Err(status) if master_gone(&status) => {
                    log::warn!("Lost the master: {}", status.message());
                    break;
                }
                Err(status) => return Err(status.into()),
            };
            match PollOutcome::try_from(reply)? {
                PollOutcome::Task(task) => {
                    if !self.handle(&mut client, client_id, task, &mut stats).await? {
                        break;
                    }
                }
                PollOutcome::Wait | PollOutcome::PhaseDone => time::sleep(self.config.backoff).await,
                PollOutcome::JobDone => {
                    log::info!("Job done");
                    if let Err(status) = client.goodbye(rpc::GoodbyeRequest { client_id }).await {
                        log::debug!("Goodbye not delivered: {}", status.message());
                    }
                    break;
                }
            }
        }
        log::info!("Worker exiting: {:?}", stats);
        Ok(stats)
    }

    /// Runs one task and reports it. `Ok(false)` when the master went away.
    async fn handle(
        &self,
        client: &mut Client,
        client_id: u64,
        task: Assignment,
        stats: &mut WorkerStats,
    ) -> Result<bool, anyhow::Error> {
        let (task_id, kind) = (task.task_id, task.kind);
        log::debug!("Running {:?} task#{}", kind, task_id);
        let report = self.execute(task).await;
        if let Report::Failed(reason) = &report {
            log::warn!("Task#{} failed: {}", task_id, reason);
            stats.failures += 1;
        }
        let failed = matches!(report, Report::Failed(_));

        match client.report(report.into_request(client_id, task_id)).await {
            Ok(reply) if reply.get_ref().accepted => {
                if !failed {
                    match kind {
                        TaskKind::Map => stats.maps += 1,
                        TaskKind::Reduce => stats.reduces += 1,
                    }
                }
            }
            Ok(_) => {
                log::info!("Result of task#{} was not accepted", task_id);
                stats.stale += 1;
            }
            Err(status) if master_gone(&status) => {
                log::warn!("Lost the master: {}", status.message());
                return Ok(false);
            }
            Err(status) if !failed => {
                // the master kept the task; hand it back now instead of waiting out the timeout
                log::error!("Report of task#{} rejected: {}", task_id, status);
                stats.failures += 1;
                return self.give_back(client, client_id, task_id, &status).await;
            }
            Err(status) => log::error!("Failure of task#{} not delivered: {}", task_id, status),
        }
        Ok(true)
    }

    async fn give_back(
        &self,
        client: &mut Client,
        client_id: u64,
        task_id: u64,
        rejection: &Status,
    ) -> Result<bool, anyhow::Error> {
        let report = Report::Failed(format!("result rejected: {}", rejection.message()));
        match client.report(report.into_request(client_id, task_id)).await {
            Ok(_) => Ok(true),
            Err(status) if master_gone(&status) => {
                log::warn!("Lost the master: {}", status.message());
                Ok(false)
            }
            Err(status) => {
                log::error!("Could not release task#{}: {}", task_id, status);
                Ok(true)
            }
        }
    }

    /// User functions are CPU bound and may panic, so they run on the blocking pool.
    async fn execute(&self, task: Assignment) -> Report {
        let (mapper, reducer) = (self.mapper.clone(), self.reducer.clone());
        match tokio::task::spawn_blocking(move || run_task(&*mapper, &*reducer, &task)).await {
            Ok(Ok(output)) => Report::Output(output),
            Ok(Err(e)) => Report::Failed(format!("{:#}", e)),
            Err(e) => Report::Failed(format!("task aborted: {}", e)),
        }
    }

    async fn connect_with_retry(&self) -> Result<Channel, anyhow::Error> {
        let addr = &self.config.address;
        let deadline = Instant::now() + self.config.connect_timeout;
        loop {
            match connect(addr).await {
                Ok(channel) => {
                    log::info!("Connected to master at {}", addr);
                    return Ok(channel);
                }
                Err(e) if Instant::now() + CONNECT_RETRY <= deadline => {
                    log::debug!("Master at {} not reachable yet: {}", addr, e);
                    time::sleep(CONNECT_RETRY).await;
                }
                Err(e) => {
                    return Err(anyhow::anyhow!(
                        "could not reach master at {} within {:?}: {}", addr, self.config.connect_timeout, e
                    ));
                }
            }
        }
    }
}

pub(crate) fn new_client(channel: Channel, password: PasswordAttach) -> Client {
    MasterClient::with_interceptor(channel, password)
        .max_decoding_message_size(MAX_MESSAGE_SIZE)
        .max_encoding_message_size(MAX_MESSAGE_SIZE)
}

pub(crate) async fn connect(addr: &MasterAddr) -> Result<Channel, anyhow::Error> {
    let channel = match addr {
        MasterAddr::Tcp(addr) => {
            Endpoint::from_shared(format!("http://{}", addr))?.connect().await?
        }
        MasterAddr::Unix(path) => {
            let path = path.clone();
            // the uri is ignored by the connector
            Endpoint::from_static("http://[::1]:50051")
                .connect_with_connector(service_fn(move |_: Uri| {
                    let path = path.clone();
                    async move {
                        let stream = UnixStream::connect(path).await?;
                        Ok::<_, std::io::Error>(TokioIo::new(stream))
                    }
                }))
                .await?
        }
    };
    Ok(channel)
}

fn master_gone(status: &Status) -> bool {
    matches!(status.code(), Code::Unavailable | Code::Cancelled)
}

fn run_task(mapper: &dyn Mapper, reducer: &dyn Reducer, task: &Assignment) -> Result<TaskOutput, anyhow::Error> {
    let key = task.key.as_deref().map(decode).transpose()?;
    match &task.payload {
        Payload::Record(value) => {
            let pairs = mapper.map(key.as_ref(), &decode(value)?)?;
            let pairs = pairs.iter()
                .map(|KeyValue { key, value }| Ok((encode(key)?, encode(value)?)))
                .collect::<Result<Vec<_>, serde_json::Error>>()?;
            Ok(TaskOutput::Map(pairs))
        }
        Payload::Group(values) => {
            let key = key.ok_or_else(|| anyhow::anyhow!("reduce task#{} has no key", task.task_id))?;
            let values = values.iter().map(|v| decode(v)).collect::<Result<Vec<_>, _>>()?;
            let output = reducer.reduce(&key, values)?;
            Ok(TaskOutput::Reduce(output.as_ref().map(encode).transpose()?))
        }
    }
}
